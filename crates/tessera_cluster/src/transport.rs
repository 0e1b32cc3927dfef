//! Transport and credential contracts used by the remote sub-query path,
//! plus an in-process implementation for tests and load drivers.
//!
//! Error contract for `QueryTransport::execute_on_host`:
//! - `Connectivity` / `AuthRejected` (from the call or mid-stream): the caller
//!   abandons this host and fails over to the next replica.
//! - anything else: the query failed on a reached host; no failover.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use tessera_common::datum::OwnedRow;
use tessera_common::error::{TesseraError, TesseraResult};

use crate::distributed_exec::{PlanFragment, ReplicaRef};

/// Rows streamed back from a remote host.
pub type RemoteRowStream = Box<dyn Iterator<Item = TesseraResult<OwnedRow>> + Send>;

/// Namespace-scoped credential presented to remote hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub namespace: String,
    pub token: String,
}

pub trait CredentialProvider: Send + Sync {
    fn issue_credential(&self, namespace: &str) -> TesseraResult<AuthToken>;
}

pub trait QueryTransport: Send + Sync {
    fn execute_on_host(
        &self,
        plan: &PlanFragment,
        host: &ReplicaRef,
        token: &AuthToken,
    ) -> TesseraResult<RemoteRowStream>;
}

/// Issues deterministic tokens derived from a shared secret.
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    secret: String,
}

impl StaticCredentialProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn issue_credential(&self, namespace: &str) -> TesseraResult<AuthToken> {
        if namespace.is_empty() {
            return Err(TesseraError::contract_violation(
                "E-AUTH-001",
                "cannot issue a credential for an empty namespace",
            ));
        }
        Ok(AuthToken {
            namespace: namespace.to_string(),
            token: format!("{}:{}", self.secret, namespace),
        })
    }
}

/// How an in-process host answers a plan fragment.
#[derive(Debug, Clone)]
pub enum HostBehavior {
    /// Stream all rows, then end.
    Serve(Vec<OwnedRow>),
    /// Refuse the connection.
    Unreachable,
    /// Reject the presented credential.
    RejectAuth,
    /// Reach the host, then fail the query before any row.
    Fail(String),
    /// Stream rows, then fail the query.
    FailAfter(Vec<OwnedRow>, String),
    /// Stream rows, then lose the connection.
    DropAfter(Vec<OwnedRow>),
}

/// In-memory host registry keyed by replica address.
///
/// Unknown addresses behave like unreachable hosts. Every attempt is recorded
/// in call order.
#[derive(Default)]
pub struct InProcessTransport {
    hosts: RwLock<HashMap<String, HostBehavior>>,
    attempts: Mutex<Vec<String>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, addr: impl Into<String>, behavior: HostBehavior) {
        self.hosts.write().insert(addr.into(), behavior);
    }

    /// Addresses attempted so far, in order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }

    pub fn clear_attempts(&self) {
        self.attempts.lock().clear();
    }
}

impl QueryTransport for InProcessTransport {
    fn execute_on_host(
        &self,
        plan: &PlanFragment,
        host: &ReplicaRef,
        token: &AuthToken,
    ) -> TesseraResult<RemoteRowStream> {
        self.attempts.lock().push(host.addr.clone());
        tracing::trace!(
            host = %host,
            table = %plan.table,
            namespace = %token.namespace,
            "in-process execute"
        );

        let behavior = self.hosts.read().get(&host.addr).cloned();
        let addr = host.addr.clone();
        match behavior {
            None => Err(TesseraError::Connectivity {
                host: addr,
                reason: "no route to host".into(),
            }),
            Some(HostBehavior::Unreachable) => Err(TesseraError::Connectivity {
                host: addr,
                reason: "connection refused".into(),
            }),
            Some(HostBehavior::RejectAuth) => Err(TesseraError::AuthRejected {
                host: addr,
                reason: format!("token for namespace '{}' rejected", token.namespace),
            }),
            Some(HostBehavior::Fail(message)) => {
                Err(TesseraError::RemoteExecution { host: addr, message })
            }
            Some(HostBehavior::Serve(rows)) => Ok(Box::new(rows.into_iter().map(Ok))),
            Some(HostBehavior::FailAfter(rows, message)) => Ok(Box::new(
                rows.into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(TesseraError::RemoteExecution {
                        host: addr,
                        message,
                    }))),
            )),
            Some(HostBehavior::DropAfter(rows)) => Ok(Box::new(rows.into_iter().map(Ok).chain(
                std::iter::once(Err(TesseraError::Connectivity {
                    host: addr,
                    reason: "connection reset by peer".into(),
                })),
            ))),
        }
    }
}
