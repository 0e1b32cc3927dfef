use std::sync::Arc;

use crate::partition::PartitionMap;
use crate::transport::{CredentialProvider, QueryTransport};

/// Process-level collaborators handed to a gather at construction.
#[derive(Clone)]
pub struct ExecutionContext {
    namespace: String,
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn QueryTransport>,
    partitions: Arc<dyn PartitionMap>,
}

impl ExecutionContext {
    pub fn new(
        namespace: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn QueryTransport>,
        partitions: Arc<dyn PartitionMap>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            credentials,
            transport,
            partitions,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn credentials(&self) -> &dyn CredentialProvider {
        self.credentials.as_ref()
    }

    pub fn transport(&self) -> &dyn QueryTransport {
        self.transport.as_ref()
    }

    pub fn partitions(&self) -> &dyn PartitionMap {
        self.partitions.as_ref()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
