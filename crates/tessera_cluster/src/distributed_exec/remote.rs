//! Remote sub-query execution with replica failover.
//!
//! Hosts are tried in list order. Connectivity and credential failures move on
//! to the next host; an execution failure on a reached host fails the
//! sub-query immediately. Rows already delivered from an abandoned host are
//! kept, and the same number of leading rows is skipped on the next replica
//! so nothing is delivered twice.

use tessera_common::error::{TesseraError, TesseraResult};

use super::{ExecutionContext, PlanFragment, ReplicaRef, RowSink};
use crate::transport::AuthToken;

pub fn execute_remote(
    ctx: &ExecutionContext,
    plan: &PlanFragment,
    hosts: &[ReplicaRef],
    sink: &dyn RowSink,
) -> TesseraResult<()> {
    if hosts.is_empty() {
        return Err(TesseraError::contract_violation(
            "E-REMOTE-001",
            format!("remote sub-query on '{}' has no replica hosts", plan.table),
        ));
    }
    let token = ctx.credentials().issue_credential(ctx.namespace())?;

    let mut delivered = 0usize;
    let mut last_err = None;
    for (attempt, host) in hosts.iter().enumerate() {
        if sink.is_cancelled() {
            return Err(TesseraError::Cancelled("gather cancelled".into()));
        }
        tracing::debug!(
            host = %host,
            table = %plan.table,
            attempt = attempt + 1,
            of = hosts.len(),
            skip = delivered,
            "issuing plan fragment"
        );
        match execute_on_host(ctx, plan, host, &token, sink, &mut delivered) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_failover_eligible() => {
                tracing::warn!(
                    host = %host,
                    table = %plan.table,
                    remaining = hosts.len() - attempt - 1,
                    "replica failed, trying next host: {}",
                    e
                );
                sink.record_failover();
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        TesseraError::contract_violation("E-REMOTE-002", "replica list exhausted without attempt")
    }))
}

fn execute_on_host(
    ctx: &ExecutionContext,
    plan: &PlanFragment,
    host: &ReplicaRef,
    token: &AuthToken,
    sink: &dyn RowSink,
    delivered: &mut usize,
) -> TesseraResult<()> {
    let stream = ctx.transport().execute_on_host(plan, host, token)?;
    let mut seen = 0usize;
    for item in stream {
        let row = item?;
        if row.len() != plan.column_count() {
            return Err(TesseraError::RemoteExecution {
                host: host.addr.clone(),
                message: format!(
                    "row has {} columns, plan on '{}' expects {}",
                    row.len(),
                    plan.table,
                    plan.column_count()
                ),
            });
        }
        seen += 1;
        if seen <= *delivered {
            continue;
        }
        if !sink.push(row) {
            return Err(TesseraError::Cancelled("gather cancelled".into()));
        }
        *delivered += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::InMemoryPartitionMap;
    use crate::transport::{HostBehavior, InProcessTransport, StaticCredentialProvider};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tessera_common::datum::{Datum, OwnedRow};

    #[derive(Default)]
    struct VecSink {
        rows: Mutex<Vec<OwnedRow>>,
        failovers: AtomicUsize,
    }

    impl RowSink for VecSink {
        fn push(&self, row: OwnedRow) -> bool {
            self.rows.lock().push(row);
            true
        }

        fn is_cancelled(&self) -> bool {
            false
        }

        fn record_failover(&self) {
            self.failovers.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn rows(range: std::ops::Range<i64>) -> Vec<OwnedRow> {
        range.map(|i| OwnedRow::new(vec![Datum::Int64(i)])).collect()
    }

    fn setup() -> (ExecutionContext, Arc<InProcessTransport>) {
        let transport = Arc::new(InProcessTransport::new());
        let ctx = ExecutionContext::new(
            "acme",
            Arc::new(StaticCredentialProvider::new("secret")),
            transport.clone(),
            Arc::new(InMemoryPartitionMap::new()),
        );
        (ctx, transport)
    }

    fn plan() -> PlanFragment {
        PlanFragment::new("events", vec!["id".into()], Vec::new())
    }

    fn hosts(addrs: &[&str]) -> Vec<ReplicaRef> {
        addrs
            .iter()
            .enumerate()
            .map(|(i, a)| ReplicaRef::new(i as u64 + 1, *a))
            .collect()
    }

    #[test]
    fn test_fails_over_past_unreachable_host() {
        let (ctx, transport) = setup();
        transport.register("h1", HostBehavior::Unreachable);
        transport.register("h2", HostBehavior::Serve(rows(0..3)));
        let sink = VecSink::default();
        execute_remote(&ctx, &plan(), &hosts(&["h1", "h2"]), &sink).unwrap();
        assert_eq!(*sink.rows.lock(), rows(0..3));
        assert_eq!(sink.failovers.load(Ordering::SeqCst), 1);
        assert_eq!(transport.attempts(), vec!["h1", "h2"]);
    }

    #[test]
    fn test_fails_over_past_rejected_credentials() {
        let (ctx, transport) = setup();
        transport.register("h1", HostBehavior::RejectAuth);
        transport.register("h2", HostBehavior::Serve(rows(0..1)));
        let sink = VecSink::default();
        execute_remote(&ctx, &plan(), &hosts(&["h1", "h2"]), &sink).unwrap();
        assert_eq!(sink.rows.lock().len(), 1);
    }

    #[test]
    fn test_execution_error_does_not_fail_over() {
        let (ctx, transport) = setup();
        transport.register("h1", HostBehavior::Fail("unknown column".into()));
        transport.register("h2", HostBehavior::Serve(rows(0..3)));
        let sink = VecSink::default();
        let err = execute_remote(&ctx, &plan(), &hosts(&["h1", "h2"]), &sink).unwrap_err();
        assert!(matches!(err, TesseraError::RemoteExecution { ref host, .. } if host == "h1"));
        assert_eq!(transport.attempts(), vec!["h1"]);
        assert!(sink.rows.lock().is_empty());
    }

    #[test]
    fn test_all_hosts_unreachable_reports_last_error() {
        let (ctx, transport) = setup();
        transport.register("h1", HostBehavior::Unreachable);
        transport.register("h2", HostBehavior::RejectAuth);
        let sink = VecSink::default();
        let err = execute_remote(&ctx, &plan(), &hosts(&["h1", "h2"]), &sink).unwrap_err();
        assert!(matches!(err, TesseraError::AuthRejected { ref host, .. } if host == "h2"));
        assert_eq!(sink.failovers.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_mid_stream_disconnect_resumes_without_duplicates() {
        let (ctx, transport) = setup();
        transport.register("h1", HostBehavior::DropAfter(rows(0..2)));
        transport.register("h2", HostBehavior::Serve(rows(0..5)));
        let sink = VecSink::default();
        execute_remote(&ctx, &plan(), &hosts(&["h1", "h2"]), &sink).unwrap();
        assert_eq!(*sink.rows.lock(), rows(0..5));
    }

    #[test]
    fn test_mid_stream_execution_failure_keeps_delivered_rows() {
        let (ctx, transport) = setup();
        transport.register("h1", HostBehavior::FailAfter(rows(0..2), "oom".into()));
        transport.register("h2", HostBehavior::Serve(rows(0..5)));
        let sink = VecSink::default();
        let err = execute_remote(&ctx, &plan(), &hosts(&["h1", "h2"]), &sink).unwrap_err();
        assert!(!err.is_failover_eligible());
        assert_eq!(*sink.rows.lock(), rows(0..2));
        assert_eq!(transport.attempts(), vec!["h1"]);
    }

    #[test]
    fn test_empty_host_list_is_contract_violation() {
        let (ctx, _) = setup();
        let sink = VecSink::default();
        let err = execute_remote(&ctx, &plan(), &[], &sink).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_wrong_row_width_is_execution_error() {
        let (ctx, transport) = setup();
        transport.register(
            "h1",
            HostBehavior::Serve(vec![OwnedRow::new(vec![Datum::Int64(1), Datum::Int64(2)])]),
        );
        let sink = VecSink::default();
        let err = execute_remote(&ctx, &plan(), &hosts(&["h1", "h2"]), &sink).unwrap_err();
        assert!(matches!(err, TesseraError::RemoteExecution { .. }));
        assert_eq!(transport.attempts(), vec!["h1"]);
    }
}
