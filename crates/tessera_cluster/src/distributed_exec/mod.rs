//! Distributed execution: scatter sub-queries across local partitions and
//! remote replicas, gather their rows into one pull-based cursor.
//!
//! # Architecture
//!
//! ```text
//!   PipelinedExpression ── execute() ──► GatherCursor (consumer pulls)
//!        │                                   ▲
//!        │ SubQuery queue                    │ GatherChannel (bounded)
//!        ▼                                   │
//!   worker pool (max_concurrency threads) ───┘
//!     ├─ Local:  TableExpression → ResultCursor pull loop
//!     └─ Remote: QueryTransport, replica failover in list order
//! ```

mod channel;
mod context;
mod local;
mod pipelined;
mod remote;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tessera_common::datum::OwnedRow;
use tessera_common::error::TesseraResult;
use tessera_common::types::NodeId;

pub use channel::GatherStats;
pub use context::ExecutionContext;
pub use local::execute_local;
pub use pipelined::{
    GatherCursor, PipelinedExpression, COUNTER_HOST_FAILOVERS, COUNTER_ROWS_PRODUCED,
    COUNTER_SUBQUERIES_FINISHED, COUNTER_SUBQUERIES_STARTED,
};
pub use remote::execute_remote;

/// A table expression: knows its width and can be executed exactly once.
pub trait TableExpression: Send {
    fn column_count(&self) -> usize;

    fn execute(self: Box<Self>) -> TesseraResult<Box<dyn ResultCursor>>;
}

/// Pull interface over the rows of an executing table expression.
///
/// `Ok(Some(row))` yields a row, `Ok(None)` signals end of stream.
pub trait ResultCursor: Send {
    fn column_count(&self) -> usize;

    fn next(&mut self) -> TesseraResult<Option<OwnedRow>>;
}

/// Destination for rows produced by a sub-query worker.
pub trait RowSink: Sync {
    /// Hand one row to the consumer. Returns `false` when the gather has been
    /// cancelled; the producer must stop without pushing further rows.
    fn push(&self, row: OwnedRow) -> bool;

    fn is_cancelled(&self) -> bool;

    /// Called once per abandoned replica host.
    fn record_failover(&self) {}
}

/// One candidate host for a remote sub-query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaRef {
    pub node_id: NodeId,
    pub addr: String,
}

impl ReplicaRef {
    pub fn new(node_id: u64, addr: impl Into<String>) -> Self {
        Self {
            node_id: NodeId(node_id),
            addr: addr.into(),
        }
    }
}

impl fmt::Display for ReplicaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.node_id, self.addr)
    }
}

/// Logical plan subtree shipped to a remote host.
///
/// Opaque to the gather layer apart from its output columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFragment {
    pub table: String,
    pub columns: Vec<String>,
    pub payload: Vec<u8>,
}

impl PlanFragment {
    pub fn new(table: impl Into<String>, columns: Vec<String>, payload: Vec<u8>) -> Self {
        Self {
            table: table.into(),
            columns,
            payload,
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// One registered unit of gather work.
pub enum SubQuery {
    Local(Box<dyn TableExpression>),
    Remote {
        plan: Arc<PlanFragment>,
        hosts: Vec<ReplicaRef>,
    },
}

impl SubQuery {
    pub fn column_count(&self) -> usize {
        match self {
            SubQuery::Local(expr) => expr.column_count(),
            SubQuery::Remote { plan, .. } => plan.column_count(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, SubQuery::Local(_))
    }
}

impl fmt::Debug for SubQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubQuery::Local(expr) => f
                .debug_struct("Local")
                .field("columns", &expr.column_count())
                .finish(),
            SubQuery::Remote { plan, hosts } => f
                .debug_struct("Remote")
                .field("table", &plan.table)
                .field("hosts", hosts)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::MemoryScan;

    #[test]
    fn test_replica_display() {
        let r = ReplicaRef::new(3, "10.0.0.3:9100");
        assert_eq!(r.to_string(), "node_3@10.0.0.3:9100");
    }

    #[test]
    fn test_plan_fragment_wire_format() {
        let plan = PlanFragment::new("events", vec!["id".into(), "ts".into()], vec![1, 2]);
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["table"], "events");
        assert_eq!(json["columns"][1], "ts");
        let back: PlanFragment = serde_json::from_value(json).unwrap();
        assert_eq!(back, plan);
        assert_eq!(back.column_count(), 2);

        let hosts = vec![ReplicaRef::new(1, "a:1"), ReplicaRef::new(2, "b:1")];
        let json = serde_json::to_string(&hosts).unwrap();
        let back: Vec<ReplicaRef> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hosts);
    }

    #[test]
    fn test_subquery_width_and_kind() {
        let local = SubQuery::Local(Box::new(MemoryScan::new(3, Vec::new())));
        assert!(local.is_local());
        assert_eq!(local.column_count(), 3);

        let remote = SubQuery::Remote {
            plan: Arc::new(PlanFragment::new("t", vec!["a".into()], Vec::new())),
            hosts: vec![ReplicaRef::new(1, "h")],
        };
        assert!(!remote.is_local());
        assert_eq!(remote.column_count(), 1);
        assert!(format!("{:?}", remote).contains("\"h\""));
    }
}
