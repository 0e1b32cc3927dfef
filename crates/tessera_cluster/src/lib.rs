//! Distributed query execution for Tessera: scatter sub-queries across local
//! partitions and remote replicas, gather their rows through one bounded,
//! cancellable stream.

pub mod distributed_exec;
pub mod job;
pub mod partition;
pub mod transport;

pub use distributed_exec::{
    execute_local, execute_remote, ExecutionContext, GatherCursor, GatherStats,
    PipelinedExpression, PlanFragment, ReplicaRef, ResultCursor, RowSink, SubQuery,
    TableExpression,
};
pub use job::{Job, JobState};
pub use partition::{InMemoryPartitionMap, MemoryScan, PartitionMap};
pub use transport::{
    AuthToken, CredentialProvider, HostBehavior, InProcessTransport, QueryTransport,
    RemoteRowStream, StaticCredentialProvider,
};
