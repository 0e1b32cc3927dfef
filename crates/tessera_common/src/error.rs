use thiserror::Error;

/// Convenience alias for `Result<T, TesseraError>`.
pub type TesseraResult<T> = Result<T, TesseraError>;

/// Error classification for failover and propagation decisions.
///
/// - `Connectivity`: host unreachable or credentials rejected; the remote
///   path fails over to the next replica
/// - `Execution`: the query itself failed, locally or on a reached host
/// - `Cancelled`: work stopped because the gather or job was cancelled
/// - `NotFound`: partition lookup did not resolve
/// - `ContractViolation`: caller bug; never retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connectivity,
    Execution,
    Cancelled,
    NotFound,
    ContractViolation,
}

/// Top-level error type for the distributed execution layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TesseraError {
    #[error("Connectivity error: host {host} unreachable: {reason}")]
    Connectivity { host: String, reason: String },

    #[error("Connectivity error: host {host} rejected credentials: {reason}")]
    AuthRejected { host: String, reason: String },

    #[error("Remote execution error on {host}: {message}")]
    RemoteExecution { host: String, message: String },

    #[error("Local execution error: {0}")]
    LocalExecution(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Table not found: {namespace}/{table}")]
    TableNotFound { namespace: String, table: String },

    #[error("Partition not found: {namespace}/{table}/{partition}")]
    PartitionNotFound {
        namespace: String,
        table: String,
        partition: String,
    },

    /// Caller bug. Carries a stable `error_code` for post-mortem.
    #[error("ContractViolation [{error_code}]: {message}")]
    ContractViolation {
        error_code: &'static str,
        message: String,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TesseraError {
    pub fn contract_violation(error_code: &'static str, message: impl Into<String>) -> Self {
        TesseraError::ContractViolation {
            error_code,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TesseraError::Connectivity { .. } | TesseraError::AuthRejected { .. } => {
                ErrorKind::Connectivity
            }
            TesseraError::RemoteExecution { .. }
            | TesseraError::LocalExecution(_)
            | TesseraError::Internal(_) => ErrorKind::Execution,
            TesseraError::Cancelled(_) => ErrorKind::Cancelled,
            TesseraError::TableNotFound { .. } | TesseraError::PartitionNotFound { .. } => {
                ErrorKind::NotFound
            }
            TesseraError::ContractViolation { .. } | TesseraError::Config(_) => {
                ErrorKind::ContractViolation
            }
        }
    }

    /// True when a remote attempt should move on to the next replica host.
    /// Execution-level failures on a reached host never qualify.
    pub fn is_failover_eligible(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connectivity)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind(), ErrorKind::Cancelled)
    }

    pub fn is_contract_violation(&self) -> bool {
        matches!(self.kind(), ErrorKind::ContractViolation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failover_classification() {
        let unreachable = TesseraError::Connectivity {
            host: "10.0.0.1:9100".into(),
            reason: "connection refused".into(),
        };
        let auth = TesseraError::AuthRejected {
            host: "10.0.0.1:9100".into(),
            reason: "bad token".into(),
        };
        let remote = TesseraError::RemoteExecution {
            host: "10.0.0.1:9100".into(),
            message: "division by zero".into(),
        };
        assert!(unreachable.is_failover_eligible());
        assert!(auth.is_failover_eligible());
        assert!(!remote.is_failover_eligible());
        assert!(!TesseraError::LocalExecution("boom".into()).is_failover_eligible());
    }

    #[test]
    fn test_contract_violation_display() {
        let e = TesseraError::contract_violation("E-JOB-001", "finished job");
        assert!(e.is_contract_violation());
        assert_eq!(e.to_string(), "ContractViolation [E-JOB-001]: finished job");
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            TesseraError::Cancelled("query cancelled".into()).kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(
            TesseraError::PartitionNotFound {
                namespace: "ns".into(),
                table: "t".into(),
                partition: "p0".into(),
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(TesseraError::Config("x".into()).kind(), ErrorKind::ContractViolation);
    }
}
