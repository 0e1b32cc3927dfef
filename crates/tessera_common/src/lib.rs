//! Shared building blocks for Tessera: the row value model, identifier
//! types, the error taxonomy and configuration.

pub mod config;
pub mod datum;
pub mod error;
pub mod types;

pub use config::{DistributedQueryConfig, LoggingConfig, TesseraConfig};
pub use datum::{Datum, OwnedRow};
pub use error::{ErrorKind, TesseraError, TesseraResult};
pub use types::NodeId;
