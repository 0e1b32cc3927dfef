use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TesseraError, TesseraResult};

/// Top-level configuration, usually read from `tessera.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TesseraConfig {
    #[serde(default)]
    pub query: DistributedQueryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scatter-gather execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedQueryConfig {
    /// Namespace used when resolving partitions and issuing credentials.
    pub namespace: String,
    /// Maximum sub-queries executing at once (local and remote combined).
    pub max_concurrency: usize,
    /// Rows held between workers and the consumer before producers block.
    pub buffer_capacity: usize,
}

impl DistributedQueryConfig {
    /// Default row buffer capacity.
    pub const MAX_BUFFER_SIZE: usize = 100;

    pub fn validate(&self) -> TesseraResult<()> {
        if self.max_concurrency == 0 {
            return Err(TesseraError::Config(
                "query.max_concurrency must be at least 1".into(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(TesseraError::Config(
                "query.buffer_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for DistributedQueryConfig {
    fn default() -> Self {
        Self {
            namespace: "default".into(),
            max_concurrency: 8,
            buffer_capacity: Self::MAX_BUFFER_SIZE,
        }
    }
}

/// Log output settings. `RUST_LOG` takes precedence when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `info,tessera_cluster=debug`.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
        }
    }
}

impl TesseraConfig {
    pub fn from_toml_str(content: &str) -> TesseraResult<Self> {
        let config: TesseraConfig =
            toml::from_str(content).map_err(|e| TesseraError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> TesseraResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| TesseraError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> TesseraResult<()> {
        self.query.validate()
    }

    pub fn to_toml_string(&self) -> TesseraResult<String> {
        toml::to_string_pretty(self).map_err(|e| TesseraError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let cfg = TesseraConfig::default();
        assert_eq!(cfg.query.namespace, "default");
        assert_eq!(cfg.query.max_concurrency, 8);
        assert_eq!(cfg.query.buffer_capacity, 100);
        assert_eq!(cfg.logging.filter, "info");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let cfg = TesseraConfig::from_toml_str(
            r#"
            [query]
            max_concurrency = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.query.max_concurrency, 2);
        assert_eq!(cfg.query.buffer_capacity, DistributedQueryConfig::MAX_BUFFER_SIZE);
        assert_eq!(cfg.logging.filter, "info");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = TesseraConfig::from_toml_str("[query]\nmax_concurrency = 0\n").unwrap_err();
        assert!(matches!(err, TesseraError::Config(_)));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let err = TesseraConfig::from_toml_str("[query]\nbuffer_capacity = 0\n").unwrap_err();
        assert!(err.to_string().contains("buffer_capacity"));
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        let mut cfg = TesseraConfig::default();
        cfg.query.namespace = "acme".into();
        cfg.logging.filter = "debug".into();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(cfg.to_toml_string().unwrap().as_bytes()).unwrap();

        let loaded = TesseraConfig::load(file.path()).unwrap();
        assert_eq!(loaded.query.namespace, "acme");
        assert_eq!(loaded.logging.filter, "debug");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = TesseraConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, TesseraError::Config(_)));
    }
}
