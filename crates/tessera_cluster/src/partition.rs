//! Partition lookup: `(namespace, table, partition key)` → partition reader.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use tessera_common::datum::OwnedRow;
use tessera_common::error::{TesseraError, TesseraResult};

use crate::distributed_exec::{ResultCursor, TableExpression};

pub trait PartitionMap: Send + Sync {
    /// Open a reader over one partition. Fails with `TableNotFound` or
    /// `PartitionNotFound` when the lookup does not resolve.
    fn open_partition(
        &self,
        namespace: &str,
        table: &str,
        partition_key: &str,
    ) -> TesseraResult<Box<dyn TableExpression>>;
}

/// Table expression over a fixed set of rows.
pub struct MemoryScan {
    column_count: usize,
    rows: Arc<Vec<OwnedRow>>,
}

impl MemoryScan {
    pub fn new(column_count: usize, rows: Vec<OwnedRow>) -> Self {
        Self::shared(column_count, Arc::new(rows))
    }

    pub fn shared(column_count: usize, rows: Arc<Vec<OwnedRow>>) -> Self {
        Self { column_count, rows }
    }
}

impl TableExpression for MemoryScan {
    fn column_count(&self) -> usize {
        self.column_count
    }

    fn execute(self: Box<Self>) -> TesseraResult<Box<dyn ResultCursor>> {
        Ok(Box::new(MemoryScanCursor {
            column_count: self.column_count,
            rows: self.rows,
            pos: 0,
        }))
    }
}

struct MemoryScanCursor {
    column_count: usize,
    rows: Arc<Vec<OwnedRow>>,
    pos: usize,
}

impl ResultCursor for MemoryScanCursor {
    fn column_count(&self) -> usize {
        self.column_count
    }

    fn next(&mut self) -> TesseraResult<Option<OwnedRow>> {
        let row = self.rows.get(self.pos).cloned();
        if row.is_some() {
            self.pos += 1;
        }
        Ok(row)
    }
}

struct MemoryTable {
    columns: Vec<String>,
    partitions: HashMap<String, Arc<Vec<OwnedRow>>>,
}

/// Partition map backed by in-memory row vectors.
#[derive(Default)]
pub struct InMemoryPartitionMap {
    tables: RwLock<HashMap<(String, String), MemoryTable>>,
}

impl InMemoryPartitionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) a table definition with no partitions.
    pub fn create_table(&self, namespace: &str, table: &str, columns: Vec<String>) {
        self.tables.write().insert(
            (namespace.to_string(), table.to_string()),
            MemoryTable {
                columns,
                partitions: HashMap::new(),
            },
        );
    }

    pub fn insert_partition(
        &self,
        namespace: &str,
        table: &str,
        partition_key: &str,
        rows: Vec<OwnedRow>,
    ) -> TesseraResult<()> {
        let mut tables = self.tables.write();
        let entry = tables
            .get_mut(&(namespace.to_string(), table.to_string()))
            .ok_or_else(|| TesseraError::TableNotFound {
                namespace: namespace.to_string(),
                table: table.to_string(),
            })?;
        if let Some(bad) = rows.iter().find(|r| r.len() != entry.columns.len()) {
            return Err(TesseraError::contract_violation(
                "E-PART-001",
                format!(
                    "row {} has {} columns, table {}/{} has {}",
                    bad,
                    bad.len(),
                    namespace,
                    table,
                    entry.columns.len()
                ),
            ));
        }
        entry
            .partitions
            .insert(partition_key.to_string(), Arc::new(rows));
        Ok(())
    }

    pub fn partition_keys(&self, namespace: &str, table: &str) -> Vec<String> {
        let tables = self.tables.read();
        let mut keys: Vec<String> = tables
            .get(&(namespace.to_string(), table.to_string()))
            .map(|t| t.partitions.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

impl PartitionMap for InMemoryPartitionMap {
    fn open_partition(
        &self,
        namespace: &str,
        table: &str,
        partition_key: &str,
    ) -> TesseraResult<Box<dyn TableExpression>> {
        tracing::debug!(namespace, table, partition = partition_key, "opening partition");
        let tables = self.tables.read();
        let entry = tables
            .get(&(namespace.to_string(), table.to_string()))
            .ok_or_else(|| TesseraError::TableNotFound {
                namespace: namespace.to_string(),
                table: table.to_string(),
            })?;
        let rows = entry.partitions.get(partition_key).ok_or_else(|| {
            TesseraError::PartitionNotFound {
                namespace: namespace.to_string(),
                table: table.to_string(),
                partition: partition_key.to_string(),
            }
        })?;
        Ok(Box::new(MemoryScan::shared(
            entry.columns.len(),
            Arc::clone(rows),
        )))
    }
}
