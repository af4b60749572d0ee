use std::fmt::Debug;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use weft_error::Result;

/// Pull-based reader over a connector's data for one table.
pub trait DataSource: Debug + Send {
    /// Get the next batch, or `None` once the source is exhausted.
    fn next_batch(&mut self) -> Result<Option<RecordBatch>>;
}

/// Connector-side description of a scannable table.
pub trait ConnectorTableHandle: Debug + Send + Sync {
    fn create_data_source(&self) -> Result<Box<dyn DataSource>>;
}

/// Writer for appending rows to a connector table.
pub trait ConnectorWriter: Debug + Send {
    fn append(&mut self, batch: RecordBatch) -> Result<()>;

    /// Commit the write, returning the number of rows written.
    fn finish(&mut self) -> Result<u64>;
}

/// Connector-side description of an insert target.
pub trait ConnectorInsertTableHandle: Debug + Send + Sync {
    /// Whether the connector accepts concurrent writers for this target.
    fn supports_multi_threading(&self) -> bool;

    fn create_writer(&self) -> Result<Box<dyn ConnectorWriter>>;
}

/// Engine-level insert handle wrapping the connector handle.
#[derive(Debug, Clone)]
pub struct InsertTableHandle {
    connector_handle: Arc<dyn ConnectorInsertTableHandle>,
}

impl InsertTableHandle {
    pub fn new(connector_handle: Arc<dyn ConnectorInsertTableHandle>) -> Self {
        InsertTableHandle { connector_handle }
    }

    pub fn connector_insert_table_handle(&self) -> &Arc<dyn ConnectorInsertTableHandle> {
        &self.connector_handle
    }
}
