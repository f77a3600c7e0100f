use std::sync::Arc;

use arrow::array::{Int64Array, StringArray, TimestampMicrosecondArray};
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use common::{Error, Result};
use datafusion::dataframe::DataFrame;
use tracing::{error, info, warn};

use crate::core::{RAW, Warehouse, WriteMode};
use crate::tables::{LOAD_METADATA, load_metadata_schema};

/// Loads verbatim source snapshots into the raw schema, recording every
/// attempt in `raw.load_metadata`.
pub struct RawLoader {
    warehouse: Arc<Warehouse>,
}

impl RawLoader {
    pub fn new(warehouse: Arc<Warehouse>) -> Self {
        Self { warehouse }
    }

    /// Writes `batches` into `raw.<table>`. On success an audit row with
    /// status SUCCESS and the row count is appended; on failure a FAILED
    /// row carrying the error text is appended and the original error is
    /// returned to the caller.
    pub fn load(&self, batches: Vec<RecordBatch>, table: &str, mode: WriteMode) -> Result<usize> {
        let schema = batches.first().map(|b| b.schema()).ok_or_else(|| {
            Error::InvalidInput(format!("refusing to load empty dataset into raw.{}", table))
        })?;

        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        info!(table, rows, "loading records into raw schema");

        match self.warehouse.write_table(RAW, table, schema, batches, mode) {
            Ok(count) => {
                self.log_load(table, count as i64, "SUCCESS", None);
                info!(table, count, "raw load complete");
                Ok(count)
            }
            Err(e) => {
                error!(table, error = %e, "raw load failed");
                self.log_load(table, 0, "FAILED", Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Most recent audit rows, newest first.
    pub async fn load_history(&self, limit: usize) -> Result<DataFrame> {
        self.warehouse
            .sql(&format!(
                "SELECT table_name, load_timestamp, records_loaded, load_status, error_message \
                 FROM raw.load_metadata ORDER BY load_timestamp DESC LIMIT {}",
                limit
            ))
            .await
    }

    // Audit logging never swallows a load error, and a failure to write
    // the audit row itself is reported as a warning only.
    fn log_load(&self, table: &str, records: i64, status: &str, error: Option<String>) {
        if let Err(e) = self.try_log_load(table, records, status, error) {
            warn!(table, error = %e, "could not record load audit row");
        }
    }

    fn try_log_load(
        &self,
        table: &str,
        records: i64,
        status: &str,
        error: Option<String>,
    ) -> Result<()> {
        let schema = load_metadata_schema();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![table])),
                Arc::new(TimestampMicrosecondArray::from(vec![
                    Utc::now().timestamp_micros(),
                ])),
                Arc::new(Int64Array::from(vec![records])),
                Arc::new(StringArray::from(vec![status])),
                Arc::new(StringArray::from(vec![error.as_deref()])),
            ],
        )?;
        self.warehouse
            .write_table(RAW, LOAD_METADATA, schema, vec![batch], WriteMode::Append)?;
        Ok(())
    }
}
