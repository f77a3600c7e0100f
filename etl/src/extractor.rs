use std::collections::HashSet;
use std::fs;
use std::path::Path;

use arrow::array::{Array, Date32Array, RecordBatch};
use arrow::temporal_conversions::date32_to_datetime;
use arrow::util::display::array_value_to_string;
use chrono::NaiveDate;
use common::{Error, Result};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::{info, warn};

use crate::client::{Granularity, StatsClient};

const REQUIRED_COLUMNS: &[&str] = &["state", "date", "division", "index"];

/// Extracts and validates CPI data ahead of the warehouse load.
pub struct CpiExtractor {
    client: StatsClient,
}

impl CpiExtractor {
    pub fn new(client: StatsClient) -> Self {
        Self { client }
    }

    /// Fetches the observation extract, validates it, and optionally
    /// persists the validated snapshot to `persist_to`.
    pub async fn extract_observations(
        &self,
        granularity: Granularity,
        persist_to: Option<&Path>,
    ) -> Result<Vec<RecordBatch>> {
        info!(%granularity, "starting full CPI extraction");
        let batches = self.client.fetch_observations(granularity).await?;
        validate_observations(&batches)?;
        if let Some(path) = persist_to {
            write_snapshot(path, &batches)?;
            info!(path = %path.display(), "snapshot saved");
        }
        Ok(batches)
    }

    /// Fetches the category dictionary; persisted verbatim, no schema
    /// checks on this side extract.
    pub async fn extract_categories(&self, persist_to: Option<&Path>) -> Result<Vec<RecordBatch>> {
        let batches = self.client.fetch_categories().await?;
        if let Some(path) = persist_to {
            write_snapshot(path, &batches)?;
            info!(path = %path.display(), "snapshot saved");
        }
        Ok(batches)
    }
}

/// A structurally missing column is fatal; partial nulls and the summary
/// statistics are diagnostics only.
fn validate_observations(batches: &[RecordBatch]) -> Result<()> {
    let schema = batches
        .first()
        .map(|b| b.schema())
        .ok_or_else(|| Error::SchemaValidation("source returned no data".to_string()))?;

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| schema.field_with_name(column).is_err())
        .collect();
    if !missing.is_empty() {
        return Err(Error::SchemaValidation(format!(
            "missing columns: {}",
            missing.join(", ")
        )));
    }

    for column in REQUIRED_COLUMNS {
        let nulls = null_count(batches, column)?;
        if nulls > 0 {
            warn!(column, nulls, "nulls present in required column");
        }
    }

    if let Some((min, max)) = date_range(batches)? {
        info!(%min, %max, "date range");
    }
    let states = distinct_count(batches, "state")?;
    let divisions = distinct_count(batches, "division")?;
    let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
    info!(states, divisions, rows, "validation passed");

    Ok(())
}

pub fn write_snapshot(path: &Path, batches: &[RecordBatch]) -> Result<()> {
    let schema = batches
        .first()
        .map(|b| b.schema())
        .ok_or_else(|| Error::InvalidInput("cannot persist an empty snapshot".to_string()))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.close()?;
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(batches)
}

fn null_count(batches: &[RecordBatch], column: &str) -> Result<usize> {
    let mut nulls = 0;
    for batch in batches {
        let index = batch.schema().index_of(column)?;
        nulls += batch.column(index).null_count();
    }
    Ok(nulls)
}

fn date_range(batches: &[RecordBatch]) -> Result<Option<(NaiveDate, NaiveDate)>> {
    let mut range: Option<(i32, i32)> = None;
    for batch in batches {
        let index = batch.schema().index_of("date")?;
        let Some(dates) = batch.column(index).as_any().downcast_ref::<Date32Array>() else {
            return Ok(None);
        };
        for i in 0..dates.len() {
            if dates.is_null(i) {
                continue;
            }
            let value = dates.value(i);
            range = Some(match range {
                Some((min, max)) => (min.min(value), max.max(value)),
                None => (value, value),
            });
        }
    }
    Ok(range.and_then(|(min, max)| {
        let min = date32_to_datetime(min)?.date();
        let max = date32_to_datetime(max)?.date();
        Some((min, max))
    }))
}

fn distinct_count(batches: &[RecordBatch], column: &str) -> Result<usize> {
    let mut seen = HashSet::new();
    for batch in batches {
        let index = batch.schema().index_of(column)?;
        let array = batch.column(index);
        for i in 0..array.len() {
            if array.is_null(i) {
                continue;
            }
            seen.insert(array_value_to_string(array, i)?);
        }
    }
    Ok(seen.len())
}
