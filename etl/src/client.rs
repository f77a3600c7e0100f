use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use common::{Error, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::info;
use url::Url;

/// Digit depth of the MCOICOP classification, coarsest to finest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    TwoDigit,
    ThreeDigit,
    FourDigit,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::TwoDigit => "2d",
            Granularity::ThreeDigit => "3d",
            Granularity::FourDigit => "4d",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "2d" => Ok(Granularity::TwoDigit),
            "3d" => Ok(Granularity::ThreeDigit),
            "4d" => Ok(Granularity::FourDigit),
            other => Err(Error::InvalidInput(format!(
                "unknown granularity '{}', expected 2d, 3d or 4d",
                other
            ))),
        }
    }
}

/// Client for the national statistics agency's open storage.
pub struct StatsClient {
    http: rquest::Client,
    base_url: Url,
}

impl StatsClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: rquest::Client::new(),
            base_url: Url::parse(base_url)?,
        })
    }

    /// Fetches the CPI-by-state extract at the requested digit depth.
    pub async fn fetch_observations(&self, granularity: Granularity) -> Result<Vec<RecordBatch>> {
        let path = format!("cpi/cpi_{}_state.parquet", granularity.as_str());
        let batches = self.fetch_parquet(&path).await?;
        let batches = normalize_observations(batches)?;
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        info!(rows, %granularity, "fetched CPI observations");
        Ok(batches)
    }

    /// Fetches the MCOICOP category dictionary.
    pub async fn fetch_categories(&self) -> Result<Vec<RecordBatch>> {
        let batches = self.fetch_parquet("dictionaries/mcoicop.parquet").await?;
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        info!(rows, "fetched categories");
        Ok(batches)
    }

    async fn fetch_parquet(&self, path: &str) -> Result<Vec<RecordBatch>> {
        let url = self.base_url.join(path)?;
        info!(%url, "fetching");
        let response = self
            .http
            .get(url.as_str())
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(batches)
    }
}

/// The source serves `date` as a plain string in some drops and `index`
/// occasionally as decimal; downstream always sees Date32 and Float64.
fn normalize_observations(batches: Vec<RecordBatch>) -> Result<Vec<RecordBatch>> {
    batches.into_iter().map(normalize_batch).collect()
}

fn normalize_batch(batch: RecordBatch) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(batch.num_columns());
    let mut columns = Vec::with_capacity(batch.num_columns());
    for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
        let target = match field.name().as_str() {
            "date" => Some(DataType::Date32),
            "index" => Some(DataType::Float64),
            _ => None,
        };
        match target {
            Some(data_type) if field.data_type() != &data_type => {
                columns.push(cast(column, &data_type)?);
                fields.push(Field::new(field.name(), data_type, field.is_nullable()));
            }
            _ => {
                columns.push(column.clone());
                fields.push(field.as_ref().clone());
            }
        }
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).map_err(Into::into)
}
