use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::RecordBatch;
use common::Result;
use common::config::Settings;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;
use warehouse::staging::StagingSummary;
use warehouse::mart::MartSummary;
use warehouse::{MartTransformer, RawLoader, StagingTransformer, Warehouse, WriteMode};

use crate::backup::{BackupReport, BackupUploader};
use crate::client::{Granularity, StatsClient};
use crate::extractor::{CpiExtractor, read_snapshot};
use crate::storage::{ObjectStorage, S3Storage};

pub const CPI_SNAPSHOT: &str = "cpi_latest.parquet";
pub const CATEGORIES_SNAPSHOT: &str = "categories.parquet";

#[derive(Debug)]
pub struct PipelineReport {
    pub cpi_rows: usize,
    pub category_rows: usize,
    pub staging: StagingSummary,
    pub mart: MartSummary,
    pub backup: BackupReport,
}

/// Runs the full daily pipeline: extract both source branches, load raw,
/// transform staging and mart, back up the snapshots. Each stage gets the
/// configured bounded retry with a fixed delay; re-running a whole stage
/// is safe because every warehouse write is a full replace.
pub async fn run_pipeline(settings: &Settings) -> Result<PipelineReport> {
    let run_id = Uuid::new_v4();
    let retries = settings.pipeline.retries;
    let delay = Duration::from_secs(settings.pipeline.retry_delay_secs);
    info!(%run_id, "starting CPI pipeline");

    let raw_dir = PathBuf::from(&settings.paths.raw_data_dir);
    let cpi_path = raw_dir.join(CPI_SNAPSHOT);
    let categories_path = raw_dir.join(CATEGORIES_SNAPSHOT);
    let granularity: Granularity = settings.source.granularity.parse()?;

    let client = StatsClient::new(&settings.source.base_url)?;
    let extractor = CpiExtractor::new(client);
    let warehouse = Arc::new(Warehouse::open(&settings.paths.warehouse_dir)?);

    info!("step 1: extracting source data");
    let (cpi_rows, category_rows) = run_stage("extract", retries, delay, || async {
        let (observations, categories) = tokio::join!(
            extractor.extract_observations(granularity, Some(&cpi_path)),
            extractor.extract_categories(Some(&categories_path)),
        );
        Ok((row_total(&observations?), row_total(&categories?)))
    })
    .await?;
    info!(cpi_rows, category_rows, "extraction complete");

    info!("step 2: loading raw tables");
    let loader = RawLoader::new(Arc::clone(&warehouse));
    run_stage("load", retries, delay, || async {
        let observations = read_snapshot(&cpi_path)?;
        loader.load(observations, "cpi_data", WriteMode::Replace)?;
        let categories = read_snapshot(&categories_path)?;
        loader.load(categories, "categories", WriteMode::Replace)?;
        Ok(())
    })
    .await?;

    info!("step 3: staging transformation");
    let staging_transformer = StagingTransformer::new(Arc::clone(&warehouse));
    let staging = run_stage("staging", retries, delay, || staging_transformer.run_all()).await?;

    info!("step 4: mart transformation");
    let mart_transformer = MartTransformer::new(Arc::clone(&warehouse));
    let mart = run_stage("mart", retries, delay, || mart_transformer.run_all()).await?;

    info!("step 5: backing up raw snapshots");
    let storage: Arc<dyn ObjectStorage> = Arc::new(S3Storage::new(&settings.s3));
    let uploader = BackupUploader::new(storage, &raw_dir);
    let backup = uploader.upload_data_backup(None).await;

    info!(
        %run_id,
        cpi_rows,
        category_rows,
        mart_rows = mart.inflation_by_state + mart.inflation_by_category + mart.state_comparison,
        uploaded = backup.uploaded.len(),
        "pipeline completed successfully"
    );

    Ok(PipelineReport {
        cpi_rows,
        category_rows,
        staging,
        mart,
        backup,
    })
}

/// Whole-stage bounded retry; components below this level never retry on
/// their own.
async fn run_stage<T, F, Fut>(name: &str, retries: u32, delay: Duration, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut remaining = retries;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if remaining > 0 => {
                remaining -= 1;
                warn!(
                    stage = name,
                    error = %e,
                    delay_secs = delay.as_secs(),
                    remaining,
                    "stage failed, retrying"
                );
                sleep(delay).await;
            }
            Err(e) => {
                error!(stage = name, error = %e, "stage failed");
                return Err(e);
            }
        }
    }
}

fn row_total(batches: &[RecordBatch]) -> usize {
    batches.iter().map(|b| b.num_rows()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn stage_retries_until_success() {
        let attempts = AtomicU32::new(0);
        let value = run_stage("test", 2, Duration::from_millis(1), || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Other("transient".to_string()))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stage_gives_up_after_bounded_retries() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = run_stage("test", 2, Duration::from_millis(1), || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Other("persistent".to_string()))
        })
        .await;

        assert!(result.is_err());
        // the first attempt plus two retries
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
