use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use common::Result;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::storage::ObjectStorage;

/// Copies the local raw snapshots to object storage under a
/// date-partitioned key layout.
pub struct BackupUploader {
    storage: Arc<dyn ObjectStorage>,
    raw_data_dir: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct BackupReport {
    pub date: String,
    pub uploaded: Vec<String>,
    pub failed: Vec<String>,
}

impl BackupUploader {
    pub fn new(storage: Arc<dyn ObjectStorage>, raw_data_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            raw_data_dir: raw_data_dir.into(),
        }
    }

    /// Best-effort per-file upload of the raw snapshot pair. A missing
    /// local file is recorded under `failed` without touching the network;
    /// an upload failure is isolated to its file. Defaults to today's
    /// partition.
    pub async fn upload_data_backup(&self, date_partition: Option<NaiveDate>) -> BackupReport {
        let date = date_partition
            .unwrap_or_else(|| Utc::now().date_naive())
            .format("%Y-%m-%d")
            .to_string();
        info!(date = %date, bucket = self.storage.bucket(), "starting raw data backup");

        let files = [
            (
                "cpi_latest.parquet",
                format!("raw/cpi/date={}/cpi_data.parquet", date),
            ),
            (
                "categories.parquet",
                format!("raw/categories/date={}/categories.parquet", date),
            ),
        ];

        let mut report = BackupReport {
            date,
            uploaded: Vec::new(),
            failed: Vec::new(),
        };

        for (file_name, key) in files {
            let local_path = self.raw_data_dir.join(file_name);
            if !local_path.exists() {
                warn!(path = %local_path.display(), "file not found, skipping upload");
                report.failed.push(local_path.display().to_string());
                continue;
            }

            match self.upload_file(&local_path, &key).await {
                Ok(()) => report.uploaded.push(key),
                Err(e) => {
                    error!(path = %local_path.display(), error = %e, "upload failed");
                    report.failed.push(local_path.display().to_string());
                }
            }
        }

        info!(
            uploaded = report.uploaded.len(),
            failed = report.failed.len(),
            "backup summary"
        );
        for key in &report.uploaded {
            info!(bucket = self.storage.bucket(), key = %key, "uploaded");
        }

        report
    }

    async fn upload_file(&self, local_path: &Path, key: &str) -> Result<()> {
        info!(path = %local_path.display(), key, "uploading");
        let data = fs::read(local_path)?;
        self.storage.put_object(key, &data).await
    }
}
