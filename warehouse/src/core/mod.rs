use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use common::{Error, Result};
use datafusion::catalog::SchemaProvider;
use datafusion::catalog::memory::MemorySchemaProvider;
use datafusion::dataframe::DataFrame;
use datafusion::datasource::MemTable;
use datafusion::execution::context::SessionContext;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::debug;

pub const RAW: &str = "raw";
pub const STAGING: &str = "staging";
pub const MART: &str = "mart";

const DEFAULT_CATALOG: &str = "datafusion";

// Batches are re-chunked to this many rows before hitting the parquet
// writer; a throughput/memory knob, not a correctness boundary.
const WRITE_CHUNK_ROWS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Replace,
    Append,
    ErrorIfExists,
}

/// Embedded analytical warehouse: one shared SessionContext carrying the
/// raw, staging and mart schemas, each backed by parquet files under a
/// per-schema subdirectory of the warehouse root. A single `Warehouse` is
/// opened per pipeline run and injected into the loader and transformers.
pub struct Warehouse {
    ctx: SessionContext,
    root: PathBuf,
}

impl Warehouse {
    /// Opens (creating if necessary) a warehouse at `root` and re-registers
    /// any tables already on disk, so audit history and derived tables
    /// survive process restarts.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let ctx = SessionContext::new();
        let catalog = ctx
            .catalog(DEFAULT_CATALOG)
            .ok_or_else(|| Error::Other("default catalog missing from session".to_string()))?;

        for schema_name in [RAW, STAGING, MART] {
            fs::create_dir_all(root.join(schema_name))?;
            catalog.register_schema(schema_name, Arc::new(MemorySchemaProvider::new()))?;
        }

        let warehouse = Self { ctx, root };
        warehouse.register_existing()?;
        Ok(warehouse)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // Execute SQL against the registered tables
    pub async fn sql(&self, query: &str) -> Result<DataFrame> {
        self.ctx.sql(query).await.map_err(|e| e.into())
    }

    pub async fn table_count(&self, schema_name: &str, table: &str) -> Result<usize> {
        let df = self.ctx.table(format!("{}.{}", schema_name, table)).await?;
        Ok(df.count().await?)
    }

    /// Full write of one table: the parquet file is staged next to its
    /// final location and renamed into place, then the in-session table
    /// registration is refreshed.
    pub fn write_table(
        &self,
        schema_name: &str,
        table: &str,
        schema: SchemaRef,
        mut batches: Vec<RecordBatch>,
        mode: WriteMode,
    ) -> Result<usize> {
        let path = self.table_path(schema_name, table);
        match mode {
            WriteMode::ErrorIfExists if path.exists() => {
                return Err(Error::Storage(format!(
                    "table {}.{} already exists",
                    schema_name, table
                )));
            }
            WriteMode::Append if path.exists() => {
                let mut combined = read_parquet_table(&path)?;
                combined.append(&mut batches);
                batches = combined;
            }
            _ => {}
        }

        let staged = self.stage_table_file(schema_name, table, &schema, &batches)?;
        fs::rename(&staged, &path)?;

        let rows = batches.iter().map(|b| b.num_rows()).sum();
        self.register(schema_name, table, schema, batches)?;
        debug!(schema = schema_name, table, rows, "table written");
        Ok(rows)
    }

    /// Replaces several tables of one schema as a unit: every parquet file
    /// is staged before any is renamed into place, so the tables always
    /// reflect the same input snapshot even if a derivation upstream of a
    /// later table had failed.
    pub fn write_tables_atomic(
        &self,
        schema_name: &str,
        tables: Vec<(String, SchemaRef, Vec<RecordBatch>)>,
    ) -> Result<Vec<usize>> {
        let mut staged = Vec::with_capacity(tables.len());
        for (table, schema, batches) in &tables {
            match self.stage_table_file(schema_name, table, schema, batches) {
                Ok(path) => staged.push(path),
                Err(e) => {
                    for path in staged {
                        let _ = fs::remove_file(path);
                    }
                    return Err(e);
                }
            }
        }

        let mut counts = Vec::with_capacity(tables.len());
        for ((table, schema, batches), tmp) in tables.into_iter().zip(staged) {
            fs::rename(&tmp, self.table_path(schema_name, &table))?;
            counts.push(batches.iter().map(|b| b.num_rows()).sum());
            self.register(schema_name, &table, schema, batches)?;
        }
        Ok(counts)
    }

    fn table_path(&self, schema_name: &str, table: &str) -> PathBuf {
        self.root
            .join(schema_name)
            .join(format!("{}.parquet", table))
    }

    fn stage_table_file(
        &self,
        schema_name: &str,
        table: &str,
        schema: &SchemaRef,
        batches: &[RecordBatch],
    ) -> Result<PathBuf> {
        let tmp = self
            .root
            .join(schema_name)
            .join(format!("{}.parquet.tmp", table));
        let file = fs::File::create(&tmp)?;
        let mut writer = ArrowWriter::try_new(file, schema.clone(), None)?;
        for chunk in rechunk(schema, batches, WRITE_CHUNK_ROWS)? {
            writer.write(&chunk)?;
        }
        writer.close()?;
        Ok(tmp)
    }

    fn register(
        &self,
        schema_name: &str,
        table: &str,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<()> {
        let provider = self.schema_provider(schema_name)?;
        let _ = provider.deregister_table(table)?;
        let mem_table = MemTable::try_new(schema, vec![batches])?;
        provider.register_table(table.to_string(), Arc::new(mem_table))?;
        Ok(())
    }

    fn schema_provider(&self, schema_name: &str) -> Result<Arc<dyn SchemaProvider>> {
        self.ctx
            .catalog(DEFAULT_CATALOG)
            .and_then(|catalog| catalog.schema(schema_name))
            .ok_or_else(|| {
                Error::InvalidInput(format!("unknown warehouse schema: {}", schema_name))
            })
    }

    fn register_existing(&self) -> Result<()> {
        for schema_name in [RAW, STAGING, MART] {
            let dir = self.root.join(schema_name);
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                    continue;
                }
                let Some(table) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let batches = read_parquet_table(&path)?;
                let Some(schema) = batches.first().map(|b| b.schema()) else {
                    continue;
                };
                debug!(schema = schema_name, table, "re-registering table from disk");
                self.register(schema_name, table, schema, batches)?;
            }
        }
        Ok(())
    }
}

/// Collects a dataframe into batches together with its output schema,
/// falling back to the plan schema when the result is empty.
pub async fn collect_with_schema(df: DataFrame) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let plan_schema: Schema = df.schema().into();
    let batches = df.collect().await?;
    let schema = batches
        .first()
        .map(|b| b.schema())
        .unwrap_or_else(|| Arc::new(plan_schema));
    Ok((schema, batches))
}

pub fn read_parquet_table(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(batches)
}

fn rechunk(schema: &SchemaRef, batches: &[RecordBatch], rows: usize) -> Result<Vec<RecordBatch>> {
    if batches.is_empty() {
        return Ok(Vec::new());
    }
    let combined = concat_batches(schema, batches)?;
    let mut chunks = Vec::new();
    let mut offset = 0;
    while offset < combined.num_rows() {
        let len = rows.min(combined.num_rows() - offset);
        chunks.push(combined.slice(offset, len));
        offset += len;
    }
    Ok(chunks)
}
