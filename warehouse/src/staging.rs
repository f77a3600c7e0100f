use std::sync::Arc;

use arrow::array::{Array, Int64Array};
use arrow::record_batch::RecordBatch;
use common::{Error, Result};
use tracing::{info, warn};

use crate::core::{RAW, STAGING, Warehouse, WriteMode, collect_with_schema};
use crate::tables::{STATES, states_table};

/// Slice of the MCOICOP dictionary kept downstream: 2-digit divisions,
/// renamed into the staging convention.
const CATEGORIES_SQL: &str = "\
SELECT
    division,
    desc_en AS category_name_en,
    desc_bm AS category_name_bm,
    digits AS category_level
FROM raw.categories
WHERE digits = 2";

// The reserved 'overall' division matches no dictionary entry on purpose
// and resolves to the 'Overall' label; category_matched records whether
// the join actually hit, so a data-quality miss stays distinguishable
// from the sentinel. Ordering is for deterministic output only.
const CPI_MONTHLY_SQL: &str = "\
SELECT
    c.state,
    c.date,
    c.division,
    COALESCE(cat.desc_en, 'Overall') AS category_name,
    cat.division IS NOT NULL AS category_matched,
    c.\"index\" AS index_value
FROM raw.cpi_data c
LEFT JOIN raw.categories cat
    ON c.division = cat.division
    AND cat.digits = 2
ORDER BY c.date, c.state, c.division";

const QUALITY_SQL: &str = "\
SELECT
    SUM(CASE WHEN state IS NULL THEN 1 ELSE 0 END) AS null_state,
    SUM(CASE WHEN date IS NULL THEN 1 ELSE 0 END) AS null_date,
    SUM(CASE WHEN index_value IS NULL THEN 1 ELSE 0 END) AS null_index,
    SUM(CASE WHEN NOT category_matched AND division <> 'overall' THEN 1 ELSE 0 END) AS unmatched_division
FROM staging.cpi_monthly";

#[derive(Debug, Clone, Copy)]
pub struct StagingSummary {
    pub categories: usize,
    pub states: usize,
    pub cpi_rows: usize,
}

/// Transforms raw tables to the staging layer.
pub struct StagingTransformer {
    warehouse: Arc<Warehouse>,
}

impl StagingTransformer {
    pub fn new(warehouse: Arc<Warehouse>) -> Self {
        Self { warehouse }
    }

    pub async fn run_all(&self) -> Result<StagingSummary> {
        info!("starting staging transformation");

        let categories = self.transform_categories().await?;
        let states = self.seed_states()?;
        let cpi_rows = self.transform_cpi_monthly().await?;
        self.validate_staging().await?;

        info!(categories, states, cpi_rows, "staging transformation complete");
        Ok(StagingSummary {
            categories,
            states,
            cpi_rows,
        })
    }

    async fn transform_categories(&self) -> Result<usize> {
        info!("transforming categories");
        let df = self.warehouse.sql(CATEGORIES_SQL).await?;
        let (schema, batches) = collect_with_schema(df).await?;
        let count =
            self.warehouse
                .write_table(STAGING, "categories", schema, batches, WriteMode::Replace)?;
        info!(count, "loaded categories to staging");
        Ok(count)
    }

    fn seed_states(&self) -> Result<usize> {
        let (schema, batches) = states_table()?;
        self.warehouse
            .write_table(STAGING, STATES, schema, batches, WriteMode::Replace)
    }

    async fn transform_cpi_monthly(&self) -> Result<usize> {
        info!("transforming CPI monthly data");
        let df = self.warehouse.sql(CPI_MONTHLY_SQL).await?;
        let (schema, batches) = collect_with_schema(df).await?;
        let count = self.warehouse.write_table(
            STAGING,
            "cpi_monthly",
            schema,
            batches,
            WriteMode::Replace,
        )?;
        info!(count, "loaded records to staging.cpi_monthly");
        Ok(count)
    }

    /// Data-quality checks: degradations are reported, never fatal.
    async fn validate_staging(&self) -> Result<()> {
        info!("validating staging data");

        let raw_count = self.warehouse.table_count(RAW, "cpi_data").await?;
        let staging_count = self.warehouse.table_count(STAGING, "cpi_monthly").await?;
        if raw_count != staging_count {
            warn!(
                raw = raw_count,
                staging = staging_count,
                "row count mismatch between raw and staging"
            );
        } else {
            info!(rows = staging_count, "row counts match");
        }

        let df = self.warehouse.sql(QUALITY_SQL).await?;
        let batches = df.collect().await?;
        let null_state = scalar_i64(&batches, "null_state")?;
        let null_date = scalar_i64(&batches, "null_date")?;
        let null_index = scalar_i64(&batches, "null_index")?;
        let unmatched = scalar_i64(&batches, "unmatched_division")?;

        if null_state + null_date + null_index > 0 {
            warn!(null_state, null_date, null_index, "nulls in critical columns");
        } else {
            info!("no nulls in critical columns");
        }
        if unmatched > 0 {
            warn!(
                rows = unmatched,
                "divisions without a dictionary match fell back to the 'Overall' label"
            );
        }

        Ok(())
    }
}

fn scalar_i64(batches: &[RecordBatch], column: &str) -> Result<i64> {
    let batch = batches
        .first()
        .ok_or_else(|| Error::Other(format!("no result row for {}", column)))?;
    let array = batch
        .column_by_name(column)
        .ok_or_else(|| Error::Other(format!("missing column {}", column)))?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| Error::Other(format!("unexpected type for {}", column)))?;
    if array.is_null(0) {
        Ok(0)
    } else {
        Ok(array.value(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{categories_fixture, cpi_fixture, day};
    use arrow::array::{BooleanArray, StringArray};
    use tempfile::TempDir;

    async fn fixture_warehouse() -> (TempDir, Arc<Warehouse>) {
        let dir = TempDir::new().unwrap();
        let warehouse = Arc::new(Warehouse::open(dir.path()).unwrap());

        let (schema, batches) = cpi_fixture(&[
            ("Selangor", day(2024, 1), "overall", 100.0),
            ("Selangor", day(2024, 1), "01", 105.0),
            ("Selangor", day(2024, 1), "13", 99.0),
            ("Johor", day(2024, 1), "overall", 98.0),
        ]);
        warehouse
            .write_table(RAW, "cpi_data", schema, batches, WriteMode::Replace)
            .unwrap();

        let (schema, batches) = categories_fixture(&[
            ("01", "Food & Beverages", "Makanan & Minuman", 2),
            ("011", "Food", "Makanan", 3),
            ("04", "Housing & Utilities", "Perumahan & Utiliti", 2),
        ]);
        warehouse
            .write_table(RAW, "categories", schema, batches, WriteMode::Replace)
            .unwrap();

        (dir, warehouse)
    }

    #[tokio::test]
    async fn categories_are_filtered_to_two_digits() {
        let (_dir, warehouse) = fixture_warehouse().await;
        let summary = StagingTransformer::new(Arc::clone(&warehouse))
            .run_all()
            .await
            .unwrap();

        assert_eq!(summary.categories, 2);
        let df = warehouse
            .sql("SELECT division FROM staging.categories ORDER BY division")
            .await
            .unwrap();
        let batches = df.collect().await.unwrap();
        let divisions = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(divisions.value(0), "01");
        assert_eq!(divisions.value(1), "04");
    }

    #[tokio::test]
    async fn row_count_is_conserved_from_raw() {
        let (_dir, warehouse) = fixture_warehouse().await;
        let summary = StagingTransformer::new(Arc::clone(&warehouse))
            .run_all()
            .await
            .unwrap();

        let raw = warehouse.table_count(RAW, "cpi_data").await.unwrap();
        assert_eq!(summary.cpi_rows, raw);
    }

    #[tokio::test]
    async fn join_misses_keep_overall_label_but_are_flagged() {
        let (_dir, warehouse) = fixture_warehouse().await;
        StagingTransformer::new(Arc::clone(&warehouse))
            .run_all()
            .await
            .unwrap();

        let df = warehouse
            .sql(
                "SELECT division, category_name, category_matched \
                 FROM staging.cpi_monthly WHERE state = 'Selangor' ORDER BY division",
            )
            .await
            .unwrap();
        let batches = df.collect().await.unwrap();
        let batch = &batches[0];
        let divisions = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        let names = batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        let matched = batch
            .column(2)
            .as_any()
            .downcast_ref::<BooleanArray>()
            .unwrap();

        // '01' joins the dictionary
        assert_eq!(divisions.value(0), "01");
        assert_eq!(names.value(0), "Food & Beverages");
        assert!(matched.value(0));
        // '13' has no 2-digit entry: label falls back, flag records the miss
        assert_eq!(divisions.value(1), "13");
        assert_eq!(names.value(1), "Overall");
        assert!(!matched.value(1));
        // the reserved sentinel also carries the label, unflagged as a miss
        assert_eq!(divisions.value(2), "overall");
        assert_eq!(names.value(2), "Overall");
        assert!(!matched.value(2));
    }

    #[tokio::test]
    async fn states_dimension_is_seeded() {
        let (_dir, warehouse) = fixture_warehouse().await;
        let summary = StagingTransformer::new(Arc::clone(&warehouse))
            .run_all()
            .await
            .unwrap();

        assert_eq!(summary.states, crate::tables::STATE_REGIONS.len());
        let df = warehouse
            .sql("SELECT region FROM staging.states WHERE state_name = 'Selangor'")
            .await
            .unwrap();
        let batches = df.collect().await.unwrap();
        let regions = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(regions.value(0), "Central");
    }
}
