use std::sync::Arc;

use common::Result;
use tracing::{error, info};

use crate::core::{MART, Warehouse, collect_with_schema};

/// State-level inflation: the 'overall' series per state, compared against
/// itself 1 and 12 periods earlier. yoy_change doubles as the headline
/// inflation_rate.
const INFLATION_BY_STATE_SQL: &str = "\
WITH cpi_with_lag AS (
    SELECT
        state,
        date,
        index_value,
        LAG(index_value, 1) OVER (PARTITION BY state ORDER BY date) AS prev_month_index,
        LAG(index_value, 12) OVER (PARTITION BY state ORDER BY date) AS prev_year_index
    FROM staging.cpi_monthly
    WHERE division = 'overall'
)
SELECT
    state,
    date,
    index_value,
    CASE
        WHEN prev_month_index IS NOT NULL
        THEN ((index_value / prev_month_index) - 1) * 100
        ELSE NULL
    END AS mom_change,
    CASE
        WHEN prev_year_index IS NOT NULL
        THEN ((index_value / prev_year_index) - 1) * 100
        ELSE NULL
    END AS yoy_change,
    CASE
        WHEN prev_year_index IS NOT NULL
        THEN ((index_value / prev_year_index) - 1) * 100
        ELSE NULL
    END AS inflation_rate
FROM cpi_with_lag
ORDER BY state, date";

/// Category-level inflation: the state dimension is collapsed into a
/// national mean per (date, division, category) first, then the same lag
/// comparison runs partitioned by division (divisions and category names
/// are 1:1 in this dataset).
const INFLATION_BY_CATEGORY_SQL: &str = "\
WITH category_avg AS (
    SELECT
        date,
        division,
        category_name,
        AVG(index_value) AS avg_index
    FROM staging.cpi_monthly
    WHERE division <> 'overall'
    GROUP BY date, division, category_name
),
category_with_lag AS (
    SELECT
        date,
        division,
        category_name,
        avg_index,
        LAG(avg_index, 1) OVER (PARTITION BY division ORDER BY date) AS prev_month_index,
        LAG(avg_index, 12) OVER (PARTITION BY division ORDER BY date) AS prev_year_index
    FROM category_avg
)
SELECT
    date,
    division,
    category_name,
    avg_index,
    CASE
        WHEN prev_month_index IS NOT NULL
        THEN ((avg_index / prev_month_index) - 1) * 100
        ELSE NULL
    END AS mom_change,
    CASE
        WHEN prev_year_index IS NOT NULL
        THEN ((avg_index / prev_year_index) - 1) * 100
        ELSE NULL
    END AS yoy_change
FROM category_with_lag
ORDER BY date, division";

/// Cross-sectional snapshot of the most recent month: headline divisions
/// pivoted per state, ranked by overall CPI (ties share a rank), priced
/// against the cheapest state in the same snapshot.
const STATE_COMPARISON_SQL: &str = "\
WITH latest_date AS (
    SELECT MAX(date) AS max_date
    FROM staging.cpi_monthly
),
latest_data AS (
    SELECT
        c.state,
        c.date,
        c.division,
        c.index_value
    FROM staging.cpi_monthly c
    CROSS JOIN latest_date ld
    WHERE c.date = ld.max_date
),
pivoted AS (
    SELECT
        state,
        date AS latest_date,
        MAX(CASE WHEN division = 'overall' THEN index_value END) AS overall_cpi,
        MAX(CASE WHEN division = '01' THEN index_value END) AS food_cpi,
        MAX(CASE WHEN division = '04' THEN index_value END) AS housing_cpi,
        MAX(CASE WHEN division = '07' THEN index_value END) AS transport_cpi
    FROM latest_data
    GROUP BY state, date
),
with_ranks AS (
    SELECT
        p.*,
        CAST(RANK() OVER (ORDER BY p.overall_cpi DESC) AS BIGINT) AS rank_overall,
        s.region
    FROM pivoted p
    LEFT JOIN staging.states s ON p.state = s.state_name
),
cheapest AS (
    SELECT MIN(overall_cpi) AS min_cpi FROM with_ranks
)
SELECT
    wr.state,
    wr.latest_date,
    wr.overall_cpi,
    wr.food_cpi,
    wr.housing_cpi,
    wr.transport_cpi,
    wr.rank_overall,
    wr.region,
    ((wr.overall_cpi / ch.min_cpi) - 1) * 100 AS pct_vs_cheapest
FROM with_ranks wr
CROSS JOIN cheapest ch
ORDER BY wr.overall_cpi DESC";

#[derive(Debug, Clone, Copy)]
pub struct MartSummary {
    pub inflation_by_state: usize,
    pub inflation_by_category: usize,
    pub state_comparison: usize,
}

/// Builds the mart layer with business metrics.
pub struct MartTransformer {
    warehouse: Arc<Warehouse>,
}

impl MartTransformer {
    pub fn new(warehouse: Arc<Warehouse>) -> Self {
        Self { warehouse }
    }

    /// Runs the three derivations. All results are computed before any
    /// table is replaced, so the mart tables always reflect one staging
    /// snapshot; a failing derivation leaves the previous mart intact.
    pub async fn run_all(&self) -> Result<MartSummary> {
        info!("starting mart transformation");

        let derivations = [
            ("inflation_by_state", INFLATION_BY_STATE_SQL),
            ("inflation_by_category", INFLATION_BY_CATEGORY_SQL),
            ("state_comparison", STATE_COMPARISON_SQL),
        ];

        let mut staged = Vec::with_capacity(derivations.len());
        for (table, sql) in derivations {
            info!(table, "building mart table");
            let df = match self.warehouse.sql(sql).await {
                Ok(df) => df,
                Err(e) => {
                    error!(table, error = %e, "mart derivation failed");
                    return Err(e);
                }
            };
            let (schema, batches) = collect_with_schema(df).await?;
            staged.push((table.to_string(), schema, batches));
        }

        let counts = self.warehouse.write_tables_atomic(MART, staged)?;
        let summary = MartSummary {
            inflation_by_state: counts[0],
            inflation_by_category: counts[1],
            state_comparison: counts[2],
        };
        info!(
            inflation_by_state = summary.inflation_by_state,
            inflation_by_category = summary.inflation_by_category,
            state_comparison = summary.state_comparison,
            "mart transformation complete"
        );
        Ok(summary)
    }
}
