use std::sync::Arc;

use arrow::array::StringArray;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use common::Result;

pub const LOAD_METADATA: &str = "load_metadata";
pub const STATES: &str = "states";

/// Schema of the append-only load audit table, `raw.load_metadata`.
pub fn load_metadata_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("table_name", DataType::Utf8, false),
        Field::new(
            "load_timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, None),
            false,
        ),
        Field::new("records_loaded", DataType::Int64, false),
        Field::new("load_status", DataType::Utf8, false),
        Field::new("error_message", DataType::Utf8, true),
    ]))
}

// Seed content for staging.states; state names as published in the
// source CPI extracts.
pub const STATE_REGIONS: &[(&str, &str)] = &[
    ("Johor", "Southern"),
    ("Kedah", "Northern"),
    ("Kelantan", "East Coast"),
    ("Melaka", "Southern"),
    ("Negeri Sembilan", "Southern"),
    ("Pahang", "East Coast"),
    ("Perak", "Northern"),
    ("Perlis", "Northern"),
    ("Pulau Pinang", "Northern"),
    ("Sabah", "Borneo"),
    ("Sarawak", "Borneo"),
    ("Selangor", "Central"),
    ("Terengganu", "East Coast"),
    ("W.P. Kuala Lumpur", "Central"),
    ("W.P. Labuan", "Borneo"),
    ("W.P. Putrajaya", "Central"),
];

/// Builds the state→region dimension rebuilt into staging on every run.
pub fn states_table() -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("state_name", DataType::Utf8, false),
        Field::new("region", DataType::Utf8, false),
    ]));
    let names: StringArray = STATE_REGIONS.iter().map(|(name, _)| Some(*name)).collect();
    let regions: StringArray = STATE_REGIONS.iter().map(|(_, region)| Some(*region)).collect();
    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(names), Arc::new(regions)])?;
    Ok((schema, vec![batch]))
}
