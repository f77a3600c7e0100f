//! Shared fixtures for the transformer tests.

use std::sync::Arc;

use arrow::array::{BooleanArray, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;

/// Date32 value for the first day of the given month.
pub fn day(year: i32, month: u32) -> i32 {
    let date = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
    date.signed_duration_since(epoch).num_days() as i32
}

/// Rows of `raw.cpi_data`: (state, date, division, index).
pub fn cpi_fixture(rows: &[(&str, i32, &str, f64)]) -> (SchemaRef, Vec<RecordBatch>) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("state", DataType::Utf8, false),
        Field::new("date", DataType::Date32, false),
        Field::new("division", DataType::Utf8, false),
        Field::new("index", DataType::Float64, false),
    ]));
    let states: StringArray = rows.iter().map(|(s, _, _, _)| Some(*s)).collect();
    let dates: Date32Array = rows.iter().map(|(_, d, _, _)| Some(*d)).collect();
    let divisions: StringArray = rows.iter().map(|(_, _, d, _)| Some(*d)).collect();
    let values: Float64Array = rows.iter().map(|(_, _, _, v)| Some(*v)).collect();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(states),
            Arc::new(dates),
            Arc::new(divisions),
            Arc::new(values),
        ],
    )
    .unwrap();
    (schema, vec![batch])
}

/// Rows of `raw.categories`: (division, desc_en, desc_bm, digits).
pub fn categories_fixture(rows: &[(&str, &str, &str, i64)]) -> (SchemaRef, Vec<RecordBatch>) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("division", DataType::Utf8, false),
        Field::new("desc_en", DataType::Utf8, false),
        Field::new("desc_bm", DataType::Utf8, false),
        Field::new("digits", DataType::Int64, false),
    ]));
    let divisions: StringArray = rows.iter().map(|(d, _, _, _)| Some(*d)).collect();
    let desc_en: StringArray = rows.iter().map(|(_, e, _, _)| Some(*e)).collect();
    let desc_bm: StringArray = rows.iter().map(|(_, _, b, _)| Some(*b)).collect();
    let digits: Int64Array = rows.iter().map(|(_, _, _, g)| Some(*g)).collect();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(divisions),
            Arc::new(desc_en),
            Arc::new(desc_bm),
            Arc::new(digits),
        ],
    )
    .unwrap();
    (schema, vec![batch])
}

/// Rows of `staging.cpi_monthly`: (state, date, division, category_name, index_value).
/// The matched flag is derived the way the staging join would set it.
pub fn staging_cpi_fixture(
    rows: &[(&str, i32, &str, &str, f64)],
) -> (SchemaRef, Vec<RecordBatch>) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("state", DataType::Utf8, false),
        Field::new("date", DataType::Date32, false),
        Field::new("division", DataType::Utf8, false),
        Field::new("category_name", DataType::Utf8, false),
        Field::new("category_matched", DataType::Boolean, false),
        Field::new("index_value", DataType::Float64, false),
    ]));
    let states: StringArray = rows.iter().map(|(s, _, _, _, _)| Some(*s)).collect();
    let dates: Date32Array = rows.iter().map(|(_, d, _, _, _)| Some(*d)).collect();
    let divisions: StringArray = rows.iter().map(|(_, _, d, _, _)| Some(*d)).collect();
    let names: StringArray = rows.iter().map(|(_, _, _, n, _)| Some(*n)).collect();
    let matched: BooleanArray = rows
        .iter()
        .map(|(_, _, division, _, _)| Some(*division != "overall"))
        .collect();
    let values: Float64Array = rows.iter().map(|(_, _, _, _, v)| Some(*v)).collect();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(states),
            Arc::new(dates),
            Arc::new(divisions),
            Arc::new(names),
            Arc::new(matched),
            Arc::new(values),
        ],
    )
    .unwrap();
    (schema, vec![batch])
}
