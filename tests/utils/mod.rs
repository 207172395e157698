//! Shared builders for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

/// Route library logs through the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Build a feature table with a `subject_id` column and the given metric
/// columns
pub fn feature_table(subjects: &[&str], metrics: &[(&str, Vec<f64>)]) -> RecordBatch {
    let mut fields = vec![Field::new("subject_id", DataType::Utf8, false)];
    let mut columns: Vec<ArrayRef> = vec![Arc::new(StringArray::from(subjects.to_vec()))];

    for (name, values) in metrics {
        fields.push(Field::new(*name, DataType::Float64, true));
        columns.push(Arc::new(Float64Array::from(values.clone())));
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap()
}

/// Build a label table with free-text ratings in `rater_1`
pub fn label_table(subjects: &[&str], ratings: &[&str]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("subject_id", DataType::Utf8, false),
        Field::new("rater_1", DataType::Utf8, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(subjects.to_vec())),
            Arc::new(StringArray::from(ratings.to_vec())),
        ],
    )
    .unwrap()
}

/// Build a label table carrying an explicit per-scan `site` column
pub fn label_table_with_site(
    subjects: &[&str],
    ratings: &[&str],
    sites: &[&str],
) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("subject_id", DataType::Utf8, false),
        Field::new("site", DataType::Utf8, false),
        Field::new("rater_1", DataType::Utf8, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(subjects.to_vec())),
            Arc::new(StringArray::from(sites.to_vec())),
            Arc::new(StringArray::from(ratings.to_vec())),
        ],
    )
    .unwrap()
}

/// Column names of a batch, in schema order
pub fn column_names(batch: &RecordBatch) -> Vec<String> {
    batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect()
}
