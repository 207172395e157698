//! Record batch primitives shared across the pipeline
//!
//! Thin typed accessors and row/column operations over
//! `arrow::record_batch::RecordBatch`. Tables in this crate hold string
//! columns for identity and provenance and `Float64` columns for metrics;
//! everything here enforces that convention.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, StringArray, UInt32Array};
use arrow::compute::{self, SortColumn};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use itertools::Itertools;

use crate::error::{DatasetError, Result};

/// Look up a column by name
pub fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))
}

/// Look up a string column by name, failing on any other type
pub fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    let array = column(batch, name)?;
    array
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| DatasetError::ColumnType {
            name: name.to_string(),
            actual: array.data_type().to_string(),
            expected: DataType::Utf8.to_string(),
        })
}

/// Look up a `Float64` column by name, failing on any other type
pub fn numeric_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float64Array> {
    let array = column(batch, name)?;
    array
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| DatasetError::ColumnType {
            name: name.to_string(),
            actual: array.data_type().to_string(),
            expected: DataType::Float64.to_string(),
        })
}

/// Extract a `Float64` column as a plain vector.
///
/// Nulls surface as `NaN`, so downstream statistics see missing values the
/// same way the non-finite screens do.
pub fn numeric_values(batch: &RecordBatch, name: &str) -> Result<Vec<f64>> {
    let array = numeric_column(batch, name)?;
    Ok((0..array.len())
        .map(|i| if array.is_null(i) { f64::NAN } else { array.value(i) })
        .collect())
}

/// True when every value of the column is present and finite
pub fn column_is_finite(batch: &RecordBatch, name: &str) -> Result<bool> {
    let array = numeric_column(batch, name)?;
    if array.null_count() > 0 {
        return Ok(false);
    }
    Ok(array.values().iter().all(|v| v.is_finite()))
}

/// Names of all `Float64` columns, in schema order
pub fn numeric_column_names(batch: &RecordBatch) -> Vec<String> {
    batch
        .schema()
        .fields()
        .iter()
        .filter(|f| f.data_type() == &DataType::Float64)
        .map(|f| f.name().clone())
        .collect()
}

/// Replace an existing column, keeping schema order.
///
/// The field's data type follows the new array, so a column may change
/// type (e.g. raw text ratings becoming numeric).
pub fn replace_column(batch: &RecordBatch, name: &str, values: ArrayRef) -> Result<RecordBatch> {
    let schema = batch.schema();
    let index = schema
        .index_of(name)
        .map_err(|_| DatasetError::MissingColumn(name.to_string()))?;

    let mut fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    fields[index] = Field::new(name, values.data_type().clone(), true);

    let mut columns = batch.columns().to_vec();
    columns[index] = values;
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Append a new column at the end of the table
pub fn append_column(
    batch: &RecordBatch,
    field: Field,
    values: ArrayRef,
) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    fields.push(field);

    let mut columns = batch.columns().to_vec();
    columns.push(values);

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Append a constant string column
pub fn append_constant_column(
    batch: &RecordBatch,
    name: &str,
    value: &str,
) -> Result<RecordBatch> {
    let values = StringArray::from(vec![value; batch.num_rows()]);
    append_column(
        batch,
        Field::new(name, DataType::Utf8, false),
        Arc::new(values),
    )
}

/// Reorder the table's columns by name
pub fn select_columns(batch: &RecordBatch, names: &[String]) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields = Vec::with_capacity(names.len());
    let mut columns = Vec::with_capacity(names.len());

    for name in names {
        let index = schema
            .index_of(name)
            .map_err(|_| DatasetError::MissingColumn(name.clone()))?;
        fields.push(schema.field(index).clone());
        columns.push(batch.column(index).clone());
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Sort rows lexicographically by the given columns
pub fn sort_by_columns(batch: &RecordBatch, names: &[String]) -> Result<RecordBatch> {
    if names.is_empty() || batch.num_rows() == 0 {
        return Ok(batch.clone());
    }

    let sort_columns: Vec<SortColumn> = names
        .iter()
        .map(|name| {
            column(batch, name).map(|array| SortColumn {
                values: array.clone(),
                options: None,
            })
        })
        .collect::<Result<_>>()?;

    let indices = compute::lexsort_to_indices(&sort_columns, None)?;
    take_rows(batch, &indices)
}

/// Keep the rows selected by a boolean mask
pub fn filter_rows(batch: &RecordBatch, mask: &BooleanArray) -> Result<RecordBatch> {
    Ok(compute::filter_record_batch(batch, mask)?)
}

/// Gather rows by index
pub fn take_rows(batch: &RecordBatch, indices: &UInt32Array) -> Result<RecordBatch> {
    let columns = batch
        .columns()
        .iter()
        .map(|c| compute::take(c.as_ref(), indices, None))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(RecordBatch::try_new(batch.schema(), columns)?)
}

/// Vertically concatenate tables sharing one schema
pub fn concat(batches: &[RecordBatch]) -> Result<RecordBatch> {
    let schema = batches
        .first()
        .ok_or_else(|| DatasetError::Schema("cannot concatenate zero tables".to_string()))?
        .schema();
    Ok(compute::concat_batches(&schema, batches)?)
}

/// Distinct values of a string column, in sorted order.
///
/// Sorted output keeps every per-group pass deterministic regardless of row
/// order or parallel scheduling.
pub fn group_keys(batch: &RecordBatch, name: &str) -> Result<Vec<String>> {
    let array = string_column(batch, name)?;
    Ok(array
        .iter()
        .flatten()
        .map(str::to_string)
        .sorted()
        .dedup()
        .collect())
}

/// Row indices belonging to one group value
pub fn group_indices(batch: &RecordBatch, name: &str, key: &str) -> Result<Vec<usize>> {
    let array = string_column(batch, name)?;
    Ok((0..array.len())
        .filter(|&i| !array.is_null(i) && array.value(i) == key)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("site", DataType::Utf8, false),
            Field::new("snr", DataType::Float64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["b", "a", "b"])),
                Arc::new(Float64Array::from(vec![Some(1.0), None, Some(3.0)])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn numeric_values_surface_nulls_as_nan() {
        let values = numeric_values(&sample_batch(), "snr").unwrap();
        assert_eq!(values[0], 1.0);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 3.0);
    }

    #[test]
    fn group_keys_are_sorted_and_distinct() {
        assert_eq!(group_keys(&sample_batch(), "site").unwrap(), vec!["a", "b"]);
        assert_eq!(group_indices(&sample_batch(), "site", "b").unwrap(), vec![0, 2]);
    }

    #[test]
    fn column_with_null_is_not_finite() {
        assert!(!column_is_finite(&sample_batch(), "snr").unwrap());
    }

    #[test]
    fn missing_column_is_reported_by_name() {
        let err = numeric_column(&sample_batch(), "cjv").unwrap_err();
        assert!(matches!(err, DatasetError::MissingColumn(name) if name == "cjv"));
    }
}
