//! Delimited table loading utilities
//!
//! Reads header-carrying delimited text into Arrow record batches. The
//! inferred schema is corrected before the real read: columns named by the
//! caller are forced to strings so identifiers like `"01"` keep their
//! leading zeros, and every numeric column is widened to `Float64` so the
//! statistics passes see one uniform metric type.

use std::fs::File;
use std::io::Seek;
use std::path::Path;
use std::sync::Arc;

use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::error::Result;
use crate::frame;

/// Rows sampled when inferring column types
const INFER_ROWS: usize = 1000;

/// Read a delimited table, forcing the named columns to strings
pub fn read_table(path: &Path, string_columns: &[&str]) -> Result<RecordBatch> {
    let mut file = File::open(path)?;

    let format = Format::default().with_header(true);
    let (inferred, _) = format.infer_schema(&mut file, Some(INFER_ROWS))?;
    file.rewind()?;

    let schema = Arc::new(override_schema(&inferred, string_columns));
    let reader = ReaderBuilder::new(schema.clone())
        .with_format(format)
        .build(file)?;

    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    frame::concat(&batches)
}

/// Write a table as delimited text with a header row, column order
/// preserved and no index column
pub fn write_table(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = WriterBuilder::new().with_header(true).build(file);
    writer.write(batch)?;
    Ok(())
}

fn override_schema(inferred: &Schema, string_columns: &[&str]) -> Schema {
    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|field| {
            let data_type = if string_columns.contains(&field.name().as_str()) {
                DataType::Utf8
            } else if field.data_type().is_numeric() {
                DataType::Float64
            } else {
                field.data_type().clone()
            };
            Field::new(field.name(), data_type, true)
        })
        .collect();
    Schema::new(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::frame::{numeric_values, string_column};

    #[test]
    fn identity_columns_keep_leading_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iqms.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "subject_id,run_id,snr").unwrap();
        writeln!(file, "01,1,3.5").unwrap();
        writeln!(file, "02,2,4.25").unwrap();
        drop(file);

        let batch = read_table(&path, &["subject_id", "run_id"]).unwrap();
        let subjects = string_column(&batch, "subject_id").unwrap();
        assert_eq!(subjects.value(0), "01");
        let runs = string_column(&batch, "run_id").unwrap();
        assert_eq!(runs.value(1), "2");
        assert_eq!(numeric_values(&batch, "snr").unwrap(), vec![3.5, 4.25]);
    }

    #[test]
    fn round_trip_preserves_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "subject_id,cjv,snr").unwrap();
        writeln!(file, "sub-01,0.5,3.5").unwrap();
        drop(file);

        let batch = read_table(&path, &["subject_id"]).unwrap();
        let out = dir.path().join("out.csv");
        write_table(&out, &batch).unwrap();

        let reread = read_table(&out, &["subject_id"]).unwrap();
        assert_eq!(reread.schema(), batch.schema());
        assert_eq!(reread.num_rows(), 1);
    }
}
