//! Scan identity schema definitions
//!
//! A scan instance is addressed by a fixed, ordered vocabulary of hierarchical
//! naming components. Tables carry an arbitrary subset of these as string
//! columns; every part of the pipeline resolves the present subset through
//! this module so that column selection stays consistent across tables.

use arrow::array::Array;
use arrow::datatypes::{DataType, Schema};
use arrow::record_batch::RecordBatch;

use crate::error::{DatasetError, Result};
use crate::frame;

/// Hierarchical scan-naming components, in canonical order.
///
/// The order is significant: present components are always kept in this
/// order, and composite keys concatenate component values in this order.
pub const IDENTITY_COMPONENTS: [&str; 6] = [
    "subject_id",
    "session_id",
    "task_id",
    "acq_id",
    "rec_id",
    "run_id",
];

/// Literal prefix some sources attach to subject identifiers
pub const SUBJECT_PREFIX: &str = "sub-";

/// Separator used when concatenating component values into a composite key
const KEY_SEPARATOR: &str = "_";

/// Column-name prefixes that mark a numeric column as scan metadata
/// rather than a quality metric
const METADATA_PREFIXES: [&str; 3] = ["size_", "spacing_", "Unnamed"];

/// Resolve the ordered subset of identity components present in a schema
pub fn identity_components_present(schema: &Schema) -> Vec<String> {
    IDENTITY_COMPONENTS
        .iter()
        .filter(|comp| schema.index_of(comp).is_ok())
        .map(|comp| (*comp).to_string())
        .collect()
}

/// Remove the literal `sub-` prefix from a subject identifier, if present
pub fn strip_subject_prefix(subject: &str) -> &str {
    subject.strip_prefix(SUBJECT_PREFIX).unwrap_or(subject)
}

/// Validate a table at the ingestion boundary.
///
/// The subject component must be present, and every present identity
/// component must be string-typed. Identity columns are never allowed to
/// arrive as numeric data: identifiers like `"01"` would lose their
/// leading zeros.
pub fn validate_identity_columns(batch: &RecordBatch) -> Result<Vec<String>> {
    let schema = batch.schema();
    let present = identity_components_present(&schema);

    if !present.iter().any(|c| c == "subject_id") {
        return Err(DatasetError::Schema(
            "table has no 'subject_id' column".to_string(),
        ));
    }

    for comp in &present {
        let field = schema.field_with_name(comp)?;
        if field.data_type() != &DataType::Utf8 {
            return Err(DatasetError::ColumnType {
                name: comp.clone(),
                actual: field.data_type().to_string(),
                expected: DataType::Utf8.to_string(),
            });
        }
    }

    Ok(present)
}

/// Build a per-row composite key over the given identity components.
///
/// Component values are concatenated in vocabulary order with the subject
/// prefix stripped. Keys are used only for cross-table existence checks;
/// the actual merge joins on the identity columns themselves.
pub fn composite_keys(batch: &RecordBatch, components: &[String]) -> Result<Vec<String>> {
    let mut columns = Vec::with_capacity(components.len());
    for comp in components {
        columns.push(frame::string_column(batch, comp)?);
    }

    let mut keys = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut parts = Vec::with_capacity(columns.len());
        for (idx, col) in columns.iter().enumerate() {
            let value = if col.is_null(row) { "" } else { col.value(row) };
            if components[idx] == "subject_id" {
                parts.push(strip_subject_prefix(value));
            } else {
                parts.push(value);
            }
        }
        keys.push(parts.join(KEY_SEPARATOR));
    }

    Ok(keys)
}

/// Per-row identity value tuples over the given components, subject prefix
/// stripped.
///
/// Unlike [`composite_keys`], tuples cannot collide when identifier values
/// contain the key separator, so the merge joins on these.
pub fn identity_tuples(batch: &RecordBatch, components: &[String]) -> Result<Vec<Vec<String>>> {
    let mut columns = Vec::with_capacity(components.len());
    for comp in components {
        columns.push(frame::string_column(batch, comp)?);
    }

    let mut tuples = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut parts = Vec::with_capacity(columns.len());
        for (idx, col) in columns.iter().enumerate() {
            let value = if col.is_null(row) { "" } else { col.value(row) };
            if components[idx] == "subject_id" {
                parts.push(strip_subject_prefix(value).to_string());
            } else {
                parts.push(value.to_string());
            }
        }
        tuples.push(parts);
    }
    Ok(tuples)
}

/// Select the IQM feature columns of a table.
///
/// These are the numeric columns minus the identity components and minus
/// columns whose names mark them as metadata (`size_*`, `spacing_*`,
/// `Unnamed*`).
pub fn feature_names(schema: &Schema) -> Vec<String> {
    schema
        .fields()
        .iter()
        .filter(|field| field.data_type().is_numeric())
        .map(|field| field.name().clone())
        .filter(|name| !IDENTITY_COMPONENTS.contains(&name.as_str()))
        .filter(|name| !METADATA_PREFIXES.iter().any(|p| name.starts_with(p)))
        .collect()
}
