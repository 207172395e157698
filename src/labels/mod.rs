//! Quality rating normalization
//!
//! Converts a table of raw rater annotations (free text or numeric) into a
//! canonical numeric rating column, optionally binarized, with the site
//! label attached. The canonical ternary domain is -1 = reject,
//! 0 = uncertain, 1 = accept; the binarized domain is 0 = accept,
//! 1 = reject, with uncertain collapsed into accept.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, StringArray};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;

use crate::error::{DatasetError, Result};
use crate::frame;
use crate::schema;

/// Name of the site column in normalized label tables
pub const SITE_COLUMN: &str = "site";

/// Ordered, case-insensitive substring rules for free-text ratings.
/// Later rules overwrite earlier matches on the same value.
const TEXT_RULES: [(&str, f64); 6] = [
    ("fail", -1.0),
    ("exclude", -1.0),
    ("maybe", 0.0),
    ("may be", 0.0),
    ("ok", 1.0),
    ("good", 1.0),
];

/// How a label table should be normalized
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Column holding the raw ratings
    pub rating_column: String,
    /// Collapse the ternary rating into accept (0) / reject (1)
    pub binarize: bool,
    /// Site label to synthesize when the table has no `site` column
    pub site_name: Option<String>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            rating_column: "rater_1".to_string(),
            binarize: true,
            site_name: None,
        }
    }
}

/// Normalize a label table into `[identity components…, site?, rating]`.
///
/// Rows come out sorted by the present identity components and with the
/// subject prefix stripped. Raw ratings that stay non-numeric after the
/// text mapping are a fatal error.
pub fn normalize_labels(batch: &RecordBatch, opts: &NormalizeOptions) -> Result<RecordBatch> {
    let components = schema::validate_identity_columns(batch)?;

    let batch = strip_subject_column(batch)?;
    let batch = frame::sort_by_columns(&batch, &components)?;

    let ratings = canonical_ratings(&batch, &opts.rating_column, opts.binarize)?;
    let batch = frame::replace_column(&batch, &opts.rating_column, ratings)?;

    let has_site = batch.schema().index_of(SITE_COLUMN).is_ok();
    let batch = if has_site {
        batch
    } else if let Some(site_name) = &opts.site_name {
        frame::append_constant_column(&batch, SITE_COLUMN, site_name)?
    } else {
        batch
    };

    let mut keep = components;
    if batch.schema().index_of(SITE_COLUMN).is_ok() {
        keep.push(SITE_COLUMN.to_string());
    }
    keep.push(opts.rating_column.clone());
    frame::select_columns(&batch, &keep)
}

/// Replace the subject column with prefix-stripped values
pub fn strip_subject_column(batch: &RecordBatch) -> Result<RecordBatch> {
    let subjects = frame::string_column(batch, "subject_id")?;
    let stripped: StringArray = subjects
        .iter()
        .map(|v| v.map(schema::strip_subject_prefix))
        .collect();
    frame::replace_column(batch, "subject_id", Arc::new(stripped))
}

/// Map raw ratings to the canonical numeric domain
fn canonical_ratings(
    batch: &RecordBatch,
    rating_column: &str,
    binarize: bool,
) -> Result<ArrayRef> {
    let array = frame::column(batch, rating_column)?;

    let mut values: Vec<Option<f64>> = match array.data_type() {
        DataType::Float64 => {
            let numeric = frame::numeric_column(batch, rating_column)?;
            numeric.iter().map(|v| v.filter(|x| x.is_finite())).collect()
        }
        DataType::Utf8 => {
            let raw = frame::string_column(batch, rating_column)?;
            let mut mapped = Vec::with_capacity(raw.len());
            for row in 0..raw.len() {
                if raw.is_null(row) {
                    mapped.push(None);
                    continue;
                }
                match map_text_rating(raw.value(row)) {
                    Some(value) if value.is_finite() => mapped.push(Some(value)),
                    // Text like "nan" parses numerically but is a missing
                    // rating, not a label; the row is dropped after the join
                    Some(_) => mapped.push(None),
                    None => {
                        return Err(DatasetError::ValueConversion {
                            column: rating_column.to_string(),
                            value: raw.value(row).to_string(),
                            row,
                        });
                    }
                }
            }
            mapped
        }
        other => {
            return Err(DatasetError::ColumnType {
                name: rating_column.to_string(),
                actual: other.to_string(),
                expected: "Utf8 or Float64".to_string(),
            });
        }
    };

    if binarize {
        for value in values.iter_mut().flatten() {
            *value = if *value >= 0.0 { 0.0 } else { 1.0 };
        }
    }

    Ok(Arc::new(Float64Array::from(values)))
}

/// Apply the ordered substring rules; the last matching rule wins.
/// Values no rule matches fall back to numeric parsing.
fn map_text_rating(raw: &str) -> Option<f64> {
    let lowered = raw.to_lowercase();
    let mut mapped = None;
    for (needle, value) in TEXT_RULES {
        if lowered.contains(needle) {
            mapped = Some(value);
        }
    }
    mapped.or_else(|| raw.trim().parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    use arrow::datatypes::{Field, Schema};

    fn label_batch(subjects: Vec<&str>, ratings: Vec<&str>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("subject_id", DataType::Utf8, false),
            Field::new("rater_1", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(subjects)),
                Arc::new(StringArray::from(ratings)),
            ],
        )
        .unwrap()
    }

    fn ratings_of(batch: &RecordBatch) -> Vec<f64> {
        frame::numeric_values(batch, "rater_1").unwrap()
    }

    #[test]
    fn text_ratings_map_to_ternary_domain() {
        let batch = label_batch(
            vec!["01", "02", "03", "04", "05", "06"],
            vec!["Fail", "excluDE", "maybe", "OK", "good", "may be"],
        );
        let opts = NormalizeOptions {
            binarize: false,
            ..NormalizeOptions::default()
        };
        let normalized = normalize_labels(&batch, &opts).unwrap();
        assert_eq!(ratings_of(&normalized), vec![-1.0, -1.0, 0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn binarize_collapses_uncertain_into_accept() {
        let batch = label_batch(
            vec!["01", "02", "03", "04", "05", "06"],
            vec!["Fail", "excluDE", "maybe", "OK", "good", "may be"],
        );
        let normalized = normalize_labels(&batch, &NormalizeOptions::default()).unwrap();
        assert_eq!(ratings_of(&normalized), vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn unmappable_rating_is_fatal() {
        let batch = label_batch(vec!["01"], vec!["unsure"]);
        let err = normalize_labels(&batch, &NormalizeOptions::default()).unwrap_err();
        assert!(matches!(err, DatasetError::ValueConversion { value, .. } if value == "unsure"));
    }

    #[test]
    fn nan_text_is_a_missing_rating_not_a_label() {
        let batch = label_batch(vec!["01", "02"], vec!["good", "nan"]);
        let normalized = normalize_labels(&batch, &NormalizeOptions::default()).unwrap();

        let ratings = frame::numeric_column(&normalized, "rater_1").unwrap();
        assert_eq!(ratings.value(0), 0.0);
        assert!(ratings.is_null(1));
    }

    #[test]
    fn numeric_strings_pass_through_mapping() {
        let batch = label_batch(vec!["01", "02"], vec!["-1", "1"]);
        let opts = NormalizeOptions {
            binarize: false,
            ..NormalizeOptions::default()
        };
        let normalized = normalize_labels(&batch, &opts).unwrap();
        assert_eq!(ratings_of(&normalized), vec![-1.0, 1.0]);
    }

    #[test]
    fn site_name_synthesizes_constant_column() {
        let batch = label_batch(vec!["01"], vec!["good"]);
        let opts = NormalizeOptions {
            site_name: Some("siteA".to_string()),
            ..NormalizeOptions::default()
        };
        let normalized = normalize_labels(&batch, &opts).unwrap();
        let site = frame::string_column(&normalized, SITE_COLUMN).unwrap();
        assert_eq!(site.value(0), "siteA");
        let schema = normalized.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["subject_id", "site", "rater_1"]);
    }

    #[test]
    fn last_matching_rule_wins() {
        // Matches both "fail" and "ok"; the ok rule is applied later and
        // overwrites the fail match
        let batch = label_batch(vec!["01"], vec!["fail but ok"]);
        let opts = NormalizeOptions {
            binarize: false,
            ..NormalizeOptions::default()
        };
        let normalized = normalize_labels(&batch, &opts).unwrap();
        assert_eq!(ratings_of(&normalized), vec![1.0]);
    }
}
