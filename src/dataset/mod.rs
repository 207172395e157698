//! Merging feature tables with rating tables
//!
//! Reconciles two independently produced tables that address the same scan
//! instances through a composite, partially-present hierarchical identifier:
//! the numeric IQM table and the manual rating table. Also combines several
//! per-site merges into one master table with provenance tagging.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, StringArray, new_null_array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use itertools::Itertools;
use log::info;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{DatasetError, Result};
use crate::frame;
use crate::labels::{self, NormalizeOptions, SITE_COLUMN};
use crate::schema;
use crate::io;

/// Name of the provenance column added by [`combine_datasets`]
pub const DATABASE_COLUMN: &str = "database";

/// How a feature/label pair should be merged
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Column holding the raw ratings in the label table
    pub rating_column: String,
    /// Collapse ratings into accept (0) / reject (1)
    pub binarize: bool,
    /// Site label to use when the label table has no `site` column
    pub site_name: Option<String>,
    /// Persist the merged table verbatim before invalid rows are dropped
    pub persist_to: Option<PathBuf>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            rating_column: "rater_1".to_string(),
            binarize: true,
            site_name: None,
            persist_to: None,
        }
    }
}

/// One feature/label source entering [`combine_datasets`]
#[derive(Debug, Clone)]
pub struct DatasetSource {
    /// Numeric IQM table
    pub features: RecordBatch,
    /// Raw rating table
    pub labels: RecordBatch,
    /// Dataset identifier, written into the `database` column
    pub name: String,
    /// Overwrite the `site` column with the dataset identifier.
    /// Some collections are effectively single-site and carry unusable
    /// per-scan site labels; this is per-source configuration, not a
    /// baked-in dataset name.
    pub site_from_name: bool,
}

/// Distribution of canonical rating values in a merged table
#[derive(Debug, Clone, PartialEq)]
pub struct RatingDistribution {
    /// Distinct rating values, ascending, with their row counts
    pub counts: Vec<(f64, usize)>,
    /// Total rows counted
    pub total: usize,
}

impl RatingDistribution {
    /// Raw counts joined with `/`, e.g. `"1/1"`
    #[must_use]
    pub fn counts_summary(&self) -> String {
        self.counts.iter().map(|(_, n)| n.to_string()).join("/")
    }

    /// Percentages joined with `/`, e.g. `"50.00%/50.00%"`
    #[must_use]
    pub fn percent_summary(&self) -> String {
        self.counts
            .iter()
            .map(|(_, n)| format!("{:.2}%", 100.0 * *n as f64 / self.total as f64))
            .join("/")
    }

    /// Rating class names matching the number of distinct values observed
    #[must_use]
    pub fn class_names(&self) -> &'static str {
        if self.counts.len() == 2 {
            "accept/exclude"
        } else {
            "exclude/doubtful/accept"
        }
    }
}

/// Validate and canonicalize a feature table.
///
/// Identity columns are checked at the boundary, the subject prefix is
/// stripped, rows are sorted by the present identity components, and the
/// IQM feature columns are selected.
pub fn prepare_features(batch: &RecordBatch) -> Result<(RecordBatch, Vec<String>)> {
    let components = schema::validate_identity_columns(batch)?;
    let batch = labels::strip_subject_column(batch)?;
    let batch = frame::sort_by_columns(&batch, &components)?;
    let feature_names = schema::feature_names(&batch.schema());
    Ok((batch, feature_names))
}

/// Merge a feature table with its rating table.
///
/// Label rows addressing scans absent from the feature table are discarded
/// silently; feature rows that end up without a rating are dropped with the
/// count logged. Returns the merged table and the IQM feature names.
pub fn read_dataset(
    features: &RecordBatch,
    raw_labels: &RecordBatch,
    opts: &MergeOptions,
) -> Result<(RecordBatch, Vec<String>)> {
    let (x, feature_names) = prepare_features(features)?;
    let y = labels::normalize_labels(
        raw_labels,
        &NormalizeOptions {
            rating_column: opts.rating_column.clone(),
            binarize: opts.binarize,
            site_name: opts.site_name.clone(),
        },
    )?;

    let comps_x = schema::identity_components_present(&x.schema());
    let comps_y = schema::identity_components_present(&y.schema());
    if comps_x != comps_y {
        return Err(DatasetError::SchemaMismatch {
            features: comps_x.join(", "),
            labels: comps_y.join(", "),
        });
    }

    // Labels for unknown scans are dropped before the join
    let x_keys = schema::composite_keys(&x, &comps_x)?;
    let x_key_set: FxHashSet<&str> = x_keys.iter().map(String::as_str).collect();
    let y_keys = schema::composite_keys(&y, &comps_y)?;
    let known: BooleanArray = y_keys
        .iter()
        .map(|k| Some(x_key_set.contains(k.as_str())))
        .collect();
    let y = frame::filter_rows(&y, &known)?;

    let merged = left_join(&x, &y, &comps_x)?;

    if let Some(path) = &opts.persist_to {
        io::write_table(path, &merged)?;
    }

    let merged = drop_unrated_rows(&merged, &opts.rating_column)?;

    info!("Created dataset (N={} valid samples)", merged.num_rows());
    let distribution = rating_distribution(&merged, &opts.rating_column)?;
    info!(
        "Ratings distribution: {} ({}, {})",
        distribution.counts_summary(),
        distribution.percent_summary(),
        distribution.class_names(),
    );

    Ok((merged, feature_names))
}

/// Read a feature/label file pair and merge them.
///
/// Identity columns are forced to strings on both sides; the rating and
/// site columns of the label table are read as raw text for the normalizer.
pub fn load_dataset(
    features_path: &Path,
    labels_path: &Path,
    opts: &MergeOptions,
) -> Result<(RecordBatch, Vec<String>)> {
    let features = io::read_table(features_path, &schema::IDENTITY_COMPONENTS)?;

    let mut label_strings: Vec<&str> = schema::IDENTITY_COMPONENTS.to_vec();
    label_strings.push(SITE_COLUMN);
    label_strings.push(&opts.rating_column);
    let labels = io::read_table(labels_path, &label_strings)?;

    read_dataset(&features, &labels, opts)
}

/// Merge several site datasets into one master table.
///
/// Each source is merged with `binarize = true` and its rows tagged with a
/// `database` column holding the dataset identifier. Columns are the union
/// across sources, null-filled where a source lacks one; a column carrying
/// different types in different sources is an error. Output column order is
/// `[identity components…, database, site, rating, remaining alphabetically]`.
pub fn combine_datasets(
    sources: &[DatasetSource],
    rating_column: &str,
) -> Result<RecordBatch> {
    let mut merged = Vec::with_capacity(sources.len());
    for source in sources {
        let (mut data, _) = read_dataset(
            &source.features,
            &source.labels,
            &MergeOptions {
                rating_column: rating_column.to_string(),
                binarize: true,
                site_name: Some(source.name.clone()),
                persist_to: None,
            },
        )?;

        data = frame::append_constant_column(&data, DATABASE_COLUMN, &source.name)?;
        if source.site_from_name {
            let sites = StringArray::from(vec![source.name.as_str(); data.num_rows()]);
            data = frame::replace_column(&data, SITE_COLUMN, Arc::new(sites))?;
        }
        merged.push(data);
    }

    if merged.is_empty() {
        return Err(DatasetError::Schema(
            "combine_datasets needs at least one source".to_string(),
        ));
    }

    let union = column_union(&merged)?;
    let order = combined_column_order(&union, rating_column);
    let fields: Vec<Field> = order
        .iter()
        .map(|name| {
            let ty = union.iter().find(|(n, _)| n == name).map(|(_, ty)| ty.clone());
            Field::new(name, ty.unwrap_or(DataType::Utf8), true)
        })
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let mut ordered = Vec::with_capacity(merged.len());
    for batch in &merged {
        let columns: Vec<ArrayRef> = order
            .iter()
            .map(|name| match frame::column(batch, name) {
                Ok(array) => Ok(array.clone()),
                Err(DatasetError::MissingColumn(_)) => {
                    let ty = schema.field_with_name(name)?.data_type();
                    Ok(new_null_array(ty, batch.num_rows()))
                }
                Err(e) => Err(e),
            })
            .collect::<Result<_>>()?;
        ordered.push(RecordBatch::try_new(schema.clone(), columns)?);
    }

    frame::concat(&ordered)
}

/// Union of column names and types across per-source merges, in first-seen
/// order
fn column_union(batches: &[RecordBatch]) -> Result<Vec<(String, DataType)>> {
    let mut union: Vec<(String, DataType)> = Vec::new();
    for batch in batches {
        let schema = batch.schema();
        for field in schema.fields() {
            match union.iter().find(|(name, _)| name == field.name()) {
                None => union.push((field.name().clone(), field.data_type().clone())),
                Some((name, ty)) if ty != field.data_type() => {
                    return Err(DatasetError::Schema(format!(
                        "column '{name}' carries conflicting types across datasets"
                    )));
                }
                Some(_) => {}
            }
        }
    }
    Ok(union)
}

/// Distribution of the canonical rating values of a merged table
pub fn rating_distribution(
    batch: &RecordBatch,
    rating_column: &str,
) -> Result<RatingDistribution> {
    let ratings = frame::numeric_column(batch, rating_column)?;
    let mut counts: FxHashMap<u64, (f64, usize)> = FxHashMap::default();
    for value in ratings.iter().flatten() {
        counts.entry(value.to_bits()).or_insert((value, 0)).1 += 1;
    }

    let counts: Vec<(f64, usize)> = counts
        .into_values()
        .sorted_by(|a, b| a.0.total_cmp(&b.0))
        .collect();
    Ok(RatingDistribution {
        total: counts.iter().map(|(_, n)| n).sum(),
        counts,
    })
}

/// Left join of the label columns into the feature table, on the identity
/// columns themselves.
///
/// Duplicate identity keys on the label side would fan every matching
/// feature row out into several copies; they are rejected instead.
fn left_join(x: &RecordBatch, y: &RecordBatch, components: &[String]) -> Result<RecordBatch> {
    let y_keys = schema::identity_tuples(y, components)?;
    let mut y_rows: FxHashMap<&[String], usize> = FxHashMap::default();
    for (row, key) in y_keys.iter().enumerate() {
        if y_rows.insert(key.as_slice(), row).is_some() {
            return Err(DatasetError::DuplicateKey(key.join("/")));
        }
    }

    let x_keys = schema::identity_tuples(x, components)?;
    let matches: Vec<Option<usize>> = x_keys
        .iter()
        .map(|key| y_rows.get(key.as_slice()).copied())
        .collect();

    let mut merged = x.clone();
    let y_schema = y.schema();
    for field in y_schema.fields() {
        if components.contains(field.name()) {
            continue;
        }
        let values = gather_optional(frame::column(y, field.name())?, &matches)?;
        let field = arrow::datatypes::Field::new(field.name(), values.data_type().clone(), true);
        merged = frame::append_column(&merged, field, values)?;
    }
    Ok(merged)
}

/// Gather values of one label column into feature-row order, null where a
/// feature row found no label
fn gather_optional(array: &ArrayRef, matches: &[Option<usize>]) -> Result<ArrayRef> {
    match array.data_type() {
        DataType::Utf8 => {
            let source = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| DatasetError::Schema("expected string array".to_string()))?;
            let values: StringArray = matches
                .iter()
                .map(|m| {
                    m.and_then(|row| (!source.is_null(row)).then(|| source.value(row)))
                })
                .collect();
            Ok(Arc::new(values))
        }
        DataType::Float64 => {
            let source = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| DatasetError::Schema("expected numeric array".to_string()))?;
            let values: Float64Array = matches
                .iter()
                .map(|m| {
                    m.and_then(|row| (!source.is_null(row)).then(|| source.value(row)))
                })
                .collect();
            Ok(Arc::new(values))
        }
        other => Err(DatasetError::ColumnType {
            name: "label column".to_string(),
            actual: other.to_string(),
            expected: "Utf8 or Float64".to_string(),
        }),
    }
}

/// Drop rows without a valid canonical rating. Null and NaN both count as
/// missing; no retained row may carry anything but a finite rating.
fn drop_unrated_rows(batch: &RecordBatch, rating_column: &str) -> Result<RecordBatch> {
    let ratings = frame::numeric_column(batch, rating_column)?;
    let rated: Vec<bool> = (0..ratings.len())
        .map(|i| !ratings.is_null(i) && ratings.value(i).is_finite())
        .collect();

    let dropped = rated.iter().filter(|r| !**r).count();
    if dropped == 0 {
        return Ok(batch.clone());
    }

    info!("Dropping {dropped} samples for having non-numerical labels");
    let rated: BooleanArray = rated.into_iter().map(Some).collect();
    frame::filter_rows(batch, &rated)
}

fn combined_column_order(union: &[(String, DataType)], rating_column: &str) -> Vec<String> {
    let mut order: Vec<String> = schema::IDENTITY_COMPONENTS
        .iter()
        .filter(|comp| union.iter().any(|(name, _)| name == *comp))
        .map(|comp| (*comp).to_string())
        .collect();
    order.push(DATABASE_COLUMN.to_string());
    order.push(SITE_COLUMN.to_string());
    order.push(rating_column.to_string());

    let rest: Vec<String> = union
        .iter()
        .map(|(name, _)| name.clone())
        .filter(|name| !order.contains(name))
        .sorted()
        .collect();
    order.extend(rest);
    order
}
