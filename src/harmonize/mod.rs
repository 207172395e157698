//! Site-wise harmonization passes
//!
//! Removes systematic across-site bias from the metric columns of a merged
//! table: grand-median recentering, robust IQR rescaling, and per-site
//! z-scoring. Every pass groups rows by the site column and preserves row
//! count and row order. When the grouping column is absent the table is
//! treated as a single implicit site.

use std::sync::Arc;

use arrow::array::Float64Array;
use arrow::record_batch::RecordBatch;
use log::{info, warn};
use rayon::prelude::*;

use crate::error::{DatasetError, Result};
use crate::frame;
use crate::stats::{self, GrandLocation};

/// Group label synthesized when the grouping column is absent
pub const UNKNOWN_GROUP: &str = "Unknown";

/// Scale threshold below which a column's IQR is considered degenerate.
/// Dividing by a smaller IQR would blow centered noise up to arbitrary
/// magnitude, so such columns stay centered-only.
const IQR_EPSILON: f64 = 1e-5;

/// Shift every group so its per-column medians land on the grand medians.
///
/// Each value `v` becomes `v - group_median + grand_median`, preserving the
/// within-group spread. Columns named by `grand` must exist in the table.
pub fn recenter_to_grand_median(
    batch: &RecordBatch,
    grand: &GrandLocation,
    group_col: &str,
) -> Result<RecordBatch> {
    info!("Removing bias of dataset ...");
    let mut batch = ensure_group_column(batch, group_col)?;
    let groups = group_rows(&batch, group_col)?;

    for (column, grand_median) in grand.columns.iter().zip(&grand.medians) {
        let mut values = frame::numeric_values(&batch, column)?;
        for (_, rows) in &groups {
            let group_values: Vec<f64> = rows.iter().map(|&r| values[r]).collect();
            let group_median = stats::median(&group_values);
            for &r in rows {
                values[r] = values[r] - group_median + grand_median;
            }
        }
        batch = frame::replace_column(&batch, column, Arc::new(Float64Array::from(values)))?;
    }
    Ok(batch)
}

/// Center every group's metric columns on zero and rescale them to unit
/// interquartile range.
///
/// Columns whose centered IQR does not exceed the degeneracy threshold are
/// left centered-only.
pub fn rescale_by_iqr(
    batch: &RecordBatch,
    group_col: &str,
    excluded: &[&str],
) -> Result<RecordBatch> {
    info!("Removing bias of dataset ...");
    let mut batch = ensure_group_column(batch, group_col)?;
    let groups = group_rows(&batch, group_col)?;
    let columns = stats::numeric_columns_for(&batch, excluded);

    for column in &columns {
        let mut values = frame::numeric_values(&batch, column)?;
        for (_, rows) in &groups {
            let group_values: Vec<f64> = rows.iter().map(|&r| values[r]).collect();
            let group_median = stats::median(&group_values);
            let centered: Vec<f64> = group_values.iter().map(|v| v - group_median).collect();

            let iqr = stats::percentile(&centered, 75.0) - stats::percentile(&centered, 25.0);
            let scale = if iqr > IQR_EPSILON { 1.0 / iqr } else { 1.0 };
            for (&r, v) in rows.iter().zip(&centered) {
                values[r] = v * scale;
            }
        }
        batch = frame::replace_column(&batch, column, Arc::new(Float64Array::from(values)))?;
    }
    Ok(batch)
}

/// Z-score every metric column within each group independently.
///
/// Uses the sample standard deviation (one degree of freedom removed).
/// Columns holding a non-finite value anywhere in the table are excluded
/// from scoring for all groups. Columns that come out of scoring with a NaN
/// anywhere (e.g. a zero-variance group) revert entirely to their
/// pre-scored values, with a warning naming them.
///
/// Per-group scores are computed on independent workers; `workers` caps the
/// pool size, defaulting to available parallelism. Results are written back
/// keyed by group membership, so the output does not depend on scheduling.
pub fn zscore(
    batch: &RecordBatch,
    group_col: &str,
    excluded: &[&str],
    workers: Option<usize>,
) -> Result<RecordBatch> {
    info!("z-scoring dataset ...");
    let mut batch = ensure_group_column(batch, group_col)?;
    let groups = group_rows(&batch, group_col)?;

    let mut columns = Vec::new();
    for column in stats::numeric_columns_for(&batch, excluded) {
        if frame::column_is_finite(&batch, &column)? {
            columns.push(column);
        }
    }

    let originals: Vec<Vec<f64>> = columns
        .iter()
        .map(|c| frame::numeric_values(&batch, c))
        .collect::<Result<_>>()?;

    let compute = || -> Vec<Vec<Vec<f64>>> {
        groups
            .par_iter()
            .map(|(_, rows)| zscore_group(&originals, rows))
            .collect()
    };
    let scored_groups = match workers {
        Some(n) => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .map_err(|e| DatasetError::ThreadPool(e.to_string()))?
            .install(compute),
        None => compute(),
    };

    // Single-threaded reduction: group results land at their own rows
    let mut scored = originals.clone();
    for ((_, rows), group_result) in groups.iter().zip(&scored_groups) {
        for (col, col_result) in group_result.iter().enumerate() {
            for (&r, &value) in rows.iter().zip(col_result) {
                scored[col][r] = if value.is_finite() { value } else { f64::NAN };
            }
        }
    }

    let mut reverted = Vec::new();
    for ((column, values), original) in columns.iter().zip(scored).zip(originals) {
        let values = if values.iter().any(|v| v.is_nan()) {
            reverted.push(column.clone());
            original
        } else {
            values
        };
        batch = frame::replace_column(&batch, column, Arc::new(Float64Array::from(values)))?;
    }
    if !reverted.is_empty() {
        warn!("Columns {} contain NaNs after z-scoring.", reverted.join(", "));
    }

    Ok(batch)
}

/// Z-score one group's rows over every selected column
fn zscore_group(columns: &[Vec<f64>], rows: &[usize]) -> Vec<Vec<f64>> {
    columns
        .iter()
        .map(|values| {
            let group_values: Vec<f64> = rows.iter().map(|&r| values[r]).collect();
            let center = stats::mean(&group_values);
            let spread = stats::sample_std(&group_values);
            group_values.iter().map(|v| (v - center) / spread).collect()
        })
        .collect()
}

/// Synthesize a constant group column when the table has none
fn ensure_group_column(batch: &RecordBatch, group_col: &str) -> Result<RecordBatch> {
    if batch.schema().index_of(group_col).is_ok() {
        return Ok(batch.clone());
    }
    frame::append_constant_column(batch, group_col, UNKNOWN_GROUP)
}

/// Sorted group keys with their member row indices
fn group_rows(batch: &RecordBatch, group_col: &str) -> Result<Vec<(String, Vec<usize>)>> {
    let mut groups = Vec::new();
    for key in frame::group_keys(batch, group_col)? {
        let rows = frame::group_indices(batch, group_col, &key)?;
        groups.push((key, rows));
    }
    Ok(groups)
}
