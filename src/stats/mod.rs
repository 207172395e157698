//! Robust per-site statistics
//!
//! Location and scale estimates computed per group (site) and aggregated
//! across groups as medians of the per-group estimates. The grand
//! aggregates are what the harmonization passes align every site to; using
//! the median of per-site statistics keeps them robust to unequal site
//! sample sizes.

use arrow::record_batch::RecordBatch;
use log::info;

use crate::error::Result;
use crate::frame;

/// Consistency factor aligning the MAD with the standard deviation under
/// normal data (1 / Phi^-1(3/4))
const MAD_NORMAL_SCALE: f64 = 1.0 / 0.674_489_750_196_081_7;

/// Grand location estimates over a set of metric columns
#[derive(Debug, Clone)]
pub struct GrandLocation {
    /// Columns the estimates refer to, in table order
    pub columns: Vec<String>,
    /// Median, across groups, of the per-group medians
    pub medians: Vec<f64>,
}

/// Grand location and scale estimates over a set of metric columns
#[derive(Debug, Clone)]
pub struct GrandScale {
    /// Columns the estimates refer to, in table order
    pub columns: Vec<String>,
    /// Median, across groups, of the per-group medians
    pub medians: Vec<f64>,
    /// Median, across groups, of the per-group MADs
    pub mads: Vec<f64>,
}

/// Median of a sample. NaN anywhere makes the median NaN; the sort order
/// of NaN is never relied on.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        f64::midpoint(sorted[mid - 1], sorted[mid])
    }
}

/// Percentile with linear interpolation between closest ranks
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = rank - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

/// Normal-consistent median absolute deviation
pub fn mad(values: &[f64]) -> f64 {
    let center = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations) * MAD_NORMAL_SCALE
}

/// Sample mean
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation with one degree of freedom removed
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let center = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - center).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Metric columns a group-wise pass operates on: every `Float64` column
/// except the caller's exclusions. Identity and provenance columns are
/// string-typed, so they never enter the selection.
pub fn numeric_columns_for(
    batch: &RecordBatch,
    excluded: &[&str],
) -> Vec<String> {
    frame::numeric_column_names(batch)
        .into_iter()
        .filter(|name| !excluded.contains(&name.as_str()))
        .collect()
}

/// Per-group column medians, aggregated as the median of medians
pub fn group_location(
    batch: &RecordBatch,
    group_col: &str,
    excluded: &[&str],
) -> Result<GrandLocation> {
    let columns = numeric_columns_for(batch, excluded);
    info!("Calculating bias of dataset ({} features)", columns.len());

    let per_group = per_group_column_stats(batch, group_col, &columns, median)?;
    Ok(GrandLocation {
        medians: median_across_groups(&per_group, columns.len()),
        columns,
    })
}

/// Per-group column medians and MADs, both aggregated across groups
pub fn group_scale(
    batch: &RecordBatch,
    group_col: &str,
    excluded: &[&str],
) -> Result<GrandScale> {
    let columns = numeric_columns_for(batch, excluded);
    info!("Calculating IQR of dataset ({})", columns.len());

    let medians = per_group_column_stats(batch, group_col, &columns, median)?;
    let mads = per_group_column_stats(batch, group_col, &columns, mad)?;
    Ok(GrandScale {
        medians: median_across_groups(&medians, columns.len()),
        mads: median_across_groups(&mads, columns.len()),
        columns,
    })
}

/// One statistic per group per column; outer index is the group
fn per_group_column_stats(
    batch: &RecordBatch,
    group_col: &str,
    columns: &[String],
    stat: fn(&[f64]) -> f64,
) -> Result<Vec<Vec<f64>>> {
    let values: Vec<Vec<f64>> = columns
        .iter()
        .map(|c| frame::numeric_values(batch, c))
        .collect::<Result<_>>()?;

    let mut per_group = Vec::new();
    for key in frame::group_keys(batch, group_col)? {
        let rows = frame::group_indices(batch, group_col, &key)?;
        let stats: Vec<f64> = values
            .iter()
            .map(|col| {
                let group_values: Vec<f64> = rows.iter().map(|&r| col[r]).collect();
                stat(&group_values)
            })
            .collect();
        per_group.push(stats);
    }
    Ok(per_group)
}

fn median_across_groups(per_group: &[Vec<f64>], num_columns: usize) -> Vec<f64> {
    (0..num_columns)
        .map(|c| {
            let column_stats: Vec<f64> = per_group.iter().map(|g| g[c]).collect();
            median(&column_stats)
        })
        .collect()
}
