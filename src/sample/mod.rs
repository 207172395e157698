//! Class-balanced hold-out sampling
//!
//! Draws a small evaluation subset from a merged table: one rating-1 and
//! one rating-0 row per site, for sites carrying enough rating-1 rows. The
//! generator is injected so callers (and tests) control the seed; nothing
//! here touches process-wide randomness.

use arrow::array::UInt32Array;
use arrow::record_batch::RecordBatch;
use log::warn;
use rand::Rng;
use rand::seq::IndexedRandom;

use crate::error::Result;
use crate::frame;

/// Minimum number of rating-1 rows a group needs before it contributes to
/// the hold-out set
const MIN_POSITIVE_ROWS: usize = 5;

/// Draw a class-balanced hold-out subset per group.
///
/// For each group holding at least [`MIN_POSITIVE_ROWS`] rating-1 rows, one
/// rating-1 row and one rating-0 row are drawn uniformly and moved to the
/// hold-out table. Groups with fewer rating-1 rows are skipped silently;
/// groups with no rating-0 row to pair are skipped with a warning rather
/// than drawing an unbalanced pair.
///
/// Returns `(remaining, held_out)`.
pub fn balanced_leaveout<R: Rng + ?Sized>(
    batch: &RecordBatch,
    group_col: &str,
    rating_col: &str,
    rng: &mut R,
) -> Result<(RecordBatch, RecordBatch)> {
    let ratings = frame::numeric_values(batch, rating_col)?;
    let mut held = Vec::new();

    for key in frame::group_keys(batch, group_col)? {
        let rows = frame::group_indices(batch, group_col, &key)?;
        let positive: Vec<usize> = rows.iter().copied().filter(|&r| ratings[r] == 1.0).collect();
        if positive.len() < MIN_POSITIVE_ROWS {
            continue;
        }

        let negative: Vec<usize> = rows.iter().copied().filter(|&r| ratings[r] == 0.0).collect();
        let Some(&neg_draw) = negative.choose(rng) else {
            warn!("Group '{key}' has rated samples of only one class, skipping");
            continue;
        };
        // positive is non-empty here, a draw always succeeds
        if let Some(&pos_draw) = positive.choose(rng) {
            held.push(pos_draw);
            held.push(neg_draw);
        }
    }

    held.sort_unstable();
    let held_set: Vec<bool> = {
        let mut mask = vec![false; batch.num_rows()];
        for &r in &held {
            mask[r] = true;
        }
        mask
    };

    let held_indices = UInt32Array::from(
        held.iter().map(|&r| r as u32).collect::<Vec<_>>(),
    );
    let remaining_indices = UInt32Array::from(
        (0..batch.num_rows())
            .filter(|&r| !held_set[r])
            .map(|r| r as u32)
            .collect::<Vec<_>>(),
    );

    Ok((
        frame::take_rows(batch, &remaining_indices)?,
        frame::take_rows(batch, &held_indices)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{Float64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn batch_of(sites: Vec<&str>, ratings: Vec<f64>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("site", DataType::Utf8, false),
            Field::new("rater_1", DataType::Float64, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(sites)),
                Arc::new(Float64Array::from(ratings)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn qualifying_group_loses_exactly_one_row_per_class() {
        let batch = batch_of(
            vec!["a"; 8],
            vec![1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0],
        );
        let mut rng = StdRng::seed_from_u64(7);
        let (remaining, held) = balanced_leaveout(&batch, "site", "rater_1", &mut rng).unwrap();

        assert_eq!(remaining.num_rows(), 6);
        assert_eq!(held.num_rows(), 2);
        let held_ratings = frame::numeric_values(&held, "rater_1").unwrap();
        let ones = held_ratings.iter().filter(|&&v| v == 1.0).count();
        assert_eq!(ones, 1);
    }

    #[test]
    fn small_group_is_left_alone() {
        let batch = batch_of(vec!["a"; 4], vec![1.0, 1.0, 1.0, 0.0]);
        let mut rng = StdRng::seed_from_u64(7);
        let (remaining, held) = balanced_leaveout(&batch, "site", "rater_1", &mut rng).unwrap();
        assert_eq!(remaining.num_rows(), 4);
        assert_eq!(held.num_rows(), 0);
    }

    #[test]
    fn one_class_group_is_skipped_not_drawn() {
        // More than four rating-1 rows but nothing to pair them with
        let batch = batch_of(vec!["a"; 6], vec![1.0; 6]);
        let mut rng = StdRng::seed_from_u64(7);
        let (remaining, held) = balanced_leaveout(&batch, "site", "rater_1", &mut rng).unwrap();
        assert_eq!(remaining.num_rows(), 6);
        assert_eq!(held.num_rows(), 0);
    }

    #[test]
    fn draws_are_reproducible_under_a_fixed_seed() {
        let batch = batch_of(
            vec!["a", "a", "a", "a", "a", "a", "b", "b", "b", "b", "b", "b", "b"],
            vec![1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0],
        );
        let mut rng_a = StdRng::seed_from_u64(42);
        let (_, held_a) = balanced_leaveout(&batch, "site", "rater_1", &mut rng_a).unwrap();
        let mut rng_b = StdRng::seed_from_u64(42);
        let (_, held_b) = balanced_leaveout(&batch, "site", "rater_1", &mut rng_b).unwrap();
        assert_eq!(held_a, held_b);
        assert_eq!(held_a.num_rows(), 4);
    }
}
