//! A Rust library for preparing multi-site tables of per-scan image quality
//! metrics: merging automatically computed features with manual quality
//! ratings, validating that both sources address the same scans, and
//! removing systematic across-site bias before classifier training.

pub mod dataset;
pub mod error;
pub mod frame;
pub mod harmonize;
pub mod io;
pub mod labels;
pub mod sample;
pub mod schema;
pub mod stats;

// Re-export the most common types for easier use
// Core types
pub use error::{DatasetError, Result};
pub use schema::{IDENTITY_COMPONENTS, identity_components_present};

// Merging
pub use dataset::{
    DatasetSource, MergeOptions, RatingDistribution, combine_datasets, load_dataset, read_dataset,
};
pub use labels::{NormalizeOptions, normalize_labels};

// Harmonization
pub use harmonize::{recenter_to_grand_median, rescale_by_iqr, zscore};
pub use stats::{GrandLocation, GrandScale, group_location, group_scale};

// Sampling
pub use sample::balanced_leaveout;

// Arrow types
pub use arrow::datatypes::Schema as ArrowSchema;
pub use arrow::record_batch::RecordBatch;

// Table I/O
pub use io::{read_table, write_table};
