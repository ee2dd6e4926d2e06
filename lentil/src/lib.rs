pub mod anchors; // mutual nearest neighbours across batch pairs
pub mod cancel;
pub mod checkpoint; // versioned, atomically written pipeline state
pub mod config;
pub mod dataset;
pub mod errors;
pub mod feature_selection; // features shared by all batches
pub mod integrate; // anchor-weighted correction towards a reference
pub mod loader; // batch directories with features, barcodes, matrix
pub mod merging;
pub mod metadata; // identifier fields and per-cell metrics
pub mod output;
pub mod pipeline;
pub mod preprocess; // normalization and variable features per batch
pub mod projection;
pub mod qc;
pub mod simulate;

pub use cancel::CancelToken;
pub use config::PipelineConfig;
pub use errors::PipelineError;
pub use loader::BatchSource;
pub use pipeline::{Pipeline, PipelineOutcome};
