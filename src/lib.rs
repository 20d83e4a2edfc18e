//! `hll-error-bench` measures how accurate HyperLogLog-family cardinality estimators are under
//! incremental insertion and under merging of independently built estimators.
//!
//! Trials run in parallel, their observed relative errors are folded into an aggregate keyed by
//! `(variant, checkpoint, rounded error)`, and the aggregate is appended to a line-delimited error
//! log that downstream plotting consumes.
pub mod aggregate;
pub mod codec;
pub mod config;
pub mod error;
pub mod estimator;
mod families;
pub mod insertion;
pub mod item;
pub mod merge;
pub mod reference;
pub mod report;
pub mod runner;
pub mod sampler;
pub mod store;
pub mod variant;

pub use error::{BenchError, EstimatorError};
pub use estimator::{Estimator, EstimatorTrait};
pub use variant::{Variant, VariantSpec};
