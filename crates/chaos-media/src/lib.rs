//! Synthetic workload units for driving the pipeline.

pub mod error;
pub mod generator;

pub use error::*;
pub use generator::*;
