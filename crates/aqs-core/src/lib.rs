//! aqs-core: assessment quality scoring engine.
//!
//! Loads course and assessment records, asks scoring backends for a
//! structured judgement, combines the sub-scores into a composite quality
//! score and drives the whole batch with resumable checkpoints.

pub mod checkpoint;
pub mod context;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod model;
pub mod parser;
pub mod prompt;
pub mod report;
pub mod results;
pub mod scoring;
pub mod sources;
pub mod statistics;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;
