//! Batch analytics over ride-hailing trip records.
//!
//! Raw trips are read from CSV ([`parser`]), validated, enriched with derived
//! time and cost fields, screened for fare outliers, segmented into
//! categories and aggregated into reports ([`pipeline`], [`reports`]).

pub mod config;
pub mod error;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod records;
pub mod reports;
