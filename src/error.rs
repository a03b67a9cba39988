//! Error types for the trip analytics pipeline.
//!
//! Per-record problems ([`RecordError`]) are always recovered inside a stage:
//! the record is dropped and a counter is incremented. Batch-level problems
//! ([`PipelineError`]) are surfaced to the caller.

use thiserror::Error;

/// A defect in a single trip record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("required field `{field}` is missing")]
    SchemaViolation { field: &'static str },

    #[error("field `{field}` holds an unparseable timestamp: {value:?}")]
    MalformedTimestamp { field: &'static str, value: String },
}

/// A condition that makes a whole batch or request unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("no records reached the cleaner; removed fraction is undefined")]
    EmptyInput,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("dimension `{dimension}` is not available on {stage} records")]
    UnsupportedDimension {
        dimension: &'static str,
        stage: &'static str,
    },

    #[error("measure `{measure}` is not available on {stage} records")]
    UnsupportedMeasure {
        measure: &'static str,
        stage: &'static str,
    },

    #[error("order references unknown aggregate alias `{0}`")]
    UnknownSortAlias(String),
}
