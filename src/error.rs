//! Error types for the segmentation pipeline.
//!
//! Every failure is fatal to the batch. Each variant knows which [`Stage`]
//! produced it so the binary can report where the run stopped.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::score::Metric;

/// Pipeline stage that raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configure,
    Load,
    Aggregate,
    Calculate,
    Score,
    Segment,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configure => "configure",
            Self::Load => "load",
            Self::Aggregate => "aggregate",
            Self::Calculate => "calculate",
            Self::Score => "score",
            Self::Segment => "segment",
            Self::Export => "export",
        };
        f.write_str(name)
    }
}

/// Errors raised while loading, scoring, segmenting or exporting customers.
#[derive(Debug, Error)]
pub enum RfmError {
    /// A required column is missing or one of its cells is malformed.
    #[error("column '{column}'{}: {reason}", row_suffix(.row))]
    DataShape {
        column: String,
        row: Option<usize>,
        reason: String,
    },

    /// Summed order counts do not fit in a `u32`.
    #[error("order count of customer '{customer_id}' overflows")]
    OrderCountOverflow { customer_id: String },

    /// A customer's last purchase falls after the analysis date.
    #[error(
        "customer '{customer_id}' last purchased on {last_order_date}, \
         after analysis date {analysis_date}"
    )]
    InvalidDate {
        customer_id: String,
        last_order_date: NaiveDateTime,
        analysis_date: NaiveDate,
    },

    /// Quintile edges for a metric collapse onto each other.
    #[error("cannot form 5 quintiles for {metric}: only {distinct} distinct values")]
    InsufficientDistinctValues { metric: Metric, distinct: usize },

    /// An RF code matched no segment rule.
    #[error("RF code '{code}' matches no segment rule")]
    UnmappedSegment { code: String },

    /// A customer has no orders and the configured policy rejects that.
    #[error("customer '{customer_id}' has zero orders")]
    ZeroFrequency { customer_id: String },

    /// Nothing left to score.
    #[error("no customers to score")]
    EmptyPopulation,

    /// Settings failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chart rendering failed: {0}")]
    Chart(String),
}

fn row_suffix(row: &Option<usize>) -> String {
    match row {
        Some(row) => format!(" (row {row})"),
        None => String::new(),
    }
}

impl RfmError {
    /// Shorthand for a malformed cell.
    pub fn bad_cell(column: &str, row: usize, reason: impl Into<String>) -> Self {
        Self::DataShape {
            column: column.to_string(),
            row: Some(row),
            reason: reason.into(),
        }
    }

    /// Stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidConfig(_) | Self::Config(_) => Stage::Configure,
            Self::DataShape { .. } | Self::Polars(_) => Stage::Load,
            Self::OrderCountOverflow { .. } => Stage::Aggregate,
            Self::InvalidDate { .. } | Self::ZeroFrequency { .. } => Stage::Calculate,
            Self::InsufficientDistinctValues { .. } | Self::EmptyPopulation => Stage::Score,
            Self::UnmappedSegment { .. } => Stage::Segment,
            Self::Io(_) | Self::Chart(_) => Stage::Export,
        }
    }
}
