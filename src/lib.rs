//! RfmForge: A Rust CLI application for RFM customer segmentation
//!
//! Customers are scored into quintiles on recency, frequency and monetary
//! value, mapped to named marketing segments through an ordered rule table,
//! and exported as campaign target lists.

pub mod campaign;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod rfm;
pub mod score;
pub mod segment;

// Re-export public items for easier access
pub use campaign::{
    build_target_lists, commit, pending_target_files, scores_frame, FileContents, PendingFile,
    TargetList,
};
pub use cli::Args;
pub use config::{load_settings, CampaignConfig, Settings};
pub use data::{load_customers, CustomerRecord};
pub use error::{RfmError, Stage};
pub use pipeline::{run, SegmentationRun};
pub use rfm::{CustomerAggregate, RfmRecord, ZeroFrequencyPolicy};
pub use score::{Metric, Quintile, RfCode, RfmCode, ScoredRecord};
pub use segment::{Segment, SegmentedRecord};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, RfmError>;
