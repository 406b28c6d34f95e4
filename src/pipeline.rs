//! Batch segmentation pipeline: aggregate, consolidate, calculate, score, segment

use std::collections::BTreeMap;

use tracing::info;

use crate::config::Settings;
use crate::data::CustomerRecord;
use crate::rfm::{aggregate, calculate, consolidate};
use crate::score::score;
use crate::segment::{segment, Segment, SegmentedRecord};

/// Result of one segmentation run
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationRun {
    /// One entry per scored customer, in first-occurrence order
    pub customers: Vec<SegmentedRecord>,
    /// Customers left out by the zero-frequency policy
    pub excluded: Vec<String>,
}

impl SegmentationRun {
    /// Number of customers per segment, in rule-table order. Empty segments
    /// are included with a count of zero.
    pub fn segment_counts(&self) -> BTreeMap<Segment, usize> {
        let mut counts: BTreeMap<Segment, usize> =
            Segment::ALL.into_iter().map(|s| (s, 0)).collect();
        for customer in &self.customers {
            *counts.entry(customer.segment).or_default() += 1;
        }
        counts
    }

    pub fn find(&self, customer_id: &str) -> Option<&SegmentedRecord> {
        self.customers.iter().find(|c| c.customer_id() == customer_id)
    }
}

/// Run every stage over the full customer set.
///
/// Fails on the first error; nothing is returned for a partial run.
pub fn run(records: &[CustomerRecord], settings: &Settings) -> crate::Result<SegmentationRun> {
    let aggregates = consolidate(aggregate(records)?)?;
    let calculation = calculate(&aggregates, settings.analysis_date, settings.zero_frequency)?;
    let scored = score(calculation.records)?;
    let customers = segment(scored)?;

    info!(
        input_rows = records.len(),
        customers = customers.len(),
        excluded = calculation.excluded.len(),
        "segmentation complete"
    );

    Ok(SegmentationRun {
        customers,
        excluded: calculation.excluded,
    })
}
