//! Mapping of RF codes to named marketing segments

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RfmError;
use crate::score::{RfCode, ScoredRecord};

/// Named customer behavior segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Hibernating,
    AtRisk,
    CantLoose,
    AboutToSleep,
    NeedAttention,
    LoyalCustomers,
    Promising,
    NewCustomers,
    PotentialLoyalists,
    Champions,
}

impl Segment {
    /// Every segment, in rule-table order
    pub const ALL: [Segment; 10] = [
        Segment::Hibernating,
        Segment::AtRisk,
        Segment::CantLoose,
        Segment::AboutToSleep,
        Segment::NeedAttention,
        Segment::LoyalCustomers,
        Segment::Promising,
        Segment::NewCustomers,
        Segment::PotentialLoyalists,
        Segment::Champions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Segment::Hibernating => "hibernating",
            Segment::AtRisk => "at_risk",
            Segment::CantLoose => "cant_loose",
            Segment::AboutToSleep => "about_to_sleep",
            Segment::NeedAttention => "need_attention",
            Segment::LoyalCustomers => "loyal_customers",
            Segment::Promising => "promising",
            Segment::NewCustomers => "new_customers",
            Segment::PotentialLoyalists => "potential_loyalists",
            Segment::Champions => "champions",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Segment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Segment::ALL
            .into_iter()
            .find(|segment| segment.as_str() == s)
            .ok_or_else(|| format!("unknown segment '{s}'"))
    }
}

/// One row of the segment table: allowed recency and frequency digits.
#[derive(Debug, Clone, Copy)]
pub struct SegmentRule {
    pub recency: &'static [u8],
    pub frequency: &'static [u8],
    pub segment: Segment,
}

impl SegmentRule {
    pub fn matches(&self, code: RfCode) -> bool {
        self.recency.contains(&code.recency.get()) && self.frequency.contains(&code.frequency.get())
    }
}

/// Segment rules, tried top to bottom; the first match wins.
#[rustfmt::skip]
pub const SEGMENT_RULES: [SegmentRule; 10] = [
    SegmentRule { recency: &[1, 2], frequency: &[1, 2], segment: Segment::Hibernating },
    SegmentRule { recency: &[1, 2], frequency: &[3, 4], segment: Segment::AtRisk },
    SegmentRule { recency: &[1, 2], frequency: &[5], segment: Segment::CantLoose },
    SegmentRule { recency: &[3], frequency: &[1, 2], segment: Segment::AboutToSleep },
    SegmentRule { recency: &[3], frequency: &[3], segment: Segment::NeedAttention },
    SegmentRule { recency: &[3, 4], frequency: &[4, 5], segment: Segment::LoyalCustomers },
    SegmentRule { recency: &[4], frequency: &[1], segment: Segment::Promising },
    SegmentRule { recency: &[5], frequency: &[1], segment: Segment::NewCustomers },
    SegmentRule { recency: &[4, 5], frequency: &[2, 3], segment: Segment::PotentialLoyalists },
    SegmentRule { recency: &[5], frequency: &[4, 5], segment: Segment::Champions },
];

/// Scored customer with its segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedRecord {
    pub scored: ScoredRecord,
    pub segment: Segment,
}

impl SegmentedRecord {
    pub fn customer_id(&self) -> &str {
        &self.scored.rfm.customer_id
    }
}

/// Look up the segment of one RF code.
pub fn segment_for(code: RfCode) -> crate::Result<Segment> {
    SEGMENT_RULES
        .iter()
        .find(|rule| rule.matches(code))
        .map(|rule| rule.segment)
        .ok_or_else(|| RfmError::UnmappedSegment {
            code: code.to_string(),
        })
}

/// Assign a segment to every scored customer.
pub fn segment(scored: Vec<ScoredRecord>) -> crate::Result<Vec<SegmentedRecord>> {
    let segmented = scored
        .into_iter()
        .map(|scored| {
            let segment = segment_for(scored.rf_code)?;
            Ok(SegmentedRecord { scored, segment })
        })
        .collect::<crate::Result<Vec<_>>>()?;

    info!(customers = segmented.len(), "assigned segments");
    Ok(segmented)
}
