//! Quintile scoring of RFM metrics
//!
//! Each metric is cut into five equal-population bins using linearly
//! interpolated quantile edges at 0, 20, 40, 60, 80 and 100 percent. The
//! lowest bin is closed on both sides, the others only on the right, so
//! tied values always share a bin.
//!
//! Frequency is highly discrete (most customers order once or twice), so it
//! is replaced by its ordinal rank before cutting. Ties in the rank are
//! broken by input order, which makes every rank distinct and the bins
//! balanced.

use std::cmp::Ordering;
use std::fmt;

use tracing::{debug, info};

use crate::error::RfmError;
use crate::rfm::RfmRecord;

/// Number of score bins
pub const QUINTILES: usize = 5;

/// Scored metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Recency,
    Frequency,
    Monetary,
}

impl Metric {
    /// Recency is inverted: the most recent customers score 5.
    pub fn lower_is_better(self) -> bool {
        matches!(self, Self::Recency)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Recency => "recency",
            Self::Frequency => "frequency",
            Self::Monetary => "monetary",
        })
    }
}

/// Score between 1 and 5
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quintile(u8);

impl Quintile {
    pub const ALL: [Quintile; QUINTILES] =
        [Quintile(1), Quintile(2), Quintile(3), Quintile(4), Quintile(5)];

    pub fn new(value: u8) -> Option<Self> {
        (1..=5).contains(&value).then_some(Self(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Quintile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Recency and frequency digits, e.g. "54"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RfCode {
    pub recency: Quintile,
    pub frequency: Quintile,
}

impl RfCode {
    /// All 25 codes from "11" to "55"
    pub fn all() -> impl Iterator<Item = RfCode> {
        Quintile::ALL.into_iter().flat_map(|recency| {
            Quintile::ALL
                .into_iter()
                .map(move |frequency| RfCode { recency, frequency })
        })
    }
}

impl fmt::Display for RfCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.recency, self.frequency)
    }
}

/// Recency, frequency and monetary digits, e.g. "541"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RfmCode {
    pub recency: Quintile,
    pub frequency: Quintile,
    pub monetary: Quintile,
}

impl RfmCode {
    pub fn rf(self) -> RfCode {
        RfCode {
            recency: self.recency,
            frequency: self.frequency,
        }
    }
}

impl fmt::Display for RfmCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.recency, self.frequency, self.monetary)
    }
}

/// RFM metrics with their quintile scores
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub rfm: RfmRecord,
    pub recency_score: Quintile,
    pub frequency_score: Quintile,
    pub monetary_score: Quintile,
    pub rf_code: RfCode,
    pub rfm_code: RfmCode,
}

/// Score every customer on all three metrics.
///
/// Needs the full population: bin edges depend on every value of a metric.
pub fn score(records: Vec<RfmRecord>) -> crate::Result<Vec<ScoredRecord>> {
    if records.is_empty() {
        return Err(RfmError::EmptyPopulation);
    }

    let recency: Vec<f64> = records.iter().map(|r| f64::from(r.recency)).collect();
    let frequency: Vec<f64> = records.iter().map(|r| f64::from(r.frequency)).collect();
    let monetary: Vec<f64> = records.iter().map(|r| r.monetary).collect();

    let recency_scores = score_metric(&recency, Metric::Recency)?;
    let frequency_scores = score_metric(&frequency, Metric::Frequency)?;
    let monetary_scores = score_metric(&monetary, Metric::Monetary)?;

    let scored: Vec<ScoredRecord> = records
        .into_iter()
        .enumerate()
        .map(|(i, rfm)| {
            let rfm_code = RfmCode {
                recency: recency_scores[i],
                frequency: frequency_scores[i],
                monetary: monetary_scores[i],
            };
            ScoredRecord {
                rfm,
                recency_score: rfm_code.recency,
                frequency_score: rfm_code.frequency,
                monetary_score: rfm_code.monetary,
                rf_code: rfm_code.rf(),
                rfm_code,
            }
        })
        .collect();

    info!(customers = scored.len(), "scored customers into quintiles");
    Ok(scored)
}

/// Quintile score for each value of one metric, in input order.
pub fn score_metric(values: &[f64], metric: Metric) -> crate::Result<Vec<Quintile>> {
    let bins = match metric {
        Metric::Frequency => quintile_bins(&ordinal_rank(values), metric)?,
        Metric::Recency | Metric::Monetary => quintile_bins(values, metric)?,
    };

    Ok(bins
        .into_iter()
        .map(|bin| {
            let label = if metric.lower_is_better() { QUINTILES - bin } else { bin + 1 };
            Quintile(label as u8)
        })
        .collect())
}

/// Ordinal 1-based rank; equal values are ranked in input order.
pub fn ordinal_rank(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    // Stable sort keeps input order among ties.
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; values.len()];
    for (position, index) in order.into_iter().enumerate() {
        ranks[index] = (position + 1) as f64;
    }
    ranks
}

/// Quantile edges at 0, 20, 40, 60, 80 and 100 percent.
///
/// Fails when there are fewer than five distinct values or when ties make
/// two edges coincide.
pub fn quintile_edges(values: &[f64], metric: Metric) -> crate::Result<[f64; QUINTILES + 1]> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let distinct = count_distinct(&sorted);
    if distinct < QUINTILES {
        return Err(RfmError::InsufficientDistinctValues { metric, distinct });
    }

    let last = (sorted.len() - 1) as f64;
    let mut edges = [0.0; QUINTILES + 1];
    for (k, edge) in edges.iter_mut().enumerate() {
        let position = last * k as f64 / QUINTILES as f64;
        let lower = position.floor() as usize;
        let upper = position.ceil() as usize;
        *edge = sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64);
    }

    if edges.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(RfmError::InsufficientDistinctValues { metric, distinct });
    }

    debug!(%metric, ?edges, "quintile edges");
    Ok(edges)
}

/// Zero-based bin (0..=4) of each value.
pub fn quintile_bins(values: &[f64], metric: Metric) -> crate::Result<Vec<usize>> {
    let edges = quintile_edges(values, metric)?;
    let inner = &edges[1..QUINTILES];
    Ok(values
        .iter()
        .map(|value| inner.partition_point(|edge| edge < value))
        .collect())
}

fn count_distinct(sorted: &[f64]) -> usize {
    match sorted.first() {
        None => 0,
        Some(_) => 1 + sorted.windows(2).filter(|pair| pair[0] != pair[1]).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rfm(id: usize, recency: u32, frequency: u32, monetary: f64) -> RfmRecord {
        RfmRecord {
            customer_id: format!("c{id}"),
            recency,
            frequency,
            monetary,
        }
    }

    #[test]
    fn test_edges_match_linear_quantiles() {
        let values: Vec<f64> = (1..=11).map(f64::from).collect();
        let edges = quintile_edges(&values, Metric::Monetary).unwrap();
        assert_eq!(edges, [1.0, 3.0, 5.0, 7.0, 9.0, 11.0]);
    }

    #[test]
    fn test_bins_are_right_closed() {
        let values = vec![1.0, 3.0, 3.5, 5.0, 7.0, 9.0, 11.0, 2.0, 4.0, 6.0, 8.0];
        let bins = quintile_bins(&values, Metric::Monetary).unwrap();
        // edges 1, 3, 4, 6, 8, 11
        assert_eq!(bins, vec![0, 0, 1, 2, 3, 4, 4, 0, 1, 2, 3]);
    }

    #[test]
    fn test_recency_is_inverted() {
        let recency = vec![1.0, 50.0, 100.0, 200.0, 400.0];
        let scores = score_metric(&recency, Metric::Recency).unwrap();
        let digits: Vec<u8> = scores.iter().map(|q| q.get()).collect();
        assert_eq!(digits, vec![5, 4, 3, 2, 1]);

        let scores = score_metric(&recency, Metric::Monetary).unwrap();
        let digits: Vec<u8> = scores.iter().map(|q| q.get()).collect();
        assert_eq!(digits, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_frequency_ranked_before_binning() {
        // Raw cut would fail: only three distinct values.
        let frequency = vec![1.0, 1.0, 1.0, 1.0, 2.0, 1.0, 1.0, 3.0, 1.0, 2.0];
        assert!(quintile_edges(&frequency, Metric::Frequency).is_err());

        let scores = score_metric(&frequency, Metric::Frequency).unwrap();
        let digits: Vec<u8> = scores.iter().map(|q| q.get()).collect();
        // ones ranked 1..=7 in input order, twos 8 and 9, the three 10
        assert_eq!(digits, vec![1, 1, 2, 2, 4, 3, 3, 5, 4, 5]);
    }

    #[test]
    fn test_ordinal_rank_breaks_ties_by_position() {
        let ranks = ordinal_rank(&[5.0, 1.0, 5.0, 3.0]);
        assert_eq!(ranks, vec![3.0, 1.0, 4.0, 2.0]);
    }

    #[test]
    fn test_insufficient_distinct_values() {
        let err = quintile_edges(&[1.0, 1.0, 2.0, 2.0, 3.0, 4.0], Metric::Monetary).unwrap_err();
        match err {
            RfmError::InsufficientDistinctValues { metric, distinct } => {
                assert_eq!(metric, Metric::Monetary);
                assert_eq!(distinct, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_tied_edges_rejected() {
        // Five distinct values but most mass on one of them.
        let mut values = vec![10.0; 20];
        values.extend([1.0, 2.0, 3.0, 4.0]);
        let err = quintile_edges(&values, Metric::Monetary).unwrap_err();
        assert!(matches!(err, RfmError::InsufficientDistinctValues { distinct: 5, .. }));
    }

    #[test]
    fn test_score_builds_codes() {
        let records: Vec<RfmRecord> = (0..5)
            .map(|i| rfm(i, 10 * (i as u32 + 1), i as u32 + 1, 100.0 * (i as f64 + 1.0)))
            .collect();

        let scored = score(records).unwrap();
        let oldest = &scored[4];
        assert_eq!(oldest.recency_score.get(), 1);
        assert_eq!(oldest.frequency_score.get(), 5);
        assert_eq!(oldest.monetary_score.get(), 5);
        assert_eq!(oldest.rf_code.to_string(), "15");
        assert_eq!(oldest.rfm_code.to_string(), "155");
    }

    #[test]
    fn test_empty_population() {
        assert!(matches!(score(Vec::new()), Err(RfmError::EmptyPopulation)));
    }

    #[test]
    fn test_quintile_bounds() {
        assert!(Quintile::new(0).is_none());
        assert!(Quintile::new(6).is_none());
        assert_eq!(Quintile::new(3).map(Quintile::get), Some(3));
        assert_eq!(RfCode::all().count(), 25);
    }

    proptest! {
        #[test]
        fn prop_distinct_values_give_balanced_bins(
            values in proptest::collection::hash_set(0u32..100_000, 5..400)
        ) {
            let values: Vec<f64> = values.into_iter().map(f64::from).collect();
            let bins = quintile_bins(&values, Metric::Monetary).unwrap();

            let mut sizes = [0usize; QUINTILES];
            for bin in bins {
                sizes[bin] += 1;
            }
            let max = *sizes.iter().max().unwrap();
            let min = *sizes.iter().min().unwrap();
            prop_assert!(min >= 1);
            prop_assert!(max - min <= 1, "sizes {:?}", sizes);
        }

        #[test]
        fn prop_scores_in_range_and_monotone(
            rows in proptest::collection::vec((0u32..800, 1u32..40, 0u32..50_000), 5..200)
        ) {
            let records: Vec<RfmRecord> = rows
                .iter()
                .enumerate()
                // index keeps recency and monetary distinct
                .map(|(i, &(r, f, m))| {
                    rfm(i, r * 1000 + i as u32, f, f64::from(m) + i as f64 / 1000.0)
                })
                .collect();

            let scored = score(records).unwrap();
            for a in &scored {
                for q in [a.recency_score, a.frequency_score, a.monetary_score] {
                    prop_assert!((1..=5).contains(&q.get()));
                }
                for b in &scored {
                    if a.rfm.recency < b.rfm.recency {
                        prop_assert!(a.recency_score >= b.recency_score);
                    }
                    if a.rfm.frequency > b.rfm.frequency {
                        prop_assert!(a.frequency_score >= b.frequency_score);
                    }
                    if a.rfm.monetary > b.rfm.monetary {
                        prop_assert!(a.monetary_score >= b.monetary_score);
                    }
                }
            }
        }
    }
}
