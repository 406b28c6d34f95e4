//! Per-customer aggregation and RFM metric computation

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::{columns, CustomerRecord};
use crate::error::RfmError;

/// Omnichannel totals for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerAggregate {
    pub customer_id: String,
    /// Online plus offline orders
    pub total_orders: u32,
    /// Online plus offline spend
    pub total_value: f64,
    pub last_order_date: NaiveDateTime,
}

/// Recency, frequency and monetary metrics for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct RfmRecord {
    pub customer_id: String,
    /// Whole days between the last purchase and the analysis date
    pub recency: u32,
    pub frequency: u32,
    pub monetary: f64,
}

/// What to do with customers that never ordered.
///
/// Zero-order customers cannot be ranked meaningfully, so they are either
/// left out of scoring or fail the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroFrequencyPolicy {
    /// Drop them from scoring and from every output
    #[default]
    Exclude,
    /// Fail the run with `RfmError::ZeroFrequency`
    Reject,
}

/// Output of the calculator stage
#[derive(Debug, Clone, Default)]
pub struct Calculation {
    pub records: Vec<RfmRecord>,
    /// Customers dropped under `ZeroFrequencyPolicy::Exclude`
    pub excluded: Vec<String>,
}

/// Collapse each input row into its omnichannel totals.
///
/// Same cardinality and order as the input; repeated ids are left alone
/// here and merged by [`consolidate`].
pub fn aggregate(records: &[CustomerRecord]) -> crate::Result<Vec<CustomerAggregate>> {
    records
        .iter()
        .map(|record| {
            Ok(CustomerAggregate {
                customer_id: record.customer_id.clone(),
                total_orders: add_orders(
                    &record.customer_id,
                    record.online_orders,
                    record.offline_orders,
                )?,
                total_value: record.online_value + record.offline_value,
                last_order_date: record.last_order_date,
            })
        })
        .collect()
}

fn add_orders(customer_id: &str, a: u32, b: u32) -> crate::Result<u32> {
    a.checked_add(b).ok_or_else(|| RfmError::OrderCountOverflow {
        customer_id: customer_id.to_string(),
    })
}

/// Merge aggregates sharing a customer id.
///
/// Orders and spend are summed and the latest purchase date wins. Customers
/// keep the position of their first occurrence.
pub fn consolidate(aggregates: Vec<CustomerAggregate>) -> crate::Result<Vec<CustomerAggregate>> {
    let input_rows = aggregates.len();
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(input_rows);
    let mut merged: Vec<CustomerAggregate> = Vec::with_capacity(input_rows);

    for aggregate in aggregates {
        match positions.get(&aggregate.customer_id) {
            Some(&index) => {
                let existing = &mut merged[index];
                existing.total_orders = add_orders(
                    &aggregate.customer_id,
                    existing.total_orders,
                    aggregate.total_orders,
                )?;
                existing.total_value += aggregate.total_value;
                existing.last_order_date = existing.last_order_date.max(aggregate.last_order_date);
            }
            None => {
                positions.insert(aggregate.customer_id.clone(), merged.len());
                merged.push(aggregate);
            }
        }
    }

    if merged.len() < input_rows {
        info!(input_rows, customers = merged.len(), "merged repeated customer ids");
    }
    Ok(merged)
}

/// Compute recency, frequency and monetary metrics
///
/// # Arguments
/// * `aggregates` - One aggregate per customer (see [`consolidate`])
/// * `analysis_date` - Reference date recency is measured from
/// * `policy` - Handling of customers without orders
pub fn calculate(
    aggregates: &[CustomerAggregate],
    analysis_date: NaiveDate,
    policy: ZeroFrequencyPolicy,
) -> crate::Result<Calculation> {
    let reference = analysis_date.and_time(NaiveTime::MIN);
    let mut calculation = Calculation {
        records: Vec::with_capacity(aggregates.len()),
        excluded: Vec::new(),
    };

    for aggregate in aggregates {
        if aggregate.last_order_date > reference {
            return Err(RfmError::InvalidDate {
                customer_id: aggregate.customer_id.clone(),
                last_order_date: aggregate.last_order_date,
                analysis_date,
            });
        }

        if aggregate.total_orders == 0 {
            match policy {
                ZeroFrequencyPolicy::Exclude => {
                    warn!(
                        customer_id = %aggregate.customer_id,
                        "excluding customer without orders"
                    );
                    calculation.excluded.push(aggregate.customer_id.clone());
                    continue;
                }
                ZeroFrequencyPolicy::Reject => {
                    return Err(RfmError::ZeroFrequency {
                        customer_id: aggregate.customer_id.clone(),
                    });
                }
            }
        }

        // Non-negative durations truncate to their floor.
        let days = (reference - aggregate.last_order_date).num_days();
        calculation.records.push(RfmRecord {
            customer_id: aggregate.customer_id.clone(),
            recency: u32::try_from(days).map_err(|_| RfmError::DataShape {
                column: columns::LAST_ORDER_DATE.to_string(),
                row: None,
                reason: format!(
                    "customer '{}' has an out of range recency of {days} days",
                    aggregate.customer_id
                ),
            })?,
            frequency: aggregate.total_orders,
            monetary: aggregate.total_value,
        });
    }

    info!(
        customers = calculation.records.len(),
        excluded = calculation.excluded.len(),
        %analysis_date,
        "computed RFM metrics"
    );
    Ok(calculation)
}

/// Raw metric matrix (n_customers, 3): recency, frequency, monetary
pub fn metric_matrix(records: &[RfmRecord]) -> Array2<f64> {
    let mut matrix = Array2::<f64>::zeros((records.len(), 3));
    for (mut row, record) in matrix.outer_iter_mut().zip(records) {
        row[0] = f64::from(record.recency);
        row[1] = f64::from(record.frequency);
        row[2] = record.monetary;
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn timestamp(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn record(
        id: &str,
        online: u32,
        offline: u32,
        value: f64,
        last: NaiveDateTime,
    ) -> CustomerRecord {
        CustomerRecord {
            customer_id: id.to_string(),
            order_channel: "Android App".to_string(),
            last_order_channel: "Offline".to_string(),
            first_order_date: timestamp(2019, 1, 1),
            last_order_date: last,
            last_order_date_online: None,
            last_order_date_offline: None,
            online_orders: online,
            offline_orders: offline,
            online_value: value,
            offline_value: value / 2.0,
            categories: BTreeSet::new(),
        }
    }

    #[test]
    fn test_aggregate_sums_channels() {
        let records = vec![
            record("a", 3, 2, 100.0, timestamp(2021, 5, 1)),
            record("b", 0, 1, 40.0, timestamp(2021, 4, 1)),
        ];

        let aggregates = aggregate(&records).unwrap();
        assert_eq!(aggregates.len(), 2);
        assert_eq!(aggregates[0].total_orders, 5);
        assert!((aggregates[0].total_value - 150.0).abs() < 1e-9);
        assert_eq!(aggregates[1].customer_id, "b");
    }

    #[test]
    fn test_consolidate_merges_repeated_ids() {
        let records = vec![
            record("a", 1, 0, 10.0, timestamp(2021, 1, 1)),
            record("b", 1, 0, 10.0, timestamp(2021, 2, 1)),
            record("a", 2, 0, 20.0, timestamp(2021, 3, 1)),
        ];

        let merged = consolidate(aggregate(&records).unwrap()).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].customer_id, "a");
        assert_eq!(merged[0].total_orders, 3);
        assert!((merged[0].total_value - 45.0).abs() < 1e-9);
        assert_eq!(merged[0].last_order_date, timestamp(2021, 3, 1));
        assert_eq!(merged[1].customer_id, "b");
    }

    #[test]
    fn test_recency_in_whole_days() {
        let mut late = record("a", 1, 0, 10.0, timestamp(2021, 5, 30));
        late.last_order_date = late.last_order_date + chrono::Duration::hours(18);
        let aggregates = aggregate(&[late]).unwrap();

        let calculation = calculate(
            &aggregates,
            NaiveDate::from_ymd_opt(2021, 6, 1).unwrap(),
            ZeroFrequencyPolicy::Exclude,
        )
        .unwrap();
        assert_eq!(calculation.records[0].recency, 1);
    }

    #[test]
    fn test_purchase_after_analysis_date_fails() {
        let aggregates = aggregate(&[record("late", 1, 0, 10.0, timestamp(2021, 6, 2))]).unwrap();

        let err = calculate(
            &aggregates,
            NaiveDate::from_ymd_opt(2021, 6, 1).unwrap(),
            ZeroFrequencyPolicy::Exclude,
        )
        .unwrap_err();
        match err {
            RfmError::InvalidDate { customer_id, .. } => assert_eq!(customer_id, "late"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_frequency_policies() {
        let aggregates = aggregate(&[
            record("active", 2, 0, 10.0, timestamp(2021, 5, 1)),
            record("idle", 0, 0, 0.0, timestamp(2021, 5, 1)),
        ])
        .unwrap();
        let date = NaiveDate::from_ymd_opt(2021, 6, 1).unwrap();

        let calculation = calculate(&aggregates, date, ZeroFrequencyPolicy::Exclude).unwrap();
        assert_eq!(calculation.records.len(), 1);
        assert_eq!(calculation.excluded, vec!["idle".to_string()]);

        let err = calculate(&aggregates, date, ZeroFrequencyPolicy::Reject).unwrap_err();
        assert!(matches!(err, RfmError::ZeroFrequency { .. }));
    }

    #[test]
    fn test_order_count_overflow_fails() {
        let bulk = record("bulk", u32::MAX, 1, 10.0, timestamp(2021, 5, 1));
        let err = aggregate(&[bulk]).unwrap_err();
        assert!(matches!(
            err,
            RfmError::OrderCountOverflow { ref customer_id } if customer_id == "bulk"
        ));
        assert_eq!(err.stage(), crate::Stage::Aggregate);

        let split = vec![
            record("bulk", u32::MAX - 1, 0, 10.0, timestamp(2021, 5, 1)),
            record("bulk", 2, 0, 10.0, timestamp(2021, 5, 2)),
        ];
        let err = consolidate(aggregate(&split).unwrap()).unwrap_err();
        assert!(matches!(err, RfmError::OrderCountOverflow { .. }));
    }

    #[test]
    fn test_earliest_date_recency_is_exact() {
        let date = NaiveDate::from_ymd_opt(2021, 6, 1).unwrap();
        let oldest = record("oldest", 1, 0, 10.0, NaiveDate::MIN.and_hms_opt(0, 0, 0).unwrap());
        let expected = date.signed_duration_since(NaiveDate::MIN).num_days();

        let calculation =
            calculate(&aggregate(&[oldest]).unwrap(), date, ZeroFrequencyPolicy::Exclude).unwrap();
        assert_eq!(i64::from(calculation.records[0].recency), expected);
    }

    #[test]
    fn test_metric_matrix_shape() {
        let records = vec![
            RfmRecord {
                customer_id: "a".to_string(),
                recency: 10,
                frequency: 2,
                monetary: 99.5,
            },
            RfmRecord {
                customer_id: "b".to_string(),
                recency: 400,
                frequency: 1,
                monetary: 100.0,
            },
        ];

        let matrix = metric_matrix(&records);
        assert_eq!(matrix.shape(), &[2, 3]);
        assert_eq!(matrix[[1, 0]], 400.0);
        assert_eq!(matrix[[0, 2]], 99.5);
    }
}
