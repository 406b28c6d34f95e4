//! Descriptive statistics and segment chart rendering using Plotters

use std::collections::BTreeMap;
use std::fmt::Display;

use ndarray::Axis;
use plotters::prelude::*;
use polars::prelude::{
    col, DataFrame, DataType, IdxSize, IntoLazy, NamedFrom, Series, SortMultipleOptions,
};
use tracing::info;

use crate::data::{columns, CustomerRecord};
use crate::error::RfmError;
use crate::pipeline::SegmentationRun;
use crate::rfm::{metric_matrix, RfmRecord};
use crate::segment::Segment;

/// Number of customers listed in the top-N tables
pub const TOP_N: usize = 10;

const CUSTOMERS: &str = "customers";
const TOTAL_ORDERS: &str = "total_orders";
const TOTAL_VALUE: &str = "total_value";

/// Color palette for segment bars, in rule-table order
const SEGMENT_COLORS: [RGBColor; 10] = [
    RGBColor(96, 125, 139),
    RGBColor(244, 67, 54),
    RGBColor(183, 28, 28),
    RGBColor(255, 152, 0),
    RGBColor(255, 193, 7),
    RGBColor(76, 175, 80),
    RGBColor(3, 169, 244),
    RGBColor(0, 188, 212),
    RGBColor(63, 81, 181),
    RGBColor(27, 94, 32),
];

/// Size and mean metrics of one segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSummary {
    pub segment: Segment,
    pub count: usize,
    pub mean_recency: f64,
    pub mean_frequency: f64,
    pub mean_monetary: f64,
}

/// Customers, orders and spend per order channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSummary {
    pub channel: String,
    pub customers: usize,
    pub total_orders: u64,
    pub total_value: f64,
}

/// Orders and spend of one customer across all of their rows
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerTotals {
    pub customer_id: String,
    pub total_orders: u64,
    pub total_value: f64,
}

/// Ranking key for [`top_customers`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankBy {
    Value,
    Orders,
}

/// Per-segment count and metric means, in rule-table order.
///
/// Segments without customers are omitted.
pub fn segment_summary(run: &SegmentationRun) -> Vec<SegmentSummary> {
    let records: Vec<RfmRecord> = run.customers.iter().map(|c| c.scored.rfm.clone()).collect();
    let metrics = metric_matrix(&records);

    let mut rows_by_segment: BTreeMap<Segment, Vec<usize>> = BTreeMap::new();
    for (row, customer) in run.customers.iter().enumerate() {
        rows_by_segment.entry(customer.segment).or_default().push(row);
    }

    rows_by_segment
        .into_iter()
        .filter_map(|(segment, rows)| {
            let means = metrics.select(Axis(0), &rows).mean_axis(Axis(0))?;
            Some(SegmentSummary {
                segment,
                count: rows.len(),
                mean_recency: means[0],
                mean_frequency: means[1],
                mean_monetary: means[2],
            })
        })
        .collect()
}

/// Per-channel totals over the raw input rows, sorted by channel name.
pub fn channel_summary(records: &[CustomerRecord]) -> crate::Result<Vec<ChannelSummary>> {
    let summary = totals_frame(records)?
        .lazy()
        .group_by([col(columns::ORDER_CHANNEL)])
        .agg([
            col(columns::CUSTOMER_ID).count().cast(DataType::UInt64).alias(CUSTOMERS),
            col(TOTAL_ORDERS).sum(),
            col(TOTAL_VALUE).sum(),
        ])
        .sort_by_exprs([col(columns::ORDER_CHANNEL)], SortMultipleOptions::default())
        .collect()?;

    let channels = summary.column(columns::ORDER_CHANNEL)?.str()?;
    let customers = summary.column(CUSTOMERS)?.u64()?;
    let orders = summary.column(TOTAL_ORDERS)?.u64()?;
    let values = summary.column(TOTAL_VALUE)?.f64()?;

    Ok(channels
        .into_iter()
        .zip(customers)
        .zip(orders)
        .zip(values)
        .filter_map(|(((channel, customers), orders), value)| {
            Some(ChannelSummary {
                channel: channel?.to_string(),
                customers: customers.unwrap_or_default() as usize,
                total_orders: orders.unwrap_or_default(),
                total_value: value.unwrap_or_default(),
            })
        })
        .collect())
}

/// The `n` customers with the highest spend or order count.
///
/// Repeated ids are merged first; ties keep first-occurrence order.
pub fn top_customers(
    records: &[CustomerRecord],
    n: usize,
    by: RankBy,
) -> crate::Result<Vec<CustomerTotals>> {
    let key = match by {
        RankBy::Value => TOTAL_VALUE,
        RankBy::Orders => TOTAL_ORDERS,
    };

    let top = totals_frame(records)?
        .lazy()
        .group_by_stable([col(columns::CUSTOMER_ID)])
        .agg([col(TOTAL_ORDERS).sum(), col(TOTAL_VALUE).sum()])
        .sort_by_exprs(
            [col(key)],
            SortMultipleOptions::default()
                .with_order_descending(true)
                .with_maintain_order(true),
        )
        .limit(IdxSize::try_from(n).unwrap_or(IdxSize::MAX))
        .collect()?;

    let ids = top.column(columns::CUSTOMER_ID)?.str()?;
    let orders = top.column(TOTAL_ORDERS)?.u64()?;
    let values = top.column(TOTAL_VALUE)?.f64()?;

    Ok(ids
        .into_iter()
        .zip(orders)
        .zip(values)
        .filter_map(|((id, orders), value)| {
            Some(CustomerTotals {
                customer_id: id?.to_string(),
                total_orders: orders.unwrap_or_default(),
                total_value: value.unwrap_or_default(),
            })
        })
        .collect())
}

/// One row per input record: id, channel, omnichannel orders and spend.
fn totals_frame(records: &[CustomerRecord]) -> crate::Result<DataFrame> {
    let ids: Vec<&str> = records.iter().map(|r| r.customer_id.as_str()).collect();
    let channels: Vec<&str> = records.iter().map(|r| r.order_channel.as_str()).collect();
    let orders: Vec<u64> = records
        .iter()
        .map(|r| u64::from(r.online_orders) + u64::from(r.offline_orders))
        .collect();
    let values: Vec<f64> = records.iter().map(|r| r.online_value + r.offline_value).collect();

    Ok(DataFrame::new(vec![
        Series::new(columns::CUSTOMER_ID, ids),
        Series::new(columns::ORDER_CHANNEL, channels),
        Series::new(TOTAL_ORDERS, orders),
        Series::new(TOTAL_VALUE, values),
    ])?)
}

/// Print segment statistics to console
pub fn print_segment_summary(run: &SegmentationRun) {
    let total = run.customers.len();
    println!("\n=== Segment Statistics ===");
    println!("Scored customers: {}", total);
    if !run.excluded.is_empty() {
        println!("Excluded (no orders): {}", run.excluded.len());
    }

    println!();
    println!(
        "  {:<20} | {:>7} | {:>6} | {:>8} | {:>9} | {:>10}",
        "Segment", "Count", "%", "Recency", "Frequency", "Monetary"
    );
    println!(
        "  {:-<20}-|-{:->7}-|-{:->6}-|-{:->8}-|-{:->9}-|-{:->10}",
        "", "", "", "", "", ""
    );
    for summary in segment_summary(run) {
        let percentage = (summary.count as f64 / total as f64) * 100.0;
        println!(
            "  {:<20} | {:>7} | {:>5.1}% | {:>8.1} | {:>9.2} | {:>10.2}",
            summary.segment.as_str(),
            summary.count,
            percentage,
            summary.mean_recency,
            summary.mean_frequency,
            summary.mean_monetary
        );
    }
}

/// Print channel totals and top customers to console
pub fn print_descriptive_report(records: &[CustomerRecord]) -> crate::Result<()> {
    println!("\n=== Order Channels ===");
    println!(
        "  {:<16} | {:>9} | {:>12} | {:>14}",
        "Channel", "Customers", "Total orders", "Total value"
    );
    for channel in channel_summary(records)? {
        println!(
            "  {:<16} | {:>9} | {:>12} | {:>14.2}",
            channel.channel, channel.customers, channel.total_orders, channel.total_value
        );
    }

    let rankings = [
        ("Top customers by value", RankBy::Value),
        ("Top customers by orders", RankBy::Orders),
    ];
    for (title, by) in rankings {
        println!("\n=== {} ===", title);
        for (rank, customer) in top_customers(records, TOP_N, by)?.iter().enumerate() {
            println!(
                "  {:>2}. {:<40} orders={:<5} value={:.2}",
                rank + 1,
                customer.customer_id,
                customer.total_orders,
                customer.total_value
            );
        }
    }
    Ok(())
}

/// Render a bar chart of segment sizes as an SVG document
///
/// # Arguments
/// * `summary` - Segment statistics from [`segment_summary`]
///
/// # Returns
/// * The SVG markup
pub fn render_segment_chart(summary: &[SegmentSummary]) -> crate::Result<String> {
    let names: Vec<&str> = summary.iter().map(|s| s.segment.as_str()).collect();
    let max_count = summary.iter().map(|s| s.count).max().unwrap_or(0).max(1) as f64;
    let bars = summary.len().max(1) as f64;

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (900, 520)).into_drawing_area();
        root.fill(&WHITE).map_err(chart_error)?;

        let mut chart = ChartBuilder::on(&root)
            .caption("Customers per Segment", ("sans-serif", 28))
            .margin(10)
            .x_label_area_size(60)
            .y_label_area_size(60)
            .build_cartesian_2d(0f64..bars, 0f64..(max_count * 1.1))
            .map_err(chart_error)?;

        // Label only the bar centers.
        let label = |x: &f64| {
            let index = x.floor() as usize;
            if (x - index as f64 - 0.5).abs() < 1e-9 {
                names.get(index).map(|n| n.to_string()).unwrap_or_default()
            } else {
                String::new()
            }
        };

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(summary.len() * 2 + 1)
            .x_label_formatter(&label)
            .x_desc("Segment")
            .y_desc("Customers")
            .axis_desc_style(("sans-serif", 15))
            .draw()
            .map_err(chart_error)?;

        for (index, entry) in summary.iter().enumerate() {
            let color = SEGMENT_COLORS[entry.segment as usize % SEGMENT_COLORS.len()];
            let left = index as f64 + 0.1;
            chart
                .draw_series(std::iter::once(Rectangle::new(
                    [(left, 0.0), (left + 0.8, entry.count as f64)],
                    color.filled(),
                )))
                .map_err(chart_error)?;
        }

        root.present().map_err(chart_error)?;
    }

    info!(segments = summary.len(), "rendered segment chart");
    Ok(svg)
}

fn chart_error(err: impl Display) -> RfmError {
    RfmError::Chart(err.to_string())
}
