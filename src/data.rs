//! Customer extract loading using Polars

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use tracing::info;

use crate::error::RfmError;

/// Column names of the customer-grain extract.
pub mod columns {
    pub const CUSTOMER_ID: &str = "master_id";
    pub const ORDER_CHANNEL: &str = "order_channel";
    pub const LAST_ORDER_CHANNEL: &str = "last_order_channel";
    pub const FIRST_ORDER_DATE: &str = "first_order_date";
    pub const LAST_ORDER_DATE: &str = "last_order_date";
    pub const LAST_ORDER_DATE_ONLINE: &str = "last_order_date_online";
    pub const LAST_ORDER_DATE_OFFLINE: &str = "last_order_date_offline";
    pub const ORDERS_ONLINE: &str = "order_num_total_ever_online";
    pub const ORDERS_OFFLINE: &str = "order_num_total_ever_offline";
    pub const VALUE_OFFLINE: &str = "customer_value_total_ever_offline";
    pub const VALUE_ONLINE: &str = "customer_value_total_ever_online";
    pub const CATEGORIES: &str = "interested_in_categories_12";
}

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// One row of the customer extract, split by sales channel.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub order_channel: String,
    pub last_order_channel: String,
    pub first_order_date: NaiveDateTime,
    pub last_order_date: NaiveDateTime,
    pub last_order_date_online: Option<NaiveDateTime>,
    pub last_order_date_offline: Option<NaiveDateTime>,
    pub online_orders: u32,
    pub offline_orders: u32,
    pub online_value: f64,
    pub offline_value: f64,
    /// Category tokens bought from in the last 12 months
    pub categories: BTreeSet<String>,
}

impl CustomerRecord {
    /// Whether the customer bought from `category` (exact token match).
    pub fn is_interested_in(&self, category: &str) -> bool {
        self.categories.contains(category)
    }
}

/// Load the customer extract from a CSV file
///
/// # Arguments
/// * `file_path` - Path to the CSV file
/// * `category_delimiter` - Separator between tokens of the category list
///
/// # Returns
/// * One `CustomerRecord` per data row, in file order
pub fn load_customers(
    file_path: &Path,
    category_delimiter: &str,
) -> crate::Result<Vec<CustomerRecord>> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
        .finish()?;

    info!(path = %file_path.display(), rows = df.height(), "loaded customer extract");

    customers_from_frame(&df, category_delimiter)
}

/// Convert an already loaded frame into customer records.
pub fn customers_from_frame(
    df: &DataFrame,
    category_delimiter: &str,
) -> crate::Result<Vec<CustomerRecord>> {
    let ids = string_column(df, columns::CUSTOMER_ID)?;
    let order_channels = string_column(df, columns::ORDER_CHANNEL)?;
    let last_channels = string_column(df, columns::LAST_ORDER_CHANNEL)?;
    let first_dates = string_column(df, columns::FIRST_ORDER_DATE)?;
    let last_dates = string_column(df, columns::LAST_ORDER_DATE)?;
    let last_online = string_column(df, columns::LAST_ORDER_DATE_ONLINE)?;
    let last_offline = string_column(df, columns::LAST_ORDER_DATE_OFFLINE)?;
    let orders_online = float_column(df, columns::ORDERS_ONLINE)?;
    let orders_offline = float_column(df, columns::ORDERS_OFFLINE)?;
    let value_offline = float_column(df, columns::VALUE_OFFLINE)?;
    let value_online = float_column(df, columns::VALUE_ONLINE)?;
    let categories = string_column(df, columns::CATEGORIES)?;

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let row = i + 1;
        let customer_id = required_text(&ids[i], columns::CUSTOMER_ID, row)?;

        records.push(CustomerRecord {
            customer_id,
            order_channel: required_text(&order_channels[i], columns::ORDER_CHANNEL, row)?,
            last_order_channel: required_text(&last_channels[i], columns::LAST_ORDER_CHANNEL, row)?,
            first_order_date: required_date(&first_dates[i], columns::FIRST_ORDER_DATE, row)?,
            last_order_date: required_date(&last_dates[i], columns::LAST_ORDER_DATE, row)?,
            last_order_date_online: optional_date(
                &last_online[i],
                columns::LAST_ORDER_DATE_ONLINE,
                row,
            )?,
            last_order_date_offline: optional_date(
                &last_offline[i],
                columns::LAST_ORDER_DATE_OFFLINE,
                row,
            )?,
            online_orders: order_count(orders_online[i], columns::ORDERS_ONLINE, row)?,
            offline_orders: order_count(orders_offline[i], columns::ORDERS_OFFLINE, row)?,
            online_value: spend(value_online[i], columns::VALUE_ONLINE, row)?,
            offline_value: spend(value_offline[i], columns::VALUE_OFFLINE, row)?,
            categories: categories[i]
                .as_deref()
                .map(|raw| parse_categories(raw, category_delimiter))
                .unwrap_or_default(),
        });
    }

    Ok(records)
}

/// Parse a date or timestamp cell. Plain dates resolve to midnight.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Split a `[A, B, C]` style list into its tokens.
pub fn parse_categories(raw: &str, delimiter: &str) -> BTreeSet<String> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(delimiter)
        .map(|token| token.trim().trim_matches(|c| c == '\'' || c == '"').trim())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn column<'a>(df: &'a DataFrame, name: &str) -> crate::Result<&'a Series> {
    df.column(name).map_err(|_| RfmError::DataShape {
        column: name.to_string(),
        row: None,
        reason: "required column is missing".to_string(),
    })
}

fn string_column(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<String>>> {
    let series = column(df, name)?.cast(&DataType::String)?;
    Ok(series
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect())
}

fn float_column(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<f64>>> {
    // Non-strict cast: unparseable text becomes null.
    let series = column(df, name)?.cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().collect())
}

fn required_text(value: &Option<String>, column: &str, row: usize) -> crate::Result<String> {
    match value.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(RfmError::bad_cell(column, row, "value is missing")),
    }
}

fn required_date(value: &Option<String>, column: &str, row: usize) -> crate::Result<NaiveDateTime> {
    let text = required_text(value, column, row)?;
    parse_timestamp(&text)
        .ok_or_else(|| RfmError::bad_cell(column, row, format!("'{text}' is not a date")))
}

fn optional_date(
    value: &Option<String>,
    column: &str,
    row: usize,
) -> crate::Result<Option<NaiveDateTime>> {
    match value.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => parse_timestamp(text)
            .map(Some)
            .ok_or_else(|| RfmError::bad_cell(column, row, format!("'{text}' is not a date"))),
        _ => Ok(None),
    }
}

fn order_count(value: Option<f64>, column: &str, row: usize) -> crate::Result<u32> {
    let count =
        value.ok_or_else(|| RfmError::bad_cell(column, row, "missing or non-numeric order count"))?;
    if !count.is_finite() || count < 0.0 || count.fract() != 0.0 || count > f64::from(u32::MAX) {
        return Err(RfmError::bad_cell(
            column,
            row,
            format!("{count} is not a non-negative whole number"),
        ));
    }
    Ok(count as u32)
}

fn spend(value: Option<f64>, column: &str, row: usize) -> crate::Result<f64> {
    let amount =
        value.ok_or_else(|| RfmError::bad_cell(column, row, "missing or non-numeric amount"))?;
    if !amount.is_finite() || amount < 0.0 {
        return Err(RfmError::bad_cell(
            column,
            row,
            format!("{amount} is not a non-negative amount"),
        ));
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "master_id,order_channel,last_order_channel,first_order_date,\
last_order_date,last_order_date_online,last_order_date_offline,order_num_total_ever_online,\
order_num_total_ever_offline,customer_value_total_ever_offline,customer_value_total_ever_online,\
interested_in_categories_12";

    fn create_test_csv(rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
        file
    }

    #[test]
    fn test_load_customers() {
        let file = create_test_csv(&[
            "cc294636,Android App,Offline,2020-10-30,2021-02-26,2021-02-21,2021-02-26,4.0,1.0,139.99,799.38,\"[KADIN]\"",
            "f431bd5a,Android App,Mobile,2017-02-08,2021-02-16,2021-02-16,2020-01-10,19.0,2.0,159.97,1853.58,\"[ERKEK, COCUK, KADIN, AKTIFSPOR]\"",
        ]);

        let customers = load_customers(file.path(), ",").unwrap();
        assert_eq!(customers.len(), 2);

        let first = &customers[0];
        assert_eq!(first.customer_id, "cc294636");
        assert_eq!(first.online_orders, 4);
        assert_eq!(first.offline_orders, 1);
        assert!((first.online_value - 799.38).abs() < 1e-9);
        assert_eq!(
            first.last_order_date,
            NaiveDate::from_ymd_opt(2021, 2, 26).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
        assert!(first.is_interested_in("KADIN"));

        let second = &customers[1];
        assert_eq!(second.categories.len(), 4);
        assert!(second.is_interested_in("AKTIFSPOR"));
        assert!(!second.is_interested_in("KADIN_AYAKKABI"));
    }

    #[test]
    fn test_missing_column_is_data_shape_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "master_id,order_channel").unwrap();
        writeln!(file, "a,Offline").unwrap();

        let err = load_customers(file.path(), ",").unwrap_err();
        match err {
            RfmError::DataShape { column, row, .. } => {
                assert_eq!(column, columns::LAST_ORDER_CHANNEL);
                assert_eq!(row, None);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_date_reports_row() {
        let file = create_test_csv(&[
            "a,Offline,Offline,2020-10-30,2021-02-26,,2021-02-26,0,1,10.0,0.0,[KADIN]",
            "b,Offline,Offline,2020-10-30,not-a-date,,2021-02-26,0,1,10.0,0.0,[KADIN]",
        ]);

        let err = load_customers(file.path(), ",").unwrap_err();
        match err {
            RfmError::DataShape { column, row, .. } => {
                assert_eq!(column, columns::LAST_ORDER_DATE);
                assert_eq!(row, Some(2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_fractional_order_count_rejected() {
        let file = create_test_csv(&[
            "a,Offline,Offline,2020-10-30,2021-02-26,,2021-02-26,1.5,1,10.0,0.0,[KADIN]",
        ]);

        let err = load_customers(file.path(), ",").unwrap_err();
        assert!(err.to_string().contains(columns::ORDERS_ONLINE));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2021, 5, 30)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2021-05-30 12:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2021-05-30T12:30:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2021-05-30"),
            NaiveDate::from_ymd_opt(2021, 5, 30).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_timestamp("30/05/2021"), None);
    }

    #[test]
    fn test_parse_categories() {
        let tokens = parse_categories("[ERKEK, COCUK, 'KADIN']", ",");
        assert_eq!(tokens.len(), 3);
        assert!(tokens.contains("KADIN"));
        assert!(parse_categories("[]", ",").is_empty());
    }
}
