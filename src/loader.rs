use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use csv::{ByteRecord, ReaderBuilder, StringRecord};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::record::{Transaction, YearMonth};

const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y-%m-%d"];
const DATETIME_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Columns dropped on load; nothing downstream reads them.
pub const DROPPED_COLUMNS: &[&str] = &["Row ID", "Country"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadStats {
    pub raw_rows: usize,
    pub kept_rows: usize,
    pub dropped_missing_postal_code: usize,
    pub dropped_missing_identifier: usize,
    pub dropped_invalid_dates: usize,
    pub unparsed_numbers: usize,
    pub first_order_date: Option<NaiveDate>,
    pub last_order_date: Option<NaiveDate>,
    pub categories: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub transactions: Vec<Transaction>,
    pub stats: LoadStats,
}

struct Columns {
    order_id: usize,
    order_date: usize,
    ship_date: usize,
    customer_id: usize,
    customer_name: usize,
    city: usize,
    state: usize,
    postal_code: usize,
    region: usize,
    category: usize,
    product_name: usize,
    sales: usize,
    profit: usize,
    ship_mode: Option<usize>,
    segment: Option<usize>,
    product_id: Option<usize>,
    sub_category: Option<usize>,
    quantity: Option<usize>,
    discount: Option<usize>,
}

impl Columns {
    fn resolve(headers: &StringRecord, path: &Path) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|header| header.trim() == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| PipelineError::MissingColumn {
                path: path.to_path_buf(),
                column: name.to_string(),
            })
        };

        Ok(Self {
            order_id: require("Order ID")?,
            order_date: require("Order Date")?,
            ship_date: require("Ship Date")?,
            customer_id: require("Customer ID")?,
            customer_name: require("Customer Name")?,
            city: require("City")?,
            state: require("State")?,
            postal_code: require("Postal Code")?,
            region: require("Region")?,
            category: require("Category")?,
            product_name: require("Product Name")?,
            sales: require("Sales")?,
            profit: require("Profit")?,
            ship_mode: find("Ship Mode"),
            segment: find("Segment"),
            product_id: find("Product ID"),
            sub_category: find("Sub-Category"),
            quantity: find("Quantity"),
            discount: find("Discount"),
        })
    }
}

/// Decodes one field as UTF-8, or as Latin-1 when it is not valid UTF-8.
pub fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Decodes every field of a raw record independently. A leading byte-order
/// mark is dropped.
pub fn decode_record(record: &ByteRecord) -> StringRecord {
    record
        .iter()
        .enumerate()
        .map(|(idx, bytes)| {
            let text = decode_field(bytes);
            match text.strip_prefix('\u{feff}') {
                Some(stripped) if idx == 0 => stripped.to_string(),
                _ => text,
            }
        })
        .collect()
}

/// Parses a day-first date, optionally followed by a time of day.
/// Anything else yields `None`.
pub fn parse_day_first(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if value.contains(' ') || value.contains('T') {
        return DATETIME_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
            .map(|dt| dt.date());
    }

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

pub fn derive_ship_delay(
    order_date: Option<NaiveDate>,
    ship_date: Option<NaiveDate>,
) -> Option<i64> {
    match (order_date, ship_date) {
        (Some(order), Some(ship)) => Some((ship - order).num_days()),
        _ => None,
    }
}

fn field<'r>(record: &'r StringRecord, idx: usize) -> &'r str {
    record.get(idx).map(str::trim).unwrap_or("")
}

fn optional_field(record: &StringRecord, idx: Option<usize>) -> String {
    idx.map(|idx| field(record, idx).to_string()).unwrap_or_default()
}

fn parse_f64(value: &str, unparsed: &mut usize) -> f64 {
    match value.trim().parse::<f64>() {
        Ok(number) if number.is_finite() => number,
        _ => {
            *unparsed += 1;
            0.0
        }
    }
}

fn parse_optional_f64(record: &StringRecord, idx: Option<usize>, unparsed: &mut usize) -> f64 {
    match idx {
        Some(idx) => parse_f64(field(record, idx), unparsed),
        None => 0.0,
    }
}

fn parse_quantity(record: &StringRecord, idx: Option<usize>, unparsed: &mut usize) -> i64 {
    let Some(idx) = idx else {
        return 0;
    };
    match field(record, idx).parse::<i64>() {
        Ok(quantity) => quantity,
        Err(_) => {
            *unparsed += 1;
            0
        }
    }
}

pub fn load_transactions(path: &Path) -> Result<LoadOutcome> {
    let bytes = fs::read(path).map_err(|err| PipelineError::read(path, err))?;
    parse_transactions(&bytes, path)
}

/// Cleans raw CSV bytes. `path` is only used in error messages.
pub fn parse_transactions(bytes: &[u8], path: &Path) -> Result<LoadOutcome> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(bytes);

    let headers = decode_record(
        reader
            .byte_headers()
            .map_err(|err| PipelineError::csv(path, err))?,
    );
    let columns = Columns::resolve(&headers, path)?;
    debug!(
        columns = headers.len(),
        dropped = ?DROPPED_COLUMNS,
        "resolved input header"
    );

    let mut stats = LoadStats::default();
    let mut transactions = Vec::new();

    for record in reader.byte_records() {
        let record = decode_record(&record.map_err(|err| PipelineError::csv(path, err))?);
        if record.iter().all(|value| value.trim().is_empty()) {
            continue;
        }
        stats.raw_rows += 1;

        let postal_code = field(&record, columns.postal_code);
        if postal_code.is_empty() {
            stats.dropped_missing_postal_code += 1;
            continue;
        }

        let order_id = field(&record, columns.order_id);
        let customer_id = field(&record, columns.customer_id);
        if order_id.is_empty() || customer_id.is_empty() {
            stats.dropped_missing_identifier += 1;
            continue;
        }

        let order_date = parse_day_first(field(&record, columns.order_date));
        let ship_date = parse_day_first(field(&record, columns.ship_date));
        let (Some(order), Some(ship), Some(ship_delay)) =
            (order_date, ship_date, derive_ship_delay(order_date, ship_date))
        else {
            stats.dropped_invalid_dates += 1;
            continue;
        };

        let sales = parse_f64(field(&record, columns.sales), &mut stats.unparsed_numbers);
        let profit = parse_f64(field(&record, columns.profit), &mut stats.unparsed_numbers);
        let quantity = parse_quantity(&record, columns.quantity, &mut stats.unparsed_numbers);
        let discount = parse_optional_f64(&record, columns.discount, &mut stats.unparsed_numbers);

        let category = field(&record, columns.category).to_string();
        *stats.categories.entry(category.clone()).or_insert(0) += 1;
        stats.first_order_date = Some(stats.first_order_date.map_or(order, |d| d.min(order)));
        stats.last_order_date = Some(stats.last_order_date.map_or(order, |d| d.max(order)));

        transactions.push(Transaction {
            order_id: order_id.to_string(),
            order_date: order,
            ship_date: ship,
            ship_mode: optional_field(&record, columns.ship_mode),
            customer_id: customer_id.to_string(),
            customer_name: field(&record, columns.customer_name).to_string(),
            segment: optional_field(&record, columns.segment),
            city: field(&record, columns.city).to_string(),
            state: field(&record, columns.state).to_string(),
            postal_code: postal_code.to_string(),
            region: field(&record, columns.region).to_string(),
            product_id: optional_field(&record, columns.product_id),
            category,
            sub_category: optional_field(&record, columns.sub_category),
            product_name: field(&record, columns.product_name).to_string(),
            sales,
            quantity,
            discount,
            profit,
            order_year: order.year(),
            order_month: order.month(),
            order_day: order.day(),
            order_month_period: YearMonth::of(order),
            ship_delay,
            latitude: None,
            longitude: None,
            cohort_month: None,
            cohort_index: None,
        });
    }

    stats.kept_rows = transactions.len();

    info!(
        raw_rows = stats.raw_rows,
        kept_rows = stats.kept_rows,
        missing_postal_code = stats.dropped_missing_postal_code,
        missing_identifier = stats.dropped_missing_identifier,
        invalid_dates = stats.dropped_invalid_dates,
        "load completed | path={}",
        path.display()
    );
    if stats.unparsed_numbers > 0 {
        debug!(count = stats.unparsed_numbers, "numeric fields treated as missing");
    }

    Ok(LoadOutcome {
        transactions,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Row ID,Order ID,Order Date,Ship Date,Ship Mode,Customer ID,Customer Name,Segment,Country,City,State,Postal Code,Region,Product ID,Category,Sub-Category,Product Name,Sales,Quantity,Discount,Profit";

    fn row(order_id: &str, order_date: &str, ship_date: &str, postal: &str) -> String {
        format!(
            "1,{order_id},{order_date},{ship_date},Second Class,CG-12520,Claire Gute,Consumer,United States,Henderson,Kentucky,{postal},South,FUR-BO-10001798,Furniture,Bookcases,Bush Somerset Collection Bookcase,261.96,2,0,41.9136"
        )
    }

    fn parse(rows: &[String]) -> LoadOutcome {
        let text = format!("{HEADER}\n{}\n", rows.join("\n"));
        parse_transactions(text.as_bytes(), Path::new("orders.csv")).unwrap()
    }

    #[test]
    fn dates_are_parsed_day_first() {
        assert_eq!(parse_day_first("08/11/2016"), NaiveDate::from_ymd_opt(2016, 11, 8));
        assert_eq!(parse_day_first("8/1/2016"), NaiveDate::from_ymd_opt(2016, 1, 8));
        assert_eq!(parse_day_first("31-12-2015"), NaiveDate::from_ymd_opt(2015, 12, 31));
        assert_eq!(parse_day_first("2015-12-31"), NaiveDate::from_ymd_opt(2015, 12, 31));
        assert_eq!(
            parse_day_first("08/11/2016 13:45"),
            NaiveDate::from_ymd_opt(2016, 11, 8)
        );
    }

    #[test]
    fn unparseable_dates_become_none() {
        assert_eq!(parse_day_first(""), None);
        assert_eq!(parse_day_first("not a date"), None);
        assert_eq!(parse_day_first("11/23/2016"), None);
        assert_eq!(parse_day_first("31/02/2016"), None);
    }

    #[test]
    fn ship_delay_is_none_iff_a_date_is_missing() {
        let order = NaiveDate::from_ymd_opt(2016, 11, 8);
        let ship = NaiveDate::from_ymd_opt(2016, 11, 11);
        assert_eq!(derive_ship_delay(order, ship), Some(3));
        assert_eq!(derive_ship_delay(ship, order), Some(-3));
        assert_eq!(derive_ship_delay(None, ship), None);
        assert_eq!(derive_ship_delay(order, None), None);
        assert_eq!(derive_ship_delay(None, None), None);
    }

    #[test]
    fn derives_date_parts_and_delay() {
        let outcome = parse(&[row("CA-2016-152156", "08/11/2016", "11/11/2016", "42420")]);
        let tx = &outcome.transactions[0];
        assert_eq!(tx.order_year, 2016);
        assert_eq!(tx.order_month, 11);
        assert_eq!(tx.order_day, 8);
        assert_eq!(tx.order_month_period, YearMonth::new(2016, 11));
        assert_eq!(tx.ship_delay, 3);
        assert_eq!(tx.sales, 261.96);
        assert_eq!(tx.quantity, 2);
        assert_eq!(tx.segment, "Consumer");
        assert_eq!(tx.latitude, None);
        assert_eq!(tx.cohort_index, None);
    }

    #[test]
    fn drops_rows_without_postal_code() {
        let outcome = parse(&[
            row("A-1", "08/11/2016", "11/11/2016", "42420"),
            row("A-2", "08/11/2016", "11/11/2016", ""),
        ]);
        assert_eq!(outcome.stats.raw_rows, 2);
        assert_eq!(outcome.stats.dropped_missing_postal_code, 1);
        assert!(outcome.transactions.iter().all(|tx| !tx.postal_code.is_empty()));
        assert_eq!(outcome.transactions.len(), 1);
    }

    #[test]
    fn malformed_dates_never_abort_the_load() {
        let outcome = parse(&[
            row("A-1", "garbage", "11/11/2016", "42420"),
            row("A-2", "08/11/2016", "13/13/2016", "42420"),
            row("A-3", "08/11/2016", "09/11/2016", "42420"),
        ]);
        assert_eq!(outcome.stats.dropped_invalid_dates, 2);
        assert_eq!(outcome.stats.kept_rows, 1);
        assert_eq!(outcome.transactions[0].order_id, "A-3");
    }

    #[test]
    fn unparsed_numbers_count_as_zero() {
        let line = row("A-1", "08/11/2016", "11/11/2016", "42420").replace("261.96", "n/a");
        let outcome = parse(&[line]);
        assert_eq!(outcome.transactions[0].sales, 0.0);
        assert_eq!(outcome.stats.unparsed_numbers, 1);
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let text = "Order ID,Order Date\nA-1,08/11/2016\n";
        let err = parse_transactions(text.as_bytes(), Path::new("orders.csv")).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingColumn { ref column, .. } if column == "Ship Date"
        ));
    }

    #[test]
    fn latin1_bytes_decode() {
        let bytes = b"Caf\xe9".to_vec();
        assert_eq!(decode_field(&bytes), "Café");
        assert_eq!(decode_field("Café".as_bytes()), "Café");
    }

    #[test]
    fn profiles_categories_and_date_range() {
        let outcome = parse(&[
            row("A-1", "08/11/2016", "11/11/2016", "42420"),
            row("A-2", "02/01/2015", "05/01/2015", "42420"),
        ]);
        assert_eq!(outcome.stats.categories.get("Furniture"), Some(&2));
        assert_eq!(outcome.stats.first_order_date, NaiveDate::from_ymd_opt(2015, 1, 2));
        assert_eq!(outcome.stats.last_order_date, NaiveDate::from_ymd_opt(2016, 11, 8));
    }
}
