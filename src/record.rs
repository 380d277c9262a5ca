use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};

/// A calendar month. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn of(date: NaiveDate) -> Self {
        Self::new(date.year(), date.month())
    }

    /// Whole calendar months from `earlier` to `self`.
    pub fn months_since(self, earlier: YearMonth) -> i64 {
        self.ordinal() - earlier.ordinal()
    }

    fn ordinal(self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CityKey {
    pub city: String,
    pub state: String,
}

impl CityKey {
    pub fn new(city: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            state: state.into(),
        }
    }

    pub fn query(&self) -> String {
        format!("{}, {}", self.city, self.state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// One cleaned order line. Dates are always present after cleaning.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transaction {
    #[serde(rename = "Order ID")]
    pub order_id: String,
    #[serde(rename = "Order Date")]
    pub order_date: NaiveDate,
    #[serde(rename = "Ship Date")]
    pub ship_date: NaiveDate,
    #[serde(rename = "Ship Mode")]
    pub ship_mode: String,
    #[serde(rename = "Customer ID")]
    pub customer_id: String,
    #[serde(rename = "Customer Name")]
    pub customer_name: String,
    pub segment: String,
    pub city: String,
    pub state: String,
    #[serde(rename = "Postal Code")]
    pub postal_code: String,
    pub region: String,
    #[serde(rename = "Product ID")]
    pub product_id: String,
    pub category: String,
    #[serde(rename = "Sub-Category")]
    pub sub_category: String,
    #[serde(rename = "Product Name")]
    pub product_name: String,
    pub sales: f64,
    pub quantity: i64,
    pub discount: f64,
    pub profit: f64,
    #[serde(rename = "Order Year")]
    pub order_year: i32,
    #[serde(rename = "Order Month")]
    pub order_month: u32,
    #[serde(rename = "Order Day")]
    pub order_day: u32,
    #[serde(rename = "Order Month Period")]
    pub order_month_period: YearMonth,
    #[serde(rename = "Ship Delay")]
    pub ship_delay: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Filled in by cohort analysis.
    #[serde(rename = "Cohort Month")]
    pub cohort_month: Option<YearMonth>,
    #[serde(rename = "Cohort Index")]
    pub cohort_index: Option<u32>,
}

impl Transaction {
    pub fn city_key(&self) -> CityKey {
        CityKey::new(self.city.clone(), self.state.clone())
    }

    pub fn order_period(&self) -> YearMonth {
        self.order_month_period
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn months_since_crosses_year_boundary() {
        let nov = YearMonth::new(2016, 11);
        let feb = YearMonth::new(2017, 2);
        assert_eq!(feb.months_since(nov), 3);
        assert_eq!(nov.months_since(nov), 0);
        assert_eq!(nov.months_since(feb), -3);
    }

    #[test]
    fn months_since_ignores_day_of_month() {
        let jan_31 = YearMonth::of(NaiveDate::from_ymd_opt(2017, 1, 31).unwrap());
        let feb_1 = YearMonth::of(NaiveDate::from_ymd_opt(2017, 2, 1).unwrap());
        assert_eq!(feb_1.months_since(jan_31), 1);
    }

    #[test]
    fn year_month_displays_as_period() {
        assert_eq!(YearMonth::new(2015, 3).to_string(), "2015-03");
    }

    #[test]
    fn city_query_joins_with_comma() {
        assert_eq!(CityKey::new("Henderson", "Kentucky").query(), "Henderson, Kentucky");
    }
}
