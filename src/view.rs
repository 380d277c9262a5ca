//! Filtered aggregates backing each dashboard panel.
//!
//! Headline ratios and lifetime values come from the precomputed, unfiltered
//! metrics; everything else is recomputed from the filtered rows.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::cohort::CohortMatrix;
use crate::metrics::CustomerValue;
use crate::pipeline::Dataset;
use crate::record::Transaction;

pub const TOP_N: usize = 10;
pub const HISTOGRAM_BINS: usize = 20;

/// Empty sets and open bounds select everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    pub categories: BTreeSet<String>,
    pub regions: BTreeSet<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl FilterSpec {
    /// Every category and region, over the full order-date range.
    pub fn all(dataset: &Dataset) -> Self {
        Self {
            categories: dataset.transactions.iter().map(|tx| tx.category.clone()).collect(),
            regions: dataset.transactions.iter().map(|tx| tx.region.clone()).collect(),
            start: dataset.stats.first_order_date,
            end: dataset.stats.last_order_date,
        }
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        (self.categories.is_empty() || self.categories.contains(&tx.category))
            && (self.regions.is_empty() || self.regions.contains(&tx.region))
            && self.start.map_or(true, |start| tx.order_date >= start)
            && self.end.map_or(true, |end| tx.order_date <= end)
    }
}

impl Dataset {
    pub fn filter<'a>(&'a self, spec: &FilterSpec) -> Vec<&'a Transaction> {
        self.transactions.iter().filter(|tx| spec.matches(tx)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpis {
    pub average_order_value: Option<f64>,
    pub repeat_purchase_rate: Option<f64>,
    pub total_customers: usize,
    pub total_sales: f64,
    pub total_orders: usize,
    pub average_ship_delay: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatedValue {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledValue {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitySales {
    pub city: String,
    pub state: String,
    pub latitude: f64,
    pub longitude: f64,
    pub sales: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub kpis: Kpis,
    pub sales_over_time: Vec<DatedValue>,
    pub sales_by_location: Vec<CitySales>,
    pub profit_by_category: Vec<LabeledValue>,
    pub top_products: Vec<LabeledValue>,
    pub top_customers: Vec<LabeledValue>,
    pub ship_delay_histogram: Vec<HistogramBin>,
    pub orders_by_region: Vec<LabeledValue>,
    pub customer_lifetime_value: Vec<CustomerValue>,
    pub retention: CohortMatrix<f64>,
}

impl DashboardView {
    pub fn build(dataset: &Dataset, spec: &FilterSpec) -> Self {
        let rows = dataset.filter(spec);
        let metrics = &dataset.metrics;

        let kpis = Kpis {
            average_order_value: metrics.average_order_value,
            repeat_purchase_rate: metrics.repeat_purchase_rate,
            total_customers: metrics.total_customers,
            total_sales: rows.iter().map(|tx| tx.sales).sum(),
            total_orders: distinct(&rows, |tx| tx.order_id.as_str()).len(),
            average_ship_delay: mean(rows.iter().map(|tx| tx.ship_delay as f64)),
        };

        let present: HashSet<&str> = distinct(&rows, |tx| tx.customer_id.as_str());
        let customer_lifetime_value = metrics
            .lifetime_value
            .iter()
            .filter(|value| present.contains(value.customer_id.as_str()))
            .cloned()
            .collect();

        Self {
            kpis,
            sales_over_time: sales_over_time(&rows),
            sales_by_location: sales_by_location(&rows),
            profit_by_category: sum_by(&rows, |tx| &tx.category, |tx| tx.profit),
            top_products: top_n(sum_by(&rows, |tx| &tx.product_name, |tx| tx.sales), TOP_N),
            top_customers: top_n(sum_by(&rows, |tx| &tx.customer_name, |tx| tx.sales), TOP_N),
            ship_delay_histogram: histogram(
                rows.iter().map(|tx| tx.ship_delay as f64),
                HISTOGRAM_BINS,
            ),
            orders_by_region: orders_by_region(&rows),
            customer_lifetime_value,
            retention: dataset.cohorts.retention.clone(),
        }
    }
}

fn distinct<'a, F>(rows: &[&'a Transaction], key: F) -> HashSet<&'a str>
where
    F: Fn(&'a Transaction) -> &'a str,
{
    rows.iter().map(|&tx| key(tx)).collect()
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0_usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn sales_over_time(rows: &[&Transaction]) -> Vec<DatedValue> {
    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for tx in rows {
        *by_date.entry(tx.order_date).or_insert(0.0) += tx.sales;
    }
    by_date
        .into_iter()
        .map(|(date, value)| DatedValue { date, value })
        .collect()
}

/// Places without coordinates cannot be plotted and are left out.
fn sales_by_location(rows: &[&Transaction]) -> Vec<CitySales> {
    let mut by_city: BTreeMap<(&str, &str), CitySales> = BTreeMap::new();
    for tx in rows {
        let Some(coordinates) = tx.coordinates() else {
            continue;
        };
        by_city
            .entry((tx.city.as_str(), tx.state.as_str()))
            .or_insert_with(|| CitySales {
                city: tx.city.clone(),
                state: tx.state.clone(),
                latitude: coordinates.latitude,
                longitude: coordinates.longitude,
                sales: 0.0,
            })
            .sales += tx.sales;
    }
    by_city.into_values().collect()
}

/// Sums per label, sorted by label.
fn sum_by<'a, K, V>(rows: &[&'a Transaction], key: K, value: V) -> Vec<LabeledValue>
where
    K: Fn(&'a Transaction) -> &'a String,
    V: Fn(&Transaction) -> f64,
{
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for &tx in rows {
        *totals.entry(key(tx).as_str()).or_insert(0.0) += value(tx);
    }
    totals
        .into_iter()
        .map(|(label, value)| LabeledValue {
            label: label.to_string(),
            value,
        })
        .collect()
}

/// Largest `n` by value; ties keep label order.
fn top_n(mut values: Vec<LabeledValue>, n: usize) -> Vec<LabeledValue> {
    values.sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.label.cmp(&b.label)));
    values.truncate(n);
    values
}

fn orders_by_region(rows: &[&Transaction]) -> Vec<LabeledValue> {
    let mut orders: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();
    for tx in rows {
        orders
            .entry(tx.region.as_str())
            .or_default()
            .insert(tx.order_id.as_str());
    }
    orders
        .into_iter()
        .map(|(region, ids)| LabeledValue {
            label: region.to_string(),
            value: ids.len() as f64,
        })
        .collect()
}

/// Equal-width bins over the observed range; the last bin is closed.
pub fn histogram(values: impl Iterator<Item = f64>, bins: usize) -> Vec<HistogramBin> {
    let values: Vec<f64> = values.collect();
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = if max > min { (max - min) / bins as f64 } else { 1.0 };

    let mut counts = vec![0_usize; bins];
    for v in &values {
        let idx = (((v - min) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(idx, count)| HistogramBin {
            lower: min + width * idx as f64,
            upper: min + width * (idx + 1) as f64,
            count,
        })
        .collect()
}
