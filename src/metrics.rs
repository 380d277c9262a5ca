use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::record::Transaction;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerValue {
    #[serde(rename = "Customer ID")]
    pub customer_id: String,
    #[serde(rename = "Profit")]
    pub profit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerAggregate {
    #[serde(rename = "Customer ID")]
    pub customer_id: String,
    #[serde(rename = "Total Orders")]
    pub total_orders: usize,
    #[serde(rename = "Total Sales")]
    pub total_sales: f64,
    #[serde(rename = "Total Profit")]
    pub total_profit: f64,
    #[serde(rename = "First Order")]
    pub first_order: NaiveDate,
    #[serde(rename = "Last Order")]
    pub last_order: NaiveDate,
}

/// Metrics over the full cleaned table. Never recomputed for a filtered view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusinessMetrics {
    pub average_order_value: Option<f64>,
    pub repeat_purchase_rate: Option<f64>,
    pub total_customers: usize,
    pub lifetime_value: Vec<CustomerValue>,
    pub customers: Vec<CustomerAggregate>,
}

impl BusinessMetrics {
    pub fn compute(transactions: &[Transaction]) -> Self {
        let customers = customer_aggregates(transactions);
        let lifetime_value = customers
            .iter()
            .map(|agg| CustomerValue {
                customer_id: agg.customer_id.clone(),
                profit: agg.total_profit,
            })
            .collect();

        Self {
            average_order_value: average_order_value(transactions),
            repeat_purchase_rate: repeat_purchase_rate(transactions),
            total_customers: customers.len(),
            lifetime_value,
            customers,
        }
    }

    pub fn lifetime_value_of(&self, customer_id: &str) -> Option<f64> {
        self.lifetime_value
            .binary_search_by(|value| value.customer_id.as_str().cmp(customer_id))
            .ok()
            .map(|idx| self.lifetime_value[idx].profit)
    }
}

/// Mean over distinct orders of each order's summed sales.
pub fn average_order_value(transactions: &[Transaction]) -> Option<f64> {
    let mut order_sales: HashMap<&str, f64> = HashMap::new();
    for tx in transactions {
        *order_sales.entry(tx.order_id.as_str()).or_insert(0.0) += tx.sales;
    }
    if order_sales.is_empty() {
        return None;
    }
    Some(order_sales.values().sum::<f64>() / order_sales.len() as f64)
}

/// Share of customers with more than one distinct order.
pub fn repeat_purchase_rate(transactions: &[Transaction]) -> Option<f64> {
    let mut orders_by_customer: HashMap<&str, HashSet<&str>> = HashMap::new();
    for tx in transactions {
        orders_by_customer
            .entry(tx.customer_id.as_str())
            .or_default()
            .insert(tx.order_id.as_str());
    }
    if orders_by_customer.is_empty() {
        return None;
    }
    let repeat = orders_by_customer
        .values()
        .filter(|orders| orders.len() > 1)
        .count();
    Some(repeat as f64 / orders_by_customer.len() as f64)
}

#[derive(Default)]
struct Accumulator<'a> {
    orders: HashSet<&'a str>,
    sales: f64,
    profit: f64,
    first_order: Option<NaiveDate>,
    last_order: Option<NaiveDate>,
}

/// Per-customer totals, sorted by customer id.
pub fn customer_aggregates(transactions: &[Transaction]) -> Vec<CustomerAggregate> {
    let mut by_customer: HashMap<&str, Accumulator> = HashMap::new();

    for tx in transactions {
        let entry = by_customer.entry(tx.customer_id.as_str()).or_default();
        entry.orders.insert(tx.order_id.as_str());
        entry.sales += tx.sales;
        entry.profit += tx.profit;
        entry.first_order = Some(entry.first_order.map_or(tx.order_date, |d| d.min(tx.order_date)));
        entry.last_order = Some(entry.last_order.map_or(tx.order_date, |d| d.max(tx.order_date)));
    }

    let mut rows: Vec<CustomerAggregate> = by_customer
        .into_iter()
        .filter_map(|(customer_id, acc)| {
            Some(CustomerAggregate {
                customer_id: customer_id.to_string(),
                total_orders: acc.orders.len(),
                total_sales: acc.sales,
                total_profit: acc.profit,
                first_order: acc.first_order?,
                last_order: acc.last_order?,
            })
        })
        .collect();
    rows.sort_by(|a, b| a.customer_id.cmp(&b.customer_id));
    rows
}
