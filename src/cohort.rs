use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::record::{Transaction, YearMonth};

/// Cohort placement of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CohortAssignment {
    pub cohort_month: YearMonth,
    pub order_period: YearMonth,
    pub cohort_index: u32,
}

/// Rows are cohort months ascending, columns cohort index `0..width`.
/// `None` cells have no data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortMatrix<T> {
    pub cohorts: Vec<YearMonth>,
    pub width: usize,
    pub cells: Vec<Vec<Option<T>>>,
}

impl<T: Copy> CohortMatrix<T> {
    pub fn row(&self, cohort: YearMonth) -> Option<&[Option<T>]> {
        let idx = self.cohorts.binary_search(&cohort).ok()?;
        Some(&self.cells[idx])
    }

    pub fn get(&self, cohort: YearMonth, index: usize) -> Option<T> {
        self.row(cohort)?.get(index).copied().flatten()
    }

    pub fn rows(&self) -> impl Iterator<Item = (YearMonth, &[Option<T>])> {
        self.cohorts
            .iter()
            .copied()
            .zip(self.cells.iter().map(Vec::as_slice))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortAnalysis {
    /// One entry per transaction, in table order.
    pub assignments: Vec<CohortAssignment>,
    pub sizes: CohortMatrix<usize>,
    pub retention: CohortMatrix<f64>,
}

/// Calendar month of each customer's earliest order.
pub fn cohort_months(transactions: &[Transaction]) -> HashMap<&str, YearMonth> {
    let mut first: HashMap<&str, YearMonth> = HashMap::new();
    for tx in transactions {
        let period = tx.order_period();
        first
            .entry(tx.customer_id.as_str())
            .and_modify(|month| *month = (*month).min(period))
            .or_insert(period);
    }
    first
}

impl CohortAnalysis {
    pub fn compute(transactions: &[Transaction]) -> Self {
        let first = cohort_months(transactions);

        let mut active: BTreeMap<YearMonth, BTreeMap<u32, HashSet<&str>>> = BTreeMap::new();
        let mut assignments = Vec::with_capacity(transactions.len());

        for tx in transactions {
            let order_period = tx.order_period();
            let cohort_month = first
                .get(tx.customer_id.as_str())
                .copied()
                .unwrap_or(order_period);
            let cohort_index = u32::try_from(order_period.months_since(cohort_month)).unwrap_or(0);

            active
                .entry(cohort_month)
                .or_default()
                .entry(cohort_index)
                .or_default()
                .insert(tx.customer_id.as_str());

            assignments.push(CohortAssignment {
                cohort_month,
                order_period,
                cohort_index,
            });
        }

        let width = active
            .values()
            .filter_map(|by_index| by_index.keys().next_back())
            .max()
            .map_or(0, |&max| max as usize + 1);

        let mut cohorts = Vec::with_capacity(active.len());
        let mut size_cells = Vec::with_capacity(active.len());
        let mut retention_cells = Vec::with_capacity(active.len());

        for (cohort, by_index) in &active {
            let mut sizes = vec![None; width];
            for (&index, customers) in by_index {
                sizes[index as usize] = Some(customers.len());
            }

            let retention = match sizes.first().copied().flatten() {
                Some(initial) if initial > 0 => sizes
                    .iter()
                    .map(|cell| cell.map(|count| count as f64 / initial as f64))
                    .collect(),
                _ => vec![None; width],
            };

            cohorts.push(*cohort);
            size_cells.push(sizes);
            retention_cells.push(retention);
        }

        Self {
            assignments,
            sizes: CohortMatrix {
                cohorts: cohorts.clone(),
                width,
                cells: size_cells,
            },
            retention: CohortMatrix {
                cohorts,
                width,
                cells: retention_cells,
            },
        }
    }

    /// Writes each row's cohort month and index onto the table it was computed from.
    pub fn annotate(&self, mut transactions: Vec<Transaction>) -> Vec<Transaction> {
        for (tx, assignment) in transactions.iter_mut().zip(&self.assignments) {
            tx.cohort_month = Some(assignment.cohort_month);
            tx.cohort_index = Some(assignment.cohort_index);
        }
        transactions
    }
}
