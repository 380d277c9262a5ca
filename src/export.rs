use std::fmt::Display;
use std::fs;
use std::path::Path;

use csv::Writer;
use serde::Serialize;

use crate::cohort::CohortMatrix;
use crate::error::{PipelineError, Result};
use crate::metrics::CustomerAggregate;
use crate::record::Transaction;

fn create_writer(path: &Path) -> Result<Writer<fs::File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| PipelineError::write(parent, err))?;
    }
    Writer::from_path(path).map_err(|err| PipelineError::csv(path, err))
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = create_writer(path)?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|err| PipelineError::csv(path, err))?;
    }
    writer.flush().map_err(|err| PipelineError::write(path, err))
}

pub fn write_transactions(path: &Path, transactions: &[Transaction]) -> Result<()> {
    write_rows(path, transactions)
}

pub fn write_customers(path: &Path, customers: &[CustomerAggregate]) -> Result<()> {
    write_rows(path, customers)
}

/// One row per cohort month, one column per cohort index. Undefined cells
/// are written empty.
pub fn write_matrix<T: Copy + Display>(path: &Path, matrix: &CohortMatrix<T>) -> Result<()> {
    let mut writer = create_writer(path)?;

    let mut header = vec!["Cohort Month".to_string()];
    header.extend((0..matrix.width).map(|idx| idx.to_string()));
    writer
        .write_record(&header)
        .map_err(|err| PipelineError::csv(path, err))?;

    for (cohort, cells) in matrix.rows() {
        let mut record = vec![cohort.to_string()];
        record.extend(
            cells
                .iter()
                .map(|cell| cell.map(|value| value.to_string()).unwrap_or_default()),
        );
        writer
            .write_record(&record)
            .map_err(|err| PipelineError::csv(path, err))?;
    }

    writer.flush().map_err(|err| PipelineError::write(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::YearMonth;

    #[test]
    fn matrix_leaves_undefined_cells_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retention.csv");
        let matrix = CohortMatrix {
            cohorts: vec![YearMonth::new(2017, 1), YearMonth::new(2017, 2)],
            width: 3,
            cells: vec![
                vec![Some(1.0), None, Some(0.5)],
                vec![Some(1.0), None, None],
            ],
        };
        write_matrix(&path, &matrix).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Cohort Month,0,1,2\n2017-01,1,,0.5\n2017-02,1,,\n");
    }
}
