use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info};

use crate::cohort::CohortAnalysis;
use crate::config::Settings;
use crate::coords::{self, CacheSource};
use crate::error::{PipelineError, Result};
use crate::geocode::Geocoder;
use crate::loader::{self, LoadStats};
use crate::metrics::BusinessMetrics;
use crate::record::Transaction;

/// Everything derived from one load. Built once, then only read.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub transactions: Vec<Transaction>,
    pub stats: LoadStats,
    pub coords: CoordsSummary,
    pub metrics: BusinessMetrics,
    pub cohorts: CohortAnalysis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordsSummary {
    pub source: CacheSource,
    pub places: usize,
    pub unresolved_places: usize,
    pub rows_without_coordinates: usize,
}

impl Dataset {
    pub fn load(settings: &Settings, geocoder: &dyn Geocoder) -> Result<Self> {
        build(
            &settings.input_path,
            &settings.coords_path,
            geocoder,
            settings.geocoder.pause(),
        )
    }
}

/// load → clean → join coordinates → metrics → cohorts.
pub fn build(
    input_path: &Path,
    coords_path: &Path,
    geocoder: &dyn Geocoder,
    pause: Duration,
) -> Result<Dataset> {
    let loader::LoadOutcome {
        transactions,
        stats,
    } = loader::load_transactions(input_path)?;

    let (cache, source) = coords::load_or_build(coords_path, &transactions, geocoder, pause)?;
    let transactions = cache.join(transactions);

    let coords = CoordsSummary {
        source,
        places: cache.len(),
        unresolved_places: cache.entries().iter().filter(|(_, c)| c.is_none()).count(),
        rows_without_coordinates: transactions
            .iter()
            .filter(|tx| tx.coordinates().is_none())
            .count(),
    };
    debug!(?coords, "joined coordinates");

    let metrics = BusinessMetrics::compute(&transactions);
    let cohorts = CohortAnalysis::compute(&transactions);
    let transactions = cohorts.annotate(transactions);

    info!(
        rows = transactions.len(),
        customers = metrics.total_customers,
        cohorts = cohorts.retention.cohorts.len(),
        "pipeline completed"
    );

    Ok(Dataset {
        transactions,
        stats,
        coords,
        metrics,
        cohorts,
    })
}

/// Identity of an input file: path plus modification signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceKey {
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
    pub len: u64,
}

impl SourceKey {
    pub fn of(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path).map_err(|err| PipelineError::read(path, err))?;
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(Self {
            path,
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

/// Holds the last built dataset and rebuilds only when the input changes.
#[derive(Debug, Default)]
pub struct DatasetCache {
    held: Option<(SourceKey, Arc<Dataset>)>,
}

impl DatasetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build<F>(&mut self, input_path: &Path, build: F) -> Result<Arc<Dataset>>
    where
        F: FnOnce() -> Result<Dataset>,
    {
        let key = SourceKey::of(input_path)?;
        if let Some((held_key, dataset)) = &self.held {
            if *held_key == key {
                debug!(path = %input_path.display(), "reusing held dataset");
                return Ok(Arc::clone(dataset));
            }
        }

        let dataset = Arc::new(build()?);
        self.held = Some((key, Arc::clone(&dataset)));
        Ok(dataset)
    }

    pub fn get_or_load(
        &mut self,
        settings: &Settings,
        geocoder: &dyn Geocoder,
    ) -> Result<Arc<Dataset>> {
        self.get_or_build(&settings.input_path, || Dataset::load(settings, geocoder))
    }
}
