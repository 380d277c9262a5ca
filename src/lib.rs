//! Retail transactions analytics: load and clean an order-line table, attach
//! cached city coordinates, and derive customer metrics and monthly cohort
//! retention for a dashboard to filter and draw.

pub mod cohort;
pub mod config;
pub mod coords;
pub mod error;
pub mod export;
pub mod geocode;
pub mod loader;
pub mod metrics;
pub mod pipeline;
pub mod record;
pub mod view;

pub use cohort::{CohortAnalysis, CohortAssignment, CohortMatrix};
pub use config::Settings;
pub use coords::{CacheSource, CoordinateCache};
pub use error::{GeocodeError, PipelineError, Result};
pub use geocode::{Geocoder, NominatimGeocoder, OfflineGeocoder};
pub use loader::{LoadOutcome, LoadStats};
pub use metrics::{BusinessMetrics, CustomerAggregate, CustomerValue};
pub use pipeline::{Dataset, DatasetCache, SourceKey};
pub use record::{CityKey, Coordinates, Transaction, YearMonth};
pub use view::{DashboardView, FilterSpec};
