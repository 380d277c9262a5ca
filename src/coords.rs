use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::geocode::Geocoder;
use crate::loader::decode_record;
use crate::record::{CityKey, Coordinates, Transaction};

#[derive(Debug, Serialize, Deserialize)]
struct CacheRow {
    #[serde(rename = "City")]
    city: String,
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "Latitude")]
    latitude: Option<f64>,
    #[serde(rename = "Longitude")]
    longitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    Loaded,
    Built,
}

/// (city, state) to coordinates, in first-seen order. `None` marks a place
/// the geocoder could not resolve.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinateCache {
    entries: Vec<(CityKey, Option<Coordinates>)>,
    index: HashMap<CityKey, usize>,
}

impl CoordinateCache {
    fn insert(&mut self, key: CityKey, coordinates: Option<Coordinates>) -> bool {
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, coordinates));
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(CityKey, Option<Coordinates>)] {
        &self.entries
    }

    pub fn get(&self, key: &CityKey) -> Option<Coordinates> {
        self.index.get(key).and_then(|&idx| self.entries[idx].1)
    }

    pub fn contains(&self, key: &CityKey) -> bool {
        self.index.contains_key(key)
    }

    /// Reads a persisted cache. A missing file is `Ok(None)`.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(PipelineError::read(path, err)),
        };
        let format_error = |reason: String| PipelineError::CacheFormat {
            path: path.to_path_buf(),
            reason,
        };

        let mut reader = ReaderBuilder::new().from_reader(bytes.as_slice());
        let headers = decode_record(
            reader
                .byte_headers()
                .map_err(|err| format_error(err.to_string()))?,
        );
        let mut cache = Self::default();
        for record in reader.byte_records() {
            let record = decode_record(&record.map_err(|err| format_error(err.to_string()))?);
            let row: CacheRow = record
                .deserialize(Some(&headers))
                .map_err(|err| format_error(err.to_string()))?;
            let coordinates = match (row.latitude, row.longitude) {
                (Some(latitude), Some(longitude)) => Some(Coordinates {
                    latitude,
                    longitude,
                }),
                _ => None,
            };
            let key = CityKey::new(row.city.trim(), row.state.trim());
            if !cache.insert(key.clone(), coordinates) {
                warn!(
                    city = %key.city,
                    state = %key.state,
                    "duplicate coordinate cache entry ignored"
                );
            }
        }

        Ok(Some(cache))
    }

    /// Looks up each distinct place once, sequentially, pausing between calls.
    /// Failed or empty lookups are recorded as unresolved.
    pub fn build<I>(places: I, geocoder: &dyn Geocoder, pause: Duration) -> Self
    where
        I: IntoIterator<Item = CityKey>,
    {
        let mut cache = Self::default();
        let mut lookups = 0_usize;
        let mut resolved = 0_usize;

        for key in places {
            if cache.contains(&key) {
                continue;
            }
            if lookups > 0 && !pause.is_zero() {
                thread::sleep(pause);
            }
            lookups += 1;

            let query = key.query();
            let coordinates = match geocoder.geocode(&query) {
                Ok(Some(coordinates)) => {
                    resolved += 1;
                    Some(coordinates)
                }
                Ok(None) => {
                    debug!(%query, "place not found");
                    None
                }
                Err(err) => {
                    warn!(%query, error = %err, "geocoding failed");
                    None
                }
            };
            cache.insert(key, coordinates);
        }

        info!(lookups, resolved, "coordinate cache built");
        cache
    }

    /// Writes the whole cache to a sibling temp file, then renames it over `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| PipelineError::write(parent, err))?;
        }

        let tmp_path = temp_sibling(path);
        let mut writer = WriterBuilder::new()
            .from_path(&tmp_path)
            .map_err(|err| PipelineError::csv(&tmp_path, err))?;
        for (key, coordinates) in &self.entries {
            writer
                .serialize(CacheRow {
                    city: key.city.clone(),
                    state: key.state.clone(),
                    latitude: coordinates.map(|c| c.latitude),
                    longitude: coordinates.map(|c| c.longitude),
                })
                .map_err(|err| PipelineError::csv(&tmp_path, err))?;
        }
        if self.entries.is_empty() {
            writer
                .write_record(["City", "State", "Latitude", "Longitude"])
                .map_err(|err| PipelineError::csv(&tmp_path, err))?;
        }
        writer
            .flush()
            .map_err(|err| PipelineError::write(&tmp_path, err))?;
        drop(writer);

        fs::rename(&tmp_path, path).map_err(|err| PipelineError::write(path, err))
    }

    /// Left join: every transaction is kept, unresolved places keep `None`.
    pub fn join(&self, transactions: Vec<Transaction>) -> Vec<Transaction> {
        transactions
            .into_iter()
            .map(|mut tx| {
                let coordinates = self.get(&tx.city_key());
                tx.latitude = coordinates.map(|c| c.latitude);
                tx.longitude = coordinates.map(|c| c.longitude);
                tx
            })
            .collect()
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Distinct (city, state) pairs in first-seen order.
pub fn distinct_places(transactions: &[Transaction]) -> Vec<CityKey> {
    let mut seen = HashSet::new();
    transactions
        .iter()
        .map(Transaction::city_key)
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

/// Uses the cache at `path` as-is when present; otherwise builds it from the
/// transactions' places and persists it.
pub fn load_or_build(
    path: &Path,
    transactions: &[Transaction],
    geocoder: &dyn Geocoder,
    pause: Duration,
) -> Result<(CoordinateCache, CacheSource)> {
    if let Some(cache) = CoordinateCache::read(path)? {
        info!(entries = cache.len(), path = %path.display(), "using existing coordinate cache");
        return Ok((cache, CacheSource::Loaded));
    }

    let places = distinct_places(transactions);
    info!(places = places.len(), "coordinate cache missing, geocoding places");
    let cache = CoordinateCache::build(places, geocoder, pause);
    cache.write(path)?;
    info!(path = %path.display(), "coordinate cache written");
    Ok((cache, CacheSource::Built))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeocodeError;
    use std::cell::RefCell;
    use std::time::Instant;

    struct Scripted {
        calls: RefCell<Vec<String>>,
        called_at: RefCell<Vec<Instant>>,
    }

    impl Geocoder for Scripted {
        fn geocode(&self, query: &str) -> std::result::Result<Option<Coordinates>, GeocodeError> {
            self.calls.borrow_mut().push(query.to_string());
            self.called_at.borrow_mut().push(Instant::now());
            match query {
                "Henderson, Kentucky" => Ok(Some(Coordinates {
                    latitude: 37.8361,
                    longitude: -87.5900,
                })),
                "Nowhere, Texas" => Ok(None),
                _ => Err(GeocodeError::Response("boom".to_string())),
            }
        }
    }

    fn scripted() -> Scripted {
        Scripted {
            calls: RefCell::new(Vec::new()),
            called_at: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn build_pauses_between_successive_lookups() {
        let geocoder = scripted();
        let pause = Duration::from_millis(20);
        let places = vec![
            CityKey::new("Henderson", "Kentucky"),
            CityKey::new("Nowhere", "Texas"),
            CityKey::new("Broken", "Utah"),
        ];

        let started = Instant::now();
        CoordinateCache::build(places, &geocoder, pause);
        assert!(started.elapsed() >= Duration::from_millis(40));

        let called_at = geocoder.called_at.borrow();
        assert_eq!(called_at.len(), 3);
        for pair in called_at.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= pause);
        }
    }

    #[test]
    fn repeated_places_do_not_add_pauses() {
        let geocoder = scripted();
        let places = vec![
            CityKey::new("Henderson", "Kentucky"),
            CityKey::new("Henderson", "Kentucky"),
            CityKey::new("Henderson", "Kentucky"),
        ];
        let cache = CoordinateCache::build(places, &geocoder, Duration::from_millis(20));
        assert_eq!(cache.len(), 1);
        assert_eq!(geocoder.called_at.borrow().len(), 1);
    }

    #[test]
    fn build_records_failures_as_unresolved() {
        let geocoder = scripted();
        let places = vec![
            CityKey::new("Henderson", "Kentucky"),
            CityKey::new("Nowhere", "Texas"),
            CityKey::new("Broken", "Utah"),
            CityKey::new("Henderson", "Kentucky"),
        ];
        let cache = CoordinateCache::build(places, &geocoder, Duration::ZERO);

        assert_eq!(cache.len(), 3);
        assert_eq!(geocoder.calls.borrow().len(), 3);
        assert!(cache.get(&CityKey::new("Henderson", "Kentucky")).is_some());
        assert!(cache.contains(&CityKey::new("Nowhere", "Texas")));
        assert_eq!(cache.get(&CityKey::new("Nowhere", "Texas")), None);
        assert_eq!(cache.get(&CityKey::new("Broken", "Utah")), None);
    }

    #[test]
    fn write_then_read_preserves_entries_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("city_coordinates.csv");
        let geocoder = scripted();
        let cache = CoordinateCache::build(
            vec![CityKey::new("Nowhere", "Texas"), CityKey::new("Henderson", "Kentucky")],
            &geocoder,
            Duration::ZERO,
        );
        cache.write(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("City,State,Latitude,Longitude\n"));
        assert!(text.contains("Nowhere,Texas,,\n"));
        assert!(!dir.path().join("nested").join("city_coordinates.csv.tmp").exists());

        let reread = CoordinateCache::read(&path).unwrap().unwrap();
        assert_eq!(reread, cache);
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CoordinateCache::read(&dir.path().join("absent.csv")).unwrap().is_none());
    }

    #[test]
    fn duplicate_keys_keep_first_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coords.csv");
        fs::write(
            &path,
            "City,State,Latitude,Longitude\nAustin,Texas,30.27,-97.74\nAustin,Texas,1.0,2.0\n",
        )
        .unwrap();
        let cache = CoordinateCache::read(&path).unwrap().unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get(&CityKey::new("Austin", "Texas")),
            Some(Coordinates {
                latitude: 30.27,
                longitude: -97.74
            })
        );
    }

    #[test]
    fn cache_fields_decode_independently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coords.csv");
        let mut bytes = "City,State,Latitude,Longitude\nSão Paulo,SP,-23.55,-46.63\n"
            .as_bytes()
            .to_vec();
        bytes.extend_from_slice(b"Bogot\xe1,DC,4.71,-74.07\n");
        fs::write(&path, bytes).unwrap();

        let cache = CoordinateCache::read(&path).unwrap().unwrap();
        assert!(cache.contains(&CityKey::new("São Paulo", "SP")));
        assert!(cache.contains(&CityKey::new("Bogotá", "DC")));
    }

    #[test]
    fn malformed_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coords.csv");
        fs::write(&path, "City,State,Latitude,Longitude\nAustin,Texas,north,west\n").unwrap();
        assert!(matches!(
            CoordinateCache::read(&path),
            Err(PipelineError::CacheFormat { .. })
        ));
    }
}
