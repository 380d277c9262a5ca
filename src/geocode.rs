use reqwest::blocking::Client;
use serde::Deserialize;

use crate::config::GeocoderSettings;
use crate::error::GeocodeError;
use crate::record::Coordinates;

/// Resolves a free-text place query to coordinates.
///
/// `Ok(None)` means the service answered but knows no such place.
pub trait Geocoder {
    fn geocode(&self, query: &str) -> Result<Option<Coordinates>, GeocodeError>;
}

/// OpenStreetMap Nominatim search endpoint over blocking HTTP.
pub struct NominatimGeocoder {
    client: Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

impl NominatimGeocoder {
    pub fn new(settings: &GeocoderSettings) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.timeout())
            .build()?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
        })
    }
}

impl Geocoder for NominatimGeocoder {
    fn geocode(&self, query: &str) -> Result<Option<Coordinates>, GeocodeError> {
        let body = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()?
            .error_for_status()?
            .text()?;
        parse_search_response(&body)
    }
}

/// Takes the first place of a search response. Coordinates arrive as strings.
pub fn parse_search_response(body: &str) -> Result<Option<Coordinates>, GeocodeError> {
    let places: Vec<Place> = serde_json::from_str(body)?;

    let Some(place) = places.into_iter().next() else {
        return Ok(None);
    };
    let latitude = place
        .lat
        .trim()
        .parse::<f64>()
        .map_err(|_| GeocodeError::Response(format!("bad latitude '{}'", place.lat)))?;
    let longitude = place
        .lon
        .trim()
        .parse::<f64>()
        .map_err(|_| GeocodeError::Response(format!("bad longitude '{}'", place.lon)))?;

    Ok(Some(Coordinates {
        latitude,
        longitude,
    }))
}

/// Knows no places. Used when lookups are disabled.
pub struct OfflineGeocoder;

impl Geocoder for OfflineGeocoder {
    fn geocode(&self, _query: &str) -> Result<Option<Coordinates>, GeocodeError> {
        Ok(None)
    }
}

pub fn from_settings(settings: &GeocoderSettings) -> Result<Box<dyn Geocoder>, GeocodeError> {
    if settings.enabled {
        Ok(Box::new(NominatimGeocoder::new(settings)?))
    } else {
        Ok(Box::new(OfflineGeocoder))
    }
}
