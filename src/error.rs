use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path} is missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: String },

    #[error("coordinate cache {path} is malformed: {reason}")]
    CacheFormat { path: PathBuf, reason: String },

    #[error("geocoder setup failed: {0}")]
    Geocoder(#[from] GeocodeError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl PipelineError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a single lookup. Recovered per place during a cache build.
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("response is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected response: {0}")]
    Response(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
