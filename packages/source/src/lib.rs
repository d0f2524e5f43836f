#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! City registry and input readers.
//!
//! Cities are described by TOML configs baked into the binary (see
//! [`registry`]). Incident files are read as generic records and filtered
//! by the city's rule table ([`incidents`]); census files are read as
//! `GeoJSON` and mapped onto the canonical attribute schema ([`census`]).

pub mod census;
pub mod incidents;
pub mod progress;
pub mod reader;
pub mod registry;

/// Errors that can occur while reading or interpreting source data.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// A file could not be opened or read.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File that failed.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// CSV parsing failed.
    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// `GeoJSON` parsing failed.
    #[error("GeoJSON parse error: {0}")]
    Geojson(#[from] geojson::Error),

    /// Zip archive could not be read.
    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A text payload is not valid UTF-8.
    #[error("{file}: payload is not UTF-8: {source}")]
    Encoding {
        /// Source file.
        file: String,
        /// Underlying error.
        #[source]
        source: std::str::Utf8Error,
    },

    /// An embedded or supplied configuration is invalid.
    #[error("Invalid config '{name}': {message}")]
    Config {
        /// Config identifier.
        name: String,
        /// Description of what went wrong.
        message: String,
    },

    /// A city id is not in the registry.
    #[error("Unknown city '{0}'")]
    UnknownCity(String),

    /// A zip archive has no entry of the expected format.
    #[error("{file}: no '{extension}' entry in archive")]
    MissingEntry {
        /// Archive path.
        file: String,
        /// Extension searched for.
        extension: String,
    },

    /// An expected column is absent from a source file.
    #[error("{file}: missing column '{column}'")]
    MissingColumn {
        /// Source file.
        file: String,
        /// Column name.
        column: String,
    },

    /// A geometry is missing or of the wrong type.
    #[error("{file}: malformed geometry for '{feature}': {message}")]
    MalformedGeometry {
        /// Source file.
        file: String,
        /// Feature identifier (name or position).
        feature: String,
        /// Description of what went wrong.
        message: String,
    },

    /// A unit name appears more than once in a roster.
    #[error("{file}: duplicate unit name '{name}'")]
    DuplicateUnit {
        /// Source file.
        file: String,
        /// Repeated name.
        name: String,
    },

    /// A cell value cannot be interpreted.
    #[error("{file}: invalid value for '{column}' in '{feature}': {value}")]
    InvalidValue {
        /// Source file.
        file: String,
        /// Column name.
        column: String,
        /// Feature identifier (name or position).
        feature: String,
        /// Offending value, rendered as JSON.
        value: String,
    },
}

impl SourceError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
