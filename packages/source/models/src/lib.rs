#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Per-city source configuration types.
//!
//! A [`CityDefinition`] captures everything that differs between cities:
//! where the incident and census files live and how to read them, which
//! reference systems to use, how census columns are renamed and pruned,
//! and which incidents are admitted. The pipeline itself is identical for
//! every city.

use std::collections::BTreeMap;

use crime_census_geography_models::Crs;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

// ── City definition ──────────────────────────────────────────────────────

/// A city's configuration as written in its TOML file.
///
/// The census schema is referenced by id; see [`CityDefinition::resolve`].
#[derive(Debug, Clone, Deserialize)]
pub struct CityConfig {
    /// Short identifier, also used as the output file suffix (e.g. `"van"`).
    pub id: String,
    /// Human-readable name (e.g. `"Vancouver"`).
    pub name: String,
    /// Incident file settings.
    pub incidents: IncidentSourceConfig,
    /// Census unit file settings.
    pub census: CensusSourceConfig,
    /// Reference systems used while processing this city.
    pub crs: CrsPlan,
    /// Incident admission rules.
    pub filter: FilterRules,
}

/// A fully resolved city definition with its census schema attached.
#[derive(Debug, Clone)]
pub struct CityDefinition {
    /// Short identifier (e.g. `"tor"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Incident file settings.
    pub incidents: IncidentSourceConfig,
    /// Census unit file settings.
    pub census: CensusSourceConfig,
    /// Column rename table and drop list for the census file.
    pub schema: SchemaMapping,
    /// Reference systems used while processing this city.
    pub crs: CrsPlan,
    /// Incident admission rules.
    pub filter: FilterRules,
}

/// Returned when a city references a schema other than the one supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMismatchError {
    /// City id.
    pub city: String,
    /// Schema id the city asked for.
    pub expected: String,
    /// Schema id that was supplied.
    pub actual: String,
}

impl std::fmt::Display for SchemaMismatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "city '{}' uses census schema '{}' but '{}' was supplied",
            self.city, self.expected, self.actual
        )
    }
}

impl std::error::Error for SchemaMismatchError {}

impl CityDefinition {
    /// Attaches the census schema a [`CityConfig`] refers to.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaMismatchError`] if `schema.id` is not the schema the
    /// city config names.
    pub fn resolve(config: CityConfig, schema: SchemaMapping) -> Result<Self, SchemaMismatchError> {
        if config.census.schema != schema.id {
            return Err(SchemaMismatchError {
                city: config.id,
                expected: config.census.schema,
                actual: schema.id,
            });
        }

        Ok(Self {
            id: config.id,
            name: config.name,
            incidents: config.incidents,
            census: config.census,
            schema,
            crs: config.crs,
            filter: config.filter,
        })
    }

    /// File name of this city's output (e.g. `crime_census_van.geojson`).
    #[must_use]
    pub fn output_filename(&self) -> String {
        format!("crime_census_{}.geojson", self.id)
    }
}

// ── Files ────────────────────────────────────────────────────────────────

/// Container format of an input file.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FileFormat {
    /// Delimited text with a header row.
    Csv,
    /// A `GeoJSON` `FeatureCollection`.
    Geojson,
}

impl FileFormat {
    /// File extension used to locate the payload inside a zip archive.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => ".csv",
            Self::Geojson => ".geojson",
        }
    }
}

/// Compression wrapped around an input file.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Compression {
    /// Plain file.
    #[default]
    None,
    /// Single-member gzip stream.
    Gzip,
    /// Zip archive; the first entry with the format's extension is read.
    Zip,
}

/// Where an incident's coordinates come from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocationExtractor {
    /// Two numeric columns.
    Columns {
        /// Column holding the x coordinate (easting or longitude).
        x: String,
        /// Column holding the y coordinate (northing or latitude).
        y: String,
    },
    /// The feature's point geometry (`GeoJSON` only).
    Geometry,
}

/// How to read a city's incident file.
#[derive(Debug, Clone, Deserialize)]
pub struct IncidentSourceConfig {
    /// File name relative to the input directory.
    pub file: String,
    /// Payload format.
    pub format: FileFormat,
    /// Compression around the payload.
    #[serde(default)]
    pub compression: Compression,
    /// CSV field delimiter (default: comma).
    pub delimiter: Option<String>,
    /// Coordinate source.
    pub location: LocationExtractor,
    /// Native reference system of the coordinates.
    pub crs: Crs,
}

/// How to read a city's census unit file.
#[derive(Debug, Clone, Deserialize)]
pub struct CensusSourceConfig {
    /// File name relative to the input directory.
    pub file: String,
    /// Compression around the `GeoJSON` payload.
    #[serde(default)]
    pub compression: Compression,
    /// Reference system of the unit polygons.
    pub crs: Crs,
    /// Property holding the unit identifier.
    #[serde(default = "default_name_field")]
    pub name_field: String,
    /// Id of the [`SchemaMapping`] applied to this file.
    pub schema: String,
}

fn default_name_field() -> String {
    "name".to_string()
}

/// Reference systems used while processing a city.
///
/// The working system must be a projected system in which Euclidean
/// distance approximates ground distance for that city. Nothing verifies
/// this: a wrong code silently produces wrong matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CrsPlan {
    /// Metric system for distance computations.
    pub working: Crs,
    /// Geographic system for the emitted output.
    #[serde(default = "default_publication_crs")]
    pub publication: Crs,
}

const fn default_publication_crs() -> Crs {
    Crs::WGS84
}

// ── Census schema ────────────────────────────────────────────────────────

/// Column rename table and drop list for a census unit source.
///
/// Rename targets are canonical attribute names (see
/// `crime_census_geography_models::CensusAttribute`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchemaMapping {
    /// Schema identifier referenced by city configs.
    pub id: String,
    /// Source column name -> canonical attribute name.
    pub rename: BTreeMap<String, String>,
    /// Source columns removed before processing. Each must exist.
    #[serde(default)]
    pub drop: Vec<String>,
}

// ── Filter rules ─────────────────────────────────────────────────────────

/// Incident admission rules for one city.
///
/// These encode cross-dataset incompatibilities (e.g. one city does not
/// report collisions at all, so the others' collisions are excluded) and
/// are not meant as a user-facing policy.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterRules {
    /// How to read the occurrence year.
    pub year: YearExtractor,
    /// Years to keep.
    pub years: Vec<i32>,
    /// Column holding the category label.
    pub category_field: String,
    /// Category labels to exclude (exact match).
    #[serde(default)]
    pub excluded_categories: Vec<String>,
    /// Extra rule for withheld or placeholder coordinates.
    pub coordinates: CoordinateRule,
    /// Property columns the coordinate rule reads. When unset, the rule
    /// sees the coordinates of the city's [`LocationExtractor`].
    #[serde(default)]
    pub coordinate_fields: Option<CoordinateFields>,
}

/// A pair of property columns holding raw coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoordinateFields {
    /// Column holding the x coordinate.
    pub x: String,
    /// Column holding the y coordinate.
    pub y: String,
}

impl FilterRules {
    /// Whether incidents from `year` are kept.
    #[must_use]
    pub fn admits_year(&self, year: i32) -> bool {
        self.years.contains(&year)
    }

    /// Whether incidents labelled `category` are kept.
    #[must_use]
    pub fn admits_category(&self, category: &str) -> bool {
        !self.excluded_categories.iter().any(|c| c == category)
    }
}

/// How to read the occurrence year from a record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum YearExtractor {
    /// Integer year column.
    Integer {
        /// Column name.
        field: String,
    },
    /// Date or datetime column; the year is taken from the parsed date.
    Date {
        /// Column name.
        field: String,
        /// `chrono` format string; defaults to `%Y-%m-%d` on the leading
        /// date portion.
        format: Option<String>,
    },
}

impl YearExtractor {
    /// Column the year is read from.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Integer { field } | Self::Date { field, .. } => field,
        }
    }
}

/// Per-city check on raw coordinates, applied before the finiteness check.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CoordinateRule {
    /// `x > 0 || y > 0`. Withheld locations are published as zeros.
    AnyPositive,
    /// `x < 0 || y > 0`. Longitude must be west or latitude north.
    WestOrNorth,
    /// Either coordinate is present.
    Present,
}

impl CoordinateRule {
    /// Whether a raw coordinate pair passes this rule. Missing values
    /// never satisfy a comparison.
    #[must_use]
    pub fn accepts(self, x: Option<f64>, y: Option<f64>) -> bool {
        match self {
            Self::AnyPositive => x.is_some_and(|v| v > 0.0) || y.is_some_and(|v| v > 0.0),
            Self::WestOrNorth => x.is_some_and(|v| v < 0.0) || y.is_some_and(|v| v > 0.0),
            Self::Present => x.is_some() || y.is_some(),
        }
    }
}
