//! Incident extraction and filtering.
//!
//! Each raw record (a CSV row or a `GeoJSON` feature) is checked against
//! the city's [`FilterRules`] in a fixed order: occurrence year, the
//! city's coordinate rule, coordinate finiteness, then category. The
//! coordinate rule reads either the extracted location or, when the city
//! names them, separate property columns. Records that pass become
//! [`Incident`]s in the source's native CRS.

use std::path::Path;

use chrono::{Datelike as _, NaiveDate, NaiveDateTime};
use crime_census_geography_models::Incident;
use crime_census_source_models::{
    CityDefinition, FileFormat, FilterRules, IncidentSourceConfig, LocationExtractor,
    YearExtractor,
};

use crate::SourceError;
use crate::reader::{parse_csv_records, parse_features, read_payload};

/// A source record before filtering.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Attribute columns (CSV cells or `GeoJSON` properties).
    pub properties: serde_json::Value,
    /// Feature geometry, when the source carries one.
    pub geometry: Option<geojson::Geometry>,
}

impl RawRecord {
    /// Wraps a CSV row.
    #[must_use]
    pub const fn from_row(row: serde_json::Value) -> Self {
        Self {
            properties: row,
            geometry: None,
        }
    }

    /// Wraps a `GeoJSON` feature.
    #[must_use]
    pub fn from_feature(feature: geojson::Feature) -> Self {
        Self {
            properties: feature
                .properties
                .map_or(serde_json::Value::Null, serde_json::Value::Object),
            geometry: feature.geometry,
        }
    }
}

/// Counts of records seen and dropped at each filter step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Records read from the file.
    pub read: u64,
    /// Dropped: year missing or not in the admitted list.
    pub wrong_year: u64,
    /// Dropped: coordinate rule failed or coordinates not finite.
    pub bad_location: u64,
    /// Dropped: category on the exclusion list.
    pub excluded_category: u64,
    /// Records kept.
    pub kept: u64,
}

/// Filtered incidents of one city, in the incident source's native CRS.
#[derive(Debug, Clone)]
pub struct IncidentBatch {
    /// Admitted incidents, in file order.
    pub incidents: Vec<Incident>,
    /// Filtering statistics.
    pub stats: FilterStats,
}

/// Reads and filters a city's incident file from `input_dir`.
///
/// # Errors
///
/// Returns [`SourceError`] if the file cannot be read or parsed, or a
/// record carries a non-point geometry.
pub fn load_incidents(city: &CityDefinition, input_dir: &Path) -> Result<IncidentBatch, SourceError> {
    let config = &city.incidents;
    let path = input_dir.join(&config.file);
    log::info!("[{}] Reading incidents from {}", city.id, path.display());

    let payload = read_payload(&path, config.compression, config.format)?;
    let records = match config.format {
        FileFormat::Csv => {
            let delimiter = config
                .delimiter
                .as_deref()
                .and_then(|d| d.as_bytes().first().copied())
                .unwrap_or(b',');
            parse_csv_records(&payload, delimiter)?
                .into_iter()
                .map(RawRecord::from_row)
                .collect::<Vec<_>>()
        }
        FileFormat::Geojson => parse_features(&payload, &config.file)?
            .into_iter()
            .map(RawRecord::from_feature)
            .collect(),
    };

    let batch = filter_records(&records, config, &city.filter, &config.file)?;
    let stats = batch.stats;
    log::info!(
        "[{}] {} records read, {} kept ({} wrong year, {} bad location, {} excluded category)",
        city.id,
        stats.read,
        stats.kept,
        stats.wrong_year,
        stats.bad_location,
        stats.excluded_category,
    );

    Ok(batch)
}

/// Applies a city's filter rules to raw records.
///
/// # Errors
///
/// Returns [`SourceError::MalformedGeometry`] if a geometry-located record
/// carries something other than a point.
pub fn filter_records(
    records: &[RawRecord],
    config: &IncidentSourceConfig,
    rules: &FilterRules,
    file: &str,
) -> Result<IncidentBatch, SourceError> {
    let mut stats = FilterStats::default();
    let mut incidents = Vec::new();

    for (i, record) in records.iter().enumerate() {
        stats.read += 1;

        let Some(year) = extract_year(&rules.year, &record.properties) else {
            stats.wrong_year += 1;
            continue;
        };
        if !rules.admits_year(year) {
            stats.wrong_year += 1;
            continue;
        }

        let (x, y) = extract_location(&config.location, record, file, i)?;
        let admitted = match &rules.coordinate_fields {
            Some(fields) => rules.coordinates.accepts(
                get_f64(&record.properties, &fields.x),
                get_f64(&record.properties, &fields.y),
            ),
            None => rules.coordinates.accepts(x, y),
        };
        if !admitted {
            stats.bad_location += 1;
            continue;
        }
        let (Some(x), Some(y)) = (x, y) else {
            stats.bad_location += 1;
            continue;
        };
        if !x.is_finite() || !y.is_finite() {
            stats.bad_location += 1;
            continue;
        }

        let category = get_str(&record.properties, &rules.category_field)
            .unwrap_or_default()
            .to_string();
        if !rules.admits_category(&category) {
            stats.excluded_category += 1;
            continue;
        }

        incidents.push(Incident {
            location: geo::Point::new(x, y),
            year,
            category,
        });
    }

    stats.kept = incidents.len() as u64;
    Ok(IncidentBatch { incidents, stats })
}

// ── Field helpers ────────────────────────────────────────────────────────

fn get_str<'a>(record: &'a serde_json::Value, field: &str) -> Option<&'a str> {
    record.get(field)?.as_str()
}

/// Reads a number from a JSON number or a numeric string. Empty strings
/// and nulls are missing.
fn get_f64(record: &serde_json::Value, field: &str) -> Option<f64> {
    match record.get(field)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => {
            let s = s.trim();
            if s.is_empty() { None } else { s.parse().ok() }
        }
        _ => None,
    }
}

fn extract_year(extractor: &YearExtractor, record: &serde_json::Value) -> Option<i32> {
    match extractor {
        YearExtractor::Integer { field } => {
            let value = get_f64(record, field)?;
            #[allow(clippy::cast_possible_truncation)]
            (value.fract() == 0.0 && value.abs() < 10_000.0).then_some(value as i32)
        }
        YearExtractor::Date { field, format } => {
            let raw = get_str(record, field)?.trim();
            match format {
                Some(fmt) => NaiveDateTime::parse_from_str(raw, fmt)
                    .map(|dt| dt.year())
                    .or_else(|_| NaiveDate::parse_from_str(raw, fmt).map(|d| d.year()))
                    .ok(),
                None => NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d")
                    .map(|d| d.year())
                    .ok(),
            }
        }
    }
}

fn extract_location(
    extractor: &LocationExtractor,
    record: &RawRecord,
    file: &str,
    index: usize,
) -> Result<(Option<f64>, Option<f64>), SourceError> {
    match extractor {
        LocationExtractor::Columns { x, y } => Ok((
            get_f64(&record.properties, x),
            get_f64(&record.properties, y),
        )),
        LocationExtractor::Geometry => match record.geometry.as_ref().map(|g| &g.value) {
            None => Ok((None, None)),
            Some(geojson::Value::Point(position)) => {
                Ok((position.first().copied(), position.get(1).copied()))
            }
            Some(other) => Err(SourceError::MalformedGeometry {
                file: file.to_string(),
                feature: format!("record {index}"),
                message: format!("expected Point, found {}", other.type_name()),
            }),
        },
    }
}
