//! Census unit loading with schema mapping.
//!
//! The census file is a `GeoJSON` `FeatureCollection` whose properties use
//! the publisher's long column names. The city's [`SchemaMapping`] drops
//! unwanted columns and renames the rest onto [`CensusAttribute`]s;
//! anything left over is kept as a pass-through column.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crime_census_geography_models::{CensusAttribute, CensusAttributes, CensusUnit};
use crime_census_source_models::{CityDefinition, FileFormat, SchemaMapping};
use geo::MultiPolygon;

use crate::SourceError;
use crate::reader::{parse_features, read_payload};

/// Reads a city's census roster from `input_dir`.
///
/// Units keep file order. Geometry stays in the census source CRS.
///
/// # Errors
///
/// Returns [`SourceError`] if the file cannot be read, a required or
/// dropped column is absent, a geometry is not polygonal, a value is not
/// numeric, or a unit name repeats.
pub fn load_census(city: &CityDefinition, input_dir: &Path) -> Result<Vec<CensusUnit>, SourceError> {
    let config = &city.census;
    let path = input_dir.join(&config.file);
    log::info!("[{}] Reading census units from {}", city.id, path.display());

    let payload = read_payload(&path, config.compression, FileFormat::Geojson)?;
    let features = parse_features(&payload, &config.file)?;
    let units = units_from_features(features, &city.schema, &config.name_field, &config.file)?;

    log::info!("[{}] Loaded {} census units", city.id, units.len());
    Ok(units)
}

/// How a canonical attribute is located in the source columns.
struct AttributeColumn {
    attribute: CensusAttribute,
    column: String,
}

/// Builds census units from `GeoJSON` features. No features yields an
/// empty roster; column checks apply only once there is a unit to check.
///
/// # Errors
///
/// See [`load_census`].
pub fn units_from_features(
    features: Vec<geojson::Feature>,
    schema: &SchemaMapping,
    name_field: &str,
    file: &str,
) -> Result<Vec<CensusUnit>, SourceError> {
    if features.is_empty() {
        log::warn!("{file}: no census units");
        return Ok(Vec::new());
    }

    let columns: BTreeSet<String> = features
        .iter()
        .filter_map(|f| f.properties.as_ref())
        .flat_map(|props| props.keys().cloned())
        .collect();

    if !columns.contains(name_field) {
        return Err(SourceError::MissingColumn {
            file: file.to_string(),
            column: name_field.to_string(),
        });
    }

    if let Some(missing) = schema.drop.iter().find(|c| !columns.contains(*c)) {
        return Err(SourceError::MissingColumn {
            file: file.to_string(),
            column: missing.clone(),
        });
    }

    let attribute_columns = resolve_attribute_columns(schema, &columns, file)?;
    let consumed: BTreeSet<&str> = attribute_columns
        .iter()
        .map(|a| a.column.as_str())
        .chain(schema.drop.iter().map(String::as_str))
        .chain(std::iter::once(name_field))
        .collect();
    let passthrough_columns: Vec<&String> = columns
        .iter()
        .filter(|c| !consumed.contains(c.as_str()))
        .collect();

    if !passthrough_columns.is_empty() {
        log::debug!("{file}: pass-through columns {passthrough_columns:?}");
    }

    let mut seen = BTreeSet::new();
    let mut units = Vec::with_capacity(features.len());
    let empty = serde_json::Map::new();

    for (i, feature) in features.into_iter().enumerate() {
        let props = feature.properties.as_ref().unwrap_or(&empty);

        let name = match props.get(name_field) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            other => {
                return Err(SourceError::InvalidValue {
                    file: file.to_string(),
                    column: name_field.to_string(),
                    feature: format!("feature {i}"),
                    value: other.map_or_else(|| "missing".to_string(), ToString::to_string),
                });
            }
        };

        if !seen.insert(name.clone()) {
            return Err(SourceError::DuplicateUnit {
                file: file.to_string(),
                name,
            });
        }

        let mut attributes = CensusAttributes::default();
        for mapping in &attribute_columns {
            let value = numeric_cell(props.get(&mapping.column)).ok_or_else(|| {
                SourceError::InvalidValue {
                    file: file.to_string(),
                    column: mapping.column.clone(),
                    feature: name.clone(),
                    value: props
                        .get(&mapping.column)
                        .map_or_else(String::new, ToString::to_string),
                }
            })?;
            attributes.set(mapping.attribute, value);
        }

        let passthrough: BTreeMap<String, serde_json::Value> = passthrough_columns
            .iter()
            .map(|c| {
                let value = props.get(*c).cloned().unwrap_or(serde_json::Value::Null);
                ((*c).clone(), value)
            })
            .collect();

        let geometry = polygonal_geometry(feature.geometry, file, &name)?;

        units.push(CensusUnit {
            name,
            geometry,
            attributes,
            passthrough,
        });
    }

    Ok(units)
}

/// Pairs every canonical attribute with the source column that feeds it:
/// a rename-table source column when present, otherwise a column already
/// carrying the canonical name.
fn resolve_attribute_columns(
    schema: &SchemaMapping,
    columns: &BTreeSet<String>,
    file: &str,
) -> Result<Vec<AttributeColumn>, SourceError> {
    let mut by_attribute: BTreeMap<CensusAttribute, String> = BTreeMap::new();

    for (source, target) in &schema.rename {
        let attribute = target
            .parse::<CensusAttribute>()
            .map_err(|_| SourceError::Config {
                name: schema.id.clone(),
                message: format!("'{source}' renames to unknown attribute '{target}'"),
            })?;
        if columns.contains(source) {
            by_attribute.insert(attribute, source.clone());
        }
    }

    CensusAttribute::ALL
        .into_iter()
        .map(|attribute| {
            let column = by_attribute.remove(&attribute).or_else(|| {
                let canonical = attribute.as_ref();
                columns.contains(canonical).then(|| canonical.to_string())
            });

            column
                .map(|column| AttributeColumn { attribute, column })
                .ok_or_else(|| SourceError::MissingColumn {
                    file: file.to_string(),
                    column: schema
                        .rename
                        .iter()
                        .find(|(_, target)| target.as_str() == attribute.as_ref())
                        .map_or_else(|| attribute.as_ref().to_string(), |(s, _)| s.clone()),
                })
        })
        .collect()
}

/// Interprets a property cell as a nullable number.
///
/// Returns `None` for values that are neither numeric nor null, and
/// `Some(None)` for nulls, blanks and absent keys.
#[allow(clippy::option_option)]
fn numeric_cell(value: Option<&serde_json::Value>) -> Option<Option<f64>> {
    match value {
        None | Some(serde_json::Value::Null) => Some(None),
        Some(serde_json::Value::Number(n)) => Some(n.as_f64()),
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("nan") || s.eq_ignore_ascii_case("na") {
                Some(None)
            } else {
                s.parse::<f64>().ok().map(Some)
            }
        }
        Some(_) => None,
    }
}

/// Converts a feature geometry into a [`MultiPolygon`].
fn polygonal_geometry(
    geometry: Option<geojson::Geometry>,
    file: &str,
    name: &str,
) -> Result<MultiPolygon<f64>, SourceError> {
    let malformed = |message: String| SourceError::MalformedGeometry {
        file: file.to_string(),
        feature: name.to_string(),
        message,
    };

    let geometry = geometry.ok_or_else(|| malformed("geometry is null".to_string()))?;
    let geometry: geo::Geometry<f64> = geometry
        .try_into()
        .map_err(|e: geojson::Error| malformed(e.to_string()))?;

    match geometry {
        geo::Geometry::MultiPolygon(mp) if !mp.0.is_empty() => Ok(mp),
        geo::Geometry::Polygon(p) => Ok(MultiPolygon(vec![p])),
        geo::Geometry::MultiPolygon(_) => Err(malformed("empty MultiPolygon".to_string())),
        other => Err(malformed(format!(
            "expected Polygon or MultiPolygon, found {}",
            geometry_kind(&other)
        ))),
    }
}

const fn geometry_kind(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}
