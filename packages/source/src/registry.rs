//! City registry backed by embedded TOML configs.
//!
//! Each `.toml` file in `packages/source/sources/` is baked into the binary
//! at compile time via [`include_str!`], as are the census schema mappings
//! in `packages/source/schemas/`. Cities reference their schema by id and
//! the registry resolves the reference into a [`CityDefinition`].

use crime_census_source_models::{CityConfig, CityDefinition, SchemaMapping};

use crate::SourceError;

/// City TOML configs embedded at compile time, in processing order.
const CITY_TOMLS: &[(&str, &str)] = &[
    ("van", include_str!("../sources/van.toml")),
    ("tor", include_str!("../sources/tor.toml")),
    ("mon", include_str!("../sources/mon.toml")),
];

/// Census schema TOML configs embedded at compile time.
const SCHEMA_TOMLS: &[(&str, &str)] = &[(
    "censusmapper_2021",
    include_str!("../schemas/censusmapper_2021.toml"),
)];

/// Returns every configured city, resolved against its census schema.
///
/// # Errors
///
/// Returns [`SourceError::Config`] if an embedded config is malformed or
/// references an unknown schema.
pub fn all_cities() -> Result<Vec<CityDefinition>, SourceError> {
    let schemas = all_schemas()?;

    CITY_TOMLS
        .iter()
        .map(|(name, toml)| {
            let config = parse_city_toml(name, toml)?;
            let schema = schemas
                .iter()
                .find(|s| s.id == config.census.schema)
                .cloned()
                .ok_or_else(|| SourceError::Config {
                    name: (*name).to_string(),
                    message: format!("unknown census schema '{}'", config.census.schema),
                })?;
            CityDefinition::resolve(config, schema).map_err(|e| SourceError::Config {
                name: (*name).to_string(),
                message: e.to_string(),
            })
        })
        .collect()
}

/// Returns the cities whose ids are listed in `ids`, in registry order.
///
/// # Errors
///
/// Returns [`SourceError::UnknownCity`] for an id that is not configured.
pub fn select_cities(ids: &[String]) -> Result<Vec<CityDefinition>, SourceError> {
    let cities = all_cities()?;

    if let Some(unknown) = ids.iter().find(|id| !cities.iter().any(|c| &c.id == *id)) {
        return Err(SourceError::UnknownCity(unknown.clone()));
    }

    Ok(cities
        .into_iter()
        .filter(|c| ids.iter().any(|id| id == &c.id))
        .collect())
}

fn all_schemas() -> Result<Vec<SchemaMapping>, SourceError> {
    SCHEMA_TOMLS
        .iter()
        .map(|(name, toml)| parse_schema_toml(name, toml))
        .collect()
}

/// Parses a [`CityConfig`] from a TOML string.
///
/// # Errors
///
/// Returns [`SourceError::Config`] if the TOML is malformed or missing
/// required fields.
pub fn parse_city_toml(name: &str, toml_str: &str) -> Result<CityConfig, SourceError> {
    toml::de::from_str(toml_str).map_err(|e| SourceError::Config {
        name: name.to_string(),
        message: e.to_string(),
    })
}

/// Parses a [`SchemaMapping`] from a TOML string.
///
/// # Errors
///
/// Returns [`SourceError::Config`] if the TOML is malformed or missing
/// required fields.
pub fn parse_schema_toml(name: &str, toml_str: &str) -> Result<SchemaMapping, SourceError> {
    toml::de::from_str(toml_str).map_err(|e| SourceError::Config {
        name: name.to_string(),
        message: e.to_string(),
    })
}
