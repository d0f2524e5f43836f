#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Per-city pipeline from raw sources to the published feature table.
//!
//! Each city runs the same sequence: load and filter incidents, load the
//! census roster, bring both into the city's working CRS, match incidents
//! to their nearest unit, count per unit, derive features, reproject to
//! the publication CRS and write one `GeoJSON` file. Cities share no
//! state. The first failing city aborts the run; there is no partial
//! output for it.

pub mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crime_census_aggregate::{AggregateError, count_assignments, join_roster};
use crime_census_features::{FeatureOutcome, UndefinedRatioPolicy, engineer};
use crime_census_projection::{CoordinateNormalizer, ProjectionError, normalize_city};
use crime_census_source::SourceError;
use crime_census_source::census::load_census;
use crime_census_source::incidents::load_incidents;
use crime_census_source::progress::ProgressCallback;
use crime_census_source_models::CityDefinition;
use crime_census_spatial::{MatchError, SpatialMatcher};

/// Errors that can abort a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Reading or interpreting a source failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Reprojection failed.
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// Matching could not start.
    #[error(transparent)]
    Match(#[from] MatchError),

    /// Counting produced an inconsistent result.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// Output serialization failed.
    #[error("Output serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Writing output failed.
    #[error("Cannot write {path}: {source}")]
    Output {
        /// Path being written.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A city failed; wraps the cause with the city id.
    #[error("[{city}] {source}")]
    City {
        /// City id.
        city: String,
        /// What went wrong.
        #[source]
        source: Box<Self>,
    },
}

impl PipelineError {
    pub(crate) fn output(path: &Path, source: std::io::Error) -> Self {
        Self::Output {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Run-wide settings.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Directory holding the raw source files.
    pub input_dir: PathBuf,
    /// Directory receiving one output file per city.
    pub output_dir: PathBuf,
    /// Handling of rows with undefined ratios.
    pub policy: UndefinedRatioPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("datasets"),
            output_dir: PathBuf::from("crime_census"),
            policy: UndefinedRatioPolicy::default(),
        }
    }
}

/// What happened to one city's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitySummary {
    /// City id.
    pub city: String,
    /// Incident records read from the source.
    pub incidents_read: u64,
    /// Incidents that passed filtering.
    pub incidents_kept: u64,
    /// Units in the census roster.
    pub roster_units: usize,
    /// Incidents matched to a unit.
    pub matched: usize,
    /// Roster units no incident matched.
    pub zero_crime_units: usize,
    /// Rows written.
    pub emitted: usize,
    /// Units dropped for a null attribute.
    pub dropped_null: usize,
    /// Units dropped for a zero `pop_21` or `total_families`.
    pub dropped_zero_denominator: usize,
    /// Units dropped for an undefined ratio (strict policy only).
    pub dropped_undefined: usize,
    /// Undefined ratio cells among the rows written.
    pub undefined_cells: usize,
    /// Path of the written file.
    pub output: PathBuf,
}

impl std::fmt::Display for CitySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} incidents kept of {}, {} units ({} without incidents), {} rows written \
             ({} null, {} zero denominator, {} undefined dropped; {} undefined cells) -> {}",
            self.city,
            self.incidents_kept,
            self.incidents_read,
            self.roster_units,
            self.zero_crime_units,
            self.emitted,
            self.dropped_null,
            self.dropped_zero_denominator,
            self.dropped_undefined,
            self.undefined_cells,
            self.output.display(),
        )
    }
}

/// Runs the pipeline for one city.
///
/// `progress` receives one tick per matched incident.
///
/// # Errors
///
/// Returns [`PipelineError`] on any structural failure: unreadable input,
/// missing columns, malformed geometry, an empty roster, a failed
/// projection, or an unwritable output.
pub fn run_city(
    city: &CityDefinition,
    options: &PipelineOptions,
    progress: &dyn ProgressCallback,
) -> Result<CitySummary, PipelineError> {
    let start = Instant::now();
    let id = city.id.as_str();

    let batch = load_incidents(city, &options.input_dir)?;
    let mut incidents = batch.incidents;
    let mut units = load_census(city, &options.input_dir)?;
    let roster_units = units.len();

    normalize_city(
        &mut incidents,
        city.incidents.crs,
        &mut units,
        city.census.crs,
        city.crs.working,
    )?;
    log::info!("[{id}] Working CRS {}", city.crs.working);

    progress.set_message(format!("[{id}] matching"));
    let (matched, counts) = {
        let matcher = SpatialMatcher::new(&units)?;
        let assignments = matcher.match_incidents(&incidents, progress);
        (assignments.len(), count_assignments(&assignments))
    };
    log::info!("[{id}] Matched {matched} incidents to {} units", counts.len());

    let aggregated = join_roster(counts, units)?;
    let zero_crime_units = aggregated.iter().filter(|u| u.crime_count == 0).count();

    let outcome = engineer(aggregated, options.policy);
    log_outcome(id, &outcome);
    let undefined_cells = outcome.undefined_cells();
    let mut records = outcome.records;

    CoordinateNormalizer::new(city.crs.working, city.crs.publication)?.records(&mut records)?;

    let path = options.output_dir.join(city.output_filename());
    output::write_records(&path, &records)?;

    log::info!(
        "[{id}] Wrote {} rows to {} in {:.1}s",
        records.len(),
        path.display(),
        start.elapsed().as_secs_f64()
    );

    Ok(CitySummary {
        city: city.id.clone(),
        incidents_read: batch.stats.read,
        incidents_kept: batch.stats.kept,
        roster_units,
        matched,
        zero_crime_units,
        emitted: records.len(),
        dropped_null: outcome.dropped_null,
        dropped_zero_denominator: outcome.dropped_zero_denominator,
        dropped_undefined: outcome.dropped_undefined,
        undefined_cells,
        output: path,
    })
}

fn log_outcome(id: &str, outcome: &FeatureOutcome) {
    if outcome.dropped_null + outcome.dropped_zero_denominator > 0 {
        log::info!(
            "[{id}] Dropped {} units with null attributes and {} with zero pop_21 or total_families",
            outcome.dropped_null,
            outcome.dropped_zero_denominator,
        );
    }

    if outcome.dropped_undefined > 0 {
        log::warn!(
            "[{id}] Dropped {} units with undefined ratios",
            outcome.dropped_undefined
        );
    }

    for (column, count) in &outcome.undefined_by_column {
        log::warn!("[{id}] {count} units have an undefined {column} (zero denominator)");
    }
}

/// Runs every city in order and returns their summaries.
///
/// `cities_progress` advances once per finished city; `match_progress`
/// supplies a fresh indicator for each city's matching stage.
///
/// # Errors
///
/// Returns [`PipelineError::City`] for the first city that fails; later
/// cities are not run.
pub fn run_all(
    cities: &[CityDefinition],
    options: &PipelineOptions,
    cities_progress: &dyn ProgressCallback,
    match_progress: &dyn Fn(&CityDefinition) -> Arc<dyn ProgressCallback>,
) -> Result<Vec<CitySummary>, PipelineError> {
    let start = Instant::now();
    cities_progress.set_total(cities.len() as u64);

    let mut summaries = Vec::with_capacity(cities.len());
    for city in cities {
        cities_progress.set_message(format!("{} ({})", city.name, city.id));
        let bar = match_progress(city);

        let summary = run_city(city, options, bar.as_ref()).map_err(|e| PipelineError::City {
            city: city.id.clone(),
            source: Box::new(e),
        })?;

        summaries.push(summary);
        cities_progress.inc(1);
    }
    cities_progress.finish_and_clear();

    for summary in &summaries {
        log::info!("{summary}");
    }
    log::info!(
        "Processed {} cities in {:.1}s",
        summaries.len(),
        start.elapsed().as_secs_f64()
    );

    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use crime_census_geography_models::CensusAttribute;
    use crime_census_source::progress::{NullProgress, null_progress};
    use crime_census_source::registry::parse_city_toml;
    use crime_census_source_models::SchemaMapping;
    use serde_json::json;

    use super::*;

    const CITY_TOML: &str = r#"
id = "tst"
name = "Testville"

[incidents]
file = "incidents.csv"
format = "csv"
crs = "EPSG:32610"
location = { type = "columns", x = "X", y = "Y" }

[census]
file = "census.geojson"
crs = "EPSG:32610"
schema = "plain"

[crs]
working = "EPSG:32610"
publication = "EPSG:32610"

[filter]
year = { type = "integer", field = "YEAR" }
years = [2021]
category_field = "TYPE"
excluded_categories = ["Homicide"]
coordinates = "any_positive"
"#;

    fn city() -> CityDefinition {
        let schema = SchemaMapping {
            id: "plain".to_string(),
            rename: std::collections::BTreeMap::new(),
            drop: vec!["GeoUID".to_string()],
        };
        CityDefinition::resolve(parse_city_toml("tst", CITY_TOML).unwrap(), schema).unwrap()
    }

    fn square(x: f64, y: f64) -> serde_json::Value {
        json!({
            "type": "Polygon",
            "coordinates": [[[x, y], [x + 10.0, y], [x + 10.0, y + 10.0], [x, y + 10.0], [x, y]]]
        })
    }

    fn census_feature(name: &str, x: f64, pop: f64, area: f64, minority: f64) -> serde_json::Value {
        let mut props = serde_json::Map::new();
        props.insert("name".to_string(), json!(name));
        props.insert("GeoUID".to_string(), json!(format!("5915{name}")));
        for attr in CensusAttribute::ALL {
            props.insert(attr.as_ref().to_string(), json!(10.0));
        }
        props.insert("pop_21".to_string(), json!(pop));
        props.insert("area_sqkm".to_string(), json!(area));
        props.insert("minority_count".to_string(), json!(minority));

        json!({ "type": "Feature", "properties": props, "geometry": square(x, 0.0) })
    }

    fn write_inputs(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();

        let census = json!({
            "type": "FeatureCollection",
            "features": [
                census_feature("B", 20.0, 50.0, 5.0, 10.0),
                census_feature("A", 0.0, 100.0, 10.0, 10.0),
                census_feature("C", 40.0, 0.0, 1.0, 10.0),
                census_feature("D", 60.0, 80.0, 2.0, 0.0),
            ]
        });
        std::fs::write(dir.join("census.geojson"), census.to_string()).unwrap();

        let csv = "TYPE,YEAR,X,Y\n\
                   Theft from Vehicle,2021,2,2\n\
                   Mischief,2021,5,5\n\
                   Break and Enter Commercial,2021,9,1\n\
                   Homicide,2021,25,5\n\
                   Mischief,2020,25,5\n\
                   Offence Against a Person,2021,0,0\n\
                   Theft of Bicycle,2021,65,5\n\
                   Mischief,2021,41,9\n";
        std::fs::write(dir.join("incidents.csv"), csv).unwrap();
    }

    fn options(name: &str) -> PipelineOptions {
        let root = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&root);
        write_inputs(&root.join("datasets"));
        PipelineOptions {
            input_dir: root.join("datasets"),
            output_dir: root.join("out"),
            policy: UndefinedRatioPolicy::Retain,
        }
    }

    fn output_properties(path: &Path) -> Vec<serde_json::Map<String, serde_json::Value>> {
        let text = std::fs::read_to_string(path).unwrap();
        let geojson::GeoJson::FeatureCollection(fc) = text.parse().unwrap() else {
            panic!("expected a FeatureCollection");
        };
        fc.features
            .into_iter()
            .map(|f| f.properties.unwrap())
            .collect()
    }

    #[test]
    fn runs_a_city_end_to_end() {
        let options = options("crime_census_pipeline_e2e");
        let summary = run_city(&city(), &options, &NullProgress).unwrap();

        assert_eq!(summary.incidents_read, 8);
        assert_eq!(summary.incidents_kept, 5);
        assert_eq!(summary.matched, 5);
        assert_eq!(summary.roster_units, 4);
        assert_eq!(summary.zero_crime_units, 1);
        assert_eq!(summary.dropped_zero_denominator, 1);
        assert_eq!(summary.emitted, 3);
        assert_eq!(summary.undefined_cells, 1);

        let rows = output_properties(&summary.output);
        let names: Vec<&str> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["A", "B", "D"]);

        let rate = |i: usize| rows[i]["crime_rate"].as_f64().unwrap();
        assert!((rate(0) - 0.03).abs() < 1e-12);
        assert!(rate(1).abs() < f64::EPSILON);
        assert!((rate(2) - 1.0 / 80.0).abs() < 1e-12);
        assert!(rows[2]["non_minority_to_minority"].is_null());
        assert_eq!(rows[0].len(), 12);

        let _ = std::fs::remove_dir_all(options.output_dir.parent().unwrap());
    }

    #[test]
    fn rerun_produces_identical_bytes() {
        let options = options("crime_census_pipeline_idempotent");
        let first = run_city(&city(), &options, &NullProgress).unwrap();
        let bytes = std::fs::read(&first.output).unwrap();
        let second = run_city(&city(), &options, &NullProgress).unwrap();
        assert_eq!(std::fs::read(&second.output).unwrap(), bytes);

        let _ = std::fs::remove_dir_all(options.output_dir.parent().unwrap());
    }

    #[test]
    fn strict_policy_drops_undefined_rows() {
        let mut options = options("crime_census_pipeline_strict");
        options.policy = UndefinedRatioPolicy::DropRow;
        let summary = run_city(&city(), &options, &NullProgress).unwrap();

        assert_eq!(summary.emitted, 2);
        assert_eq!(summary.dropped_undefined, 1);
        assert_eq!(summary.undefined_cells, 0);

        let _ = std::fs::remove_dir_all(options.output_dir.parent().unwrap());
    }

    #[test]
    fn empty_census_reports_empty_roster() {
        let options = options("crime_census_pipeline_empty_roster");
        std::fs::write(
            options.input_dir.join("census.geojson"),
            json!({ "type": "FeatureCollection", "features": [] }).to_string(),
        )
        .unwrap();

        let err = run_city(&city(), &options, &NullProgress).unwrap_err();
        assert!(matches!(err, PipelineError::Match(MatchError::EmptyRoster)));

        let _ = std::fs::remove_dir_all(options.output_dir.parent().unwrap());
    }

    #[test]
    fn missing_input_aborts_with_city_context() {
        let options = PipelineOptions {
            input_dir: std::env::temp_dir().join("crime_census_pipeline_nothing_here"),
            ..PipelineOptions::default()
        };
        let err = run_all(&[city()], &options, &NullProgress, &|_| null_progress()).unwrap_err();

        assert!(matches!(err, PipelineError::City { ref city, .. } if city == "tst"));
        assert!(err.to_string().starts_with("[tst]"));
    }
}
