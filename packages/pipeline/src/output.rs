//! `GeoJSON` writer for the per-city feature table.

use std::path::Path;

use crime_census_geography_models::FeatureRecord;
use geojson::{Feature, FeatureCollection, Geometry};

use crate::PipelineError;

/// Builds the output collection. Feature properties are `name`, the ten
/// feature columns and `crime_rate`, in that order; undefined or
/// non-finite values are `null`.
#[must_use]
pub fn feature_collection(records: &[FeatureRecord]) -> FeatureCollection {
    let features = records
        .iter()
        .map(|record| Feature {
            bbox: None,
            geometry: Some(Geometry::new(geojson::Value::from(&record.geometry))),
            id: None,
            properties: Some(record.properties()),
            foreign_members: None,
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Writes `records` to `path` as a `FeatureCollection`.
///
/// The parent directory is created if needed. Data goes to a temporary
/// sibling first and is renamed over `path`, so an interrupted run never
/// leaves a truncated file behind.
///
/// # Errors
///
/// Returns [`PipelineError`] if serialization or any filesystem operation
/// fails.
pub fn write_records(path: &Path, records: &[FeatureRecord]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::output(parent, e))?;
    }

    let bytes = serde_json::to_vec(&feature_collection(records))?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, &bytes).map_err(|e| PipelineError::output(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| PipelineError::output(path, e))?;

    log::debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use crime_census_geography_models::Ratio;
    use geo::{MultiPolygon, polygon};

    use super::*;

    fn record(name: &str, minority: Ratio) -> FeatureRecord {
        FeatureRecord {
            name: name.to_string(),
            pop_density: Ratio::Defined(1200.5),
            dropouts_to_grads: Ratio::Defined(0.1),
            one_parent_to_two: Ratio::Defined(0.2),
            crowded_to_not: Ratio::Defined(0.03),
            children_to_adults: Ratio::Defined(0.15),
            non_minority_to_minority: minority,
            male_to_female: Ratio::Defined(0.49),
            divorce_rate: Ratio::Defined(0.08),
            home_renters_to_owners: Ratio::Defined(0.6),
            low_income_status_pct: Ratio::Defined(11.4),
            crime_rate: Ratio::Defined(0.02),
            geometry: MultiPolygon(vec![polygon![
                (x: -123.13, y: 49.28),
                (x: -123.11, y: 49.28),
                (x: -123.11, y: 49.29),
            ]]),
        }
    }

    #[test]
    fn properties_are_in_output_order_with_null_for_undefined() {
        let collection = feature_collection(&[record("59150004", Ratio::Undefined { numerator: 40.0 })]);
        let props = collection.features[0].properties.as_ref().unwrap();

        let keys: Vec<&str> = props.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "name",
                "pop_density",
                "dropouts_to_grads",
                "one_parent_to_two",
                "crowded_to_not",
                "children_to_adults",
                "non_minority_to_minority",
                "male_to_female",
                "divorce_rate",
                "home_renters_to_owners",
                "low_income_status_pct",
                "crime_rate",
            ]
        );
        assert!(props["non_minority_to_minority"].is_null());
        assert_eq!(props["name"], "59150004");
    }

    #[test]
    fn writes_into_new_directory_without_leaving_temp_file() {
        let dir = std::env::temp_dir().join("crime_census_output_write");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("crime_census_tst.geojson");

        write_records(&path, &[record("A", Ratio::Defined(2.0))]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: geojson::GeoJson = text.parse().unwrap();
        let geojson::GeoJson::FeatureCollection(fc) = parsed else {
            panic!("expected a FeatureCollection");
        };
        assert_eq!(fc.features.len(), 1);
        assert!(!path.with_file_name("crime_census_tst.geojson.tmp").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
