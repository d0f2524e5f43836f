//! Raw file readers.
//!
//! Files are read fully into memory, decompressed if needed, and returned
//! either as CSV rows (one [`serde_json::Value`] object per row, keyed by
//! header) or as `GeoJSON` features.

use std::io::Read as _;
use std::path::Path;

use crime_census_source_models::{Compression, FileFormat};
use geojson::{Feature, GeoJson};

use crate::SourceError;

/// Reads a file and strips its compression, returning the payload bytes.
///
/// For zip archives the first entry whose name ends with the format's
/// extension is used (`.json` is also accepted for `GeoJSON`).
///
/// # Errors
///
/// Returns [`SourceError`] if the file cannot be read, decompressed, or the
/// archive has no matching entry.
pub fn read_payload(
    path: &Path,
    compression: Compression,
    format: FileFormat,
) -> Result<Vec<u8>, SourceError> {
    let bytes = std::fs::read(path).map_err(|e| SourceError::io(path, e))?;
    log::debug!("Read {} bytes from {}", bytes.len(), path.display());

    match compression {
        Compression::None => Ok(bytes),
        Compression::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(&bytes[..]);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| SourceError::io(path, e))?;
            log::debug!("Decompressed to {} bytes", decompressed.len());
            Ok(decompressed)
        }
        Compression::Zip => read_zip_entry(path, &bytes, format),
    }
}

fn read_zip_entry(path: &Path, bytes: &[u8], format: FileFormat) -> Result<Vec<u8>, SourceError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))?;

    let extension = format.extension();
    let matches = |name: &str| {
        let lower = name.to_ascii_lowercase();
        lower.ends_with(extension)
            || (format == FileFormat::Geojson && lower.ends_with(".json"))
    };

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() || !matches(entry.name()) {
            continue;
        }

        log::debug!("Reading {} from {}", entry.name(), path.display());
        let mut payload = Vec::new();
        entry
            .read_to_end(&mut payload)
            .map_err(|e| SourceError::io(path, e))?;
        return Ok(payload);
    }

    Err(SourceError::MissingEntry {
        file: path.display().to_string(),
        extension: extension.to_string(),
    })
}

/// Parses CSV bytes into one JSON object per row. All cells are strings;
/// surrounding whitespace is trimmed.
///
/// # Errors
///
/// Returns [`SourceError::Csv`] on malformed input.
pub fn parse_csv_records(bytes: &[u8], delimiter: u8) -> Result<Vec<serde_json::Value>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_owned())
        .collect();

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        let mut map = serde_json::Map::new();
        for (i, header) in headers.iter().enumerate() {
            let value = record.get(i).unwrap_or("").trim().to_owned();
            map.insert(header.clone(), serde_json::Value::String(value));
        }
        records.push(serde_json::Value::Object(map));
    }

    Ok(records)
}

/// Parses `GeoJSON` bytes into its features. A bare `Feature` yields a
/// single-element list.
///
/// # Errors
///
/// Returns [`SourceError`] if the payload is not valid `GeoJSON` or is a
/// bare geometry.
pub fn parse_features(bytes: &[u8], label: &str) -> Result<Vec<Feature>, SourceError> {
    let text = std::str::from_utf8(bytes).map_err(|source| SourceError::Encoding {
        file: label.to_string(),
        source,
    })?;

    match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => Ok(collection.features),
        GeoJson::Feature(feature) => Ok(vec![feature]),
        GeoJson::Geometry(_) => Err(SourceError::Config {
            name: label.to_string(),
            message: "expected a FeatureCollection, found a bare geometry".to_string(),
        }),
    }
}
