#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Reprojection between coordinate reference systems.
//!
//! Incident points and census polygons arrive in different systems per
//! city (raw UTM easting/northing, WGS 84 longitude/latitude). Before
//! matching, both are brought into the city's working system, a projected
//! CRS in which Euclidean distance approximates ground distance. After
//! feature engineering, unit polygons are taken to the publication system.
//!
//! The caller supplies the EPSG codes. A wrong working code is not
//! detected here and yields distances that are silently wrong.

use crime_census_geography_models::{CensusUnit, Crs, FeatureRecord, Incident};
use geo::{Coord, MapCoords as _, MultiPolygon, Point};
use proj::Proj;

/// Errors that can occur during reprojection.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// PROJ could not build a transformation between the two systems.
    #[error("Cannot create projection {from} -> {to}: {source}")]
    Create {
        /// Source system.
        from: Crs,
        /// Target system.
        to: Crs,
        /// Underlying PROJ error.
        #[source]
        source: proj::ProjCreateError,
    },

    /// A coordinate could not be transformed.
    #[error("Projection {from} -> {to} failed at ({x}, {y}): {message}")]
    Convert {
        /// Source system.
        from: Crs,
        /// Target system.
        to: Crs,
        /// Input x.
        x: f64,
        /// Input y.
        y: f64,
        /// Description of what went wrong.
        message: String,
    },
}

/// A transformation from one CRS to another.
///
/// Identical systems short-circuit to the identity without touching PROJ.
/// PROJ's axis order is normalised, so geographic input is always
/// `(longitude, latitude)`.
pub struct CoordinateNormalizer {
    from: Crs,
    to: Crs,
    proj: Option<Proj>,
}

impl std::fmt::Debug for CoordinateNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinateNormalizer")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

impl CoordinateNormalizer {
    /// Builds a transformation from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Create`] if PROJ does not know either
    /// code or cannot relate them.
    pub fn new(from: Crs, to: Crs) -> Result<Self, ProjectionError> {
        if from == to {
            return Ok(Self {
                from,
                to,
                proj: None,
            });
        }

        let proj = Proj::new_known_crs(&from.authority(), &to.authority(), None)
            .map_err(|source| ProjectionError::Create { from, to, source })?;

        log::debug!("Created projection {from} -> {to}");

        Ok(Self {
            from,
            to,
            proj: Some(proj),
        })
    }

    /// Source system.
    #[must_use]
    pub const fn from(&self) -> Crs {
        self.from
    }

    /// Target system.
    #[must_use]
    pub const fn to(&self) -> Crs {
        self.to
    }

    /// Whether this transformation leaves coordinates unchanged.
    #[must_use]
    pub const fn is_identity(&self) -> bool {
        self.proj.is_none()
    }

    /// Transforms a single coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Convert`] if PROJ rejects the input or
    /// produces a non-finite result.
    pub fn coord(&self, coord: Coord<f64>) -> Result<Coord<f64>, ProjectionError> {
        let Some(proj) = &self.proj else {
            return Ok(coord);
        };

        let failed = |message: String| ProjectionError::Convert {
            from: self.from,
            to: self.to,
            x: coord.x,
            y: coord.y,
            message,
        };

        let (x, y) = proj
            .convert((coord.x, coord.y))
            .map_err(|e| failed(e.to_string()))?;

        if !x.is_finite() || !y.is_finite() {
            return Err(failed(format!("non-finite result ({x}, {y})")));
        }

        Ok(Coord { x, y })
    }

    /// Transforms a point.
    ///
    /// # Errors
    ///
    /// See [`Self::coord`].
    pub fn point(&self, point: Point<f64>) -> Result<Point<f64>, ProjectionError> {
        self.coord(point.0).map(Point)
    }

    /// Transforms every vertex of a multipolygon.
    ///
    /// # Errors
    ///
    /// See [`Self::coord`].
    pub fn multi_polygon(
        &self,
        geometry: &MultiPolygon<f64>,
    ) -> Result<MultiPolygon<f64>, ProjectionError> {
        if self.is_identity() {
            return Ok(geometry.clone());
        }
        geometry.try_map_coords(|c| self.coord(c))
    }

    /// Reprojects incident locations in place.
    ///
    /// # Errors
    ///
    /// See [`Self::coord`]. On error some incidents may already have been
    /// transformed.
    pub fn incidents(&self, incidents: &mut [Incident]) -> Result<(), ProjectionError> {
        if self.is_identity() {
            return Ok(());
        }
        for incident in incidents {
            incident.location = self.point(incident.location)?;
        }
        Ok(())
    }

    /// Reprojects unit geometries in place.
    ///
    /// # Errors
    ///
    /// See [`Self::coord`].
    pub fn units(&self, units: &mut [CensusUnit]) -> Result<(), ProjectionError> {
        if self.is_identity() {
            return Ok(());
        }
        for unit in units {
            unit.geometry = self.multi_polygon(&unit.geometry)?;
        }
        Ok(())
    }

    /// Reprojects feature record geometries in place.
    ///
    /// # Errors
    ///
    /// See [`Self::coord`].
    pub fn records(&self, records: &mut [FeatureRecord]) -> Result<(), ProjectionError> {
        if self.is_identity() {
            return Ok(());
        }
        for record in records {
            record.geometry = self.multi_polygon(&record.geometry)?;
        }
        Ok(())
    }
}

/// Brings a city's incidents and census units into its working CRS.
///
/// `incident_crs` and `census_crs` are the native systems of the two
/// sources; either may already equal `working`.
///
/// # Errors
///
/// Returns [`ProjectionError`] if either transformation cannot be built or
/// applied.
pub fn normalize_city(
    incidents: &mut [Incident],
    incident_crs: Crs,
    units: &mut [CensusUnit],
    census_crs: Crs,
    working: Crs,
) -> Result<(), ProjectionError> {
    let incident_transform = CoordinateNormalizer::new(incident_crs, working)?;
    incident_transform.incidents(incidents)?;

    let census_transform = CoordinateNormalizer::new(census_crs, working)?;
    census_transform.units(units)?;

    log::debug!(
        "Normalized {} incidents ({incident_crs}) and {} units ({census_crs}) to {working}",
        incidents.len(),
        units.len(),
    );

    Ok(())
}
