#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Nearest census unit resolution.
//!
//! Every incident is assigned to the unit whose polygon is closest to it,
//! with distance 0 when the point lies inside or on the boundary. Unit
//! bounding boxes go into an R-tree; box distance is a lower bound on
//! polygon distance, so candidates are visited in box order and the search
//! stops once no remaining box can beat the best exact distance. Among
//! exactly equal distances the unit earliest in the roster wins, which
//! keeps results identical to [`nearest_unit_brute_force`].

use crime_census_geography_models::{CensusUnit, Incident, MatchedAssignment};
use crime_census_source::progress::ProgressCallback;
use geo::{BoundingRect as _, Distance as _, Euclidean, Intersects as _, MultiPolygon, Point};
use rayon::prelude::*;
use rstar::{AABB, PointDistance, RTree, RTreeObject};

/// Errors that can occur while building a matcher.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// There are no units to match against.
    #[error("Census roster is empty; incidents cannot be matched")]
    EmptyRoster,
}

/// A roster position stored in the R-tree with its bounding box.
struct UnitEntry {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for UnitEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl PointDistance for UnitEntry {
    /// Squared distance to the bounding box, never more than the squared
    /// distance to the polygon itself.
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        self.envelope.distance_2(point)
    }
}

/// Read-only index over a city's census roster.
pub struct SpatialMatcher<'a> {
    units: &'a [CensusUnit],
    tree: RTree<UnitEntry>,
}

impl<'a> SpatialMatcher<'a> {
    /// Indexes `units` for nearest-unit queries.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::EmptyRoster`] if `units` is empty.
    pub fn new(units: &'a [CensusUnit]) -> Result<Self, MatchError> {
        if units.is_empty() {
            return Err(MatchError::EmptyRoster);
        }

        let entries: Vec<UnitEntry> = units
            .iter()
            .enumerate()
            .filter_map(|(index, unit)| {
                let Some(envelope) = compute_envelope(&unit.geometry) else {
                    log::warn!("Unit '{}' has empty geometry; it can never be nearest", unit.name);
                    return None;
                };
                Some(UnitEntry { index, envelope })
            })
            .collect();

        let tree = RTree::bulk_load(entries);
        log::debug!("Indexed {} of {} units", tree.size(), units.len());

        Ok(Self { units, tree })
    }

    /// The roster this matcher was built over.
    #[must_use]
    pub const fn units(&self) -> &'a [CensusUnit] {
        self.units
    }

    /// Returns the roster index of the unit nearest to `point` and the
    /// distance to it.
    #[must_use]
    pub fn nearest(&self, point: Point<f64>) -> (usize, f64) {
        let query = [point.x(), point.y()];
        let mut best: Option<(usize, f64)> = None;

        for (entry, box_distance_2) in self.tree.nearest_neighbor_iter_with_distance_2(&query) {
            if let Some((_, best_distance)) = best
                && box_distance_2.sqrt() > best_distance + tolerance(best_distance)
            {
                break;
            }

            let distance = distance_to_unit(point, &self.units[entry.index].geometry);
            best = match best {
                Some((index, d)) if d < distance || (d == distance && index < entry.index) => {
                    Some((index, d))
                }
                _ => Some((entry.index, distance)),
            };
        }

        // Only reachable when every unit has empty geometry.
        best.unwrap_or_else(|| scan(point, self.units))
    }

    /// Resolves every incident to its nearest unit.
    ///
    /// Work is spread over the rayon pool; assignments come back in
    /// incident order. `progress` is ticked once per incident.
    #[must_use]
    pub fn match_incidents(
        &self,
        incidents: &[Incident],
        progress: &dyn ProgressCallback,
    ) -> Vec<MatchedAssignment<'a>> {
        progress.set_total(incidents.len() as u64);

        let units = self.units;
        let assignments: Vec<MatchedAssignment<'a>> = incidents
            .par_iter()
            .enumerate()
            .map(move |(incident, record)| {
                let (index, distance) = self.nearest(record.location);
                progress.inc(1);
                MatchedAssignment {
                    incident,
                    unit: units[index].name.as_str(),
                    distance,
                }
            })
            .collect();

        let outside = assignments.iter().filter(|a| a.distance > 0.0).count();
        log::debug!(
            "Matched {} incidents ({outside} outside every unit polygon)",
            assignments.len()
        );

        progress.finish_and_clear();
        assignments
    }
}

/// Reference nearest-unit search that measures every unit.
///
/// Returns `None` for an empty roster. Ties go to the lowest index.
#[must_use]
pub fn nearest_unit_brute_force(point: Point<f64>, units: &[CensusUnit]) -> Option<(usize, f64)> {
    if units.is_empty() {
        None
    } else {
        Some(scan(point, units))
    }
}

fn scan(point: Point<f64>, units: &[CensusUnit]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (index, unit) in units.iter().enumerate() {
        let distance = distance_to_unit(point, &unit.geometry);
        if distance < best.1 {
            best = (index, distance);
        }
    }
    best
}

/// Euclidean distance from `point` to `geometry`; 0 inside or on the
/// boundary, otherwise the distance to the closest ring.
#[must_use]
pub fn distance_to_unit(point: Point<f64>, geometry: &MultiPolygon<f64>) -> f64 {
    if geometry.intersects(&point) {
        return 0.0;
    }

    geometry
        .0
        .iter()
        .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
        .map(|ring| Euclidean.distance(&point, ring))
        .fold(f64::INFINITY, f64::min)
}

/// Slack added before pruning so box distances that round slightly above
/// an exactly equal polygon distance are still visited.
fn tolerance(distance: f64) -> f64 {
    1e-9 * distance.max(1.0)
}

fn compute_envelope(mp: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    mp.bounding_rect()
        .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use crime_census_geography_models::CensusAttributes;
    use crime_census_source::progress::NullProgress;
    use geo::{LineString, Polygon, polygon};

    use super::*;

    fn unit(name: &str, polygon: Polygon<f64>) -> CensusUnit {
        CensusUnit {
            name: name.to_string(),
            geometry: MultiPolygon(vec![polygon]),
            attributes: CensusAttributes::default(),
            passthrough: std::collections::BTreeMap::new(),
        }
    }

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
        ]
    }

    /// 4x4 grid of 8-wide squares on a 10 spacing, leaving 2-wide gaps.
    fn grid() -> Vec<CensusUnit> {
        let mut units = Vec::new();
        for row in 0..4_i32 {
            for col in 0..4_i32 {
                let (x, y) = (f64::from(col) * 10.0, f64::from(row) * 10.0);
                units.push(unit(&format!("{row}-{col}"), square(x, y, 8.0)));
            }
        }
        units
    }

    #[test]
    fn empty_roster_is_an_error() {
        assert!(matches!(SpatialMatcher::new(&[]), Err(MatchError::EmptyRoster)));
        assert!(nearest_unit_brute_force(Point::new(0.0, 0.0), &[]).is_none());
    }

    #[test]
    fn agrees_with_brute_force_across_the_grid() {
        let units = grid();
        let matcher = SpatialMatcher::new(&units).unwrap();

        // Points on a 0.5 lattice cover interiors, gaps, edges, corners and
        // the area outside the grid.
        for i in -10_i32..=90 {
            for j in -10..=90 {
                let point = Point::new(f64::from(i) * 0.5, f64::from(j) * 0.5);
                let expected = nearest_unit_brute_force(point, &units).unwrap();
                assert_eq!(matcher.nearest(point), expected, "at {point:?}");
            }
        }
    }

    #[test]
    fn boundary_point_matches_with_zero_distance() {
        let units = vec![unit("A", square(0.0, 0.0, 10.0)), unit("B", square(20.0, 0.0, 10.0))];
        let matcher = SpatialMatcher::new(&units).unwrap();

        assert_eq!(matcher.nearest(Point::new(10.0, 5.0)), (0, 0.0));
        assert_eq!(matcher.nearest(Point::new(20.0, 0.0)), (1, 0.0));
    }

    #[test]
    fn point_outside_every_unit_gets_the_closest() {
        let units = vec![unit("A", square(0.0, 0.0, 10.0)), unit("B", square(20.0, 0.0, 10.0))];
        let matcher = SpatialMatcher::new(&units).unwrap();

        let (index, distance) = matcher.nearest(Point::new(16.0, 5.0));
        assert_eq!(index, 1);
        assert!((distance - 4.0).abs() < 1e-12);
    }

    #[test]
    fn overlapping_units_resolve_to_lowest_index() {
        let units = vec![
            unit("Z", square(0.0, 0.0, 10.0)),
            unit("A", square(5.0, 5.0, 10.0)),
            unit("M", square(0.0, 0.0, 10.0)),
        ];
        let matcher = SpatialMatcher::new(&units).unwrap();

        assert_eq!(matcher.nearest(Point::new(7.0, 7.0)), (0, 0.0));
        assert_eq!(matcher.nearest(Point::new(12.0, 12.0)), (1, 0.0));
    }

    #[test]
    fn equidistant_gap_resolves_to_lowest_index() {
        let units = vec![unit("right", square(12.0, 0.0, 10.0)), unit("left", square(0.0, 0.0, 10.0))];
        let matcher = SpatialMatcher::new(&units).unwrap();

        let (index, distance) = matcher.nearest(Point::new(11.0, 5.0));
        assert_eq!(index, 0);
        assert!((distance - 1.0).abs() < 1e-12);
    }

    #[test]
    fn hole_is_outside_its_polygon() {
        let donut = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (30.0, 0.0), (30.0, 30.0), (0.0, 30.0), (0.0, 0.0)]),
            vec![LineString::from(vec![
                (10.0, 10.0),
                (20.0, 10.0),
                (20.0, 20.0),
                (10.0, 20.0),
                (10.0, 10.0),
            ])],
        );
        let units = vec![unit("donut", donut), unit("far", square(100.0, 100.0, 5.0))];
        let matcher = SpatialMatcher::new(&units).unwrap();

        let (index, distance) = matcher.nearest(Point::new(15.0, 12.0));
        assert_eq!(index, 0);
        assert!((distance - 2.0).abs() < 1e-12);
    }

    struct Counting(AtomicU64);

    impl ProgressCallback for Counting {
        fn set_total(&self, _total: u64) {}
        fn inc(&self, delta: u64) {
            self.0.fetch_add(delta, Ordering::Relaxed);
        }
        fn set_message(&self, _msg: String) {}
        fn finish(&self, _msg: String) {}
        fn finish_and_clear(&self) {}
    }

    #[test]
    fn match_incidents_keeps_incident_order() {
        let units = grid();
        let matcher = SpatialMatcher::new(&units).unwrap();

        let incidents: Vec<Incident> = (0..200_i32)
            .map(|i| Incident {
                location: Point::new(f64::from(i % 40), f64::from(i / 5)),
                year: 2021,
                category: "Mischief".to_string(),
            })
            .collect();

        let progress = Counting(AtomicU64::new(0));
        let assignments = matcher.match_incidents(&incidents, &progress);

        assert_eq!(assignments.len(), incidents.len());
        assert_eq!(progress.0.load(Ordering::Relaxed), 200);
        for (i, assignment) in assignments.iter().enumerate() {
            assert_eq!(assignment.incident, i);
            let (index, distance) =
                nearest_unit_brute_force(incidents[i].location, &units).unwrap();
            assert_eq!(assignment.unit, units[index].name);
            assert!((assignment.distance - distance).abs() < f64::EPSILON);
        }

        assert!(matcher.match_incidents(&[], &NullProgress).is_empty());
    }
}
