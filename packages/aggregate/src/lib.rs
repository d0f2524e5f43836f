#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident counts per census unit.
//!
//! Assignments are counted by unit name first, then joined onto the full
//! roster so every unit appears in the result. Units no incident resolved
//! to get an explicit count of zero.

use std::collections::BTreeMap;

use crime_census_geography_models::{AggregatedUnit, CensusUnit, MatchedAssignment};

/// Errors that can occur while aggregating.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    /// An assignment names a unit that is not in the roster.
    #[error("Assignment references unknown unit '{name}' ({count} incidents)")]
    UnknownUnit {
        /// Unit name from the assignment.
        name: String,
        /// Number of incidents assigned to it.
        count: u64,
    },
}

/// Counts assignments per unit name.
#[must_use]
pub fn count_assignments(assignments: &[MatchedAssignment<'_>]) -> BTreeMap<String, u64> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for assignment in assignments {
        *counts.entry(assignment.unit.to_string()).or_default() += 1;
    }
    counts
}

/// Attaches `counts` to every unit of `roster`, defaulting to zero.
///
/// The result has exactly one entry per roster unit, ordered by name.
///
/// # Errors
///
/// Returns [`AggregateError::UnknownUnit`] if `counts` has a name that is
/// not in `roster`.
pub fn join_roster(
    mut counts: BTreeMap<String, u64>,
    mut roster: Vec<CensusUnit>,
) -> Result<Vec<AggregatedUnit>, AggregateError> {
    roster.sort_by(|a, b| a.name.cmp(&b.name));

    let aggregated: Vec<AggregatedUnit> = roster
        .into_iter()
        .map(|unit| {
            let crime_count = counts.remove(&unit.name).unwrap_or(0);
            AggregatedUnit { unit, crime_count }
        })
        .collect();

    if let Some((name, count)) = counts.into_iter().next() {
        return Err(AggregateError::UnknownUnit { name, count });
    }

    let zero = aggregated.iter().filter(|u| u.crime_count == 0).count();
    log::debug!("Aggregated {} units ({zero} with no incidents)", aggregated.len());

    Ok(aggregated)
}

#[cfg(test)]
mod tests {
    use crime_census_geography_models::CensusAttributes;
    use geo::MultiPolygon;

    use super::*;

    fn unit(name: &str) -> CensusUnit {
        CensusUnit {
            name: name.to_string(),
            geometry: MultiPolygon(vec![]),
            attributes: CensusAttributes::default(),
            passthrough: BTreeMap::new(),
        }
    }

    fn aggregate(
        assignments: &[MatchedAssignment<'_>],
        roster: &[CensusUnit],
    ) -> Result<Vec<AggregatedUnit>, AggregateError> {
        join_roster(count_assignments(assignments), roster.to_vec())
    }

    fn assigned(names: &[&'static str]) -> Vec<MatchedAssignment<'static>> {
        names
            .iter()
            .copied()
            .enumerate()
            .map(|(incident, unit)| MatchedAssignment {
                incident,
                unit,
                distance: 0.0,
            })
            .collect()
    }

    #[test]
    fn unmatched_units_get_zero() {
        let roster = vec![unit("A"), unit("B")];
        let result = aggregate(&assigned(&["A", "A", "A"]), &roster).unwrap();

        let counts: Vec<(&str, u64)> = result
            .iter()
            .map(|u| (u.unit.name.as_str(), u.crime_count))
            .collect();
        assert_eq!(counts, vec![("A", 3), ("B", 0)]);
    }

    #[test]
    fn conserves_counts_and_roster_size() {
        let roster = vec![unit("59150001"), unit("59150002"), unit("59150003"), unit("59150004")];
        let assignments = assigned(&["59150003", "59150001", "59150003", "59150003", "59150001"]);

        let result = aggregate(&assignments, &roster).unwrap();

        assert_eq!(result.len(), roster.len());
        assert_eq!(
            result.iter().map(|u| u.crime_count).sum::<u64>(),
            assignments.len() as u64
        );
    }

    #[test]
    fn output_is_ordered_by_name() {
        let roster = vec![unit("c"), unit("a"), unit("b")];
        let result = aggregate(&assigned(&["b"]), &roster).unwrap();

        let names: Vec<&str> = result.iter().map(|u| u.unit.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn no_assignments_keeps_full_roster() {
        let roster = vec![unit("A"), unit("B")];
        let result = aggregate(&[], &roster).unwrap();
        assert_eq!(result.len(), 2);
        assert!(result.iter().all(|u| u.crime_count == 0));
    }

    #[test]
    fn unknown_unit_is_rejected() {
        let roster = vec![unit("A")];
        let err = aggregate(&assigned(&["A", "Q", "Q"]), &roster).unwrap_err();
        assert!(matches!(
            err,
            AggregateError::UnknownUnit { ref name, count: 2 } if name == "Q"
        ));
    }
}
