#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ratio features derived from aggregated census units.
//!
//! [`engineer`] runs the steps in a fixed order:
//!
//! 1. Units with any null attribute are dropped, as are units whose
//!    `pop_21` or `total_families` is zero (a zero there means the
//!    population is missing, not that it is genuinely empty).
//! 2. The ten ratio features are computed.
//! 3. `crime_rate = crime_count / pop_21` is computed.
//! 4. Each unit is reduced to name, features, `crime_rate` and geometry.
//!
//! Only the two denominators in step 1 are guarded. Any other zero
//! denominator produces [`Ratio::Undefined`], which is kept unless the
//! caller opts into [`UndefinedRatioPolicy::DropRow`].

use std::collections::BTreeMap;

use crime_census_geography_models::{
    AggregatedUnit, CensusAttribute, FeatureColumn, FeatureRecord, Ratio,
};
use strum_macros::{AsRefStr, Display, EnumString};

/// What to do with rows that have an undefined ratio after step 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum UndefinedRatioPolicy {
    /// Keep the row; the ratio is published as null.
    #[default]
    Retain,
    /// Remove the row from the output.
    DropRow,
}

/// Result of [`engineer`].
#[derive(Debug, Clone, Default)]
pub struct FeatureOutcome {
    /// Emitted rows, in input order.
    pub records: Vec<FeatureRecord>,
    /// Units dropped for a null attribute.
    pub dropped_null: usize,
    /// Units dropped because `pop_21` or `total_families` was zero.
    pub dropped_zero_denominator: usize,
    /// Units dropped under [`UndefinedRatioPolicy::DropRow`].
    pub dropped_undefined: usize,
    /// Undefined cells per column among the emitted rows.
    pub undefined_by_column: BTreeMap<FeatureColumn, usize>,
}

impl FeatureOutcome {
    /// Total undefined cells among the emitted rows.
    #[must_use]
    pub fn undefined_cells(&self) -> usize {
        self.undefined_by_column.values().sum()
    }
}

/// Why a unit was excluded in step 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    /// An attribute or pass-through column is null.
    Null,
    /// `pop_21` or `total_families` is zero.
    ZeroDenominator,
}

/// Step 1 validity check.
#[must_use]
pub fn exclusion(unit: &AggregatedUnit) -> Option<Exclusion> {
    if unit.unit.has_null() {
        return Some(Exclusion::Null);
    }

    let attrs = &unit.unit.attributes;
    let is_zero = |attr: CensusAttribute| attrs.get(attr).is_some_and(|v| v == 0.0);
    if is_zero(CensusAttribute::Pop21) || is_zero(CensusAttribute::TotalFamilies) {
        return Some(Exclusion::ZeroDenominator);
    }

    None
}

/// Computes the feature row for a unit that passed step 1.
#[must_use]
pub fn derive(unit: AggregatedUnit) -> FeatureRecord {
    use CensusAttribute as A;

    let attrs = &unit.unit.attributes;
    // Nulls were excluded in step 1; NaN keeps a stray one visible.
    let v = |attr: CensusAttribute| attrs.get(attr).unwrap_or(f64::NAN);
    let ratio = |num: A, den: A| Ratio::of(v(num), v(den));

    #[allow(clippy::cast_precision_loss)]
    let crime_count = unit.crime_count as f64;

    FeatureRecord {
        pop_density: ratio(A::Pop21, A::AreaSqkm),
        dropouts_to_grads: ratio(A::HsDropout, A::TotalHighschoolCount),
        one_parent_to_two: ratio(A::OneParentFamilies, A::TotalFamilies),
        crowded_to_not: ratio(A::HouseholdsMoreThanOnePerRoom, A::TotalHouseholds),
        children_to_adults: ratio(A::Age0To14, A::Pop21),
        non_minority_to_minority: ratio(A::NonMinorityCount, A::MinorityCount),
        male_to_female: ratio(A::AgeCountMales, A::Pop21),
        divorce_rate: ratio(A::Divorced, A::MaritalCount),
        home_renters_to_owners: ratio(A::HomeRenters, A::PeopleInHomes),
        low_income_status_pct: Ratio::Defined(v(A::LowIncomeStatusPct)),
        crime_rate: Ratio::of(crime_count, v(A::Pop21)),
        name: unit.unit.name,
        geometry: unit.unit.geometry,
    }
}

/// Runs the feature steps over every aggregated unit.
#[must_use]
pub fn engineer(units: Vec<AggregatedUnit>, policy: UndefinedRatioPolicy) -> FeatureOutcome {
    let mut outcome = FeatureOutcome::default();

    for unit in units {
        match exclusion(&unit) {
            Some(Exclusion::Null) => {
                log::trace!("Dropping '{}': null attribute", unit.unit.name);
                outcome.dropped_null += 1;
                continue;
            }
            Some(Exclusion::ZeroDenominator) => {
                log::trace!("Dropping '{}': zero pop_21 or total_families", unit.unit.name);
                outcome.dropped_zero_denominator += 1;
                continue;
            }
            None => {}
        }

        let record = derive(unit);
        let undefined = record.undefined_columns();

        if !undefined.is_empty() && policy == UndefinedRatioPolicy::DropRow {
            log::trace!("Dropping '{}': undefined {undefined:?}", record.name);
            outcome.dropped_undefined += 1;
            continue;
        }

        for column in undefined {
            *outcome.undefined_by_column.entry(column).or_default() += 1;
        }
        outcome.records.push(record);
    }

    log::debug!(
        "Derived {} feature rows ({} null, {} zero denominator, {} undefined dropped)",
        outcome.records.len(),
        outcome.dropped_null,
        outcome.dropped_zero_denominator,
        outcome.dropped_undefined,
    );

    outcome
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crime_census_geography_models::{CensusAttributes, CensusUnit};
    use geo::MultiPolygon;

    use super::*;

    /// A unit with every attribute set to a plausible non-zero value.
    fn unit(name: &str, pop: f64, area: f64, crime_count: u64) -> AggregatedUnit {
        let mut attributes = CensusAttributes::default();
        for attr in CensusAttribute::ALL {
            attributes.set(attr, Some(10.0));
        }
        attributes.set(CensusAttribute::Pop21, Some(pop));
        attributes.set(CensusAttribute::AreaSqkm, Some(area));

        AggregatedUnit {
            unit: CensusUnit {
                name: name.to_string(),
                geometry: MultiPolygon(vec![]),
                attributes,
                passthrough: BTreeMap::new(),
            },
            crime_count,
        }
    }

    #[test]
    fn crime_rate_is_count_over_population() {
        let outcome = engineer(
            vec![unit("A", 100.0, 10.0, 3), unit("B", 50.0, 5.0, 0)],
            UndefinedRatioPolicy::Retain,
        );

        let rates: Vec<(&str, f64)> = outcome
            .records
            .iter()
            .map(|r| (r.name.as_str(), r.crime_rate.value()))
            .collect();
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].0, "A");
        assert!((rates[0].1 - 0.03).abs() < 1e-12);
        assert_eq!(rates[1], ("B", 0.0));
        assert!((outcome.records[0].pop_density.value() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn ratios_use_documented_numerators_and_denominators() {
        let mut u = unit("A", 200.0, 4.0, 10);
        let attrs = &mut u.unit.attributes;
        attrs.set(CensusAttribute::HsDropout, Some(15.0));
        attrs.set(CensusAttribute::TotalHighschoolCount, Some(150.0));
        attrs.set(CensusAttribute::OneParentFamilies, Some(6.0));
        attrs.set(CensusAttribute::TotalFamilies, Some(24.0));
        attrs.set(CensusAttribute::Age0To14, Some(40.0));
        attrs.set(CensusAttribute::AgeCountMales, Some(98.0));
        attrs.set(CensusAttribute::LowIncomeStatusPct, Some(12.5));

        let r = derive(u);
        let close = |ratio: Ratio, expected: f64| (ratio.value() - expected).abs() < 1e-12;
        assert!(close(r.pop_density, 50.0));
        assert!(close(r.dropouts_to_grads, 0.1));
        assert!(close(r.one_parent_to_two, 0.25));
        assert!(close(r.children_to_adults, 0.2));
        assert!(close(r.male_to_female, 0.49));
        assert!(close(r.low_income_status_pct, 12.5));
        assert!(close(r.crime_rate, 0.05));
        assert!(close(r.divorce_rate, 1.0));
    }

    #[test]
    fn zero_population_is_excluded_regardless_of_count() {
        let outcome = engineer(
            vec![unit("A", 0.0, 10.0, 25), unit("B", 100.0, 10.0, 0)],
            UndefinedRatioPolicy::Retain,
        );
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].name, "B");
        assert_eq!(outcome.dropped_zero_denominator, 1);
    }

    #[test]
    fn zero_families_is_excluded() {
        let mut u = unit("A", 100.0, 10.0, 1);
        u.unit.attributes.set(CensusAttribute::TotalFamilies, Some(0.0));
        assert_eq!(exclusion(&u), Some(Exclusion::ZeroDenominator));
    }

    #[test]
    fn null_attribute_or_passthrough_is_excluded() {
        let mut a = unit("A", 100.0, 10.0, 1);
        a.unit.attributes.set(CensusAttribute::MedianIncome, None);
        let mut b = unit("B", 100.0, 10.0, 1);
        b.unit
            .passthrough
            .insert("Households".to_string(), serde_json::Value::Null);
        let c = unit("C", 100.0, 10.0, 1);

        let outcome = engineer(vec![a, b, c], UndefinedRatioPolicy::Retain);
        assert_eq!(outcome.dropped_null, 2);
        assert_eq!(outcome.records.len(), 1);
    }

    #[test]
    fn zero_minority_count_is_retained_as_undefined() {
        let mut u = unit("A", 100.0, 10.0, 2);
        u.unit.attributes.set(CensusAttribute::MinorityCount, Some(0.0));

        let outcome = engineer(vec![u], UndefinedRatioPolicy::Retain);
        assert_eq!(outcome.records.len(), 1);

        let ratio = outcome.records[0].non_minority_to_minority;
        assert!(ratio.is_undefined());
        assert!(!ratio.value().is_finite());
        assert_eq!(
            outcome.undefined_by_column.get(&FeatureColumn::NonMinorityToMinority),
            Some(&1)
        );
        assert_eq!(outcome.undefined_cells(), 1);
    }

    #[test]
    fn drop_row_policy_removes_undefined_rows() {
        let mut u = unit("A", 100.0, 10.0, 2);
        u.unit.attributes.set(CensusAttribute::MinorityCount, Some(0.0));

        let outcome = engineer(
            vec![u, unit("B", 100.0, 10.0, 0)],
            UndefinedRatioPolicy::DropRow,
        );
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].name, "B");
        assert_eq!(outcome.dropped_undefined, 1);
        assert_eq!(outcome.undefined_cells(), 0);
    }

    #[test]
    fn engineering_is_deterministic() {
        let build = || vec![unit("A", 100.0, 10.0, 3), unit("B", 7.0, 0.3, 1)];
        let first = engineer(build(), UndefinedRatioPolicy::Retain);
        let second = engineer(build(), UndefinedRatioPolicy::Retain);
        assert_eq!(first.records, second.records);
    }

    #[test]
    fn policy_parses_from_kebab_case() {
        assert_eq!(
            "drop-row".parse::<UndefinedRatioPolicy>().unwrap(),
            UndefinedRatioPolicy::DropRow
        );
        assert_eq!(UndefinedRatioPolicy::default().as_ref(), "retain");
    }
}
