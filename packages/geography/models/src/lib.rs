#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident, census unit and derived feature types.
//!
//! These types follow a city's data through the pipeline: raw incidents
//! are resolved to [`CensusUnit`]s, counted into [`AggregatedUnit`]s and
//! finally turned into [`FeatureRecord`]s. Data from different cities
//! never shares identity, even when unit names collide.

pub mod crs;

use std::collections::BTreeMap;

use geo::{MultiPolygon, Point};
use strum_macros::{AsRefStr, Display, EnumString};

pub use crs::Crs;

/// A single crime report after filtering.
///
/// The location is expressed in whatever CRS the surrounding pipeline
/// stage declares; it is always finite.
#[derive(Debug, Clone, PartialEq)]
pub struct Incident {
    /// Point location.
    pub location: Point<f64>,
    /// Year the incident occurred.
    pub year: i32,
    /// Source-specific category label.
    pub category: String,
}

/// Canonical census attribute columns, named after the renamed
/// `CensusMapper` fields.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum CensusAttribute {
    /// Total population, 2021.
    #[strum(serialize = "pop_21")]
    Pop21,
    /// No high school diploma or equivalency certificate.
    HsDropout,
    /// Median total income among recipients.
    MedianIncome,
    /// Land area in square kilometres.
    AreaSqkm,
    /// Census families in private households.
    TotalFamilies,
    /// Couple families.
    TwoParentFamilies,
    /// One-parent families.
    OneParentFamilies,
    /// Private households by number of persons per room.
    TotalHouseholds,
    /// Households with more than one person per room.
    HouseholdsMoreThanOnePerRoom,
    /// Population aged 15+ by secondary school certificate.
    TotalHighschoolCount,
    /// Population aged 0 to 14.
    #[strum(serialize = "age_0_to_14")]
    Age0To14,
    /// Total by age, males.
    AgeCountMales,
    /// Population aged 15+ by marital status.
    MaritalCount,
    /// Divorced.
    Divorced,
    /// Not a visible minority.
    NonMinorityCount,
    /// Total by visible minority status.
    MinorityCount,
    /// Prevalence of low income (LIM-AT), percent.
    LowIncomeStatusPct,
    /// Renter households.
    HomeRenters,
    /// Private households by tenure.
    PeopleInHomes,
}

impl CensusAttribute {
    /// Every attribute, in schema order.
    pub const ALL: [Self; 19] = [
        Self::Pop21,
        Self::HsDropout,
        Self::MedianIncome,
        Self::AreaSqkm,
        Self::TotalFamilies,
        Self::TwoParentFamilies,
        Self::OneParentFamilies,
        Self::TotalHouseholds,
        Self::HouseholdsMoreThanOnePerRoom,
        Self::TotalHighschoolCount,
        Self::Age0To14,
        Self::AgeCountMales,
        Self::MaritalCount,
        Self::Divorced,
        Self::NonMinorityCount,
        Self::MinorityCount,
        Self::LowIncomeStatusPct,
        Self::HomeRenters,
        Self::PeopleInHomes,
    ];
}

/// Raw census counts for a unit. `None` means the source value was null.
#[derive(Debug, Clone, Default, PartialEq)]
#[allow(missing_docs)]
pub struct CensusAttributes {
    pub pop_21: Option<f64>,
    pub hs_dropout: Option<f64>,
    pub median_income: Option<f64>,
    pub area_sqkm: Option<f64>,
    pub total_families: Option<f64>,
    pub two_parent_families: Option<f64>,
    pub one_parent_families: Option<f64>,
    pub total_households: Option<f64>,
    pub households_more_than_one_per_room: Option<f64>,
    pub total_highschool_count: Option<f64>,
    pub age_0_to_14: Option<f64>,
    pub age_count_males: Option<f64>,
    pub marital_count: Option<f64>,
    pub divorced: Option<f64>,
    pub non_minority_count: Option<f64>,
    pub minority_count: Option<f64>,
    pub low_income_status_pct: Option<f64>,
    pub home_renters: Option<f64>,
    pub people_in_homes: Option<f64>,
}

impl CensusAttributes {
    /// Returns the value of a single attribute.
    #[must_use]
    pub const fn get(&self, attribute: CensusAttribute) -> Option<f64> {
        match attribute {
            CensusAttribute::Pop21 => self.pop_21,
            CensusAttribute::HsDropout => self.hs_dropout,
            CensusAttribute::MedianIncome => self.median_income,
            CensusAttribute::AreaSqkm => self.area_sqkm,
            CensusAttribute::TotalFamilies => self.total_families,
            CensusAttribute::TwoParentFamilies => self.two_parent_families,
            CensusAttribute::OneParentFamilies => self.one_parent_families,
            CensusAttribute::TotalHouseholds => self.total_households,
            CensusAttribute::HouseholdsMoreThanOnePerRoom => {
                self.households_more_than_one_per_room
            }
            CensusAttribute::TotalHighschoolCount => self.total_highschool_count,
            CensusAttribute::Age0To14 => self.age_0_to_14,
            CensusAttribute::AgeCountMales => self.age_count_males,
            CensusAttribute::MaritalCount => self.marital_count,
            CensusAttribute::Divorced => self.divorced,
            CensusAttribute::NonMinorityCount => self.non_minority_count,
            CensusAttribute::MinorityCount => self.minority_count,
            CensusAttribute::LowIncomeStatusPct => self.low_income_status_pct,
            CensusAttribute::HomeRenters => self.home_renters,
            CensusAttribute::PeopleInHomes => self.people_in_homes,
        }
    }

    /// Sets the value of a single attribute.
    pub const fn set(&mut self, attribute: CensusAttribute, value: Option<f64>) {
        let slot = match attribute {
            CensusAttribute::Pop21 => &mut self.pop_21,
            CensusAttribute::HsDropout => &mut self.hs_dropout,
            CensusAttribute::MedianIncome => &mut self.median_income,
            CensusAttribute::AreaSqkm => &mut self.area_sqkm,
            CensusAttribute::TotalFamilies => &mut self.total_families,
            CensusAttribute::TwoParentFamilies => &mut self.two_parent_families,
            CensusAttribute::OneParentFamilies => &mut self.one_parent_families,
            CensusAttribute::TotalHouseholds => &mut self.total_households,
            CensusAttribute::HouseholdsMoreThanOnePerRoom => {
                &mut self.households_more_than_one_per_room
            }
            CensusAttribute::TotalHighschoolCount => &mut self.total_highschool_count,
            CensusAttribute::Age0To14 => &mut self.age_0_to_14,
            CensusAttribute::AgeCountMales => &mut self.age_count_males,
            CensusAttribute::MaritalCount => &mut self.marital_count,
            CensusAttribute::Divorced => &mut self.divorced,
            CensusAttribute::NonMinorityCount => &mut self.non_minority_count,
            CensusAttribute::MinorityCount => &mut self.minority_count,
            CensusAttribute::LowIncomeStatusPct => &mut self.low_income_status_pct,
            CensusAttribute::HomeRenters => &mut self.home_renters,
            CensusAttribute::PeopleInHomes => &mut self.people_in_homes,
        };
        *slot = value;
    }

    /// Returns the first attribute whose value is null (or NaN), if any.
    #[must_use]
    pub fn first_missing(&self) -> Option<CensusAttribute> {
        CensusAttribute::ALL
            .into_iter()
            .find(|attr| self.get(*attr).is_none_or(f64::is_nan))
    }
}

/// One census geographic unit.
#[derive(Debug, Clone, PartialEq)]
pub struct CensusUnit {
    /// Identifier, unique within a city's roster.
    pub name: String,
    /// Unit boundary.
    pub geometry: MultiPolygon<f64>,
    /// Renamed demographic and economic counts.
    pub attributes: CensusAttributes,
    /// Source columns that were neither renamed nor dropped.
    pub passthrough: BTreeMap<String, serde_json::Value>,
}

impl CensusUnit {
    /// Whether any raw attribute or pass-through column is null.
    #[must_use]
    pub fn has_null(&self) -> bool {
        self.attributes.first_missing().is_some()
            || self.passthrough.values().any(serde_json::Value::is_null)
    }
}

/// Transient link from an incident to the unit it was resolved to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchedAssignment<'a> {
    /// Position of the incident in the matched batch.
    pub incident: usize,
    /// Name of the nearest unit.
    pub unit: &'a str,
    /// Distance to that unit, in working CRS units (0 when inside).
    pub distance: f64,
}

/// A census unit enriched with its incident count.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedUnit {
    /// The underlying unit.
    pub unit: CensusUnit,
    /// Number of incidents resolved to this unit.
    pub crime_count: u64,
}

/// Result of dividing two census counts.
///
/// A zero denominator yields [`Ratio::Undefined`] instead of a silent
/// non-finite float; [`Ratio::value`] still reproduces IEEE division for
/// callers that want the raw number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ratio {
    /// Finite quotient or pass-through value.
    Defined(f64),
    /// Denominator was zero.
    Undefined {
        /// The numerator that was divided by zero.
        numerator: f64,
    },
}

impl Ratio {
    /// Divides `numerator` by `denominator`, tagging zero denominators.
    #[must_use]
    pub fn of(numerator: f64, denominator: f64) -> Self {
        if denominator == 0.0 {
            Self::Undefined { numerator }
        } else {
            Self::Defined(numerator / denominator)
        }
    }

    /// The IEEE 754 value of the division (`inf`, `-inf` or `NaN` when
    /// undefined).
    #[must_use]
    pub fn value(self) -> f64 {
        match self {
            Self::Defined(v) => v,
            Self::Undefined { numerator } => numerator / 0.0,
        }
    }

    /// Returns the value only when it is defined and finite.
    #[must_use]
    pub fn finite(self) -> Option<f64> {
        match self {
            Self::Defined(v) if v.is_finite() => Some(v),
            _ => None,
        }
    }

    /// Whether the ratio had a zero denominator.
    #[must_use]
    pub const fn is_undefined(self) -> bool {
        matches!(self, Self::Undefined { .. })
    }
}

/// The fixed feature columns of the output table, in output order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum FeatureColumn {
    /// Population per square kilometre.
    PopDensity,
    /// High school dropouts over the certificate population.
    DropoutsToGrads,
    /// One-parent families over all families.
    OneParentToTwo,
    /// Crowded households over all households.
    CrowdedToNot,
    /// Children aged 0-14 over population.
    ChildrenToAdults,
    /// Non-minority over minority population.
    NonMinorityToMinority,
    /// Males over population.
    MaleToFemale,
    /// Divorced over marital status population.
    DivorceRate,
    /// Renter households over households by tenure.
    HomeRentersToOwners,
    /// Low income prevalence, passed through unchanged.
    LowIncomeStatusPct,
    /// Incidents per resident.
    CrimeRate,
}

impl FeatureColumn {
    /// Every column, in output order. `crime_rate` is last.
    pub const ALL: [Self; 11] = [
        Self::PopDensity,
        Self::DropoutsToGrads,
        Self::OneParentToTwo,
        Self::CrowdedToNot,
        Self::ChildrenToAdults,
        Self::NonMinorityToMinority,
        Self::MaleToFemale,
        Self::DivorceRate,
        Self::HomeRentersToOwners,
        Self::LowIncomeStatusPct,
        Self::CrimeRate,
    ];
}

/// One row of the harmonized per-unit feature table.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub struct FeatureRecord {
    /// Unit name (join key).
    pub name: String,
    pub pop_density: Ratio,
    pub dropouts_to_grads: Ratio,
    pub one_parent_to_two: Ratio,
    pub crowded_to_not: Ratio,
    pub children_to_adults: Ratio,
    pub non_minority_to_minority: Ratio,
    pub male_to_female: Ratio,
    pub divorce_rate: Ratio,
    pub home_renters_to_owners: Ratio,
    pub low_income_status_pct: Ratio,
    pub crime_rate: Ratio,
    /// Unit boundary, in whatever CRS the producing stage declares.
    pub geometry: MultiPolygon<f64>,
}

impl FeatureRecord {
    /// Returns the value of a feature column.
    #[must_use]
    pub const fn get(&self, column: FeatureColumn) -> Ratio {
        match column {
            FeatureColumn::PopDensity => self.pop_density,
            FeatureColumn::DropoutsToGrads => self.dropouts_to_grads,
            FeatureColumn::OneParentToTwo => self.one_parent_to_two,
            FeatureColumn::CrowdedToNot => self.crowded_to_not,
            FeatureColumn::ChildrenToAdults => self.children_to_adults,
            FeatureColumn::NonMinorityToMinority => self.non_minority_to_minority,
            FeatureColumn::MaleToFemale => self.male_to_female,
            FeatureColumn::DivorceRate => self.divorce_rate,
            FeatureColumn::HomeRentersToOwners => self.home_renters_to_owners,
            FeatureColumn::LowIncomeStatusPct => self.low_income_status_pct,
            FeatureColumn::CrimeRate => self.crime_rate,
        }
    }

    /// Columns whose ratio is undefined.
    #[must_use]
    pub fn undefined_columns(&self) -> Vec<FeatureColumn> {
        FeatureColumn::ALL
            .into_iter()
            .filter(|c| self.get(*c).is_undefined())
            .collect()
    }

    /// Properties in output order: `name`, every [`FeatureColumn`].
    #[must_use]
    pub fn properties(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut props = serde_json::Map::new();
        props.insert(
            "name".to_string(),
            serde_json::Value::String(self.name.clone()),
        );
        for column in FeatureColumn::ALL {
            let value = self
                .get(column)
                .finite()
                .and_then(serde_json::Number::from_f64)
                .map_or(serde_json::Value::Null, serde_json::Value::Number);
            props.insert(column.as_ref().to_string(), value);
        }
        props
    }
}
