//! Coordinate reference system identifiers.
//!
//! Only EPSG codes are supported. Each city is processed in its own
//! projected system so that Euclidean distance approximates ground
//! distance; nothing here validates that a code is appropriate for the
//! data it is applied to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An EPSG coordinate reference system code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    /// WGS 84 geographic coordinates (longitude, latitude).
    pub const WGS84: Self = Self::epsg(4326);

    /// Creates a CRS from a bare EPSG code.
    #[must_use]
    pub const fn epsg(code: u32) -> Self {
        Self { epsg: code }
    }

    /// Returns the authority string understood by PROJ (e.g. `"EPSG:2958"`).
    #[must_use]
    pub fn authority(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

/// Error returned when a CRS string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCrsError {
    /// The rejected input.
    pub input: String,
}

impl fmt::Display for InvalidCrsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid CRS '{}': expected 'EPSG:<code>' or a bare code",
            self.input
        )
    }
}

impl std::error::Error for InvalidCrsError {}

impl FromStr for Crs {
    type Err = InvalidCrsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let code = trimmed
            .get(..5)
            .filter(|prefix| prefix.eq_ignore_ascii_case("epsg:"))
            .map_or(trimmed, |_| &trimmed[5..]);

        code.parse::<u32>()
            .ok()
            .filter(|c| *c > 0)
            .map(Self::epsg)
            .ok_or_else(|| InvalidCrsError {
                input: s.to_string(),
            })
    }
}

impl TryFrom<String> for Crs {
    type Error = InvalidCrsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}
