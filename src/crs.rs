use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A coordinate reference system, identified by its EPSG code.
///
/// Layers only carry the tag; nothing in this crate reprojects. Two layers
/// can be joined only when their tags are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs {
    epsg: u32,
}

impl Crs {
    /// WGS84 longitude/latitude. GeoJSON (RFC 7946) data is always in this system.
    pub const WGS84: Crs = Crs { epsg: 4326 };

    pub const fn epsg(code: u32) -> Self {
        Crs { epsg: code }
    }

    pub fn code(&self) -> u32 {
        self.epsg
    }

    pub fn is_geographic_wgs84(&self) -> bool {
        self.epsg == 4326
    }
}

impl Default for Crs {
    fn default() -> Self {
        Crs::WGS84
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

impl FromStr for Crs {
    type Err = PipelineError;

    /// Accepts `EPSG:4326`, `epsg:4326`, `4326`, OGC URNs such as
    /// `urn:ogc:def:crs:EPSG::2263`, and the CRS84 / WGS84 aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();

        let last_segment = upper.rsplit(':').next().unwrap_or("");
        if upper == "WGS84" || last_segment == "CRS84" {
            return Ok(Crs::WGS84);
        }

        let code = upper
            .rsplit(':')
            .find(|part| !part.is_empty())
            .unwrap_or("");

        if !upper.starts_with("EPSG:")
            && !upper.starts_with("URN:OGC:DEF:CRS:EPSG:")
            && upper != code
        {
            return Err(PipelineError::InvalidCrs(trimmed.to_string()));
        }

        code.parse::<u32>()
            .map(Crs::epsg)
            .map_err(|_| PipelineError::InvalidCrs(trimmed.to_string()))
    }
}

impl TryFrom<String> for Crs {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}
