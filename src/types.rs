use crate::crs::Crs;
use geo::{MultiPolygon, Point};
use serde::Serialize;
use std::collections::BTreeMap;

/// One row of the housing-project table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointRecord {
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
    // Affordable unit count
    pub units: f64,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct NeighborhoodPolygon {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
}

/// Point geometries tagged with their reference system, one per record.
#[derive(Debug, Clone)]
pub struct PointLayer {
    pub crs: Crs,
    pub records: Vec<PointRecord>,
    pub geometries: Vec<Point<f64>>,
}

#[derive(Debug, Clone)]
pub struct PolygonLayer {
    pub crs: Crs,
    pub polygons: Vec<NeighborhoodPolygon>,
}

impl PolygonLayer {
    pub fn new(crs: Crs, polygons: Vec<NeighborhoodPolygon>) -> Self {
        PolygonLayer { crs, polygons }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.polygons.iter().map(|p| p.id.as_str())
    }
}

/// A point annotated with the neighborhood that contains it, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedRecord {
    pub record: PointRecord,
    pub neighborhood: Option<String>,
}

/// Raised when a point lies in the interior of more than one polygon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ambiguity {
    pub point_index: usize,
    pub point_name: String,
    pub chosen: String,
    pub also_contained_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub joined: Vec<JoinedRecord>,
    pub ambiguities: Vec<Ambiguity>,
}

impl JoinOutcome {
    pub fn unmatched_count(&self) -> usize {
        self.joined.iter().filter(|j| j.neighborhood.is_none()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GroupTotal {
    pub sum: f64,
    pub count: usize,
}

/// Summed values per group. A group only exists if at least one record fell
/// into it; absence means "no data", not zero.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Aggregates {
    pub groups: BTreeMap<String, GroupTotal>,
    /// Total for records with no group, present only when the caller kept it.
    pub null_group: Option<GroupTotal>,
}

impl Aggregates {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.groups.get(key).map(|g| g.sum)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Explicitly insert `value` for every id that has no entry yet.
    pub fn fill_missing<'a, I>(&self, ids: I, value: f64) -> Aggregates
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut filled = self.clone();
        for id in ids {
            filled
                .groups
                .entry(id.to_string())
                .or_insert(GroupTotal { sum: value, count: 0 });
        }
        filled
    }
}

#[derive(Debug, Clone)]
pub struct EnrichedPolygon {
    pub polygon: NeighborhoodPolygon,
    pub value: Option<f64>,
}
