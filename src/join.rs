//! Point-in-polygon containment join.
//!
//! Containment is boundary-inclusive. A point in the interior of a polygon is
//! preferred over one that only touches a boundary, so a project sitting on
//! the shared edge of two neighborhoods goes to the first of them in input
//! order without being reported as ambiguous. Only a point in the interior of
//! two or more polygons (a genuine overlap) produces an [`Ambiguity`].

use crate::config::JoinStrategy;
use crate::error::{PipelineError, PipelineResult};
use crate::index::PolygonIndex;
use crate::types::{Ambiguity, JoinOutcome, JoinedRecord, NeighborhoodPolygon, PointLayer, PolygonLayer};
use geo::algorithm::coordinate_position::{CoordPos, CoordinatePosition};
use geo::Point;
use rayon::prelude::*;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOptions {
    pub strategy: JoinStrategy,
    pub parallel: bool,
}

impl Default for JoinOptions {
    fn default() -> Self {
        JoinOptions {
            strategy: JoinStrategy::Indexed,
            parallel: false,
        }
    }
}

#[derive(Debug, Default, PartialEq)]
struct Containment {
    interior: Vec<usize>,
    boundary: Option<usize>,
}

impl Containment {
    fn chosen(&self) -> Option<usize> {
        self.interior.first().copied().or(self.boundary)
    }
}

fn locate<I>(point: &Point<f64>, polygons: &[NeighborhoodPolygon], candidates: I) -> Containment
where
    I: IntoIterator<Item = usize>,
{
    let mut found = Containment::default();
    for i in candidates {
        match polygons[i].geometry.coordinate_position(&point.0) {
            CoordPos::Inside => found.interior.push(i),
            CoordPos::OnBoundary => {
                found.boundary.get_or_insert(i);
            }
            CoordPos::Outside => {}
        }
    }
    found
}

/// Index of the polygon `point` is assigned to under the join's containment
/// rules, using `index` to narrow the candidates.
pub fn containing_polygon(
    point: &Point<f64>,
    polygons: &[NeighborhoodPolygon],
    index: &PolygonIndex,
) -> Option<usize> {
    locate(point, polygons, index.candidates(point)).chosen()
}

/// Assign every point to the polygon containing it (left join).
///
/// Fails with [`PipelineError::CoordinateSystemMismatch`] when the layers
/// are tagged with different systems. The output has one record per input
/// point, in input order, and is the same for every [`JoinStrategy`] and
/// with or without parallelism.
pub fn spatial_join_containment(
    points: &PointLayer,
    polygons: &PolygonLayer,
    options: JoinOptions,
) -> PipelineResult<JoinOutcome> {
    if points.crs != polygons.crs {
        return Err(PipelineError::CoordinateSystemMismatch {
            points: points.crs,
            polygons: polygons.crs,
        });
    }

    let shapes = &polygons.polygons;
    let index = match options.strategy {
        JoinStrategy::Indexed => Some(PolygonIndex::build(shapes)),
        JoinStrategy::Naive => None,
    };

    debug!(
        points = points.geometries.len(),
        polygons = shapes.len(),
        strategy = ?options.strategy,
        parallel = options.parallel,
        "running containment join"
    );

    let find = |point: &Point<f64>| match &index {
        Some(index) => locate(point, shapes, index.candidates(point)),
        None => locate(point, shapes, 0..shapes.len()),
    };

    let matches: Vec<Containment> = if options.parallel {
        points.geometries.par_iter().map(find).collect()
    } else {
        points.geometries.iter().map(find).collect()
    };

    let mut joined = Vec::with_capacity(matches.len());
    let mut ambiguities = Vec::new();

    for (point_index, (record, found)) in points.records.iter().zip(matches).enumerate() {
        let chosen = found.chosen().map(|i| shapes[i].id.clone());

        if found.interior.len() > 1 {
            let ambiguity = Ambiguity {
                point_index,
                point_name: record.name.clone(),
                chosen: shapes[found.interior[0]].id.clone(),
                also_contained_by: found.interior[1..]
                    .iter()
                    .map(|&i| shapes[i].id.clone())
                    .collect(),
            };
            warn!(
                point = %ambiguity.point_name,
                chosen = %ambiguity.chosen,
                others = ?ambiguity.also_contained_by,
                "point lies inside overlapping polygons; using the first"
            );
            ambiguities.push(ambiguity);
        }

        joined.push(JoinedRecord {
            record: record.clone(),
            neighborhood: chosen,
        });
    }

    Ok(JoinOutcome { joined, ambiguities })
}
