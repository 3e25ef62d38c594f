use crate::config::{JoinConfig, UnmatchedPolicy};
use crate::crs::Crs;
use crate::error::{PipelineError, PipelineResult};
use crate::join::{spatial_join_containment, JoinOptions};
use crate::types::{
    Aggregates, EnrichedPolygon, GroupTotal, JoinOutcome, JoinedRecord, NeighborhoodPolygon,
    PointLayer, PointRecord, PolygonLayer,
};
use geo::Point;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Whether records without a group survive aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullGroup {
    #[default]
    Drop,
    Keep,
}

/// Turn raw records into point geometries tagged with `crs`.
///
/// Fails on the first record whose coordinates or value are not finite, or
/// (for WGS84) whose coordinates fall outside the longitude/latitude range.
/// Nothing is skipped.
pub fn build_point_geometry(records: Vec<PointRecord>, crs: Crs) -> PipelineResult<PointLayer> {
    let mut geometries = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let (x, y) = (record.longitude, record.latitude);
        let malformed = |reason: String| PipelineError::MalformedPoint {
            index,
            name: record.name.clone(),
            reason,
        };

        if !x.is_finite() || !y.is_finite() {
            return Err(malformed(format!("non-finite coordinates ({}, {})", x, y)));
        }
        if crs.is_geographic_wgs84() {
            if !(-180.0..=180.0).contains(&x) {
                return Err(malformed(format!("longitude {} out of range", x)));
            }
            if !(-90.0..=90.0).contains(&y) {
                return Err(malformed(format!("latitude {} out of range", y)));
            }
        }
        if !record.units.is_finite() {
            return Err(malformed(format!("non-finite value {}", record.units)));
        }
        geometries.push(Point::new(x, y));
    }

    Ok(PointLayer {
        crs,
        records,
        geometries,
    })
}

/// Sum `value` per group.
///
/// Groups only exist when at least one record maps to them. Values within a
/// group are summed in sorted order, so the same multiset of records gives
/// the same totals however the input is ordered.
pub fn aggregate_by_group<K, V>(
    joined: &[JoinedRecord],
    group_key: K,
    value: V,
    null_group: NullGroup,
) -> Aggregates
where
    K: Fn(&JoinedRecord) -> Option<&str>,
    V: Fn(&JoinedRecord) -> f64,
{
    let mut buckets: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut unmatched: Vec<f64> = Vec::new();

    for record in joined {
        match group_key(record) {
            Some(key) => buckets.entry(key.to_string()).or_default().push(value(record)),
            None => unmatched.push(value(record)),
        }
    }

    let groups = buckets
        .into_iter()
        .map(|(key, values)| (key, total(values)))
        .collect();

    let null_group = match null_group {
        NullGroup::Keep if !unmatched.is_empty() => Some(total(unmatched)),
        _ => None,
    };

    Aggregates { groups, null_group }
}

fn total(mut values: Vec<f64>) -> GroupTotal {
    values.sort_by(f64::total_cmp);
    GroupTotal {
        sum: values.iter().sum(),
        count: values.len(),
    }
}

/// The default grouping: units per containing neighborhood.
pub fn aggregate_units_by_neighborhood(joined: &[JoinedRecord], null_group: NullGroup) -> Aggregates {
    aggregate_by_group(
        joined,
        |j| j.neighborhood.as_deref(),
        |j| j.record.units,
        null_group,
    )
}

/// Left-join aggregates onto every polygon, keyed by `join_key`.
///
/// Polygon order and identity are preserved exactly; a polygon with no
/// aggregate entry gets `None`, never zero.
pub fn enrich_polygons<K>(
    polygons: &PolygonLayer,
    aggregates: &Aggregates,
    join_key: K,
) -> Vec<EnrichedPolygon>
where
    K: Fn(&NeighborhoodPolygon) -> &str,
{
    polygons
        .polygons
        .iter()
        .map(|polygon| EnrichedPolygon {
            value: aggregates.get(join_key(polygon)),
            polygon: polygon.clone(),
        })
        .collect()
}

/// Everything the pipeline derives from one pair of layers.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub outcome: JoinOutcome,
    pub aggregates: Aggregates,
    pub enriched: Vec<EnrichedPolygon>,
}

/// Build points, join, aggregate and enrich in one pass.
pub fn run_pipeline(
    records: Vec<PointRecord>,
    point_crs: Crs,
    polygons: &PolygonLayer,
    config: &JoinConfig,
) -> PipelineResult<PipelineOutput> {
    let points = build_point_geometry(records, point_crs)?;

    let options = JoinOptions {
        strategy: config.strategy,
        parallel: config.parallel,
    };
    let outcome = spatial_join_containment(&points, polygons, options)?;

    let unmatched = outcome.unmatched_count();
    if unmatched > 0 {
        match config.unmatched {
            UnmatchedPolicy::Ignore => {}
            UnmatchedPolicy::Warn => {
                warn!(count = unmatched, "points outside every neighborhood were excluded")
            }
            UnmatchedPolicy::Error => {
                return Err(PipelineError::UnmatchedPoints { count: unmatched })
            }
        }
    }

    let null_group = if config.keep_null_group {
        NullGroup::Keep
    } else {
        NullGroup::Drop
    };
    let mut aggregates = aggregate_units_by_neighborhood(&outcome.joined, null_group);
    if config.fill_missing_with_zero {
        aggregates = aggregates.fill_missing(polygons.ids(), 0.0);
    }

    let enriched = enrich_polygons(polygons, &aggregates, |p| p.id.as_str());

    info!(
        points = outcome.joined.len(),
        unmatched,
        ambiguous = outcome.ambiguities.len(),
        neighborhoods_with_data = aggregates.len(),
        neighborhoods = polygons.polygons.len(),
        "pipeline finished"
    );

    Ok(PipelineOutput {
        outcome,
        aggregates,
        enriched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    fn record(name: &str, x: f64, y: f64, units: f64) -> PointRecord {
        PointRecord {
            name: name.to_string(),
            longitude: x,
            latitude: y,
            units,
            status: "Completed".to_string(),
        }
    }

    fn joined(name: &str, hood: Option<&str>, units: f64) -> JoinedRecord {
        JoinedRecord {
            record: record(name, 0.0, 0.0, units),
            neighborhood: hood.map(str::to_string),
        }
    }

    fn square(id: &str, x0: f64) -> NeighborhoodPolygon {
        NeighborhoodPolygon {
            id: id.to_string(),
            geometry: MultiPolygon::new(vec![polygon![
                (x: x0, y: 0.0),
                (x: x0 + 1.0, y: 0.0),
                (x: x0 + 1.0, y: 1.0),
                (x: x0, y: 1.0),
            ]]),
        }
    }

    #[test]
    fn build_keeps_order_and_crs() {
        let layer = build_point_geometry(
            vec![record("a", 1.0, 2.0, 0.0), record("b", -73.9, 40.7, 0.0)],
            Crs::WGS84,
        )
        .unwrap();
        assert_eq!(layer.crs, Crs::WGS84);
        assert_eq!(layer.geometries, vec![Point::new(1.0, 2.0), Point::new(-73.9, 40.7)]);
        assert_eq!(layer.records[1].name, "b");
    }

    #[test]
    fn build_fails_fast_on_bad_coordinates() {
        let err = build_point_geometry(
            vec![record("ok", 0.0, 0.0, 1.0), record("bad", f64::NAN, 0.0, 1.0)],
            Crs::WGS84,
        )
        .unwrap_err();
        match err {
            PipelineError::MalformedPoint { index, name, .. } => {
                assert_eq!(index, 1);
                assert_eq!(name, "bad");
            }
            other => panic!("unexpected error {:?}", other),
        }

        assert!(build_point_geometry(vec![record("lat", 0.0, 91.0, 1.0)], Crs::WGS84).is_err());
        // Projected systems are not range-checked
        assert!(build_point_geometry(vec![record("ft", 987_000.0, 191_000.0, 1.0)], Crs::epsg(2263)).is_ok());
    }

    #[test]
    fn build_rejects_non_finite_value() {
        let err = build_point_geometry(
            vec![record("ok", 0.5, 0.5, 10.0), record("nan", 0.6, 0.5, f64::NAN)],
            Crs::WGS84,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedPoint { index: 1, .. }));

        let infinite = build_point_geometry(vec![record("inf", 0.5, 0.5, f64::INFINITY)], Crs::WGS84);
        assert!(infinite.is_err());
    }

    #[test]
    fn aggregate_drops_null_group_by_default() {
        let rows = vec![
            joined("a", Some("N1"), 10.0),
            joined("b", Some("N2"), 5.0),
            joined("c", None, 3.0),
            joined("d", Some("N1"), 2.0),
        ];
        let aggs = aggregate_units_by_neighborhood(&rows, NullGroup::Drop);
        assert_eq!(aggs.get("N1"), Some(12.0));
        assert_eq!(aggs.get("N2"), Some(5.0));
        assert_eq!(aggs.groups["N1"].count, 2);
        assert_eq!(aggs.len(), 2);
        assert!(aggs.null_group.is_none());

        let kept = aggregate_units_by_neighborhood(&rows, NullGroup::Keep);
        assert_eq!(kept.null_group, Some(GroupTotal { sum: 3.0, count: 1 }));
        assert_eq!(kept.groups, aggs.groups);
    }

    #[test]
    fn aggregate_is_order_independent() {
        let values = [0.1, 0.2, 0.3, 1e16, -1e16, 7.0, 0.7];
        let forward: Vec<JoinedRecord> = values
            .iter()
            .enumerate()
            .map(|(i, &v)| joined(&format!("p{}", i), Some("N1"), v))
            .collect();
        let mut backward = forward.clone();
        backward.reverse();
        let mut rotated = forward.clone();
        rotated.rotate_left(3);

        let a = aggregate_units_by_neighborhood(&forward, NullGroup::Drop);
        let b = aggregate_units_by_neighborhood(&backward, NullGroup::Drop);
        let c = aggregate_units_by_neighborhood(&rotated, NullGroup::Drop);
        assert_eq!(a.get("N1").map(f64::to_bits), b.get("N1").map(f64::to_bits));
        assert_eq!(a.get("N1").map(f64::to_bits), c.get("N1").map(f64::to_bits));
    }

    #[test]
    fn aggregate_by_status() {
        let mut rows = vec![joined("a", Some("N1"), 4.0), joined("b", None, 6.0)];
        rows[1].record.status = "In Progress".to_string();
        let aggs = aggregate_by_group(
            &rows,
            |j| Some(j.record.status.as_str()),
            |j| j.record.units,
            NullGroup::Drop,
        );
        assert_eq!(aggs.get("Completed"), Some(4.0));
        assert_eq!(aggs.get("In Progress"), Some(6.0));
    }

    #[test]
    fn enrich_keeps_every_polygon_and_no_more() {
        let layer = PolygonLayer::new(Crs::WGS84, vec![square("N1", 0.0), square("N2", 1.0), square("N3", 2.0)]);
        let rows = vec![joined("a", Some("N1"), 7.0), joined("ghost", Some("N9"), 1.0)];
        let aggs = aggregate_units_by_neighborhood(&rows, NullGroup::Drop);

        let enriched = enrich_polygons(&layer, &aggs, |p| p.id.as_str());
        let got: Vec<(&str, Option<f64>)> = enriched
            .iter()
            .map(|e| (e.polygon.id.as_str(), e.value))
            .collect();
        assert_eq!(got, vec![("N1", Some(7.0)), ("N2", None), ("N3", None)]);
    }

    #[test]
    fn zero_fill_is_opt_in() {
        let layer = PolygonLayer::new(Crs::WGS84, vec![square("N1", 0.0), square("N2", 1.0)]);
        let aggs = aggregate_units_by_neighborhood(&[joined("a", Some("N1"), 3.0)], NullGroup::Drop);
        let filled = aggs.fill_missing(layer.ids(), 0.0);

        assert_eq!(aggs.get("N2"), None);
        assert_eq!(filled.get("N2"), Some(0.0));
        assert_eq!(filled.get("N1"), Some(3.0));
    }

    #[test]
    fn pipeline_honours_unmatched_policy() {
        let layer = PolygonLayer::new(Crs::WGS84, vec![square("N1", 0.0)]);
        let records = vec![record("in", 0.5, 0.5, 1.0), record("out", 9.0, 9.0, 1.0)];

        let mut config = JoinConfig::default();
        let output = run_pipeline(records.clone(), Crs::WGS84, &layer, &config).unwrap();
        assert_eq!(output.outcome.joined.len(), 2);
        assert_eq!(output.aggregates.get("N1"), Some(1.0));

        config.unmatched = UnmatchedPolicy::Error;
        let err = run_pipeline(records, Crs::WGS84, &layer, &config).unwrap_err();
        assert_eq!(err, PipelineError::UnmatchedPoints { count: 1 });
    }

    #[test]
    fn pipeline_can_zero_fill_and_keep_null_group() {
        let layer = PolygonLayer::new(Crs::WGS84, vec![square("N1", 0.0), square("N2", 1.0)]);
        let config = JoinConfig {
            keep_null_group: true,
            fill_missing_with_zero: true,
            ..JoinConfig::default()
        };
        let output = run_pipeline(
            vec![record("in", 0.5, 0.5, 4.0), record("out", 9.0, 9.0, 2.0)],
            Crs::WGS84,
            &layer,
            &config,
        )
        .unwrap();

        assert_eq!(output.aggregates.null_group.map(|g| g.sum), Some(2.0));
        let values: Vec<Option<f64>> = output.enriched.iter().map(|e| e.value).collect();
        assert_eq!(values, vec![Some(4.0), Some(0.0)]);
    }
}
