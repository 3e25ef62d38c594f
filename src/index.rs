use crate::types::NeighborhoodPolygon;
use geo::algorithm::bounding_rect::BoundingRect;
use geo::Point;
use rstar::{RTree, RTreeObject, AABB};

// Bounding box of one polygon plus its position in the input layer. Envelope
// hits are only candidates; callers still run the exact containment test.
pub struct PolygonEnvelope {
    pub index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for PolygonEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

pub struct PolygonIndex {
    tree: RTree<PolygonEnvelope>,
}

impl PolygonIndex {
    pub fn build(polygons: &[NeighborhoodPolygon]) -> Self {
        let items: Vec<PolygonEnvelope> = polygons
            .iter()
            .enumerate()
            // Empty geometries have no bounding box and can contain nothing
            .filter_map(|(index, polygon)| {
                polygon.geometry.bounding_rect().map(|rect| PolygonEnvelope {
                    index,
                    aabb: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();

        PolygonIndex {
            tree: RTree::bulk_load(items),
        }
    }

    /// Indices of polygons whose bounding box covers `point`, in input order.
    pub fn candidates(&self, point: &Point<f64>) -> Vec<usize> {
        let envelope = AABB::from_point([point.x(), point.y()]);
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|item| item.index)
            .collect();
        hits.sort_unstable();
        hits
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}
