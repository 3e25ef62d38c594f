use crate::config::AppConfig;
use crate::index::PolygonIndex;
use crate::join::containing_polygon;
use crate::render::{neighborhood_features, Styles};
use crate::types::{EnrichedPolygon, NeighborhoodPolygon};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use geo::Point;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

pub struct AppState {
    pub enriched: Vec<EnrichedPolygon>,
    // Same order as `enriched`, for the containment test
    pub polygons: Vec<NeighborhoodPolygon>,
    pub index: PolygonIndex,
    pub neighborhoods: serde_json::Value,
}

impl AppState {
    pub fn new(enriched: Vec<EnrichedPolygon>, styles: &Styles) -> Result<Self> {
        let neighborhoods = serde_json::to_value(neighborhood_features(&enriched, &styles.fill))?;
        let polygons: Vec<NeighborhoodPolygon> =
            enriched.iter().map(|e| e.polygon.clone()).collect();
        let index = PolygonIndex::build(&polygons);
        info!(polygons = index.len(), "spatial index built");

        Ok(AppState {
            enriched,
            polygons,
            index,
            neighborhoods,
        })
    }

    /// Coordinates are in the polygon layer's reference system.
    pub fn lookup(&self, lon: f64, lat: f64) -> Option<LookupResponse> {
        let point = Point::new(lon, lat);
        containing_polygon(&point, &self.polygons, &self.index).map(|i| {
            let hit = &self.enriched[i];
            LookupResponse {
                id: hit.polygon.id.clone(),
                value: hit.value,
            }
        })
    }
}

#[derive(Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct LookupResponse {
    pub id: String,
    pub value: Option<f64>,
}

pub fn router(state: Arc<AppState>, static_dir: &std::path::Path) -> Router {
    Router::new()
        .route("/api/neighborhood", get(lookup_handler))
        .route("/api/neighborhoods", get(neighborhoods_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: &AppConfig, state: AppState) -> Result<()> {
    let state = Arc::new(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    info!("Starting server on http://{}", addr);

    let app = router(state, &config.output.dir);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn lookup_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Json<Option<LookupResponse>> {
    Json(state.lookup(params.lon, params.lat))
}

async fn neighborhoods_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.neighborhoods.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::NumericPalette;
    use geo::{polygon, MultiPolygon};

    fn enriched(id: &str, x0: f64, value: Option<f64>) -> EnrichedPolygon {
        EnrichedPolygon {
            polygon: NeighborhoodPolygon {
                id: id.to_string(),
                geometry: MultiPolygon::new(vec![polygon![
                    (x: x0, y: 0.0),
                    (x: x0 + 1.0, y: 0.0),
                    (x: x0 + 1.0, y: 1.0),
                    (x: x0, y: 1.0),
                ]]),
            },
            value,
        }
    }

    fn state() -> AppState {
        let styles = Styles {
            fill: NumericPalette::linear(&["#000000".to_string()], &[4.0], "#cccccc").unwrap(),
            status: None,
            legends: Vec::new(),
        };
        AppState::new(
            vec![enriched("N1", 0.0, Some(4.0)), enriched("N2", 1.0, None)],
            &styles,
        )
        .unwrap()
    }

    #[test]
    fn lookup_reports_value_or_no_data() {
        let state = state();
        assert_eq!(
            state.lookup(0.5, 0.5),
            Some(LookupResponse {
                id: "N1".to_string(),
                value: Some(4.0)
            })
        );
        assert_eq!(
            state.lookup(1.5, 0.5),
            Some(LookupResponse {
                id: "N2".to_string(),
                value: None
            })
        );
        assert_eq!(state.lookup(10.0, 10.0), None);
    }

    #[test]
    fn neighborhoods_payload_is_a_feature_collection() {
        let state = state();
        assert_eq!(state.neighborhoods["type"], "FeatureCollection");
        assert_eq!(state.neighborhoods["features"].as_array().unwrap().len(), 2);
    }
}
