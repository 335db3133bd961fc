use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::clusters::{Bounds, ClusterRender, Viewport, render_clusters};
use crate::error::AppError;
use crate::geo::Coordinate;
use crate::models::provider::{ProviderFilter, ProviderMarker};
use crate::sources::{FixedLocation, ProviderDirectory, locate};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/providers", post(create_provider).get(list_providers))
        .route("/map/clusters", get(map_clusters))
}

#[derive(Deserialize)]
pub struct CreateProviderRequest {
    pub name: String,
    pub location: Coordinate,
    #[serde(default)]
    pub specialties: Vec<String>,
    pub hourly_rate: f64,
    pub rating: f64,
}

#[derive(Deserialize)]
pub struct ClusterQuery {
    pub zoom: u8,
    pub south: Option<f64>,
    pub west: Option<f64>,
    pub north: Option<f64>,
    pub east: Option<f64>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub specialty: Option<String>,
    pub max_hourly_rate: Option<f64>,
    pub min_rating: Option<f64>,
}

impl ClusterQuery {
    fn bounds(&self) -> Result<Bounds, AppError> {
        match (self.south, self.west, self.north, self.east) {
            (None, None, None, None) => Ok(Bounds::WORLD),
            (Some(south), Some(west), Some(north), Some(east)) => {
                if south > north {
                    return Err(AppError::BadRequest(
                        "south must not be greater than north".to_string(),
                    ));
                }
                Coordinate::new(south, west)?;
                Coordinate::new(north, east)?;
                Ok(Bounds {
                    south,
                    west,
                    north,
                    east,
                })
            }
            _ => Err(AppError::BadRequest(
                "bounds need all of south, west, north and east".to_string(),
            )),
        }
    }

    fn filter(&self) -> ProviderFilter {
        ProviderFilter {
            specialty: self.specialty.clone(),
            max_hourly_rate: self.max_hourly_rate,
            min_rating: self.min_rating,
        }
    }

    fn device(&self) -> Option<Coordinate> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Coordinate::new(lat, lng).ok(),
            _ => None,
        }
    }
}

async fn create_provider(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateProviderRequest>,
) -> Result<Json<ProviderMarker>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if !payload.hourly_rate.is_finite() || payload.hourly_rate < 0.0 {
        return Err(AppError::BadRequest(
            "hourly_rate must be a non-negative amount".to_string(),
        ));
    }

    let provider = ProviderMarker {
        id: Uuid::new_v4(),
        name: payload.name,
        coordinate: Coordinate::new(payload.location.lat, payload.location.lng)?,
        specialties: payload.specialties,
        hourly_rate: payload.hourly_rate,
        rating: payload.rating.clamp(0.0, 5.0),
    };

    state.providers.insert(provider.id, provider.clone());
    Ok(Json(provider))
}

async fn list_providers(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ProviderFilter>,
) -> Result<Json<Vec<ProviderMarker>>, AppError> {
    Ok(Json(state.list_providers(&filter).await?))
}

async fn map_clusters(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClusterQuery>,
) -> Result<Json<ClusterRender>, AppError> {
    let viewport = Viewport {
        zoom: query.zoom,
        bounds: query.bounds()?,
    };
    let markers = state.list_providers(&query.filter()).await?;
    let origin = locate(&FixedLocation(query.device()), state.settings.fallback).await;

    let start = Instant::now();
    let render = render_clusters(state.grid.as_ref(), &markers, &viewport, origin);
    state
        .metrics
        .cluster_render_seconds
        .observe(start.elapsed().as_secs_f64());

    Ok(Json(render))
}
