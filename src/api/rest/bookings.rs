use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::lifecycle::apply_transition;
use crate::engine::tracking::{StartOutcome, TrackingSession};
use crate::error::AppError;
use crate::geo::Coordinate;
use crate::models::booking::{Booking, TransitionRequest};
use crate::models::tracking::TrackingView;
use crate::sources::{BookingSource, BookingUpdater, FixedLocation};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/:id", get(get_booking))
        .route("/bookings/:id/transitions", post(transition_booking))
        .route(
            "/bookings/:id/provider-location",
            patch(update_provider_location),
        )
        .route(
            "/bookings/:id/tracking",
            post(start_tracking)
                .get(tracking_view)
                .delete(stop_tracking),
        )
}

#[derive(Deserialize)]
pub struct CreateBookingRequest {
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub client_location: Option<Coordinate>,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: Coordinate,
}

/// The viewer's device position, when the client shares it.
#[derive(Deserialize)]
pub struct DeviceLocation {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl DeviceLocation {
    pub fn coordinate(&self) -> Option<Coordinate> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Coordinate::new(lat, lng).ok(),
            _ => None,
        }
    }
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateBookingRequest>,
) -> Result<Json<Booking>, AppError> {
    let client_location = payload
        .client_location
        .map(|c| Coordinate::new(c.lat, c.lng))
        .transpose()?;

    let booking = Booking::requested(payload.client_id, payload.provider_id, client_location);
    state.bookings.insert(booking.id, booking.clone());

    Ok(Json(booking))
}

async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.get_booking(id).await?))
}

async fn transition_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Booking>, AppError> {
    let current = state.get_booking(id).await?;

    // Checked here first so obvious rejections never reach the backend.
    if let Err(err) = apply_transition(&current, &request) {
        state
            .metrics
            .booking_transitions_total
            .with_label_values(&["rejected"])
            .inc();
        warn!(booking_id = %id, requested = %request.target, error = %err, "transition rejected");
        return Err(err.into());
    }

    let outcome = state.apply_transition(id, request).await;
    let label = if outcome.is_ok() { "applied" } else { "rejected" };
    state
        .metrics
        .booking_transitions_total
        .with_label_values(&[label])
        .inc();

    Ok(Json(outcome?))
}

async fn update_provider_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Booking>, AppError> {
    let location = Coordinate::new(payload.location.lat, payload.location.lng)?;
    Ok(Json(state.update_provider_location(id, location)?))
}

async fn start_tracking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(device): Query<DeviceLocation>,
) -> Result<Json<TrackingView>, AppError> {
    if let Some(session) = state.sessions.get(&id).map(|entry| entry.value().clone()) {
        if session.is_tracking() {
            return Ok(Json(session.view()));
        }
    }
    state.evict_if_finished(id);

    let booking = state.get_booking(id).await?;
    let deps = AppState::tracking_deps(&state, Arc::new(FixedLocation(device.coordinate())));
    let session = Arc::new(TrackingSession::from_booking(&booking, deps, state.settings));

    let outcome = session.start().await?;
    if let StartOutcome::Tracking(ticket) = outcome {
        info!(booking_id = %ticket.booking_id, "tracking session registered");
        if let Some(previous) = state.sessions.insert(id, session.clone()) {
            previous.stop();
        }
        // The run may already have ended before it was registered.
        state.evict_if_finished(id);
    }

    Ok(Json(session.view()))
}

async fn tracking_view(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TrackingView>, AppError> {
    let session = state
        .sessions
        .get(&id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("booking {id} is not being tracked")))?;

    Ok(Json(session.view()))
}

async fn stop_tracking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TrackingView>, AppError> {
    let (_, session) = state
        .sessions
        .remove(&id)
        .ok_or_else(|| AppError::NotFound(format!("booking {id} is not being tracked")))?;

    session.stop();
    Ok(Json(session.view()))
}
