use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::lifecycle::apply_transition;
use crate::engine::tracking::{TrackingDeps, TrackingSession, TrackingSettings};
use crate::error::AppError;
use crate::geo::Coordinate;
use crate::geo::hex::{H3Grid, HexGrid};
use crate::models::booking::{Booking, TransitionRequest};
use crate::models::provider::{ProviderFilter, ProviderMarker};
use crate::models::tracking::{StopReason, TrackingEvent};
use crate::observability::metrics::Metrics;
use crate::sources::{BookingSource, BookingUpdater, LocationProvider, ProviderDirectory};

/// In-memory stand-in for the hosted backend plus the running tracking sessions.
pub struct AppState {
    pub bookings: DashMap<Uuid, Booking>,
    pub providers: DashMap<Uuid, ProviderMarker>,
    pub sessions: DashMap<Uuid, Arc<TrackingSession>>,
    pub tracking_events_tx: broadcast::Sender<TrackingEvent>,
    pub settings: TrackingSettings,
    pub grid: Arc<dyn HexGrid>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(event_buffer_size: usize, settings: TrackingSettings) -> Self {
        let (tracking_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            bookings: DashMap::new(),
            providers: DashMap::new(),
            sessions: DashMap::new(),
            tracking_events_tx,
            settings,
            grid: Arc::new(H3Grid),
            metrics: Metrics::new(),
        }
    }

    pub fn tracking_deps(state: &Arc<Self>, location: Arc<dyn LocationProvider>) -> TrackingDeps {
        TrackingDeps {
            source: state.clone(),
            location,
            events: state.tracking_events_tx.clone(),
            metrics: Some(state.metrics.clone()),
        }
    }

    /// Records the provider's live position. Only accepted while the booking is
    /// in a status where the provider is on the move or on site.
    pub fn update_provider_location(
        &self,
        id: Uuid,
        coordinate: Coordinate,
    ) -> Result<Booking, AppError> {
        let mut booking = self
            .bookings
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("booking {id} not found")))?;

        if !booking.status.has_provider_position() {
            return Err(AppError::Conflict(format!(
                "booking {id} is {} and does not accept provider positions",
                booking.status
            )));
        }

        booking.provider_coordinate = Some(coordinate);
        booking.updated_at = Utc::now();
        Ok(booking.clone())
    }

    /// Forgets the session for `id` if its refresh loop is no longer running.
    pub fn evict_if_finished(&self, id: Uuid) -> bool {
        self.sessions
            .remove_if(&id, |_, session| !session.is_tracking())
            .is_some()
    }

    /// Drops sessions whose refresh loop ended on its own as their `Stopped`
    /// events arrive. Subscribes before returning, so sessions started after
    /// this call are covered. The task ends once the state is dropped.
    pub fn spawn_session_reaper(state: &Arc<Self>) -> JoinHandle<()> {
        let mut events = state.tracking_events_tx.subscribe();
        let weak: Weak<Self> = Arc::downgrade(state);

        tokio::spawn(async move {
            loop {
                let event = events.recv().await;
                let Some(state) = weak.upgrade() else {
                    break;
                };

                match event {
                    Ok(TrackingEvent::Stopped {
                        booking_id,
                        reason: StopReason::Finished,
                    }) => {
                        if state.evict_if_finished(booking_id) {
                            debug!(booking_id = %booking_id, "finished tracking session evicted");
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "session reaper lagged; sweeping finished sessions");
                        state.sessions.retain(|_, session| session.is_tracking());
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Stops and forgets every tracking session.
    pub fn shutdown_sessions(&self) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.stop();
            }
        }
    }
}

#[async_trait]
impl BookingSource for AppState {
    async fn get_booking(&self, id: Uuid) -> Result<Booking, AppError> {
        self.bookings
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("booking {id} not found")))
    }
}

#[async_trait]
impl BookingUpdater for AppState {
    async fn apply_transition(
        &self,
        id: Uuid,
        request: TransitionRequest,
    ) -> Result<Booking, AppError> {
        let mut entry = self
            .bookings
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("booking {id} not found")))?;

        let from = entry.status;
        let next = apply_transition(&entry, &request)?;
        *entry = next.clone();

        info!(booking_id = %id, from = %from, to = %next.status, "booking transition persisted");
        Ok(next)
    }
}

#[async_trait]
impl ProviderDirectory for AppState {
    async fn list_providers(
        &self,
        filter: &ProviderFilter,
    ) -> Result<Vec<ProviderMarker>, AppError> {
        let mut providers: Vec<ProviderMarker> = self
            .providers
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        providers.sort_by_key(|provider| provider.id);
        Ok(providers)
    }
}
