use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::booking::BookingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingSnapshot {
    pub distance_km: f64,
    pub eta_minutes: f64,
    pub as_of: DateTime<Utc>,
    /// Set when the client position came from the fallback coordinate.
    pub approximate: bool,
}

/// The client-visible state of one tracked booking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingView {
    pub booking_id: Uuid,
    pub status: Option<BookingStatus>,
    pub snapshot: Option<TrackingSnapshot>,
    pub tracking: bool,
    pub consecutive_failures: u32,
    /// Mirrors the current snapshot's flag; false while there is no snapshot.
    pub approximate: bool,
}

impl TrackingView {
    pub fn idle(booking_id: Uuid, status: Option<BookingStatus>) -> Self {
        Self {
            booking_id,
            status,
            snapshot: None,
            tracking: false,
            consecutive_failures: 0,
            approximate: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Finished,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingEvent {
    /// A move between two observed statuses. Learning a booking's first
    /// status is not a change and is not reported.
    StatusChanged {
        booking_id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
        at: DateTime<Utc>,
    },
    Snapshot {
        booking_id: Uuid,
        snapshot: TrackingSnapshot,
    },
    FetchFailed {
        booking_id: Uuid,
        error: String,
        consecutive_failures: u32,
    },
    Stopped {
        booking_id: Uuid,
        reason: StopReason,
    },
}

impl TrackingEvent {
    pub fn booking_id(&self) -> Uuid {
        match self {
            TrackingEvent::StatusChanged { booking_id, .. }
            | TrackingEvent::Snapshot { booking_id, .. }
            | TrackingEvent::FetchFailed { booking_id, .. }
            | TrackingEvent::Stopped { booking_id, .. } => *booking_id,
        }
    }
}
