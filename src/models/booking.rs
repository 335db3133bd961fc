use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Coordinate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    EnRoute,
    Arrived,
    Shooting,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 7] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::EnRoute,
        BookingStatus::Arrived,
        BookingStatus::Shooting,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Statuses during which live distance/ETA polling is meaningful.
    pub fn is_trackable(self) -> bool {
        matches!(
            self,
            BookingStatus::Confirmed
                | BookingStatus::EnRoute
                | BookingStatus::Arrived
                | BookingStatus::Shooting
        )
    }

    /// Statuses in which the provider's position is reported.
    pub fn has_provider_position(self) -> bool {
        matches!(
            self,
            BookingStatus::EnRoute | BookingStatus::Arrived | BookingStatus::Shooting
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::EnRoute => "en-route",
            BookingStatus::Arrived => "arrived",
            BookingStatus::Shooting => "shooting",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub final_price: Option<f64>,
    pub client_coordinate: Option<Coordinate>,
    pub provider_coordinate: Option<Coordinate>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    /// A freshly requested booking awaiting provider confirmation.
    pub fn requested(
        client_id: Uuid,
        provider_id: Uuid,
        client_coordinate: Option<Coordinate>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            client_id,
            provider_id,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            final_price: None,
            client_coordinate,
            provider_coordinate: None,
            cancellation_reason: None,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }
}

/// A requested status change together with the fields some targets require.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub target: BookingStatus,
    #[serde(default)]
    pub final_price: Option<f64>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub cancelled_by: Option<String>,
}

impl TransitionRequest {
    pub fn to(target: BookingStatus) -> Self {
        Self {
            target,
            final_price: None,
            cancellation_reason: None,
            cancelled_by: None,
        }
    }

    pub fn confirm(final_price: f64) -> Self {
        Self {
            final_price: Some(final_price),
            ..Self::to(BookingStatus::Confirmed)
        }
    }

    pub fn cancel(reason: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            cancellation_reason: Some(reason.into()),
            cancelled_by: Some(actor.into()),
            ..Self::to(BookingStatus::Cancelled)
        }
    }
}
