use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::Coordinate;
use crate::models::booking::{Booking, TransitionRequest};
use crate::models::provider::{ProviderFilter, ProviderMarker};

#[async_trait]
pub trait BookingSource: Send + Sync {
    /// Fails with [`AppError::NotFound`] when no booking has this id.
    async fn get_booking(&self, id: Uuid) -> Result<Booking, AppError>;
}

#[async_trait]
pub trait BookingUpdater: Send + Sync {
    /// Persists a status change. Implementations must enforce the same
    /// lifecycle rules as [`crate::engine::lifecycle::apply_transition`].
    async fn apply_transition(
        &self,
        id: Uuid,
        request: TransitionRequest,
    ) -> Result<Booking, AppError>;
}

#[async_trait]
pub trait ProviderDirectory: Send + Sync {
    async fn list_providers(&self, filter: &ProviderFilter)
    -> Result<Vec<ProviderMarker>, AppError>;
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// `None` when the device cannot report a position.
    async fn current_location(&self) -> Option<Coordinate>;
}

/// A location source that always reports the same answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLocation(pub Option<Coordinate>);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_location(&self) -> Option<Coordinate> {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub coordinate: Coordinate,
    /// True when `coordinate` is the configured fallback rather than a fix.
    pub approximate: bool,
}

/// Resolves the current position, substituting `fallback` when the provider has
/// nothing or reports an out-of-range fix.
pub async fn locate<L>(provider: &L, fallback: Coordinate) -> Position
where
    L: LocationProvider + ?Sized,
{
    match provider.current_location().await {
        Some(coordinate) if coordinate.is_valid() => Position {
            coordinate,
            approximate: false,
        },
        _ => Position {
            coordinate: fallback,
            approximate: true,
        },
    }
}
