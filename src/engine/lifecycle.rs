use chrono::Utc;

use crate::error::TransitionError;
use crate::models::booking::{Booking, BookingStatus, PaymentStatus, TransitionRequest};

pub const MIN_CANCELLATION_REASON_CHARS: usize = 10;

/// Every allowed `(from, to)` edge of the booking lifecycle.
const TRANSITIONS: &[(BookingStatus, BookingStatus)] = &[
    (BookingStatus::Pending, BookingStatus::Confirmed),
    (BookingStatus::Confirmed, BookingStatus::EnRoute),
    (BookingStatus::EnRoute, BookingStatus::Arrived),
    (BookingStatus::Arrived, BookingStatus::Shooting),
    (BookingStatus::Shooting, BookingStatus::Completed),
    (BookingStatus::Pending, BookingStatus::Cancelled),
    (BookingStatus::Confirmed, BookingStatus::Cancelled),
    (BookingStatus::EnRoute, BookingStatus::Cancelled),
];

pub fn is_allowed(from: BookingStatus, to: BookingStatus) -> bool {
    TRANSITIONS.contains(&(from, to))
}

pub fn allowed_targets(from: BookingStatus) -> Vec<BookingStatus> {
    TRANSITIONS
        .iter()
        .filter(|(source, _)| *source == from)
        .map(|(_, target)| *target)
        .collect()
}

/// Validates `request` against the booking's current status and returns the
/// booking as it looks after the transition. The input is never touched, so a
/// rejection leaves no partial change behind.
pub fn apply_transition(
    booking: &Booking,
    request: &TransitionRequest,
) -> Result<Booking, TransitionError> {
    let from = booking.status;
    let to = request.target;

    if from.is_terminal() {
        return Err(TransitionError::TerminalState(from));
    }
    if !is_allowed(from, to) {
        return Err(TransitionError::InvalidTransition { from, to });
    }

    let now = Utc::now();
    let mut next = booking.clone();

    match to {
        BookingStatus::Confirmed => {
            let price = request.final_price.ok_or(TransitionError::MissingPrice)?;
            if !price.is_finite() || price < 0.0 {
                return Err(TransitionError::InvalidPrice(price));
            }
            next.final_price = Some(price);
            next.confirmed_at = Some(now);
        }
        BookingStatus::Completed => {
            next.payment_status = PaymentStatus::Paid;
            next.provider_coordinate = None;
            next.completed_at = Some(now);
        }
        BookingStatus::Cancelled => {
            let (reason, actor) = validate_cancellation(request)?;
            next.payment_status = PaymentStatus::Refunded;
            next.cancellation_reason = Some(reason);
            next.cancelled_by = Some(actor);
            next.provider_coordinate = None;
            next.cancelled_at = Some(now);
        }
        _ => {}
    }

    next.status = to;
    next.updated_at = now;
    Ok(next)
}

fn validate_cancellation(request: &TransitionRequest) -> Result<(String, String), TransitionError> {
    let reason = request
        .cancellation_reason
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    let length = reason.chars().count();
    if length < MIN_CANCELLATION_REASON_CHARS {
        return Err(TransitionError::InvalidCancellationReason(format!(
            "reason must be at least {MIN_CANCELLATION_REASON_CHARS} characters, got {length}"
        )));
    }

    let actor = request
        .cancelled_by
        .as_deref()
        .map(str::trim)
        .filter(|actor| !actor.is_empty())
        .ok_or_else(|| {
            TransitionError::InvalidCancellationReason(
                "the cancelling party must be identified".to_string(),
            )
        })?;

    Ok((reason.to_string(), actor.to_string()))
}
