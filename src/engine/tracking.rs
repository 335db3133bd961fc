use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::{Coordinate, DEFAULT_SPEED_KMH, distance_and_eta};
use crate::models::booking::{Booking, BookingStatus};
use crate::models::tracking::{StopReason, TrackingEvent, TrackingSnapshot, TrackingView};
use crate::observability::metrics::Metrics;
use crate::sources::{BookingSource, LocationProvider, locate};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Connaught Place, New Delhi.
pub const DEFAULT_FALLBACK: Coordinate = Coordinate {
    lat: 28.6139,
    lng: 77.2090,
};

#[derive(Debug, Clone, Copy)]
pub struct TrackingSettings {
    pub interval: Duration,
    pub assumed_speed_kmh: f64,
    pub fallback: Coordinate,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REFRESH_INTERVAL,
            assumed_speed_kmh: DEFAULT_SPEED_KMH,
            fallback: DEFAULT_FALLBACK,
        }
    }
}

/// Collaborators a session talks to.
#[derive(Clone)]
pub struct TrackingDeps {
    pub source: Arc<dyn BookingSource>,
    pub location: Arc<dyn LocationProvider>,
    pub events: broadcast::Sender<TrackingEvent>,
    pub metrics: Option<Metrics>,
}

/// Identifies one run of a session's refresh loop. A ticket goes stale as soon
/// as the session is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingTicket {
    pub booking_id: Uuid,
    epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Tracking(TrackingTicket),
    /// The booking is outside the tracking window; carries the last known status.
    NotTracking(Option<BookingStatus>),
}

impl StartOutcome {
    pub fn is_tracking(&self) -> bool {
        matches!(self, StartOutcome::Tracking(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observation {
    Applied { finished: bool },
    Discarded,
}

struct Running {
    ticket: TrackingTicket,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    booking_id: Uuid,
    deps: TrackingDeps,
    settings: TrackingSettings,
    view_tx: watch::Sender<TrackingView>,
    epoch: AtomicU64,
}

/// Keeps one booking's live status and distance/ETA current while the booking
/// is inside its tracking window.
pub struct TrackingSession {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

impl TrackingSession {
    pub fn new(booking_id: Uuid, deps: TrackingDeps, settings: TrackingSettings) -> Self {
        let (view_tx, _view_rx) = watch::channel(TrackingView::idle(booking_id, None));

        Self {
            inner: Arc::new(Inner {
                booking_id,
                deps,
                settings,
                view_tx,
                epoch: AtomicU64::new(0),
            }),
            running: Mutex::new(None),
        }
    }

    /// A session that already knows the booking's status, so `start` can
    /// decide without fetching.
    pub fn from_booking(booking: &Booking, deps: TrackingDeps, settings: TrackingSettings) -> Self {
        let session = Self::new(booking.id, deps, settings);
        session
            .inner
            .view_tx
            .send_modify(|view| view.status = Some(booking.status));
        session
    }

    pub fn booking_id(&self) -> Uuid {
        self.inner.booking_id
    }

    pub fn view(&self) -> TrackingView {
        self.inner.view_tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<TrackingView> {
        self.inner.view_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.inner.deps.events.subscribe()
    }

    pub fn is_tracking(&self) -> bool {
        self.inner.view_tx.borrow().tracking
    }

    pub fn is_current(&self, ticket: &TrackingTicket) -> bool {
        ticket.booking_id == self.inner.booking_id
            && ticket.epoch == self.inner.epoch.load(Ordering::SeqCst)
            && self.is_tracking()
    }

    /// Starts the refresh loop if the booking is inside its tracking window.
    ///
    /// When the status is not known yet, one fetch is made to learn it; its
    /// failure is returned to the caller. Starting a session that is already
    /// running hands back the existing ticket.
    pub async fn start(&self) -> Result<StartOutcome, AppError> {
        if let Some(ticket) = self.live_ticket() {
            return Ok(StartOutcome::Tracking(ticket));
        }

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let known = self.inner.view_tx.borrow().status;
        let primed = known.is_none();
        if primed {
            let booking = self.inner.deps.source.get_booking(self.inner.booking_id).await?;
            self.inner.observe(epoch, booking).await;
        }

        let status = self.inner.view_tx.borrow().status;
        let Some(status) = status.filter(|status| status.is_trackable()) else {
            info!(booking_id = %self.inner.booking_id, status = ?status, "booking outside tracking window");
            return Ok(StartOutcome::NotTracking(status));
        };

        let mut running = self.lock_running();
        if let Some(existing) = running.as_ref() {
            if !existing.task.is_finished() && self.is_current(&existing.ticket) {
                return Ok(StartOutcome::Tracking(existing.ticket));
            }
        }

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let ticket = TrackingTicket {
            booking_id: self.inner.booking_id,
            epoch,
        };
        let cancel = CancellationToken::new();

        self.inner.view_tx.send_modify(|view| view.tracking = true);
        if let Some(metrics) = &self.inner.deps.metrics {
            metrics.tracking_sessions_active.inc();
        }

        let first_cycle = if primed {
            Instant::now() + self.inner.settings.interval
        } else {
            Instant::now()
        };
        let task = tokio::spawn(refresh_loop(
            self.inner.clone(),
            epoch,
            cancel.clone(),
            first_cycle,
        ));

        info!(booking_id = %self.inner.booking_id, status = %status, "tracking started");
        *running = Some(Running {
            ticket,
            cancel,
            task,
        });

        Ok(StartOutcome::Tracking(ticket))
    }

    /// Stops the refresh loop. No fetch is issued after this returns and any
    /// response still in flight is dropped without touching the view.
    pub fn stop(&self) {
        let running = self.lock_running().take();
        let Some(running) = running else {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            return;
        };

        running.cancel.cancel();
        self.inner.end_run(running.ticket.epoch, StopReason::Stopped);
    }

    fn live_ticket(&self) -> Option<TrackingTicket> {
        self.lock_running()
            .as_ref()
            .filter(|running| !running.task.is_finished() && self.is_current(&running.ticket))
            .map(|running| running.ticket)
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.deps.metrics {
            metrics
                .tracking_refreshes_total
                .with_label_values(&[outcome])
                .inc();
        }
    }

    fn emit(&self, event: TrackingEvent) {
        let _ = self.deps.events.send(event);
    }

    /// Retires the run started at `epoch` and reports why it ended. The epoch
    /// bump and the view change happen under the watch lock, so when the loop
    /// finishing and `stop()` race only the first one does anything.
    fn end_run(&self, epoch: u64, reason: StopReason) -> bool {
        let ended = self.view_tx.send_if_modified(|view| {
            if self
                .epoch
                .compare_exchange(epoch, epoch + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return false;
            }
            view.tracking = false;
            view.snapshot = None;
            view.approximate = false;
            true
        });

        if ended {
            self.finish(reason);
        }
        ended
    }

    fn finish(&self, reason: StopReason) {
        if let Some(metrics) = &self.deps.metrics {
            metrics.tracking_sessions_active.dec();
        }
        self.emit(TrackingEvent::Stopped {
            booking_id: self.booking_id,
            reason,
        });
        info!(booking_id = %self.booking_id, reason = ?reason, "tracking stopped");
    }

    async fn snapshot_for(&self, booking: &Booking) -> Option<TrackingSnapshot> {
        if !booking.status.has_provider_position() {
            return None;
        }
        let provider = booking.provider_coordinate.filter(Coordinate::is_valid)?;

        let (client, approximate) = match booking.client_coordinate.filter(Coordinate::is_valid) {
            Some(client) => (client, false),
            None => {
                let position =
                    locate(self.deps.location.as_ref(), self.settings.fallback).await;
                (position.coordinate, position.approximate)
            }
        };

        let proximity = distance_and_eta(
            Some(&client),
            Some(&provider),
            self.settings.assumed_speed_kmh,
        )?;

        Some(TrackingSnapshot {
            distance_km: proximity.distance_km,
            eta_minutes: proximity.eta_minutes,
            as_of: Utc::now(),
            approximate,
        })
    }

    /// Applies a fetched booking to the view if `epoch` is still current. The
    /// status-change event goes out before the view is updated.
    async fn observe(&self, epoch: u64, booking: Booking) -> Observation {
        let snapshot = self.snapshot_for(&booking).await;
        let status = booking.status;
        let finished = !status.is_trackable();
        let mut applied = false;

        self.view_tx.send_if_modified(|view| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            applied = true;

            match view.status {
                Some(from) if from != status => {
                    info!(booking_id = %self.booking_id, from = %from, to = %status, "booking status changed");
                    self.emit(TrackingEvent::StatusChanged {
                        booking_id: self.booking_id,
                        from,
                        to: status,
                        at: Utc::now(),
                    });
                }
                Some(_) => {}
                None => debug!(booking_id = %self.booking_id, status = %status, "initial booking status"),
            }

            view.status = Some(status);
            view.consecutive_failures = 0;
            if finished {
                view.snapshot = None;
                view.approximate = false;
            } else if let Some(snapshot) = snapshot {
                view.snapshot = Some(snapshot);
                view.approximate = snapshot.approximate;
            }
            true
        });

        if !applied {
            return Observation::Discarded;
        }

        if let (Some(snapshot), false) = (snapshot, finished) {
            debug!(
                booking_id = %self.booking_id,
                distance_km = snapshot.distance_km,
                eta_minutes = snapshot.eta_minutes,
                approximate = snapshot.approximate,
                "proximity updated"
            );
            self.emit(TrackingEvent::Snapshot {
                booking_id: self.booking_id,
                snapshot,
            });
        }

        Observation::Applied { finished }
    }

    fn fetch_failed(&self, epoch: u64, err: &AppError) -> bool {
        let mut failures = 0;
        let applied = self.view_tx.send_if_modified(|view| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            view.consecutive_failures = view.consecutive_failures.saturating_add(1);
            failures = view.consecutive_failures;
            true
        });

        if applied {
            warn!(booking_id = %self.booking_id, error = %err, consecutive_failures = failures, "tracking refresh failed");
            self.emit(TrackingEvent::FetchFailed {
                booking_id: self.booking_id,
                error: err.to_string(),
                consecutive_failures: failures,
            });
        }
        applied
    }
}

async fn refresh_loop(
    inner: Arc<Inner>,
    epoch: u64,
    cancel: CancellationToken,
    first_cycle: Instant,
) {
    let period = inner.settings.interval;
    let mut next_cycle = first_cycle;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sleep_until(next_cycle) => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                inner.record("discarded");
                break;
            }
            result = inner.deps.source.get_booking(inner.booking_id) => result,
        };

        match fetched {
            Ok(booking) => match inner.observe(epoch, booking).await {
                Observation::Applied { finished: true } => {
                    inner.record("ok");
                    inner.end_run(epoch, StopReason::Finished);
                    break;
                }
                Observation::Applied { finished: false } => inner.record("ok"),
                Observation::Discarded => {
                    inner.record("discarded");
                    break;
                }
            },
            Err(err) => {
                if !inner.fetch_failed(epoch, &err) {
                    inner.record("discarded");
                    break;
                }
                inner.record("error");
            }
        }

        // Cycles whose slot passed while the fetch was in flight are skipped.
        next_cycle += period;
        let now = Instant::now();
        while next_cycle <= now {
            debug!(booking_id = %inner.booking_id, "refresh still in flight at interval; skipping cycle");
            next_cycle += period;
        }
    }
}
