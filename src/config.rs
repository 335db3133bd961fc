use std::env;

use tokio::time::Duration;

use crate::engine::tracking::{DEFAULT_FALLBACK, TrackingSettings};
use crate::error::AppError;
use crate::geo::{Coordinate, DEFAULT_SPEED_KMH};

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub tracking_interval: Duration,
    pub assumed_speed_kmh: f64,
    pub fallback: Coordinate,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let assumed_speed_kmh = parse_or_default("ASSUMED_SPEED_KMH", DEFAULT_SPEED_KMH)?;
        if !(assumed_speed_kmh.is_finite() && assumed_speed_kmh > 0.0) {
            return Err(AppError::Internal(format!(
                "invalid ASSUMED_SPEED_KMH: {assumed_speed_kmh} is not a positive speed"
            )));
        }

        let interval_secs: u64 = parse_or_default("TRACKING_INTERVAL_SECS", 10)?;
        if interval_secs == 0 {
            return Err(AppError::Internal(
                "invalid TRACKING_INTERVAL_SECS: must be > 0".to_string(),
            ));
        }

        let fallback = Coordinate::new(
            parse_or_default("FALLBACK_LAT", DEFAULT_FALLBACK.lat)?,
            parse_or_default("FALLBACK_LNG", DEFAULT_FALLBACK.lng)?,
        )
        .map_err(|err| AppError::Internal(format!("invalid fallback coordinate: {err}")))?;

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            tracking_interval: Duration::from_secs(interval_secs),
            assumed_speed_kmh,
            fallback,
        })
    }

    pub fn tracking_settings(&self) -> TrackingSettings {
        TrackingSettings {
            interval: self.tracking_interval,
            assumed_speed_kmh: self.assumed_speed_kmh,
            fallback: self.fallback,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
