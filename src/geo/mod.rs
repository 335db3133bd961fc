pub mod hex;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Urban ground transport estimate used when no speed is configured.
pub const DEFAULT_SPEED_KMH: f64 = 30.0;

/// A point in decimal degrees.
///
/// Fields are public so that raw input (provider listings, request bodies) can be
/// carried as-is; use [`Coordinate::new`] or [`Coordinate::is_valid`] where the
/// range invariant matters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Result<Self, AppError> {
        let coordinate = Self { lat, lng };
        if coordinate.is_valid() {
            Ok(coordinate)
        } else {
            Err(AppError::BadRequest(format!(
                "coordinate out of range: lat={lat}, lng={lng}"
            )))
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Proximity {
    pub distance_km: f64,
    pub eta_minutes: f64,
}

pub fn haversine_km(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().atan2((1.0 - haversine).sqrt());

    EARTH_RADIUS_KM * central_angle
}

/// Distance and travel time between two optional positions.
///
/// Returns `None` when either side is missing so callers can tell "no data"
/// apart from a zero distance. A non-positive speed falls back to
/// [`DEFAULT_SPEED_KMH`].
pub fn distance_and_eta(
    a: Option<&Coordinate>,
    b: Option<&Coordinate>,
    assumed_speed_kmh: f64,
) -> Option<Proximity> {
    let (a, b) = (a?, b?);
    let speed = if assumed_speed_kmh.is_finite() && assumed_speed_kmh > 0.0 {
        assumed_speed_kmh
    } else {
        DEFAULT_SPEED_KMH
    };

    let distance_km = haversine_km(a, b);
    Some(Proximity {
        distance_km,
        eta_minutes: distance_km / speed * 60.0,
    })
}

#[cfg(test)]
mod tests {
    use super::{Coordinate, DEFAULT_SPEED_KMH, distance_and_eta, haversine_km};

    const CONNAUGHT_PLACE: Coordinate = Coordinate {
        lat: 28.6139,
        lng: 77.2090,
    };
    const PITAMPURA: Coordinate = Coordinate {
        lat: 28.7041,
        lng: 77.1025,
    };

    #[test]
    fn zero_distance_for_same_point() {
        let distance = haversine_km(&CONNAUGHT_PLACE, &CONNAUGHT_PLACE);
        assert!(distance < 1e-9);
    }

    #[test]
    fn distance_is_symmetric() {
        let pairs = [
            (CONNAUGHT_PLACE, PITAMPURA),
            (
                Coordinate { lat: 51.5074, lng: -0.1278 },
                Coordinate { lat: 48.8566, lng: 2.3522 },
            ),
            (
                Coordinate { lat: -33.8688, lng: 151.2093 },
                Coordinate { lat: 35.6762, lng: 139.6503 },
            ),
            (
                Coordinate { lat: 0.0, lng: 179.9 },
                Coordinate { lat: 0.0, lng: -179.9 },
            ),
        ];

        for (a, b) in pairs {
            let forward = haversine_km(&a, &b);
            let backward = haversine_km(&b, &a);
            assert!((forward - backward).abs() < 1e-9, "{a:?} <-> {b:?}");
        }
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = Coordinate { lat: 51.5074, lng: -0.1278 };
        let paris = Coordinate { lat: 48.8566, lng: 2.3522 };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn delhi_cross_town_distance_and_eta() {
        let proximity =
            distance_and_eta(Some(&CONNAUGHT_PLACE), Some(&PITAMPURA), DEFAULT_SPEED_KMH)
                .unwrap();

        assert!((proximity.distance_km - 14.44).abs() < 0.2);
        assert!((proximity.eta_minutes - 28.9).abs() < 1.0);
    }

    #[test]
    fn antimeridian_crossing_takes_the_short_way() {
        let west = Coordinate { lat: 0.0, lng: 179.9 };
        let east = Coordinate { lat: 0.0, lng: -179.9 };
        assert!(haversine_km(&west, &east) < 25.0);
    }

    #[test]
    fn missing_side_is_unavailable_not_zero() {
        assert!(distance_and_eta(None, Some(&PITAMPURA), DEFAULT_SPEED_KMH).is_none());
        assert!(distance_and_eta(Some(&PITAMPURA), None, DEFAULT_SPEED_KMH).is_none());

        let same = distance_and_eta(Some(&PITAMPURA), Some(&PITAMPURA), DEFAULT_SPEED_KMH)
            .unwrap();
        assert_eq!(same.distance_km, 0.0);
        assert_eq!(same.eta_minutes, 0.0);
    }

    #[test]
    fn eta_scales_with_speed() {
        let slow = distance_and_eta(Some(&CONNAUGHT_PLACE), Some(&PITAMPURA), 15.0).unwrap();
        let fast = distance_and_eta(Some(&CONNAUGHT_PLACE), Some(&PITAMPURA), 60.0).unwrap();
        assert!((slow.eta_minutes - fast.eta_minutes * 4.0).abs() < 1e-6);
    }

    #[test]
    fn non_positive_speed_uses_default() {
        let fallback = distance_and_eta(Some(&CONNAUGHT_PLACE), Some(&PITAMPURA), 0.0).unwrap();
        let default =
            distance_and_eta(Some(&CONNAUGHT_PLACE), Some(&PITAMPURA), DEFAULT_SPEED_KMH)
                .unwrap();
        assert_eq!(fallback, default);
    }

    #[test]
    fn coordinate_range_is_enforced() {
        assert!(Coordinate::new(90.0, 180.0).is_ok());
        assert!(Coordinate::new(-90.0, -180.0).is_ok());
        assert!(Coordinate::new(90.5, 0.0).is_err());
        assert!(Coordinate::new(0.0, -180.5).is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
    }
}
