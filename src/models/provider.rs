use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Coordinate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMarker {
    pub id: Uuid,
    pub name: String,
    pub coordinate: Coordinate,
    #[serde(default)]
    pub specialties: Vec<String>,
    pub hourly_rate: f64,
    pub rating: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderFilter {
    pub specialty: Option<String>,
    pub max_hourly_rate: Option<f64>,
    pub min_rating: Option<f64>,
}

impl ProviderFilter {
    pub fn matches(&self, provider: &ProviderMarker) -> bool {
        let specialty_ok = self.specialty.as_deref().is_none_or(|wanted| {
            provider
                .specialties
                .iter()
                .any(|s| s.eq_ignore_ascii_case(wanted))
        });
        let rate_ok = self
            .max_hourly_rate
            .is_none_or(|max| provider.hourly_rate <= max);
        let rating_ok = self.min_rating.is_none_or(|min| provider.rating >= min);

        specialty_ok && rate_ok && rating_ok
    }
}
