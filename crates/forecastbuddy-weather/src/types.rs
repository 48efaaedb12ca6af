use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Geographic point identifying a map pin.
///
/// Equality and hashing compare the raw bits of both components, so two
/// coordinates are the same cache key only when they are bit-identical.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    fn key(&self) -> (u64, u64) {
        (self.latitude.to_bits(), self.longitude.to_bits())
    }
}

impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Coordinate {}

impl Hash for Coordinate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.4}, {:.4})", self.latitude, self.longitude)
    }
}

/// Current conditions as reported by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub icon: String,
    pub temp_kelvin: f64,
}

/// One 3-hour slot of the provider's five-day forecast, before day bucketing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHourly {
    pub timestamp: DateTime<Utc>,
    pub icon: String,
    pub temp_kelvin: f64,
    pub description: String,
}

/// Hourly forecast entry grouped into calendar-day buckets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyEntry {
    pub timestamp: DateTime<Utc>,
    /// 1 for the first day of the forecast, +1 per calendar day boundary
    pub day_bucket: u32,
    pub icon: String,
    pub temp_kelvin: f64,
    pub description: String,
}

/// Persisted forecast for one coordinate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub coordinate: Coordinate,
    pub fetched_at: DateTime<Utc>,
    pub current_condition_icon: String,
    pub current_condition_temp_kelvin: f64,
    pub hourly: Option<Vec<HourlyEntry>>,
}

impl ForecastRecord {
    /// Age of the record relative to `now`. Negative when `fetched_at` is in the future.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.fetched_at
    }
}

/// Weather fetch client errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Fetch cancelled")]
    Cancelled,
}

/// Forecast store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Store read failed: {0}")]
    ReadFailed(String),
    #[error("Store write failed: {0}")]
    WriteFailed(String),
}

/// Errors reported to callers of the forecast cache
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ForecastError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Forecast request timed out")]
    Timeout,
    #[error("Forecast request cancelled")]
    Cancelled,
    /// The fetch succeeded but persisting it failed. The fresh record is still usable.
    #[error("Failed to persist forecast: {reason}")]
    StoreWriteFailed {
        reason: String,
        record: Box<ForecastRecord>,
    },
}

impl ForecastError {
    /// User-friendly error message for a dismissible notification.
    pub fn user_message(&self) -> String {
        match self {
            Self::Fetch(FetchError::NetworkUnavailable(_)) => {
                "Weather service unavailable. Check your connection.".to_string()
            }
            Self::Fetch(FetchError::InvalidResponse(_)) => {
                "Bad weather data received. Please try again.".to_string()
            }
            Self::Fetch(FetchError::Cancelled) | Self::Cancelled => {
                "Forecast request cancelled".to_string()
            }
            Self::Timeout => "The forecast took too long to load. Please try again.".to_string(),
            Self::StoreWriteFailed { .. } => "Forecast loaded but could not be saved".to_string(),
        }
    }

    /// Data fetched alongside the error, if any.
    pub fn fetched_record(&self) -> Option<&ForecastRecord> {
        match self {
            Self::StoreWriteFailed { record, .. } => Some(record),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_coordinate_equality_is_bitwise() {
        let a = Coordinate::new(37.7749, -122.4194);
        let b = Coordinate::new(37.7749, -122.4194);
        let nearby = Coordinate::new(37.7749 + 1e-9, -122.4194);

        assert_eq!(a, b);
        assert_ne!(a, nearby);
    }

    #[test]
    fn test_coordinate_signed_zero_is_distinct() {
        assert_ne!(Coordinate::new(0.0, 0.0), Coordinate::new(-0.0, 0.0));
    }

    #[test]
    fn test_coordinate_nan_matches_itself() {
        let a = Coordinate::new(f64::NAN, 1.0);
        let b = Coordinate::new(f64::NAN, 1.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_coordinate_hash_set_dedups() {
        let mut set = HashSet::new();
        set.insert(Coordinate::new(39.73, -121.84));
        set.insert(Coordinate::new(39.73, -121.84));
        set.insert(Coordinate::new(37.7749, -122.4194));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_store_write_failed_keeps_record() {
        let record = ForecastRecord {
            coordinate: Coordinate::new(1.0, 2.0),
            fetched_at: Utc::now(),
            current_condition_icon: "01d".into(),
            current_condition_temp_kelvin: 290.0,
            hourly: None,
        };
        let err = ForecastError::StoreWriteFailed {
            reason: "disk full".into(),
            record: Box::new(record.clone()),
        };
        assert_eq!(err.fetched_record(), Some(&record));
        assert!(ForecastError::Timeout.fetched_record().is_none());
    }

    #[test]
    fn test_user_messages() {
        assert!(ForecastError::Timeout.user_message().contains("too long"));
        assert!(ForecastError::from(FetchError::NetworkUnavailable("offline".into()))
            .user_message()
            .contains("connection"));
    }
}
