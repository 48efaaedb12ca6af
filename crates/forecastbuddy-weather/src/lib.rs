//! Forecast cache for ForecastBuddy
//!
//! Keeps per-pin forecasts in a local store, refreshes them from
//! OpenWeatherMap once they go stale, and shares each in-flight fetch among
//! all callers asking for the same coordinate.

pub mod freshness;
pub mod hourly;
pub mod manager;
pub mod openweather;
pub mod provider;
pub mod store;
pub mod tracker;
pub mod types;

pub use freshness::{is_stale, RefreshPolicy};
pub use hourly::{assign_day_buckets, group_by_day, DayGroup};
pub use manager::{Clock, EntryState, ForecastCacheManager, SystemClock};
pub use openweather::{icon_url, OpenWeatherClient};
pub use provider::WeatherFetcher;
pub use store::{ForecastStore, MemoryForecastStore, SqliteForecastStore};
pub use tracker::PendingRequestTracker;
pub use types::*;
