//! Maps forecast cache errors to forecastbuddy_core::AppError for consistent user-facing messages.

use forecastbuddy_core::{AppError, ForecastFailure};
use forecastbuddy_weather::{FetchError, ForecastError};

pub fn forecast_failure(e: ForecastError) -> ForecastFailure {
    match e {
        ForecastError::Fetch(FetchError::NetworkUnavailable(s)) => {
            ForecastFailure::NetworkUnavailable(s)
        }
        ForecastError::Fetch(FetchError::InvalidResponse(s)) => ForecastFailure::InvalidResponse(s),
        ForecastError::Fetch(FetchError::Cancelled) | ForecastError::Cancelled => {
            ForecastFailure::Cancelled
        }
        ForecastError::Timeout => ForecastFailure::Timeout,
        ForecastError::StoreWriteFailed { reason, .. } => ForecastFailure::StoreWriteFailed(reason),
    }
}

pub fn app_error(e: ForecastError) -> AppError {
    AppError::Forecast(forecast_failure(e))
}
