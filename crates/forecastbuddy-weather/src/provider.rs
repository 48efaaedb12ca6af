//! Weather fetch client contract.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::types::{Coordinate, CurrentConditions, FetchError, ProviderHourly};

/// Source of current conditions and the five-day / 3-hour forecast.
///
/// Every call takes a cancellation token. Cancelling it after the call was
/// issued must stop the network work and resolve the future with
/// `FetchError::Cancelled`; a token cancelled after completion is ignored.
pub trait WeatherFetcher: Send + Sync + 'static {
    fn fetch_current(
        &self,
        coordinate: Coordinate,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<CurrentConditions, FetchError>> + Send;

    fn fetch_five_day(
        &self,
        coordinate: Coordinate,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Vec<ProviderHourly>, FetchError>> + Send;
}

/// Run `fut` until it completes or `cancel` fires, whichever is first.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = fut => result,
    }
}
