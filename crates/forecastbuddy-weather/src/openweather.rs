//! OpenWeatherMap implementation of `WeatherFetcher`.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::provider::{cancellable, WeatherFetcher};
use crate::types::{Coordinate, CurrentConditions, FetchError, ProviderHourly};

pub const OPENWEATHER_API_BASE: &str = "https://api.openweathermap.org";
const CURRENT_WEATHER_PATH: &str = "/data/2.5/weather";
const FIVE_DAY_FORECAST_PATH: &str = "/data/2.5/forecast";
const ICON_URL_BASE: &str = "https://openweathermap.org/img/wn/";
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    main: MainResponse,
    weather: Vec<CurrentWeatherResponse>,
}

#[derive(Debug, Deserialize)]
struct MainResponse {
    temp: f64,
}

#[derive(Debug, Deserialize)]
struct CurrentWeatherResponse {
    icon: String,
}

#[derive(Debug, Deserialize)]
struct FiveDayResponse {
    list: Vec<HourlyResponse>,
}

#[derive(Debug, Deserialize)]
struct HourlyResponse {
    dt: i64,
    main: MainResponse,
    weather: Vec<HourlyWeatherResponse>,
}

#[derive(Debug, Deserialize)]
struct HourlyWeatherResponse {
    description: String,
    icon: String,
}

/// URL of the provider's icon image for an icon code such as `"10d"`.
pub fn icon_url(icon: &str) -> String {
    format!("{}{}@2x.png", ICON_URL_BASE, icon)
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_decode() {
        FetchError::InvalidResponse(e.to_string())
    } else {
        FetchError::NetworkUnavailable(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    client: Arc<Client>,
    base_url: String,
    api_key: String,
}

impl OpenWeatherClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        coordinate: Coordinate,
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", coordinate.latitude.to_string()),
                ("lon", coordinate.longitude.to_string()),
                ("appid", self.api_key.clone()),
            ])
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::debug!("OpenWeatherMap returned {} for {}: {}", status, path, text);
            return Err(FetchError::InvalidResponse(format!("HTTP {}", status)));
        }

        response.json::<T>().await.map_err(map_reqwest_error)
    }
}

impl WeatherFetcher for OpenWeatherClient {
    #[instrument(skip(self, cancel), level = "info")]
    async fn fetch_current(
        &self,
        coordinate: Coordinate,
        cancel: CancellationToken,
    ) -> Result<CurrentConditions, FetchError> {
        let body: CurrentResponse =
            cancellable(&cancel, self.get_json(CURRENT_WEATHER_PATH, coordinate)).await?;

        let icon = body
            .weather
            .into_iter()
            .next()
            .map(|w| w.icon)
            .ok_or_else(|| FetchError::InvalidResponse("no weather element".to_string()))?;

        Ok(CurrentConditions {
            icon,
            temp_kelvin: body.main.temp,
        })
    }

    #[instrument(skip(self, cancel), level = "info")]
    async fn fetch_five_day(
        &self,
        coordinate: Coordinate,
        cancel: CancellationToken,
    ) -> Result<Vec<ProviderHourly>, FetchError> {
        let body: FiveDayResponse =
            cancellable(&cancel, self.get_json(FIVE_DAY_FORECAST_PATH, coordinate)).await?;

        let mut entries = Vec::with_capacity(body.list.len());
        for hourly in body.list {
            let Some(weather) = hourly.weather.into_iter().next() else {
                continue;
            };
            let timestamp = DateTime::<Utc>::from_timestamp(hourly.dt, 0).ok_or_else(|| {
                FetchError::InvalidResponse(format!("timestamp out of range: {}", hourly.dt))
            })?;
            entries.push(ProviderHourly {
                timestamp,
                icon: weather.icon,
                temp_kelvin: hourly.main.temp,
                description: weather.description,
            });
        }

        tracing::debug!("Five-day forecast has {} entries", entries.len());
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chico() -> Coordinate {
        Coordinate::new(39.73, -121.84)
    }

    #[tokio::test]
    async fn test_fetch_current() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .and(query_param("lat", "39.73"))
            .and(query_param("lon", "-121.84"))
            .and(query_param("appid", "test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "main": {"temp": 295.37, "humidity": 40},
                "weather": [{"id": 800, "icon": "01d", "description": "clear sky"}],
                "name": "Chico"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = OpenWeatherClient::new(&mock_server.uri(), "test_key").unwrap();
        let current = client
            .fetch_current(chico(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(current.icon, "01d");
        assert_eq!(current.temp_kelvin, 295.37);
    }

    #[tokio::test]
    async fn test_fetch_current_without_weather_is_invalid() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "main": {"temp": 295.37},
                "weather": []
            })))
            .mount(&mock_server)
            .await;

        let client = OpenWeatherClient::new(&mock_server.uri(), "test_key").unwrap();
        let err = client
            .fetch_current(chico(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_fetch_five_day_skips_entries_without_weather() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cnt": 3,
                "list": [
                    {"dt": 1709316000, "main": {"temp": 285.1},
                     "weather": [{"description": "light rain", "icon": "10n"}]},
                    {"dt": 1709326800, "main": {"temp": 284.0}, "weather": []},
                    {"dt": 1709337600, "main": {"temp": 283.2},
                     "weather": [{"description": "broken clouds", "icon": "04n"}]}
                ]
            })))
            .mount(&mock_server)
            .await;

        let client = OpenWeatherClient::new(&mock_server.uri(), "test_key").unwrap();
        let entries = client
            .fetch_five_day(chico(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].description, "light rain");
        assert_eq!(entries[0].timestamp.timestamp(), 1_709_316_000);
        assert_eq!(entries[1].icon, "04n");
    }

    #[tokio::test]
    async fn test_server_error_is_invalid_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "cod": 401,
                "message": "Invalid API key"
            })))
            .mount(&mock_server)
            .await;

        let client = OpenWeatherClient::new(&mock_server.uri(), "bad_key").unwrap();
        let err = client
            .fetch_current(chico(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::InvalidResponse("HTTP 401 Unauthorized".into()));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let client = OpenWeatherClient::new(&mock_server.uri(), "test_key").unwrap();
        let err = client
            .fetch_five_day(chico(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_unavailable() {
        // Nothing listens on port 1
        let client = OpenWeatherClient::new("http://127.0.0.1:1", "test_key").unwrap();
        let err = client
            .fetch_current(chico(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NetworkUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cancel_stops_slow_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(5))
                    .set_body_json(serde_json::json!({
                        "main": {"temp": 280.0},
                        "weather": [{"icon": "01d"}]
                    })),
            )
            .mount(&mock_server)
            .await;

        let client = OpenWeatherClient::new(&mock_server.uri(), "test_key").unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = client.fetch_current(chico(), cancel).await.unwrap_err();
        assert_eq!(err, FetchError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_icon_url() {
        assert_eq!(icon_url("10d"), "https://openweathermap.org/img/wn/10d@2x.png");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = OpenWeatherClient::new("http://localhost:8080/", "k").unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
    }
}
