mod error_mapping;

use chrono::Local;
use std::process::ExitCode;
use std::sync::Arc;

use forecastbuddy_core::{
    AppError, Config, ConfigError, DisplayConfig, ReqwestErrorExt, RusqliteErrorExt,
};
use forecastbuddy_weather::{
    group_by_day, Coordinate, ForecastCacheManager, ForecastRecord, OpenWeatherClient,
    RefreshPolicy, SqliteForecastStore,
};

const USAGE: &str = "usage: forecastbuddy <latitude> <longitude>";

fn parse_coordinate(args: &[String]) -> Option<Coordinate> {
    match args {
        [lat, lon] => {
            let latitude: f64 = lat.parse().ok()?;
            let longitude: f64 = lon.parse().ok()?;
            let valid =
                (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude);
            valid.then(|| Coordinate::new(latitude, longitude))
        }
        _ => None,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = forecastbuddy_core::init() {
        eprintln!("{}", e);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(coordinate) = parse_coordinate(&args) else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };

    match run(coordinate).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("{}", failure_report(&e));
            ExitCode::FAILURE
        }
    }
}

/// User-facing text for a failed run. Config problems name the offending setting.
fn failure_report(e: &AppError) -> String {
    match e {
        AppError::Config(detail) => format!("{}\n  {}", e.user_message(), detail),
        _ => e.user_message().to_string(),
    }
}

async fn run(coordinate: Coordinate) -> Result<(), AppError> {
    let (config, _) = Config::load_validated()?;
    std::fs::create_dir_all(&config.config_dir)?;

    let store = SqliteForecastStore::open(config.database_path())
        .map_err(|e| AppError::Database(e.into_database_error()))?;
    let api_key = config
        .api
        .effective_api_key()
        .ok_or_else(|| ConfigError::MissingSetting("api.api_key".to_string()))?;
    let client = OpenWeatherClient::new(&config.api.base_url, &api_key)
        .map_err(|e| AppError::Network(e.into_network_error()))?;

    let policy = RefreshPolicy::new(config.forecast.ttl(), config.forecast.timeout());
    let manager = ForecastCacheManager::new(Arc::new(store), client, policy);

    tracing::info!(%coordinate, "Loading forecast");
    let record = match manager.get(coordinate).await {
        Ok(record) => record,
        // Still worth showing when only the save failed
        Err(e) => match e.fetched_record().cloned() {
            Some(record) => {
                eprintln!("{}", error_mapping::forecast_failure(e).user_message());
                record
            }
            None => return Err(error_mapping::app_error(e)),
        },
    };

    print_forecast(&record, &config.display);
    Ok(())
}

fn print_forecast(record: &ForecastRecord, display: &DisplayConfig) {
    let fetched = record.fetched_at.with_timezone(&Local);
    println!(
        "{}  {}{}  {}  (updated {})",
        record.coordinate,
        display.temperature(record.current_condition_temp_kelvin),
        display.unit_suffix(),
        record.current_condition_icon,
        fetched.format("%a %l:%M %p")
    );

    let Some(hourly) = &record.hourly else {
        println!("\nFive-day forecast unavailable");
        return;
    };

    for day in group_by_day(hourly, &Local) {
        println!("\n{}", day.label);
        for entry in &day.entries {
            println!(
                "  {}  {:>4}{}  {}",
                entry.timestamp.with_timezone(&Local).format("%l %p"),
                display.temperature(entry.temp_kelvin),
                display.unit_suffix(),
                entry.description
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_coordinate() {
        let coordinate = parse_coordinate(&args(&["39.73", "-121.84"])).unwrap();
        assert_eq!(coordinate, Coordinate::new(39.73, -121.84));
    }

    #[test]
    fn test_parse_coordinate_rejects_bad_input() {
        assert!(parse_coordinate(&args(&["39.73"])).is_none());
        assert!(parse_coordinate(&args(&["north", "-121.84"])).is_none());
        assert!(parse_coordinate(&args(&["91", "0"])).is_none());
        assert!(parse_coordinate(&args(&["0", "0", "0"])).is_none());
    }

    #[test]
    fn test_config_failure_report_names_setting() {
        let err = AppError::Config(ConfigError::Invalid(
            "forecast.timeout_secs: Timeout cannot exceed 300 seconds".into(),
        ));
        let report = failure_report(&err);
        assert!(report.starts_with("Invalid configuration."));
        assert!(report.contains("forecast.timeout_secs"));
    }

    #[test]
    fn test_other_failure_report_is_user_message() {
        let err = error_mapping::app_error(forecastbuddy_weather::ForecastError::Timeout);
        assert_eq!(failure_report(&err), err.user_message());
    }
}
