//! Daily weather covariates from the Open-Meteo archive

use crate::config::MonitorConfig;
use crate::core::series::Mean;
use crate::types::{parse_day, MonitorError, MonitorResult, TimeSeriesPoint, WeatherRecord};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

const HOURLY_VARIABLES: &str = "temperature_2m,relative_humidity_2m,cloudcover,windspeed_10m";

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    #[serde(default)]
    hourly: Option<HourlyWeather>,
}

/// Hourly columns as returned by the archive API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HourlyWeather {
    pub time: Vec<String>,
    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub relative_humidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub cloudcover: Vec<Option<f64>>,
    #[serde(default)]
    pub windspeed_10m: Vec<Option<f64>>,
}

#[derive(Default)]
struct DailyAccumulator {
    temperature: Mean,
    humidity: Mean,
    cloudcover: Mean,
    wind_speed: Mean,
}

/// Clear-sky share in percent for a cloud cover percentage
pub fn clarity_index(cloudcover: f64) -> f64 {
    100.0 - cloudcover.clamp(0.0, 100.0)
}

/// Collapse hourly samples into one record per local calendar day
pub fn aggregate_hourly(hourly: &HourlyWeather) -> Vec<WeatherRecord> {
    let wind_missing = hourly.windspeed_10m.is_empty() && !hourly.time.is_empty();
    if wind_missing {
        log::warn!("Archive response has no wind speed; using zeros");
    }

    let column = |values: &[Option<f64>], i: usize| values.get(i).copied().flatten();

    let mut days: BTreeMap<NaiveDate, DailyAccumulator> = BTreeMap::new();
    for (i, stamp) in hourly.time.iter().enumerate() {
        let Some(day) = parse_day(stamp) else {
            log::debug!("Skipping unparseable hour: {}", stamp);
            continue;
        };
        let acc = days.entry(day).or_default();
        acc.temperature.add(column(&hourly.temperature_2m, i));
        acc.humidity.add(column(&hourly.relative_humidity_2m, i));
        acc.cloudcover.add(column(&hourly.cloudcover, i));
        if wind_missing {
            acc.wind_speed.add(Some(0.0));
        } else {
            acc.wind_speed.add(column(&hourly.windspeed_10m, i));
        }
    }

    days.into_iter()
        .map(|(date, acc)| {
            let cloudcover = acc.cloudcover.value();
            WeatherRecord {
                date,
                temperature: acc.temperature.value(),
                humidity: acc.humidity.value(),
                cloudcover,
                wind_speed: acc.wind_speed.value(),
                clarity: cloudcover.map(clarity_index),
            }
        })
        .collect()
}

/// Join daily weather onto series points by calendar date
pub fn attach_weather(points: &mut [TimeSeriesPoint], weather: &[WeatherRecord]) {
    let by_day: HashMap<NaiveDate, &WeatherRecord> =
        weather.iter().map(|record| (record.date, record)).collect();
    let mut matched = 0usize;
    for point in points.iter_mut() {
        point.weather = by_day.get(&point.date.date_naive()).map(|&r| r.clone());
        if point.weather.is_some() {
            matched += 1;
        }
    }
    log::debug!("Attached weather to {}/{} points", matched, points.len());
}

/// Blocking Open-Meteo archive client
pub struct WeatherClient {
    url: String,
    client: reqwest::blocking::Client,
    max_retries: u32,
}

impl WeatherClient {
    pub fn new(url: &str, timeout: Duration, max_retries: u32) -> MonitorResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("canopy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MonitorError::Weather(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            url: url.to_string(),
            client,
            max_retries,
        })
    }

    pub fn from_config(config: &MonitorConfig) -> MonitorResult<Self> {
        Self::new(
            &config.weather_url,
            Duration::from_secs(config.request_timeout_secs),
            config.max_retries,
        )
    }

    /// Daily weather at (lat, lon) for the inclusive date range
    pub fn fetch_daily(
        &self,
        lat: f64,
        lon: f64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> MonitorResult<Vec<WeatherRecord>> {
        let query = [
            ("latitude", format!("{:.4}", lat)),
            ("longitude", format!("{:.4}", lon)),
            ("start_date", start.to_string()),
            ("end_date", end.to_string()),
            ("hourly", HOURLY_VARIABLES.to_string()),
            ("timezone", "auto".to_string()),
        ];

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                std::thread::sleep(Duration::from_millis(500 * attempt as u64));
            }

            match self.client.get(&self.url).query(&query).send() {
                Ok(response) if response.status().is_success() => {
                    let body: ArchiveResponse = serde_json::from_str(&response.text()?)?;
                    let hourly = body.hourly.unwrap_or_default();
                    let daily = aggregate_hourly(&hourly);
                    log::info!(
                        "Fetched {} day(s) of weather for ({:.4}, {:.4})",
                        daily.len(),
                        lat,
                        lon
                    );
                    return Ok(daily);
                }
                Ok(response) => {
                    let status = response.status();
                    last_error = Some(MonitorError::Weather(format!("archive returned HTTP {}", status)));
                    if status.is_client_error() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("Weather request failed: {}", e);
                    last_error = Some(MonitorError::Http(e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| MonitorError::Weather("weather request failed".to_string())))
    }
}
