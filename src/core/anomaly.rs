//! Vegetation anomaly signals over a daily index series
//!
//! Four independent detectors run on every call:
//!
//! - `ndvi_volatility`: rolling standard deviation spikes
//! - `early_senescence`: canopy decline earlier than in prior years
//! - `late_greenup`: green-up later than in prior years, or still pending
//! - `weatherless_drop`: index drops with no extreme weather on the day
//!
//! Each finding records thresholds and baselines in its `details`, or a
//! `reason` when the signal could not be evaluated.

use crate::core::series::{daily_observations, daily_weather, DailyObservation, DailySeries};
use crate::types::{AnomalyFinding, IndexKind, Severity, TimeSeriesPoint, WeatherRecord};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const VOLATILITY_WINDOW: usize = 45;
pub const VOLATILITY_MIN_PERIODS: usize = 10;
pub const VOLATILITY_PERCENTILE: f64 = 95.0;

pub const SENESCENCE_THRESHOLD: f64 = 0.4;
pub const SENESCENCE_LOOKBACK_DAYS: i64 = 30;
pub const SENESCENCE_LEAD_DAYS: i64 = 14;

pub const GREENUP_THRESHOLD: f64 = 0.3;
pub const GREENUP_DELAY_DAYS: i64 = 14;
pub const GREENUP_CONFIRM_WINDOW: usize = 4;
pub const GREENUP_CONFIRM_COUNT: usize = 3;

pub const DROP_THRESHOLD: f64 = 0.1;
pub const DROP_MAX_GAP_DAYS: i64 = 30;

/// Slack for threshold comparisons on index differences
const DELTA_EPSILON: f64 = 1e-9;

/// Recency gate shared by volatility and weatherless drops
pub const RECENT_WINDOW_DAYS: i64 = 60;

pub const VOLATILITY_KEY: &str = "ndvi_volatility";
pub const SENESCENCE_KEY: &str = "early_senescence";
pub const GREENUP_KEY: &str = "late_greenup";
pub const WEATHERLESS_DROP_KEY: &str = "weatherless_drop";
pub const DAILY_CHART_KEY: &str = "ndvi_daily";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolatilityRow {
    pub date: NaiveDate,
    pub rolling_std: Option<f64>,
    pub threshold: Option<f64>,
}

/// Onset date of a seasonal event in one calendar year
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnsetRow {
    pub year: i32,
    pub date: NaiveDate,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropRow {
    pub date: NaiveDate,
    pub ndvi: f64,
    pub delta: Option<f64>,
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRow {
    pub date: NaiveDate,
    pub ndvi: Option<f64>,
}

/// Chart-ready rows for one signal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChartSeries {
    Volatility(Vec<VolatilityRow>),
    Onset(Vec<OnsetRow>),
    Drops(Vec<DropRow>),
    Daily(Vec<DailyRow>),
}

impl ChartSeries {
    pub fn len(&self) -> usize {
        match self {
            ChartSeries::Volatility(rows) => rows.len(),
            ChartSeries::Onset(rows) => rows.len(),
            ChartSeries::Drops(rows) => rows.len(),
            ChartSeries::Daily(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Findings in fixed signal order plus their chart series
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    pub findings: Vec<AnomalyFinding>,
    pub charts: BTreeMap<String, ChartSeries>,
}

impl AnomalyReport {
    pub fn finding(&self, key: &str) -> Option<&AnomalyFinding> {
        self.findings.iter().find(|f| f.key == key)
    }

    pub fn chart(&self, key: &str) -> Option<&ChartSeries> {
        self.charts.get(key)
    }

    pub fn triggered(&self) -> impl Iterator<Item = &AnomalyFinding> {
        self.findings.iter().filter(|f| f.triggered)
    }
}

/// Stateless detector over one index kind
#[derive(Debug, Clone, Copy)]
pub struct AnomalyDetector {
    kind: IndexKind,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self {
            kind: IndexKind::Ndvi,
        }
    }
}

impl AnomalyDetector {
    pub fn new(kind: IndexKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Run all signals over `points`
    ///
    /// Without an explicit weather series, weather attached to the points is used.
    pub fn detect(
        &self,
        points: &[TimeSeriesPoint],
        weather: Option<&[WeatherRecord]>,
    ) -> AnomalyReport {
        let samples = points
            .iter()
            .filter_map(|p| p.index_value(self.kind).map(|v| (p.date, v)));
        let observations = daily_observations(samples);

        let weather = match weather {
            Some(records) => daily_weather(records),
            None => {
                let attached: Vec<WeatherRecord> =
                    points.iter().filter_map(|p| p.weather.clone()).collect();
                daily_weather(&attached)
            }
        };

        detect_observations(&observations, &weather)
    }
}

/// NDVI anomalies for a point series
pub fn detect(points: &[TimeSeriesPoint], weather: Option<&[WeatherRecord]>) -> AnomalyReport {
    AnomalyDetector::default().detect(points, weather)
}

/// Run all signals over per-day observations and per-day weather
pub fn detect_observations(
    observations: &[DailyObservation],
    weather: &BTreeMap<NaiveDate, WeatherRecord>,
) -> AnomalyReport {
    let series = DailySeries::from_observations(observations);

    let (volatility, volatility_chart) = detect_volatility(&series);
    let (senescence, senescence_chart) = detect_early_senescence(&series);
    let (greenup, greenup_chart) = detect_late_greenup(&series);
    let (drop, drop_chart) = detect_weatherless_drop(observations, weather);

    let daily_chart = ChartSeries::Daily(
        series
            .iter()
            .map(|(date, ndvi)| DailyRow { date, ndvi })
            .collect(),
    );

    let findings = vec![volatility, senescence, greenup, drop];
    log::debug!(
        "Anomaly scan over {} observation(s): {} of {} signal(s) triggered",
        observations.len(),
        findings.iter().filter(|f| f.triggered).count(),
        findings.len()
    );

    let mut charts = BTreeMap::new();
    charts.insert(VOLATILITY_KEY.to_string(), volatility_chart);
    charts.insert(SENESCENCE_KEY.to_string(), senescence_chart);
    charts.insert(GREENUP_KEY.to_string(), greenup_chart);
    charts.insert(WEATHERLESS_DROP_KEY.to_string(), drop_chart);
    charts.insert(DAILY_CHART_KEY.to_string(), daily_chart);

    AnomalyReport { findings, charts }
}

fn raise(finding: &mut AnomalyFinding) {
    finding.triggered = true;
    finding.severity = Severity::Warning;
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

/// Percentile with linear interpolation between closest ranks
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Sample standard deviation (n - 1)
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    Some((ss / (n - 1.0)).sqrt())
}

/// Trailing rolling sample std; windows with fewer than `min_periods` values yield `None`
pub fn rolling_std(values: &[Option<f64>], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    let mut buf = Vec::with_capacity(window);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            buf.clear();
            buf.extend(values[start..=i].iter().flatten().copied());
            if buf.len() < min_periods.max(2) {
                None
            } else {
                sample_std(&buf)
            }
        })
        .collect()
}

fn median_day_of_year(dates: &[NaiveDate]) -> Option<i64> {
    let mut days: Vec<i64> = dates.iter().map(|d| d.ordinal() as i64).collect();
    if days.is_empty() {
        return None;
    }
    days.sort_unstable();
    let mid = days.len() / 2;
    let median = if days.len() % 2 == 0 {
        (days[mid - 1] + days[mid]) as f64 / 2.0
    } else {
        days[mid] as f64
    };
    Some(median.trunc() as i64)
}

fn present_by_year(series: &DailySeries) -> BTreeMap<i32, Vec<(NaiveDate, f64)>> {
    let mut years: BTreeMap<i32, Vec<(NaiveDate, f64)>> = BTreeMap::new();
    for (date, value) in series.present() {
        years.entry(date.year()).or_default().push((date, value));
    }
    years
}

fn onset_rows(onsets: &[(i32, NaiveDate)], current_year: i32) -> Vec<OnsetRow> {
    onsets
        .iter()
        .map(|&(year, date)| OnsetRow {
            year,
            date,
            is_current: year == current_year,
        })
        .collect()
}

fn detect_volatility(series: &DailySeries) -> (AnomalyFinding, ChartSeries) {
    let mut finding = AnomalyFinding::new(VOLATILITY_KEY, "NDVI Volatility Spike");
    if series.present_count() < VOLATILITY_MIN_PERIODS {
        finding.detail("reason", "insufficient_history");
        return (finding, ChartSeries::Volatility(Vec::new()));
    }

    let stds = rolling_std(series.values(), VOLATILITY_WINDOW, VOLATILITY_MIN_PERIODS);
    let valid: Vec<(NaiveDate, f64)> = series
        .iter()
        .zip(stds.iter())
        .filter_map(|((date, _), std)| std.map(|s| (date, s)))
        .collect();
    let valid_values: Vec<f64> = valid.iter().map(|&(_, s)| s).collect();

    let Some(threshold) = percentile(&valid_values, VOLATILITY_PERCENTILE) else {
        finding.detail("reason", "no_variability");
        let rows = series
            .iter()
            .zip(stds.iter())
            .map(|((date, _), &rolling_std)| VolatilityRow {
                date,
                rolling_std,
                threshold: None,
            })
            .collect();
        return (finding, ChartSeries::Volatility(rows));
    };

    let rows = series
        .iter()
        .zip(stds.iter())
        .map(|((date, _), &rolling_std)| VolatilityRow {
            date,
            rolling_std,
            threshold: Some(threshold),
        })
        .collect();

    let flagged: Vec<NaiveDate> = valid
        .iter()
        .filter(|&&(_, s)| s >= threshold)
        .map(|&(date, _)| date)
        .collect();

    if let Some(&detected) = flagged.last() {
        finding.detected_at = Some(midnight(detected));
        if let Some(latest) = series.latest_present() {
            if (latest - detected).num_days() <= RECENT_WINDOW_DAYS {
                raise(&mut finding);
            }
        }
    }

    finding.detail("windowDays", VOLATILITY_WINDOW);
    finding.detail("threshold", threshold);
    finding.detail("latestRollingStd", valid_values.last().copied());
    finding.detail("flaggedCount", flagged.len());
    (finding, ChartSeries::Volatility(rows))
}

/// First day below the threshold that follows canopy at/above it within the lookback
fn senescence_onset(days: &[(NaiveDate, f64)]) -> Option<NaiveDate> {
    days.iter().enumerate().find_map(|(i, &(date, value))| {
        if value >= SENESCENCE_THRESHOLD {
            return None;
        }
        let start = date - Duration::days(SENESCENCE_LOOKBACK_DAYS);
        let had_canopy = days[..i]
            .iter()
            .rev()
            .take_while(|&&(d, _)| d >= start)
            .any(|&(_, v)| v >= SENESCENCE_THRESHOLD);
        had_canopy.then_some(date)
    })
}

fn detect_early_senescence(series: &DailySeries) -> (AnomalyFinding, ChartSeries) {
    let mut finding = AnomalyFinding::new(SENESCENCE_KEY, "Early Senescence");
    if series.present_count() == 0 {
        finding.detail("reason", "insufficient_history");
        return (finding, ChartSeries::Onset(Vec::new()));
    }

    let onsets: Vec<(i32, NaiveDate)> = present_by_year(series)
        .iter()
        .filter_map(|(&year, days)| senescence_onset(days).map(|d| (year, d)))
        .collect();

    let Some(current_year) = onsets.iter().map(|&(year, _)| year).max() else {
        finding.detail("reason", "no_drop_found");
        return (finding, ChartSeries::Onset(Vec::new()));
    };
    let chart = ChartSeries::Onset(onset_rows(&onsets, current_year));

    let current = onsets.iter().find(|&&(year, _)| year == current_year).map(|&(_, d)| d);
    let baseline: Vec<NaiveDate> = onsets
        .iter()
        .filter(|&&(year, _)| year < current_year)
        .map(|&(_, d)| d)
        .collect();

    let (Some(current), Some(baseline_doy)) = (current, median_day_of_year(&baseline)) else {
        finding.detail("reason", "no_baseline");
        return (finding, chart);
    };

    let current_doy = current.ordinal() as i64;
    let days_early = baseline_doy - current_doy;
    finding.detail("baselineDayOfYear", baseline_doy);
    finding.detail("currentDayOfYear", current_doy);
    finding.detail("daysEarly", days_early);
    finding.detail("threshold", SENESCENCE_THRESHOLD);
    finding.detected_at = Some(midnight(current));
    if days_early >= SENESCENCE_LEAD_DAYS {
        raise(&mut finding);
    }
    (finding, chart)
}

/// Last day of the first trailing window holding enough values at/above the threshold
fn greenup_onset(days: &[(NaiveDate, f64)]) -> Option<NaiveDate> {
    days.windows(GREENUP_CONFIRM_WINDOW).find_map(|window| {
        let hits = window
            .iter()
            .filter(|&&(_, v)| v >= GREENUP_THRESHOLD)
            .count();
        (hits >= GREENUP_CONFIRM_COUNT).then(|| window[window.len() - 1].0)
    })
}

fn detect_late_greenup(series: &DailySeries) -> (AnomalyFinding, ChartSeries) {
    let mut finding = AnomalyFinding::new(GREENUP_KEY, "Delayed Greenup");
    let Some(latest) = series.latest_present() else {
        finding.detail("reason", "insufficient_history");
        return (finding, ChartSeries::Onset(Vec::new()));
    };

    let onsets: Vec<(i32, NaiveDate)> = present_by_year(series)
        .iter()
        .filter_map(|(&year, days)| greenup_onset(days).map(|d| (year, d)))
        .collect();
    if onsets.is_empty() {
        finding.detail("reason", "no_greenup_detected");
        return (finding, ChartSeries::Onset(Vec::new()));
    }

    // The season under evaluation is the one holding the latest observation,
    // whether or not it has greened up yet.
    let current_year = latest.year();
    let chart = ChartSeries::Onset(onset_rows(&onsets, current_year));

    let baseline: Vec<NaiveDate> = onsets
        .iter()
        .filter(|&&(year, _)| year < current_year)
        .map(|&(_, d)| d)
        .collect();
    let Some(baseline_doy) = median_day_of_year(&baseline) else {
        finding.detail("reason", "no_baseline");
        return (finding, chart);
    };

    finding.detail("baselineDayOfYear", baseline_doy);
    finding.detail("threshold", GREENUP_THRESHOLD);

    match onsets.iter().find(|&&(year, _)| year == current_year) {
        Some(&(_, current)) => {
            let current_doy = current.ordinal() as i64;
            let delay = current_doy - baseline_doy;
            finding.detail("currentDayOfYear", current_doy);
            finding.detail("delayDays", delay);
            finding.detected_at = Some(midnight(current));
            if delay >= GREENUP_DELAY_DAYS {
                raise(&mut finding);
            }
        }
        None => {
            let delay = latest.ordinal() as i64 - baseline_doy;
            finding.detail("currentDayOfYear", Value::Null);
            finding.detail("delayDays", delay);
            finding.detail("status", "not_observed");
            if delay >= GREENUP_DELAY_DAYS {
                raise(&mut finding);
                finding.detected_at = Some(midnight(latest));
            }
        }
    }
    (finding, chart)
}

/// Lower and upper decile of each weather variable over the full series
#[derive(Debug, Default)]
struct WeatherBands {
    temperature: Option<(f64, f64)>,
    wind_speed: Option<(f64, f64)>,
    cloudcover: Option<(f64, f64)>,
    clarity: Option<(f64, f64)>,
}

impl WeatherBands {
    fn from_weather(weather: &BTreeMap<NaiveDate, WeatherRecord>) -> Self {
        let band = |field: fn(&WeatherRecord) -> Option<f64>| {
            let values: Vec<f64> = weather.values().filter_map(field).collect();
            Some((percentile(&values, 10.0)?, percentile(&values, 90.0)?))
        };
        Self {
            temperature: band(|w| w.temperature),
            wind_speed: band(|w| w.wind_speed),
            cloudcover: band(|w| w.cloudcover),
            clarity: band(|w| w.clarity),
        }
    }

    fn is_extreme(&self, record: Option<&WeatherRecord>) -> bool {
        let Some(record) = record else {
            return false;
        };
        let check = |value: Option<f64>, band: Option<(f64, f64)>, test: fn(f64, (f64, f64)) -> bool| {
            match (value.filter(|v| v.is_finite()), band) {
                (Some(v), Some(b)) => test(v, b),
                _ => false,
            }
        };
        check(record.temperature, self.temperature, |v, (lo, hi)| v <= lo || v >= hi)
            || check(record.wind_speed, self.wind_speed, |v, (_, hi)| v >= hi)
            || check(record.cloudcover, self.cloudcover, |v, (_, hi)| v >= hi)
            || check(record.clarity, self.clarity, |v, (lo, _)| v <= lo)
    }
}

fn detect_weatherless_drop(
    observations: &[DailyObservation],
    weather: &BTreeMap<NaiveDate, WeatherRecord>,
) -> (AnomalyFinding, ChartSeries) {
    let mut finding = AnomalyFinding::new(WEATHERLESS_DROP_KEY, "NDVI Drop Without Weather Driver");
    if observations.len() < 2 {
        finding.detail("reason", "insufficient_history");
        return (finding, ChartSeries::Drops(Vec::new()));
    }

    let mut rows: Vec<DropRow> = observations
        .iter()
        .enumerate()
        .map(|(i, obs)| DropRow {
            date: obs.date,
            ndvi: obs.value,
            delta: i.checked_sub(1).map(|p| obs.value - observations[p].value),
            flagged: false,
        })
        .collect();

    if weather.is_empty() {
        finding.detail("reason", "missing_weather");
        return (finding, ChartSeries::Drops(rows));
    }

    let bands = WeatherBands::from_weather(weather);
    let mut latest_event: Option<usize> = None;
    for i in 1..observations.len() {
        let (prev, obs) = (observations[i - 1], observations[i]);
        let delta = obs.value - prev.value;
        if delta > -DROP_THRESHOLD + DELTA_EPSILON {
            continue;
        }
        if (obs.date - prev.date).num_days() > DROP_MAX_GAP_DAYS {
            continue;
        }
        if bands.is_extreme(weather.get(&obs.date)) {
            log::debug!("Drop on {} coincides with extreme weather", obs.date);
            continue;
        }
        rows[i].flagged = true;
        latest_event = Some(i);
    }

    let Some(i) = latest_event else {
        finding.detail("reason", "no_drop_detected");
        return (finding, ChartSeries::Drops(rows));
    };

    let (prev, event) = (observations[i - 1], observations[i]);
    let record = weather.get(&event.date);
    let latest = observations[observations.len() - 1].date;

    finding.detected_at = Some(midnight(event.date));
    if (latest - event.date).num_days() <= RECENT_WINDOW_DAYS {
        raise(&mut finding);
    }
    finding.detail("dropMagnitude", (event.value - prev.value).abs());
    finding.detail("currentNdvi", event.value);
    finding.detail("previousNdvi", prev.value);
    finding.detail("temperature", record.and_then(|w| w.temperature));
    finding.detail("windSpeed", record.and_then(|w| w.wind_speed));
    finding.detail("cloudcover", record.and_then(|w| w.cloudcover));
    finding.detail("clarity", record.and_then(|w| w.clarity));
    finding.detail("threshold", DROP_THRESHOLD);
    (finding, ChartSeries::Drops(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doy(year: i32, ordinal: u32) -> NaiveDate {
        NaiveDate::from_yo_opt(year, ordinal).unwrap()
    }

    fn observations(values: impl IntoIterator<Item = (NaiveDate, f64)>) -> Vec<DailyObservation> {
        values
            .into_iter()
            .map(|(date, value)| DailyObservation { date, value })
            .collect()
    }

    #[test]
    fn test_percentile_linear() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&values, 0.0), Some(1.0));
        assert_eq!(percentile(&values, 100.0), Some(4.0));
        assert!((percentile(&values, 50.0).unwrap() - 2.5).abs() < 1e-12);
        assert!((percentile(&values, 90.0).unwrap() - 3.7).abs() < 1e-12);
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_rolling_std_min_periods() {
        let values = vec![Some(1.0), None, Some(3.0), Some(5.0)];
        let stds = rolling_std(&values, 3, 2);
        assert_eq!(stds[0], None);
        assert_eq!(stds[1], None);
        assert!((stds[2].unwrap() - 2.0f64.sqrt()).abs() < 1e-12);
        assert!((stds[3].unwrap() - 2.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_median_day_of_year_truncates() {
        let dates = [doy(2021, 200), doy(2022, 203)];
        assert_eq!(median_day_of_year(&dates), Some(201));
        assert_eq!(median_day_of_year(&[]), None);
    }

    #[test]
    fn test_senescence_onset_needs_recent_canopy() {
        // Low values with canopy more than 30 days back do not count
        let days = vec![
            (doy(2022, 100), 0.6),
            (doy(2022, 140), 0.3),
            (doy(2022, 150), 0.5),
            (doy(2022, 160), 0.35),
        ];
        assert_eq!(senescence_onset(&days), Some(doy(2022, 160)));
    }

    #[test]
    fn test_greenup_onset_ignores_single_spike() {
        let days = vec![
            (doy(2022, 90), 0.2),
            (doy(2022, 91), 0.5),
            (doy(2022, 92), 0.2),
            (doy(2022, 93), 0.2),
            (doy(2022, 94), 0.4),
            (doy(2022, 95), 0.4),
            (doy(2022, 96), 0.4),
        ];
        assert_eq!(greenup_onset(&days), Some(doy(2022, 96)));
    }

    #[test]
    fn test_all_signals_reported_on_empty_input() {
        let report = detect_observations(&[], &BTreeMap::new());
        assert_eq!(report.findings.len(), 4);
        for finding in &report.findings {
            assert!(!finding.triggered);
            assert_eq!(finding.reason(), Some("insufficient_history"));
        }
        assert!(report.chart(DAILY_CHART_KEY).unwrap().is_empty());
    }

    #[test]
    fn test_drop_without_weather_reports_missing_weather() {
        let obs = observations(vec![(doy(2023, 100), 0.6), (doy(2023, 110), 0.4)]);
        let report = detect_observations(&obs, &BTreeMap::new());
        let finding = report.finding(WEATHERLESS_DROP_KEY).unwrap();
        assert_eq!(finding.reason(), Some("missing_weather"));
        assert_eq!(report.chart(WEATHERLESS_DROP_KEY).unwrap().len(), 2);
    }

    #[test]
    fn test_volatility_spike_at_end() {
        let mut values = Vec::new();
        for i in 0..200u32 {
            let v = if i < 180 {
                0.5 + 0.01 * (i % 2) as f64
            } else if i % 2 == 0 {
                0.2
            } else {
                0.8
            };
            values.push((doy(2023, i + 1), v));
        }
        let report = detect_observations(&observations(values), &BTreeMap::new());
        let finding = report.finding(VOLATILITY_KEY).unwrap();
        assert!(finding.triggered);
        assert_eq!(finding.severity, Severity::Warning);
        assert_eq!(finding.details["windowDays"], 45);
        assert!(finding.detected_at.is_some());
    }

    #[test]
    fn test_volatility_insufficient_history() {
        let values = (1..=5).map(|d| (doy(2023, d), 0.5));
        let report = detect_observations(&observations(values), &BTreeMap::new());
        let finding = report.finding(VOLATILITY_KEY).unwrap();
        assert_eq!(finding.reason(), Some("insufficient_history"));
    }
}
