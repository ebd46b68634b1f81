//! Daily resampling of index observations and weather covariates

use crate::types::WeatherRecord;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeMap;

/// Longest run of missing days bridged by linear interpolation
pub const MAX_FILL_DAYS: i64 = 7;

/// Running mean over finite samples
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    pub(crate) fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.sum += v;
            self.count += 1;
        }
    }

    pub(crate) fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// One index value per calendar day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyObservation {
    pub date: NaiveDate,
    pub value: f64,
}

/// Collapse timestamped samples into per-day means
///
/// Repeated timestamps keep the last sample seen; non-finite values are dropped.
pub fn daily_observations<I>(samples: I) -> Vec<DailyObservation>
where
    I: IntoIterator<Item = (DateTime<Utc>, f64)>,
{
    let mut by_instant: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
    for (instant, value) in samples {
        if value.is_finite() {
            by_instant.insert(instant, value);
        }
    }

    let mut by_day: BTreeMap<NaiveDate, Mean> = BTreeMap::new();
    for (instant, value) in by_instant {
        by_day.entry(instant.date_naive()).or_default().add(Some(value));
    }

    by_day
        .into_iter()
        .filter_map(|(date, mean)| mean.value().map(|value| DailyObservation { date, value }))
        .collect()
}

/// Dense daily series from the first to the last observed day
///
/// Gaps of up to [`MAX_FILL_DAYS`] missing days are linearly interpolated;
/// longer gaps stay missing.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySeries {
    start: Option<NaiveDate>,
    values: Vec<Option<f64>>,
}

impl DailySeries {
    pub fn from_observations(observations: &[DailyObservation]) -> Self {
        let (Some(first), Some(last)) = (observations.first(), observations.last()) else {
            return Self {
                start: None,
                values: Vec::new(),
            };
        };

        let len = (last.date - first.date).num_days() as usize + 1;
        let mut values = vec![None; len];
        for obs in observations {
            let offset = (obs.date - first.date).num_days() as usize;
            values[offset] = Some(obs.value);
        }

        for pair in observations.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let span = (b.date - a.date).num_days();
            let missing = span - 1;
            if missing == 0 || missing > MAX_FILL_DAYS {
                continue;
            }
            let base = (a.date - first.date).num_days() as usize;
            for step in 1..span {
                let t = step as f64 / span as f64;
                values[base + step as usize] = Some(a.value + (b.value - a.value) * t);
            }
        }

        Self {
            start: Some(first.date),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    pub fn date_at(&self, offset: usize) -> Option<NaiveDate> {
        self.start.map(|start| start + Duration::days(offset as i64))
    }

    /// Every day with its value, missing days included
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, Option<f64>)> + '_ {
        let start = self.start;
        self.values.iter().enumerate().filter_map(move |(i, v)| {
            start.map(|s| (s + Duration::days(i as i64), *v))
        })
    }

    /// Days that carry a value, observed or interpolated
    pub fn present(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.iter().filter_map(|(date, v)| v.map(|v| (date, v)))
    }

    pub fn present_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn latest_present(&self) -> Option<NaiveDate> {
        self.values
            .iter()
            .rposition(|v| v.is_some())
            .and_then(|i| self.date_at(i))
    }
}

#[derive(Default)]
struct WeatherDay {
    temperature: Mean,
    humidity: Mean,
    cloudcover: Mean,
    wind_speed: Mean,
    clarity: Mean,
}

/// Average weather records that fall on the same calendar day
pub fn daily_weather(records: &[WeatherRecord]) -> BTreeMap<NaiveDate, WeatherRecord> {
    let mut days: BTreeMap<NaiveDate, WeatherDay> = BTreeMap::new();
    for record in records {
        let day = days.entry(record.date).or_default();
        day.temperature.add(record.temperature);
        day.humidity.add(record.humidity);
        day.cloudcover.add(record.cloudcover);
        day.wind_speed.add(record.wind_speed);
        day.clarity.add(record.clarity);
    }

    days.into_iter()
        .map(|(date, day)| {
            let record = WeatherRecord {
                date,
                temperature: day.temperature.value(),
                humidity: day.humidity.value(),
                cloudcover: day.cloudcover.value(),
                wind_speed: day.wind_speed.value(),
                clarity: day.clarity.value(),
            };
            (date, record)
        })
        .collect()
}
