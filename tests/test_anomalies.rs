use canopy::core::anomaly::{
    detect, ChartSeries, AnomalyDetector, GREENUP_KEY, SENESCENCE_KEY, VOLATILITY_KEY,
    WEATHERLESS_DROP_KEY,
};
use canopy::{IndexKind, Severity, TimeSeriesPoint, WeatherRecord};
use chrono::{Duration, NaiveDate, TimeZone, Utc};

fn point(date: NaiveDate, ndvi: f64) -> TimeSeriesPoint {
    TimeSeriesPoint {
        scene_id: format!("scene-{}", date),
        date: Utc.from_utc_datetime(&date.and_hms_opt(18, 30, 0).unwrap()),
        cloud_cover: 5.0,
        collection: "HLSS30.v2.0".to_string(),
        ndvi: Some(ndvi),
        evi: None,
        coverage: None,
        weather: None,
    }
}

fn doy(year: i32, ordinal: u32) -> NaiveDate {
    NaiveDate::from_yo_opt(year, ordinal).unwrap()
}

/// Daily series per year: `before` until the switch day, `after` from it on
fn seasonal(years: &[(i32, u32)], before: f64, after: f64) -> Vec<TimeSeriesPoint> {
    let mut points = Vec::new();
    for &(year, switch) in years {
        for ordinal in 100..=300 {
            let value = if ordinal < switch { before } else { after };
            points.push(point(doy(year, ordinal), value));
        }
    }
    points
}

#[test]
fn test_early_senescence_days_early() {
    let _ = env_logger::builder().is_test(true).try_init();
    let points = seasonal(&[(2021, 200), (2022, 200), (2023, 180)], 0.6, 0.2);

    let report = detect(&points, None);
    let finding = report.finding(SENESCENCE_KEY).unwrap();
    println!("{}", serde_json::to_string_pretty(finding).unwrap());

    assert!(finding.triggered);
    assert_eq!(finding.severity, Severity::Warning);
    assert_eq!(finding.details["daysEarly"], 20);
    assert_eq!(finding.details["baselineDayOfYear"], 200);
    assert_eq!(finding.details["currentDayOfYear"], 180);
    assert_eq!(
        finding.detected_at,
        Some(Utc.from_utc_datetime(&doy(2023, 180).and_hms_opt(0, 0, 0).unwrap()))
    );

    match report.chart(SENESCENCE_KEY) {
        Some(ChartSeries::Onset(rows)) => {
            assert_eq!(rows.len(), 3);
            assert_eq!(rows.iter().filter(|r| r.is_current).count(), 1);
            assert_eq!(rows[2].year, 2023);
        }
        other => panic!("unexpected chart {:?}", other),
    }
}

#[test]
fn test_senescence_on_schedule_does_not_trigger() {
    let points = seasonal(&[(2021, 200), (2022, 200), (2023, 195)], 0.6, 0.2);
    let report = detect(&points, None);
    let finding = report.finding(SENESCENCE_KEY).unwrap();
    assert!(!finding.triggered);
    assert_eq!(finding.details["daysEarly"], 5);
}

#[test]
fn test_senescence_single_year_has_no_baseline() {
    let points = seasonal(&[(2023, 180)], 0.6, 0.2);
    let report = detect(&points, None);
    let finding = report.finding(SENESCENCE_KEY).unwrap();
    assert!(!finding.triggered);
    assert_eq!(finding.reason(), Some("no_baseline"));
}

#[test]
fn test_delayed_greenup() {
    // Onset confirmed on the third day at or above 0.3
    let points = seasonal(&[(2021, 120), (2022, 120), (2023, 140)], 0.2, 0.5);
    let report = detect(&points, None);
    let finding = report.finding(GREENUP_KEY).unwrap();

    assert!(finding.triggered);
    assert_eq!(finding.details["baselineDayOfYear"], 122);
    assert_eq!(finding.details["currentDayOfYear"], 142);
    assert_eq!(finding.details["delayDays"], 20);
}

#[test]
fn test_greenup_not_yet_observed() {
    let mut points = seasonal(&[(2021, 120), (2022, 120)], 0.2, 0.5);
    for ordinal in 60..=150 {
        points.push(point(doy(2023, ordinal), 0.2));
    }

    let report = detect(&points, None);
    let finding = report.finding(GREENUP_KEY).unwrap();
    assert!(finding.triggered);
    assert_eq!(finding.details["status"], "not_observed");
    assert!(finding.details["currentDayOfYear"].is_null());
    assert_eq!(finding.details["delayDays"], 150 - 122);
    assert_eq!(
        finding.detected_at,
        Some(Utc.from_utc_datetime(&doy(2023, 150).and_hms_opt(0, 0, 0).unwrap()))
    );
}

#[test]
fn test_no_greenup_anywhere() {
    let points = seasonal(&[(2022, 400)], 0.2, 0.2);
    let report = detect(&points, None);
    assert_eq!(
        report.finding(GREENUP_KEY).unwrap().reason(),
        Some("no_greenup_detected")
    );
}

/// 100 days of weather where temperature, cloud cover and clarity cycle
/// and wind climbs steadily from 1 to 100
fn weather(start: NaiveDate) -> Vec<WeatherRecord> {
    (0..100)
        .map(|k| {
            let mut record = WeatherRecord::new(start + Duration::days(k));
            let cloud = ((k % 20) * 5) as f64;
            record.temperature = Some(10.0 + (k % 20) as f64);
            record.cloudcover = Some(cloud);
            record.clarity = Some(100.0 - cloud);
            record.wind_speed = Some((k + 1) as f64);
            record.humidity = Some(60.0);
            record
        })
        .collect()
}

/// Observations five days apart with a 0.15 drop on `drop_day`
fn drop_series(start: NaiveDate, drop_day: i64) -> Vec<TimeSeriesPoint> {
    vec![
        point(start + Duration::days(drop_day - 5), 0.60),
        point(start + Duration::days(drop_day), 0.45),
        point(start + Duration::days(drop_day + 5), 0.45),
    ]
}

#[test]
fn test_weatherless_drop_with_normal_weather() {
    let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let points = drop_series(start, 50);

    let report = detect(&points, Some(&weather(start)));
    let finding = report.finding(WEATHERLESS_DROP_KEY).unwrap();
    println!("{}", serde_json::to_string_pretty(finding).unwrap());

    assert!(finding.triggered);
    assert_eq!(finding.severity, Severity::Warning);
    let magnitude = finding.details["dropMagnitude"].as_f64().unwrap();
    approx::assert_abs_diff_eq!(magnitude, 0.15, epsilon = 1e-9);
    assert_eq!(finding.details["windSpeed"], 51.0);
    assert_eq!(finding.details["previousNdvi"], 0.6);

    match report.chart(WEATHERLESS_DROP_KEY) {
        Some(ChartSeries::Drops(rows)) => {
            assert_eq!(rows.iter().filter(|r| r.flagged).count(), 1);
            assert!(rows[0].delta.is_none());
        }
        other => panic!("unexpected chart {:?}", other),
    }
}

#[test]
fn test_drop_of_exactly_threshold_counts() {
    let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let day = |d: i64| start + Duration::days(d);

    // 0.5 - 0.4 is a hair under 0.1 in binary floating point
    let points = vec![point(day(45), 0.5), point(day(50), 0.4), point(day(55), 0.4)];
    let report = detect(&points, Some(&weather(start)));
    let finding = report.finding(WEATHERLESS_DROP_KEY).unwrap();
    assert!(finding.triggered);
    assert_eq!(finding.details["previousNdvi"], 0.5);

    let points = vec![point(day(45), 0.5), point(day(50), 0.41), point(day(55), 0.41)];
    let report = detect(&points, Some(&weather(start)));
    let finding = report.finding(WEATHERLESS_DROP_KEY).unwrap();
    assert!(!finding.triggered);
    assert_eq!(finding.reason(), Some("no_drop_detected"));
}

#[test]
fn test_drop_explained_by_high_wind() {
    let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    // Wind on day 95 is near the 95th percentile, above the upper decile
    let points = drop_series(start, 95);

    let report = detect(&points, Some(&weather(start)));
    let finding = report.finding(WEATHERLESS_DROP_KEY).unwrap();
    assert!(!finding.triggered);
    assert_eq!(finding.reason(), Some("no_drop_detected"));
}

#[test]
fn test_drop_across_long_gap_ignored() {
    let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let points = vec![
        point(start + Duration::days(10), 0.6),
        point(start + Duration::days(50), 0.4),
    ];
    let report = detect(&points, Some(&weather(start)));
    assert_eq!(
        report.finding(WEATHERLESS_DROP_KEY).unwrap().reason(),
        Some("no_drop_detected")
    );
}

#[test]
fn test_attached_weather_used_when_none_given() {
    let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let records = weather(start);
    let mut points = drop_series(start, 50);
    for p in points.iter_mut() {
        p.weather = records.iter().find(|r| r.date == p.date.date_naive()).cloned();
    }

    let report = detect(&points, None);
    let finding = report.finding(WEATHERLESS_DROP_KEY).unwrap();
    // Bands come from the three attached days; the drop day is their median
    assert!(finding.triggered);
    assert_eq!(finding.details["temperature"], 20.0);
}

#[test]
fn test_every_signal_reported() {
    let points = vec![point(doy(2024, 100), 0.5)];
    let report = detect(&points, None);

    let keys: Vec<&str> = report.findings.iter().map(|f| f.key.as_str()).collect();
    assert_eq!(
        keys,
        vec![VOLATILITY_KEY, SENESCENCE_KEY, GREENUP_KEY, WEATHERLESS_DROP_KEY]
    );
    assert_eq!(report.triggered().count(), 0);
    assert_eq!(
        report.finding(VOLATILITY_KEY).unwrap().reason(),
        Some("insufficient_history")
    );
    assert_eq!(
        report.finding(SENESCENCE_KEY).unwrap().reason(),
        Some("no_drop_found")
    );

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["findings"][0]["title"], "NDVI Volatility Spike");
    assert_eq!(json["charts"]["ndvi_daily"][0]["date"], "2024-04-09");
}

#[test]
fn test_evi_detector_reads_evi_values() {
    let mut points = seasonal(&[(2021, 200), (2022, 200), (2023, 180)], 0.6, 0.2);
    for p in points.iter_mut() {
        p.evi = p.ndvi.take();
    }

    let ndvi_report = detect(&points, None);
    assert_eq!(
        ndvi_report.finding(SENESCENCE_KEY).unwrap().reason(),
        Some("insufficient_history")
    );

    let evi_report = AnomalyDetector::new(IndexKind::Evi).detect(&points, None);
    assert!(evi_report.finding(SENESCENCE_KEY).unwrap().triggered);
}
