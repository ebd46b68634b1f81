use canopy::core::aoi::{normalize_bbox, AreaOfInterest};
use canopy::MonitorError;

/// Deterministic pseudo-random corners spread over the globe
fn corner_quadruples(count: usize) -> Vec<[f64; 4]> {
    let mut state: u64 = 0x2545_F491_4F6C_DD1D;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % 1_000_000) as f64 / 1_000_000.0
    };
    (0..count)
        .map(|_| {
            [
                next() * 360.0 - 180.0,
                next() * 180.0 - 90.0,
                next() * 360.0 - 180.0,
                next() * 180.0 - 90.0,
            ]
        })
        .collect()
}

#[test]
fn test_normalize_is_idempotent() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut checked = 0;
    for bbox in corner_quadruples(500) {
        let Ok(once) = normalize_bbox(bbox) else {
            continue;
        };
        let twice = normalize_bbox(once).expect("normalized box must stay valid");
        assert_eq!(once, twice);
        assert!(once[0] < once[2] && once[1] < once[3]);

        let aoi = AreaOfInterest::from_bounds(bbox).unwrap();
        assert_eq!(aoi.normalize().unwrap(), aoi);
        checked += 1;
    }
    println!("Checked {} random boxes", checked);
    assert!(checked > 400);
}

#[test]
fn test_swapped_corners_are_sorted() {
    let aoi = AreaOfInterest::new(10.2, 45.1, 10.1, 45.0).unwrap();
    assert_eq!(aoi.bounds(), [10.1, 45.0, 10.2, 45.1]);
}

#[test]
fn test_invalid_boxes_rejected() {
    let cases = [
        [10.0, 45.0, 10.0, 45.1],
        [10.0, 45.0, 10.1, 45.0],
        [-181.0, 0.0, 0.0, 1.0],
        [0.0, -91.0, 1.0, 1.0],
        [f64::NAN, 0.0, 1.0, 1.0],
        [0.0, 0.0, f64::INFINITY, 1.0],
    ];
    for bbox in cases {
        match normalize_bbox(bbox) {
            Err(MonitorError::InvalidAoi(_)) => {}
            other => panic!("expected InvalidAoi for {:?}, got {:?}", bbox, other),
        }
    }
}

#[test]
fn test_center_radius_box() {
    let aoi = AreaOfInterest::from_center_radius(-122.0, 0.0, 11.1).unwrap();
    approx::assert_abs_diff_eq!(aoi.height(), 0.2, epsilon = 1e-9);
    approx::assert_abs_diff_eq!(aoi.width(), 0.2, epsilon = 1e-9);

    // Longitude span widens away from the equator
    let north = AreaOfInterest::from_center_radius(-122.0, 60.0, 11.1).unwrap();
    approx::assert_abs_diff_eq!(north.width(), 0.4, epsilon = 1e-6);
    assert!(AreaOfInterest::from_center_radius(0.0, 0.0, 0.0).is_err());
}

#[test]
fn test_geojson_feature_collection_union() {
    let text = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {}, "geometry": {
                "type": "Polygon",
                "coordinates": [[[10.0, 45.0], [10.1, 45.0], [10.1, 45.1], [10.0, 45.1], [10.0, 45.0]]]
            }},
            {"type": "Feature", "properties": {}, "geometry": {
                "type": "Polygon",
                "coordinates": [[[10.05, 45.05], [10.2, 45.05], [10.2, 45.2], [10.05, 45.2], [10.05, 45.05]]]
            }}
        ]
    }"#;
    let aoi = AreaOfInterest::from_geojson_str(text).unwrap();
    assert_eq!(aoi.bounds(), [10.0, 45.0, 10.2, 45.2]);
    assert_eq!(aoi.geometry().map(|g| g.0.len()), Some(1));
}

#[test]
fn test_geojson_without_polygons_rejected() {
    let text = r#"{"type": "Point", "coordinates": [10.0, 45.0]}"#;
    assert!(matches!(
        AreaOfInterest::from_geojson_str(text),
        Err(MonitorError::InvalidGeometry(_))
    ));
}
