// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{GcsWeather, OfflineWeather, WeatherSource};
use crate::error::ErrorKind;

#[tokio::test]
async fn offline_atmos_follows_the_standard_lapse() {
    let source = WeatherSource::Offline(OfflineWeather);
    let (grid, next) = source.atmos_grid("ZNY", 3_600, "KJFK").await.expect("grid");
    assert_eq!(grid.airport, "KJFK");
    assert!(!grid.points.is_empty());
    // Temperature decreases with altitude.
    for pair in grid.points.windows(2) {
        assert!(pair[1].temperature_c < pair[0].temperature_c);
        assert!(pair[1].altitude > pair[0].altitude);
    }
    assert_eq!(next, 7_200, "next refresh on the hour");
}

#[tokio::test]
async fn offline_has_no_precipitation_imagery() {
    let source = WeatherSource::Offline(OfflineWeather);
    let err = source.precip_url("ZNY", 0).await.err();
    assert_eq!(err.and_then(|e| e.kind()), Some(ErrorKind::WeatherUnavailable));
}

#[tokio::test]
async fn gcs_precip_urls_are_slotted_and_report_next_refresh() {
    let gcs = GcsWeather::new(r#"{"project_id": "trainer"}"#, false).expect("credentials");
    let source = WeatherSource::Gcs(gcs);

    // 10:03 falls in the 10:00 slot; new data lands at 10:06.
    let t = 36_180;
    let (url, next) = source.precip_url("ZNY", t).await.expect("url");
    assert_eq!(url, "https://storage.googleapis.com/trainer-wx/precip/ZNY/36000.png");
    assert_eq!(next, 36_360);
}

#[test]
fn bad_credentials_fail_construction() {
    assert!(GcsWeather::new("not json", false).is_err());
    assert!(GcsWeather::new(r#"{"missing": "project"}"#, false).is_err());
}

#[test]
fn offline_intervals_cover_everything() {
    let source = WeatherSource::Offline(OfflineWeather);
    let intervals = source.time_intervals();
    assert_eq!(intervals.get("*"), Some(&(0, i64::MAX)));
}
