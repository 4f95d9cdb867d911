use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use patchcast::{
    features::{ARCHIVE_COLUMNS, TARGET_FEATURES},
    service::{bootstrap_artifacts, recalibrate_detector},
    source::ArchiveHourly,
    AnomalyStatus, ArchiveResponse, ForecastRequest, ForecastService, ServiceConfig, ServiceContext,
    StaticSource,
};
use tempfile::tempdir;

const HOURS: i64 = 200;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

/// 200 hours of synthetic archive data starting 2024-03-01T00:00.
fn archive() -> ArchiveResponse {
    let origin = day(1).and_hms_opt(0, 0, 0).unwrap();
    let time = (0..HOURS)
        .map(|h| (origin + Duration::hours(h)).format("%Y-%m-%dT%H:%M").to_string())
        .collect();

    let columns: BTreeMap<String, Vec<Option<f64>>> = ARCHIVE_COLUMNS
        .iter()
        .enumerate()
        .map(|(c, name)| {
            let values = (0..HOURS)
                .map(|h| {
                    // a few gaps for the fill step
                    if h % 37 == 5 { None } else { Some(((h as f64) / 6.0 + c as f64).sin() * (c + 1) as f64 + 20.0) }
                })
                .collect();
            (name.to_string(), values)
        })
        .collect();

    ArchiveResponse { latitude: Some(28.6), longitude: Some(77.2), hourly: ArchiveHourly { time, columns } }
}

fn request(start: NaiveDate, end: NaiveDate) -> ForecastRequest {
    ForecastRequest { latitude: 28.6139, longitude: 77.2090, start_date: start, end_date: end }
}

fn deployed_service(dir: &std::path::Path) -> ForecastService {
    let forecaster_path = dir.join("forecaster.bin");
    let detector_path = dir.join("detector.json");
    let table = archive().to_table(None, None).unwrap();
    bootstrap_artifacts(&forecaster_path, &detector_path, table.matrix(), 2.0).unwrap();

    let config = ServiceConfig { forecaster_path, detector_path, worker_threads: 2, ..ServiceConfig::default() };
    let context = Arc::new(ServiceContext::load(&config).unwrap());
    ForecastService::new(context, Arc::new(StaticSource::new(archive()))).unwrap()
}

#[test]
fn test_bootstrapped_service_forecasts() {
    let dir = tempdir().unwrap();
    let service = deployed_service(dir.path());

    let result = service.handle(&request(day(1), day(9))).unwrap();
    assert_eq!(result.forecast.len(), 12);
    for name in TARGET_FEATURES {
        assert_eq!(result.forecast[name].len(), 24);
        assert!(result.forecast[name].iter().all(|v| v.is_finite()));
    }
    assert_eq!(result.anomaly.status, AnomalyStatus::Evaluated);
    assert_eq!(result.metadata.features.len(), 12);
    assert_eq!(result.metadata.history_hours, HOURS as usize);
}

#[test]
fn test_batch_failures_are_structured() {
    let dir = tempdir().unwrap();
    let service = deployed_service(dir.path());

    let responses = service.handle_batch(&[
        request(day(1), day(9)),
        request(day(1), day(1)),
        request(day(5), day(2)),
    ]);
    assert_eq!(responses.len(), 3);
    assert!(responses[0].is_ok());

    let short = responses[1].as_ref().unwrap_err();
    assert_eq!(short.kind, "insufficient_history");
    assert_eq!((short.required, short.available), (Some(128), Some(24)));

    let invalid = responses[2].as_ref().unwrap_err();
    assert_eq!(invalid.kind, "invalid_request");
}

#[test]
fn test_upstream_failure() {
    let dir = tempdir().unwrap();
    let service = deployed_service(dir.path());

    let failure = service.handle(&request(day(20), day(25))).unwrap_err();
    assert_eq!(failure.kind, "upstream_data_error");
}

#[test]
fn test_health_and_model_info() {
    let dir = tempdir().unwrap();
    let service = deployed_service(dir.path());

    let health = service.health();
    assert!(health.forecaster_loaded && health.detector_loaded);
    assert_eq!(health.forecaster_version.as_deref(), Some(env!("CARGO_PKG_VERSION")));

    let info = service.model_info();
    assert_eq!(info.seq_len, 128);
    assert_eq!(info.forecast_horizon, 24);
    assert_eq!(info.num_patches, 15);
    assert_eq!(info.threshold_bias, 0.3);
    assert!((info.anomaly_threshold - (info.learned_threshold - 0.3)).abs() < 1e-12);
}

#[test]
fn test_missing_artifact_is_fatal() {
    let dir = tempdir().unwrap();
    let config = ServiceConfig {
        forecaster_path: dir.path().join("absent.bin"),
        detector_path: dir.path().join("absent.json"),
        ..ServiceConfig::default()
    };

    let err = ServiceContext::load(&config).unwrap_err();
    assert_eq!(err.kind(), "artifact_load_error");
}

#[test]
fn test_recalibration_rewrites_threshold() {
    let dir = tempdir().unwrap();
    let forecaster_path = dir.path().join("forecaster.bin");
    let detector_path = dir.path().join("detector.bin");
    let table = archive().to_table(None, None).unwrap();
    bootstrap_artifacts(&forecaster_path, &detector_path, table.matrix(), 2.0).unwrap();

    let config = ServiceConfig { forecaster_path, detector_path, ..ServiceConfig::default() };
    let before = ServiceContext::load(&config).unwrap().threshold().learned;
    let after = recalibrate_detector(&config, table.matrix(), 0.0).unwrap();

    assert!(after <= before);
    assert_eq!(ServiceContext::load(&config).unwrap().threshold().learned, after);
}

#[test]
fn test_holdout_evaluation() {
    let dir = tempdir().unwrap();
    let service = deployed_service(dir.path());
    let table = archive().to_table(None, None).unwrap();

    // 200 rows give 49 pairs; the last 10 are held out
    let report = service.context().evaluate(table.matrix(), 0.8).unwrap();
    assert_eq!(report.windows, 10);
    assert_eq!(report.feature_mae.len(), 12);
    assert!(report.feature_mae.iter().all(|m| m.is_finite() && *m >= 0.0));
}
