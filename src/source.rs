//! Historical hourly observations.
//!
//! Sources deliver an archive response in the provider's JSON layout; this
//! module turns it into a gap-free [`ObservationTable`] with the derived
//! features already added.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ForecastError, Result};
use crate::features::{derive_features, fill_matrix_gaps};
use crate::table::{FeatureMatrix, ObservationTable};

/// Timestamp layout of the archive's `time` column.
pub const ARCHIVE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Location and whole-day date range of a history request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoricalQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Anything that can deliver hourly history for a query.
pub trait HistoricalSource: Send + Sync {
    fn fetch(&self, query: &HistoricalQuery) -> Result<ObservationTable>;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveHourly {
    pub time: Vec<String>,
    /// Every other key is a column; `null` marks a gap.
    #[serde(flatten)]
    pub columns: BTreeMap<String, Vec<Option<f64>>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveResponse {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    pub hourly: ArchiveHourly,
}

impl ArchiveResponse {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ForecastError::UpstreamData(format!("malformed archive response: {e}")))
    }

    /// Rows whose date falls in `[start, end]`, gaps filled, derived features added.
    pub fn to_table(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<ObservationTable> {
        let hourly = &self.hourly;
        let timestamps = hourly
            .time
            .iter()
            .map(|t| {
                NaiveDateTime::parse_from_str(t, ARCHIVE_TIME_FORMAT)
                    .map_err(|e| ForecastError::UpstreamData(format!("bad timestamp '{t}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        for (name, column) in &hourly.columns {
            if column.len() != timestamps.len() {
                return Err(ForecastError::UpstreamData(format!(
                    "column '{name}' has {} values for {} timestamps",
                    column.len(),
                    timestamps.len()
                )));
            }
        }

        let keep: Vec<usize> = timestamps
            .iter()
            .enumerate()
            .filter(|(_, ts)| {
                let day = ts.date();
                start.map_or(true, |s| day >= s) && end.map_or(true, |e| day <= e)
            })
            .map(|(i, _)| i)
            .collect();
        if keep.is_empty() {
            return Err(ForecastError::UpstreamData("no observations in the requested range".to_string()));
        }

        let names: Vec<String> = hourly.columns.keys().cloned().collect();
        let columns: Vec<&Vec<Option<f64>>> = hourly.columns.values().collect();
        let values = Array2::from_shape_fn((keep.len(), names.len()), |(r, c)| {
            columns[c][keep[r]].unwrap_or(f64::NAN)
        });

        let mut matrix = FeatureMatrix::new(names, values)?;
        fill_matrix_gaps(&mut matrix)?;
        let derived = derive_features(&mut matrix)?;
        debug!(rows = keep.len(), ?derived, "built observation table");

        ObservationTable::new(keep.iter().map(|&i| timestamps[i]).collect(), matrix)
    }
}

/// Serves a previously downloaded archive response from disk.
#[derive(Clone, Debug)]
pub struct ArchiveFileSource {
    path: PathBuf,
}

impl ArchiveFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn read(&self) -> Result<ArchiveResponse> {
        let text = fs::read_to_string(&self.path)
            .map_err(|e| ForecastError::UpstreamData(format!("{}: {e}", self.path.display())))?;
        ArchiveResponse::from_json(&text)
    }
}

impl HistoricalSource for ArchiveFileSource {
    fn fetch(&self, query: &HistoricalQuery) -> Result<ObservationTable> {
        debug!(path = %self.path.display(), lat = query.latitude, lon = query.longitude, "reading archive");
        self.read()?.to_table(Some(query.start_date), Some(query.end_date))
    }
}

/// In-memory archive response.
#[derive(Clone, Debug)]
pub struct StaticSource {
    response: ArchiveResponse,
}

impl StaticSource {
    pub fn new(response: ArchiveResponse) -> Self {
        Self { response }
    }
}

impl HistoricalSource for StaticSource {
    fn fetch(&self, query: &HistoricalQuery) -> Result<ObservationTable> {
        self.response.to_table(Some(query.start_date), Some(query.end_date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "latitude": 28.6,
        "longitude": 77.2,
        "hourly": {
            "time": ["2024-01-01T22:00", "2024-01-01T23:00", "2024-01-02T00:00", "2024-01-02T01:00", "2024-01-02T02:00"],
            "surface_pressure": [1000.0, null, 1002.0, 1003.0, 1004.5],
            "wind_speed_10m": [3.0, 4.0, 5.0, 6.0, 7.0],
            "wind_speed_100m": [5.0, 7.0, 9.0, 11.0, 13.0]
        }
    }"#;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_parse_and_derive() {
        let response = ArchiveResponse::from_json(SAMPLE).unwrap();
        let table = response.to_table(None, None).unwrap();

        assert_eq!(table.len(), 5);
        let matrix = table.matrix();
        assert_eq!(matrix.column("surface_pressure").unwrap()[1], 1000.0);
        assert_eq!(matrix.column("wind_shear").unwrap(), vec![2.0, 3.0, 4.0, 5.0, 6.0]);
        // 1003 - 1000 at t = 3, filled backwards over the first three rows
        assert_eq!(matrix.column("pressure_tendency").unwrap(), vec![3.0, 3.0, 3.0, 3.0, 4.5]);
    }

    #[test]
    fn test_date_filter_is_inclusive() {
        let response = ArchiveResponse::from_json(SAMPLE).unwrap();
        let table = response.to_table(Some(day(2)), Some(day(2))).unwrap();
        assert_eq!(table.len(), 3);
        assert!(response.to_table(Some(day(3)), None).is_err());
    }

    #[test]
    fn test_length_mismatch_is_upstream_error() {
        let text = r#"{"hourly": {"time": ["2024-01-01T00:00"], "surface_pressure": [1.0, 2.0]}}"#;
        let response = ArchiveResponse::from_json(text).unwrap();
        assert!(matches!(response.to_table(None, None), Err(ForecastError::UpstreamData(_))));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(ArchiveResponse::from_json("{"), Err(ForecastError::UpstreamData(_))));
    }

    #[test]
    fn test_static_source() {
        let source = StaticSource::new(ArchiveResponse::from_json(SAMPLE).unwrap());
        let query = HistoricalQuery { latitude: 28.6, longitude: 77.2, start_date: day(1), end_date: day(2) };
        assert_eq!(source.fetch(&query).unwrap().len(), 5);
    }
}
