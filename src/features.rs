//! Feature names, derived features and gap filling.
//!
//! The archive provider delivers raw hourly columns. Two model inputs are not
//! delivered directly and are computed here; both derivations only ever add a
//! column that is absent and whose inputs are present.

use crate::error::{ForecastError, Result};
use crate::table::FeatureMatrix;

pub const SURFACE_PRESSURE: &str = "surface_pressure";
pub const PRESSURE_TENDENCY: &str = "pressure_tendency";
pub const WIND_SPEED_10M: &str = "wind_speed_10m";
pub const WIND_SPEED_100M: &str = "wind_speed_100m";
pub const WIND_SHEAR: &str = "wind_shear";

/// Hours between the two pressure readings of `pressure_tendency`.
pub const PRESSURE_TENDENCY_LAG: usize = 3;

/// Columns requested from the archive provider.
pub const ARCHIVE_COLUMNS: [&str; 12] = [
    "temperature_2m",
    "relative_humidity_2m",
    "dew_point_2m",
    "surface_pressure",
    "precipitation",
    "rain",
    "snowfall",
    "cloud_cover",
    "wind_speed_10m",
    "wind_speed_100m",
    "wind_direction_10m",
    "wind_gusts_10m",
];

/// Model feature order used when an artifact does not specify its own.
pub const TARGET_FEATURES: [&str; 12] = [
    "surface_pressure",
    "pressure_tendency",
    "wind_speed_10m",
    "wind_speed_100m",
    "wind_gusts_10m",
    "wind_shear",
    "relative_humidity_2m",
    "dew_point_2m",
    "temperature_2m",
    "precipitation",
    "cloud_cover",
    "wind_direction_10m",
];

pub fn target_feature_names() -> Vec<String> {
    TARGET_FEATURES.iter().map(|s| s.to_string()).collect()
}

/// `x[t] - x[t - lag]`; the first `lag` entries are NaN.
pub fn lagged_difference(values: &[f64], lag: usize) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(t, v)| if t >= lag { v - values[t - lag] } else { f64::NAN })
        .collect()
}

/// Forward-fill then back-fill non-finite entries.
///
/// Returns `None` when the column has no finite value at all.
pub fn fill_gaps(values: &mut [f64]) -> Option<()> {
    let first = values.iter().position(|v| v.is_finite())?;

    let mut last = values[first];
    for v in values.iter_mut().skip(first) {
        if v.is_finite() {
            last = *v;
        } else {
            *v = last;
        }
    }
    let head = values[first];
    values[..first].iter_mut().for_each(|v| *v = head);
    Some(())
}

/// Add `pressure_tendency` and `wind_shear` when missing but derivable.
///
/// Returns the names of the columns that were added.
pub fn derive_features(matrix: &mut FeatureMatrix) -> Result<Vec<&'static str>> {
    let mut added = Vec::new();

    if !matrix.has_column(PRESSURE_TENDENCY) {
        if let Some(pressure) = matrix.column(SURFACE_PRESSURE) {
            let mut tendency = lagged_difference(&pressure, PRESSURE_TENDENCY_LAG);
            if fill_gaps(&mut tendency).is_none() {
                // Fewer rows than the lag: no change is observable.
                tendency.iter_mut().for_each(|v| *v = 0.0);
            }
            matrix.insert_column(PRESSURE_TENDENCY, tendency)?;
            added.push(PRESSURE_TENDENCY);
        }
    }

    if !matrix.has_column(WIND_SHEAR) {
        if let (Some(low), Some(high)) = (matrix.column(WIND_SPEED_10M), matrix.column(WIND_SPEED_100M)) {
            let shear = high.iter().zip(&low).map(|(h, l)| h - l).collect();
            matrix.insert_column(WIND_SHEAR, shear)?;
            added.push(WIND_SHEAR);
        }
    }

    Ok(added)
}

/// Fill gaps in every column, failing on columns that carry no data.
pub fn fill_matrix_gaps(matrix: &mut FeatureMatrix) -> Result<()> {
    let names: Vec<String> = matrix.names().to_vec();
    for name in names {
        let Some(mut column) = matrix.column(&name) else { continue };
        if column.iter().all(|v| v.is_finite()) {
            continue;
        }
        fill_gaps(&mut column).ok_or_else(|| {
            ForecastError::UpstreamData(format!("column '{name}' contains no usable values"))
        })?;
        matrix.insert_column(&name, column)?;
    }
    Ok(())
}
