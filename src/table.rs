//! Named-column matrices and the hourly observation table.
//!
//! Every column access goes through a feature name. Positional indices are
//! only ever derived from a name lookup, never assumed.

use chrono::{Duration, NaiveDateTime};
use ndarray::{Array2, Axis};

use crate::error::{ForecastError, Result};

/// A `rows × columns` matrix whose columns are addressed by feature name.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureMatrix {
    names: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn new(names: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if names.len() != values.ncols() {
            return Err(ForecastError::ShapeMismatch {
                context: "feature matrix columns",
                expected: (values.nrows(), names.len()),
                found: values.dim(),
            });
        }
        if let Some(dup) = names.iter().enumerate().find_map(|(i, n)| names[..i].contains(n).then_some(n)) {
            return Err(ForecastError::InvalidRequest(format!("duplicate column '{dup}'")));
        }
        Ok(Self { names, values })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        self.column_index(name)
            .map(|i| self.values.column(i).to_vec())
    }

    /// Names from `wanted` that this matrix does not carry.
    pub fn missing<'a>(&self, wanted: &'a [String]) -> Vec<&'a str> {
        wanted
            .iter()
            .filter(|name| !self.has_column(name))
            .map(String::as_str)
            .collect()
    }

    /// Columns in the order of `names`, or `MissingFeatures` naming every absent one.
    pub fn select(&self, names: &[String]) -> Result<Array2<f64>> {
        let missing = self.missing(names);
        if !missing.is_empty() {
            return Err(ForecastError::MissingFeatures(
                missing.into_iter().map(String::from).collect(),
            ));
        }

        let indices: Vec<usize> = names
            .iter()
            .filter_map(|name| self.column_index(name))
            .collect();
        Ok(self.values.select(Axis(1), &indices))
    }

    /// Append a column, replacing any existing column of the same name.
    pub fn insert_column(&mut self, name: &str, column: Vec<f64>) -> Result<()> {
        if column.len() != self.nrows() {
            return Err(ForecastError::ShapeMismatch {
                context: "inserted column",
                expected: (self.nrows(), 1),
                found: (column.len(), 1),
            });
        }
        let column = Array2::from_shape_vec((self.nrows(), 1), column)
            .map_err(|e| ForecastError::UpstreamData(e.to_string()))?;

        match self.column_index(name) {
            Some(i) => self.values.column_mut(i).assign(&column.column(0)),
            None => {
                self.values
                    .push_column(column.column(0))
                    .map_err(|e| ForecastError::UpstreamData(e.to_string()))?;
                self.names.push(name.to_string());
            }
        }
        Ok(())
    }

    /// Keep only the last `n` rows.
    pub fn tail(&self, n: usize) -> FeatureMatrix {
        let start = self.nrows().saturating_sub(n);
        FeatureMatrix {
            names: self.names.clone(),
            values: self.values.slice(ndarray::s![start.., ..]).to_owned(),
        }
    }
}

/// Hourly observations: one row per hour, strictly increasing and gap-free.
#[derive(Clone, Debug)]
pub struct ObservationTable {
    timestamps: Vec<NaiveDateTime>,
    matrix: FeatureMatrix,
}

impl ObservationTable {
    pub fn new(timestamps: Vec<NaiveDateTime>, matrix: FeatureMatrix) -> Result<Self> {
        if timestamps.len() != matrix.nrows() {
            return Err(ForecastError::UpstreamData(format!(
                "{} timestamps for {} rows",
                timestamps.len(),
                matrix.nrows()
            )));
        }
        for pair in timestamps.windows(2) {
            if pair[1] - pair[0] != Duration::hours(1) {
                return Err(ForecastError::UpstreamData(format!(
                    "timestamps must be consecutive hours, found {} followed by {}",
                    pair[0], pair[1]
                )));
            }
        }
        if matrix.values().iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::UpstreamData(
                "observation table contains non-finite values".to_string(),
            ));
        }
        Ok(Self { timestamps, matrix })
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn matrix(&self) -> &FeatureMatrix {
        &self.matrix
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::arr2;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn hours(n: usize) -> Vec<NaiveDateTime> {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        (0..n).map(|i| start + Duration::hours(i as i64)).collect()
    }

    #[test]
    fn test_select_reorders_by_name() {
        let m = FeatureMatrix::new(names(&["a", "b", "c"]), arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]])).unwrap();
        let selected = m.select(&names(&["c", "a"])).unwrap();
        assert_eq!(selected, arr2(&[[3.0, 1.0], [6.0, 4.0]]));
    }

    #[test]
    fn test_select_reports_every_missing_name() {
        let m = FeatureMatrix::new(names(&["a"]), arr2(&[[1.0]])).unwrap();
        match m.select(&names(&["a", "x", "y"])) {
            Err(ForecastError::MissingFeatures(missing)) => assert_eq!(missing, names(&["x", "y"])),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_insert_column_appends_and_replaces() {
        let mut m = FeatureMatrix::new(names(&["a"]), arr2(&[[1.0], [2.0]])).unwrap();
        m.insert_column("b", vec![5.0, 6.0]).unwrap();
        m.insert_column("a", vec![0.0, 0.0]).unwrap();
        assert_eq!(m.names(), &names(&["a", "b"])[..]);
        assert_eq!(m.values(), &arr2(&[[0.0, 5.0], [0.0, 6.0]]));
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        assert!(FeatureMatrix::new(names(&["a", "a"]), arr2(&[[1.0, 2.0]])).is_err());
    }

    #[test]
    fn test_table_requires_consecutive_hours() {
        let m = FeatureMatrix::new(names(&["a"]), arr2(&[[1.0], [2.0], [3.0]])).unwrap();
        let mut ts = hours(3);
        assert!(ObservationTable::new(ts.clone(), m.clone()).is_ok());

        ts[2] = ts[2] + Duration::hours(1);
        assert!(matches!(ObservationTable::new(ts, m), Err(ForecastError::UpstreamData(_))));
    }

    #[test]
    fn test_table_rejects_nan() {
        let m = FeatureMatrix::new(names(&["a"]), arr2(&[[1.0], [f64::NAN]])).unwrap();
        assert!(ObservationTable::new(hours(2), m).is_err());
    }

    #[test]
    fn test_tail() {
        let m = FeatureMatrix::new(names(&["a"]), arr2(&[[1.0], [2.0], [3.0]])).unwrap();
        assert_eq!(m.tail(2).values(), &arr2(&[[2.0], [3.0]]));
        assert_eq!(m.tail(10).nrows(), 3);
    }
}
