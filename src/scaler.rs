//! Per-feature standardization, addressed by feature name.

use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ForecastError, Result};
use crate::table::FeatureMatrix;

/// Zero-mean, unit-variance scaler for one feature.
///
/// `scale` is always strictly positive: constant or degenerate features fit
/// to `scale = 1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub mean: f64,
    pub scale: f64,
    pub var: f64,
    pub n_samples_seen: usize,
}

impl FeatureScaler {
    /// Fit on a sample using the population variance.
    pub fn fit(values: &[f64]) -> Self {
        let finite: Vec<f64> = values.iter().cloned().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return Self::identity();
        }

        let n = finite.len() as f64;
        let mean = finite.iter().sum::<f64>() / n;
        let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Self {
            mean,
            scale: guarded_scale(var.sqrt()),
            var,
            n_samples_seen: finite.len(),
        }
    }

    pub fn identity() -> Self {
        Self { mean: 0.0, scale: 1.0, var: 1.0, n_samples_seen: 1 }
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.mean) / self.scale
    }

    pub fn inverse_transform(&self, normalized: f64) -> f64 {
        normalized * self.scale + self.mean
    }

    pub fn is_valid(&self) -> bool {
        self.mean.is_finite() && self.scale.is_finite() && self.scale > 0.0
    }
}

fn guarded_scale(scale: f64) -> f64 {
    if scale.is_finite() && scale > 0.0 { scale } else { 1.0 }
}

/// What to do when a persisted registry lacks a scaler for a listed feature.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingScalerPolicy {
    /// Refuse to load the artifact.
    #[default]
    Reject,
    /// Substitute `mean = 0, scale = 1` and log a warning.
    Identity,
}

/// Scalers keyed by feature name, plus the ordered feature list that defines
/// the model's feature axis.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalerRegistry {
    feature_order: Vec<String>,
    scalers: BTreeMap<String, FeatureScaler>,
}

impl ScalerRegistry {
    /// Build from persisted parts, resolving gaps with `policy`.
    ///
    /// Returns the names that are listed in `feature_order` without a scaler
    /// when the policy rejects them.
    pub fn from_parts(
        feature_order: Vec<String>,
        mut scalers: BTreeMap<String, FeatureScaler>,
        policy: MissingScalerPolicy,
    ) -> std::result::Result<Self, Vec<String>> {
        let missing: Vec<String> = feature_order
            .iter()
            .filter(|name| !scalers.contains_key(*name))
            .cloned()
            .collect();

        if !missing.is_empty() {
            match policy {
                MissingScalerPolicy::Reject => return Err(missing),
                MissingScalerPolicy::Identity => {
                    for name in missing {
                        warn!(feature = %name, "no persisted scaler, substituting identity");
                        scalers.insert(name, FeatureScaler::identity());
                    }
                }
            }
        }

        for scaler in scalers.values_mut() {
            scaler.scale = guarded_scale(scaler.scale);
        }

        Ok(Self { feature_order, scalers })
    }

    /// Fit one scaler per name on the matching columns of `matrix`.
    pub fn fit(matrix: &FeatureMatrix, names: &[String]) -> Result<Self> {
        let data = matrix.select(names)?;
        let scalers = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), FeatureScaler::fit(&data.column(i).to_vec())))
            .collect();
        Ok(Self { feature_order: names.to_vec(), scalers })
    }

    pub fn identity(names: &[String]) -> Self {
        Self {
            feature_order: names.to_vec(),
            scalers: names.iter().map(|n| (n.clone(), FeatureScaler::identity())).collect(),
        }
    }

    pub fn feature_order(&self) -> &[String] {
        &self.feature_order
    }

    pub fn num_features(&self) -> usize {
        self.feature_order.len()
    }

    pub fn scalers(&self) -> &BTreeMap<String, FeatureScaler> {
        &self.scalers
    }

    pub fn get(&self, name: &str) -> Result<&FeatureScaler> {
        self.scalers
            .get(name)
            .ok_or_else(|| ForecastError::UnknownFeature(name.to_string()))
    }

    /// Select this registry's features from `matrix` by name and normalize them.
    ///
    /// The result's columns follow `feature_order`.
    pub fn normalize(&self, matrix: &FeatureMatrix) -> Result<Array2<f64>> {
        let mut data = matrix.select(&self.feature_order)?;
        for (i, name) in self.feature_order.iter().enumerate() {
            let scaler = self.get(name)?;
            data.column_mut(i).mapv_inplace(|v| scaler.transform(v));
        }
        Ok(data)
    }

    /// Map normalized values whose columns follow `feature_order` back to real units.
    pub fn denormalize(&self, normalized: &Array2<f64>) -> Result<FeatureMatrix> {
        if normalized.ncols() != self.feature_order.len() {
            return Err(ForecastError::ShapeMismatch {
                context: "denormalize",
                expected: (normalized.nrows(), self.feature_order.len()),
                found: normalized.dim(),
            });
        }

        let mut data = normalized.clone();
        for (i, name) in self.feature_order.iter().enumerate() {
            let scaler = self.get(name)?;
            data.column_mut(i).mapv_inplace(|v| scaler.inverse_transform(v));
        }
        FeatureMatrix::new(self.feature_order.clone(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fit_population_statistics() {
        let scaler = FeatureScaler::fit(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((scaler.mean - 5.0).abs() < 1e-12);
        assert!((scaler.scale - 2.0).abs() < 1e-12);
        assert!((scaler.var - 4.0).abs() < 1e-12);
        assert_eq!(scaler.n_samples_seen, 8);
    }

    #[test]
    fn test_constant_feature_gets_unit_scale() {
        let scaler = FeatureScaler::fit(&[3.0; 10]);
        assert_eq!(scaler.scale, 1.0);
        assert_eq!(scaler.transform(3.0), 0.0);
    }

    #[test]
    fn test_round_trip() {
        let scaler = FeatureScaler::fit(&[1013.2, 1009.8, 1020.5, 998.1]);
        for x in [-1.0e6, -3.5, 0.0, 1e-9, 1012.25, 4.2e7] {
            let back = scaler.inverse_transform(scaler.transform(x));
            assert!((back - x).abs() <= 1e-9 * x.abs().max(1.0));
        }
    }

    #[test]
    fn test_lookup_by_name_not_position() {
        // Registry order differs from the matrix column order.
        let matrix = FeatureMatrix::new(names(&["b", "a"]), arr2(&[[10.0, 1.0], [30.0, 3.0]])).unwrap();
        let registry = ScalerRegistry::fit(&matrix, &names(&["a", "b"])).unwrap();

        let normalized = registry.normalize(&matrix).unwrap();
        assert_eq!(normalized, arr2(&[[-1.0, -1.0], [1.0, 1.0]]));

        let restored = registry.denormalize(&normalized).unwrap();
        assert_eq!(restored.names(), &names(&["a", "b"])[..]);
        assert_eq!(restored.values(), &arr2(&[[1.0, 10.0], [3.0, 30.0]]));
    }

    #[test]
    fn test_unknown_feature() {
        let registry = ScalerRegistry::identity(&names(&["a"]));
        assert!(matches!(registry.get("b"), Err(ForecastError::UnknownFeature(name)) if name == "b"));
    }

    #[test]
    fn test_missing_scaler_policy() {
        let mut scalers = BTreeMap::new();
        scalers.insert("a".to_string(), FeatureScaler::fit(&[1.0, 2.0]));

        let rejected = ScalerRegistry::from_parts(names(&["a", "b"]), scalers.clone(), MissingScalerPolicy::Reject);
        assert_eq!(rejected.unwrap_err(), names(&["b"]));

        let filled = ScalerRegistry::from_parts(names(&["a", "b"]), scalers, MissingScalerPolicy::Identity).unwrap();
        assert_eq!(filled.get("b").unwrap(), &FeatureScaler::identity());
    }

    #[test]
    fn test_persisted_zero_scale_is_guarded() {
        let mut scalers = BTreeMap::new();
        scalers.insert("a".to_string(), FeatureScaler { mean: 1.0, scale: 0.0, var: 0.0, n_samples_seen: 3 });
        let registry = ScalerRegistry::from_parts(names(&["a"]), scalers, MissingScalerPolicy::Reject).unwrap();
        assert_eq!(registry.get("a").unwrap().scale, 1.0);
    }
}
