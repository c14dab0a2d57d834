/*!
Priors and the perturbation density used by the population Monte Carlo engines.

This module provides:
- [`UniformBox`], a product of independent uniform priors,
- [`IndependentGaussian`], a product of independent normal priors,
- [`MultivariateNormal`], a zero-mean multivariate normal with either a full or a diagonal
  covariance, used as the perturbation kernel.

## Examples

```rust
use mini_abc::core::Prior;
use mini_abc::distributions::UniformBox;
use rand::SeedableRng;

let prior = UniformBox::new(vec![(0.0, 10.0), (-1.0, 1.0)]).unwrap();
let mut rng = rand::rngs::SmallRng::seed_from_u64(7);
let theta = prior.sample(&mut rng);
assert_eq!(theta.len(), 2);
assert!((prior.density(&theta) - 0.05).abs() < 1e-12);
assert_eq!(prior.density(&[11.0, 0.0]), 0.0);
```
*/

use nalgebra::{Cholesky, DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use crate::core::Prior;
use crate::error::AbcError;

/// Independent uniform priors on `[lo, hi]` per coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformBox {
    bounds: Vec<(f64, f64)>,
    density: f64,
}

impl UniformBox {
    /// Creates the prior. Every interval must satisfy `lo < hi`.
    pub fn new(bounds: Vec<(f64, f64)>) -> Result<Self, AbcError> {
        if bounds.is_empty() {
            return Err(AbcError::invalid("bounds", "must name at least one parameter"));
        }
        let bad = bounds
            .iter()
            .find(|(lo, hi)| !(lo < hi) || !lo.is_finite() || !hi.is_finite());
        if let Some((lo, hi)) = bad {
            return Err(AbcError::invalid(
                "bounds",
                format!("[{lo}, {hi}] is not a finite non-empty interval"),
            ));
        }
        let density = bounds.iter().map(|(lo, hi)| 1.0 / (hi - lo)).product();
        Ok(Self { bounds, density })
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }
}

impl Prior for UniformBox {
    fn dim(&self) -> usize {
        self.bounds.len()
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        self.bounds
            .iter()
            .map(|&(lo, hi)| lo + (hi - lo) * rng.random::<f64>())
            .collect()
    }

    fn density(&self, theta: &[f64]) -> f64 {
        let inside = theta.len() == self.bounds.len()
            && theta
                .iter()
                .zip(self.bounds.iter())
                .all(|(x, (lo, hi))| lo <= x && x <= hi);
        if inside {
            self.density
        } else {
            0.0
        }
    }
}

/// Independent normal priors with per-coordinate mean and standard deviation.
#[derive(Debug, Clone, PartialEq)]
pub struct IndependentGaussian {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl IndependentGaussian {
    pub fn new(mean: Vec<f64>, std: Vec<f64>) -> Result<Self, AbcError> {
        if mean.len() != std.len() || mean.is_empty() {
            return Err(AbcError::invalid(
                "std",
                "must be non-empty and match the length of `mean`",
            ));
        }
        if std.iter().any(|s| !(*s > 0.0)) {
            return Err(AbcError::invalid("std", "must be strictly positive"));
        }
        Ok(Self { mean, std })
    }
}

impl Prior for IndependentGaussian {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        self.mean
            .iter()
            .zip(self.std.iter())
            .map(|(m, s)| {
                let z: f64 = rng.sample(StandardNormal);
                m + s * z
            })
            .collect()
    }

    fn density(&self, theta: &[f64]) -> f64 {
        theta
            .iter()
            .zip(self.mean.iter().zip(self.std.iter()))
            .map(|(x, (m, s))| {
                let z = (x - m) / s;
                (-0.5 * z * z).exp() / (s * (2.0 * PI).sqrt())
            })
            .product()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Factor {
    /// Lower-triangular Cholesky factor of a full covariance.
    Full(DMatrix<f64>),
    /// Standard deviations of a diagonal covariance.
    Diagonal(Array1<f64>),
}

/**
A zero-mean multivariate normal distribution.

The covariance is factorised once at construction, after which [`sample`](Self::sample) and
[`density`](Self::density) are cheap. Construction fails with
[`AbcError::SingularCovariance`] when the covariance is not positive definite.

```rust
use mini_abc::distributions::MultivariateNormal;
use ndarray::{arr1, arr2};

let mvn = MultivariateNormal::full(arr2(&[[2.0, 0.5], [0.5, 1.0]])).unwrap();
let at_zero = mvn.density(arr1(&[0.0, 0.0]).view());
let det: f64 = 2.0 * 1.0 - 0.25;
let expected = 1.0 / (2.0 * std::f64::consts::PI * det.sqrt());
assert!((at_zero - expected).abs() < 1e-12);
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct MultivariateNormal {
    factor: Factor,
    log_norm: f64,
}

impl MultivariateNormal {
    /// Builds the distribution from a full, symmetric covariance matrix.
    pub fn full(cov: Array2<f64>) -> Result<Self, AbcError> {
        let dim = cov.nrows();
        if dim == 0 || cov.ncols() != dim || cov.iter().any(|c| !c.is_finite()) {
            return Err(AbcError::SingularCovariance);
        }
        let matrix = DMatrix::from_fn(dim, dim, |i, j| cov[(i, j)]);
        let lower = Cholesky::new(matrix)
            .ok_or(AbcError::SingularCovariance)?
            .l();
        let log_det: f64 = 2.0 * lower.diagonal().iter().map(|l| l.ln()).sum::<f64>();
        Ok(Self {
            factor: Factor::Full(lower),
            log_norm: -0.5 * (dim as f64 * (2.0 * PI).ln() + log_det),
        })
    }

    /// Builds the distribution from the variances of a diagonal covariance.
    pub fn diagonal(var: Array1<f64>) -> Result<Self, AbcError> {
        if var.is_empty() || var.iter().any(|v| !(*v > 0.0) || !v.is_finite()) {
            return Err(AbcError::SingularCovariance);
        }
        let d = var.len() as f64;
        let log_det: f64 = var.iter().map(|v| v.ln()).sum();
        Ok(Self {
            factor: Factor::Diagonal(var.mapv(f64::sqrt)),
            log_norm: -0.5 * (d * (2.0 * PI).ln() + log_det),
        })
    }

    pub fn dim(&self) -> usize {
        match &self.factor {
            Factor::Full(lower) => lower.nrows(),
            Factor::Diagonal(std) => std.len(),
        }
    }

    /// Returns the covariance matrix this distribution was built from.
    pub fn covariance(&self) -> Array2<f64> {
        match &self.factor {
            Factor::Full(lower) => {
                let cov = lower * lower.transpose();
                Array2::from_shape_fn((cov.nrows(), cov.ncols()), |(i, j)| cov[(i, j)])
            }
            Factor::Diagonal(std) => Array2::from_diag(&std.mapv(|s| s * s)),
        }
    }

    /// Draws one vector.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        let z: Vec<f64> = (0..self.dim())
            .map(|_| rng.sample::<f64, _>(StandardNormal))
            .collect();
        match &self.factor {
            Factor::Full(lower) => (lower * DVector::from_vec(z)).iter().copied().collect(),
            Factor::Diagonal(std) => Array1::from_vec(z) * std,
        }
    }

    pub fn log_density(&self, x: ArrayView1<f64>) -> f64 {
        // Mahalanobis norm via the whitened vector L^-1 x.
        let quad = match &self.factor {
            Factor::Full(lower) => {
                let b = DVector::from_iterator(x.len(), x.iter().copied());
                match lower.solve_lower_triangular(&b) {
                    Some(z) => z.norm_squared(),
                    None => return f64::NEG_INFINITY,
                }
            }
            Factor::Diagonal(std) => (&x / std).pow2().sum(),
        };
        self.log_norm - 0.5 * quad
    }

    pub fn density(&self, x: ArrayView1<f64>) -> f64 {
        self.log_density(x).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};
    use ndarray_stats::CorrelationExt;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn uniform_box_rejects_empty_interval() {
        assert!(UniformBox::new(vec![(1.0, 1.0)]).is_err());
        assert!(UniformBox::new(vec![]).is_err());
    }

    #[test]
    fn uniform_box_samples_stay_inside() {
        let prior = UniformBox::new(vec![(0.0, 10.0)]).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..1000 {
            let theta = prior.sample(&mut rng);
            assert!(prior.density(&theta) > 0.0);
        }
        assert_abs_diff_eq!(prior.density(&[5.0]), 0.1);
        assert_eq!(prior.density(&[-0.1]), 0.0);
    }

    #[test]
    fn independent_gaussian_density_matches_closed_form() {
        let prior = IndependentGaussian::new(vec![0.0], vec![1.0]).unwrap();
        assert_abs_diff_eq!(prior.density(&[1.0]), 0.24197072451914337, epsilon = 1e-12);
    }

    #[test]
    fn cholesky_reconstructs_covariance() {
        let cov = arr2(&[[4.0, 2.0], [2.0, 3.0]]);
        let mvn = MultivariateNormal::full(cov.clone()).unwrap();
        assert_abs_diff_eq!(mvn.covariance(), cov, epsilon = 1e-12);
    }

    #[test]
    fn singular_covariance_is_rejected() {
        let cov = arr2(&[[1.0, 1.0], [1.0, 1.0]]);
        assert!(matches!(
            MultivariateNormal::full(cov),
            Err(AbcError::SingularCovariance)
        ));
        assert!(MultivariateNormal::diagonal(arr1(&[1.0, 0.0])).is_err());
    }

    #[test]
    fn diagonal_and_full_agree_on_diagonal_covariance() {
        let full = MultivariateNormal::full(arr2(&[[2.0, 0.0], [0.0, 0.5]])).unwrap();
        let diag = MultivariateNormal::diagonal(arr1(&[2.0, 0.5])).unwrap();
        let x = arr1(&[0.3, -1.2]);
        assert_abs_diff_eq!(
            full.log_density(x.view()),
            diag.log_density(x.view()),
            epsilon = 1e-12
        );
    }

    #[test]
    fn one_dimensional_density_matches_normal_pdf() {
        let mvn = MultivariateNormal::diagonal(arr1(&[4.0])).unwrap();
        // N(1 | 0, sd = 2)
        assert_abs_diff_eq!(
            mvn.density(arr1(&[1.0]).view()),
            0.17603266338214976,
            epsilon = 1e-12
        );
    }

    #[test]
    fn sample_covariance_matches_target() {
        let cov = arr2(&[[4.0, 2.0], [2.0, 3.0]]);
        let mvn = MultivariateNormal::full(cov.clone()).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);
        let n = 20_000;
        let mut draws = Array2::<f64>::zeros((n, 2));
        for mut row in draws.rows_mut() {
            row.assign(&mvn.sample(&mut rng));
        }
        let sample_cov = draws.t().cov(1.0).unwrap();
        assert_abs_diff_eq!(sample_cov, cov, epsilon = 0.2);
    }
}
