/*!
# Perturbation, Resampling and Importance Reweighting.

After the first stage, population Monte Carlo proposes new parameters by picking an ancestor from
the previous stage's weighted particles and moving it with a zero-mean perturbation kernel. This
module builds that kernel ([`PerturbationKernel`]), draws proposals from the resulting mixture
([`Resampler`]) and corrects the accepted particles for having been proposed from it
([`importance_weights`]).

## Mathematical details

For a previous stage with particles `θⱼ` and normalized weights `wⱼ`, the kernel is

  K = N(0, 2 Σ̂)

where `Σ̂` is the weighted covariance of the `θⱼ` (see [`crate::stats::weighted_covariance`]),
or its diagonal. A new particle `xᵢ` accepted with prior density `π(xᵢ)` receives the raw weight

  π(xᵢ) / Σⱼ wⱼ K(xᵢ − θⱼ)

and the raw weights are normalized to sum to one. The sum is evaluated in log space, so distant
particles whose kernel densities underflow do not produce infinite weights.
*/

use ndarray::{Array1, Array2, ArrayView1};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use rayon::prelude::*;

use crate::distributions::MultivariateNormal;
use crate::error::AbcError;
use crate::particles::ParticleTable;
use crate::stats::{weighted_covariance, weighted_variance};

/// The kernel covariance is this multiple of the weighted particle covariance.
pub const KERNEL_SCALE: f64 = 2.0;

/// Zero-mean multivariate normal perturbation built from a finalized table.
#[derive(Debug, Clone, PartialEq)]
pub struct PerturbationKernel {
    mvn: MultivariateNormal,
    diagonal: bool,
}

impl PerturbationKernel {
    /// Builds the kernel from the table's parameters, weighted by its importance weights.
    ///
    /// With `diagonal` set only the per-parameter variances are used. Fails with
    /// [`AbcError::SingularCovariance`] when the particles do not span the parameter space, for
    /// instance when every particle is identical.
    pub fn from_table(table: &ParticleTable, diagonal: bool) -> Result<Self, AbcError> {
        let (params, weights) = (table.parameters(), table.weights());
        let mvn = if diagonal {
            MultivariateNormal::diagonal(weighted_variance(params, weights) * KERNEL_SCALE)?
        } else {
            MultivariateNormal::full(weighted_covariance(params, weights) * KERNEL_SCALE)?
        };
        Ok(Self { mvn, diagonal })
    }

    pub fn is_diagonal(&self) -> bool {
        self.diagonal
    }

    pub fn covariance(&self) -> Array2<f64> {
        self.mvn.covariance()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Array1<f64> {
        self.mvn.sample(rng)
    }

    pub fn density(&self, delta: ArrayView1<f64>) -> f64 {
        self.mvn.density(delta)
    }

    pub fn log_density(&self, delta: ArrayView1<f64>) -> f64 {
        self.mvn.log_density(delta)
    }
}

/// Proposes parameters by weighted resampling from a table followed by perturbation.
pub struct Resampler<'a> {
    table: &'a ParticleTable,
    kernel: &'a PerturbationKernel,
    index: WeightedIndex<f64>,
}

impl<'a> Resampler<'a> {
    pub fn new(table: &'a ParticleTable, kernel: &'a PerturbationKernel) -> Result<Self, AbcError> {
        let index = WeightedIndex::new(table.weights().iter().copied())
            .map_err(|e| AbcError::Weights(e.to_string()))?;
        Ok(Self {
            table,
            kernel,
            index,
        })
    }

    /// Draws an ancestor with probability proportional to its weight and perturbs it.
    pub fn propose<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let ancestor = self.index.sample(rng);
        let moved = &self.table.parameters().row(ancestor) + &self.kernel.sample(rng);
        moved.to_vec()
    }
}

/// Normalized importance weights of `current` given it was proposed by perturbing `previous`.
///
/// Uses the prior densities recorded in `current` as numerators. The O(|current|·|previous|)
/// kernel evaluations run on the rayon thread pool.
pub fn importance_weights(
    current: &ParticleTable,
    previous: &ParticleTable,
    kernel: &PerturbationKernel,
) -> Result<Array1<f64>, AbcError> {
    let prev_params = previous.parameters();
    let log_prev_w: Vec<f64> = previous.weights().iter().map(|w| w.ln()).collect();
    let params = current.parameters();
    let prior = current.prior_density();

    let log_raw: Vec<f64> = (0..current.len())
        .into_par_iter()
        .map(|i| {
            let x = params.row(i);
            let terms: Vec<f64> = prev_params
                .rows()
                .into_iter()
                .zip(log_prev_w.iter())
                .map(|(theta, lw)| lw + kernel.log_density((&x - &theta).view()))
                .collect();
            prior[i].ln() - log_sum_exp(&terms)
        })
        .collect();

    let max = log_raw
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return Err(AbcError::Weights(
            "no particle has a finite importance weight".to_string(),
        ));
    }
    let raw: Array1<f64> = log_raw
        .into_iter()
        .map(|lw| if lw.is_nan() { 0.0 } else { (lw - max).exp() })
        .collect();
    let total = raw.sum();
    Ok(raw / total)
}

fn log_sum_exp(terms: &[f64]) -> f64 {
    let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + terms.iter().map(|t| (t - max).exp()).sum::<f64>().ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::TableBuilder;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn table_of(params: &[[f64; 2]], weights: &[f64]) -> ParticleTable {
        let mut builder = TableBuilder::new(2, 1);
        for p in params {
            builder.push(p, &[0.0], 1.0);
        }
        builder
            .finish()
            .unwrap()
            .with_weights(Array1::from_vec(weights.to_vec()))
            .unwrap()
    }

    #[test]
    fn kernel_covariance_is_twice_weighted_covariance() {
        let t = table_of(&[[0.0, 1.0], [2.0, 0.0], [1.0, 3.0], [4.0, 2.0]], &[0.1, 0.2, 0.3, 0.4]);
        let kernel = PerturbationKernel::from_table(&t, false).unwrap();
        let expected = weighted_covariance(t.parameters(), t.weights()) * 2.0;
        assert_abs_diff_eq!(kernel.covariance(), expected, epsilon = 1e-12);

        let diag = PerturbationKernel::from_table(&t, true).unwrap();
        assert!(diag.is_diagonal());
        assert_abs_diff_eq!(
            diag.covariance(),
            Array2::from_diag(&expected.diag()),
            epsilon = 1e-12
        );
    }

    #[test]
    fn identical_particles_give_singular_kernel() {
        let t = table_of(&[[1.0, 1.0], [1.0, 1.0]], &[0.5, 0.5]);
        assert!(matches!(
            PerturbationKernel::from_table(&t, false),
            Err(AbcError::SingularCovariance)
        ));
    }

    #[test]
    fn resampler_only_picks_weighted_ancestors() {
        let t = table_of(&[[0.0, 0.0], [100.0, 100.0], [1.0, -1.0]], &[1.0, 0.0, 1.0]);
        // Narrow kernel so proposals stay near their ancestor.
        let narrow = table_of(&[[0.0, 0.0], [0.01, 0.0], [0.0, 0.01]], &[1.0, 1.0, 1.0]);
        let kernel = PerturbationKernel::from_table(&narrow, false).unwrap();
        let resampler = Resampler::new(&t, &kernel).unwrap();
        let mut rng = SmallRng::seed_from_u64(5);
        for _ in 0..500 {
            let x = resampler.propose(&mut rng);
            assert!(x[0] < 50.0, "picked zero-weight ancestor: {x:?}");
        }
    }

    #[test]
    fn empty_table_cannot_resample() {
        let t = table_of(&[[0.0, 0.0], [1.0, 1.0], [0.0, 1.0]], &[1.0, 1.0, 1.0]);
        let kernel = PerturbationKernel::from_table(&t, false).unwrap();
        let empty = t.select(&[]);
        assert!(matches!(
            Resampler::new(&empty, &kernel),
            Err(AbcError::Weights(_))
        ));
    }

    #[test]
    fn importance_weights_match_direct_formula() {
        let previous = table_of(&[[0.0, 0.0], [1.0, 0.5], [-0.5, 1.0]], &[0.2, 0.5, 0.3]);
        let kernel = PerturbationKernel::from_table(&previous, false).unwrap();

        let mut builder = TableBuilder::new(2, 1);
        builder.push(&[0.2, 0.1], &[0.0], 0.5);
        builder.push(&[0.8, 0.9], &[0.0], 0.25);
        let current = builder.finish().unwrap();

        let weights = importance_weights(&current, &previous, &kernel).unwrap();

        let raw: Vec<f64> = current
            .parameters()
            .rows()
            .into_iter()
            .zip(current.prior_density().iter())
            .map(|(x, p)| {
                let denom: f64 = previous
                    .parameters()
                    .rows()
                    .into_iter()
                    .zip(previous.weights().iter())
                    .map(|(theta, w)| w * kernel.density((&x - &theta).view()))
                    .sum();
                p / denom
            })
            .collect();
        let total: f64 = raw.iter().sum();
        let expected = arr1(&[raw[0] / total, raw[1] / total]);
        assert_abs_diff_eq!(weights, expected, epsilon = 1e-12);
        assert_abs_diff_eq!(weights.sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn distant_particles_do_not_overflow() {
        let previous = table_of(&[[0.0, 0.0], [0.1, 0.0], [0.0, 0.1]], &[1.0, 1.0, 1.0]);
        let kernel = PerturbationKernel::from_table(&previous, true).unwrap();
        let mut builder = TableBuilder::new(2, 1);
        builder.push(&[0.05, 0.05], &[0.0], 1.0);
        builder.push(&[40.0, 40.0], &[0.0], 1.0);
        let current = builder.finish().unwrap();
        let weights = importance_weights(&current, &previous, &kernel).unwrap();
        assert!(weights.iter().all(|w| w.is_finite() && *w >= 0.0));
        assert_abs_diff_eq!(weights.sum(), 1.0, epsilon = 1e-12);
        // Far from every ancestor: proposal density is tiny, so the weight dominates.
        assert!(weights[1] > weights[0]);
    }
}
