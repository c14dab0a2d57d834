/*!
# Rejection ABC.

The simplest inference mode: simulate once for each of `n_sims` prior draws, calibrate the
distance on the successful simulations of that same run, and keep the particles closest to the
observed statistics. Every kept particle gets the same weight.

## Example

```rust
use mini_abc::config::RejectionConfig;
use mini_abc::core::FnSimulator;
use mini_abc::distance::Euclidean;
use mini_abc::distributions::UniformBox;
use mini_abc::rejection::{AcceptSpec, RejectionSampler};
use rand::Rng;

let prior = UniformBox::new(vec![(0.0, 10.0)]).unwrap();
let simulator = FnSimulator::new(1, |theta: &[f64], rng: &mut dyn rand::RngCore| {
    Some(vec![theta[0] + 0.1 * (rng.random::<f64>() - 0.5)])
});
let config = RejectionConfig::new(1000).accept(AcceptSpec::Count(50)).seed(1);
let mut sampler = RejectionSampler::new(prior, simulator, Euclidean::new(vec![3.0]), config);
let out = sampler.run().unwrap();

assert_eq!(out.table.len(), 50);
assert_eq!(out.sims, 1000);
let mean = out.table.weighted_mean().unwrap()[0];
assert!((mean - 3.0).abs() < 0.5);
```
*/

use ndarray::ArrayView1;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::RejectionConfig;
use crate::core::{draw_prior, rng_from_seed, run_simulator, Prior, Simulator};
use crate::distance::{check_stat_count, Distance, DistanceMetric};
use crate::error::AbcError;
use crate::observer::{default_observer, Observer};
use crate::particles::{ParticleTable, ReferenceBuffer, ReferenceSample, TableBuilder};

/// Which of the sorted particles a rejection run keeps.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum AcceptSpec {
    /// Every successful simulation.
    #[default]
    All,
    /// The `k` smallest distances.
    Count(usize),
    /// Every particle with distance `<= h`.
    Threshold(f64),
}

/// Result of a rejection run.
#[derive(Debug, Clone)]
pub struct RejectionOutput<M: DistanceMetric> {
    /// Accepted particles, ascending by distance, uniformly weighted.
    pub table: ParticleTable,
    /// The distance calibrated on this run. Uninitialized when no simulation succeeded.
    pub distance: Distance<M>,
    /// Largest accepted distance for `All` and `Count`, the requested `h` for `Threshold`.
    /// `None` when nothing was accepted under `All` or `Count`.
    pub threshold: Option<f64>,
    /// Simulator invocations, failures included.
    pub sims: usize,
    /// Successful simulations before selection.
    pub successes: usize,
    /// Pairs the distance was calibrated on.
    pub reference: ReferenceSample,
}

/// Runs rejection ABC with an explicit RNG and observer.
///
/// Draws `n_sims` parameter vectors from `prior` and simulates each once. At most
/// `reference_cap` successful simulations are used to calibrate `metric`.
#[allow(clippy::too_many_arguments)]
pub fn reject<P, S, M, R>(
    prior: &P,
    simulator: &mut S,
    metric: M,
    n_sims: usize,
    accept: AcceptSpec,
    reference_cap: usize,
    rng: &mut R,
    observer: &mut dyn Observer,
) -> Result<RejectionOutput<M>, AbcError>
where
    P: Prior,
    S: Simulator,
    M: DistanceMetric,
    R: Rng + ?Sized,
{
    check_stat_count(&metric, simulator.n_sumstats())?;
    let (n_params, n_stats) = (prior.dim(), simulator.n_sumstats());
    let mut builder = TableBuilder::new(n_params, n_stats);
    let mut reference = ReferenceBuffer::new(reference_cap, n_params, n_stats);
    observer.on_start(n_sims);

    for i in 0..n_sims {
        let theta = draw_prior(prior, rng)?;
        let outcome = run_simulator(simulator, &theta, rng)?;
        observer.on_simulation(1, i + 1);
        if let Some(stat) = outcome {
            reference.offer(&theta, &stat);
            builder.push(&theta, &stat, prior.density(&theta));
        }
    }

    let successes = builder.len();
    let reference = reference.finish()?;
    let raw = Distance::new(metric);
    if successes == 0 {
        log::debug!("rejection: no successful simulations out of {n_sims}");
        observer.on_finish(0, n_sims);
        return Ok(RejectionOutput {
            table: ParticleTable::empty(n_params, n_stats),
            distance: raw,
            threshold: match accept {
                AcceptSpec::Threshold(h) => Some(h),
                _ => None,
            },
            sims: n_sims,
            successes,
            reference,
        });
    }

    let distance = raw.calibrate(reference.statistics.view(), reference.parameters.view());
    let table = builder.finish()?;
    let distances = distance.evaluate_rows(table.statistics())?;
    let table = table.with_distances(distances).sorted_by_distance();

    let (table, threshold) = select(table, accept);
    let table = table.with_uniform_weights();
    log::debug!(
        "rejection: accepted {} of {successes} successful simulations",
        table.len()
    );
    observer.on_finish(1, n_sims);

    Ok(RejectionOutput {
        table,
        distance,
        threshold,
        sims: n_sims,
        successes,
        reference,
    })
}

/// Applies `accept` to a table already sorted by distance.
fn select(table: ParticleTable, accept: AcceptSpec) -> (ParticleTable, Option<f64>) {
    let keep = match (accept, table.distances()) {
        (AcceptSpec::All, _) | (_, None) => table.len(),
        (AcceptSpec::Count(k), _) => k.min(table.len()),
        (AcceptSpec::Threshold(h), Some(d)) => accepted_prefix(d, h),
    };
    let table = table.truncated(keep);
    let threshold = match accept {
        AcceptSpec::Threshold(h) => Some(h),
        _ => table.max_distance(),
    };
    (table, threshold)
}

/// Number of leading entries of the ascending `distances` that are `<= h`.
fn accepted_prefix(distances: ArrayView1<f64>, h: f64) -> usize {
    distances
        .iter()
        .position(|d| !(*d <= h))
        .unwrap_or(distances.len())
}

/// Rejection ABC driven by a [`RejectionConfig`].
pub struct RejectionSampler<P, S, M> {
    pub prior: P,
    pub simulator: S,
    pub metric: M,
    pub config: RejectionConfig,
}

impl<P, S, M> RejectionSampler<P, S, M>
where
    P: Prior,
    S: Simulator,
    M: DistanceMetric,
{
    pub fn new(prior: P, simulator: S, metric: M, config: RejectionConfig) -> Self {
        Self {
            prior,
            simulator,
            metric,
            config,
        }
    }

    /// Runs with a progress bar unless `config.silent` is set.
    pub fn run(&mut self) -> Result<RejectionOutput<M>, AbcError> {
        let mut observer = default_observer(self.config.silent);
        self.run_with_observer(observer.as_mut())
    }

    pub fn run_with_observer(
        &mut self,
        observer: &mut dyn Observer,
    ) -> Result<RejectionOutput<M>, AbcError> {
        self.config.validate()?;
        let mut rng = rng_from_seed(self.config.seed);
        reject(
            &self.prior,
            &mut self.simulator,
            self.metric.clone(),
            self.config.n_sims,
            self.config.accept,
            self.config.reference_cap,
            &mut rng,
            observer,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FnSimulator;
    use crate::distance::{Euclidean, MadEuclidean};
    use crate::distributions::UniformBox;
    use crate::observer::Silent;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn identity_sim() -> FnSimulator<impl FnMut(&[f64], &mut dyn rand::RngCore) -> Option<Vec<f64>>>
    {
        FnSimulator::new(1, |theta: &[f64], _: &mut dyn rand::RngCore| Some(vec![theta[0]]))
    }

    fn run(accept: AcceptSpec, n_sims: usize) -> RejectionOutput<Euclidean> {
        let prior = UniformBox::new(vec![(0.0, 10.0)]).unwrap();
        let mut sim = identity_sim();
        let mut rng = SmallRng::seed_from_u64(9);
        reject(
            &prior,
            &mut sim,
            Euclidean::new(vec![5.0]),
            n_sims,
            accept,
            10_000,
            &mut rng,
            &mut Silent,
        )
        .unwrap()
    }

    #[test]
    fn accept_all_keeps_every_success_sorted() {
        let out = run(AcceptSpec::All, 200);
        assert_eq!(out.table.len(), 200);
        let d = out.table.distances().unwrap();
        assert!(d.windows(2).into_iter().all(|w| w[0] <= w[1]));
        assert_abs_diff_eq!(out.table.weights().sum(), 1.0, epsilon = 1e-12);
        assert_eq!(out.threshold, out.table.max_distance());
    }

    #[test]
    fn count_keeps_k_smallest() {
        let all = run(AcceptSpec::All, 300);
        let some = run(AcceptSpec::Count(20), 300);
        assert_eq!(some.table.len(), 20);
        assert_abs_diff_eq!(
            some.table.distances().unwrap(),
            all.table.distances().unwrap().slice(ndarray::s![..20])
        );
        assert_eq!(run(AcceptSpec::Count(1000), 300).table.len(), 300);
    }

    #[test]
    fn threshold_selects_exact_prefix() {
        let all = run(AcceptSpec::All, 300);
        let kept = run(AcceptSpec::Threshold(1.0), 300);
        let expected = all
            .table
            .distances()
            .unwrap()
            .iter()
            .filter(|d| **d <= 1.0)
            .count();
        assert_eq!(kept.table.len(), expected);
        assert!(kept.table.distances().unwrap().iter().all(|d| *d <= 1.0));
        assert_eq!(kept.threshold, Some(1.0));
    }

    #[test]
    fn threshold_may_select_nothing() {
        let out = run(AcceptSpec::Threshold(-1.0), 50);
        assert!(out.table.is_empty());
        assert_eq!(out.successes, 50);
    }

    #[test]
    fn prefix_rule() {
        let d = arr1(&[0.1, 0.2, 0.2, 0.5]);
        assert_eq!(accepted_prefix(d.view(), 0.2), 3);
        assert_eq!(accepted_prefix(d.view(), 0.5), 4);
        assert_eq!(accepted_prefix(d.view(), 0.05), 0);
    }

    #[test]
    fn failures_are_counted_but_not_kept() {
        let prior = UniformBox::new(vec![(0.0, 1.0)]).unwrap();
        let mut sim = FnSimulator::new(1, |theta: &[f64], _: &mut dyn rand::RngCore| {
            (theta[0] < 0.5).then(|| vec![theta[0]])
        });
        let mut rng = SmallRng::seed_from_u64(2);
        let out = reject(
            &prior,
            &mut sim,
            MadEuclidean::new(vec![0.0]),
            400,
            AcceptSpec::All,
            50,
            &mut rng,
            &mut Silent,
        )
        .unwrap();
        assert_eq!(out.sims, 400);
        assert_eq!(out.table.len(), out.successes);
        assert!(out.successes < 400);
        assert!(out.table.parameters().iter().all(|t| *t < 0.5));
        assert_eq!(out.reference.len(), 50);
    }

    #[test]
    fn observed_length_mismatch_fails_before_simulating() {
        let calls = std::cell::Cell::new(0usize);
        let sim = FnSimulator::new(1, |t: &[f64], _: &mut dyn rand::RngCore| {
            calls.set(calls.get() + 1);
            Some(t.to_vec())
        });
        let prior = UniformBox::new(vec![(0.0, 1.0)]).unwrap();
        let config = RejectionConfig::new(20);
        let mut sampler =
            RejectionSampler::new(prior, sim, Euclidean::new(vec![5.0, 1.0]), config);
        let result = sampler.run();
        assert!(matches!(
            result,
            Err(AbcError::InvalidConfig { field: "observed", .. })
        ));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn always_failing_simulator_gives_empty_table() {
        let prior = UniformBox::new(vec![(0.0, 1.0)]).unwrap();
        let sim = FnSimulator::new(1, |_: &[f64], _: &mut dyn rand::RngCore| None);
        let config = RejectionConfig::new(100).seed(4);
        let out = RejectionSampler::new(prior, sim, MadEuclidean::new(vec![0.0]), config)
            .run()
            .unwrap();
        assert!(out.table.is_empty());
        assert_eq!(out.sims, 100);
        assert!(!out.distance.is_calibrated());
        assert_eq!(out.threshold, None);
    }
}
