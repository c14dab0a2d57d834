/*!
# Population Monte Carlo ABC with Adaptive Distances.

[`Pmc`] runs a sequence of stages under a global simulation budget. Each stage

1. builds a perturbation kernel from the previous stage's particles (skipped in stage 1),
2. fills a raw table of `ceil(N / alpha)` particles: proposals come from the prior in stage 1
   and from the perturbed previous stage afterwards, proposals with zero prior density are
   dropped without simulating, failed simulations are dropped after consuming budget, and a
   successful simulation is kept only if it passes the earlier stages' acceptance tests,
3. calibrates a fresh distance on the stage's reference sample (stage 1 always, later stages
   only in adaptive mode),
4. keeps the `N` particles closest under that distance and takes the `N`-th distance as the
   stage's threshold,
5. importance-weights the kept particles against the previous stage.

If the budget runs out while a stage is filling, that stage is discarded and the run ends. The
output therefore only ever contains complete stages. A run also ends, keeping its stages, when
the last stage's particles have no spread left to build a kernel from.

In adaptive mode a proposal must pass every earlier stage's test, each under the distance that
stage was calibrated with, newest first. In non-adaptive mode the distance from stage 1 is
reused and only the most recent threshold is checked.

## Example

```rust
use mini_abc::config::PmcConfig;
use mini_abc::core::FnSimulator;
use mini_abc::distance::MadEuclidean;
use mini_abc::distributions::UniformBox;
use mini_abc::pmc::Pmc;
use rand::Rng;

let prior = UniformBox::new(vec![(0.0, 10.0)]).unwrap();
let simulator = FnSimulator::new(1, |theta: &[f64], rng: &mut dyn rand::RngCore| {
    Some(vec![theta[0] + 0.1 * (rng.random::<f64>() - 0.5)])
});
let config = PmcConfig::new(50, 0.5, 2000).seed(42);
let mut pmc = Pmc::new(prior, simulator, MadEuclidean::new(vec![4.0]), config);
let out = pmc.run().unwrap();

assert!(out.len() >= 2);
assert!(out.total_sims() <= 2000);
let mean = out.posterior_mean().unwrap()[0];
assert!((mean - 4.0).abs() < 0.5);
```
*/

use ndarray::ArrayView1;
use rand::Rng;

use crate::config::PmcConfig;
use crate::core::{draw_prior, rng_from_seed, run_simulator, Budget, Prior, Simulator};
use crate::distance::{check_stat_count, Distance, DistanceMetric};
use crate::error::AbcError;
use crate::kernel::{importance_weights, PerturbationKernel, Resampler};
use crate::observer::{default_observer, Observer};
use crate::output::{PmcOutput, Stage};
use crate::particles::{ParticleTable, ReferenceBuffer, ReferenceSample, TableBuilder};
use crate::stats::{basic_stats, StageSummary};

/// Where a stage's proposals come from.
pub(crate) enum Proposer<'a> {
    Prior,
    Mixture(Resampler<'a>),
}

impl<'a> Proposer<'a> {
    /// Prior in stage 1, the perturbed previous stage afterwards.
    pub(crate) fn for_previous(
        previous: Option<&'a ParticleTable>,
        kernel: Option<&'a PerturbationKernel>,
    ) -> Result<Self, AbcError> {
        match (previous, kernel) {
            (Some(table), Some(kernel)) => Ok(Proposer::Mixture(Resampler::new(table, kernel)?)),
            _ => Ok(Proposer::Prior),
        }
    }
}

/// A filled raw table.
pub(crate) struct Fill {
    pub(crate) table: ParticleTable,
    pub(crate) reference: Option<ReferenceSample>,
    /// Simulations consumed while filling.
    pub(crate) sims: usize,
}

/// Budget, randomness and observer shared by all stages of a run.
pub(crate) struct RunState<'a, R: ?Sized> {
    pub(crate) budget: Budget,
    pub(crate) rng: &'a mut R,
    pub(crate) observer: &'a mut dyn Observer,
}

/// Proposes, simulates and tests until `target` particles are accepted.
///
/// Returns `None` when the budget runs out first; nothing of the partial stage is kept.
/// `reference_cap` enables collection of a reference sample from every successful simulation,
/// accepted or not.
#[allow(clippy::too_many_arguments)]
pub(crate) fn fill_stage<P, S, R, A>(
    stage: usize,
    prior: &P,
    simulator: &mut S,
    proposer: &Proposer<'_>,
    target: usize,
    reference_cap: Option<usize>,
    mut accept: A,
    state: &mut RunState<'_, R>,
) -> Result<Option<Fill>, AbcError>
where
    P: Prior,
    S: Simulator,
    R: Rng + ?Sized,
    A: FnMut(ArrayView1<f64>) -> Result<bool, AbcError>,
{
    let (n_params, n_stats) = (prior.dim(), simulator.n_sumstats());
    let mut builder = TableBuilder::new(n_params, n_stats);
    let mut reference = reference_cap.map(|cap| ReferenceBuffer::new(cap, n_params, n_stats));
    let start = state.budget.used();

    while builder.len() < target {
        if state.budget.is_exhausted() {
            log::debug!(
                "stage {stage}: budget exhausted with {}/{target} particles, rolling back",
                builder.len()
            );
            state.observer.on_rollback(stage, builder.len(), target);
            return Ok(None);
        }
        let theta = match proposer {
            Proposer::Prior => draw_prior(prior, &mut *state.rng)?,
            Proposer::Mixture(resampler) => resampler.propose(&mut *state.rng),
        };
        let density = prior.density(&theta);
        if density == 0.0 {
            continue;
        }
        state.budget.consume();
        let outcome = run_simulator(simulator, &theta, &mut *state.rng)?;
        state.observer.on_simulation(stage, state.budget.used());
        let Some(stat) = outcome else {
            continue;
        };
        if let Some(reference) = reference.as_mut() {
            reference.offer(&theta, &stat);
        }
        if accept(ArrayView1::from(&stat[..]))? {
            builder.push(&theta, &stat, density);
        }
    }

    Ok(Some(Fill {
        table: builder.finish()?,
        reference: reference.map(ReferenceBuffer::finish).transpose()?,
        sims: state.budget.used() - start,
    }))
}

/// Ranks `table` under `distance`, ascending.
pub(crate) fn rank<M: DistanceMetric>(
    table: ParticleTable,
    distance: &Distance<M>,
) -> Result<ParticleTable, AbcError> {
    let distances = distance.evaluate_rows(table.statistics())?;
    Ok(table.with_distances(distances).sorted_by_distance())
}

/// Uniform weights in stage 1, importance weights against `previous` afterwards.
pub(crate) fn reweight(
    table: ParticleTable,
    previous: Option<(&ParticleTable, &PerturbationKernel)>,
) -> Result<ParticleTable, AbcError> {
    match previous {
        None => Ok(table.with_uniform_weights()),
        Some((prev, kernel)) => {
            let weights = importance_weights(&table, prev, kernel)?;
            table.with_weights(weights)
        }
    }
}

pub(crate) fn summarize(
    stage: usize,
    table: &ParticleTable,
    threshold: f64,
    raw_len: usize,
    stage_sims: usize,
    sims: usize,
) -> StageSummary {
    StageSummary {
        stage,
        threshold,
        sims,
        stage_sims,
        acceptance_rate: if stage_sims > 0 {
            raw_len as f64 / stage_sims as f64
        } else {
            0.0
        },
        ess: table.effective_sample_size(),
        n_particles: table.len(),
        distances: table.distances().and_then(|d| basic_stats("distance", d)),
    }
}

/// Adaptive (or non-adaptive) ABC population Monte Carlo.
pub struct Pmc<P, S, M> {
    pub prior: P,
    pub simulator: S,
    pub metric: M,
    pub config: PmcConfig,
}

impl<P, S, M> Pmc<P, S, M>
where
    P: Prior,
    S: Simulator,
    M: DistanceMetric,
{
    pub fn new(prior: P, simulator: S, metric: M, config: PmcConfig) -> Self {
        Self {
            prior,
            simulator,
            metric,
            config,
        }
    }

    /// Runs until the budget is spent, reporting progress unless `config.silent` is set.
    pub fn run(&mut self) -> Result<PmcOutput<M>, AbcError> {
        let mut observer = default_observer(self.config.silent);
        self.run_with_observer(observer.as_mut())
    }

    pub fn run_with_observer(
        &mut self,
        observer: &mut dyn Observer,
    ) -> Result<PmcOutput<M>, AbcError> {
        self.config.validate()?;
        check_stat_count(&self.metric, self.simulator.n_sumstats())?;
        let mut rng = rng_from_seed(self.config.seed);
        let mut state = RunState {
            budget: Budget::new(self.config.budget),
            rng: &mut rng,
            observer,
        };
        let mut output = PmcOutput::new(self.prior.dim(), self.simulator.n_sumstats());
        state.observer.on_start(self.config.budget);

        while let Some(stage) = self.next_stage(&output, &mut state)? {
            output.push(stage);
            if state.budget.is_exhausted() {
                break;
            }
        }

        output.set_total_sims(state.budget.used());
        state.observer.on_finish(output.len(), state.budget.used());
        Ok(output)
    }

    fn next_stage<R: Rng + ?Sized>(
        &mut self,
        output: &PmcOutput<M>,
        state: &mut RunState<'_, R>,
    ) -> Result<Option<Stage<M>>, AbcError> {
        let config = &self.config;
        let stage = output.len() + 1;
        let previous = output.final_stage();
        let kernel = match previous
            .map(|prev| PerturbationKernel::from_table(&prev.table, config.diagonal))
            .transpose()
        {
            Ok(kernel) => kernel,
            Err(AbcError::SingularCovariance) => {
                log::warn!(
                    "stage {stage}: particles of stage {} have no spread, stopping",
                    output.len()
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let proposer = Proposer::for_previous(previous.map(|p| &p.table), kernel.as_ref())?;

        let recalibrate = stage == 1 || config.adaptive;
        let reference_cap = (recalibrate || config.store_reference).then_some(config.reference_cap);
        let tests: Vec<(&Distance<M>, f64)> = if config.adaptive {
            output
                .stages()
                .iter()
                .rev()
                .map(|s| (&s.distance, s.threshold))
                .collect()
        } else {
            previous.map(|s| (&s.distance, s.threshold)).into_iter().collect()
        };
        let accept = |stat: ArrayView1<f64>| -> Result<bool, AbcError> {
            for (distance, threshold) in &tests {
                if !(distance.evaluate(stat)? <= *threshold) {
                    return Ok(false);
                }
            }
            Ok(true)
        };

        let target = config.raw_size();
        let Some(fill) = fill_stage(
            stage,
            &self.prior,
            &mut self.simulator,
            &proposer,
            target,
            reference_cap,
            accept,
            state,
        )?
        else {
            return Ok(None);
        };

        let distance = match (recalibrate, previous) {
            (false, Some(prev)) => prev.distance.clone(),
            _ => {
                let reference = fill.reference.as_ref().ok_or(AbcError::UncalibratedDistance)?;
                Distance::new(self.metric.clone())
                    .calibrate(reference.statistics.view(), reference.parameters.view())
            }
        };

        let ranked = rank(fill.table, &distance)?;
        let raw_len = ranked.len();
        let n = config.n_accept.min(raw_len);
        let threshold = ranked
            .distances()
            .and_then(|d| d.get(n - 1).copied())
            .unwrap_or(f64::INFINITY);
        let table = reweight(
            ranked.truncated(n),
            previous.map(|p| &p.table).zip(kernel.as_ref()),
        )?;

        let sims = state.budget.used();
        let summary = summarize(stage, &table, threshold, raw_len, fill.sims, sims);
        log::debug!("{summary}");
        state.observer.on_stage_complete(&summary);

        Ok(Some(Stage {
            table,
            distance,
            threshold,
            sims,
            reference: if config.store_reference {
                fill.reference
            } else {
                None
            },
            summary,
        }))
    }
}
