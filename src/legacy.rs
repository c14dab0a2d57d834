/*!
# ABC Population Monte Carlo with a Single Shared Distance.

The classic ABC-PMC scheme kept for comparison with [`crate::pmc::Pmc`]. Each stage fills a
table of exactly `N` particles, ranks them under one distance shared by the whole run and takes
the `ceil(N * alpha)`-th smallest distance as the threshold for the next stage. The full table
is carried forward, not only the particles under the threshold.

The shared distance either comes pre-calibrated, optionally with a first-stage threshold, or is
calibrated once on the stage 1 reference sample when `initialise_dist` is set. Every stage in
the output records the same distance so that distances, thresholds and tables stay aligned.
*/

use ndarray::ArrayView1;
use rand::Rng;

use crate::config::LegacyPmcConfig;
use crate::core::{rng_from_seed, Budget, Prior, Simulator};
use crate::distance::{check_stat_count, Distance, DistanceMetric};
use crate::error::AbcError;
use crate::kernel::PerturbationKernel;
use crate::observer::{default_observer, Observer};
use crate::output::{PmcOutput, Stage};
use crate::pmc::{fill_stage, rank, reweight, summarize, Proposer, RunState};

/// Shared-distance ABC-PMC.
pub struct LegacyPmc<P, S, M: DistanceMetric> {
    pub prior: P,
    pub simulator: S,
    pub distance: Distance<M>,
    pub config: LegacyPmcConfig,
}

impl<P, S, M> LegacyPmc<P, S, M>
where
    P: Prior,
    S: Simulator,
    M: DistanceMetric,
{
    /// `distance` may be uninitialized only when `config.initialise_dist` is set.
    pub fn new(prior: P, simulator: S, distance: Distance<M>, config: LegacyPmcConfig) -> Self {
        Self {
            prior,
            simulator,
            distance,
            config,
        }
    }

    pub fn run(&mut self) -> Result<PmcOutput<M>, AbcError> {
        let mut observer = default_observer(self.config.silent);
        self.run_with_observer(observer.as_mut())
    }

    pub fn run_with_observer(
        &mut self,
        observer: &mut dyn Observer,
    ) -> Result<PmcOutput<M>, AbcError> {
        self.config.validate()?;
        if !self.config.initialise_dist && !self.distance.is_calibrated() {
            return Err(AbcError::invalid(
                "distance",
                "a fixed distance must be calibrated unless `initialise_dist` is set",
            ));
        }
        check_stat_count(self.distance.metric(), self.simulator.n_sumstats())?;

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

        let initialising = stage == 1 && config.initialise_dist;
        let reference_cap =
            (initialising || config.store_reference).then_some(config.reference_cap);
        let gate = match previous {
            Some(prev) => Some(prev.threshold),
            None if initialising => None,
            None => config.first_threshold,
        };
        let shared = &self.distance;
        let accept = |stat: ArrayView1<f64>| -> Result<bool, AbcError> {
            match gate {
                Some(threshold) => Ok(shared.evaluate(stat)? <= threshold),
                None => Ok(true),
            }
        };

        let Some(fill) = fill_stage(
            stage,
            &self.prior,
            &mut self.simulator,
            &proposer,
            config.n_accept,
            reference_cap,
            accept,
            state,
        )?
        else {
            return Ok(None);
        };

        if initialising {
            let reference = fill.reference.as_ref().ok_or(AbcError::UncalibratedDistance)?;
            self.distance = self
                .distance
                .calibrate(reference.statistics.view(), reference.parameters.view());
            log::debug!("shared distance calibrated on {} simulations", reference.len());
        }
        let distance = self.distance.clone();

        let ranked = rank(fill.table, &distance)?;
        let k = config.threshold_rank().min(ranked.len());
        let threshold = ranked
            .distances()
            .and_then(|d| d.get(k - 1).copied())
            .unwrap_or(f64::INFINITY);
        let raw_len = ranked.len();
        let table = reweight(ranked, previous.map(|p| &p.table).zip(kernel.as_ref()))?;

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FnSimulator;
    use crate::distance::{Euclidean, MadEuclidean};
    use crate::distributions::UniformBox;
    use crate::observer::Silent;
    use approx::assert_abs_diff_eq;

    use rand::Rng;

    fn noisy(theta: &[f64], rng: &mut dyn rand::RngCore) -> Option<Vec<f64>> {
        Some(vec![theta[0] + 0.1 * (rng.random::<f64>() - 0.5)])
    }

    fn simulator() -> impl Simulator {
        FnSimulator::new(1, noisy)
    }

    fn prior() -> UniformBox {
        UniformBox::new(vec![(0.0, 10.0)]).unwrap()
    }

    #[test]
    fn carries_full_table_and_uses_rank_threshold() {
        let config = LegacyPmcConfig::new(20, 0.5, 2000).seed(4);
        let mut engine = LegacyPmc::new(
            prior(),
            simulator(),
            Distance::new(MadEuclidean::new(vec![6.0])),
            config,
        );
        let out = engine.run_with_observer(&mut Silent).unwrap();
        assert!(out.len() >= 2);
        for stage in out.stages() {
            assert_eq!(stage.table.len(), 20);
            let d = stage.table.distances().unwrap();
            assert_abs_diff_eq!(stage.threshold, d[9]);
            assert_abs_diff_eq!(stage.table.weights().sum(), 1.0, epsilon = 1e-9);
        }
        // Stage 2 onwards only accepts what passed the previous stage's threshold.
        for pair in out.stages().windows(2) {
            let bound = pair[0].threshold;
            let d = pair[1].table.distances().unwrap();
            assert!(d.iter().all(|x| *x <= bound));
        }
    }

    #[test]
    fn records_shared_distance_for_every_stage() {
        let config = LegacyPmcConfig::new(20, 0.5, 1500).seed(9);
        let mut engine = LegacyPmc::new(
            prior(),
            simulator(),
            Distance::new(MadEuclidean::new(vec![2.0])),
            config,
        );
        let out = engine.run().unwrap();
        assert!(out.len() >= 2);
        let fitted = engine.distance.fitted().unwrap().clone();
        assert_eq!(out.distances().len(), out.len());
        assert_eq!(out.thresholds().len(), out.len());
        for d in out.distances() {
            assert_eq!(d.fitted().unwrap(), &fitted);
        }
    }

    #[test]
    fn first_threshold_gates_stage_one() {
        let config = LegacyPmcConfig::new(10, 0.5, 1000)
            .initialise_dist(false)
            .first_threshold(1.0)
            .seed(1);
        let mut engine = LegacyPmc::new(
            prior(),
            simulator(),
            Euclidean::calibrated(vec![5.0]),
            config,
        );
        let out = engine.run().unwrap();
        let first = &out.stages()[0];
        assert!(first.table.distances().unwrap().iter().all(|d| *d <= 1.0));
        // Roughly a fifth of prior draws land within 1 of the observation.
        assert!(first.sims > 10);
    }

    #[test]
    fn conflicting_options_fail_before_simulating() {
        let calls = std::cell::Cell::new(0usize);
        let sim = FnSimulator::new(1, |t: &[f64], _: &mut dyn rand::RngCore| {
            calls.set(calls.get() + 1);
            Some(t.to_vec())
        });
        let config = LegacyPmcConfig::new(10, 0.5, 100).first_threshold(1.0);
        let mut engine = LegacyPmc::new(
            prior(),
            sim,
            Distance::new(Euclidean::new(vec![5.0])),
            config,
        );
        assert!(matches!(
            engine.run(),
            Err(AbcError::ConflictingOptions(_))
        ));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn fixed_distance_must_be_calibrated() {
        let config = LegacyPmcConfig::new(10, 0.5, 100).initialise_dist(false);
        let mut engine = LegacyPmc::new(
            prior(),
            simulator(),
            Distance::new(Euclidean::new(vec![5.0])),
            config,
        );
        assert!(matches!(
            engine.run(),
            Err(AbcError::InvalidConfig { field: "distance", .. })
        ));
    }

    #[test]
    fn collapsed_stage_ends_run_with_completed_stages() {
        struct PointMass;

        impl Prior for PointMass {
            fn dim(&self) -> usize {
                1
            }

            fn sample<R: Rng + ?Sized>(&self, _rng: &mut R) -> Vec<f64> {
                vec![4.0]
            }

            fn density(&self, _theta: &[f64]) -> f64 {
                1.0
            }
        }

        let mut engine = LegacyPmc::new(
            PointMass,
            simulator(),
            Distance::new(MadEuclidean::new(vec![4.0])),
            LegacyPmcConfig::new(10, 0.5, 500).seed(2),
        );
        let out = engine.run().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.total_sims(), 10);
    }

    #[test]
    fn observed_length_mismatch_fails_before_simulating() {
        let calls = std::cell::Cell::new(0usize);
        let sim = FnSimulator::new(1, |t: &[f64], _: &mut dyn rand::RngCore| {
            calls.set(calls.get() + 1);
            Some(t.to_vec())
        });
        let mut engine = LegacyPmc::new(
            prior(),
            sim,
            Distance::new(Euclidean::new(vec![5.0, 1.0])),
            LegacyPmcConfig::new(10, 0.5, 100),
        );
        assert!(matches!(
            engine.run(),
            Err(AbcError::InvalidConfig { field: "observed", .. })
        ));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn exhausting_budget_mid_stage_rolls_back() {
        // Stage 1 takes exactly 20 simulations, stage 2 cannot fill within the remaining 5.
        let config = LegacyPmcConfig::new(20, 0.5, 25).seed(3);
        let mut engine = LegacyPmc::new(
            prior(),
            simulator(),
            Distance::new(MadEuclidean::new(vec![5.0])),
            config,
        );
        let out = engine.run().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.stages()[0].sims, 20);
        assert_eq!(out.total_sims(), 25);
    }
}
