/*!
# Core ABC Collaborators.

This module defines the two collaborators every engine in this crate consumes:
- The [`Prior`] trait, which draws parameter vectors and evaluates their density.
- The [`Simulator`] trait, which maps a parameter vector to a summary-statistic vector or
  signals failure.

It also holds the [`Budget`] counter that gates every engine on the total number of simulator
invocations, and small helpers that enforce the dimensionality contracts of both collaborators.

Randomness is always injected: priors and simulators receive the engine's RNG so that a seeded
run is reproducible end to end.
*/

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::AbcError;

/// A prior distribution over parameter vectors.
pub trait Prior {
    /// Number of parameters in every vector this prior produces.
    fn dim(&self) -> usize;

    /// Draws one parameter vector.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64>;

    /// Evaluates the (possibly unnormalized) density at `theta`. Must be `>= 0`.
    fn density(&self, theta: &[f64]) -> f64;
}

/// A stochastic model mapping parameters to summary statistics.
///
/// `simulate` returns `None` when the model fails for the given parameters. Failed runs still
/// count against the simulation budget.
pub trait Simulator {
    /// Length of every statistic vector returned by a successful run.
    fn n_sumstats(&self) -> usize;

    /// Runs the model once.
    fn simulate<R: Rng + ?Sized>(&mut self, theta: &[f64], rng: &mut R) -> Option<Vec<f64>>;
}

/// A [`Simulator`] built from a closure.
///
/// # Examples
///
/// ```rust
/// use mini_abc::core::{FnSimulator, Simulator};
/// use rand::SeedableRng;
///
/// let mut sim = FnSimulator::new(1, |theta: &[f64], _rng: &mut dyn rand::RngCore| {
///     Some(vec![2.0 * theta[0]])
/// });
/// let mut rng = rand::rngs::SmallRng::seed_from_u64(0);
/// assert_eq!(sim.simulate(&[1.5], &mut rng), Some(vec![3.0]));
/// ```
pub struct FnSimulator<F> {
    n_sumstats: usize,
    f: F,
}

impl<F> FnSimulator<F>
where
    F: FnMut(&[f64], &mut dyn rand::RngCore) -> Option<Vec<f64>>,
{
    pub fn new(n_sumstats: usize, f: F) -> Self {
        Self { n_sumstats, f }
    }
}

impl<F> Simulator for FnSimulator<F>
where
    F: FnMut(&[f64], &mut dyn rand::RngCore) -> Option<Vec<f64>>,
{
    fn n_sumstats(&self) -> usize {
        self.n_sumstats
    }

    fn simulate<R: Rng + ?Sized>(&mut self, theta: &[f64], rng: &mut R) -> Option<Vec<f64>> {
        let mut rng = SmallRng::seed_from_u64(rng.random::<u64>());
        (self.f)(theta, &mut rng)
    }
}

/// Counts simulator invocations against a fixed limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    limit: usize,
    used: usize,
}

impl Budget {
    pub fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.used
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }

    /// Takes one unit of budget. Returns `false`, leaving the counter untouched, when none is left.
    pub fn consume(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.used += 1;
        true
    }
}

/// Builds the run RNG from an optional seed.
pub fn rng_from_seed(seed: Option<u64>) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::seed_from_u64(rand::rng().random::<u64>()),
    }
}

/// Draws from the prior and checks the result against `prior.dim()`.
pub(crate) fn draw_prior<P, R>(prior: &P, rng: &mut R) -> Result<Vec<f64>, AbcError>
where
    P: Prior,
    R: Rng + ?Sized,
{
    let theta = prior.sample(rng);
    if theta.len() != prior.dim() {
        return Err(AbcError::ParameterLength {
            expected: prior.dim(),
            found: theta.len(),
        });
    }
    Ok(theta)
}

/// Runs the simulator once and checks a successful result against `n_sumstats()`.
pub(crate) fn run_simulator<S, R>(
    simulator: &mut S,
    theta: &[f64],
    rng: &mut R,
) -> Result<Option<Vec<f64>>, AbcError>
where
    S: Simulator,
    R: Rng + ?Sized,
{
    match simulator.simulate(theta, rng) {
        Some(stats) if stats.len() != simulator.n_sumstats() => Err(AbcError::StatisticLength {
            expected: simulator.n_sumstats(),
            found: stats.len(),
        }),
        outcome => Ok(outcome),
    }
}
