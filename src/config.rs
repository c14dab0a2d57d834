//! Run configuration for the rejection and population Monte Carlo engines.
//!
//! Every config is a plain serializable struct with builder-style setters. `validate` is called
//! by the engines before the first simulation, so a misconfigured run fails without spending
//! any of its budget.

use serde::{Deserialize, Serialize};

use crate::error::AbcError;
use crate::rejection::AcceptSpec;

/// Default cap on the reference sample used to calibrate a distance.
pub const DEFAULT_REFERENCE_CAP: usize = 10_000;

fn default_reference_cap() -> usize {
    DEFAULT_REFERENCE_CAP
}

fn default_true() -> bool {
    true
}

fn check_alpha(alpha: f64) -> Result<(), AbcError> {
    if alpha > 0.0 && alpha < 1.0 {
        Ok(())
    } else {
        Err(AbcError::invalid("alpha", format!("must lie in (0, 1), got {alpha}")))
    }
}

/// One particle has no spread, so the kernel for the next stage would be degenerate.
fn check_n_accept(n_accept: usize) -> Result<(), AbcError> {
    if n_accept < 2 {
        return Err(AbcError::invalid("n_accept", "must be at least 2"));
    }
    Ok(())
}

fn check_reference_cap(cap: usize) -> Result<(), AbcError> {
    if cap == 0 {
        return Err(AbcError::invalid("reference_cap", "must be at least 1"));
    }
    Ok(())
}

/// Settings for [`crate::rejection::RejectionSampler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionConfig {
    /// Number of draws from the prior, each simulated once.
    pub n_sims: usize,
    #[serde(default)]
    pub accept: AcceptSpec,
    #[serde(default = "default_reference_cap")]
    pub reference_cap: usize,
    /// Suppress the progress bar.
    #[serde(default = "default_true")]
    pub silent: bool,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl RejectionConfig {
    pub fn new(n_sims: usize) -> Self {
        Self {
            n_sims,
            accept: AcceptSpec::All,
            reference_cap: DEFAULT_REFERENCE_CAP,
            silent: true,
            seed: None,
        }
    }

    pub fn accept(mut self, accept: AcceptSpec) -> Self {
        self.accept = accept;
        self
    }

    pub fn reference_cap(mut self, cap: usize) -> Self {
        self.reference_cap = cap;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), AbcError> {
        check_reference_cap(self.reference_cap)?;
        if let AcceptSpec::Threshold(h) = self.accept {
            if h.is_nan() {
                return Err(AbcError::invalid("accept", "threshold must not be NaN"));
            }
        }
        Ok(())
    }
}

/// Settings for [`crate::pmc::Pmc`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PmcConfig {
    /// Accepted particles per stage (`N`).
    pub n_accept: usize,
    /// Fraction of each stage's raw table that is kept. Each stage simulates until
    /// `ceil(n_accept / alpha)` proposals pass the previous thresholds.
    pub alpha: f64,
    /// Total number of simulator invocations for the run.
    pub budget: usize,
    #[serde(default = "default_reference_cap")]
    pub reference_cap: usize,
    /// Recalibrate the distance at every stage instead of only the first.
    #[serde(default = "default_true")]
    pub adaptive: bool,
    /// Use only the diagonal of the particle covariance for the perturbation kernel.
    #[serde(default)]
    pub diagonal: bool,
    /// Keep each stage's reference sample in the output.
    #[serde(default)]
    pub store_reference: bool,
    #[serde(default = "default_true")]
    pub silent: bool,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl PmcConfig {
    pub fn new(n_accept: usize, alpha: f64, budget: usize) -> Self {
        Self {
            n_accept,
            alpha,
            budget,
            reference_cap: DEFAULT_REFERENCE_CAP,
            adaptive: true,
            diagonal: false,
            store_reference: false,
            silent: true,
            seed: None,
        }
    }

    pub fn reference_cap(mut self, cap: usize) -> Self {
        self.reference_cap = cap;
        self
    }

    pub fn adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    pub fn diagonal(mut self, diagonal: bool) -> Self {
        self.diagonal = diagonal;
        self
    }

    pub fn store_reference(mut self, store: bool) -> Self {
        self.store_reference = store;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Size of the raw table each stage fills before thresholding, `ceil(N / alpha)`.
    pub fn raw_size(&self) -> usize {
        (self.n_accept as f64 / self.alpha).ceil() as usize
    }

    pub fn validate(&self) -> Result<(), AbcError> {
        check_n_accept(self.n_accept)?;
        check_alpha(self.alpha)?;
        check_reference_cap(self.reference_cap)
    }
}

/// Settings for [`crate::legacy::LegacyPmc`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyPmcConfig {
    /// Particles simulated and kept per stage (`N`).
    pub n_accept: usize,
    /// The next threshold is the `ceil(N * alpha)`-th smallest distance of the current stage.
    pub alpha: f64,
    pub budget: usize,
    #[serde(default = "default_reference_cap")]
    pub reference_cap: usize,
    /// Accept everything in stage 1 and calibrate the shared distance from it.
    #[serde(default = "default_true")]
    pub initialise_dist: bool,
    /// Acceptance threshold for stage 1 when the distance is supplied pre-calibrated.
    /// `None` accepts every successful simulation.
    #[serde(default)]
    pub first_threshold: Option<f64>,
    #[serde(default)]
    pub diagonal: bool,
    #[serde(default)]
    pub store_reference: bool,
    #[serde(default = "default_true")]
    pub silent: bool,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl LegacyPmcConfig {
    pub fn new(n_accept: usize, alpha: f64, budget: usize) -> Self {
        Self {
            n_accept,
            alpha,
            budget,
            reference_cap: DEFAULT_REFERENCE_CAP,
            initialise_dist: true,
            first_threshold: None,
            diagonal: false,
            store_reference: false,
            silent: true,
            seed: None,
        }
    }

    pub fn reference_cap(mut self, cap: usize) -> Self {
        self.reference_cap = cap;
        self
    }

    pub fn initialise_dist(mut self, initialise: bool) -> Self {
        self.initialise_dist = initialise;
        self
    }

    pub fn first_threshold(mut self, h: f64) -> Self {
        self.first_threshold = Some(h);
        self
    }

    pub fn diagonal(mut self, diagonal: bool) -> Self {
        self.diagonal = diagonal;
        self
    }

    pub fn store_reference(mut self, store: bool) -> Self {
        self.store_reference = store;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Rank of the distance that sets the next threshold, `ceil(N * alpha)`.
    pub fn threshold_rank(&self) -> usize {
        ((self.n_accept as f64 * self.alpha).ceil() as usize).clamp(1, self.n_accept.max(1))
    }

    pub fn validate(&self) -> Result<(), AbcError> {
        check_n_accept(self.n_accept)?;
        check_alpha(self.alpha)?;
        check_reference_cap(self.reference_cap)?;
        if self.initialise_dist && self.first_threshold.is_some() {
            return Err(AbcError::ConflictingOptions(
                "`first_threshold` cannot be combined with `initialise_dist`".to_string(),
            ));
        }
        if let Some(h) = self.first_threshold {
            if h.is_nan() {
                return Err(AbcError::invalid("first_threshold", "must not be NaN"));
            }
        }
        Ok(())
    }
}
