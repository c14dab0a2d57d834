//! Weighted summaries of particle tables and per-stage run statistics.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use std::fmt;

/// Effective sample size `1 / Σ w²` of normalized weights. Zero for an empty slice.
pub fn effective_sample_size(weights: ArrayView1<f64>) -> f64 {
    let sum_sq = weights.pow2().sum();
    if sum_sq > 0.0 {
        weights.sum().powi(2) / sum_sq
    } else {
        0.0
    }
}

/// Weighted column means of `x` (rows are observations). Weights must sum to one.
pub fn weighted_mean(x: ArrayView2<f64>, weights: ArrayView1<f64>) -> Array1<f64> {
    x.t().dot(&weights)
}

/// Centres `x` on its weighted mean and returns the denominator of the reliability-weights
/// estimator, `1 - Σ w²`, falling back to 1 when that vanishes.
fn centred(x: ArrayView2<f64>, weights: ArrayView1<f64>) -> (Array2<f64>, f64) {
    let mean = weighted_mean(x, weights);
    let centred = &x - &mean.insert_axis(Axis(0));
    let denom = 1.0 - weights.pow2().sum();
    let denom = if denom > f64::EPSILON { denom } else { 1.0 };
    (centred, denom)
}

/**
Weighted covariance of the rows of `x`.

With normalized weights `w` and weighted mean `μ`, this is

  Σᵢ wᵢ (xᵢ − μ)(xᵢ − μ)ᵀ / (1 − Σᵢ wᵢ²)

which reduces to the usual `n − 1` sample covariance for uniform weights. When a single
particle carries all the weight the denominator is replaced by 1.
*/
pub fn weighted_covariance(x: ArrayView2<f64>, weights: ArrayView1<f64>) -> Array2<f64> {
    let (centred, denom) = centred(x, weights);
    let scaled = &centred * &weights.insert_axis(Axis(1));
    centred.t().dot(&scaled) / denom
}

/// Diagonal of [`weighted_covariance`], computed without forming the full matrix.
pub fn weighted_variance(x: ArrayView2<f64>, weights: ArrayView1<f64>) -> Array1<f64> {
    let (centred, denom) = centred(x, weights);
    let mut out = Array1::<f64>::zeros(x.ncols());
    Zip::from(&mut out)
        .and(centred.columns())
        .for_each(|v, col| *v = col.pow2().dot(&weights) / denom);
    out
}

/// Computes basic statistics from a set of values.
pub fn basic_stats(name: &str, data: ArrayView1<f64>) -> Option<BasicStats> {
    let mut sorted: Vec<f64> = data.to_vec();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let std = if sorted.len() > 1 {
        (sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };
    Some(BasicStats {
        name: name.to_string(),
        min: sorted[0],
        median: sorted[sorted.len() / 2],
        max: sorted[sorted.len() - 1],
        mean,
        std,
    })
}

#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct BasicStats {
    pub name: String,
    pub min: f64,
    pub median: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl fmt::Display for BasicStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in [{:.3}, {:.3}], median: {:.3}, mean: {:.3} ± {:.3}",
            self.name, self.min, self.max, self.median, self.mean, self.std
        )
    }
}

/// What an engine reports when a stage is finalized.
#[derive(Clone, Debug, PartialEq)]
pub struct StageSummary {
    /// 1-based stage index.
    pub stage: usize,
    pub threshold: f64,
    /// Cumulative simulator invocations at the end of this stage.
    pub sims: usize,
    /// Simulations spent on this stage alone.
    pub stage_sims: usize,
    /// Accepted particles over simulations spent on this stage.
    pub acceptance_rate: f64,
    pub ess: f64,
    pub n_particles: usize,
    /// Spread of the kept particles' distances, `None` for an empty table.
    pub distances: Option<BasicStats>,
}

impl fmt::Display for StageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stage {}: threshold {:.4}, {} particles (ESS {:.1}), {} sims of {}, accept {:.3}",
            self.stage,
            self.threshold,
            self.n_particles,
            self.ess,
            self.stage_sims,
            self.sims,
            self.acceptance_rate
        )?;
        if let Some(distances) = &self.distances {
            write!(f, " | {distances}")?;
        }
        Ok(())
    }
}
