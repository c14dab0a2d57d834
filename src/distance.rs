/*!
# Distance Calibration.

A distance compares a simulated summary-statistic vector against the observed one. Distances
have a two-phase lifecycle, captured by [`Distance`]:

- [`Distance::Uninitialized`] holds only the metric family (for instance the observed
  statistics).
- [`Distance::Calibrated`] additionally holds parameters fitted from a reference sample of
  simulated `(parameter, statistic)` pairs.

Calibration never mutates a distance in place. [`Distance::calibrate`] always returns a new
value, so a calibrated distance stored for one stage stays valid while a later stage fits its
own.

Metric families implement [`DistanceMetric`]. Two are provided:
- [`Euclidean`], which needs no fitted state,
- [`MadEuclidean`], which scales every statistic by its median absolute deviation in the
  reference sample.

```rust
use mini_abc::distance::{Distance, MadEuclidean};
use ndarray::{arr1, arr2};

let raw = Distance::new(MadEuclidean::new(vec![0.0, 0.0]));
let stats = arr2(&[[1.0, 10.0], [2.0, 20.0], [3.0, 30.0]]);
let params = arr2(&[[0.0], [0.0], [0.0]]);
let dist = raw.calibrate(stats.view(), params.view());

// Both statistics are measured in units of their own spread.
let d = dist.evaluate(arr1(&[1.0, 10.0]).view()).unwrap();
assert!((d - 2.0_f64.sqrt()).abs() < 1e-12);
```
*/

use ndarray::{Array1, ArrayView1, ArrayView2, Axis, Zip};
use std::fmt::Debug;

use crate::error::AbcError;

/// A family of distance functions that can be fitted to a reference sample.
pub trait DistanceMetric: Clone + Debug {
    /// Parameters produced by calibration.
    type Fitted: Clone + Debug;

    /// Length of the statistic vectors this metric compares.
    fn n_stats(&self) -> usize;

    /// Fits the metric. `stats` has one row per reference simulation, `params` the matching
    /// parameter rows. Must be a pure function of its inputs.
    fn fit(&self, stats: ArrayView2<f64>, params: ArrayView2<f64>) -> Self::Fitted;

    /// Evaluates the distance of `stat` from the observed statistics.
    fn evaluate(&self, fitted: &Self::Fitted, stat: ArrayView1<f64>) -> f64;
}

/// A distance that is either raw or calibrated.
#[derive(Debug, Clone)]
pub enum Distance<M: DistanceMetric> {
    Uninitialized(M),
    Calibrated { metric: M, fitted: M::Fitted },
}

impl<M: DistanceMetric> Distance<M> {
    pub fn new(metric: M) -> Self {
        Distance::Uninitialized(metric)
    }

    /// Wraps a metric with already known fitted parameters.
    pub fn with_fitted(metric: M, fitted: M::Fitted) -> Self {
        Distance::Calibrated { metric, fitted }
    }

    pub fn metric(&self) -> &M {
        match self {
            Distance::Uninitialized(metric) | Distance::Calibrated { metric, .. } => metric,
        }
    }

    pub fn fitted(&self) -> Option<&M::Fitted> {
        match self {
            Distance::Uninitialized(_) => None,
            Distance::Calibrated { fitted, .. } => Some(fitted),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self, Distance::Calibrated { .. })
    }

    /// Fits a fresh calibrated distance from the reference sample.
    ///
    /// Calibrating an already calibrated distance refits from scratch; only the metric family is
    /// carried over.
    pub fn calibrate(&self, stats: ArrayView2<f64>, params: ArrayView2<f64>) -> Self {
        let metric = self.metric().clone();
        let fitted = metric.fit(stats, params);
        Distance::Calibrated { metric, fitted }
    }

    pub fn evaluate(&self, stat: ArrayView1<f64>) -> Result<f64, AbcError> {
        match self {
            Distance::Uninitialized(_) => Err(AbcError::UncalibratedDistance),
            Distance::Calibrated { metric, fitted } => Ok(metric.evaluate(fitted, stat)),
        }
    }

    /// Evaluates every row of `stats`.
    pub fn evaluate_rows(&self, stats: ArrayView2<f64>) -> Result<Array1<f64>, AbcError> {
        match self {
            Distance::Uninitialized(_) => Err(AbcError::UncalibratedDistance),
            Distance::Calibrated { metric, fitted } => Ok(stats
                .axis_iter(Axis(0))
                .map(|row| metric.evaluate(fitted, row))
                .collect()),
        }
    }
}

/// Fails unless `metric` compares vectors of the simulator's length `n_sumstats`.
pub(crate) fn check_stat_count<M: DistanceMetric>(
    metric: &M,
    n_sumstats: usize,
) -> Result<(), AbcError> {
    if metric.n_stats() != n_sumstats {
        return Err(AbcError::invalid(
            "observed",
            format!(
                "has {} statistics but the simulator produces {n_sumstats}",
                metric.n_stats()
            ),
        ));
    }
    Ok(())
}

/// Plain Euclidean distance to the observed statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Euclidean {
    pub observed: Array1<f64>,
}

impl Euclidean {
    pub fn new(observed: Vec<f64>) -> Self {
        Self {
            observed: Array1::from_vec(observed),
        }
    }

    /// The metric needs no fitting, so it is usable straight away.
    pub fn calibrated(observed: Vec<f64>) -> Distance<Self> {
        Distance::with_fitted(Self::new(observed), ())
    }
}

impl DistanceMetric for Euclidean {
    type Fitted = ();

    fn n_stats(&self) -> usize {
        self.observed.len()
    }

    fn fit(&self, _stats: ArrayView2<f64>, _params: ArrayView2<f64>) {}

    fn evaluate(&self, _fitted: &(), stat: ArrayView1<f64>) -> f64 {
        Zip::from(&stat)
            .and(&self.observed)
            .fold(0.0, |acc, s, o| acc + (s - o) * (s - o))
            .sqrt()
    }
}

/// Euclidean distance after scaling each statistic by its median absolute deviation.
#[derive(Debug, Clone, PartialEq)]
pub struct MadEuclidean {
    pub observed: Array1<f64>,
}

/// Per-statistic scales fitted by [`MadEuclidean`].
#[derive(Debug, Clone, PartialEq)]
pub struct MadScale {
    pub scale: Array1<f64>,
}

impl MadEuclidean {
    pub fn new(observed: Vec<f64>) -> Self {
        Self {
            observed: Array1::from_vec(observed),
        }
    }
}

impl DistanceMetric for MadEuclidean {
    type Fitted = MadScale;

    fn n_stats(&self) -> usize {
        self.observed.len()
    }

    /// Statistics with an undefined or zero MAD (empty reference sample, constant column) get
    /// scale 1.
    fn fit(&self, stats: ArrayView2<f64>, _params: ArrayView2<f64>) -> MadScale {
        let scale = (0..self.observed.len())
            .map(|j| {
                if j >= stats.ncols() {
                    return 1.0;
                }
                match mad(stats.column(j)) {
                    Some(m) if m > 0.0 && m.is_finite() => m,
                    _ => 1.0,
                }
            })
            .collect();
        MadScale { scale }
    }

    fn evaluate(&self, fitted: &MadScale, stat: ArrayView1<f64>) -> f64 {
        Zip::from(&stat)
            .and(&self.observed)
            .and(&fitted.scale)
            .fold(0.0, |acc, s, o, w| {
                let z = (s - o) / w;
                acc + z * z
            })
            .sqrt()
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        Some(values[n / 2])
    } else {
        Some(0.5 * (values[n / 2 - 1] + values[n / 2]))
    }
}

/// Median absolute deviation (unscaled).
fn mad(column: ArrayView1<f64>) -> Option<f64> {
    let values: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
    let centre = median(values.clone())?;
    median(values.into_iter().map(|v| (v - centre).abs()).collect())
}
