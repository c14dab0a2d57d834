//! # Mini ABC
//!
//! A compact Rust library for **Approximate Bayesian Computation (ABC)**: likelihood-free
//! inference for models you can simulate from but whose likelihood you cannot evaluate.
//!
//! ## Getting Started
//!
//! To use this library, add it to your project:
//! ```bash
//! cargo add mini-abc
//! ```
//!
//! Every engine needs three collaborators:
//! - A prior implementing the [`crate::core::Prior`] trait (see [`distributions`] for
//!   ready-made ones)
//! - A model implementing the [`crate::core::Simulator`] trait, or a closure wrapped in
//!   [`crate::core::FnSimulator`]
//! - A distance family implementing [`distance::DistanceMetric`], fitted to simulated data
//!   before it measures anything
//!
//! The library provides three engines:
//! 1. **Rejection ABC** ([`rejection`]): a fixed number of prior simulations, the closest kept.
//! 2. **ABC-PMC with adaptive distances** ([`pmc`]): population Monte Carlo under a simulation
//!    budget, recalibrating the distance in every stage.
//! 3. **Shared-distance ABC-PMC** ([`legacy`]): the classic scheme with one distance for the
//!    whole run, kept for comparison.
//!
//! ## Example 1: Rejection ABC
//!
//! ```rust
//! use mini_abc::config::RejectionConfig;
//! use mini_abc::core::FnSimulator;
//! use mini_abc::distance::MadEuclidean;
//! use mini_abc::distributions::UniformBox;
//! use mini_abc::rejection::{AcceptSpec, RejectionSampler};
//! use rand::Rng;
//!
//! let prior = UniformBox::new(vec![(0.0, 10.0)]).unwrap();
//! let model = FnSimulator::new(1, |theta: &[f64], rng: &mut dyn rand::RngCore| {
//!     Some(vec![theta[0] + 0.2 * (rng.random::<f64>() - 0.5)])
//! });
//! let config = RejectionConfig::new(1000).accept(AcceptSpec::Count(50)).seed(7);
//!
//! let out = RejectionSampler::new(prior, model, MadEuclidean::new(vec![3.0]), config)
//!     .run()
//!     .unwrap();
//! assert_eq!(out.table.len(), 50);
//! println!("posterior mean: {:?}", out.table.weighted_mean());
//! ```
//!
//! ## Example 2: Adaptive ABC-PMC on a 2D model
//!
//! ```rust
//! use mini_abc::config::PmcConfig;
//! use mini_abc::core::FnSimulator;
//! use mini_abc::distance::MadEuclidean;
//! use mini_abc::distributions::UniformBox;
//! use mini_abc::pmc::Pmc;
//! use rand::Rng;
//!
//! // The second statistic is on a much larger scale than the first; the MAD scaling
//! // recalibrated in every stage keeps both relevant.
//! let prior = UniformBox::new(vec![(0.0, 1.0), (0.0, 1.0)]).unwrap();
//! let model = FnSimulator::new(2, |theta: &[f64], rng: &mut dyn rand::RngCore| {
//!     let noise = rng.random::<f64>() - 0.5;
//!     Some(vec![theta[0] + 0.01 * noise, 100.0 * theta[1] + noise])
//! });
//! let config = PmcConfig::new(100, 0.5, 4000).seed(1);
//!
//! let mut pmc = Pmc::new(prior, model, MadEuclidean::new(vec![0.3, 70.0]), config);
//! let out = pmc.run().unwrap();
//!
//! for summary in out.summaries() {
//!     println!("{summary}");
//! }
//! let stacked = out.stacked().unwrap();
//! assert_eq!(stacked.parameters.nrows(), 100 * out.len());
//! ```
//!
//! ## Features
//! - **Budgeted inference**: a stage the budget cannot finish is discarded, never half-kept
//! - **Progress Indicators** over the simulation budget, or stage summaries via [`log`]
//! - **Full or diagonal** Gaussian perturbation kernels
//! - **Parallel reweighting** of particles on the rayon thread pool
//! - **Serializable configuration** with defaults for every optional setting

pub mod config;
pub mod core;
pub mod distance;
pub mod distributions;
pub mod error;
pub mod kernel;
pub mod legacy;
pub mod observer;
pub mod output;
pub mod particles;
pub mod pmc;
pub mod rejection;
pub mod stats;

pub use error::AbcError;
