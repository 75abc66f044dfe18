//! # LQR Policy Gradients
//!
//! Policy gradient agents trained on a discrete-time linear-quadratic
//! regulator and measured against the optimal controller, using the Burn
//! deep learning framework.
//!
//! ## Features
//!
//! - **Riccati baseline**: [`control::dlqr`] solves the discrete algebraic Riccati equation
//! - **PPO**: Gaussian actor with a quadratic critic, clipped surrogate for costs
//! - **Energy-based SAC**: quadratic Q function with a Boltzmann policy over sampled actions
//! - **Reports**: trajectories and value/policy curves of agent and LQR as JSON

pub mod algorithms;
pub mod control;
pub mod distributions;
pub mod environments;
pub mod error;
pub mod evaluation;
pub mod networks;
pub mod training;
pub mod utils;

pub use algorithms::*;
pub use control::{dlqr, simulate_discrete, true_loss, LinearSystem, LqrSolution, Trajectory};
pub use environments::*;
pub use error::{LqrError, Result};
pub use evaluation::{compare_with_lqr, ComparisonReport, ComparisonSettings};
pub use training::*;
