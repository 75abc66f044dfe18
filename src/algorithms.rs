//! Policy gradient algorithms implementation

pub mod ppo;
pub mod sac;

pub use ppo::*;
pub use sac::*;

use rand::Rng;
use std::path::Path;

use crate::environments::{Action, Observation, RolloutBuffer};
use crate::error::Result;
use crate::training::TrainingMetrics;

/// On-policy agent driven by [`crate::training::Trainer`]
pub trait Agent {
    fn name(&self) -> &'static str;

    /// Sample an action from the rollout policy and record the decision in `memory`
    fn select_action(
        &self,
        state: &Observation,
        memory: &mut RolloutBuffer,
        rng: &mut impl Rng,
    ) -> Result<Action>;

    /// Learn from the collected rollout; the caller clears the buffer afterwards
    fn update(&mut self, memory: &RolloutBuffer) -> Result<TrainingMetrics>;

    /// Deterministic action used for evaluation
    fn greedy_action(&self, state: &Observation) -> Result<Action>;

    /// Estimated cost-to-go of each state
    fn state_values(&self, states: &[Observation]) -> Result<Vec<f32>>;

    /// Write network weights into `dir`
    fn save(&self, dir: &Path) -> Result<()>;
}
