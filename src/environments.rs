//! Environment interfaces for reinforcement learning

use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

use crate::control::LinearSystem;
use crate::error::{LqrError, Result};
use crate::utils::seeded_rng;

/// Core observation type
pub type Observation = Array1<f32>;

/// Core action type
pub type Action = Array1<f32>;

/// Environment info structure
#[derive(Clone, Debug, Default)]
pub struct EnvInfo {
    pub episode_cost: f32,
    pub episode_length: usize,
    pub truncated: bool,
    pub terminated: bool,
}

/// Outcome of a single environment step
#[derive(Clone, Debug)]
pub struct StepResult {
    pub observation: Observation,
    /// Cost of the state the action was taken in, plus the action cost
    pub cost: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: EnvInfo,
}

impl StepResult {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Base environment trait
pub trait Environment {
    /// Reset environment and return initial observation
    fn reset(&mut self) -> Result<Observation>;

    /// Apply an action and advance one step
    fn step(&mut self, action: &Action) -> Result<StepResult>;

    fn observation_size(&self) -> usize;

    fn action_size(&self) -> usize;

    /// Seed the environment
    fn seed(&mut self, seed: u64);
}

/// Distribution of the state an episode starts from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialState {
    /// Every coordinate drawn from `U(low, high)`
    Uniform { low: f64, high: f64 },
    /// Every coordinate drawn from `N(0, std²)`
    Normal { std: f64 },
    Fixed(Vec<f64>),
}

impl InitialState {
    fn sample(&self, dim: usize, rng: &mut impl Rng) -> Result<Array1<f64>> {
        match self {
            InitialState::Uniform { low, high } => {
                if !(low < high) {
                    return Err(LqrError::InvalidConfig(format!(
                        "uniform initial state needs low < high, got [{low}, {high}]"
                    )));
                }
                let dist = Uniform::new(*low, *high);
                Ok(Array1::from_shape_fn(dim, |_| dist.sample(rng)))
            }
            InitialState::Normal { std } => {
                let dist = Normal::new(0.0, *std).map_err(|err| {
                    LqrError::InvalidConfig(format!("normal initial state: {err}"))
                })?;
                Ok(Array1::from_shape_fn(dim, |_| dist.sample(rng)))
            }
            InitialState::Fixed(values) => {
                if values.len() != dim {
                    return Err(LqrError::DimensionMismatch(format!(
                        "fixed initial state has length {}, system expects {dim}",
                        values.len()
                    )));
                }
                Ok(Array1::from_vec(values.clone()))
            }
        }
    }
}

/// Discrete-time LQR plant as an episodic environment
pub struct LqrEnv {
    system: LinearSystem,
    initial_state: InitialState,
    divergence_bound: Option<f64>,
    max_steps: usize,
    state: Array1<f64>,
    step_count: usize,
    episode_cost: f32,
    finished: bool,
    rng: StdRng,
}

impl LqrEnv {
    pub fn new(
        system: LinearSystem,
        initial_state: InitialState,
        divergence_bound: Option<f64>,
        max_steps: usize,
        seed: u64,
    ) -> Result<Self> {
        if max_steps == 0 {
            return Err(LqrError::InvalidConfig(
                "max_steps must be positive".to_string(),
            ));
        }
        let state = Array1::zeros(system.state_dim());
        Ok(Self {
            system,
            initial_state,
            divergence_bound,
            max_steps,
            state,
            step_count: 0,
            episode_cost: 0.0,
            finished: true,
            rng: seeded_rng(seed),
        })
    }

    pub fn system(&self) -> &LinearSystem {
        &self.system
    }

    pub fn state(&self) -> ArrayView1<f64> {
        self.state.view()
    }

    fn observation(&self) -> Observation {
        self.state.mapv(|x| x as f32)
    }

    fn diverged(&self) -> bool {
        match self.divergence_bound {
            Some(bound) => self.state.iter().any(|x| x.abs() > bound || !x.is_finite()),
            None => false,
        }
    }
}

impl Environment for LqrEnv {
    fn reset(&mut self) -> Result<Observation> {
        self.state = self
            .initial_state
            .sample(self.system.state_dim(), &mut self.rng)?;
        self.step_count = 0;
        self.episode_cost = 0.0;
        self.finished = false;
        Ok(self.observation())
    }

    fn step(&mut self, action: &Action) -> Result<StepResult> {
        if self.finished {
            return Err(LqrError::EpisodeFinished);
        }
        if action.len() != self.system.action_dim() {
            return Err(LqrError::DimensionMismatch(format!(
                "action has length {}, system expects {}",
                action.len(),
                self.system.action_dim()
            )));
        }

        let u = action.mapv(f64::from);
        let cost = self.system.stage_cost(self.state.view(), u.view()) as f32;
        self.state = self.system.step(self.state.view(), u.view());
        self.step_count += 1;
        self.episode_cost += cost;

        let terminated = self.diverged();
        let truncated = !terminated && self.step_count >= self.max_steps;
        self.finished = terminated || truncated;

        Ok(StepResult {
            observation: self.observation(),
            cost,
            terminated,
            truncated,
            info: EnvInfo {
                episode_cost: self.episode_cost,
                episode_length: self.step_count,
                truncated,
                terminated,
            },
        })
    }

    fn observation_size(&self) -> usize {
        self.system.state_dim()
    }

    fn action_size(&self) -> usize {
        self.system.action_dim()
    }

    fn seed(&mut self, seed: u64) {
        self.rng = seeded_rng(seed);
    }
}

/// On-policy rollout storage
///
/// States, actions and log-probabilities are pushed when an action is chosen;
/// the cost and terminal flag follow once the environment has stepped.
#[derive(Clone, Debug, Default)]
pub struct RolloutBuffer {
    pub states: Vec<Observation>,
    pub actions: Vec<Action>,
    pub log_probs: Vec<f32>,
    pub costs: Vec<f32>,
    pub is_terminals: Vec<bool>,
}

impl RolloutBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_decision(&mut self, state: Observation, action: Action, log_prob: f32) {
        self.states.push(state);
        self.actions.push(action);
        self.log_probs.push(log_prob);
    }

    pub fn push_outcome(&mut self, cost: f32, is_terminal: bool) {
        self.costs.push(cost);
        self.is_terminals.push(is_terminal);
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.actions.clear();
        self.log_probs.clear();
        self.costs.clear();
        self.is_terminals.clear();
    }

    /// Number of complete transitions
    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    /// Every decision has a matching outcome
    pub fn validate(&self) -> Result<()> {
        let n = self.states.len();
        if self.actions.len() != n
            || self.log_probs.len() != n
            || self.costs.len() != n
            || self.is_terminals.len() != n
        {
            return Err(LqrError::DimensionMismatch(format!(
                "rollout buffer out of sync: {} states, {} actions, {} log-probs, {} costs, {} terminal flags",
                n,
                self.actions.len(),
                self.log_probs.len(),
                self.costs.len(),
                self.is_terminals.len()
            )));
        }
        Ok(())
    }

    /// States as row-major `[len, state_dim]` data
    pub fn flat_states(&self) -> Vec<f32> {
        self.states.iter().flat_map(|s| s.iter().copied()).collect()
    }

    /// Actions as row-major `[len, action_dim]` data
    pub fn flat_actions(&self) -> Vec<f32> {
        self.actions.iter().flat_map(|a| a.iter().copied()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn scalar_env(initial_state: InitialState, bound: Option<f64>, max_steps: usize) -> LqrEnv {
        LqrEnv::new(
            LinearSystem::scalar(1.0, 1.0, 1.0, 1.0),
            initial_state,
            bound,
            max_steps,
            1,
        )
        .unwrap()
    }

    #[test]
    fn zero_step_episodes_are_rejected() {
        let result = LqrEnv::new(
            LinearSystem::scalar(1.0, 1.0, 1.0, 1.0),
            InitialState::Fixed(vec![1.0]),
            None,
            0,
            1,
        );
        assert!(matches!(result, Err(LqrError::InvalidConfig(_))));
    }

    #[test]
    fn uniform_reset_stays_in_range() {
        let mut env = scalar_env(InitialState::Uniform { low: -5.0, high: 5.0 }, None, 10);
        for _ in 0..100 {
            let obs = env.reset().unwrap();
            assert_eq!(obs.len(), 1);
            assert!(obs[0] >= -5.0 && obs[0] < 5.0);
        }
    }

    #[test]
    fn seeding_reproduces_initial_states() {
        let mut a = scalar_env(InitialState::Normal { std: 10.0 }, None, 10);
        let mut b = scalar_env(InitialState::Normal { std: 10.0 }, None, 10);
        a.seed(7);
        b.seed(7);
        assert_eq!(a.reset().unwrap(), b.reset().unwrap());
    }

    #[test]
    fn step_charges_pre_transition_cost() {
        let mut env = scalar_env(InitialState::Fixed(vec![2.0]), None, 10);
        env.reset().unwrap();
        let result = env.step(&arr1(&[-0.5])).unwrap();

        assert_eq!(result.cost, 4.25);
        assert_eq!(result.observation, arr1(&[1.5f32]));
        assert_eq!(result.info.episode_length, 1);
        assert!(!result.done());
    }

    #[test]
    fn leaving_the_bound_terminates() {
        let mut env = scalar_env(InitialState::Fixed(vec![9.0]), Some(10.0), 100);
        env.reset().unwrap();
        let result = env.step(&arr1(&[2.0])).unwrap();

        assert!(result.terminated);
        assert!(!result.truncated);
        assert!(matches!(
            env.step(&arr1(&[0.0])),
            Err(LqrError::EpisodeFinished)
        ));
    }

    #[test]
    fn episodes_truncate_at_max_steps() {
        let mut env = scalar_env(InitialState::Fixed(vec![0.0]), Some(10.0), 3);
        env.reset().unwrap();
        let outcomes: Vec<_> = (0..3).map(|_| env.step(&arr1(&[0.0])).unwrap()).collect();

        assert!(!outcomes[1].done());
        assert!(outcomes[2].truncated);
        assert_eq!(outcomes[2].info.episode_cost, 0.0);
    }

    #[test]
    fn wrong_action_length_is_rejected() {
        let mut env = scalar_env(InitialState::Fixed(vec![1.0]), None, 3);
        env.reset().unwrap();
        assert!(matches!(
            env.step(&arr1(&[0.0, 1.0])),
            Err(LqrError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn fixed_state_length_is_checked() {
        let mut env = scalar_env(InitialState::Fixed(vec![1.0, 2.0]), None, 3);
        assert!(env.reset().is_err());
    }

    #[test]
    fn buffer_tracks_complete_transitions() {
        let mut buffer = RolloutBuffer::new();
        buffer.push_decision(arr1(&[1.0]), arr1(&[0.5]), -0.3);
        assert_eq!(buffer.len(), 0);
        assert!(buffer.validate().is_err());

        buffer.push_outcome(1.25, false);
        buffer.push_decision(arr1(&[1.5]), arr1(&[-1.0]), -0.1);
        buffer.push_outcome(3.25, true);

        assert_eq!(buffer.len(), 2);
        assert!(buffer.validate().is_ok());
        assert_eq!(buffer.flat_states(), vec![1.0, 1.5]);
        assert_eq!(buffer.flat_actions(), vec![0.5, -1.0]);

        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.states.is_empty());
    }
}
