//! Training utilities and configuration for policy gradient algorithms

use ndarray::Array2;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::algorithms::Agent;
use crate::control::LinearSystem;
use crate::environments::{Environment, InitialState, LqrEnv, RolloutBuffer};
use crate::error::{LqrError, Result};
use crate::evaluation::ComparisonSettings;
use crate::utils::{format_duration, seeded_rng, Timer};

fn check_positive(name: &str, value: f32) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(LqrError::InvalidConfig(format!(
            "{name} must be positive, got {value}"
        )))
    }
}

fn check_betas(betas: (f32, f32)) -> Result<()> {
    let valid = |b: f32| (0.0..1.0).contains(&b);
    if valid(betas.0) && valid(betas.1) {
        Ok(())
    } else {
        Err(LqrError::InvalidConfig(format!(
            "Adam betas must lie in [0, 1), got {betas:?}"
        )))
    }
}

fn check_gamma(gamma: f32) -> Result<()> {
    if (0.0..=1.0).contains(&gamma) {
        Ok(())
    } else {
        Err(LqrError::InvalidConfig(format!(
            "discount factor must lie in [0, 1], got {gamma}"
        )))
    }
}

/// PPO hyperparameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpoConfig {
    pub hidden_size: usize,
    /// Constant standard deviation of the Gaussian policy
    pub action_std: f32,
    pub actor_lr: f64,
    pub critic_lr: f64,
    pub betas: (f32, f32),
    /// Output scale of the critic, `V(s) = α·critic(s)`
    pub alpha: f32,
    pub gamma: f32,
    pub k_epochs: usize,
    pub eps_clip: f32,
    /// Start actor and critic at exactly zero output
    pub mirrored_init: bool,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            hidden_size: 64,
            action_std: 0.1,
            actor_lr: 1e-3,
            critic_lr: 1e-3,
            betas: (0.9, 0.999),
            alpha: 100.0,
            gamma: 0.99,
            k_epochs: 10,
            eps_clip: 0.2,
            mirrored_init: true,
        }
    }
}

impl PpoConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hidden_size == 0 {
            return Err(LqrError::InvalidConfig("hidden_size must be positive".to_string()));
        }
        check_positive("action_std", self.action_std)?;
        check_positive("actor_lr", self.actor_lr as f32)?;
        check_positive("critic_lr", self.critic_lr as f32)?;
        check_positive("alpha", self.alpha)?;
        check_betas(self.betas)?;
        check_gamma(self.gamma)?;
        if !(0.0..1.0).contains(&self.eps_clip) {
            return Err(LqrError::InvalidConfig(format!(
                "eps_clip must lie in [0, 1), got {}",
                self.eps_clip
            )));
        }
        Ok(())
    }
}

/// Hyperparameters of the energy-based soft actor-critic
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SacConfig {
    pub hidden_size: usize,
    /// Boltzmann temperature and entropy weight
    pub tau: f32,
    pub lr: f64,
    pub betas: (f32, f32),
    pub gamma: f32,
    pub k_epochs: usize,
    /// Uniform candidates drawn for every stochastic decision
    pub num_candidates: usize,
    /// Candidates are drawn from `[-action_bound, action_bound]` per axis
    pub action_bound: f32,
    /// Size of the fixed grid used by greedy actions and state values
    pub greedy_resolution: usize,
    /// Add `τ·log π` to every stage cost in the Q targets
    pub entropy_regularized: bool,
}

impl Default for SacConfig {
    fn default() -> Self {
        Self {
            hidden_size: 10,
            tau: 0.05,
            lr: 1e-3,
            betas: (0.9, 0.999),
            gamma: 1.0,
            k_epochs: 10,
            num_candidates: 64,
            action_bound: 10.0,
            greedy_resolution: 201,
            entropy_regularized: true,
        }
    }
}

impl SacConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hidden_size == 0 {
            return Err(LqrError::InvalidConfig("hidden_size must be positive".to_string()));
        }
        if self.num_candidates == 0 || self.greedy_resolution == 0 {
            return Err(LqrError::InvalidConfig(
                "num_candidates and greedy_resolution must be positive".to_string(),
            ));
        }
        check_positive("tau", self.tau)?;
        check_positive("lr", self.lr as f32)?;
        check_positive("action_bound", self.action_bound)?;
        check_betas(self.betas)?;
        check_gamma(self.gamma)
    }
}

/// Metrics reported by a single agent update
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrainingMetrics {
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub approx_kl: f32,
    pub clip_fraction: f32,
    /// Transitions the update was computed from
    pub samples: usize,
}

/// Plant matrices in row-major nested form
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub a: Vec<Vec<f64>>,
    pub b: Vec<Vec<f64>>,
    pub q: Vec<Vec<f64>>,
    pub r: Vec<Vec<f64>>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            a: vec![vec![1.0]],
            b: vec![vec![1.0]],
            q: vec![vec![1.0]],
            r: vec![vec![1.0]],
        }
    }
}

fn to_matrix(name: &str, rows: &[Vec<f64>]) -> Result<Array2<f64>> {
    let ncols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|row| row.len() != ncols) {
        return Err(LqrError::DimensionMismatch(format!(
            "matrix {name} has rows of different lengths"
        )));
    }
    let data: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), ncols), data)
        .map_err(|err| LqrError::DimensionMismatch(format!("matrix {name}: {err}")))
}

impl SystemConfig {
    pub fn to_system(&self) -> Result<LinearSystem> {
        LinearSystem::new(
            to_matrix("A", &self.a)?,
            to_matrix("B", &self.b)?,
            to_matrix("Q", &self.q)?,
            to_matrix("R", &self.r)?,
        )
    }
}

/// When the trainer hands the rollout buffer to the agent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateSchedule {
    /// After this many environment steps, possibly mid-episode
    EveryTimesteps(usize),
    /// At the end of every episode
    EveryEpisode,
}

/// Episode loop settings shared by both agents
#[derive(Clone, Debug)]
pub struct TrainerConfig {
    pub episodes: usize,
    pub schedule: UpdateSchedule,
    pub log_interval: usize,
    pub seed: u64,
}

/// Independent generator seeds for one run, all derived from the configured seed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSeeds {
    /// Action sampling in the trainer
    pub trainer: u64,
    /// Initial states
    pub environment: u64,
    /// Network initialisation
    pub network: u64,
}

impl RunSeeds {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            trainer: seed,
            environment: seed.wrapping_add(1),
            network: seed.wrapping_add(2),
        }
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Complete PPO experiment
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PpoTrainingConfig {
    pub system: SystemConfig,
    pub agent: PpoConfig,
    pub episodes: usize,
    pub max_steps: usize,
    pub update_timestep: usize,
    pub log_interval: usize,
    pub initial_state: InitialState,
    pub divergence_bound: Option<f64>,
    pub seed: u64,
    pub eval_horizon: usize,
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for PpoTrainingConfig {
    fn default() -> Self {
        Self {
            system: SystemConfig::default(),
            agent: PpoConfig::default(),
            episodes: 10_000,
            max_steps: 100,
            update_timestep: 400,
            log_interval: 500,
            initial_state: InitialState::Uniform {
                low: -5.0,
                high: 5.0,
            },
            divergence_bound: Some(10.0),
            seed: 0,
            eval_horizon: 50,
            checkpoint_dir: None,
        }
    }
}

impl PpoTrainingConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }

    pub fn seeds(&self) -> RunSeeds {
        RunSeeds::from_seed(self.seed)
    }

    pub fn environment(&self) -> Result<LqrEnv> {
        LqrEnv::new(
            self.system.to_system()?,
            self.initial_state.clone(),
            self.divergence_bound,
            self.max_steps,
            self.seeds().environment,
        )
    }

    /// Rollouts and the LQR value curve both run for `eval_horizon` steps
    pub fn comparison_settings(&self) -> ComparisonSettings {
        ComparisonSettings {
            horizon: self.eval_horizon,
            value_horizon: self.eval_horizon,
            gamma: f64::from(self.agent.gamma),
            ..ComparisonSettings::default()
        }
    }

    pub fn trainer_config(&self) -> Result<TrainerConfig> {
        if self.update_timestep == 0 {
            return Err(LqrError::InvalidConfig(
                "update_timestep must be positive".to_string(),
            ));
        }
        Ok(TrainerConfig {
            episodes: self.episodes,
            schedule: UpdateSchedule::EveryTimesteps(self.update_timestep),
            log_interval: self.log_interval,
            seed: self.seeds().trainer,
        })
    }
}

/// Complete SAC experiment
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SacTrainingConfig {
    pub system: SystemConfig,
    pub agent: SacConfig,
    pub episodes: usize,
    pub max_steps: usize,
    pub log_interval: usize,
    pub initial_state: InitialState,
    pub divergence_bound: Option<f64>,
    pub seed: u64,
    pub eval_horizon: usize,
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for SacTrainingConfig {
    fn default() -> Self {
        Self {
            system: SystemConfig::default(),
            agent: SacConfig::default(),
            episodes: 100_000,
            max_steps: 10,
            log_interval: 100,
            initial_state: InitialState::Normal { std: 10.0 },
            divergence_bound: None,
            seed: 0,
            eval_horizon: 50,
            checkpoint_dir: None,
        }
    }
}

impl SacTrainingConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }

    pub fn seeds(&self) -> RunSeeds {
        RunSeeds::from_seed(self.seed)
    }

    pub fn environment(&self) -> Result<LqrEnv> {
        LqrEnv::new(
            self.system.to_system()?,
            self.initial_state.clone(),
            self.divergence_bound,
            self.max_steps,
            self.seeds().environment,
        )
    }

    /// Rollouts and the LQR value curve both run for `eval_horizon` steps
    pub fn comparison_settings(&self) -> ComparisonSettings {
        ComparisonSettings {
            horizon: self.eval_horizon,
            value_horizon: self.eval_horizon,
            gamma: f64::from(self.agent.gamma),
            ..ComparisonSettings::default()
        }
    }

    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            episodes: self.episodes,
            schedule: UpdateSchedule::EveryEpisode,
            log_interval: self.log_interval,
            seed: self.seeds().trainer,
        }
    }
}

/// Averages over one logging window
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogRecord {
    /// Last episode of the window
    pub episode: usize,
    pub avg_length: f32,
    pub avg_episode_cost: f32,
    pub avg_final_cost: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct TrainingSummary {
    pub episodes: usize,
    pub steps: usize,
    pub updates: usize,
    pub history: Vec<LogRecord>,
    pub last_metrics: Option<TrainingMetrics>,
    pub walltime_secs: f64,
}

#[derive(Default)]
struct LogWindow {
    episodes: usize,
    length: usize,
    episode_cost: f32,
    final_cost: f32,
}

impl LogWindow {
    fn record(&mut self, length: usize, episode_cost: f32, final_cost: f32) {
        self.episodes += 1;
        self.length += length;
        self.episode_cost += episode_cost;
        self.final_cost += final_cost;
    }

    fn flush(&mut self, episode: usize) -> LogRecord {
        let n = self.episodes.max(1) as f32;
        let record = LogRecord {
            episode,
            avg_length: self.length as f32 / n,
            avg_episode_cost: self.episode_cost / n,
            avg_final_cost: self.final_cost / n,
        };
        *self = Self::default();
        record
    }
}

/// Generic trainer for on-policy agents
pub struct Trainer<A, E> {
    agent: A,
    env: E,
    config: TrainerConfig,
    memory: RolloutBuffer,
    rng: StdRng,
    /// Steps since the last update
    timestep: usize,
    global_step: usize,
    updates: usize,
}

impl<A: Agent, E: Environment> Trainer<A, E> {
    pub fn new(agent: A, env: E, config: TrainerConfig) -> Result<Self> {
        if config.log_interval == 0 {
            return Err(LqrError::InvalidConfig(
                "log_interval must be positive".to_string(),
            ));
        }
        if config.schedule == UpdateSchedule::EveryTimesteps(0) {
            return Err(LqrError::InvalidConfig(
                "update interval must be positive".to_string(),
            ));
        }
        if env.observation_size() == 0 || env.action_size() == 0 {
            return Err(LqrError::DimensionMismatch(
                "environment has an empty observation or action space".to_string(),
            ));
        }
        let rng = seeded_rng(config.seed);
        Ok(Self {
            agent,
            env,
            config,
            memory: RolloutBuffer::new(),
            rng,
            timestep: 0,
            global_step: 0,
            updates: 0,
        })
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut A {
        &mut self.agent
    }

    pub fn into_agent(self) -> A {
        self.agent
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    fn update(&mut self) -> Result<TrainingMetrics> {
        let metrics = self.agent.update(&self.memory)?;
        self.memory.clear();
        self.timestep = 0;
        self.updates += 1;
        debug!(
            "update {} after {} steps: policy {:.4}, value {:.4}",
            self.updates, self.global_step, metrics.policy_loss, metrics.value_loss
        );
        Ok(metrics)
    }

    /// Run `episodes` full episodes
    pub fn train(&mut self) -> Result<TrainingSummary> {
        let timer = Timer::new();
        let mut window = LogWindow::default();
        let mut history = Vec::new();
        let mut last_metrics = None;

        info!(
            "Training {} for {} episodes ({:?})",
            self.agent.name(),
            self.config.episodes,
            self.config.schedule
        );

        for episode in 1..=self.config.episodes {
            let mut state = self.env.reset()?;
            let mut episode_cost = 0.0;
            let mut final_cost = 0.0;
            let mut length = 0;

            loop {
                let action = self
                    .agent
                    .select_action(&state, &mut self.memory, &mut self.rng)?;
                let step = self.env.step(&action)?;
                self.memory.push_outcome(step.cost, step.done());

                self.timestep += 1;
                self.global_step += 1;
                length += 1;
                episode_cost += step.cost;
                final_cost = step.cost;

                if let UpdateSchedule::EveryTimesteps(n) = self.config.schedule {
                    if self.timestep >= n {
                        last_metrics = Some(self.update()?);
                    }
                }

                if step.done() {
                    break;
                }
                state = step.observation;
            }

            if self.config.schedule == UpdateSchedule::EveryEpisode {
                last_metrics = Some(self.update()?);
            }

            window.record(length, episode_cost, final_cost);
            if episode % self.config.log_interval == 0 {
                let record = window.flush(episode);
                info!(
                    "Episode {} \t avg length: {:.1} \t avg cost: {:.4} \t avg final cost: {:.4}",
                    record.episode, record.avg_length, record.avg_episode_cost, record.avg_final_cost
                );
                history.push(record);
            }
        }

        let walltime = timer.elapsed();
        info!(
            "Finished {} episodes, {} steps, {} updates in {}",
            self.config.episodes,
            self.global_step,
            self.updates,
            format_duration(walltime)
        );

        Ok(TrainingSummary {
            episodes: self.config.episodes,
            steps: self.global_step,
            updates: self.updates,
            history,
            last_metrics,
            walltime_secs: walltime.as_secs_f64(),
        })
    }
}
