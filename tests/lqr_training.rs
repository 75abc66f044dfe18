use burn::backend::{Autodiff, NdArray};
use ndarray::arr1;

use lqr_policy_gradients::{
    algorithms::{Agent, PPO, SAC},
    control::dlqr,
    environments::{Environment, InitialState},
    evaluation::{compare_with_lqr, ComparisonSettings},
    training::{PpoConfig, PpoTrainingConfig, SacConfig, SacTrainingConfig, Trainer},
    utils::seeded_rng,
};

type Backend = Autodiff<NdArray>;

fn short_ppo() -> PpoTrainingConfig {
    PpoTrainingConfig {
        agent: PpoConfig {
            hidden_size: 16,
            k_epochs: 3,
            ..PpoConfig::default()
        },
        episodes: 12,
        max_steps: 20,
        update_timestep: 40,
        log_interval: 4,
        seed: 7,
        eval_horizon: 10,
        ..PpoTrainingConfig::default()
    }
}

fn short_sac() -> SacTrainingConfig {
    SacTrainingConfig {
        agent: SacConfig {
            k_epochs: 3,
            greedy_resolution: 41,
            ..SacConfig::default()
        },
        episodes: 6,
        max_steps: 5,
        log_interval: 3,
        initial_state: InitialState::Normal { std: 2.0 },
        seed: 11,
        eval_horizon: 10,
        ..SacTrainingConfig::default()
    }
}

#[test]
fn ppo_trains_and_reports() {
    let config = short_ppo();
    let system = config.system.to_system().unwrap();
    let lqr = dlqr(&system).unwrap();
    let env = config.environment().unwrap();

    let mut rng = seeded_rng(config.seeds().network);
    let agent = PPO::<Backend>::new(
        env.observation_size(),
        env.action_size(),
        config.agent.clone(),
        &mut rng,
        &Default::default(),
    )
    .unwrap();

    let mut trainer = Trainer::new(agent, env, config.trainer_config().unwrap()).unwrap();
    let summary = trainer.train().unwrap();

    assert_eq!(summary.episodes, 12);
    assert!(summary.steps >= 12 && summary.steps <= 12 * 20);
    assert_eq!(summary.updates, summary.steps / 40);
    assert_eq!(summary.history.len(), 3);
    if let Some(metrics) = &summary.last_metrics {
        assert!(metrics.policy_loss.is_finite());
        assert!(metrics.value_loss.is_finite());
    }

    let agent = trainer.into_agent();
    let settings = ComparisonSettings {
        points: 11,
        ..config.comparison_settings()
    };
    let report = compare_with_lqr(&agent, &system, &lqr, &arr1(&[1.0]), &settings)
        .unwrap()
        .with_training(summary);

    assert_eq!(report.agent, "PPO");
    assert_eq!(report.value_curve.len(), 11);
    assert!(report.lqr_total_cost > 0.0);
    assert!(report.agent_total_cost.is_finite());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ppo_report.json");
    report.write_json(&path).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["training"]["episodes"], 12);
    assert_eq!(json["lqr_gain"][0].as_array().unwrap().len(), 1);
}

#[test]
fn sac_trains_and_restores_from_checkpoint() {
    let config = short_sac();
    let system = config.system.to_system().unwrap();
    let lqr = dlqr(&system).unwrap();
    let env = config.environment().unwrap();

    let mut rng = seeded_rng(config.seeds().network);
    let agent = SAC::<Backend>::new(
        env.observation_size(),
        env.action_size(),
        config.agent.clone(),
        &mut rng,
        &Default::default(),
    )
    .unwrap();

    let mut trainer = Trainer::new(agent, env, config.trainer_config()).unwrap();
    let summary = trainer.train().unwrap();

    // no divergence bound, so every episode runs to max_steps
    assert_eq!(summary.steps, 30);
    assert_eq!(summary.updates, 6);
    assert_eq!(summary.history.len(), 2);
    let metrics = summary.last_metrics.clone().unwrap();
    assert_eq!(metrics.samples, 5);
    assert!(metrics.entropy >= 0.0);

    let agent = trainer.into_agent();
    let dir = tempfile::tempdir().unwrap();
    agent.save(dir.path()).unwrap();

    let mut rng = seeded_rng(99);
    let mut restored = SAC::<Backend>::new(1, 1, config.agent.clone(), &mut rng, &Default::default())
        .unwrap();
    restored.load(dir.path()).unwrap();

    let sample_state = arr1(&[0.5f32]);
    assert_eq!(
        agent.greedy_action(&sample_state).unwrap(),
        restored.greedy_action(&sample_state).unwrap()
    );

    let settings = ComparisonSettings {
        points: 5,
        ..config.comparison_settings()
    };
    let report = compare_with_lqr(&restored, &system, &lqr, &arr1(&[1.0]), &settings).unwrap();
    assert_eq!(report.agent, "SAC");
    assert!(report
        .policy_curve
        .iter()
        .all(|p| p.agent.abs() <= f64::from(config.agent.action_bound) + 1e-6));
}
