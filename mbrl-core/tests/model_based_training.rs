use candle_core::{DType, Device, Tensor};
use mbrl_core::{
    Algorithm,
    agents::{Agent, LearnerLoss},
    algorithm::{
        DefaultTrainingHooks, EpisodeReport, LearningSchedule, ModelBasedAlgorithm,
        TrainingConfig, TrainingHooks,
    },
    buffers::ReplayBuffer,
    dynamics::{DynamicsModel, ModelPrediction},
    env::{Action, Space},
    env_builder::EnvBuilderType,
    env_pools::{EnvPool, PoolConfig},
    error::Result,
    policies::Policy,
    rollout::{RolloutConfig, RolloutScheduler},
    transition::{Experience, Transition},
};
use mbrl_envs::EnvConfig;
use std::sync::Arc;

// the countdown decrements by one every step and pays one per step, so this model is exact
#[derive(Default)]
struct CountdownModel {
    trained: usize,
}

impl DynamicsModel for CountdownModel {
    fn predict(&self, states: &Tensor, _actions: &Tensor) -> Result<ModelPrediction> {
        let next_states = (states - 1.)?;
        let (batch, agents, _) = states.dims3()?;
        let rewards = Tensor::ones((batch, agents), DType::F32, states.device())?;
        let dones = next_states
            .narrow(2, 0, 1)?
            .squeeze(2)?
            .to_vec2::<f32>()?
            .into_iter()
            .map(|row| row.into_iter().map(|remaining| remaining <= 0.).collect())
            .collect();
        Ok(ModelPrediction {
            next_states,
            rewards,
            dones,
        })
    }

    fn train(&mut self, inputs: &Tensor, labels: &Tensor, _batch_size: usize, _holdout_ratio: f32) -> Result<f32> {
        // one observation value plus a two way one-hot action
        assert_eq!(inputs.dim(1)?, 3);
        // reward, delta and done
        assert_eq!(labels.dim(1)?, 3);
        self.trained += 1;
        Ok(0.5)
    }
}

struct FirstChoice;

impl Policy for FirstChoice {
    fn exploitation_action(&self, state: &Tensor) -> Result<Action> {
        Ok(Action::Discrete(vec![0; state.dim(0)?]))
    }

    fn exploration_action(&self, state: &Tensor, _epsilon: f32) -> Result<Action> {
        Ok(Action::Discrete(vec![1; state.dim(0)?]))
    }
}

#[derive(Default)]
struct RecordingAgent {
    batches: Vec<usize>,
}

impl Agent for RecordingAgent {
    type Policy = FirstChoice;

    fn policy(&self) -> &Self::Policy {
        &FirstChoice
    }

    fn learn(&mut self, batch: &[&Transition]) -> Result<LearnerLoss> {
        self.batches.push(batch.len());
        Ok(LearnerLoss {
            critic: 2.,
            actor: 1.,
        })
    }
}

struct Recorder {
    episodes: usize,
    reports: Vec<EpisodeReport>,
    shut_down: bool,
}

impl TrainingHooks for Recorder {
    fn init_hook(&mut self) -> bool {
        false
    }

    fn post_episode_hook(&mut self, report: &EpisodeReport, _real: &ReplayBuffer) -> bool {
        self.reports.push(report.clone());
        self.reports.len() >= self.episodes
    }

    fn shutdown_hook(&mut self) -> Result<()> {
        self.shut_down = true;
        Ok(())
    }
}

fn countdown_pool(length: usize) -> EnvPool {
    let builders = EnvBuilderType::EnvBuilder {
        builder: Arc::new(EnvConfig::Countdown { agents: 1, length }),
        n_envs: 2,
    };
    EnvPool::threaded(builders, PoolConfig::default()).unwrap()
}

fn rollout_config() -> RolloutConfig {
    RolloutConfig {
        horizon_range: (1, 3),
        progress_range: (0., 2.),
        rollout_batch_size: 4,
        model_batch_size: 4,
        model_train_period: 1,
        model_minibatch_size: 4,
        retain_epochs: 1,
        real_ratio: 0.5,
        ..RolloutConfig::default()
    }
}

fn scheduler() -> RolloutScheduler<CountdownModel> {
    RolloutScheduler::new(
        rollout_config(),
        CountdownModel::default(),
        Space::Discrete(2),
        Device::Cpu,
    )
}

fn training_config() -> TrainingConfig {
    TrainingConfig {
        batch_size: 4,
        real_capacity: 100,
        ..TrainingConfig::default()
    }
}

#[test]
fn training_mixes_real_and_model_experience() {
    let hooks = Recorder {
        episodes: 3,
        reports: vec![],
        shut_down: false,
    };
    let mut algo = ModelBasedAlgorithm::new(
        countdown_pool(4),
        RecordingAgent::default(),
        scheduler(),
        hooks,
        training_config(),
    );
    algo.train().unwrap();

    assert!(algo.hooks.shut_down);
    assert_eq!(algo.total_episodes(), 3);
    // every episode is four vectorized steps over two workers
    assert_eq!(algo.total_steps(), 24);
    assert_eq!(algo.real.len(), 24);
    for (idx, report) in algo.hooks.reports.iter().enumerate() {
        assert_eq!(report.episode, idx);
        assert_eq!(report.steps, 4);
        assert_eq!(report.reward, vec![4.]);
    }
    assert_eq!(algo.hooks.reports[2].loss.model, 0.5);

    // the model trains from the fourth step on, once per step
    assert_eq!(algo.scheduler.model().trained, 9);
    // the horizon follows the episode count
    assert_eq!(algo.scheduler.horizon(), 3);
    assert!(!algo.scheduler.synthetic().is_empty());
    // learning starts once more than a batch of real experience is stored
    assert_eq!(algo.agent.batches.len(), 10);
    assert!(algo.agent.batches.iter().all(|len| *len == 4));

    // the final step of an episode keeps the real terminal state, not the reset one
    let last = algo.real.last().unwrap();
    assert_eq!(last.done, vec![true]);
    assert_eq!(last.state1.to_vec2::<f32>().unwrap(), vec![vec![0.]]);
    assert_eq!(last.state0.to_vec2::<f32>().unwrap(), vec![vec![1.]]);
}

#[test]
fn default_hooks_stop_on_the_step_budget() {
    let schedule = LearningSchedule::total_step_bound(6);
    let mut algo = ModelBasedAlgorithm::new(
        countdown_pool(3),
        RecordingAgent::default(),
        scheduler(),
        DefaultTrainingHooks::new(schedule).with_log_period(1),
        training_config(),
    );
    algo.train().unwrap();
    assert_eq!(algo.total_episodes(), 2);
    assert_eq!(algo.total_steps(), 12);
}

#[test]
fn an_exact_model_reproduces_real_experience() {
    let mut pool = countdown_pool(4);
    let mut real = ReplayBuffer::new(16);
    let mut states = pool.reset().unwrap();
    for _ in 0..4 {
        let actions = vec![Action::Discrete(vec![0]); 2];
        let step = pool.step(actions.clone()).unwrap();
        for (idx, action) in actions.into_iter().enumerate() {
            let state1 = match &step.infos[idx].terminal_observation {
                Some(terminal) => terminal.clone(),
                None => step.observations.get(idx).unwrap(),
            };
            real.push(Experience::new(
                states.get(idx).unwrap(),
                action,
                step.rewards[idx].clone(),
                step.dones[idx].clone(),
                state1,
            ));
        }
        states = step.observations;
    }
    pool.close().unwrap();

    let mut scheduler = scheduler();
    scheduler.update_horizon(2.);
    let report = scheduler.generate(&real, &FirstChoice).unwrap();
    let diagnostics = report.diagnostics.unwrap();
    assert_eq!(diagnostics.state.max, 0.);
    assert_eq!(diagnostics.reward.max, 0.);
    assert!(report.steps <= 3);
    assert!(
        scheduler
            .synthetic()
            .iter()
            .all(|t| t.reward == vec![1.] && t.state1.to_vec2::<f32>().unwrap()[0][0] >= 0.)
    );
}
