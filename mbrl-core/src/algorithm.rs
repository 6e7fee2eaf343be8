use crate::{
    Algorithm,
    agents::Agent,
    buffers::ReplayBuffer,
    dynamics::DynamicsModel,
    env::Action,
    env_pools::EnvPool,
    error::Result,
    policies::Policy,
    rollout::RolloutScheduler,
    transition::Experience,
};
use candle_core::Tensor;

macro_rules! break_on_hook_res {
    ($hook_res:expr) => {
        if $hook_res {
            break;
        }
    };
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub batch_size: usize,
    /// Learner updates happen every `update_period` steps.
    pub update_period: usize,
    /// Mixed batches drawn and learned from per update, their losses are averaged.
    pub learner_iterations: usize,
    /// Act with the exploration action instead of the exploitation one.
    pub explore: bool,
    pub epsilon: f32,
    pub real_capacity: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            update_period: 1,
            learner_iterations: 1,
            explore: true,
            epsilon: 0.2,
            real_capacity: 20000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LearningSchedule {
    EpisodeBound {
        total_episodes: usize,
        current_episode: usize,
    },
    TotalStepBound {
        total_steps: usize,
        current_step: usize,
    },
}

impl LearningSchedule {
    pub fn episode_bound(total_episodes: usize) -> Self {
        Self::EpisodeBound {
            total_episodes,
            current_episode: 0,
        }
    }

    pub fn total_step_bound(total_steps: usize) -> Self {
        Self::TotalStepBound {
            total_steps,
            current_step: 0,
        }
    }

    /// Accounts for a finished episode, returns true once the schedule is exhausted.
    pub fn advance(&mut self, episode_steps: usize) -> bool {
        match self {
            Self::EpisodeBound {
                total_episodes,
                current_episode,
            } => {
                *current_episode += 1;
                current_episode >= total_episodes
            }
            Self::TotalStepBound {
                total_steps,
                current_step,
            } => {
                *current_step += episode_steps;
                current_step >= total_steps
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpisodeLoss {
    /// Mean learner losses over the steps of the episode.
    pub critic: f32,
    pub actor: f32,
    /// Mean dynamics model loss over the model updates of the episode, zero if there were none.
    pub model: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeReport {
    pub episode: usize,
    /// Vectorized steps taken, every one of them moved all workers.
    pub steps: usize,
    /// Real transitions collected so far over the whole training.
    pub total_steps: usize,
    /// Reward collected per agent, averaged over the workers.
    pub reward: Vec<f32>,
    pub loss: EpisodeLoss,
}

pub trait TrainingHooks {
    fn init_hook(&mut self) -> bool;

    fn post_episode_hook(&mut self, report: &EpisodeReport, real: &ReplayBuffer) -> bool;

    fn shutdown_hook(&mut self) -> Result<()>;
}

pub struct DefaultTrainingHooks {
    learning_schedule: LearningSchedule,
    log_period: usize,
}

impl DefaultTrainingHooks {
    pub fn new(learning_schedule: LearningSchedule) -> Self {
        Self {
            learning_schedule,
            log_period: 10,
        }
    }

    pub fn with_log_period(mut self, log_period: usize) -> Self {
        self.log_period = log_period.max(1);
        self
    }
}

impl TrainingHooks for DefaultTrainingHooks {
    fn init_hook(&mut self) -> bool {
        false
    }

    fn post_episode_hook(&mut self, report: &EpisodeReport, real: &ReplayBuffer) -> bool {
        let mean_reward = report.reward.iter().sum::<f32>() / report.reward.len().max(1) as f32;
        tracing::info!(
            episode = report.episode,
            steps = report.steps,
            mean_reward,
            critic_loss = report.loss.critic,
            actor_loss = report.loss.actor,
            model_loss = report.loss.model,
            "episode finished"
        );
        if (report.episode + 1) % self.log_period == 0 {
            tracing::info!(rewards = ?report.reward, "{real}");
        }
        self.learning_schedule.advance(report.steps)
    }

    fn shutdown_hook(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects real experience from the pool with the agent's policy and trains the agent on a mix of
/// real and model generated transitions.
pub struct ModelBasedAlgorithm<A: Agent, M: DynamicsModel, H: TrainingHooks> {
    pub pool: EnvPool,
    pub agent: A,
    pub scheduler: RolloutScheduler<M>,
    pub real: ReplayBuffer,
    pub hooks: H,
    pub config: TrainingConfig,
    total_steps: usize,
    total_episodes: usize,
}

impl<A: Agent, M: DynamicsModel, H: TrainingHooks> ModelBasedAlgorithm<A, M, H> {
    pub fn new(
        pool: EnvPool,
        agent: A,
        scheduler: RolloutScheduler<M>,
        hooks: H,
        config: TrainingConfig,
    ) -> Self {
        let real = ReplayBuffer::new(config.real_capacity);
        Self {
            pool,
            agent,
            scheduler,
            real,
            hooks,
            config,
            total_steps: 0,
            total_episodes: 0,
        }
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn total_episodes(&self) -> usize {
        self.total_episodes
    }

    fn act(&self, state: &Tensor) -> Result<Action> {
        let policy = self.agent.policy();
        if self.config.explore {
            policy.exploration_action(state, self.config.epsilon)
        } else {
            policy.exploitation_action(state)
        }
    }

    // returns the critic and actor losses of this step and the model loss if the model was trained
    fn update_step(&mut self, step: usize) -> Result<(f32, f32, Option<f32>)> {
        let progress = self.total_episodes as f64;
        let schedule = self.scheduler.on_step(
            step,
            self.total_steps,
            progress,
            &self.real,
            self.agent.policy(),
        )?;
        let model_loss = schedule.map(|report| report.model.mean_loss);

        let period = self.config.update_period.max(1);
        if self.real.len() <= self.config.batch_size || step % period != 0 {
            return Ok((0., 0., model_loss));
        }
        let iterations = self.config.learner_iterations.max(1);
        let (mut critic, mut actor) = (0., 0.);
        for _ in 0..iterations {
            let batch = self.scheduler.sample_mixed(&self.real, self.config.batch_size)?;
            let loss = self.agent.learn(&batch)?;
            critic += loss.critic;
            actor += loss.actor;
        }
        Ok((
            critic / iterations as f32,
            actor / iterations as f32,
            model_loss,
        ))
    }

    /// Runs the pool until any worker reports a finished agent.
    pub fn run_episode(&mut self) -> Result<EpisodeReport> {
        let n_envs = self.pool.num_envs();
        let agents = self.pool.description().agent_count;
        let mut states = self.pool.reset()?;
        let mut reward = vec![0f32; agents];
        let mut loss = EpisodeLoss::default();
        let mut model_updates = 0;
        let mut steps = 0;
        loop {
            let actions = (0..n_envs)
                .map(|idx| self.act(&states.get(idx)?))
                .collect::<Result<Vec<_>>>()?;
            let vec_step = self.pool.step(actions.clone())?;
            for (idx, action) in actions.into_iter().enumerate() {
                // a worker that finished was reset already, its real next state is in the info
                let state1 = match &vec_step.infos[idx].terminal_observation {
                    Some(terminal_observation) => terminal_observation.clone(),
                    None => vec_step.observations.get(idx)?,
                };
                self.real.push(Experience::new(
                    states.get(idx)?,
                    action,
                    vec_step.rewards[idx].clone(),
                    vec_step.dones[idx].clone(),
                    state1,
                ));
            }
            for (agent, total) in reward.iter_mut().enumerate() {
                let sum: f32 = vec_step
                    .rewards
                    .iter()
                    .filter_map(|rewards| rewards.get(agent))
                    .sum();
                *total += sum / n_envs as f32;
            }

            let (critic, actor, model) = self.update_step(self.total_steps / n_envs)?;
            loss.critic += critic;
            loss.actor += actor;
            if let Some(model) = model {
                loss.model += model;
                model_updates += 1;
            }
            steps += 1;
            self.total_steps += n_envs;
            states = vec_step.observations;
            if vec_step.dones.iter().flatten().any(|done| *done) {
                break;
            }
        }
        loss.critic /= steps as f32;
        loss.actor /= steps as f32;
        if model_updates > 0 {
            loss.model /= model_updates as f32;
        }
        let report = EpisodeReport {
            episode: self.total_episodes,
            steps,
            total_steps: self.total_steps,
            reward,
            loss,
        };
        self.total_episodes += 1;
        Ok(report)
    }
}

impl<A: Agent, M: DynamicsModel, H: TrainingHooks> Algorithm for ModelBasedAlgorithm<A, M, H> {
    fn train(&mut self) -> Result<()> {
        if self.hooks.init_hook() {
            return Ok(());
        }
        loop {
            let report = self.run_episode()?;
            break_on_hook_res!(self.hooks.post_episode_hook(&report, &self.real));
        }
        self.hooks.shutdown_hook()
    }
}
