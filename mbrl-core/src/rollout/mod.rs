pub mod diagnostics;
pub mod horizon;

use crate::{
    buffers::ReplayBuffer,
    dynamics::{DynamicsModel, TrainingData},
    env::{Action, Space},
    error::Result,
    policies::Policy,
    transition::{Experience, Transition},
};
use candle_core::{DType, Device, Tensor};
use diagnostics::PredictionDiagnostics;
use horizon::HorizonSchedule;

#[derive(Debug, Clone)]
pub struct RolloutConfig {
    /// Smallest and largest rollout horizon.
    pub horizon_range: (usize, usize),
    /// Training progress over which the horizon grows from its smallest to its largest value.
    pub progress_range: (f64, f64),
    /// Seed transitions drawn from the real buffer for every rollout.
    pub rollout_batch_size: usize,
    /// Transitions drawn from the real buffer for every model training round.
    pub model_batch_size: usize,
    /// The model is trained every `model_train_period` steps.
    pub model_train_period: usize,
    /// Sampling and training rounds per model update, their losses are averaged.
    pub model_train_iterations: usize,
    pub model_minibatch_size: usize,
    pub holdout_ratio: f32,
    /// How many model updates worth of synthetic transitions the synthetic buffer keeps.
    pub retain_epochs: usize,
    /// Share of every learner batch taken from real experience.
    pub real_ratio: f32,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            horizon_range: (1, 15),
            progress_range: (20., 100.),
            rollout_batch_size: 256,
            model_batch_size: 256,
            model_train_period: 250,
            model_train_iterations: 1,
            model_minibatch_size: 256,
            holdout_ratio: 0.2,
            retain_epochs: 1,
            real_ratio: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelUpdate {
    pub mean_loss: f32,
    pub iterations: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RolloutReport {
    pub horizon: usize,
    pub seeds: usize,
    /// Model steps actually taken, smaller than the horizon if every trajectory ended early.
    pub steps: usize,
    /// Transitions pushed into the synthetic buffer.
    pub transitions: usize,
    pub diagnostics: Option<PredictionDiagnostics>,
}

/// What [`RolloutScheduler::on_step`] did on a training step.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleReport {
    pub model: ModelUpdate,
    pub horizon_changed: bool,
    pub rollout: Option<RolloutReport>,
}

/// Dyna style producer of synthetic experience. Trains the dynamics model on real transitions and
/// rolls it out from real seed states into its own synthetic buffer.
pub struct RolloutScheduler<M: DynamicsModel> {
    config: RolloutConfig,
    schedule: HorizonSchedule,
    model: M,
    action_space: Space,
    device: Device,
    horizon: usize,
    synthetic: ReplayBuffer,
    diagnostics_pending: bool,
}

impl<M: DynamicsModel> RolloutScheduler<M> {
    pub fn new(config: RolloutConfig, model: M, action_space: Space, device: Device) -> Self {
        let schedule = HorizonSchedule::new(config.horizon_range, config.progress_range);
        let horizon = config.horizon_range.0.max(1);
        let synthetic = ReplayBuffer::new(synthetic_capacity(&config, horizon));
        Self {
            config,
            schedule,
            model,
            action_space,
            device,
            horizon,
            synthetic,
            diagnostics_pending: true,
        }
    }

    pub fn config(&self) -> &RolloutConfig {
        &self.config
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn synthetic(&self) -> &ReplayBuffer {
        &self.synthetic
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Recomputes the horizon for `progress`. A changed horizon resizes the synthetic buffer and
    /// asks the next rollout for prediction diagnostics. Returns whether the horizon changed.
    pub fn update_horizon(&mut self, progress: f64) -> bool {
        let horizon = self.schedule.horizon_at(progress);
        if horizon == self.horizon {
            return false;
        }
        let capacity = synthetic_capacity(&self.config, horizon);
        tracing::info!(
            from = self.horizon,
            to = horizon,
            capacity,
            progress,
            "rollout horizon changed"
        );
        self.horizon = horizon;
        self.synthetic.resize(capacity);
        self.diagnostics_pending = true;
        true
    }

    /// Runs `model_train_iterations` rounds of sampling from `real` and training the model on the
    /// sample.
    pub fn train_model(&mut self, real: &ReplayBuffer) -> Result<ModelUpdate> {
        let iterations = self.config.model_train_iterations.max(1);
        let mut total_loss = 0.;
        for _ in 0..iterations {
            let batch = real.sample(self.config.model_batch_size)?;
            let data = TrainingData::from_transitions(&batch, &self.action_space, &self.device)?;
            total_loss += self.model.train(
                &data.inputs,
                &data.labels,
                self.config.model_minibatch_size,
                self.config.holdout_ratio,
            )?;
        }
        let update = ModelUpdate {
            mean_loss: total_loss / iterations as f32,
            iterations,
        };
        tracing::info!(loss = update.mean_loss, iterations, "dynamics model trained");
        Ok(update)
    }

    /// Rolls the model out from `rollout_batch_size` real seed states for up to `horizon` steps.
    /// A trajectory stops as soon as any of its agents is predicted done.
    pub fn generate<P: Policy>(&mut self, real: &ReplayBuffer, policy: &P) -> Result<RolloutReport> {
        let seeds = real.sample(self.config.rollout_batch_size)?;
        let mut states: Vec<Tensor> = seeds.iter().map(|t| t.state0.clone()).collect();
        let mut diagnostics = None;
        let mut steps = 0;
        let mut transitions = 0;
        for step in 0..self.horizon {
            if states.is_empty() {
                break;
            }
            let actions = states
                .iter()
                .map(|state| policy.exploitation_action(state))
                .collect::<Result<Vec<Action>>>()?;
            let encoded = actions
                .iter()
                .map(|action| action.to_model_input(&self.action_space, &self.device))
                .collect::<Result<Vec<_>>>()?;
            let batch_states = Tensor::stack(&states, 0)?
                .to_dtype(DType::F32)?
                .to_device(&self.device)?;
            let batch_actions = Tensor::stack(&encoded, 0)?;
            let prediction = self.model.predict(&batch_states, &batch_actions)?;
            prediction.check_batch(states.len())?;
            if step == 0 && self.diagnostics_pending {
                let measured = PredictionDiagnostics::measure(&seeds, &prediction)?;
                tracing::info!(
                    state_error = %measured.state,
                    reward_error = %measured.reward,
                    "model prediction error"
                );
                diagnostics = Some(measured);
                self.diagnostics_pending = false;
            }
            let rewards = prediction.rewards.to_dtype(DType::F32)?.to_vec2::<f32>()?;
            let mut active = Vec::with_capacity(states.len());
            let rows = states
                .into_iter()
                .zip(actions)
                .zip(rewards.into_iter().zip(prediction.dones));
            for (idx, ((state, action), (reward, done))) in rows.enumerate() {
                let next_state = prediction.next_states.get(idx)?;
                let terminal = done.iter().any(|done| *done);
                let experience = Experience::new(state, action, reward, done, next_state.clone());
                if self.synthetic.push(experience).is_some() {
                    transitions += 1;
                }
                if !terminal {
                    active.push(next_state);
                }
            }
            states = active;
            steps += 1;
        }
        let report = RolloutReport {
            horizon: self.horizon,
            seeds: seeds.len(),
            steps,
            transitions,
            diagnostics,
        };
        tracing::debug!(
            horizon = report.horizon,
            steps = report.steps,
            transitions = report.transitions,
            synthetic = %self.synthetic,
            "model rollout finished"
        );
        Ok(report)
    }

    /// Draws a learner batch: `floor(real_ratio * batch_size)` real transitions, the rest synthetic.
    /// Falls back to an all real batch while the synthetic buffer can not cover its share.
    pub fn sample_mixed<'a>(
        &'a self,
        real: &'a ReplayBuffer,
        batch_size: usize,
    ) -> Result<Vec<&'a Transition>> {
        let real_count = ((self.config.real_ratio * batch_size as f32).floor() as usize).min(batch_size);
        let synthetic_count = batch_size - real_count;
        if self.config.real_ratio < 1. && synthetic_count > 0 && self.synthetic.len() >= synthetic_count {
            let mut batch = real.sample(real_count)?;
            batch.extend(self.synthetic.sample(synthetic_count)?);
            Ok(batch)
        } else {
            real.sample(batch_size)
        }
    }

    /// Called once per training step. On the model training cadence this trains the model, updates
    /// the horizon and, when the real buffer holds enough seeds, generates a rollout.
    pub fn on_step<P: Policy>(
        &mut self,
        step: usize,
        total_steps: usize,
        progress: f64,
        real: &ReplayBuffer,
        policy: &P,
    ) -> Result<Option<ScheduleReport>> {
        let period = self.config.model_train_period.max(1);
        if total_steps <= self.config.model_batch_size || step % period != 0 {
            return Ok(None);
        }
        let model = self.train_model(real)?;
        let horizon_changed = self.update_horizon(progress);
        let rollout = if real.len() >= self.config.rollout_batch_size && self.config.real_ratio < 1. {
            Some(self.generate(real, policy)?)
        } else {
            None
        };
        Ok(Some(ScheduleReport {
            model,
            horizon_changed,
            rollout,
        }))
    }
}

fn synthetic_capacity(config: &RolloutConfig, horizon: usize) -> usize {
    config.retain_epochs * horizon * config.rollout_batch_size / config.model_train_period.max(1)
}
