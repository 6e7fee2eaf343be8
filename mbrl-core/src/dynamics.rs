use crate::{
    env::Space,
    error::{Error, Result},
    transition::Transition,
};
use candle_core::{DType, Device, Tensor};

/// Batched one-step prediction of a learned environment model.
#[derive(Debug, Clone)]
pub struct ModelPrediction {
    /// `[batch, agents, obs]`
    pub next_states: Tensor,
    /// `[batch, agents]`
    pub rewards: Tensor,
    /// One entry per agent for every row of the batch.
    pub dones: Vec<Vec<bool>>,
}

impl ModelPrediction {
    pub(crate) fn check_batch(&self, batch: usize) -> Result<()> {
        let predicted = self.next_states.dim(0)?;
        if predicted != batch || self.rewards.dim(0)? != batch || self.dones.len() != batch {
            return Err(Error::ModelOutput {
                reason: format!(
                    "expected {batch} rows, got {predicted} states, {} rewards and {} done flags",
                    self.rewards.dim(0)?,
                    self.dones.len()
                ),
            });
        }
        Ok(())
    }
}

/// A learned model of the environment, queried for synthetic rollouts.
pub trait DynamicsModel {
    /// `states` is `[batch, agents, obs]`, `actions` is `[batch, agents, act]` as produced by
    /// [`crate::env::Action::to_model_input`].
    fn predict(&self, states: &Tensor, actions: &Tensor) -> Result<ModelPrediction>;

    /// Fits the model on `inputs` / `labels` (see [`TrainingData`]) and returns the training loss.
    /// `holdout_ratio` of the rows are kept aside for validation.
    fn train(
        &mut self,
        inputs: &Tensor,
        labels: &Tensor,
        batch_size: usize,
        holdout_ratio: f32,
    ) -> Result<f32>;
}

pub struct TrainingData {
    /// `[batch, agents * obs + agents * act]`: the flattened state followed by the encoded action.
    pub inputs: Tensor,
    /// `[batch, agents + agents * obs + agents]`: reward, state delta and done as 0/1.
    pub labels: Tensor,
}

impl TrainingData {
    pub fn from_transitions(
        batch: &[&Transition],
        action_space: &Space,
        device: &Device,
    ) -> Result<Self> {
        let Some(first) = batch.first() else {
            return Err(Error::InsufficientData {
                requested: 1,
                available: 0,
            });
        };
        let rows = batch.len();
        let agents = first.reward.len();
        let states0: Vec<&Tensor> = batch.iter().map(|t| &t.state0).collect();
        let states1: Vec<&Tensor> = batch.iter().map(|t| &t.state1).collect();
        let s0 = Tensor::stack(&states0, 0)?
            .to_dtype(DType::F32)?
            .to_device(device)?;
        let s1 = Tensor::stack(&states1, 0)?
            .to_dtype(DType::F32)?
            .to_device(device)?;
        let actions = batch
            .iter()
            .map(|t| t.action0.to_model_input(action_space, device))
            .collect::<Result<Vec<_>>>()?;
        let a0 = Tensor::stack(&actions, 0)?;
        let inputs = Tensor::cat(&[s0.flatten_from(1)?, a0.flatten_from(1)?], 1)?;

        let rewards: Vec<f32> = batch.iter().flat_map(|t| t.reward.iter().copied()).collect();
        let dones: Vec<f32> = batch
            .iter()
            .flat_map(|t| t.done.iter().map(|done| if *done { 1. } else { 0. }))
            .collect();
        if rewards.len() != rows * agents || dones.len() != rows * agents {
            return Err(Error::Unsupported {
                operation: "training a model on transitions with varying agent counts",
            });
        }
        let rewards = Tensor::from_vec(rewards, (rows, agents), device)?;
        let dones = Tensor::from_vec(dones, (rows, agents), device)?;
        let delta = s1.sub(&s0)?.flatten_from(1)?;
        let labels = Tensor::cat(&[rewards, delta, dones], 1)?;
        Ok(Self { inputs, labels })
    }
}

#[cfg(test)]
mod test {
    use super::TrainingData;
    use crate::{
        buffers::ReplayBuffer,
        env::{Action, Space},
        transition::Experience,
    };
    use candle_core::{Device, Tensor};

    #[test]
    fn training_rows_hold_state_action_and_targets() {
        let mut buffer = ReplayBuffer::new(4);
        // two agents, two observation dims each
        buffer.push(Experience::new(
            Tensor::new(&[[1f32, 2.], [3., 4.]], &Device::Cpu).unwrap(),
            Action::Discrete(vec![1, 0]),
            vec![0.5, -0.5],
            vec![false, true],
            Tensor::new(&[[2f32, 2.], [3., 6.]], &Device::Cpu).unwrap(),
        ));
        let batch = buffer.last_n(1).unwrap();
        let data = TrainingData::from_transitions(&batch, &Space::Discrete(2), &Device::Cpu).unwrap();
        assert_eq!(data.inputs.dims(), &[1, 8]);
        assert_eq!(
            data.inputs.to_vec2::<f32>().unwrap(),
            vec![vec![1., 2., 3., 4., 0., 1., 1., 0.]]
        );
        assert_eq!(data.labels.dims(), &[1, 8]);
        assert_eq!(
            data.labels.to_vec2::<f32>().unwrap(),
            vec![vec![0.5, -0.5, 1., 0., 0., 2., 0., 1.]]
        );
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(TrainingData::from_transitions(&[], &Space::Discrete(2), &Device::Cpu).is_err());
    }
}
