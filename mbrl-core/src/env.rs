use crate::error::{Error, Result};
use bincode::{Decode, Encode};
use candle_core::{DType, Device, Tensor};
use derive_more::Display;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Space {
    Discrete(usize),
    Continuous {
        min: Option<Vec<f32>>,
        max: Option<Vec<f32>>,
        dims: Vec<usize>,
    },
}

impl Space {
    pub fn continuous_from_dims(dims: Vec<usize>) -> Self {
        Self::Continuous {
            min: None,
            max: None,
            dims,
        }
    }

    /// Width of one agent's slice of the space once flattened. Discrete spaces are one-hot
    /// encoded, so their width is the number of choices.
    pub fn size(&self) -> usize {
        match &self {
            Self::Discrete(size) => *size,
            Self::Continuous { dims, .. } => dims.iter().product(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct EnvironmentDescription {
    pub observation_space: Space,
    pub action_space: Space,
    pub agent_count: usize,
}

impl EnvironmentDescription {
    pub fn new(observation_space: Space, action_space: Space, agent_count: usize) -> Self {
        Self {
            observation_space,
            action_space,
            agent_count,
        }
    }

    pub fn action_size(&self) -> usize {
        self.action_space.size()
    }

    pub fn observation_size(&self) -> usize {
        self.observation_space.size()
    }
}

/// One action per agent.
#[derive(Debug, Clone)]
pub enum Action {
    Discrete(Vec<u32>),
    /// `[agents, action_dim]`
    Continuous(Tensor),
}

impl Action {
    pub fn agent_count(&self) -> Result<usize> {
        match self {
            Self::Discrete(choices) => Ok(choices.len()),
            Self::Continuous(action) => Ok(action.dim(0)?),
        }
    }

    /// Encodes the action as an f32 `[agents, width]` tensor suitable as model input.
    pub fn to_model_input(&self, space: &Space, device: &Device) -> Result<Tensor> {
        match (self, space) {
            (Self::Discrete(choices), Space::Discrete(n)) => {
                let mut one_hot = vec![0f32; choices.len() * n];
                for (agent, choice) in choices.iter().enumerate() {
                    let choice = *choice as usize;
                    if choice >= *n {
                        return Err(Error::Unsupported {
                            operation: "encoding a discrete action outside of its space",
                        });
                    }
                    one_hot[agent * n + choice] = 1.;
                }
                Ok(Tensor::from_vec(one_hot, (choices.len(), *n), device)?)
            }
            (Self::Continuous(action), Space::Continuous { .. }) => {
                let agents = action.dim(0)?;
                let width = action.elem_count() / agents.max(1);
                let action = action
                    .to_dtype(DType::F32)?
                    .reshape((agents, width))?
                    .to_device(device)?;
                Ok(action)
            }
            _ => Err(Error::Unsupported {
                operation: "encoding an action against a mismatched space",
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Info {
    /// Set by the worker when it reset the environment after every agent finished, since the
    /// observation returned with the step is then the fresh one.
    pub terminal_observation: Option<Tensor>,
    pub values: BTreeMap<String, f32>,
}

#[derive(Debug, Clone)]
pub struct SnapShot {
    pub state: Tensor,
    pub reward: Vec<f32>,
    pub done: Vec<bool>,
    pub info: Info,
}

impl SnapShot {
    pub fn all_done(&self) -> bool {
        !self.done.is_empty() && self.done.iter().all(|done| *done)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Encode, Decode)]
pub struct EnvKind(pub String);

impl EnvKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }
}

/// Environment specific metadata, forwarded verbatim for save/restore bookkeeping.
pub type ExtraAttributes = BTreeMap<String, String>;

pub trait Env {
    fn reset(&mut self, seed: u64) -> Result<Tensor>;

    /// Resets the task selection of curriculum style environments without touching the episode.
    fn reset_task(&mut self) -> Result<Tensor> {
        Err(Error::Unsupported {
            operation: "reset_task",
        })
    }

    fn step(&mut self, action: &Action) -> Result<SnapShot>;

    fn render(&mut self) -> Result<()> {
        Ok(())
    }

    fn env_description(&self) -> EnvironmentDescription;

    fn kind(&self) -> EnvKind;

    fn extra_attributes(&self) -> ExtraAttributes {
        ExtraAttributes::new()
    }
}
