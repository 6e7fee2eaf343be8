use crate::env::Action;
use candle_core::Tensor;
use derive_more::{Deref, Display};

/// Position of a transition in the push order of the buffer that stored it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub struct TransitionId(pub u64);

/// One environment step, before it has been stored.
#[derive(Debug, Clone)]
pub struct Experience {
    pub state0: Tensor,
    pub action0: Action,
    pub reward: Vec<f32>,
    pub done: Vec<bool>,
    pub state1: Tensor,
}

impl Experience {
    pub fn new(
        state0: Tensor,
        action0: Action,
        reward: Vec<f32>,
        done: Vec<bool>,
        state1: Tensor,
    ) -> Self {
        Self {
            state0,
            action0,
            reward,
            done,
            state1,
        }
    }

    pub fn any_done(&self) -> bool {
        self.done.iter().any(|done| *done)
    }
}

/// An [`Experience`] stamped with its id. Transitions are only created by a replay buffer and
/// can not be modified afterwards.
#[derive(Debug, Clone, Deref)]
pub struct Transition {
    id: TransitionId,
    #[deref]
    experience: Experience,
}

impl Transition {
    pub(crate) fn new(id: TransitionId, experience: Experience) -> Self {
        Self { id, experience }
    }

    pub fn id(&self) -> TransitionId {
        self.id
    }

    pub fn experience(&self) -> &Experience {
        &self.experience
    }
}
