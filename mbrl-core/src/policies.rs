use crate::{env::Action, error::Result};
use candle_core::Tensor;

/// Maps the `[agents, obs]` observation of one environment to one action per agent.
pub trait Policy {
    /// The action the policy currently believes is best.
    fn exploitation_action(&self, state: &Tensor) -> Result<Action>;

    /// Like [`Policy::exploitation_action`], perturbed for exploration. `epsilon` is the
    /// exploration strength, its exact meaning is up to the policy.
    fn exploration_action(&self, state: &Tensor, epsilon: f32) -> Result<Action>;
}
