use crate::{error::Result, policies::Policy, transition::Transition};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LearnerLoss {
    pub critic: f32,
    pub actor: f32,
}

pub trait Agent {
    type Policy: Policy;

    /// Retrieves the underlying policy
    fn policy(&self) -> &Self::Policy;

    /// One learning update on a batch drawn from the replay memory
    fn learn(&mut self, batch: &[&Transition]) -> Result<LearnerLoss>;
}
