use crate::{env::Env, error::Result};
use std::sync::Arc;

/// Builds the environment a worker owns. Builders for subprocess workers also have to be bincode
/// encodable, since they travel to the child process inside the setup packet.
pub trait EnvBuilder: Send + Sync + 'static {
    type Env: Env;

    fn build_env(&self) -> Result<Self::Env>;
}

impl<E: Env, F> EnvBuilder for F
where
    F: Fn() -> Result<E> + Send + Sync + 'static,
{
    type Env = E;

    fn build_env(&self) -> Result<Self::Env> {
        (self)()
    }
}

pub enum EnvBuilderType<EB: EnvBuilder> {
    EnvBuilder { builder: Arc<EB>, n_envs: usize },
    EnvBuilderVec { builders: Vec<Arc<EB>> },
}

impl<EB: EnvBuilder> EnvBuilderType<EB> {
    pub fn num_envs(&self) -> usize {
        match self {
            Self::EnvBuilder { n_envs, .. } => *n_envs,
            Self::EnvBuilderVec { builders } => builders.len(),
        }
    }

    /// One builder per worker, in worker index order.
    pub fn builders(&self) -> Vec<Arc<EB>> {
        match self {
            Self::EnvBuilder { builder, n_envs } => vec![builder.clone(); *n_envs],
            Self::EnvBuilderVec { builders } => builders.clone(),
        }
    }
}
