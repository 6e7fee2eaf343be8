pub mod agents;
pub mod algorithm;
pub mod buffers;
pub mod dynamics;
pub mod env;
pub mod env_builder;
pub mod env_pools;
pub mod error;
pub mod ipc;
pub mod policies;
pub mod rng;
pub mod rollout;
pub mod transition;
pub mod utils;

use error::Result;

pub trait Algorithm {
    fn train(&mut self) -> Result<()>;
}
