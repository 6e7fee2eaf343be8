pub mod replay_buffer;
pub mod serialization;

pub use replay_buffer::ReplayBuffer;
