//! Small built-in environments used to drive environment pools, mostly in tests and in the
//! subprocess worker binary.

pub mod config;
pub mod countdown;
pub mod point_mass;

pub use config::{BuiltinEnv, EnvConfig};
pub use countdown::CountdownEnv;
pub use point_mass::PointMassEnv;
