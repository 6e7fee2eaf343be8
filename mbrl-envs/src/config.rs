use crate::{countdown::CountdownEnv, point_mass::PointMassEnv};
use bincode::{Decode, Encode};
use candle_core::Tensor;
use mbrl_core::{
    env::{Action, Env, EnvKind, EnvironmentDescription, ExtraAttributes, SnapShot},
    env_builder::EnvBuilder,
    error::{Error, Result},
};

/// Serializable description of a built-in environment. This is what a subprocess worker receives
/// in its setup packet.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum EnvConfig {
    Countdown { agents: usize, length: usize },
    PointMass { agents: usize, max_steps: usize },
}

impl EnvConfig {
    fn validate(&self) -> Result<()> {
        let (agents, horizon) = match self {
            Self::Countdown { agents, length } => (*agents, *length),
            Self::PointMass { agents, max_steps } => (*agents, *max_steps),
        };
        if agents == 0 || horizon == 0 {
            return Err(Error::Unsupported {
                operation: "building an environment without agents or steps",
            });
        }
        Ok(())
    }
}

impl EnvBuilder for EnvConfig {
    type Env = BuiltinEnv;

    fn build_env(&self) -> Result<Self::Env> {
        self.validate()?;
        let env = match *self {
            Self::Countdown { agents, length } => {
                BuiltinEnv::Countdown(CountdownEnv::new(agents, length))
            }
            Self::PointMass { agents, max_steps } => {
                BuiltinEnv::PointMass(PointMassEnv::new(agents, max_steps))
            }
        };
        tracing::debug!(kind = %env.kind(), "built environment");
        Ok(env)
    }
}

#[derive(Debug, Clone)]
pub enum BuiltinEnv {
    Countdown(CountdownEnv),
    PointMass(PointMassEnv),
}

macro_rules! delegate {
    ($self:ident, $env:ident => $call:expr) => {
        match $self {
            BuiltinEnv::Countdown($env) => $call,
            BuiltinEnv::PointMass($env) => $call,
        }
    };
}

impl Env for BuiltinEnv {
    fn reset(&mut self, seed: u64) -> Result<Tensor> {
        delegate!(self, env => env.reset(seed))
    }

    fn reset_task(&mut self) -> Result<Tensor> {
        delegate!(self, env => env.reset_task())
    }

    fn step(&mut self, action: &Action) -> Result<SnapShot> {
        delegate!(self, env => env.step(action))
    }

    fn render(&mut self) -> Result<()> {
        delegate!(self, env => env.render())
    }

    fn env_description(&self) -> EnvironmentDescription {
        delegate!(self, env => env.env_description())
    }

    fn kind(&self) -> EnvKind {
        delegate!(self, env => env.kind())
    }

    fn extra_attributes(&self) -> ExtraAttributes {
        delegate!(self, env => env.extra_attributes())
    }
}
