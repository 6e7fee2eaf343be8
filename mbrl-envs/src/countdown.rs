use candle_core::{Device, Tensor};
use mbrl_core::{
    env::{Action, Env, EnvKind, EnvironmentDescription, ExtraAttributes, Info, SnapShot, Space},
    error::{Error, Result},
};

/// Every agent observes the number of steps left in the episode. All agents finish together once
/// the count reaches zero. Rewards are one per step, actions are ignored.
#[derive(Debug, Clone)]
pub struct CountdownEnv {
    agents: usize,
    length: usize,
    remaining: usize,
}

impl CountdownEnv {
    pub fn new(agents: usize, length: usize) -> Self {
        Self {
            agents,
            length,
            remaining: length,
        }
    }

    fn observation(&self) -> Result<Tensor> {
        let data = vec![self.remaining as f32; self.agents];
        Ok(Tensor::from_vec(data, (self.agents, 1), &Device::Cpu)?)
    }
}

impl Env for CountdownEnv {
    fn reset(&mut self, _seed: u64) -> Result<Tensor> {
        self.remaining = self.length;
        self.observation()
    }

    fn step(&mut self, action: &Action) -> Result<SnapShot> {
        if action.agent_count()? != self.agents {
            return Err(Error::Unsupported {
                operation: "countdown step with the wrong number of agents",
            });
        }
        self.remaining = self.remaining.saturating_sub(1);
        let done = self.remaining == 0;
        Ok(SnapShot {
            state: self.observation()?,
            reward: vec![1.; self.agents],
            done: vec![done; self.agents],
            info: Info::default(),
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(
            Space::continuous_from_dims(vec![1]),
            Space::Discrete(2),
            self.agents,
        )
    }

    fn kind(&self) -> EnvKind {
        EnvKind::new("countdown")
    }

    fn extra_attributes(&self) -> ExtraAttributes {
        ExtraAttributes::from([("length".to_string(), self.length.to_string())])
    }
}

#[cfg(test)]
mod test {
    use super::CountdownEnv;
    use mbrl_core::env::{Action, Env};

    #[test]
    fn counts_down_to_done() {
        let mut env = CountdownEnv::new(2, 2);
        let start = env.reset(0).unwrap();
        assert_eq!(start.to_vec2::<f32>().unwrap(), vec![vec![2.], vec![2.]]);
        let first = env.step(&Action::Discrete(vec![0, 1])).unwrap();
        assert_eq!(first.done, vec![false, false]);
        let second = env.step(&Action::Discrete(vec![1, 1])).unwrap();
        assert!(second.all_done());
        assert_eq!(second.state.to_vec2::<f32>().unwrap(), vec![vec![0.], vec![0.]]);
    }

    #[test]
    fn wrong_agent_count_is_an_error() {
        let mut env = CountdownEnv::new(2, 2);
        env.reset(0).unwrap();
        assert!(env.step(&Action::Discrete(vec![0])).is_err());
    }
}
