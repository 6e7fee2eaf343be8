use candle_core::{DType, Device, Tensor};
use mbrl_core::{
    env::{Action, Env, EnvKind, EnvironmentDescription, ExtraAttributes, Info, SnapShot, Space},
    error::{Error, Result},
};
use rand::{Rng, SeedableRng, rngs::StdRng};

const STEP_SIZE: f32 = 0.1;
const GOAL_RADIUS: f32 = 0.05;

/// Point masses on the unit square, each steering towards a shared goal.
///
/// Observation per agent: `[x, y, goal_x - x, goal_y - y]`. Action per agent: a velocity in
/// `[-1, 1]^2`. The reward is the negative distance to the goal. An agent is done once it reaches
/// the goal, and every agent is done when the episode runs out of steps.
#[derive(Debug, Clone)]
pub struct PointMassEnv {
    agents: usize,
    max_steps: usize,
    steps: usize,
    positions: Vec<[f32; 2]>,
    goal: [f32; 2],
    rng: StdRng,
}

impl PointMassEnv {
    pub fn new(agents: usize, max_steps: usize) -> Self {
        Self {
            agents,
            max_steps,
            steps: 0,
            positions: vec![[0.5, 0.5]; agents],
            goal: [0.5, 0.5],
            rng: StdRng::seed_from_u64(0),
        }
    }

    fn distance(&self, agent: usize) -> f32 {
        let [x, y] = self.positions[agent];
        ((self.goal[0] - x).powi(2) + (self.goal[1] - y).powi(2)).sqrt()
    }

    fn observation(&self) -> Result<Tensor> {
        let data: Vec<f32> = self
            .positions
            .iter()
            .flat_map(|[x, y]| [*x, *y, self.goal[0] - x, self.goal[1] - y])
            .collect();
        Ok(Tensor::from_vec(data, (self.agents, 4), &Device::Cpu)?)
    }

    fn random_point(&mut self) -> [f32; 2] {
        [self.rng.random(), self.rng.random()]
    }
}

impl Env for PointMassEnv {
    fn reset(&mut self, seed: u64) -> Result<Tensor> {
        self.rng = StdRng::seed_from_u64(seed);
        self.steps = 0;
        self.goal = self.random_point();
        self.positions = (0..self.agents).map(|_| self.random_point()).collect();
        self.observation()
    }

    /// Moves the goal without restarting the episode.
    fn reset_task(&mut self) -> Result<Tensor> {
        self.goal = self.random_point();
        self.observation()
    }

    fn step(&mut self, action: &Action) -> Result<SnapShot> {
        let Action::Continuous(velocity) = action else {
            return Err(Error::Unsupported {
                operation: "point mass with a discrete action",
            });
        };
        let velocity = velocity.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        if velocity.len() != self.agents || velocity.iter().any(|v| v.len() != 2) {
            return Err(Error::Unsupported {
                operation: "point mass action must be [agents, 2]",
            });
        }
        for (position, velocity) in self.positions.iter_mut().zip(velocity) {
            for axis in 0..2 {
                let delta = STEP_SIZE * velocity[axis].clamp(-1., 1.);
                position[axis] = (position[axis] + delta).clamp(0., 1.);
            }
        }
        self.steps += 1;
        let out_of_time = self.steps >= self.max_steps;
        let distances: Vec<f32> = (0..self.agents).map(|agent| self.distance(agent)).collect();
        let mut info = Info::default();
        info.values.insert("steps".into(), self.steps as f32);
        Ok(SnapShot {
            state: self.observation()?,
            reward: distances.iter().map(|d| -d).collect(),
            done: distances
                .iter()
                .map(|d| out_of_time || *d < GOAL_RADIUS)
                .collect(),
            info,
        })
    }

    fn render(&mut self) -> Result<()> {
        tracing::info!(goal = ?self.goal, positions = ?self.positions, "point mass");
        Ok(())
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(
            Space::continuous_from_dims(vec![4]),
            Space::Continuous {
                min: Some(vec![-1., -1.]),
                max: Some(vec![1., 1.]),
                dims: vec![2],
            },
            self.agents,
        )
    }

    fn kind(&self) -> EnvKind {
        EnvKind::new("point-mass")
    }

    fn extra_attributes(&self) -> ExtraAttributes {
        ExtraAttributes::from([
            ("max_steps".to_string(), self.max_steps.to_string()),
            ("step_size".to_string(), STEP_SIZE.to_string()),
        ])
    }
}

#[cfg(test)]
mod test {
    use super::PointMassEnv;
    use candle_core::{Device, Tensor};
    use mbrl_core::env::{Action, Env};

    fn towards_goal(observation: &Tensor) -> Action {
        let offsets = observation.narrow(1, 2, 2).unwrap();
        Action::Continuous((offsets * 10.).unwrap())
    }

    #[test]
    fn same_seed_same_episode() {
        let mut a = PointMassEnv::new(2, 10);
        let mut b = PointMassEnv::new(2, 10);
        let oa = a.reset(42).unwrap();
        let ob = b.reset(42).unwrap();
        assert_eq!(oa.to_vec2::<f32>().unwrap(), ob.to_vec2::<f32>().unwrap());
        assert_eq!(oa.dims(), &[2, 4]);
    }

    #[test]
    fn steering_towards_the_goal_improves_reward() {
        let mut env = PointMassEnv::new(1, 100);
        let mut observation = env.reset(3).unwrap();
        let mut last_reward = f32::NEG_INFINITY;
        for _ in 0..3 {
            let snapshot = env.step(&towards_goal(&observation)).unwrap();
            assert!(snapshot.reward[0] >= last_reward);
            last_reward = snapshot.reward[0];
            observation = snapshot.state;
        }
    }

    #[test]
    fn episode_ends_after_max_steps() {
        let mut env = PointMassEnv::new(3, 2);
        env.reset(1).unwrap();
        let still = Action::Continuous(Tensor::zeros((3, 2), candle_core::DType::F32, &Device::Cpu).unwrap());
        assert!(!env.step(&still).unwrap().all_done());
        assert!(env.step(&still).unwrap().all_done());
    }

    #[test]
    fn reset_task_moves_only_the_goal() {
        let mut env = PointMassEnv::new(1, 10);
        let before = env.reset(5).unwrap().to_vec2::<f32>().unwrap();
        let after = env.reset_task().unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(before[0][..2], after[0][..2]);
        assert!(env.step(&Action::Discrete(vec![0])).is_err());
    }
}
