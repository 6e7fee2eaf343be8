use mbrl_core::{
    env::{Action, EnvKind},
    env_builder::EnvBuilderType,
    env_pools::{EnvPool, PoolConfig},
    error::Error,
};
use mbrl_envs::EnvConfig;
use std::{sync::Arc, time::Duration};

fn countdown_pool(n_envs: usize, agents: usize, length: usize) -> EnvPool {
    let builders = EnvBuilderType::EnvBuilder {
        builder: Arc::new(EnvConfig::Countdown { agents, length }),
        n_envs,
    };
    EnvPool::threaded(builders, PoolConfig::default()).unwrap()
}

fn noop(n_envs: usize, agents: usize) -> Vec<Action> {
    vec![Action::Discrete(vec![0; agents]); n_envs]
}

#[test]
fn finished_workers_reset_and_report_the_terminal_observation() {
    let mut pool = countdown_pool(3, 1, 2);
    assert_eq!(pool.num_envs(), 3);
    assert_eq!(pool.env_kind(), &EnvKind::new("countdown"));

    let start = pool.reset().unwrap();
    assert_eq!(start.dims(), &[3, 1, 1]);

    let first = pool.step(noop(3, 1)).unwrap();
    assert!(first.dones.iter().flatten().all(|done| !done));
    assert!(first.infos.iter().all(|info| info.terminal_observation.is_none()));
    assert_eq!(first.rewards, vec![vec![1.]; 3]);

    let second = pool.step(noop(3, 1)).unwrap();
    assert!(second.dones.iter().flatten().all(|done| *done));
    assert_eq!(
        second.observations.to_vec3::<f32>().unwrap(),
        start.to_vec3::<f32>().unwrap()
    );
    for info in &second.infos {
        let terminal = info.terminal_observation.as_ref().unwrap();
        assert_eq!(terminal.to_vec2::<f32>().unwrap(), vec![vec![0.]]);
    }
    pool.close().unwrap();
    assert!(pool.is_closed());
}

#[test]
fn wrong_action_count_leaves_the_pool_usable() {
    let mut pool = countdown_pool(2, 2, 3);
    pool.reset().unwrap();
    let err = pool.step(noop(1, 2)).unwrap_err();
    assert!(matches!(
        err,
        Error::ActionCountMismatch {
            expected: 2,
            actual: 1
        }
    ));
    let step = pool.step(noop(2, 2)).unwrap();
    assert_eq!(step.observations.dims(), &[2, 2, 1]);
}

#[test]
fn a_failing_environment_fails_the_pool() {
    let mut pool = countdown_pool(2, 2, 3);
    pool.reset().unwrap();
    // one agent short, the countdown rejects it inside the worker
    let actions = vec![Action::Discrete(vec![0, 0]), Action::Discrete(vec![0])];
    assert!(pool.step(actions).is_err());
    assert!(pool.step(noop(2, 2)).is_err());
    pool.close().unwrap();
}

#[test]
fn unsupported_reset_task_is_reported() {
    let mut pool = countdown_pool(1, 1, 3);
    pool.reset().unwrap();
    assert!(pool.reset_task().is_err());
}

#[test]
fn point_mass_pool_supports_tasks_and_rendering() {
    let builders = EnvBuilderType::EnvBuilderVec {
        builders: vec![
            Arc::new(EnvConfig::PointMass {
                agents: 2,
                max_steps: 5,
            }),
            Arc::new(EnvConfig::PointMass {
                agents: 2,
                max_steps: 5,
            }),
        ],
    };
    let config = PoolConfig {
        seed: 11,
        verify_workers: true,
        reply_timeout: Some(Duration::from_secs(5)),
    };
    let mut pool = EnvPool::threaded(builders, config).unwrap();
    assert_eq!(pool.description().agent_count, 2);
    assert_eq!(pool.extra_attributes()["max_steps"], "5");

    let start = pool.reset().unwrap();
    assert_eq!(start.dims(), &[2, 2, 4]);
    let tasks = pool.reset_task().unwrap();
    assert_eq!(tasks.dims(), &[2, 2, 4]);
    pool.render().unwrap();
}

#[test]
fn mismatched_workers_are_rejected_when_verified() {
    let builders = EnvBuilderType::EnvBuilderVec {
        builders: vec![
            Arc::new(EnvConfig::Countdown {
                agents: 1,
                length: 2,
            }),
            Arc::new(EnvConfig::Countdown {
                agents: 2,
                length: 2,
            }),
        ],
    };
    let config = PoolConfig {
        verify_workers: true,
        ..PoolConfig::default()
    };
    let err = EnvPool::threaded(builders, config).err().unwrap();
    assert!(matches!(err, Error::ConfigurationMismatch { worker: 1, .. }));
}
