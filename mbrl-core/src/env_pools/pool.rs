use crate::{
    env::{Action, EnvKind, EnvironmentDescription, ExtraAttributes, Info},
    env_builder::{EnvBuilder, EnvBuilderType},
    env_pools::{
        WorkerHandle, WorkerHandleKind,
        protocol::{WorkerCommand, WorkerReply},
        subproc_worker::spawn_subproc_workers,
        thread_worker::ThreadWorkerHandle,
    },
    error::{Error, Result},
};
use bincode::Encode;
use candle_core::Tensor;
use std::{path::Path, time::Duration};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker `i` draws its reset seeds from a generator seeded with `seed + i`.
    pub seed: u64,
    /// Ask every worker for its spaces and agent count at construction, not only worker 0.
    pub verify_workers: bool,
    /// Upper bound on how long a thread worker may take to answer. `None` waits forever.
    pub reply_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            verify_workers: false,
            reply_timeout: None,
        }
    }
}

/// Result of one vectorized step, in worker index order.
#[derive(Debug)]
pub struct VecStep {
    /// `[workers, agents, obs]`
    pub observations: Tensor,
    pub rewards: Vec<Vec<f32>>,
    pub dones: Vec<Vec<bool>>,
    pub infos: Vec<Info>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Pending,
    Failed,
    Closed,
}

/// Several copies of one environment behind a single vectorized interface.
pub struct EnvPool {
    workers: Vec<WorkerHandleKind>,
    phase: Phase,
    description: EnvironmentDescription,
    env_kind: EnvKind,
    extra_attributes: ExtraAttributes,
}

fn unexpected(worker: usize, reply: WorkerReply) -> Error {
    match reply {
        WorkerReply::Failed { reason } => Error::WorkerFailed { worker, reason },
        reply => Error::WorkerFailed {
            worker,
            reason: format!("unexpected {} reply", reply.name()),
        },
    }
}

fn round_trip(
    worker: &mut WorkerHandleKind,
    idx: usize,
    command: WorkerCommand,
) -> Result<WorkerReply> {
    worker.send(command)?;
    match worker.recv()? {
        WorkerReply::Failed { reason } => Err(Error::WorkerFailed {
            worker: idx,
            reason,
        }),
        reply => Ok(reply),
    }
}

fn query_description(
    worker: &mut WorkerHandleKind,
    idx: usize,
) -> Result<EnvironmentDescription> {
    let (observation_space, action_space) = match round_trip(worker, idx, WorkerCommand::GetSpaces)? {
        WorkerReply::Spaces {
            observation_space,
            action_space,
        } => (observation_space, action_space),
        reply => return Err(unexpected(idx, reply)),
    };
    let agent_count = match round_trip(worker, idx, WorkerCommand::GetAgentCount)? {
        WorkerReply::AgentCount(count) => count,
        reply => return Err(unexpected(idx, reply)),
    };
    Ok(EnvironmentDescription::new(
        observation_space,
        action_space,
        agent_count,
    ))
}

fn handshake(
    workers: &mut [WorkerHandleKind],
    config: &PoolConfig,
) -> Result<(EnvironmentDescription, EnvKind, ExtraAttributes)> {
    // every worker reports once its environment is built
    for (idx, worker) in workers.iter_mut().enumerate() {
        match worker.recv()? {
            WorkerReply::Ready => {}
            reply => return Err(unexpected(idx, reply)),
        }
    }
    let Some(first) = workers.first_mut() else {
        return Err(Error::PoolState {
            reason: "a pool needs at least one worker",
        });
    };
    let description = query_description(first, 0)?;
    let env_kind = match round_trip(first, 0, WorkerCommand::GetEnvKind)? {
        WorkerReply::EnvKind(kind) => kind,
        reply => return Err(unexpected(0, reply)),
    };
    let extra_attributes = match round_trip(first, 0, WorkerCommand::GetExtraAttributes)? {
        WorkerReply::ExtraAttributes(attributes) => attributes,
        reply => return Err(unexpected(0, reply)),
    };
    if config.verify_workers {
        for (idx, worker) in workers.iter_mut().enumerate().skip(1) {
            let other = query_description(worker, idx)?;
            if other != description {
                return Err(Error::ConfigurationMismatch {
                    worker: idx,
                    detail: format!("expected {description:?}, got {other:?}"),
                });
            }
        }
    }
    Ok((description, env_kind, extra_attributes))
}

impl EnvPool {
    /// Takes over already started workers and waits until each of them is ready.
    pub fn from_handles(mut workers: Vec<WorkerHandleKind>, config: &PoolConfig) -> Result<Self> {
        match handshake(&mut workers, config) {
            Ok((description, env_kind, extra_attributes)) => {
                tracing::info!(
                    workers = workers.len(),
                    kind = %env_kind,
                    agents = description.agent_count,
                    "environment pool ready"
                );
                Ok(Self {
                    workers,
                    phase: Phase::Idle,
                    description,
                    env_kind,
                    extra_attributes,
                })
            }
            Err(err) => {
                tracing::warn!(%err, "environment pool could not start");
                workers.iter_mut().for_each(|worker| worker.abandon());
                Err(err)
            }
        }
    }

    /// One OS thread per environment.
    pub fn threaded<EB: EnvBuilder>(builders: EnvBuilderType<EB>, config: PoolConfig) -> Result<Self> {
        let mut workers = vec![];
        for (worker_id, builder) in builders.builders().into_iter().enumerate() {
            let handle =
                ThreadWorkerHandle::spawn(worker_id, config.seed, builder, config.reply_timeout);
            match handle {
                Ok(handle) => workers.push(WorkerHandleKind::from(handle)),
                Err(err) => {
                    workers.iter_mut().for_each(|worker: &mut WorkerHandleKind| worker.abandon());
                    return Err(err);
                }
            }
        }
        Self::from_handles(workers, &config)
    }

    /// One child process per environment. `program` is the worker binary.
    pub fn subprocess<EB: EnvBuilder + Encode>(
        program: impl AsRef<Path>,
        builders: EnvBuilderType<EB>,
        config: PoolConfig,
    ) -> Result<Self> {
        if config.reply_timeout.is_some() {
            tracing::warn!("reply_timeout only applies to thread workers");
        }
        let handles = spawn_subproc_workers(program.as_ref(), &builders.builders(), config.seed)?;
        let workers = handles.into_iter().map(WorkerHandleKind::from).collect();
        Self::from_handles(workers, &config)
    }

    pub fn num_envs(&self) -> usize {
        self.workers.len()
    }

    pub fn description(&self) -> &EnvironmentDescription {
        &self.description
    }

    pub fn env_kind(&self) -> &EnvKind {
        &self.env_kind
    }

    pub fn extra_attributes(&self) -> &ExtraAttributes {
        &self.extra_attributes
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    fn ensure_idle(&self) -> Result<()> {
        let reason = match self.phase {
            Phase::Idle => return Ok(()),
            Phase::Pending => "a step is still pending, call step_wait first",
            Phase::Failed => "a worker failed, the pool has to be closed",
            Phase::Closed => "the pool is closed",
        };
        Err(Error::PoolState { reason })
    }

    fn fail(&mut self, err: Error) -> Error {
        tracing::error!(%err, "environment pool failed");
        self.phase = Phase::Failed;
        err
    }

    fn broadcast(&mut self, command: &WorkerCommand) -> Result<()> {
        let mut result = Ok(());
        for worker in self.workers.iter_mut() {
            result = worker.send(command.clone());
            if result.is_err() {
                break;
            }
        }
        result.map_err(|err| self.fail(err))
    }

    fn send_each(&mut self, commands: Vec<WorkerCommand>) -> Result<()> {
        let mut result = Ok(());
        for (worker, command) in self.workers.iter_mut().zip(commands) {
            result = worker.send(command);
            if result.is_err() {
                break;
            }
        }
        result.map_err(|err| self.fail(err))
    }

    /// Collects one reply per worker in index order. Any failure fails the whole batch.
    fn gather<T>(&mut self, mut accept: impl FnMut(usize, WorkerReply) -> Result<T>) -> Result<Vec<T>> {
        let mut replies = Vec::with_capacity(self.workers.len());
        let mut failure = None;
        for (idx, worker) in self.workers.iter_mut().enumerate() {
            match worker.recv().and_then(|reply| accept(idx, reply)) {
                Ok(reply) => replies.push(reply),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        match failure {
            Some(err) => Err(self.fail(err)),
            None => Ok(replies),
        }
    }

    fn gather_observations(&mut self) -> Result<Tensor> {
        let observations = self.gather(|idx, reply| match reply {
            WorkerReply::Observation(observation) => Ok(observation),
            reply => Err(unexpected(idx, reply)),
        })?;
        Ok(Tensor::stack(&observations, 0)?)
    }

    /// Resets every environment and returns the stacked `[workers, agents, obs]` observations.
    pub fn reset(&mut self) -> Result<Tensor> {
        self.ensure_idle()?;
        self.broadcast(&WorkerCommand::Reset)?;
        self.gather_observations()
    }

    pub fn reset_task(&mut self) -> Result<Tensor> {
        self.ensure_idle()?;
        self.broadcast(&WorkerCommand::ResetTask)?;
        self.gather_observations()
    }

    /// Hands one action to every worker without waiting for the results.
    pub fn step_async(&mut self, actions: Vec<Action>) -> Result<()> {
        self.ensure_idle()?;
        if actions.len() != self.workers.len() {
            return Err(Error::ActionCountMismatch {
                expected: self.workers.len(),
                actual: actions.len(),
            });
        }
        let commands = actions
            .into_iter()
            .map(|action| WorkerCommand::Step { action })
            .collect();
        self.send_each(commands)?;
        self.phase = Phase::Pending;
        Ok(())
    }

    pub fn step_wait(&mut self) -> Result<VecStep> {
        if self.phase != Phase::Pending {
            self.ensure_idle()?;
            return Err(Error::PoolState {
                reason: "step_wait called without a pending step_async",
            });
        }
        let snapshots = self.gather(|idx, reply| match reply {
            WorkerReply::Step(snapshot) => Ok(snapshot),
            reply => Err(unexpected(idx, reply)),
        })?;
        self.phase = Phase::Idle;
        let mut states = Vec::with_capacity(snapshots.len());
        let mut rewards = Vec::with_capacity(snapshots.len());
        let mut dones = Vec::with_capacity(snapshots.len());
        let mut infos = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            states.push(snapshot.state);
            rewards.push(snapshot.reward);
            dones.push(snapshot.done);
            infos.push(snapshot.info);
        }
        Ok(VecStep {
            observations: Tensor::stack(&states, 0)?,
            rewards,
            dones,
            infos,
        })
    }

    pub fn step(&mut self, actions: Vec<Action>) -> Result<VecStep> {
        self.step_async(actions)?;
        self.step_wait()
    }

    /// Fire and forget, nothing is read back.
    pub fn render(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.broadcast(&WorkerCommand::Render)
    }

    /// Shuts every worker down. Outstanding step replies are drained first. Closing twice is a
    /// no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.phase == Phase::Closed {
            return Ok(());
        }
        if self.phase == Phase::Pending {
            for (idx, worker) in self.workers.iter_mut().enumerate() {
                match worker.recv() {
                    Ok(WorkerReply::Failed { reason }) => {
                        tracing::warn!(worker = idx, %reason, "worker failed during the pending step");
                        self.phase = Phase::Failed;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(worker = idx, %err, "could not drain pending step");
                        self.phase = Phase::Failed;
                    }
                }
            }
        }
        let mut result = Ok(());
        if self.phase == Phase::Failed {
            self.workers.iter_mut().for_each(|worker| worker.abandon());
        } else {
            for worker in self.workers.iter_mut() {
                if let Err(err) = worker.send(WorkerCommand::Close) {
                    worker.abandon();
                    result = result.and(Err(err));
                }
            }
            for worker in self.workers.iter_mut() {
                result = result.and(worker.join());
            }
        }
        self.phase = Phase::Closed;
        tracing::debug!(workers = self.workers.len(), "environment pool closed");
        result
    }
}

impl Drop for EnvPool {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(%err, "environment pool did not close cleanly");
        }
    }
}
