use crate::{
    env::{Action, Env, SnapShot},
    env_builder::EnvBuilder,
    env_pools::protocol::{WorkerCommand, WorkerReply},
    error::Result,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// The worker side of a command channel.
pub trait WorkerLink {
    fn recv_command(&mut self) -> Result<WorkerCommand>;

    fn send_reply(&mut self, reply: WorkerReply) -> Result<()>;
}

/// Owns one environment and serves commands for it, one at a time.
pub struct EnvWorker<E: Env> {
    worker_id: usize,
    env: E,
    rng: StdRng,
}

impl<E: Env> EnvWorker<E> {
    pub fn new(worker_id: usize, seed: u64, env: E) -> Self {
        Self {
            worker_id,
            env,
            rng: StdRng::seed_from_u64(seed.wrapping_add(worker_id as u64)),
        }
    }

    fn reset(&mut self) -> Result<candle_core::Tensor> {
        let seed = self.rng.random::<u64>();
        self.env.reset(seed)
    }

    fn step(&mut self, action: &Action) -> Result<SnapShot> {
        let mut snapshot = self.env.step(action)?;
        if snapshot.all_done() {
            let observation = self.reset()?;
            let terminal_observation = std::mem::replace(&mut snapshot.state, observation);
            snapshot.info.terminal_observation = Some(terminal_observation);
        }
        Ok(snapshot)
    }

    pub fn handle_command(&mut self, command: WorkerCommand) -> Result<Option<WorkerReply>> {
        let reply = match command {
            WorkerCommand::Step { action } => WorkerReply::Step(self.step(&action)?),
            WorkerCommand::Reset => WorkerReply::Observation(self.reset()?),
            WorkerCommand::ResetTask => WorkerReply::Observation(self.env.reset_task()?),
            WorkerCommand::Render => {
                self.env.render()?;
                return Ok(None);
            }
            WorkerCommand::GetSpaces => {
                let description = self.env.env_description();
                WorkerReply::Spaces {
                    observation_space: description.observation_space,
                    action_space: description.action_space,
                }
            }
            WorkerCommand::GetAgentCount => {
                WorkerReply::AgentCount(self.env.env_description().agent_count)
            }
            WorkerCommand::GetEnvKind => WorkerReply::EnvKind(self.env.kind()),
            WorkerCommand::GetExtraAttributes => {
                WorkerReply::ExtraAttributes(self.env.extra_attributes())
            }
            WorkerCommand::Close => return Ok(None),
        };
        Ok(Some(reply))
    }

    /// Serves commands until `Close` arrives. An environment error is reported to the owner before
    /// the worker gives up.
    pub fn serve<L: WorkerLink>(mut self, link: &mut L) -> Result<()> {
        loop {
            let command = link.recv_command()?;
            if matches!(command, WorkerCommand::Close) {
                tracing::debug!(worker = self.worker_id, "worker closing");
                return Ok(());
            }
            match self.handle_command(command) {
                Ok(Some(reply)) => link.send_reply(reply)?,
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(worker = self.worker_id, %err, "environment failed");
                    link.send_reply(WorkerReply::Failed {
                        reason: err.to_string(),
                    })?;
                    return Err(err);
                }
            }
        }
    }
}

/// Builds the environment, reports `Ready` (or `Failed`) and serves until closed.
pub fn run_worker<EB: EnvBuilder, L: WorkerLink>(
    worker_id: usize,
    seed: u64,
    builder: &EB,
    link: &mut L,
) -> Result<()> {
    let env = match builder.build_env() {
        Ok(env) => env,
        Err(err) => {
            tracing::warn!(worker = worker_id, %err, "could not build environment");
            link.send_reply(WorkerReply::Failed {
                reason: err.to_string(),
            })?;
            return Err(err);
        }
    };
    link.send_reply(WorkerReply::Ready)?;
    EnvWorker::new(worker_id, seed, env).serve(link)
}
