pub mod pool;
pub mod protocol;
pub mod subproc_worker;
pub mod thread_worker;
pub mod worker;

use crate::{
    env_pools::{
        protocol::{WorkerCommand, WorkerReply},
        subproc_worker::SubprocWorkerHandle,
        thread_worker::ThreadWorkerHandle,
    },
    error::Result,
};
use enum_dispatch::enum_dispatch;

pub use pool::{EnvPool, PoolConfig, VecStep};

/// The owner side of a worker, whatever transport it runs on.
#[enum_dispatch]
pub trait WorkerHandle {
    fn send(&mut self, command: WorkerCommand) -> Result<()>;

    fn recv(&mut self) -> Result<WorkerReply>;

    /// Waits for a worker that was sent `Close`.
    fn join(&mut self) -> Result<()>;

    /// Lets go of a worker that can not be closed cleanly.
    fn abandon(&mut self);
}

#[enum_dispatch(WorkerHandle)]
pub enum WorkerHandleKind {
    Thread(ThreadWorkerHandle),
    Subproc(SubprocWorkerHandle),
}
