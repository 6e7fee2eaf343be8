use crate::{
    env_builder::EnvBuilder,
    env_pools::{
        WorkerHandle,
        protocol::{WorkerCommand, WorkerReply},
        worker::{WorkerLink, run_worker},
    },
    error::{Error, Result},
};
use crossbeam::channel::{Receiver, Sender};
use std::{sync::Arc, thread::JoinHandle, time::Duration};

struct ChannelLink {
    commands: Receiver<WorkerCommand>,
    replies: Sender<WorkerReply>,
}

impl WorkerLink for ChannelLink {
    fn recv_command(&mut self) -> Result<WorkerCommand> {
        self.commands.recv().map_err(|_| Error::PoolState {
            reason: "the pool dropped its command channel",
        })
    }

    fn send_reply(&mut self, reply: WorkerReply) -> Result<()> {
        self.replies.send(reply).map_err(|_| Error::PoolState {
            reason: "the pool dropped its reply channel",
        })
    }
}

/// A worker running on its own OS thread.
pub struct ThreadWorkerHandle {
    worker_id: usize,
    tx: Sender<WorkerCommand>,
    rx: Receiver<WorkerReply>,
    thread: Option<JoinHandle<()>>,
    reply_timeout: Option<Duration>,
}

impl ThreadWorkerHandle {
    pub fn spawn<EB: EnvBuilder>(
        worker_id: usize,
        seed: u64,
        builder: Arc<EB>,
        reply_timeout: Option<Duration>,
    ) -> Result<Self> {
        let (command_tx, command_rx) = crossbeam::channel::unbounded::<WorkerCommand>();
        let (reply_tx, reply_rx) = crossbeam::channel::unbounded::<WorkerReply>();
        let thread = std::thread::Builder::new()
            .name(format!("env-worker-{worker_id}"))
            .spawn(move || {
                let mut link = ChannelLink {
                    commands: command_rx,
                    replies: reply_tx,
                };
                if let Err(err) = run_worker(worker_id, seed, builder.as_ref(), &mut link) {
                    tracing::debug!(worker = worker_id, %err, "worker thread stopped");
                }
            })?;
        Ok(Self {
            worker_id,
            tx: command_tx,
            rx: reply_rx,
            thread: Some(thread),
            reply_timeout,
        })
    }
}

impl WorkerHandle for ThreadWorkerHandle {
    fn send(&mut self, command: WorkerCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::WorkerUnresponsive {
            worker: self.worker_id,
        })
    }

    fn recv(&mut self) -> Result<WorkerReply> {
        let reply = match self.reply_timeout {
            Some(timeout) => self.rx.recv_timeout(timeout).ok(),
            None => self.rx.recv().ok(),
        };
        reply.ok_or(Error::WorkerUnresponsive {
            worker: self.worker_id,
        })
    }

    fn join(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        thread.join().map_err(|_| Error::WorkerFailed {
            worker: self.worker_id,
            reason: "worker thread panicked".to_string(),
        })
    }

    fn abandon(&mut self) {
        // the thread exits on its own once the command channel is dropped with the handle
        self.thread.take();
    }
}
