use crate::{
    env_builder::EnvBuilder,
    env_pools::{
        WorkerHandle,
        protocol::{WorkerCommand, WorkerReply, WorkerSetup},
        worker::{WorkerLink, run_worker},
    },
    error::{Error, Result},
    ipc::{receive_packet, send_packet},
};
use bincode::{Decode, Encode};
use interprocess::local_socket::{
    GenericNamespaced, Listener, ListenerNonblockingMode, ListenerOptions, Stream, ToNsName,
    traits::{Listener as ListenerTrait, Stream as StreamTrait},
};
use std::{
    io::{BufReader, ErrorKind},
    path::Path,
    process::{Child, Command},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

static POOL_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_socket_name() -> String {
    let pool = POOL_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("mbrl-env-pool-{}-{pool}", std::process::id())
}

/// A worker running in a child process, talking over a local socket.
pub struct SubprocWorkerHandle {
    worker_id: usize,
    child: Child,
    conn: BufReader<Stream>,
}

impl WorkerHandle for SubprocWorkerHandle {
    fn send(&mut self, command: WorkerCommand) -> Result<()> {
        send_packet(self.conn.get_mut(), &command).map_err(|err| {
            tracing::debug!(worker = self.worker_id, %err, "could not reach worker process");
            Error::WorkerUnresponsive {
                worker: self.worker_id,
            }
        })
    }

    fn recv(&mut self) -> Result<WorkerReply> {
        receive_packet(&mut self.conn).map_err(|err| {
            tracing::debug!(worker = self.worker_id, %err, "no reply from worker process");
            Error::WorkerUnresponsive {
                worker: self.worker_id,
            }
        })
    }

    fn join(&mut self) -> Result<()> {
        let status = self.child.wait()?;
        if !status.success() {
            return Err(Error::WorkerFailed {
                worker: self.worker_id,
                reason: format!("worker process exited with {status}"),
            });
        }
        Ok(())
    }

    fn abandon(&mut self) {
        if let Err(err) = self.child.kill() {
            tracing::debug!(worker = self.worker_id, %err, "could not kill worker process");
        }
        let _ = self.child.wait();
    }
}

/// Starts one child process per builder. `program` is the worker binary, it gets the socket name
/// through `--socket-name` and its environment configuration through the setup packet.
pub fn spawn_subproc_workers<EB: EnvBuilder + Encode>(
    program: &Path,
    builders: &[Arc<EB>],
    seed: u64,
) -> Result<Vec<SubprocWorkerHandle>> {
    let socket_name = unique_socket_name();
    let socket_ns_name = socket_name.as_str().to_ns_name::<GenericNamespaced>()?;
    let listener = ListenerOptions::new()
        .name(socket_ns_name)
        .nonblocking(ListenerNonblockingMode::Accept)
        .create_sync()?;
    let mut handles: Vec<SubprocWorkerHandle> = Vec::with_capacity(builders.len());
    for (worker_id, builder) in builders.iter().enumerate() {
        match connect_worker(&listener, program, &socket_name, worker_id, seed, builder.as_ref()) {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                handles.iter_mut().for_each(SubprocWorkerHandle::abandon);
                return Err(err);
            }
        }
    }
    Ok(handles)
}

fn connect_worker<EB: EnvBuilder + Encode>(
    listener: &Listener,
    program: &Path,
    socket_name: &str,
    worker_id: usize,
    seed: u64,
    builder: &EB,
) -> Result<SubprocWorkerHandle> {
    let mut child = Command::new(program)
        .args(["--socket-name", socket_name])
        .spawn()?;
    let conn = match accept_from(listener, &mut child, worker_id) {
        Ok(conn) => conn,
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }
    };
    let mut handle = SubprocWorkerHandle {
        worker_id,
        child,
        conn: BufReader::new(conn),
    };
    let setup = WorkerSetup {
        worker_id,
        seed,
        builder,
    };
    if let Err(err) = send_packet(handle.conn.get_mut(), &setup) {
        handle.abandon();
        return Err(err);
    }
    tracing::debug!(worker = worker_id, socket = %socket_name, "worker process connected");
    Ok(handle)
}

// gives up once the child exits without connecting
fn accept_from(listener: &Listener, child: &mut Child, worker_id: usize) -> Result<Stream> {
    loop {
        match listener.accept() {
            Ok(conn) => {
                conn.set_nonblocking(false)?;
                return Ok(conn);
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => return Err(err.into()),
        }
        if let Some(status) = child.try_wait()? {
            return Err(Error::WorkerFailed {
                worker: worker_id,
                reason: format!("worker process exited with {status} before connecting"),
            });
        }
        std::thread::sleep(ACCEPT_POLL_INTERVAL);
    }
}

struct SocketLink {
    conn: BufReader<Stream>,
}

impl WorkerLink for SocketLink {
    fn recv_command(&mut self) -> Result<WorkerCommand> {
        receive_packet(&mut self.conn)
    }

    fn send_reply(&mut self, reply: WorkerReply) -> Result<()> {
        send_packet(self.conn.get_mut(), &reply)
    }
}

/// Entry point of the worker process: connects back to the pool, reads its setup packet and serves
/// commands until it is told to close.
pub fn serve_subproc_worker<EB: EnvBuilder + Decode<()>>(socket_name: &str) -> Result<()> {
    let socket_ns_name = socket_name.to_ns_name::<GenericNamespaced>()?;
    let conn = Stream::connect(socket_ns_name)?;
    let mut link = SocketLink {
        conn: BufReader::new(conn),
    };
    let WorkerSetup {
        worker_id,
        seed,
        builder,
    }: WorkerSetup<EB> = receive_packet(&mut link.conn)?;
    tracing::info!(worker = worker_id, "worker process started");
    run_worker(worker_id, seed, &builder, &mut link)
}
