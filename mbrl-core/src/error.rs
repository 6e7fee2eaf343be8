use derive_more::{Display, Error, From};

#[derive(Debug, Display, Error, From)]
pub enum Error {
    /// Sampling asked for more transitions than the buffer holds. Callers are expected to check
    /// the buffer length first.
    #[display("requested {requested} transitions but only {available} are stored")]
    InsufficientData { requested: usize, available: usize },
    /// The worker did not answer, either because its channel was closed or because the reply
    /// timeout ran out. The pool cannot be used afterwards.
    #[display("environment worker {worker} is not responding")]
    WorkerUnresponsive {
        #[error(not(source))]
        worker: usize,
    },
    /// The worker reported that its environment failed and shut itself down.
    #[display("environment worker {worker} failed: {reason}")]
    WorkerFailed { worker: usize, reason: String },
    #[display("environment worker {worker} is configured differently from worker 0: {detail}")]
    ConfigurationMismatch { worker: usize, detail: String },
    #[display("invalid pool state: {reason}")]
    PoolState {
        #[error(not(source))]
        reason: &'static str,
    },
    #[display("expected one action per worker ({expected}), got {actual}")]
    ActionCountMismatch { expected: usize, actual: usize },
    #[display("operation not supported by this environment: {operation}")]
    Unsupported {
        #[error(not(source))]
        operation: &'static str,
    },
    #[display("dynamics model output is malformed: {reason}")]
    ModelOutput {
        #[error(not(source))]
        reason: String,
    },
    #[display("codec error: {reason}")]
    Codec {
        #[error(not(source))]
        reason: String,
    },
    #[from]
    #[display("io error: {_0}")]
    Io(std::io::Error),
    #[from]
    #[display("tensor error: {_0}")]
    Tensor(candle_core::Error),
}

impl Error {
    pub fn codec(err: impl std::fmt::Display) -> Self {
        Self::Codec {
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
