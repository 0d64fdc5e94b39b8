use std::time::Duration;

use thiserror::Error;

/// Convenience alias for `Result<T, IsolationError>`.
pub type IsolationResult<T> = Result<T, IsolationError>;

/// Errors that stop an isolation run.
///
/// Per-step SQL failures are not represented here: they are recorded in the
/// engine's error ledger and printed as part of the trace. Only
/// `IsolationError::Driver` carries a backend message out of the engine, and
/// only for statements whose failure cannot be absorbed into the trace.
#[derive(Error, Debug)]
pub enum IsolationError {
    /// Malformed spec text.
    #[error("syntax error at line {line}, column {column}: unexpected {unexpected}")]
    Syntax {
        line: usize,
        column: usize,
        unexpected: String,
    },

    /// A permutation names a step that no session declares.
    #[error("permutation references undefined step \"{0}\"")]
    UnknownStep(String),

    /// A step belongs to a session that has no live connection.
    #[error("no session found for tag \"{0}\"")]
    UnknownSession(String),

    /// A permutation names a step tag declared by more than one session.
    #[error("step \"{0}\" is declared in more than one session")]
    AmbiguousStep(String),

    /// Two sessions share a tag.
    #[error("duplicate session \"{0}\"")]
    DuplicateSession(String),

    /// Two steps of one session share a tag.
    #[error("duplicate step \"{step}\" in session \"{session}\"")]
    DuplicateStep { session: String, step: String },

    /// SQL execution failure outside of the step loop.
    #[error("{0}")]
    Driver(String),

    /// A step neither completed nor reported a lock wait in time.
    #[error("step {step} timed out after {} seconds", .waited.as_secs())]
    LockTimeout { step: String, waited: Duration },

    /// A session could not be established or lost its connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// The spec-level setup block failed; no permutation can run on top of it.
    #[error("setup failed: {0}")]
    SetupFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by a single database session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The backend rejected the statement. Rendered `SEVERITY:  message`.
    #[error("{0}")]
    Server(String),

    /// Transport-level failure; the session is unusable afterwards.
    #[error("{0}")]
    Connection(String),

    /// A statement was dispatched while another one is still in flight.
    #[error("session {0} already has a statement in progress")]
    Busy(String),

    /// A result was requested but nothing was dispatched.
    #[error("session {0} has no statement in progress")]
    Idle(String),

    /// Asynchronous sessions always run in autocommit mode.
    #[error("autocommit cannot be disabled on asynchronous session {0}")]
    AutocommitUnsupported(String),
}

impl SessionError {
    pub fn is_server_error(&self) -> bool {
        matches!(self, SessionError::Server(_))
    }
}

impl From<SessionError> for IsolationError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Server(msg) => IsolationError::Driver(msg),
            SessionError::Connection(msg) => IsolationError::Connection(msg),
            other => IsolationError::Driver(other.to_string()),
        }
    }
}
