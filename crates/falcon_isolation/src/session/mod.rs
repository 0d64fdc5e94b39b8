//! Database sessions used by the isolation engine.
//!
//! Two capability profiles share one interface:
//!
//! - [`Session`]: run a statement and wait for it. The maintenance connection
//!   uses only this.
//! - [`AsyncSession`]: additionally dispatch a statement without waiting and
//!   poll for its completion in short bounded intervals. Every named test
//!   session is one of these, so the engine can move on while a statement is
//!   stuck behind a lock.
//!
//! The engine picks the profile when it builds its sessions and never
//! inspects it afterwards.

pub mod pg;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::ConnectionConfig;
use crate::error::SessionError;
use crate::format::QueryResult;

pub use pg::{PgAsyncSession, PgSyncSession};

/// Outcome of one bounded poll for a dispatched statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The driver has no data yet; poll again.
    Pending,
    /// The statement finished and produced this result.
    Ready(QueryResult),
}

/// A connection that executes statements synchronously.
#[async_trait]
pub trait Session: Send {
    /// Label used in logs (`Maint` or the session tag).
    fn name(&self) -> &str;

    /// Backend process id of the server side of this connection.
    fn backend_pid(&self) -> i32;

    /// Run one statement and wait for its result. A backend error is
    /// returned as [`SessionError::Server`].
    async fn execute(&mut self, sql: &str) -> Result<QueryResult, SessionError>;

    /// Ask the server to cancel whatever this session is running. The
    /// interrupted statement still reports its own error through the
    /// normal result path.
    async fn cancel_backend(&mut self) -> Result<(), SessionError>;

    /// Toggle commit-per-statement behaviour.
    async fn set_autocommit(&mut self, on: bool) -> Result<(), SessionError>;

    async fn close(&mut self) -> Result<(), SessionError>;
}

/// A connection that can dispatch a statement and poll for its result.
///
/// At most one statement is in flight per session. Asynchronous sessions are
/// always in autocommit mode; `set_autocommit(false)` fails with
/// [`SessionError::AutocommitUnsupported`].
#[async_trait]
pub trait AsyncSession: Session {
    /// Dispatch `sql` without waiting for it.
    async fn send_sql(&mut self, sql: &str) -> Result<(), SessionError>;

    /// Wait at most `poll` for the in-flight statement.
    ///
    /// `Ok(Completion::Pending)` means the driver has nothing yet. A backend
    /// error completes the statement and is returned as `Err`.
    async fn try_complete_current_execution(
        &mut self,
        poll: Duration,
    ) -> Result<Completion, SessionError>;
}

/// Parameters for opening one connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    /// Statements run right after connecting, before the session is handed
    /// to the engine.
    pub init_statements: Vec<String>,
}

impl ConnectOptions {
    pub fn new(connection: &ConnectionConfig, init_statements: Vec<String>) -> Self {
        Self {
            host: connection.host.clone(),
            port: connection.port,
            dbname: connection.dbname.clone(),
            user: connection.user.clone(),
            password: connection.password.clone(),
            init_statements,
        }
    }

    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.dbname)
    }
}

/// Open the maintenance connection: synchronous, autocommit explicitly on.
pub async fn connect_maintenance(opts: &ConnectOptions) -> Result<PgSyncSession, SessionError> {
    let mut session = PgSyncSession::connect("Maint", opts).await?;
    session.set_autocommit(true).await?;
    Ok(session)
}

/// Open one asynchronous test session named after its spec tag.
pub async fn connect_test_session(
    tag: &str,
    opts: &ConnectOptions,
) -> Result<PgAsyncSession, SessionError> {
    PgAsyncSession::connect(tag, opts).await
}
