use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

use super::{AsyncSession, Completion, ConnectOptions, Session};
use crate::error::SessionError;
use crate::format::{Datum, QueryResult, ResultSet};

type InFlight = JoinHandle<Result<Vec<SimpleQueryMessage>, tokio_postgres::Error>>;

impl SessionError {
    /// Backend errors keep the server's severity and message verbatim;
    /// anything else means the connection is gone.
    pub fn from_pg(e: tokio_postgres::Error) -> Self {
        match e.as_db_error() {
            Some(db) => SessionError::Server(format!("{}:  {}", db.severity(), db.message())),
            None => SessionError::Connection(e.to_string()),
        }
    }
}

/// State shared by both session profiles.
struct PgConnection {
    name: String,
    client: Option<Arc<Client>>,
    backend_pid: i32,
    driver: JoinHandle<()>,
}

impl PgConnection {
    async fn open(name: &str, opts: &ConnectOptions) -> Result<Self, SessionError> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&opts.host)
            .port(opts.port)
            .dbname(&opts.dbname)
            .user(&opts.user)
            .application_name(name);
        if let Some(password) = &opts.password {
            config.password(password);
        }
        debug!(
            "Connecting session {}: host={} port={} user={} dbname={}",
            name, opts.host, opts.port, opts.user, opts.dbname
        );

        let (client, connection) = config.connect(NoTls).await.map_err(|e| {
            SessionError::Connection(format!("failed to connect to {}: {}", opts.target(), e))
        })?;

        // Spawn the connection driver
        let label = name.to_string();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("Connection error on session {}: {}", label, e);
            }
        });

        let mut conn = Self {
            name: name.to_string(),
            client: Some(Arc::new(client)),
            backend_pid: 0,
            driver,
        };
        for sql in &opts.init_statements {
            conn.run(sql).await?;
        }
        let pid = conn.run("SELECT pg_backend_pid()").await?;
        conn.backend_pid = match pid.scalar() {
            Some(Datum::Text(text)) => text.trim().parse().map_err(|_| {
                SessionError::Connection(format!("unexpected backend pid {:?}", text))
            })?,
            other => {
                return Err(SessionError::Connection(format!(
                    "unexpected backend pid {:?}",
                    other
                )))
            }
        };
        debug!("Session {} has backend pid {}", conn.name, conn.backend_pid);
        Ok(conn)
    }

    fn client(&self) -> Result<&Arc<Client>, SessionError> {
        self.client
            .as_ref()
            .ok_or_else(|| SessionError::Connection(format!("session {} is closed", self.name)))
    }

    async fn run(&self, sql: &str) -> Result<QueryResult, SessionError> {
        debug!("{}: {}", self.name, sql);
        let messages = self
            .client()?
            .simple_query(sql)
            .await
            .map_err(SessionError::from_pg)?;
        Ok(collect_result(messages))
    }

    async fn cancel(&self) -> Result<(), SessionError> {
        warn!("Cancelling backend {} of session {}", self.backend_pid, self.name);
        self.client()?
            .cancel_token()
            .cancel_query(NoTls)
            .await
            .map_err(SessionError::from_pg)
    }

    fn close(&mut self) {
        if self.client.take().is_some() {
            debug!("Session {} closed", self.name);
        }
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        self.client.take();
        if !self.driver.is_finished() {
            self.driver.abort();
        }
    }
}

/// Turn the simple-query message stream of one statement into result sets.
fn collect_result(messages: Vec<SimpleQueryMessage>) -> QueryResult {
    let mut result = QueryResult::empty();
    let mut current: Option<ResultSet> = None;
    for msg in messages {
        match msg {
            SimpleQueryMessage::RowDescription(columns) => {
                current = Some(ResultSet::new(
                    columns.iter().map(|c| c.name().to_string()).collect(),
                ));
            }
            SimpleQueryMessage::Row(row) => {
                let set = current.get_or_insert_with(|| {
                    ResultSet::new(row.columns().iter().map(|c| c.name().to_string()).collect())
                });
                set.rows
                    .push((0..row.len()).map(|i| Datum::from(row.get(i))).collect());
            }
            SimpleQueryMessage::CommandComplete(_) => {
                result.sets.push(current.take().unwrap_or_default());
            }
            _ => {}
        }
    }
    if let Some(set) = current {
        result.sets.push(set);
    }
    result
}

fn is_transaction_end(sql: &str) -> bool {
    let word = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == ';')
        .next()
        .unwrap_or("");
    ["COMMIT", "ROLLBACK", "END", "ABORT"]
        .iter()
        .any(|kw| word.eq_ignore_ascii_case(kw))
}

/// What an implicitly opened transaction needs once `sql` has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnFollowUp {
    Keep,
    /// The statement itself committed or rolled back.
    Ended,
    /// The server aborted the transaction; it must be rolled back before
    /// anything else can run.
    Rollback,
}

fn txn_follow_up(sql: &str, result: &Result<QueryResult, SessionError>) -> TxnFollowUp {
    match result {
        Err(e) if e.is_server_error() => TxnFollowUp::Rollback,
        _ if is_transaction_end(sql) => TxnFollowUp::Ended,
        _ => TxnFollowUp::Keep,
    }
}

/// Synchronous session. With autocommit off, the first statement after
/// connecting or after a commit opens a transaction implicitly. A failed
/// statement rolls that transaction back.
pub struct PgSyncSession {
    conn: PgConnection,
    autocommit: bool,
    in_transaction: bool,
}

impl PgSyncSession {
    pub async fn connect(name: &str, opts: &ConnectOptions) -> Result<Self, SessionError> {
        Ok(Self {
            conn: PgConnection::open(name, opts).await?,
            autocommit: true,
            in_transaction: false,
        })
    }
}

#[async_trait]
impl Session for PgSyncSession {
    fn name(&self) -> &str {
        &self.conn.name
    }

    fn backend_pid(&self) -> i32 {
        self.conn.backend_pid
    }

    async fn execute(&mut self, sql: &str) -> Result<QueryResult, SessionError> {
        if !self.autocommit && !self.in_transaction {
            self.conn.run("BEGIN").await?;
            self.in_transaction = true;
        }
        let result = self.conn.run(sql).await;
        if self.in_transaction {
            match txn_follow_up(sql, &result) {
                TxnFollowUp::Keep => {}
                TxnFollowUp::Ended => self.in_transaction = false,
                TxnFollowUp::Rollback => {
                    self.in_transaction = false;
                    if let Err(e) = self.conn.run("ROLLBACK").await {
                        warn!(
                            "Rollback after failed statement on {} failed: {}",
                            self.conn.name, e
                        );
                    }
                }
            }
        }
        result
    }

    async fn cancel_backend(&mut self) -> Result<(), SessionError> {
        self.conn.cancel().await
    }

    async fn set_autocommit(&mut self, on: bool) -> Result<(), SessionError> {
        if on && self.in_transaction {
            self.conn.run("COMMIT").await?;
            self.in_transaction = false;
        }
        self.autocommit = on;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.conn.close();
        Ok(())
    }
}

/// Asynchronous session. A dispatched statement runs on its own task so the
/// caller can poll it with a bounded wait.
pub struct PgAsyncSession {
    conn: PgConnection,
    in_flight: Option<InFlight>,
}

impl PgAsyncSession {
    pub async fn connect(name: &str, opts: &ConnectOptions) -> Result<Self, SessionError> {
        Ok(Self {
            conn: PgConnection::open(name, opts).await?,
            in_flight: None,
        })
    }
}

#[async_trait]
impl Session for PgAsyncSession {
    fn name(&self) -> &str {
        &self.conn.name
    }

    fn backend_pid(&self) -> i32 {
        self.conn.backend_pid
    }

    async fn execute(&mut self, sql: &str) -> Result<QueryResult, SessionError> {
        if self.in_flight.is_some() {
            return Err(SessionError::Busy(self.conn.name.clone()));
        }
        self.conn.run(sql).await
    }

    async fn cancel_backend(&mut self) -> Result<(), SessionError> {
        self.conn.cancel().await
    }

    async fn set_autocommit(&mut self, on: bool) -> Result<(), SessionError> {
        if on {
            Ok(())
        } else {
            Err(SessionError::AutocommitUnsupported(self.conn.name.clone()))
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if let Some(handle) = self.in_flight.take() {
            warn!("Session {} closed with a statement in flight", self.conn.name);
            handle.abort();
        }
        self.conn.close();
        Ok(())
    }
}

#[async_trait]
impl AsyncSession for PgAsyncSession {
    async fn send_sql(&mut self, sql: &str) -> Result<(), SessionError> {
        if self.in_flight.is_some() {
            return Err(SessionError::Busy(self.conn.name.clone()));
        }
        debug!("{} (async): {}", self.conn.name, sql);
        let client = Arc::clone(self.conn.client()?);
        let sql = sql.to_string();
        self.in_flight = Some(tokio::spawn(async move { client.simple_query(&sql).await }));
        Ok(())
    }

    async fn try_complete_current_execution(
        &mut self,
        poll: Duration,
    ) -> Result<Completion, SessionError> {
        let handle = self
            .in_flight
            .as_mut()
            .ok_or_else(|| SessionError::Idle(self.conn.name.clone()))?;
        let joined = match tokio::time::timeout(poll, handle).await {
            Ok(joined) => joined,
            Err(_) => return Ok(Completion::Pending),
        };
        self.in_flight = None;
        let messages = joined
            .map_err(|e| SessionError::Connection(format!("query task failed: {}", e)))?
            .map_err(SessionError::from_pg)?;
        Ok(Completion::Ready(collect_result(messages)))
    }
}
