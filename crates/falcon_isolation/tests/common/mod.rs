#![allow(dead_code, unused_imports)]

//! A scripted in-memory database for driving the engine without a server.
//!
//! Statements understood by every mock session (trailing `;` optional):
//!
//! - `LOCK <key>`: take an exclusive lock, waiting while another session
//!   holds it. A wait that closes a cycle fails with `deadlock detected`.
//! - `COMMIT`, `ROLLBACK`, `UNLOCK`: release every lock of the session.
//! - `FAIL <message>`: fail with `ERROR:  <message>`.
//! - `SELECT <col>=<val>, ...`: one row with the given columns.
//! - `SLEEP`: run until cancelled. `HANG`: run forever, ignoring cancels.
//! - the lock oracle query, answered from the wait graph.
//!
//! Anything else completes as a command without rows. Any error releases
//! the session's locks, as an aborted transaction does.

pub use std::sync::Arc;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

pub use async_trait::async_trait;
pub use falcon_isolation::config::TimingConfig;
pub use falcon_isolation::engine::Engine;
pub use falcon_isolation::error::{IsolationError, IsolationResult, SessionError};
pub use falcon_isolation::format::{Datum, QueryResult, ResultSet};
pub use falcon_isolation::permutation::generate_permutations;
pub use falcon_isolation::session::{AsyncSession, Completion, Session};
pub use falcon_isolation::spec::{parse_spec, Spec};
use parking_lot::Mutex;

pub const DEADLOCK: &str = "ERROR:  deadlock detected";
pub const CANCELED: &str = "ERROR:  canceling statement due to user request";

#[derive(Debug, Default)]
struct DbState {
    next_pid: i32,
    /// lock key -> holder pid
    locks: HashMap<String, i32>,
    /// waiting pid -> lock key
    waits: HashMap<i32, String>,
    cancelled: HashSet<i32>,
    /// (session name, statement) in dispatch order
    log: Vec<(String, String)>,
}

enum Eval {
    Done(QueryResult),
    Failed(String),
    Waiting,
}

impl DbState {
    fn release(&mut self, pid: i32) {
        self.locks.retain(|_, holder| *holder != pid);
        self.waits.remove(&pid);
    }

    fn fail(&mut self, pid: i32, message: String) -> Eval {
        self.release(pid);
        Eval::Failed(message)
    }

    /// Whether `pid` waiting for `key` closes a cycle in the wait graph.
    fn closes_cycle(&self, pid: i32, key: &str) -> bool {
        let mut seen = HashSet::new();
        let mut holder = self.locks.get(key).copied();
        while let Some(h) = holder {
            if h == pid {
                return true;
            }
            if !seen.insert(h) {
                return false;
            }
            holder = self
                .waits
                .get(&h)
                .and_then(|k| self.locks.get(k))
                .copied();
        }
        false
    }

    fn is_blocked(&self, pid: i32, candidates: &[i32]) -> bool {
        self.waits
            .get(&pid)
            .and_then(|key| self.locks.get(key))
            .map(|holder| candidates.contains(holder))
            .unwrap_or(false)
    }

    fn eval(&mut self, pid: i32, sql: &str) -> Eval {
        let stmt = sql.trim().trim_end_matches(';').trim();
        let (word, rest) = match stmt.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (stmt, ""),
        };
        let cancel_requested = self.cancelled.contains(&pid);

        match word.to_ascii_uppercase().as_str() {
            "LOCK" => match self.locks.get(rest).copied() {
                None => {
                    self.locks.insert(rest.to_string(), pid);
                    self.waits.remove(&pid);
                    Eval::Done(command())
                }
                Some(holder) if holder == pid => Eval::Done(command()),
                Some(_) => {
                    if cancel_requested {
                        self.cancelled.remove(&pid);
                        return self.fail(pid, CANCELED.to_string());
                    }
                    if self.closes_cycle(pid, rest) {
                        return self.fail(pid, DEADLOCK.to_string());
                    }
                    self.waits.insert(pid, rest.to_string());
                    Eval::Waiting
                }
            },
            "COMMIT" | "ROLLBACK" | "UNLOCK" => {
                self.release(pid);
                Eval::Done(command())
            }
            "FAIL" => self.fail(pid, format!("ERROR:  {}", rest)),
            "SLEEP" => {
                if cancel_requested {
                    self.cancelled.remove(&pid);
                    self.fail(pid, CANCELED.to_string())
                } else {
                    Eval::Waiting
                }
            }
            "HANG" => Eval::Waiting,
            "SELECT" if rest.starts_with("pg_catalog.pg_isolation_test_session_is_blocked") => {
                let (target, candidates) = parse_oracle_query(rest);
                let blocked = self.is_blocked(target, &candidates);
                Eval::Done(QueryResult::single(ResultSet {
                    columns: vec!["pg_isolation_test_session_is_blocked".into()],
                    rows: vec![vec![Datum::Text(if blocked { "t" } else { "f" }.into())]],
                }))
            }
            "SELECT" => {
                let mut set = ResultSet::default();
                let mut row = Vec::new();
                for pair in rest.split(',') {
                    let (col, val) = pair.trim().split_once('=').unwrap_or((pair.trim(), ""));
                    set.columns.push(col.trim().to_string());
                    row.push(Datum::Text(val.trim().to_string()));
                }
                set.rows.push(row);
                Eval::Done(QueryResult::single(set))
            }
            _ => Eval::Done(command()),
        }
    }
}

fn command() -> QueryResult {
    QueryResult::single(ResultSet::default())
}

/// `pg_catalog.pg_isolation_test_session_is_blocked(42, '{7,43}')`
fn parse_oracle_query(text: &str) -> (i32, Vec<i32>) {
    let args = text
        .split_once('(')
        .map(|(_, a)| a.trim_end_matches(')'))
        .unwrap_or("");
    let (pid, set) = args.split_once(',').unwrap_or((args, ""));
    let candidates = set
        .trim()
        .trim_matches('\'')
        .trim_matches(|c| c == '{' || c == '}')
        .split(',')
        .filter_map(|p| p.trim().parse().ok())
        .collect();
    (pid.trim().parse().unwrap_or(-1), candidates)
}

/// Shared state of all mock sessions.
#[derive(Clone, Default)]
pub struct MockDb {
    state: Arc<Mutex<DbState>>,
}

impl MockDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, name: &str) -> MockSession {
        let pid = {
            let mut state = self.state.lock();
            state.next_pid += 1;
            1000 + state.next_pid
        };
        MockSession {
            name: name.to_string(),
            pid,
            db: self.clone(),
            in_flight: None,
            autocommit: true,
            closed: false,
        }
    }

    /// Statements dispatched so far, as `session: sql`.
    pub fn log(&self) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .map(|(s, sql)| format!("{}: {}", s, sql))
            .collect()
    }

    pub fn held_locks(&self) -> usize {
        self.state.lock().locks.len()
    }
}

pub struct MockSession {
    name: String,
    pid: i32,
    db: MockDb,
    in_flight: Option<String>,
    autocommit: bool,
    closed: bool,
}

impl MockSession {
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn eval(&self, sql: &str) -> Eval {
        self.db.state.lock().eval(self.pid, sql)
    }
}

#[async_trait]
impl Session for MockSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend_pid(&self) -> i32 {
        self.pid
    }

    async fn execute(&mut self, sql: &str) -> Result<QueryResult, SessionError> {
        if self.in_flight.is_some() {
            return Err(SessionError::Busy(self.name.clone()));
        }
        self.db
            .state
            .lock()
            .log
            .push((self.name.clone(), sql.to_string()));
        loop {
            match self.eval(sql) {
                Eval::Done(result) => return Ok(result),
                Eval::Failed(message) => return Err(SessionError::Server(message)),
                Eval::Waiting => tokio::time::sleep(Duration::from_millis(1)).await,
            }
        }
    }

    async fn cancel_backend(&mut self) -> Result<(), SessionError> {
        self.db.state.lock().cancelled.insert(self.pid);
        Ok(())
    }

    async fn set_autocommit(&mut self, on: bool) -> Result<(), SessionError> {
        self.autocommit = on;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.db.state.lock().release(self.pid);
        self.closed = true;
        Ok(())
    }
}

#[async_trait]
impl AsyncSession for MockSession {
    async fn send_sql(&mut self, sql: &str) -> Result<(), SessionError> {
        if self.in_flight.is_some() {
            return Err(SessionError::Busy(self.name.clone()));
        }
        let mut state = self.db.state.lock();
        state.cancelled.remove(&self.pid);
        state.log.push((self.name.clone(), sql.to_string()));
        drop(state);
        self.in_flight = Some(sql.to_string());
        Ok(())
    }

    async fn try_complete_current_execution(
        &mut self,
        poll: Duration,
    ) -> Result<Completion, SessionError> {
        let sql = self
            .in_flight
            .clone()
            .ok_or_else(|| SessionError::Idle(self.name.clone()))?;
        for attempt in 0..2 {
            match self.eval(&sql) {
                Eval::Done(result) => {
                    self.in_flight = None;
                    return Ok(Completion::Ready(result));
                }
                Eval::Failed(message) => {
                    self.in_flight = None;
                    return Err(SessionError::Server(message));
                }
                Eval::Waiting if attempt == 0 => tokio::time::sleep(poll).await,
                Eval::Waiting => {}
            }
        }
        Ok(Completion::Pending)
    }
}

/// Parse `spec_text`, wire one mock session per spec session and run every
/// permutation. Returns the run outcome, the trace and the database.
pub async fn run_spec_with(
    spec_text: &str,
    timing: TimingConfig,
) -> (IsolationResult<()>, String, MockDb) {
    let spec = parse_spec(spec_text).expect("spec parses");
    let permutations = generate_permutations(&spec);
    let db = MockDb::new();
    let maint = db.session("Maint");
    let sessions = spec.sessions.iter().map(|s| db.session(&s.tag)).collect();
    let mut engine = Engine::new(maint, sessions, Vec::new(), timing);
    let outcome = engine.run(&spec, &permutations).await;
    engine.close().await;
    let (_, _, out) = engine.into_parts();
    (outcome, String::from_utf8(out).expect("utf-8 trace"), db)
}

pub async fn run_spec(spec_text: &str) -> (IsolationResult<()>, String, MockDb) {
    run_spec_with(spec_text, TimingConfig::default()).await
}

/// A single-row, single-column result block as the trace renders it.
pub fn block(column: &str, value: &str) -> String {
    format!("{:<15}\n\n{:<15}\n", column, value)
}
