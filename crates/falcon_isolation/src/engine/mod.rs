//! Permutation execution engine.
//!
//! Runs every permutation of a spec against one maintenance session and one
//! asynchronous session per spec session, writing the trace to a sink.
//! Concurrency is observed, not executed: a single control flow dispatches
//! statements and polls each session in short bounded intervals, asking the
//! lock oracle whether a slow statement is waiting on another session. A
//! blocked step is parked on the waiting list and retried after every later
//! step until it resolves.

pub mod ledger;
pub mod waiting;

use std::io::Write;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TimingConfig;
use crate::error::{IsolationError, IsolationResult};
use crate::format::{render_query_result, QueryResult};
use crate::oracle;
use crate::permutation::resolve_all;
use crate::session::{AsyncSession, Completion, Session};
use crate::spec::{Permutation, SqlBlock, Spec, Step};

pub use ledger::ErrorLedger;
pub use waiting::{StepRun, WaitingList};

/// How a step is being completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepMode {
    /// Give up (report the step as waiting) when the lock oracle says the
    /// step is blocked.
    pub nonblock: bool,
    /// The step was dispatched earlier; its completion prints
    /// `<... completed>` instead of its SQL.
    pub retry: bool,
}

impl StepMode {
    pub const NONBLOCK: StepMode = StepMode {
        nonblock: true,
        retry: false,
    };
    pub const RETRY: StepMode = StepMode {
        nonblock: false,
        retry: true,
    };
    pub const NONBLOCK_RETRY: StepMode = StepMode {
        nonblock: true,
        retry: true,
    };
}

/// Whether a failing block aborts the run or only shows up in the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Setup,
    Teardown,
}

pub struct Engine<M, S, W> {
    maint: M,
    sessions: Vec<S>,
    out: W,
    timing: TimingConfig,
    backend_pids: Vec<i32>,
    ledger: ErrorLedger,
}

impl<M, S, W> Engine<M, S, W>
where
    M: Session,
    S: AsyncSession,
    W: Write,
{
    /// Build an engine over already connected sessions. Each test session is
    /// looked up by its [`Session::name`], which must equal its spec tag.
    pub fn new(maint: M, sessions: Vec<S>, out: W, timing: TimingConfig) -> Self {
        let mut backend_pids = vec![maint.backend_pid()];
        backend_pids.extend(sessions.iter().map(|s| s.backend_pid()));
        debug!("backend pids: {:?}", backend_pids);
        Self {
            maint,
            sessions,
            out,
            timing,
            backend_pids,
            ledger: ErrorLedger::new(),
        }
    }

    /// Maintenance plus test session pids, the lock oracle's candidate set.
    pub fn backend_pids(&self) -> &[i32] {
        &self.backend_pids
    }

    pub fn into_parts(self) -> (M, Vec<S>, W) {
        (self.maint, self.sessions, self.out)
    }

    /// Close every session. Failures are logged, not returned.
    pub async fn close(&mut self) {
        for session in &mut self.sessions {
            if let Err(e) = session.close().await {
                warn!("closing session {} failed: {}", session.name(), e);
            }
        }
        if let Err(e) = self.maint.close().await {
            warn!("closing maintenance session failed: {}", e);
        }
    }

    /// Run all `permutations` of `spec`.
    ///
    /// Every permutation is resolved and every session located before the
    /// first line is written, so a bad tag fails without partial output. A
    /// lock timeout aborts the remaining permutations.
    pub async fn run(&mut self, spec: &Spec, permutations: &[Permutation]) -> IsolationResult<()> {
        let resolved = resolve_all(spec, permutations)?;
        for session in &spec.sessions {
            self.session_index(&session.tag)?;
        }
        if !spec.keywords.is_empty() {
            info!("keyword commands: {:?}", spec.keywords);
        }

        writeln!(self.out, "Parsed test spec with {} sessions", spec.sessions.len())?;
        for (permutation, steps) in permutations.iter().zip(&resolved) {
            writeln!(self.out)?;
            writeln!(self.out, "starting permutation: {}", permutation)?;
            falcon_observability::record_permutation(&spec.name);
            self.run_permutation(spec, steps).await?;
        }
        self.out.flush()?;
        Ok(())
    }

    async fn run_permutation<'s>(
        &mut self,
        spec: &'s Spec,
        steps: &[&'s Step],
    ) -> IsolationResult<()> {
        self.ledger.clear();
        let mut waiting = WaitingList::new();

        for block in &spec.setups {
            self.run_maint_block(block, BlockKind::Setup).await?;
        }
        for session in &spec.sessions {
            if let Some(setup) = &session.setup {
                self.run_session_block(&session.tag, setup, BlockKind::Setup)
                    .await?;
            }
        }

        for &step in steps {
            // A session runs one step at a time: finish its blocked step first.
            if let Some(mut old) = waiting.take_for_session(&step.session_tag) {
                debug!("step {} waits for blocked step {}", step.tag, old.tag());
                self.try_complete_step(&mut old, StepMode::RETRY).await?;
                self.sweep_waiting(&mut waiting).await?;
                self.report_multiple_errors(old.tag())?;
            }

            let mut run = StepRun::new(step);
            let blocked = self.try_complete_step(&mut run, StepMode::NONBLOCK).await?;
            self.sweep_waiting(&mut waiting).await?;
            self.report_multiple_errors(&step.tag)?;
            if blocked {
                waiting.push(run);
            }
        }

        for mut run in waiting.drain() {
            self.try_complete_step(&mut run, StepMode::RETRY).await?;
            self.report_error(run.tag())?;
        }

        for session in &spec.sessions {
            if let Some(teardown) = &session.teardown {
                self.run_session_block(&session.tag, teardown, BlockKind::Teardown)
                    .await?;
            }
        }
        for block in &spec.teardowns {
            self.run_maint_block(block, BlockKind::Teardown).await?;
        }

        self.ledger.clear();
        Ok(())
    }

    /// Drive `run` until it completes, or until it is found blocked when
    /// `mode.nonblock` is set. Returns `true` when the step is still waiting.
    async fn try_complete_step(
        &mut self,
        run: &mut StepRun<'_>,
        mode: StepMode,
    ) -> IsolationResult<bool> {
        let idx = self.session_index(run.session_tag())?;
        let poll = self.timing.poll_interval();
        let started = Instant::now();
        let mut attempt_start = started;
        let mut cancelled = false;

        loop {
            if !run.in_flight {
                let Some(sql) = run.pending_statement() else {
                    break;
                };
                self.sessions[idx].send_sql(sql).await?;
                run.next_statement += 1;
                run.in_flight = true;
                attempt_start = Instant::now();
                cancelled = false;
            }

            match self.sessions[idx].try_complete_current_execution(poll).await {
                Ok(Completion::Ready(result)) => {
                    run.in_flight = false;
                    run.results.push(result);
                }
                Err(e) if e.is_server_error() => {
                    run.in_flight = false;
                    run.error = Some(e.to_string());
                }
                Err(e) => return Err(e.into()),
                Ok(Completion::Pending) => {
                    if mode.nonblock {
                        let pid = self.sessions[idx].backend_pid();
                        if oracle::is_blocked(&mut self.maint, pid, &self.backend_pids).await? {
                            if !mode.retry && !run.waiting_printed {
                                writeln!(
                                    self.out,
                                    "step {}: {} <waiting ...>",
                                    run.tag(),
                                    run.step.sql.display_text()
                                )?;
                                run.waiting_printed = true;
                                falcon_observability::record_step_outcome("blocked");
                            }
                            return Ok(true);
                        }
                    }

                    let elapsed = attempt_start.elapsed();
                    if elapsed > self.timing.fail_after() {
                        return Err(IsolationError::LockTimeout {
                            step: run.tag().to_string(),
                            waited: self.timing.fail_after(),
                        });
                    }
                    if elapsed > self.timing.cancel_after() && !cancelled {
                        warn!(
                            "step {} still running after {:?}, cancelling",
                            run.tag(),
                            elapsed
                        );
                        self.sessions[idx].cancel_backend().await?;
                        falcon_observability::record_cancel_request();
                        cancelled = true;
                    }
                }
            }
        }

        falcon_observability::record_step_wait(started.elapsed());
        match &run.error {
            Some(message) => {
                self.ledger.record(run.tag(), message.clone());
                falcon_observability::record_step_outcome("failed");
            }
            None => falcon_observability::record_step_outcome("completed"),
        }

        if mode.retry {
            writeln!(self.out, "step {}: <... completed>", run.tag())?;
        } else {
            writeln!(self.out, "step {}: {}", run.tag(), run.step.sql.display_text())?;
        }
        self.write_results(&run.results)?;
        Ok(false)
    }

    /// Retry every waiting step without blocking. Steps that resolve leave
    /// the list and always get a ledger entry, empty if they succeeded.
    async fn sweep_waiting(&mut self, waiting: &mut WaitingList<'_>) -> IsolationResult<()> {
        let mut done = vec![false; waiting.len()];
        for (idx, flag) in done.iter_mut().enumerate() {
            let Some(run) = waiting.get_mut(idx) else {
                continue;
            };
            if !self.try_complete_step(run, StepMode::NONBLOCK_RETRY).await? {
                *flag = true;
                self.ledger.record_default(run.tag());
            }
        }
        let resolved = waiting.compact(&done);
        if !resolved.is_empty() {
            debug!("unblocked steps: {:?}", resolved);
        }
        Ok(())
    }

    /// Print the error of `tag` alone, or, when other steps hold entries
    /// too, every non-empty message under one combined tag list.
    fn report_multiple_errors(&mut self, tag: &str) -> IsolationResult<()> {
        let others = self.ledger.other_tags(tag);
        if others.is_empty() {
            return self.report_error(tag);
        }

        let mut all_tags = vec![tag.to_string()];
        all_tags.extend(others.iter().cloned());
        let all_tags = all_tags.join(" ");

        for t in std::iter::once(tag.to_string()).chain(others) {
            if let Some(message) = self.ledger.take(&t) {
                if !message.is_empty() {
                    writeln!(self.out, "error in steps {}: {}", all_tags, message)?;
                }
            }
        }
        Ok(())
    }

    fn report_error(&mut self, tag: &str) -> IsolationResult<()> {
        if let Some(message) = self.ledger.take(tag) {
            if !message.is_empty() {
                writeln!(self.out, "{}", message)?;
            }
        }
        Ok(())
    }

    async fn run_maint_block(&mut self, block: &SqlBlock, kind: BlockKind) -> IsolationResult<()> {
        for sql in block.statements() {
            match self.maint.execute(sql).await {
                Ok(result) => self.write_results(std::slice::from_ref(&result))?,
                Err(e) if e.is_server_error() => match kind {
                    BlockKind::Setup => return Err(IsolationError::SetupFailed(e.to_string())),
                    BlockKind::Teardown => writeln!(self.out, "{}", e)?,
                },
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn run_session_block(
        &mut self,
        tag: &str,
        block: &SqlBlock,
        kind: BlockKind,
    ) -> IsolationResult<()> {
        let idx = self.session_index(tag)?;
        for sql in block.statements() {
            match self.sessions[idx].execute(sql).await {
                Ok(result) => self.write_results(std::slice::from_ref(&result))?,
                Err(e) if e.is_server_error() => match kind {
                    BlockKind::Setup => {
                        return Err(IsolationError::SetupFailed(format!(
                            "session {}: {}",
                            tag, e
                        )))
                    }
                    BlockKind::Teardown => writeln!(self.out, "{}", e)?,
                },
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn write_results(&mut self, results: &[QueryResult]) -> IsolationResult<()> {
        for result in results {
            self.out.write_all(render_query_result(result).as_bytes())?;
        }
        Ok(())
    }

    fn session_index(&self, tag: &str) -> IsolationResult<usize> {
        self.sessions
            .iter()
            .position(|s| s.name() == tag)
            .ok_or_else(|| IsolationError::UnknownSession(tag.to_string()))
    }
}
