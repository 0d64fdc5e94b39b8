use crate::format::QueryResult;
use crate::spec::Step;

/// Execution state of one step within a permutation.
///
/// A multi-statement step dispatches its statements one at a time. When one
/// of them blocks, the step stops there and resumes with the same statement
/// on its next retry. Results are buffered until the whole step finishes so
/// they print together under one header.
#[derive(Debug)]
pub struct StepRun<'s> {
    pub step: &'s Step,
    /// Index of the next statement to dispatch.
    pub next_statement: usize,
    /// A statement was dispatched and its result not yet collected.
    pub in_flight: bool,
    /// `<waiting ...>` was already printed for this step.
    pub waiting_printed: bool,
    pub results: Vec<QueryResult>,
    /// Backend error that ended the step; remaining statements are skipped.
    pub error: Option<String>,
}

impl<'s> StepRun<'s> {
    pub fn new(step: &'s Step) -> Self {
        Self {
            step,
            next_statement: 0,
            in_flight: false,
            waiting_printed: false,
            results: Vec::new(),
            error: None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.step.tag
    }

    pub fn session_tag(&self) -> &str {
        &self.step.session_tag
    }

    /// The next statement to dispatch, if the step is not finished.
    pub fn pending_statement(&self) -> Option<&'s str> {
        if self.error.is_some() {
            return None;
        }
        self.step
            .sql
            .statements()
            .get(self.next_statement)
            .map(String::as_str)
    }
}

/// Steps that reported a lock wait, in the order they blocked.
#[derive(Debug, Default)]
pub struct WaitingList<'s> {
    steps: Vec<StepRun<'s>>,
}

impl<'s> WaitingList<'s> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn push(&mut self, run: StepRun<'s>) {
        self.steps.push(run);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut StepRun<'s>> {
        self.steps.get_mut(idx)
    }

    /// Remove and return the waiting step of `session_tag`, if any.
    pub fn take_for_session(&mut self, session_tag: &str) -> Option<StepRun<'s>> {
        let idx = self
            .steps
            .iter()
            .position(|r| r.session_tag() == session_tag)?;
        Some(self.steps.remove(idx))
    }

    /// Remove every step whose `done` flag is set, keeping the order of the
    /// rest. Returns the removed tags in list order.
    pub fn compact(&mut self, done: &[bool]) -> Vec<String> {
        let mut removed = Vec::new();
        let mut flags = done.iter();
        self.steps.retain(|run| {
            if flags.next().copied().unwrap_or(false) {
                removed.push(run.tag().to_string());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn drain(&mut self) -> Vec<StepRun<'s>> {
        std::mem::take(&mut self.steps)
    }
}
