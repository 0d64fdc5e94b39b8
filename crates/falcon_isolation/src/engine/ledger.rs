/// Error messages of the current permutation, keyed by step tag.
///
/// Insertion order is kept so combined reports list related steps in the
/// order their errors surfaced.
#[derive(Debug, Default)]
pub struct ErrorLedger {
    entries: Vec<(String, String)>,
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message` for `tag`, replacing an earlier entry.
    pub fn record(&mut self, tag: &str, message: impl Into<String>) {
        let message = message.into();
        match self.entries.iter_mut().find(|(t, _)| t == tag) {
            Some(entry) => entry.1 = message,
            None => self.entries.push((tag.to_string(), message)),
        }
    }

    /// Record an empty entry for `tag` unless it already has one.
    pub fn record_default(&mut self, tag: &str) {
        if !self.contains(tag) {
            self.entries.push((tag.to_string(), String::new()));
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.iter().any(|(t, _)| t == tag)
    }

    pub fn take(&mut self, tag: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(t, _)| t == tag)?;
        Some(self.entries.remove(idx).1)
    }

    /// Tags other than `tag` that currently hold an entry.
    pub fn other_tags(&self, tag: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(t, _)| t != tag)
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
