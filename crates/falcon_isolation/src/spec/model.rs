use std::fmt;

use crate::splitter::split_statements;

/// A block of SQL exactly as written between `{` and `}` in a spec, plus the
/// statements it splits into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlBlock {
    raw: String,
    statements: Vec<String>,
}

impl SqlBlock {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let statements = split_statements(&raw);
        Self { raw, statements }
    }

    /// The untouched source text between the braces.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The text printed in step headers: the raw block without surrounding
    /// whitespace.
    pub fn display_text(&self) -> &str {
        self.raw.trim()
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

/// One named unit of SQL work belonging to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub tag: String,
    pub session_tag: String,
    pub sql: SqlBlock,
}

/// A session as declared in a spec file (not a live connection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    pub tag: String,
    pub setup: Option<SqlBlock>,
    pub teardown: Option<SqlBlock>,
    pub steps: Vec<Step>,
}

impl SessionSpec {
    pub fn step_tags(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.tag.as_str()).collect()
    }
}

/// An ordering of step tags across sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    pub step_tags: Vec<String>,
}

impl Permutation {
    pub fn new(step_tags: Vec<String>) -> Self {
        Self { step_tags }
    }

    pub fn len(&self) -> usize {
        self.step_tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.step_tags.is_empty()
    }
}

impl fmt::Display for Permutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.step_tags.join(" "))
    }
}

/// A parsed isolation test case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Spec {
    /// Test case name, usually the spec file stem.
    pub name: String,
    /// External commands listed in the `keywords { ... }` block, verbatim.
    pub keywords: Vec<String>,
    pub setups: Vec<SqlBlock>,
    pub teardowns: Vec<SqlBlock>,
    /// Declaration order is significant: it drives implicit permutations.
    pub sessions: Vec<SessionSpec>,
    /// Explicit permutations; empty means "generate all interleavings".
    pub permutations: Vec<Permutation>,
}

impl Spec {
    /// One-line structural summary, used in logs.
    pub fn summary(&self) -> String {
        format!(
            "{} setup clauses, {} teardown clauses, {} sessions, {} permutations",
            self.setups.len(),
            self.teardowns.len(),
            self.sessions.len(),
            self.permutations.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(session: &str, tag: &str, sql: &str) -> Step {
        Step {
            tag: tag.to_string(),
            session_tag: session.to_string(),
            sql: SqlBlock::new(sql),
        }
    }

    #[test]
    fn test_sql_block_splits_on_construction() {
        let block = SqlBlock::new("\n  BEGIN;\n  SELECT 1;\n");
        assert_eq!(block.statements(), &["BEGIN;", "SELECT 1;"]);
        assert_eq!(block.display_text(), "BEGIN;\n  SELECT 1;");
        assert_eq!(block.raw(), "\n  BEGIN;\n  SELECT 1;\n");
    }

    #[test]
    fn test_summary_counts_sessions() {
        let spec = Spec {
            sessions: vec![
                SessionSpec {
                    tag: "s1".into(),
                    setup: None,
                    teardown: None,
                    steps: vec![step("s1", "a", "SELECT 1;")],
                },
                SessionSpec {
                    tag: "s2".into(),
                    setup: None,
                    teardown: None,
                    steps: vec![step("s2", "b", "SELECT 2;"), step("s2", "c", "SELECT 3;")],
                },
            ],
            ..Default::default()
        };
        assert_eq!(
            spec.summary(),
            "0 setup clauses, 0 teardown clauses, 2 sessions, 0 permutations"
        );
    }

    #[test]
    fn test_permutation_display() {
        let p = Permutation::new(vec!["a".into(), "b".into()]);
        assert_eq!(p.to_string(), "a b");
        assert_eq!(p.len(), 2);
    }
}
