//! Rendering of query results in the trace.
//!
//! Column names and values are each left-aligned in a 15-character field.
//! The header line is followed by an empty line, then one line per row.
//!
//! Values arrive in the server's text format, so `t`/`f` booleans, integral
//! floats without a fraction and `MM-DD-YYYY` dates (under the session's
//! `Postgres, MDY` datestyle) are printed exactly as received.

use std::fmt;

/// Width of one column in the trace.
pub const COLUMN_WIDTH: usize = 15;

/// A single value in a result row.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Text(String),
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => Ok(()),
            Datum::Text(s) => f.write_str(s),
        }
    }
}

impl From<Option<&str>> for Datum {
    fn from(v: Option<&str>) -> Self {
        match v {
            Some(s) => Datum::Text(s.to_string()),
            None => Datum::Null,
        }
    }
}

/// Column names plus rows of one statement's result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Datum>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// A statement without a row description (DDL, DML without RETURNING).
    pub fn is_command(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Everything one statement returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub sets: Vec<ResultSet>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(set: ResultSet) -> Self {
        Self { sets: vec![set] }
    }

    /// First column of the first row, if any.
    pub fn scalar(&self) -> Option<&Datum> {
        self.sets.first()?.rows.first()?.first()
    }
}

/// Render one result set; commands without columns render as nothing.
pub fn render_result_set(set: &ResultSet) -> String {
    if set.is_command() {
        return String::new();
    }
    let mut out = String::new();
    for col in &set.columns {
        out.push_str(&format!("{:<width$}", col, width = COLUMN_WIDTH));
    }
    out.push_str("\n\n");
    for row in &set.rows {
        for value in row {
            out.push_str(&format!("{:<width$}", value.to_string(), width = COLUMN_WIDTH));
        }
        out.push('\n');
    }
    out
}

pub fn render_query_result(result: &QueryResult) -> String {
    result.sets.iter().map(render_result_set).collect()
}
