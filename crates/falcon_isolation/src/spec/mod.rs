//! Isolation spec documents: lexer, parser and the parsed model.

pub mod lexer;
pub mod model;
pub mod parser;

use std::path::Path;

use tracing::info;

pub use model::{Permutation, SessionSpec, Spec, SqlBlock, Step};
pub use parser::parse_spec;

use crate::error::IsolationResult;

/// Read and parse a `.spec` file. The test case is named after the file stem.
pub fn load_spec(path: impl AsRef<Path>) -> IsolationResult<Spec> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let mut spec = parse_spec(&text)?;
    spec.name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!("caseName: {}; structure: {}", spec.name, spec.summary());
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IsolationError;
    use std::io::Write;

    #[test]
    fn test_load_spec_names_case_after_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fk-deadlock.spec");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "session \"s1\" step \"a\" {{ SELECT 1; }}").unwrap();
        drop(f);

        let spec = load_spec(&path).unwrap();
        assert_eq!(spec.name, "fk-deadlock");
        assert_eq!(spec.sessions.len(), 1);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_spec(dir.path().join("missing.spec")).unwrap_err();
        assert!(matches!(err, IsolationError::Io(_)));
    }
}
