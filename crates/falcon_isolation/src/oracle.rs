//! Lock oracle: asks the server whether one backend is waiting on another.

use tracing::debug;

use crate::error::SessionError;
use crate::format::Datum;
use crate::session::Session;

/// Build the lock-wait query for `pid` against `candidates`. `pid` itself is
/// never part of the candidate set.
pub fn blocked_query(pid: i32, candidates: &[i32]) -> String {
    let others: Vec<String> = candidates
        .iter()
        .filter(|&&p| p != pid)
        .map(|p| p.to_string())
        .collect();
    format!(
        "SELECT pg_catalog.pg_isolation_test_session_is_blocked({}, '{{{}}}')",
        pid,
        others.join(",")
    )
}

/// Whether backend `pid` is waiting on a lock held by any of `candidates`.
pub async fn is_blocked<M: Session + ?Sized>(
    maint: &mut M,
    pid: i32,
    candidates: &[i32],
) -> Result<bool, SessionError> {
    let result = maint.execute(&blocked_query(pid, candidates)).await?;
    let blocked = answer_is_true(result.scalar());
    debug!("backend {} blocked: {}", pid, blocked);
    Ok(blocked)
}

/// The oracle answers a boolean in text form.
fn answer_is_true(answer: Option<&Datum>) -> bool {
    match answer {
        Some(Datum::Text(t)) => t == "t" || t.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_excludes_own_pid() {
        assert_eq!(
            blocked_query(42, &[7, 42, 43]),
            "SELECT pg_catalog.pg_isolation_test_session_is_blocked(42, '{7,43}')"
        );
    }

    #[test]
    fn test_query_with_no_other_backends() {
        assert_eq!(
            blocked_query(5, &[5]),
            "SELECT pg_catalog.pg_isolation_test_session_is_blocked(5, '{}')"
        );
    }

    #[test]
    fn test_text_answers() {
        assert!(answer_is_true(Some(&Datum::from(Some("t")))));
        assert!(answer_is_true(Some(&Datum::from(Some("TRUE")))));
        assert!(!answer_is_true(Some(&Datum::from(Some("f")))));
        assert!(!answer_is_true(Some(&Datum::Null)));
        assert!(!answer_is_true(None));
    }
}
