//! Print what each permutation would execute, without a database.

use std::io::Write;

use crate::error::IsolationResult;
use crate::permutation::resolve_all;
use crate::spec::{Permutation, Spec};

const MAINT: &str = "Maint";

pub fn dry_run<W: Write>(spec: &Spec, permutations: &[Permutation], out: &mut W) -> IsolationResult<()> {
    let resolved = resolve_all(spec, permutations)?;

    writeln!(out, "----------DRY RUN MODE----------")?;
    writeln!(out, "{}", spec.summary())?;
    for keyword in &spec.keywords {
        writeln!(out, "keyword: {}", keyword)?;
    }

    for (permutation, steps) in permutations.iter().zip(&resolved) {
        writeln!(out, "starting permutation: {}", permutation)?;

        writeln!(out, "==LOADING SETUP SQLS==")?;
        for block in &spec.setups {
            writeln!(out, "Session({}): {}", MAINT, block.display_text())?;
        }

        writeln!(out, "==LOADING SESSION SETUP SQLS==")?;
        for session in &spec.sessions {
            if let Some(setup) = &session.setup {
                writeln!(out, "Session({}): {}", session.tag, setup.display_text())?;
            }
        }

        writeln!(out, "==LOADING PERMUTATION STEPS SQLS==")?;
        for step in steps {
            writeln!(out, "Session({}): {}", step.session_tag, step.sql.display_text())?;
        }

        writeln!(out, "==LOADING SESSION TEARDOWN SQLS==")?;
        for session in &spec.sessions {
            if let Some(teardown) = &session.teardown {
                writeln!(out, "Session({}): {}", session.tag, teardown.display_text())?;
            }
        }

        writeln!(out, "==LOADING TEARDOWN SQLS==")?;
        for block in &spec.teardowns {
            writeln!(out, "Session({}): {}", MAINT, block.display_text())?;
        }
        writeln!(out)?;
    }
    Ok(())
}
