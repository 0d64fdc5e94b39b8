//! Permutation generation and resolution.
//!
//! The implicit set is every interleaving of the sessions' step lists that
//! keeps each session's own order. Sessions are tried in declaration order at
//! every position, so the output order is stable and matches the order of
//! the expected-output files.

use tracing::debug;

use crate::error::{IsolationError, IsolationResult};
use crate::spec::{Permutation, Spec, Step};

/// Return the permutations to run for `spec`: its explicit list when it has
/// one, otherwise every interleaving of its sessions' steps.
pub fn generate_permutations(spec: &Spec) -> Vec<Permutation> {
    if !spec.permutations.is_empty() {
        return spec.permutations.clone();
    }

    let piles: Vec<Vec<&str>> = spec.sessions.iter().map(|s| s.step_tags()).collect();
    let total: usize = piles.iter().map(Vec::len).sum();
    if total == 0 {
        return Vec::new();
    }

    let mut drawn = vec![0usize; piles.len()];
    let mut current: Vec<&str> = Vec::with_capacity(total);
    let mut out = Vec::new();
    interleave(&piles, &mut drawn, &mut current, &mut out);
    debug!(
        "generated {} implicit permutations over {} steps",
        out.len(),
        total
    );
    out
}

/// Depth-first backtracking over the piles. `drawn[i]` is how many steps of
/// pile `i` are already in `current`.
fn interleave<'a>(
    piles: &[Vec<&'a str>],
    drawn: &mut [usize],
    current: &mut Vec<&'a str>,
    out: &mut Vec<Permutation>,
) {
    let mut found = false;
    for i in 0..piles.len() {
        if drawn[i] < piles[i].len() {
            current.push(piles[i][drawn[i]]);
            drawn[i] += 1;
            interleave(piles, drawn, current, out);
            drawn[i] -= 1;
            current.pop();
            found = true;
        }
    }
    if !found {
        out.push(Permutation::new(
            current.iter().map(|s| s.to_string()).collect(),
        ));
    }
}

/// Map a permutation's tags to the declared steps.
///
/// Every tag must name exactly one step across all sessions.
pub fn resolve_permutation<'s>(
    spec: &'s Spec,
    permutation: &Permutation,
) -> IsolationResult<Vec<&'s Step>> {
    permutation
        .step_tags
        .iter()
        .map(|tag| {
            let mut matches = spec
                .sessions
                .iter()
                .flat_map(|s| s.steps.iter())
                .filter(|s| &s.tag == tag);
            let step = matches
                .next()
                .ok_or_else(|| IsolationError::UnknownStep(tag.clone()))?;
            if matches.next().is_some() {
                return Err(IsolationError::AmbiguousStep(tag.clone()));
            }
            Ok(step)
        })
        .collect()
}

/// Resolve every permutation up front so a bad tag fails before any SQL runs.
pub fn resolve_all<'s>(
    spec: &'s Spec,
    permutations: &[Permutation],
) -> IsolationResult<Vec<Vec<&'s Step>>> {
    permutations
        .iter()
        .map(|p| resolve_permutation(spec, p))
        .collect()
}
