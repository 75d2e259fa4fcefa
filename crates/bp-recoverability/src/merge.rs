//! Attempt history merge.

use bp_common::ProcessingAttempt;

/// Fold `attempt` into `attempts`.
///
/// An attempt with the same `attempted_at` as an existing one replaces it in
/// place; otherwise it is appended. The history is then sorted ascending and
/// trimmed to the `max` most recent attempts. Trimmed attempts are dropped.
pub fn merge_attempt(attempts: &mut Vec<ProcessingAttempt>, attempt: ProcessingAttempt, max: usize) {
    match attempts
        .iter_mut()
        .find(|existing| existing.attempted_at == attempt.attempted_at)
    {
        Some(existing) => *existing = attempt,
        None => attempts.push(attempt),
    }

    attempts.sort_by_key(|a| a.attempted_at);

    let max = max.max(1);
    if attempts.len() > max {
        let excess = attempts.len() - max;
        attempts.drain(..excess);
    }
}
