//! Token Accountant (C10, §4.10): process-wide cumulative tallies.
//!
//! `add` is the single entry point, guarded by a mutex held only for the
//! duration of the integer addition (§5, §9 "Process-wide token counter").
//! The caller broadcasts the returned snapshot to the Event Bus *after* the
//! lock is released.

use crate::models::TokenTally;
use std::sync::Mutex;

#[derive(Default)]
pub struct TokenAccountant {
    tally: Mutex<TokenTally>,
}

impl TokenAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the tally by an authoritative per-call delta and returns the
    /// new cumulative snapshot. Never decrements (§3 invariant 6).
    pub fn add(&self, input: u64, output: u64, thinking: u64) -> TokenTally {
        let mut tally = self.tally.lock().expect("token accountant lock poisoned");
        tally.total_input += input;
        tally.total_output += output;
        tally.total_thinking += thinking;
        tally.call_count += 1;
        *tally
    }

    pub fn snapshot(&self) -> TokenTally {
        *self.tally.lock().expect("token accountant lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_cumulative_and_never_decreases() {
        let accountant = TokenAccountant::new();
        let first = accountant.add(100, 50, 20);
        let second = accountant.add(10, 5, 2);

        assert_eq!(first.call_count, 1);
        assert_eq!(second.total_input, 110);
        assert_eq!(second.total_output, 55);
        assert_eq!(second.total_thinking, 22);
        assert_eq!(second.call_count, 2);
    }

    #[test]
    fn snapshot_matches_last_add() {
        let accountant = TokenAccountant::new();
        accountant.add(1, 1, 1);
        let snap = accountant.snapshot();
        assert_eq!(snap.call_count, 1);
    }
}
