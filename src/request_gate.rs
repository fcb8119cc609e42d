//! Request Gate (C11, §4.11): serializes workflow invocations per client.
//!
//! `try_acquire` returns an RAII [`GateGuard`] on success so the gate cannot
//! be leaked by an early return or a panicking workflow body — `Drop`
//! releases it unconditionally (§9 "at most one active workflow per client").

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Default, Clone)]
pub struct RequestGate {
    held: Arc<Mutex<HashSet<String>>>,
}

impl RequestGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire the gate for `client`. Returns `None` if a
    /// workflow is already in flight for that client (§3 invariant 5).
    pub fn try_acquire(&self, client: &str) -> Option<GateGuard> {
        let mut held = self.held.lock().expect("request gate lock poisoned");
        if held.contains(client) {
            return None;
        }
        held.insert(client.to_string());
        Some(GateGuard {
            held: self.held.clone(),
            client: client.to_string(),
        })
    }

    pub fn is_held(&self, client: &str) -> bool {
        self.held.lock().expect("request gate lock poisoned").contains(client)
    }
}

/// Releases the gate for its client on drop, including on panic unwind.
pub struct GateGuard {
    held: Arc<Mutex<HashSet<String>>>,
    client: String,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.client);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_for_same_client_fails() {
        let gate = RequestGate::new();
        let first = gate.try_acquire("c1");
        assert!(first.is_some());
        assert!(gate.try_acquire("c1").is_none());
    }

    #[test]
    fn different_clients_do_not_conflict() {
        let gate = RequestGate::new();
        let _first = gate.try_acquire("c1").unwrap();
        assert!(gate.try_acquire("c2").is_some());
    }

    #[test]
    fn drop_releases_the_gate() {
        let gate = RequestGate::new();
        {
            let _guard = gate.try_acquire("c1").unwrap();
            assert!(gate.is_held("c1"));
        }
        assert!(!gate.is_held("c1"));
        assert!(gate.try_acquire("c1").is_some());
    }

    #[test]
    fn guard_releases_even_on_panic_unwind() {
        let gate = RequestGate::new();
        let gate_clone = gate.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = gate_clone.try_acquire("c1").unwrap();
            panic!("workflow exploded");
        });
        assert!(result.is_err());
        assert!(!gate.is_held("c1"));
    }
}
