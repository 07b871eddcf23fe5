//! Single-flight gate serializing reconciliation runs.
//!
//! Every pathway that starts a reconciliation, scheduled tick or operator
//! command, must pass through the same gate. Callers that fail to acquire
//! back off; they never block or queue.

use std::sync::Mutex;

/// One-bit exclusive lock. `try_acquire` transitions free to held,
/// `release` transitions held to free.
#[derive(Debug, Default)]
pub struct SyncGate {
    held: Mutex<bool>,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to take the gate. Returns false immediately when it is
    /// already held.
    pub fn try_acquire(&self) -> bool {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if *held {
            return false;
        }
        *held = true;
        true
    }

    /// Give the gate back. Releasing a free gate is a logic error: the
    /// process is no longer safe to continue, so this panics.
    pub fn release(&self) -> bool {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !*held {
            panic!("sync gate released while free");
        }
        *held = false;
        true
    }

    pub fn is_held(&self) -> bool {
        *self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquire as a guard that releases on drop, so every exit path of the
    /// caller gives the gate back exactly once.
    pub fn acquire(&self) -> Option<SyncGateGuard<'_>> {
        if self.try_acquire() {
            Some(SyncGateGuard { gate: self })
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub struct SyncGateGuard<'a> {
    gate: &'a SyncGate,
}

impl Drop for SyncGateGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
