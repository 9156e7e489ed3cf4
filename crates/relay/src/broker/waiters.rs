// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory registry of parked `await` calls, keyed by session handle.
//!
//! Volatile: lost with the broker task. Owned by the actor, so no locking.

use std::collections::HashMap;

use tokio::sync::oneshot;

/// What a parked waiter is woken with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wake {
    Token(String),
    /// The session was swept while the waiter was parked.
    Expired,
}

#[derive(Debug, Default)]
pub struct WaiterRegistry {
    next_id: u64,
    waiters: HashMap<String, Vec<(u64, oneshot::Sender<Wake>)>>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a new waiter on `handle`.
    pub fn register(&mut self, handle: &str) -> (u64, oneshot::Receiver<Wake>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        let list = self.waiters.entry(handle.to_owned()).or_default();
        list.retain(|(_, tx)| !tx.is_closed());
        list.push((id, tx));
        (id, rx)
    }

    /// Remove one waiter. Other waiters on the same handle are untouched.
    pub fn unregister(&mut self, handle: &str, id: u64) -> bool {
        let Some(list) = self.waiters.get_mut(handle) else {
            return false;
        };
        let before = list.len();
        list.retain(|(wid, _)| *wid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.waiters.remove(handle);
        }
        removed
    }

    /// Drain every waiter on `handle` and deliver the token.
    ///
    /// Returns how many waiters were still listening.
    pub fn wake(&mut self, handle: &str, token: &str) -> usize {
        self.drain(handle, || Wake::Token(token.to_owned()))
    }

    /// Drain every waiter on `handle` with [`Wake::Expired`].
    pub fn expire(&mut self, handle: &str) -> usize {
        self.drain(handle, || Wake::Expired)
    }

    fn drain(&mut self, handle: &str, wake: impl Fn() -> Wake) -> usize {
        self.waiters
            .remove(handle)
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, tx)| !tx.is_closed())
            .filter_map(|(_, tx)| tx.send(wake()).ok())
            .count()
    }

    /// Number of waiters parked on `handle`.
    pub fn count(&self, handle: &str) -> usize {
        self.waiters.get(handle).map_or(0, Vec::len)
    }

    /// Total parked waiters across all handles, not counting abandoned ones.
    pub fn len(&self) -> usize {
        self.waiters.values().flatten().filter(|(_, tx)| !tx.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

#[cfg(test)]
#[path = "waiters_tests.rs"]
mod tests;
