//! Collapses concurrent loads of the same key into one call.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

enum CallState<V, E> {
    Pending,
    Finished(Result<V, E>),
    /// The leader unwound without producing a result.
    Abandoned,
}

struct Call<V, E> {
    state: Mutex<CallState<V, E>>,
    ready: Condvar,
}

impl<V: Clone, E: Clone> Call<V, E> {
    fn new() -> Self {
        Self {
            state: Mutex::new(CallState::Pending),
            ready: Condvar::new(),
        }
    }

    /// Blocks until the leader settles. `None` means the leader was abandoned.
    fn wait(&self) -> Option<Result<V, E>> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                CallState::Pending => self.ready.wait(&mut state),
                CallState::Finished(outcome) => return Some(outcome.clone()),
                CallState::Abandoned => return None,
            }
        }
    }

    fn settle(&self, next: CallState<V, E>) {
        *self.state.lock() = next;
        self.ready.notify_all();
    }
}

/// Per-key in-flight markers with load-and-broadcast semantics.
///
/// The first caller for a key runs the loader; callers arriving while it runs
/// block and receive a clone of its outcome, success or failure. Nothing is
/// remembered once the call settles, so a failed load is retried by the next
/// caller. If the loader panics, waiters are released and one of them takes
/// over as the new leader.
pub struct SingleFlight<K, V, E> {
    calls: Mutex<HashMap<K, Arc<Call<V, E>>>>,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `load` for `key` unless a load for it is already in flight, in
    /// which case waits for and returns that load's outcome.
    pub fn work<F>(&self, key: &K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let call = loop {
            let (call, leader) = self.join(key);
            if leader {
                break call;
            }
            if let Some(outcome) = call.wait() {
                return outcome;
            }
        };

        let mut flight = Flight {
            group: self,
            key,
            call,
            settled: false,
        };
        let outcome = load();
        flight.settle(CallState::Finished(outcome.clone()));
        outcome
    }

    /// Number of keys with a load currently running.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    /// Handles held on the in-flight call for `key`: the group's own, the
    /// leader's and one per waiter.
    #[cfg(test)]
    fn holders(&self, key: &K) -> usize {
        self.calls.lock().get(key).map_or(0, Arc::strong_count)
    }

    fn join(&self, key: &K) -> (Arc<Call<V, E>>, bool) {
        let mut calls = self.calls.lock();
        if let Some(call) = calls.get(key) {
            return (Arc::clone(call), false);
        }
        let call = Arc::new(Call::new());
        calls.insert(key.clone(), Arc::clone(&call));
        (call, true)
    }

    fn release(&self, key: &K, call: &Arc<Call<V, E>>) {
        let mut calls = self.calls.lock();
        if calls.get(key).is_some_and(|current| Arc::ptr_eq(current, call)) {
            calls.remove(key);
        }
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Leader-side handle; settles the call even if the loader unwinds.
struct Flight<'a, K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    group: &'a SingleFlight<K, V, E>,
    key: &'a K,
    call: Arc<Call<V, E>>,
    settled: bool,
}

impl<K, V, E> Flight<'_, K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn settle(&mut self, state: CallState<V, E>) {
        self.group.release(self.key, &self.call);
        self.call.settle(state);
        self.settled = true;
    }
}

impl<K, V, E> Drop for Flight<'_, K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        if !self.settled {
            self.settle(CallState::Abandoned);
        }
    }
}
