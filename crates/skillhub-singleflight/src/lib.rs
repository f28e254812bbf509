//! # skillhub-singleflight
//!
//! Deduplicates concurrent identical calls by key: `Group::work(key, f)`
//! guarantees exactly one execution of `f` per key at a time, fanning the
//! result out to every concurrent caller. Used by the proxy fetcher with
//! key `"{repo_id}:{slug}:{version}"` so a thundering herd of readers
//! missing the same artifact triggers one upstream fetch.
//!
//! Built on a mutex + condvar hand-off, the same shape the teacher uses
//! for its lock-file polling and for waiting on a batch of publish
//! `JoinHandle`s — no async runtime required.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex};

enum CallState<V, E> {
    Pending,
    Done(Result<V, E>),
}

struct Call<V, E> {
    state: Mutex<CallState<V, E>>,
    condvar: Condvar,
}

/// A coalescing group for one family of keyed calls.
pub struct Group<K, V, E> {
    calls: Mutex<HashMap<K, Arc<Call<V, E>>>>,
}

impl<K, V, E> Default for Group<K, V, E>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> Group<K, V, E>
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

    /// Runs `f` for `key` if no call for that key is in flight, otherwise
    /// blocks until the in-flight call completes and returns its result.
    /// The returned `bool` is `true` ("shared") for every caller except
    /// the one that actually ran `f`.
    ///
    /// A waiter that stops polling (e.g. the caller's own deadline)
    /// cannot cancel the in-flight execution — there is nothing here for
    /// it to cancel; `f` runs to completion on the winner's thread
    /// regardless of how many waiters are still listening.
    pub fn work<F>(&self, key: K, f: F) -> (Result<V, E>, bool)
    where
        F: FnOnce() -> Result<V, E>,
    {
        let call = {
            let mut calls = self.calls.lock().expect("singleflight map mutex poisoned");
            if let Some(existing) = calls.get(&key) {
                let call = Arc::clone(existing);
                drop(calls);
                return (Self::wait(&call), true);
            }
            let call = Arc::new(Call {
                state: Mutex::new(CallState::Pending),
                condvar: Condvar::new(),
            });
            calls.insert(key.clone(), Arc::clone(&call));
            call
        };

        let result = f();

        {
            let mut state = call.state.lock().expect("singleflight call mutex poisoned");
            *state = CallState::Done(result.clone());
            call.condvar.notify_all();
        }
        {
            let mut calls = self.calls.lock().expect("singleflight map mutex poisoned");
            calls.remove(&key);
        }

        (result, false)
    }

    fn wait(call: &Arc<Call<V, E>>) -> Result<V, E> {
        let mut state = call.state.lock().expect("singleflight call mutex poisoned");
        loop {
            match &*state {
                CallState::Done(result) => return result.clone(),
                CallState::Pending => {
                    state = call
                        .condvar
                        .wait(state)
                        .expect("singleflight condvar wait poisoned");
                }
            }
        }
    }
}
