// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use super::Completion;
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};

/// Collects in-flight completions so none is dropped before it resolves.
///
/// Futures produced continuously during application execution can be parked
/// here; [`wait_all`][FutureWaiter::wait_all] blocks until every one of
/// them has resolved, with a value or a failure. Entries remove themselves
/// through a completion callback, so the set only ever holds pending work.
pub struct FutureWaiter {
    shared: Arc<Shared>,
}

struct Shared {
    pending: Mutex<Pending>,
    cv: Condvar,
}

struct Pending {
    next_id: u64,
    entries: HashSet<u64>,
}

// === impl FutureWaiter ===

impl FutureWaiter {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(Pending {
                    next_id: 0,
                    entries: HashSet::new(),
                }),
                cv: Condvar::new(),
            }),
        }
    }

    /// Adds a completion to the set.
    ///
    /// Already-resolved completions are accepted; their callback runs inline
    /// and the entry never becomes observable.
    pub fn add(&self, completion: Completion) {
        let id = {
            let mut pending = self.shared.pending.lock().unwrap();
            let id = pending.next_id;
            pending.next_id += 1;
            pending.entries.insert(id);
            id
        };
        let shared = self.shared.clone();
        completion.on_complete(move || {
            let mut pending = shared.pending.lock().unwrap();
            pending.entries.remove(&id);
            if pending.entries.is_empty() {
                shared.cv.notify_all();
            }
        });
    }

    /// Blocks until the set is empty.
    pub fn wait_all(&self) {
        let mut pending = self.shared.pending.lock().unwrap();
        while !pending.entries.is_empty() {
            pending = self.shared.cv.wait(pending).unwrap();
        }
    }
}

impl Default for FutureWaiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ThreadPool;
    use crate::future::{run_async_on, Promise};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn waits_for_every_future() {
        let pool = Arc::new(ThreadPool::new(3));
        let waiter = FutureWaiter::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let done = done.clone();
            let f = run_async_on(&pool, move || {
                std::thread::sleep(Duration::from_millis(5));
                done.fetch_add(1, Ordering::SeqCst);
            });
            waiter.add(f.completion());
        }
        waiter.wait_all();
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn already_complete_entries_do_not_block() {
        let waiter = FutureWaiter::new();
        let p = Promise::new();
        p.set(1);
        waiter.add(p.future().completion());
        waiter.wait_all();
    }

    #[test]
    fn failed_futures_count_as_resolved() {
        let waiter = FutureWaiter::new();
        let p = Promise::<i32>::new();
        waiter.add(p.future().completion());
        p.fail(crate::failure::Failure::new("nope"));
        waiter.wait_all();
    }
}
