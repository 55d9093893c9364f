//! Transaction counter.
//!
//! Tracks the last assigned commit transaction and the last transaction
//! made durable by the log. Both are monotone; durable never passes
//! commit. Waiters block on a condvar signaled by the log thread.

use parking_lot::{Condvar, Mutex};

pub use tansu_core::MAX_TXN;

#[derive(Default)]
pub struct TransactionCounter {
    state: Mutex<Counters>,
    durable_cv: Condvar,
}

#[derive(Default)]
struct Counters {
    last_commit: i64,
    last_durable: i64,
}

impl TransactionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next commit transaction.
    pub fn assign_commit(&self) -> i64 {
        let mut state = self.state.lock();
        state.last_commit += 1;
        state.last_commit
    }

    pub fn last_commit(&self) -> i64 {
        self.state.lock().last_commit
    }

    pub fn last_durable(&self) -> i64 {
        self.state.lock().last_durable
    }

    /// Mark `txn` durable. Clamped to last_commit; stale values are
    /// ignored.
    pub fn set_durable(&self, txn: i64) {
        let mut state = self.state.lock();
        let txn = txn.min(state.last_commit);
        if txn > state.last_durable {
            state.last_durable = txn;
            self.durable_cv.notify_all();
        }
    }

    /// Raise both counters to at least `txn`; used after log replay,
    /// whose commits are durable by construction.
    pub fn recover_to(&self, txn: i64) {
        let mut state = self.state.lock();
        if txn > state.last_commit {
            state.last_commit = txn;
        }
        if txn > state.last_durable {
            state.last_durable = txn;
            self.durable_cv.notify_all();
        }
    }

    /// Block until `target` is durable. A target past the last assigned
    /// commit waits for the last assigned commit instead. Returns the
    /// awaited transaction.
    pub fn wait_durable(&self, target: i64) -> i64 {
        let mut state = self.state.lock();
        let target = target.min(state.last_commit);
        while state.last_durable < target {
            self.durable_cv.wait(&mut state);
        }
        target
    }
}
