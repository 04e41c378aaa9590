//! File and record lock manager with wait-for-graph deadlock detection.
//!
//! Two scopes (whole file, single record) and two modes (shared,
//! exclusive) combine into the lock a request actually takes, selected by
//! the request's `lock_bias` field. Waiters block on a condition
//! variable rather than polling; a waiter that would close a cycle in the
//! wait-for graph is aborted immediately with `Deadlock` instead of being
//! queued.

#[cfg(test)]
mod tests;

mod wait_for_graph;

use common::{FileId, RecordId, TxnId, XtError, XtResult};
use log::{debug, trace};
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use wait_for_graph::WaitForGraph;

/// How broadly a lock applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockKey {
    File(FileId),
    Record(FileId, RecordId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// The `lock_bias` request field, decoded into scope/mode/wait policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockBias {
    /// No lock is taken; the read does not block later writers.
    None,
    /// Single record, exclusive, wait until available.
    SingleWait,
    /// Single record, exclusive, fail immediately if held.
    SingleNoWait,
    /// Multiple records, exclusive, wait until available.
    MultiWait,
    /// Multiple records, exclusive, fail immediately if held.
    MultiNoWait,
}

impl LockBias {
    pub fn from_i16(value: i16) -> XtResult<Self> {
        Ok(match value {
            0 => LockBias::None,
            100 => LockBias::SingleWait,
            200 => LockBias::SingleNoWait,
            300 => LockBias::MultiWait,
            400 => LockBias::MultiNoWait,
            other => {
                return Err(XtError::InvalidOperation(format!(
                    "unrecognized lock bias {other}"
                )))
            }
        })
    }

    fn takes_lock(self) -> bool {
        !matches!(self, LockBias::None)
    }

    fn waits(self) -> bool {
        matches!(self, LockBias::SingleWait | LockBias::MultiWait)
    }

    /// A single-record bias replaces the session's previous single-record
    /// lock; a multi-record bias accumulates alongside prior locks.
    fn is_single_record(self) -> bool {
        matches!(self, LockBias::SingleWait | LockBias::SingleNoWait)
    }
}

struct LockEntry {
    mode: LockMode,
    holders: HashSet<TxnId>,
}

impl LockEntry {
    fn conflicts_with(&self, holder: TxnId, requested: LockMode) -> bool {
        if self.holders.is_empty() || (self.holders.len() == 1 && self.holders.contains(&holder)) {
            return false;
        }
        matches!((self.mode, requested), (_, LockMode::Exclusive) | (LockMode::Exclusive, _))
    }
}

struct Inner {
    locks: HashMap<LockKey, LockEntry>,
    holder_locks: HashMap<TxnId, HashSet<LockKey>>,
    single_record_lock: HashMap<TxnId, LockKey>,
    wait_for: WaitForGraph,
}

/// File/record advisory lock table shared by every open file's sessions.
pub struct LockManager {
    inner: Mutex<Inner>,
    cond: Condvar,
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

impl LockManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                locks: HashMap::new(),
                holder_locks: HashMap::new(),
                single_record_lock: HashMap::new(),
                wait_for: WaitForGraph::new(),
            }),
            cond: Condvar::new(),
        }
    }

    /// Acquires a file lock under the given bias. No-op for `LockBias::None`.
    pub fn lock_file(&self, holder: TxnId, file: FileId, bias: LockBias) -> XtResult<()> {
        self.lock(holder, LockKey::File(file), bias)
    }

    /// Acquires a record lock under the given bias. A single-record bias
    /// first releases the holder's previous single-record lock, if any.
    pub fn lock_record(
        &self,
        holder: TxnId,
        file: FileId,
        record_id: RecordId,
        bias: LockBias,
    ) -> XtResult<()> {
        self.lock(holder, LockKey::Record(file, record_id), bias)
    }

    fn lock(&self, holder: TxnId, key: LockKey, bias: LockBias) -> XtResult<()> {
        if !bias.takes_lock() {
            return Ok(());
        }
        if bias.is_single_record() {
            self.replace_single_record_lock(holder, key);
        }

        let mut guard = self.inner.lock().unwrap();
        loop {
            let entry = guard.locks.get(&key);
            let conflict = entry.is_some_and(|e| e.conflicts_with(holder, LockMode::Exclusive));
            if !conflict {
                let entry = guard
                    .locks
                    .entry(key)
                    .or_insert_with(|| LockEntry {
                        mode: LockMode::Exclusive,
                        holders: HashSet::new(),
                    });
                entry.mode = LockMode::Exclusive;
                entry.holders.insert(holder);
                guard.holder_locks.entry(holder).or_default().insert(key);
                guard.wait_for.remove_transaction(holder);
                if bias.is_single_record() {
                    guard.single_record_lock.insert(holder, key);
                }
                trace!("lock acquired: holder={holder:?} key={key:?}");
                return Ok(());
            }

            if !bias.waits() {
                debug!("lock denied without waiting: holder={holder:?} key={key:?}");
                return Err(match key {
                    LockKey::File(_) => XtError::FileLocked,
                    LockKey::Record(..) => XtError::RecordLocked,
                });
            }

            let blockers: Vec<TxnId> = entry.map(|e| e.holders.iter().copied().collect()).unwrap_or_default();
            for blocker in &blockers {
                guard.wait_for.add_edge(holder, *blocker);
            }
            if guard.wait_for.exists_cycle() {
                guard.wait_for.remove_transaction(holder);
                debug!("deadlock detected: holder={holder:?} key={key:?}");
                return Err(XtError::Deadlock);
            }

            let (new_guard, timeout) = self.cond.wait_timeout(guard, POLL_INTERVAL).unwrap();
            guard = new_guard;
            let _ = timeout;
        }
    }

    fn replace_single_record_lock(&self, holder: TxnId, new_key: LockKey) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(old_key) = guard.single_record_lock.get(&holder).copied() {
            if old_key != new_key {
                Self::release_key(&mut guard, holder, old_key);
                self.cond.notify_all();
            }
        }
    }

    /// Releases one specific lock held by `holder` (`Unlock` with the
    /// current-record bias).
    pub fn release(&self, holder: TxnId, key: LockKey) {
        let mut guard = self.inner.lock().unwrap();
        Self::release_key(&mut guard, holder, key);
        drop(guard);
        self.cond.notify_all();
    }

    /// Releases every lock held by `holder` (`Unlock -1`, `Close`, or
    /// transaction end).
    pub fn release_all(&self, holder: TxnId) {
        let mut guard = self.inner.lock().unwrap();
        let keys: Vec<LockKey> = guard
            .holder_locks
            .get(&holder)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        for key in keys {
            Self::release_key(&mut guard, holder, key);
        }
        guard.single_record_lock.remove(&holder);
        guard.wait_for.remove_transaction(holder);
        drop(guard);
        self.cond.notify_all();
    }

    fn release_key(guard: &mut Inner, holder: TxnId, key: LockKey) {
        if let Some(entry) = guard.locks.get_mut(&key) {
            entry.holders.remove(&holder);
            if entry.holders.is_empty() {
                guard.locks.remove(&key);
            }
        }
        if let Some(set) = guard.holder_locks.get_mut(&holder) {
            set.remove(&key);
        }
        if guard.single_record_lock.get(&holder) == Some(&key) {
            guard.single_record_lock.remove(&holder);
        }
    }

    /// Drops a waiting session's pending request, e.g. on connection
    /// teardown, without touching locks it already holds.
    pub fn cancel_wait(&self, holder: TxnId) {
        let mut guard = self.inner.lock().unwrap();
        guard.wait_for.remove_transaction(holder);
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
