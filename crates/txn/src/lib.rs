//! Transaction manager: in-memory write-set tracking for one open file.
//!
//! Unlike a durable redo log, recovery here trusts the last FCR version
//! published to disk. A transaction captures a before-image of every page
//! it touches the first time it touches it; `End` (commit) writes
//! data/index pages back first and the FCR last, so a crash mid-commit
//! never leaves the FCR pointing at index roots that were never flushed.
//! `Abort` restores every before-image in reverse touch order.


use buffer::Pager;
use common::{PageId, TxnId, XtError, XtResult};
use log::debug;

struct WriteSetEntry {
    page_id: PageId,
    before: Vec<u8>,
}

struct Transaction {
    write_set: Vec<WriteSetEntry>,
    touched: std::collections::HashSet<PageId>,
}

/// Tracks the single active transaction (if any) for each session of one
/// open file.
#[derive(Default)]
pub struct TransactionManager {
    active: std::collections::HashMap<TxnId, Transaction>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, txn: TxnId) -> bool {
        self.active.contains_key(&txn)
    }

    pub fn begin(&mut self, txn: TxnId) -> XtResult<()> {
        if self.active.contains_key(&txn) {
            return Err(XtError::TransactionActive);
        }
        self.active.insert(
            txn,
            Transaction {
                write_set: Vec::new(),
                touched: std::collections::HashSet::new(),
            },
        );
        Ok(())
    }

    /// Captures a before-image of `page_id` the first time `txn` touches
    /// it. Must be called before the caller mutates the page through the
    /// pager. A no-op for pages already touched this transaction.
    pub fn record_write(&mut self, txn: TxnId, pager: &mut dyn Pager, page_id: PageId) -> XtResult<()> {
        let transaction = self
            .active
            .get_mut(&txn)
            .ok_or(XtError::TransactionNotActive)?;
        if transaction.touched.insert(page_id) {
            let before = pager.fetch_page(page_id)?.raw().to_vec();
            transaction.write_set.push(WriteSetEntry { page_id, before });
        }
        Ok(())
    }

    /// Like `record_write`, but a no-op rather than an error when `txn`
    /// has no active transaction. Lets callers that don't track
    /// transaction state themselves (e.g. `btree`) call through
    /// unconditionally.
    pub fn record_write_if_active(
        &mut self,
        txn: TxnId,
        pager: &mut dyn Pager,
        page_id: PageId,
    ) -> XtResult<()> {
        if self.is_active(txn) {
            self.record_write(txn, pager, page_id)?;
        }
        Ok(())
    }

    /// Commits `txn`: flushes every touched page except `fcr_page`, then
    /// flushes `fcr_page` last. Only once that final write returns is the
    /// transaction considered durable.
    pub fn commit(&mut self, txn: TxnId, pager: &mut dyn Pager, fcr_page: PageId) -> XtResult<()> {
        let transaction = self
            .active
            .remove(&txn)
            .ok_or(XtError::TransactionNotActive)?;

        for entry in &transaction.write_set {
            if entry.page_id != fcr_page {
                pager.flush_page(entry.page_id)?;
            }
        }
        pager.flush_page(fcr_page).map_err(|e| {
            debug!("commit failed flushing fcr page for txn {txn:?}: {e}");
            XtError::TransactionFailed
        })?;
        Ok(())
    }

    /// Aborts `txn`, restoring every touched page's before-image in
    /// reverse order and discarding the write-set.
    pub fn abort(&mut self, txn: TxnId, pager: &mut dyn Pager) -> XtResult<()> {
        let transaction = self
            .active
            .remove(&txn)
            .ok_or(XtError::TransactionNotActive)?;

        for entry in transaction.write_set.iter().rev() {
            let page = pager.fetch_page_mut(entry.page_id)?;
            page.raw_mut().copy_from_slice(&entry.before);
            pager.flush_page(entry.page_id)?;
        }
        Ok(())
    }

    /// Aborts `txn` if active; used when `Close` implicitly ends a
    /// participating transaction. Unlike `abort`, a missing transaction is
    /// not an error.
    pub fn abort_if_active(&mut self, txn: TxnId, pager: &mut dyn Pager) -> XtResult<()> {
        if self.is_active(txn) {
            self.abort(txn, pager)?;
        }
        Ok(())
    }
}
