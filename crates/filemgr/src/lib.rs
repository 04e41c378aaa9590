//! File manager: owns every open file's pager, indexes, locks, and
//! transaction state, and resolves position blocks to a descriptor plus
//! a physical cursor. Nothing upstream of this crate touches a `Pager`
//! or `BTreeIndex` directly.

#[cfg(test)]
mod tests;

use btree::{extract_key, BTreeIndex};
use buffer::{FilePager, Pager};
use common::{
    FileId, KeyDescriptor, OpenMode, PageId, PositionBlock, RecordId, TxnId, XtError, XtResult,
};
use hashbrown::HashMap;
use lock::{LockBias, LockKey, LockManager};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use storage::{Fcr, Page, PageKind, VariablePage};
use txn::TransactionManager;

const FCR_PAGE: PageId = PageId(0);
/// Bodies of `Free`-kind pages store only the next link in the chain.
const FREE_LINK_LEN: usize = 8;

fn read_free_link(page: &Page) -> Option<PageId> {
    let raw = u64::from_le_bytes(
        page.raw()[storage::HEADER_LEN..storage::HEADER_LEN + FREE_LINK_LEN]
            .try_into()
            .unwrap(),
    );
    (raw != u64::MAX).then_some(PageId(raw))
}

fn write_free_link(page: &mut Page, next: Option<PageId>) {
    let encoded = next.map(|p| p.0).unwrap_or(u64::MAX);
    page.raw_mut()[storage::HEADER_LEN..storage::HEADER_LEN + FREE_LINK_LEN]
        .copy_from_slice(&encoded.to_le_bytes());
}

/// True once every slot ever appended to `page` has been cleared; slot
/// count itself never shrinks, so emptiness means all of them are tombstoned.
fn page_is_empty(page: &Page) -> bool {
    (0..page.num_slots()).all(|slot| page.read_slot(slot).is_ok_and(|s| s.is_empty()))
}

/// One record plus the keys extracted from it, handed back on every
/// successful positioning operation.
#[derive(Debug, Clone)]
pub struct RecordView {
    pub record_id: RecordId,
    pub data: Vec<u8>,
}

struct FileDescriptor {
    path: PathBuf,
    generation: u32,
    ref_count: u32,
    pager: FilePager,
    fcr: Fcr,
    indexes: Vec<BTreeIndex>,
    locks: LockManager,
    txns: TransactionManager,
    /// Last data page an insert found room in; a cheap, in-memory-only hint
    /// that avoids scanning from page 1 on every insert. Lost on reopen.
    insert_hint: Option<PageId>,
}

/// Owns every currently open Btrieve file.
pub struct FileManager {
    buffer_pool_pages: usize,
    descriptors: HashMap<FileId, FileDescriptor>,
    path_to_id: HashMap<PathBuf, FileId>,
    generations: HashMap<PathBuf, u32>,
    next_file_id: u64,
}

impl FileManager {
    pub fn new(buffer_pool_pages: usize) -> Self {
        Self {
            buffer_pool_pages,
            descriptors: HashMap::new(),
            path_to_id: HashMap::new(),
            generations: HashMap::new(),
            next_file_id: 1,
        }
    }

    fn bump_generation(&mut self, path: &Path) -> u32 {
        let gen = self.generations.entry(path.to_path_buf()).or_insert(0);
        *gen += 1;
        *gen
    }

    /// Creates a new file on disk with the given page size, fixed record
    /// length, and key descriptor table, then opens it.
    pub fn create(
        &mut self,
        path: impl AsRef<Path>,
        page_size: u16,
        record_length: u16,
        key_descriptors: Vec<KeyDescriptor>,
    ) -> XtResult<(FileId, PositionBlock)> {
        let path = path.as_ref();
        storage::validate_page_size(page_size as usize)?;
        if path.exists() {
            return Err(XtError::InvalidOperation(format!(
                "{} already exists",
                path.display()
            )));
        }

        let mut pager = FilePager::open(path, page_size as usize, self.buffer_pool_pages)?;
        let fcr_id = pager.allocate_page(PageKind::Fcr)?;
        debug_assert_eq!(fcr_id, FCR_PAGE);

        let fcr = Fcr::new(page_size, record_length, key_descriptors);
        let encoded = fcr.encode()?;
        let page = pager.fetch_page_mut(FCR_PAGE)?;
        page.raw_mut()[storage::HEADER_LEN..].copy_from_slice(&encoded[storage::HEADER_LEN..]);
        pager.flush_page(FCR_PAGE)?;

        self.register(path, pager, fcr, 1)
    }

    /// Opens an existing file. A second open of the same path shares the
    /// descriptor and increments its reference count.
    pub fn open(&mut self, path: impl AsRef<Path>, _mode: OpenMode) -> XtResult<(FileId, PositionBlock)> {
        let path = path.as_ref().to_path_buf();
        if let Some(&id) = self.path_to_id.get(&path) {
            let desc = self.descriptors.get_mut(&id).unwrap();
            desc.ref_count += 1;
            return Ok((id, PositionBlock::new(id, desc.generation)));
        }
        if !path.exists() {
            return Err(XtError::FileNotFound);
        }
        let page_size = Self::peek_page_size(&path)?;
        let mut pager = FilePager::open(&path, page_size, self.buffer_pool_pages)?;
        let fcr = Fcr::decode(pager.fetch_page(FCR_PAGE)?.raw())?;
        self.register(&path, pager, fcr, 1)
    }

    fn peek_page_size(path: &Path) -> XtResult<usize> {
        let bytes = fs::read(path)
            .map_err(|e| XtError::Storage(format!("reading {}: {e}", path.display())))?;
        let offset = storage::HEADER_LEN;
        if bytes.len() < offset + 2 {
            return Err(XtError::Storage("file too small to contain an FCR".into()));
        }
        Ok(u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap()) as usize)
    }

    fn register(
        &mut self,
        path: &Path,
        pager: FilePager,
        fcr: Fcr,
        ref_count: u32,
    ) -> XtResult<(FileId, PositionBlock)> {
        let indexes = fcr
            .key_descriptors
            .iter()
            .map(|d| BTreeIndex::new(vec![*d]))
            .collect();
        let id = FileId(self.next_file_id);
        self.next_file_id += 1;
        let generation = self.bump_generation(path);

        self.descriptors.insert(
            id,
            FileDescriptor {
                path: path.to_path_buf(),
                generation,
                ref_count,
                pager,
                fcr,
                indexes,
                locks: LockManager::new(),
                txns: TransactionManager::new(),
                insert_hint: None,
            },
        );
        self.path_to_id.insert(path.to_path_buf(), id);
        info!("opened {} as file {}", path.display(), id.0);
        Ok((id, PositionBlock::new(id, generation)))
    }

    /// Decrements the reference count; on last release the file is
    /// flushed and its in-memory state dropped. `session` is implicitly
    /// unlocked and its transaction, if any, aborted.
    pub fn close(&mut self, file_id: FileId, session: TxnId) -> XtResult<()> {
        let desc = self
            .descriptors
            .get_mut(&file_id)
            .ok_or(XtError::FileNotOpen)?;
        if desc.txns.is_active(session) {
            desc.txns.abort_if_active(session, &mut desc.pager)?;
            desc.fcr = Fcr::decode(desc.pager.fetch_page(FCR_PAGE)?.raw())?;
        }
        desc.locks.release_all(session);
        desc.ref_count -= 1;
        if desc.ref_count == 0 {
            desc.pager.flush()?;
            let desc = self.descriptors.remove(&file_id).unwrap();
            self.path_to_id.remove(&desc.path);
        }
        Ok(())
    }

    fn descriptor(&self, file_id: FileId) -> XtResult<&FileDescriptor> {
        self.descriptors.get(&file_id).ok_or(XtError::FileNotOpen)
    }

    fn descriptor_mut(&mut self, file_id: FileId) -> XtResult<&mut FileDescriptor> {
        self.descriptors.get_mut(&file_id).ok_or(XtError::FileNotOpen)
    }

    /// Validates that `pb` still refers to a currently open file at the
    /// matching generation.
    pub fn validate(&self, pb: &PositionBlock) -> XtResult<FileId> {
        let file_id = pb.file_id;
        let desc = self.descriptor(file_id)?;
        if desc.generation != pb.generation {
            return Err(XtError::FileNotOpen);
        }
        Ok(file_id)
    }

    pub fn record_length(&self, file_id: FileId) -> XtResult<u16> {
        Ok(self.descriptor(file_id)?.fcr.record_length)
    }

    pub fn key_descriptor(&self, file_id: FileId, key_number: usize) -> XtResult<KeyDescriptor> {
        let fcr = &self.descriptor(file_id)?.fcr;
        fcr.key_descriptors
            .get(key_number)
            .copied()
            .ok_or(XtError::InvalidKeyNumber(key_number as i16))
    }

    pub fn num_keys(&self, file_id: FileId) -> XtResult<usize> {
        Ok(self.descriptor(file_id)?.fcr.num_keys())
    }

    pub fn stat(&self, file_id: FileId) -> XtResult<common::pretty::FileStat> {
        let fcr = &self.descriptor(file_id)?.fcr;
        Ok(common::pretty::FileStat {
            record_length: fcr.record_length,
            page_size: fcr.page_size,
            num_keys: fcr.num_keys() as u16,
            record_count: fcr.record_count,
        })
    }

    fn allocate_data_page(desc: &mut FileDescriptor) -> XtResult<PageId> {
        if let Some(head) = desc.fcr.free_chain_head {
            let next = read_free_link(desc.pager.fetch_page(head)?);
            desc.fcr.free_chain_head = next;
            let page_size = desc.pager.page_size();
            *desc.pager.fetch_page_mut(head)? = Page::new(head, page_size, PageKind::Data);
            return Ok(head);
        }
        desc.pager.allocate_page(PageKind::Data)
    }

    fn free_page(desc: &mut FileDescriptor, page_id: PageId) -> XtResult<()> {
        let head = desc.fcr.free_chain_head;
        let page = desc.pager.fetch_page_mut(page_id)?;
        *page = Page::new(page_id, page.size(), PageKind::Free);
        write_free_link(page, head);
        desc.fcr.free_chain_head = Some(page_id);
        Ok(())
    }

    fn persist_fcr(desc: &mut FileDescriptor, session: TxnId) -> XtResult<()> {
        if desc.txns.is_active(session) {
            desc.txns.record_write(session, &mut desc.pager, FCR_PAGE)?;
        }
        desc.fcr.fcr_version += 1;
        let encoded = desc.fcr.encode()?;
        let page = desc.pager.fetch_page_mut(FCR_PAGE)?;
        page.raw_mut()[storage::HEADER_LEN..].copy_from_slice(&encoded[storage::HEADER_LEN..]);
        if !desc.txns.is_active(session) {
            desc.pager.flush_page(FCR_PAGE)?;
        }
        Ok(())
    }

    /// Reads the full (possibly overflowed) record for a slot.
    fn read_record(desc: &mut FileDescriptor, record_id: RecordId) -> XtResult<Vec<u8>> {
        let page = desc.pager.fetch_page(record_id.page_id)?;
        let bytes = page.slot_bytes(record_id.slot)?;
        if bytes.first() == Some(&0xFFu8) && bytes.len() == 9 {
            let head = PageId(u64::from_le_bytes(bytes[1..9].try_into().unwrap()));
            let (payload, _) = VariablePage::read_chain(head, |pid| desc.pager.fetch_page(pid).map(|p| p.clone()))?;
            Ok(payload)
        } else {
            Ok(bytes.to_vec())
        }
    }

    /// Inserts `record`, rejecting duplicate keys on any index that
    /// forbids them before any page is mutated.
    pub fn insert(
        &mut self,
        file_id: FileId,
        session: TxnId,
        record: &[u8],
        lock_bias: LockBias,
    ) -> XtResult<RecordView> {
        let desc = self.descriptor_mut(file_id)?;
        if record.len() != desc.fcr.record_length as usize {
            return Err(XtError::DataBufferTooShort);
        }

        let keys: Vec<Option<types::CompositeKey>> = desc
            .fcr
            .key_descriptors
            .iter()
            .map(|d| extract_key(std::slice::from_ref(d), record))
            .collect();
        for (idx, key) in keys.iter().enumerate() {
            if let Some(key) = key {
                if !desc.indexes[idx].allows_duplicates()
                    && desc.indexes[idx]
                        .find_equal(&mut desc.pager, desc.fcr.index_roots[idx], key)?
                        .is_some()
                {
                    return Err(XtError::DuplicateKey);
                }
            }
        }

        let hint_fits = match desc.insert_hint {
            Some(pid) => desc.pager.fetch_page(pid)?.can_fit(record.len()),
            None => false,
        };
        let page_id = if hint_fits {
            desc.insert_hint.unwrap()
        } else {
            let pid = Self::allocate_data_page(desc)?;
            desc.insert_hint = Some(pid);
            pid
        };
        if desc.txns.is_active(session) {
            desc.txns.record_write(session, &mut desc.pager, page_id)?;
        }
        let page = desc.pager.fetch_page_mut(page_id)?;
        let slot = if page.can_fit(record.len()) {
            page.append_tuple(record)?
        } else {
            let pid = Self::allocate_data_page(desc)?;
            desc.insert_hint = Some(pid);
            if desc.txns.is_active(session) {
                desc.txns.record_write(session, &mut desc.pager, pid)?;
            }
            desc.pager.fetch_page_mut(pid)?.append_tuple(record)?
        };
        let record_id = RecordId {
            page_id: desc.insert_hint.unwrap(),
            slot,
        };

        for (idx, key) in keys.into_iter().enumerate() {
            if let Some(key) = key {
                desc.indexes[idx].insert(
                    &mut desc.pager,
                    &mut desc.fcr.index_roots[idx],
                    key,
                    record_id,
                    &mut desc.txns,
                    session,
                )?;
            }
        }
        desc.fcr.record_count += 1;
        Self::persist_fcr(desc, session)?;
        desc.locks.lock_record(session, file_id, record_id, lock_bias)?;

        Ok(RecordView {
            record_id,
            data: record.to_vec(),
        })
    }

    /// Deletes the record at `record_id`, removing it from every index.
    pub fn delete(
        &mut self,
        file_id: FileId,
        session: TxnId,
        record_id: RecordId,
        lock_bias: LockBias,
    ) -> XtResult<()> {
        let desc = self.descriptor_mut(file_id)?;
        desc.locks.lock_record(session, file_id, record_id, lock_bias)?;
        let record = Self::read_record(desc, record_id)?;

        for (idx, kd) in desc.fcr.key_descriptors.clone().iter().enumerate() {
            if let Some(key) = extract_key(std::slice::from_ref(kd), &record) {
                desc.indexes[idx].delete(
                    &mut desc.pager,
                    &mut desc.fcr.index_roots[idx],
                    &key,
                    record_id,
                    &mut desc.txns,
                    session,
                )?;
            }
        }
        if desc.txns.is_active(session) {
            desc.txns.record_write(session, &mut desc.pager, record_id.page_id)?;
        }
        let page = desc.pager.fetch_page_mut(record_id.page_id)?;
        page.clear_slot(record_id.slot)?;
        if page_is_empty(page) {
            if desc.insert_hint == Some(record_id.page_id) {
                desc.insert_hint = None;
            }
            Self::free_page(desc, record_id.page_id)?;
        }
        desc.fcr.record_count = desc.fcr.record_count.saturating_sub(1);
        Self::persist_fcr(desc, session)?;
        Ok(())
    }

    /// Replaces the record at `record_id` in place. Non-key bytes change
    /// without touching any index; changed key bytes are removed from the
    /// old position and reinserted.
    pub fn update(
        &mut self,
        file_id: FileId,
        session: TxnId,
        record_id: RecordId,
        new_record: &[u8],
        lock_bias: LockBias,
    ) -> XtResult<()> {
        let desc = self.descriptor_mut(file_id)?;
        if new_record.len() != desc.fcr.record_length as usize {
            return Err(XtError::DataBufferTooShort);
        }
        desc.locks.lock_record(session, file_id, record_id, lock_bias)?;
        let old_record = Self::read_record(desc, record_id)?;

        for (idx, kd) in desc.fcr.key_descriptors.clone().iter().enumerate() {
            let old_key = extract_key(std::slice::from_ref(kd), &old_record);
            let new_key = extract_key(std::slice::from_ref(kd), new_record);
            if old_key != new_key {
                if let Some(old_key) = old_key {
                    desc.indexes[idx].delete(
                        &mut desc.pager,
                        &mut desc.fcr.index_roots[idx],
                        &old_key,
                        record_id,
                        &mut desc.txns,
                        session,
                    )?;
                }
                if let Some(new_key) = new_key {
                    if !desc.indexes[idx].allows_duplicates()
                        && desc.indexes[idx]
                            .find_equal(&mut desc.pager, desc.fcr.index_roots[idx], &new_key)?
                            .is_some()
                    {
                        return Err(XtError::DuplicateKey);
                    }
                    desc.indexes[idx].insert(
                        &mut desc.pager,
                        &mut desc.fcr.index_roots[idx],
                        new_key,
                        record_id,
                        &mut desc.txns,
                        session,
                    )?;
                }
            }
        }
        if desc.txns.is_active(session) {
            desc.txns.record_write(session, &mut desc.pager, record_id.page_id)?;
        }
        desc.pager
            .fetch_page_mut(record_id.page_id)?
            .rewrite_slot_in_place(record_id.slot, new_record)?;
        Self::persist_fcr(desc, session)?;
        Ok(())
    }

    /// Resolves `cursor` into a `RecordView`, taking a record lock under
    /// `lock_bias` on the record it lands on first. A positioning op that
    /// finds nothing locks nothing.
    fn cursor_to_view(
        desc: &mut FileDescriptor,
        file_id: FileId,
        session: TxnId,
        cursor: Option<btree::Cursor>,
        lock_bias: LockBias,
    ) -> XtResult<Option<RecordView>> {
        match cursor {
            None => Ok(None),
            Some(c) => {
                desc.locks.lock_record(session, file_id, c.record_id, lock_bias)?;
                let data = Self::read_record(desc, c.record_id)?;
                Ok(Some(RecordView {
                    record_id: c.record_id,
                    data,
                }))
            }
        }
    }

    pub fn get_equal(
        &mut self,
        file_id: FileId,
        session: TxnId,
        key_number: usize,
        key: &types::CompositeKey,
        lock_bias: LockBias,
    ) -> XtResult<Option<RecordView>> {
        let desc = self.descriptor_mut(file_id)?;
        let cursor = desc.indexes[key_number].find_equal_prefix(&mut desc.pager, desc.fcr.index_roots[key_number], key)?;
        Self::cursor_to_view(desc, file_id, session, cursor, lock_bias)
    }

    pub fn get_ge(
        &mut self,
        file_id: FileId,
        session: TxnId,
        key_number: usize,
        key: &types::CompositeKey,
        strict: bool,
        lock_bias: LockBias,
    ) -> XtResult<Option<RecordView>> {
        let desc = self.descriptor_mut(file_id)?;
        let cursor = desc.indexes[key_number].find_ge_like(&mut desc.pager, desc.fcr.index_roots[key_number], key, strict)?;
        Self::cursor_to_view(desc, file_id, session, cursor, lock_bias)
    }

    pub fn get_le(
        &mut self,
        file_id: FileId,
        session: TxnId,
        key_number: usize,
        key: &types::CompositeKey,
        strict: bool,
        lock_bias: LockBias,
    ) -> XtResult<Option<RecordView>> {
        let desc = self.descriptor_mut(file_id)?;
        let cursor = desc.indexes[key_number].find_le_like(&mut desc.pager, desc.fcr.index_roots[key_number], key, strict)?;
        Self::cursor_to_view(desc, file_id, session, cursor, lock_bias)
    }

    pub fn get_first(
        &mut self,
        file_id: FileId,
        session: TxnId,
        key_number: usize,
        lock_bias: LockBias,
    ) -> XtResult<Option<RecordView>> {
        let desc = self.descriptor_mut(file_id)?;
        let cursor = desc.indexes[key_number].first(&mut desc.pager, desc.fcr.index_roots[key_number])?;
        Self::cursor_to_view(desc, file_id, session, cursor, lock_bias)
    }

    pub fn get_last(
        &mut self,
        file_id: FileId,
        session: TxnId,
        key_number: usize,
        lock_bias: LockBias,
    ) -> XtResult<Option<RecordView>> {
        let desc = self.descriptor_mut(file_id)?;
        let cursor = desc.indexes[key_number].last(&mut desc.pager, desc.fcr.index_roots[key_number])?;
        Self::cursor_to_view(desc, file_id, session, cursor, lock_bias)
    }

    /// `GetNext`/`GetPrev`/step ops: re-locates `current` within
    /// `key_number`'s index, then steps by one entry.
    pub fn step(
        &mut self,
        file_id: FileId,
        session: TxnId,
        key_number: usize,
        current: RecordId,
        forward: bool,
        lock_bias: LockBias,
    ) -> XtResult<Option<RecordView>> {
        let desc = self.descriptor_mut(file_id)?;
        let current_record = Self::read_record(desc, current)?;
        let kd = desc.fcr.key_descriptors[key_number];
        let key = extract_key(std::slice::from_ref(&kd), &current_record).ok_or(XtError::InvalidPositioning)?;
        let anchor = desc.indexes[key_number]
            .find_equal(&mut desc.pager, desc.fcr.index_roots[key_number], &key)?
            .ok_or(XtError::InvalidPositioning)?;
        let mut cursor = anchor;
        while cursor.record_id != current {
            let next = if forward {
                desc.indexes[key_number].cursor_next(&mut desc.pager, cursor)?
            } else {
                desc.indexes[key_number].cursor_prev(&mut desc.pager, cursor)?
            };
            cursor = next.ok_or(XtError::InvalidPositioning)?;
        }
        let stepped = if forward {
            desc.indexes[key_number].cursor_next(&mut desc.pager, cursor)?
        } else {
            desc.indexes[key_number].cursor_prev(&mut desc.pager, cursor)?
        };
        Self::cursor_to_view(desc, file_id, session, stepped, lock_bias)
    }

    fn physical_first(desc: &mut FileDescriptor) -> XtResult<Option<RecordId>> {
        let page_count = desc.pager.file_page_count()?;
        for page_num in 1..page_count {
            let page_id = PageId(page_num);
            let page = desc.pager.fetch_page(page_id)?;
            if page.header()?.kind != PageKind::Data {
                continue;
            }
            for slot in 0..page.num_slots() {
                if !page.read_slot(slot)?.is_empty() {
                    return Ok(Some(RecordId { page_id, slot }));
                }
            }
        }
        Ok(None)
    }

    fn physical_last(desc: &mut FileDescriptor) -> XtResult<Option<RecordId>> {
        let page_count = desc.pager.file_page_count()?;
        for page_num in (1..page_count).rev() {
            let page_id = PageId(page_num);
            let page = desc.pager.fetch_page(page_id)?;
            if page.header()?.kind != PageKind::Data {
                continue;
            }
            for slot in (0..page.num_slots()).rev() {
                if !page.read_slot(slot)?.is_empty() {
                    return Ok(Some(RecordId { page_id, slot }));
                }
            }
        }
        Ok(None)
    }

    fn physical_next(desc: &mut FileDescriptor, current: RecordId) -> XtResult<Option<RecordId>> {
        let page_count = desc.pager.file_page_count()?;
        let page = desc.pager.fetch_page(current.page_id)?;
        if page.header()?.kind == PageKind::Data {
            for slot in (current.slot + 1)..page.num_slots() {
                if !page.read_slot(slot)?.is_empty() {
                    return Ok(Some(RecordId { page_id: current.page_id, slot }));
                }
            }
        }
        for page_num in (current.page_id.0 + 1)..page_count {
            let page_id = PageId(page_num);
            let page = desc.pager.fetch_page(page_id)?;
            if page.header()?.kind != PageKind::Data {
                continue;
            }
            for slot in 0..page.num_slots() {
                if !page.read_slot(slot)?.is_empty() {
                    return Ok(Some(RecordId { page_id, slot }));
                }
            }
        }
        Ok(None)
    }

    fn physical_prev(desc: &mut FileDescriptor, current: RecordId) -> XtResult<Option<RecordId>> {
        let page = desc.pager.fetch_page(current.page_id)?;
        if page.header()?.kind == PageKind::Data && current.slot > 0 {
            for slot in (0..current.slot).rev() {
                if !page.read_slot(slot)?.is_empty() {
                    return Ok(Some(RecordId { page_id: current.page_id, slot }));
                }
            }
        }
        if current.page_id.0 <= 1 {
            return Ok(None);
        }
        for page_num in (1..current.page_id.0).rev() {
            let page_id = PageId(page_num);
            let page = desc.pager.fetch_page(page_id)?;
            if page.header()?.kind != PageKind::Data {
                continue;
            }
            for slot in (0..page.num_slots()).rev() {
                if !page.read_slot(slot)?.is_empty() {
                    return Ok(Some(RecordId { page_id, slot }));
                }
            }
        }
        Ok(None)
    }

    /// `StepFirst`/`StepLast`/`StepNext`/`StepPrev`: physical page/slot
    /// order traversal, ignorant of any index. `current` is `None` for the
    /// endpoint steps, `Some` for `StepNext`/`StepPrev`.
    pub fn step_physical(
        &mut self,
        file_id: FileId,
        session: TxnId,
        current: Option<RecordId>,
        forward: bool,
        lock_bias: LockBias,
    ) -> XtResult<Option<RecordView>> {
        let desc = self.descriptor_mut(file_id)?;
        let next = match (current, forward) {
            (None, true) => Self::physical_first(desc)?,
            (None, false) => Self::physical_last(desc)?,
            (Some(c), true) => Self::physical_next(desc, c)?,
            (Some(c), false) => Self::physical_prev(desc, c)?,
        };
        Self::cursor_to_view(
            desc,
            file_id,
            session,
            next.map(|record_id| btree::Cursor {
                leaf: record_id.page_id,
                slot: 0,
                record_id,
            }),
            lock_bias,
        )
    }

    pub fn begin(&mut self, file_id: FileId, session: TxnId) -> XtResult<()> {
        self.descriptor_mut(file_id)?.txns.begin(session)
    }

    pub fn commit(&mut self, file_id: FileId, session: TxnId) -> XtResult<()> {
        let desc = self.descriptor_mut(file_id)?;
        desc.txns.commit(session, &mut desc.pager, FCR_PAGE)
    }

    pub fn abort(&mut self, file_id: FileId, session: TxnId) -> XtResult<()> {
        let desc = self.descriptor_mut(file_id)?;
        desc.txns.abort(session, &mut desc.pager)?;
        // `abort` restored every touched data/index page's before-image,
        // including the FCR page; resync the in-memory `Fcr` (index
        // roots, free chain head) from the now-rolled-back bytes.
        desc.fcr = Fcr::decode(desc.pager.fetch_page(FCR_PAGE)?.raw())?;
        Ok(())
    }

    pub fn unlock(&mut self, file_id: FileId, session: TxnId, key: LockKey) {
        if let Ok(desc) = self.descriptor_mut(file_id) {
            desc.locks.release(session, key);
        }
    }

    pub fn unlock_all(&mut self, file_id: FileId, session: TxnId) {
        if let Ok(desc) = self.descriptor_mut(file_id) {
            desc.locks.release_all(session);
        }
    }
}
