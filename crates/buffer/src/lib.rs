//! Per-file page cache and positioned I/O.
//!
//! A [`FilePager`] sits between one open Btrieve file and the rest of the
//! engine: it reads and writes fixed-size pages through positioned I/O and
//! keeps a bounded, pinnable LRU cache of the pages currently in use. It
//! has no notion of FCR free-chains, B+ trees, or transactions — those
//! live one layer up, in `filemgr`, which treats this crate purely as a
//! `read(page_id)`/`write(page_id, page)`/`allocate()` surface.


use common::{PageId, XtError, XtResult};
use hashbrown::HashMap;
use lru::LruCache;
use log::trace;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::Path;
use storage::{Page, PageKind};

/// Abstraction for fetching, allocating, and flushing pages of one open
/// file. Implementors own eviction policy and dirty tracking.
pub trait Pager {
    /// Fetch a page read-only, loading it from disk on a cache miss.
    fn fetch_page(&mut self, pid: PageId) -> XtResult<&Page>;

    /// Fetch a page for mutation. The page is marked dirty immediately;
    /// it is the caller's job to have already captured a before-image if
    /// a transaction's write-set needs one.
    fn fetch_page_mut(&mut self, pid: PageId) -> XtResult<&mut Page>;

    /// Extend the file by one page of the given kind and cache it. The
    /// page is always appended at the current end of file; reuse of
    /// freed pages is the free-chain's concern, one layer up.
    fn allocate_page(&mut self, kind: PageKind) -> XtResult<PageId>;

    /// Pin a page against eviction. Pins nest; each call must be matched
    /// by an `unpin`.
    fn pin(&mut self, pid: PageId);

    /// Release one pin taken by `pin`.
    fn unpin(&mut self, pid: PageId);

    /// Flush every dirty page to stable storage.
    fn flush(&mut self) -> XtResult<()>;

    /// Flush one page immediately, independent of eviction order. Used by
    /// the transaction manager's ordered commit write-back.
    fn flush_page(&mut self, pid: PageId) -> XtResult<()>;

    fn page_size(&self) -> usize;

    /// Number of pages currently in the file (including page 0).
    fn file_page_count(&mut self) -> XtResult<u64>;
}

struct CacheEntry {
    page: Page,
    dirty: bool,
}

/// File-backed buffer pool for a single open Btrieve file, with LRU
/// eviction and reference-counted pinning.
pub struct FilePager {
    file: File,
    page_size: usize,
    max_pages: usize,
    cache: LruCache<PageId, CacheEntry>,
    pins: HashMap<PageId, u32>,
}

impl FilePager {
    pub fn open(path: impl AsRef<Path>, page_size: usize, max_pages: usize) -> XtResult<Self> {
        assert!(max_pages > 0, "max_pages must be > 0");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())
            .map_err(|e| XtError::Storage(format!("opening {}: {e}", path.as_ref().display())))?;
        Ok(Self {
            file,
            page_size,
            max_pages,
            cache: LruCache::new(NonZeroUsize::new(max_pages).unwrap()),
            pins: HashMap::new(),
        })
    }

    fn offset(&self, pid: PageId) -> u64 {
        pid.0 * self.page_size as u64
    }

    fn read_from_disk(&mut self, pid: PageId) -> XtResult<Page> {
        let mut buf = vec![0u8; self.page_size];
        self.file.seek(SeekFrom::Start(self.offset(pid)))?;
        let n = self.file.read(&mut buf)?;
        if n == 0 {
            return Err(XtError::Storage(format!("page {} does not exist", pid.0)));
        }
        if n < self.page_size {
            return Err(XtError::Storage(format!(
                "short read on page {}: expected {} bytes, got {n}",
                pid.0, self.page_size
            )));
        }
        Ok(Page::from_bytes(pid, buf))
    }

    fn write_to_disk(&mut self, page: &Page) -> XtResult<()> {
        self.file.seek(SeekFrom::Start(self.offset(page.id)))?;
        self.file.write_all(page.raw())?;
        Ok(())
    }

    pub fn sync(&mut self) -> XtResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn is_pinned(&self, pid: PageId) -> bool {
        self.pins.get(&pid).copied().unwrap_or(0) > 0
    }

    /// Evict one clean-or-flushed, unpinned page if the cache is over
    /// capacity. Scans from the least-recently-used end, skipping pinned
    /// entries; if everything resident is pinned the cache is allowed to
    /// grow past `max_pages` rather than violate a pin.
    fn evict_if_needed(&mut self) -> XtResult<()> {
        if self.cache.len() < self.max_pages {
            return Ok(());
        }
        let candidate = self
            .cache
            .iter()
            .rev()
            .map(|(pid, _)| *pid)
            .find(|pid| !self.is_pinned(*pid));

        let Some(pid) = candidate else {
            trace!("cache over capacity but every resident page is pinned");
            return Ok(());
        };
        if let Some(entry) = self.cache.pop(&pid) {
            if entry.dirty {
                self.write_to_disk(&entry.page)?;
            }
        }
        Ok(())
    }

    fn ensure_cached(&mut self, pid: PageId) -> XtResult<()> {
        if self.cache.contains(&pid) {
            return Ok(());
        }
        let page = self.read_from_disk(pid)?;
        self.evict_if_needed()?;
        self.cache.push(
            pid,
            CacheEntry {
                page,
                dirty: false,
            },
        );
        Ok(())
    }
}

impl Pager for FilePager {
    fn fetch_page(&mut self, pid: PageId) -> XtResult<&Page> {
        self.ensure_cached(pid)?;
        Ok(&self.cache.get(&pid).unwrap().page)
    }

    fn fetch_page_mut(&mut self, pid: PageId) -> XtResult<&mut Page> {
        self.ensure_cached(pid)?;
        let entry = self.cache.get_mut(&pid).unwrap();
        entry.dirty = true;
        Ok(&mut entry.page)
    }

    fn allocate_page(&mut self, kind: PageKind) -> XtResult<PageId> {
        let len = self.file.metadata()?.len();
        let pid = PageId(len / self.page_size as u64);
        let page = Page::new(pid, self.page_size, kind);
        self.write_to_disk(&page)?;

        self.evict_if_needed()?;
        self.cache.push(
            pid,
            CacheEntry {
                page,
                dirty: false,
            },
        );
        Ok(pid)
    }

    fn pin(&mut self, pid: PageId) {
        *self.pins.entry(pid).or_insert(0) += 1;
    }

    fn unpin(&mut self, pid: PageId) {
        if let Some(count) = self.pins.get_mut(&pid) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pins.remove(&pid);
            }
        }
    }

    fn flush(&mut self) -> XtResult<()> {
        let dirty: Vec<PageId> = self
            .cache
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(pid, _)| *pid)
            .collect();
        for pid in dirty {
            self.flush_page(pid)?;
        }
        Ok(())
    }

    fn flush_page(&mut self, pid: PageId) -> XtResult<()> {
        if let Some(entry) = self.cache.peek(&pid) {
            if entry.dirty {
                self.write_to_disk(&entry.page)?;
            }
        }
        if let Some(entry) = self.cache.get_mut(&pid) {
            entry.dirty = false;
        }
        Ok(())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn file_page_count(&mut self) -> XtResult<u64> {
        Ok(self.file.metadata()?.len() / self.page_size as u64)
    }
}
