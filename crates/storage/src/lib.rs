//! Page-level on-disk layout: the page header, slotted data/index pages,
//! the File Control Record (FCR), and variable-length overflow chains.
//!
//! This crate only interprets and produces fixed-size byte buffers; it
//! knows nothing about files, caching, or concurrency. `buffer` owns the
//! actual I/O and presents pages produced here to the rest of the engine.

use common::{KeyDescriptor, PageId, XtError, XtResult};


/// Page sizes a file may be created with.
pub const VALID_PAGE_SIZES: [usize; 4] = [512, 1024, 2048, 4096];

pub fn validate_page_size(size: usize) -> XtResult<()> {
    if VALID_PAGE_SIZES.contains(&size) {
        Ok(())
    } else {
        Err(XtError::Storage(format!(
            "page size {size} is not one of {VALID_PAGE_SIZES:?}"
        )))
    }
}

/// The closed set of page kinds a file's pages can be tagged with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PageKind {
    Fcr = 0,
    Data = 1,
    Index = 2,
    Variable = 3,
    Free = 4,
}

impl PageKind {
    fn from_tag(tag: u8) -> XtResult<Self> {
        Ok(match tag {
            0 => PageKind::Fcr,
            1 => PageKind::Data,
            2 => PageKind::Index,
            3 => PageKind::Variable,
            4 => PageKind::Free,
            other => {
                return Err(XtError::Storage(format!(
                    "corrupt page header: unrecognized kind tag {other}"
                )))
            }
        })
    }
}

/// Every page carries a kind tag and a version counter used to detect
/// write ordering on crash recovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageHeader {
    pub kind: PageKind,
    pub version: u32,
}

pub const HEADER_LEN: usize = 5; // 1 byte kind tag + 4 byte little-endian version
const SLOT_LEN: usize = 4; // u16 offset + u16 len, both little-endian

/// A single fixed-size page buffer, addressed by its physical id. The body
/// layout beyond the 5-byte header depends on [`PageKind`]:
/// `Data`/`Index` pages are slotted (see [`Page::append_tuple`] and
/// friends); `Fcr` and `Variable` pages are interpreted by [`Fcr`] and
/// [`VariablePage`] respectively.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    size: usize,
    data: Vec<u8>,
}

impl Page {
    pub fn new(id: PageId, size: usize, kind: PageKind) -> Self {
        let mut page = Self {
            id,
            size,
            data: vec![0u8; size],
        };
        page.write_header(&PageHeader { kind, version: 0 });
        if matches!(kind, PageKind::Data | PageKind::Index) {
            page.write_slot_header(&SlotHeader::empty(size));
        }
        page
    }

    /// Wraps an already-populated buffer (as read off disk).
    pub fn from_bytes(id: PageId, data: Vec<u8>) -> Self {
        let size = data.len();
        Self { id, size, data }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    pub fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn header(&self) -> XtResult<PageHeader> {
        let kind = PageKind::from_tag(self.data[0])?;
        let version = u32::from_le_bytes(self.data[1..5].try_into().unwrap());
        Ok(PageHeader { kind, version })
    }

    pub fn write_header(&mut self, header: &PageHeader) {
        self.data[0] = header.kind as u8;
        self.data[1..5].copy_from_slice(&header.version.to_le_bytes());
    }

    /// Bumps and persists the version counter, returning the new value.
    /// Called by the pager immediately before a dirty page is flushed.
    pub fn bump_version(&mut self) -> XtResult<u32> {
        let mut header = self.header()?;
        header.version += 1;
        self.write_header(&header);
        Ok(header.version)
    }

    fn slot_header(&self) -> SlotHeader {
        SlotHeader {
            num_slots: u16::from_le_bytes(self.data[HEADER_LEN..HEADER_LEN + 2].try_into().unwrap()),
            free_offset: u16::from_le_bytes(
                self.data[HEADER_LEN + 2..HEADER_LEN + 4].try_into().unwrap(),
            ),
        }
    }

    fn write_slot_header(&mut self, sh: &SlotHeader) {
        self.data[HEADER_LEN..HEADER_LEN + 2].copy_from_slice(&sh.num_slots.to_le_bytes());
        self.data[HEADER_LEN + 2..HEADER_LEN + 4].copy_from_slice(&sh.free_offset.to_le_bytes());
    }

    fn slot_table_start(&self) -> usize {
        HEADER_LEN + 4
    }

    fn slot_offset(&self, slot_idx: u16) -> usize {
        self.slot_table_start() + slot_idx as usize * SLOT_LEN
    }

    pub fn num_slots(&self) -> u16 {
        self.slot_header().num_slots
    }

    pub fn read_slot(&self, slot_idx: u16) -> XtResult<Slot> {
        if slot_idx >= self.num_slots() {
            return Err(XtError::Storage(format!("slot {slot_idx} out of bounds")));
        }
        let start = self.slot_offset(slot_idx);
        Ok(Slot {
            offset: u16::from_le_bytes(self.data[start..start + 2].try_into().unwrap()),
            len: u16::from_le_bytes(self.data[start + 2..start + 4].try_into().unwrap()),
        })
    }

    fn write_slot(&mut self, slot_idx: u16, slot: &Slot) {
        let start = self.slot_offset(slot_idx);
        self.data[start..start + 2].copy_from_slice(&slot.offset.to_le_bytes());
        self.data[start + 2..start + 4].copy_from_slice(&slot.len.to_le_bytes());
    }

    pub fn slot_bytes(&self, slot_idx: u16) -> XtResult<&[u8]> {
        let slot = self.read_slot(slot_idx)?;
        if slot.is_empty() {
            return Err(XtError::Storage(format!("slot {slot_idx} is empty")));
        }
        let start = slot.offset as usize;
        let end = start + slot.len as usize;
        Ok(&self.data[start..end])
    }

    fn free_space(&self) -> usize {
        let sh = self.slot_header();
        let slots_end = self.slot_table_start() + sh.num_slots as usize * SLOT_LEN;
        (sh.free_offset as usize).saturating_sub(slots_end)
    }

    pub fn can_fit(&self, payload_len: usize) -> bool {
        self.free_space() >= payload_len + SLOT_LEN
    }

    /// Appends `bytes` as a new slot, growing from the tail of the page.
    /// Returns the new slot index.
    pub fn append_tuple(&mut self, bytes: &[u8]) -> XtResult<u16> {
        if bytes.len() > u16::MAX as usize {
            return Err(XtError::Storage("tuple exceeds maximum slot size".into()));
        }
        let mut sh = self.slot_header();
        if sh.num_slots == u16::MAX {
            return Err(XtError::Storage("slot index overflow".into()));
        }
        if !self.can_fit(bytes.len()) {
            return Err(XtError::Storage("page full".into()));
        }
        let slot_idx = sh.num_slots;
        let len = bytes.len() as u16;
        let new_free_offset = sh.free_offset - len;
        self.data[new_free_offset as usize..sh.free_offset as usize].copy_from_slice(bytes);

        self.write_slot(
            slot_idx,
            &Slot {
                offset: new_free_offset,
                len,
            },
        );
        sh.num_slots += 1;
        sh.free_offset = new_free_offset;
        self.write_slot_header(&sh);
        Ok(slot_idx)
    }

    /// Marks a slot empty in place. The bytes it pointed to become
    /// unreachable but are not compacted; only `append_tuple` reclaims
    /// space, by allocating a fresh page once the tail is exhausted.
    pub fn clear_slot(&mut self, slot_idx: u16) -> XtResult<()> {
        let mut slot = self.read_slot(slot_idx)?;
        if slot.is_empty() {
            return Err(XtError::Storage(format!("slot {slot_idx} already empty")));
        }
        slot.len = 0;
        self.write_slot(slot_idx, &slot);
        Ok(())
    }

    /// Overwrites a slot's payload in place. Only valid when the new
    /// payload is no longer than the old one; callers needing growth must
    /// clear and re-append (or route the tail through `VariablePage`).
    pub fn rewrite_slot_in_place(&mut self, slot_idx: u16, bytes: &[u8]) -> XtResult<()> {
        let slot = self.read_slot(slot_idx)?;
        if slot.is_empty() {
            return Err(XtError::Storage(format!("slot {slot_idx} is empty")));
        }
        if bytes.len() > slot.len as usize {
            return Err(XtError::Storage(
                "in-place rewrite cannot grow a slot".into(),
            ));
        }
        let start = slot.offset as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.write_slot(
            slot_idx,
            &Slot {
                offset: slot.offset,
                len: bytes.len() as u16,
            },
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotHeader {
    num_slots: u16,
    free_offset: u16,
}

impl SlotHeader {
    fn empty(page_size: usize) -> Self {
        Self {
            num_slots: 0,
            free_offset: page_size as u16,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Slot {
    pub offset: u16,
    pub len: u16,
}

impl Slot {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The File Control Record stored on page 0: file-wide metadata plus the
/// key descriptor table. Immutable-after-create fields are set once by
/// `Create`; mutable fields move as the file is used.
#[derive(Debug, Clone, PartialEq)]
pub struct Fcr {
    // Immutable after create.
    pub page_size: u16,
    pub record_length: u16,
    pub key_descriptors: Vec<KeyDescriptor>,
    // Mutable.
    pub index_roots: Vec<Option<PageId>>,
    pub free_chain_head: Option<PageId>,
    pub record_count: u64,
    pub next_page_id: u64,
    pub fcr_version: u32,
}

impl Fcr {
    pub fn new(page_size: u16, record_length: u16, key_descriptors: Vec<KeyDescriptor>) -> Self {
        let num_keys = key_descriptors.len();
        Self {
            page_size,
            record_length,
            key_descriptors,
            index_roots: vec![None; num_keys],
            free_chain_head: None,
            record_count: 0,
            next_page_id: 1,
            fcr_version: 0,
        }
    }

    pub fn num_keys(&self) -> usize {
        self.key_descriptors.len()
    }

    /// Encode into a page-0-sized buffer: a compact header of scalar
    /// fields followed by the key descriptor table and index root array,
    /// both fixed-stride so decoding never needs a length prefix beyond
    /// `num_keys`.
    pub fn encode(&self) -> XtResult<Vec<u8>> {
        let mut buf = vec![0u8; self.page_size as usize];
        let mut off = HEADER_LEN; // leave room for the generic page header
        buf[off..off + 2].copy_from_slice(&self.page_size.to_le_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&self.record_length.to_le_bytes());
        off += 2;
        buf[off..off + 2].copy_from_slice(&(self.num_keys() as u16).to_le_bytes());
        off += 2;
        buf[off..off + 8].copy_from_slice(
            &self.free_chain_head.map(|p| p.0).unwrap_or(u64::MAX).to_le_bytes(),
        );
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.record_count.to_le_bytes());
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.next_page_id.to_le_bytes());
        off += 8;
        buf[off..off + 4].copy_from_slice(&self.fcr_version.to_le_bytes());
        off += 4;

        for root in &self.index_roots {
            let encoded = root.map(|p| p.0).unwrap_or(u64::MAX);
            if off + 8 > buf.len() {
                return Err(XtError::Storage("FCR overflows page size".into()));
            }
            buf[off..off + 8].copy_from_slice(&encoded.to_le_bytes());
            off += 8;
        }
        for desc in &self.key_descriptors {
            if off + 14 > buf.len() {
                return Err(XtError::Storage(
                    "FCR key descriptor table overflows page size".into(),
                ));
            }
            buf[off..off + 2].copy_from_slice(&desc.position.to_le_bytes());
            buf[off + 2..off + 4].copy_from_slice(&desc.length.to_le_bytes());
            buf[off + 4] = key_type_tag(desc.key_type);
            buf[off + 5..off + 7].copy_from_slice(&desc.flags.bits().to_le_bytes());
            buf[off + 7] = desc.null_value;
            off += 14;
        }
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> XtResult<Self> {
        let mut off = HEADER_LEN;
        let page_size = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());
        off += 2;
        let record_length = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());
        off += 2;
        let num_keys = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap()) as usize;
        off += 2;
        let free_chain_raw = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let record_count = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let next_page_id = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let fcr_version = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;

        let mut index_roots = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            let raw = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
            index_roots.push((raw != u64::MAX).then_some(PageId(raw)));
            off += 8;
        }
        let mut key_descriptors = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            let position = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());
            let length = u16::from_le_bytes(buf[off + 2..off + 4].try_into().unwrap());
            let key_type = key_type_from_tag(buf[off + 4])?;
            let flags_bits = u16::from_le_bytes(buf[off + 5..off + 7].try_into().unwrap());
            let null_value = buf[off + 7];
            key_descriptors.push(KeyDescriptor {
                position,
                length,
                key_type,
                flags: common::KeyFlags::from_bits_truncate(flags_bits),
                null_value,
            });
            off += 14;
        }

        Ok(Self {
            page_size,
            record_length,
            key_descriptors,
            index_roots,
            free_chain_head: (free_chain_raw != u64::MAX).then_some(PageId(free_chain_raw)),
            record_count,
            next_page_id,
            fcr_version,
        })
    }
}

pub fn key_type_tag(key_type: types::KeyType) -> u8 {
    use types::KeyType::*;
    match key_type {
        Integer => 0,
        Unsigned => 1,
        Decimal => 2,
        Money => 3,
        Float => 4,
        BFloat => 5,
        String => 6,
        ZString => 7,
    }
}

pub fn key_type_from_tag(tag: u8) -> XtResult<types::KeyType> {
    use types::KeyType::*;
    Ok(match tag {
        0 => Integer,
        1 => Unsigned,
        2 => Decimal,
        3 => Money,
        4 => Float,
        5 => BFloat,
        6 => String,
        7 => ZString,
        other => return Err(XtError::Storage(format!("unrecognized key type tag {other}"))),
    })
}

/// One node of an overflow chain: a `Variable`-kind page holding the next
/// link and as much of the tail payload as fits.
pub struct VariablePage;

impl VariablePage {
    const LINK_LEN: usize = 8; // next page id, u64::MAX meaning none
    const LEN_LEN: usize = 4; // bytes of payload stored in this node

    fn capacity(page_size: usize) -> usize {
        page_size - HEADER_LEN - Self::LINK_LEN - Self::LEN_LEN
    }

    /// Splits `payload` across a chain of freshly allocated pages, calling
    /// `alloc` for each page id needed (head first). Returns the head id.
    pub fn write_chain(
        payload: &[u8],
        page_size: usize,
        mut alloc: impl FnMut() -> XtResult<PageId>,
        mut write: impl FnMut(Page) -> XtResult<()>,
    ) -> XtResult<PageId> {
        let cap = Self::capacity(page_size);
        let mut chunks: Vec<&[u8]> = payload.chunks(cap).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let ids: Vec<PageId> = (0..chunks.len())
            .map(|_| alloc())
            .collect::<XtResult<_>>()?;

        for (i, chunk) in chunks.iter().enumerate() {
            let next = ids.get(i + 1).copied();
            let mut page = Page::new(ids[i], page_size, PageKind::Variable);
            let mut off = HEADER_LEN;
            page.data_mut()[off..off + Self::LINK_LEN]
                .copy_from_slice(&next.map(|p| p.0).unwrap_or(u64::MAX).to_le_bytes());
            off += Self::LINK_LEN;
            page.data_mut()[off..off + Self::LEN_LEN]
                .copy_from_slice(&(chunk.len() as u32).to_le_bytes());
            off += Self::LEN_LEN;
            page.data_mut()[off..off + chunk.len()].copy_from_slice(chunk);
            write(page)?;
        }
        Ok(ids[0])
    }

    /// Reads the full payload by following `read` across the chain
    /// starting at `head`, returning every visited page id (for freeing).
    pub fn read_chain(
        head: PageId,
        mut read: impl FnMut(PageId) -> XtResult<Page>,
    ) -> XtResult<(Vec<u8>, Vec<PageId>)> {
        let mut payload = Vec::new();
        let mut visited = Vec::new();
        let mut cursor = Some(head);
        while let Some(id) = cursor {
            let page = read(id)?;
            visited.push(id);
            let mut off = HEADER_LEN;
            let next_raw = u64::from_le_bytes(page.raw()[off..off + Self::LINK_LEN].try_into().unwrap());
            off += Self::LINK_LEN;
            let len = u32::from_le_bytes(page.raw()[off..off + Self::LEN_LEN].try_into().unwrap()) as usize;
            off += Self::LEN_LEN;
            payload.extend_from_slice(&page.raw()[off..off + len]);
            cursor = (next_raw != u64::MAX).then_some(PageId(next_raw));
        }
        Ok((payload, visited))
    }
}
