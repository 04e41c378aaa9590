
pub mod pretty;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use types::KeyType;

/// Logical identifier for a page within an open file.
/// Examples:
/// - `let fcr = PageId(0);`
/// - `let data_page = PageId(42);`
/// - `let index_root = PageId(9001);`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u64);

/// Identifier of an open file descriptor within the file manager, stable
/// for the lifetime of the descriptor (distinct from the file's path).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(pub u64);

/// Opaque (page id, slot index) tuple identifying a physical record. Never
/// exposed over the wire; only carried inside a [`PositionBlock`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u16,
}

/// Identifier for the transaction owned by one session, if any.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxnId(pub u64);

bitflags! {
    /// Flags carried by a key descriptor (`KEY_DUP` etc., mirroring the
    /// bit layout applications already link against).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct KeyFlags: u16 {
        const DUPLICATES = 0x0001;
        const MODIFIABLE = 0x0002;
        const BINARY     = 0x0004;
        const NULLABLE   = 0x0008;
        const SEGMENTED  = 0x0010;
        const DESCENDING = 0x0020;
        const SUPPLEMENTAL = 0x0040;
    }
}

/// Declaration of one key (or one segment of a segmented key): where it
/// lives in the fixed record, how long it is, and how it compares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    pub position: u16,
    pub length: u16,
    pub key_type: KeyType,
    pub flags: KeyFlags,
    pub null_value: u8,
}

impl KeyDescriptor {
    pub fn is_nullable(&self) -> bool {
        self.flags.contains(KeyFlags::NULLABLE)
    }

    pub fn allows_duplicates(&self) -> bool {
        self.flags.contains(KeyFlags::DUPLICATES)
    }

    pub fn is_descending(&self) -> bool {
        self.flags.contains(KeyFlags::DESCENDING)
    }
}

/// Open mode requested on `Open`, carried in the request's `key_number`
/// field (-1 normal, -2 read-only, -3 exclusive).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    Normal,
    ReadOnly,
    Exclusive,
}

impl OpenMode {
    pub fn from_key_number(value: i16) -> XtResult<Self> {
        match value {
            -1 => Ok(OpenMode::Normal),
            -2 => Ok(OpenMode::ReadOnly),
            -3 => Ok(OpenMode::Exclusive),
            other => Err(XtError::Protocol(format!("unrecognized open mode {other}"))),
        }
    }
}

/// The 128-byte client-opaque handle identifying `(file, cursor, session
/// generation)`. The server echoes an updated copy on every response.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionBlock {
    pub file_id: FileId,
    pub generation: u32,
    pub cursor_page: PageId,
    pub cursor_slot: u16,
    pub key_number: i16,
    pub positioned: bool,
}

pub const POSITION_BLOCK_LEN: usize = 128;

impl PositionBlock {
    /// A freshly-minted, unpositioned block for `file_id` at `generation`.
    pub fn new(file_id: FileId, generation: u32) -> Self {
        Self {
            file_id,
            generation,
            cursor_page: PageId(0),
            cursor_slot: 0,
            key_number: 0,
            positioned: false,
        }
    }

    /// The empty, all-zero block used before a session has opened a file.
    pub fn null() -> Self {
        Self {
            file_id: FileId(0),
            generation: 0,
            cursor_page: PageId(0),
            cursor_slot: 0,
            key_number: 0,
            positioned: false,
        }
    }

    pub fn is_null(&self) -> bool {
        self.file_id.0 == 0 && self.generation == 0
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.positioned.then_some(RecordId {
            page_id: self.cursor_page,
            slot: self.cursor_slot,
        })
    }

    pub fn unposition(&mut self) {
        self.positioned = false;
    }

    pub fn reposition(&mut self, rid: RecordId, key_number: i16) {
        self.cursor_page = rid.page_id;
        self.cursor_slot = rid.slot;
        self.key_number = key_number;
        self.positioned = true;
    }

    /// Encode into the fixed 128-byte wire representation: header fields
    /// packed little-endian, the remainder zero-padded.
    pub fn encode(&self) -> [u8; POSITION_BLOCK_LEN] {
        let mut buf = [0u8; POSITION_BLOCK_LEN];
        buf[0..8].copy_from_slice(&self.file_id.0.to_le_bytes());
        buf[8..12].copy_from_slice(&self.generation.to_le_bytes());
        buf[12..20].copy_from_slice(&self.cursor_page.0.to_le_bytes());
        buf[20..22].copy_from_slice(&self.cursor_slot.to_le_bytes());
        buf[22..24].copy_from_slice(&self.key_number.to_le_bytes());
        buf[24] = self.positioned as u8;
        buf
    }

    /// Decode a position block echoed back by a client. Callers must
    /// separately validate `file_id`/`generation` against the file
    /// manager's live descriptor table.
    pub fn decode(buf: &[u8; POSITION_BLOCK_LEN]) -> Self {
        Self {
            file_id: FileId(u64::from_le_bytes(buf[0..8].try_into().unwrap())),
            generation: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            cursor_page: PageId(u64::from_le_bytes(buf[12..20].try_into().unwrap())),
            cursor_slot: u16::from_le_bytes(buf[20..22].try_into().unwrap()),
            key_number: i16::from_le_bytes(buf[22..24].try_into().unwrap()),
            positioned: buf[24] != 0,
        }
    }
}

impl std::fmt::Debug for PositionBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionBlock")
            .field("file_id", &self.file_id)
            .field("generation", &self.generation)
            .field("positioned", &self.positioned)
            .field("cursor_page", &self.cursor_page)
            .field("cursor_slot", &self.cursor_slot)
            .field("key_number", &self.key_number)
            .finish()
    }
}

/// Status codes returned over the wire, per the protocol's numeric table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum StatusCode {
    Success = 0,
    InvalidOperation = 1,
    Io = 2,
    FileNotOpen = 3,
    KeyNotFound = 4,
    DuplicateKey = 5,
    InvalidKeyNumber = 6,
    DifferentKeyNumber = 7,
    InvalidPositioning = 8,
    EndOfFile = 9,
    FileNotFound = 12,
    DiskFull = 18,
    Internal = 20,
    DataBufferTooShort = 22,
    TransactionError = 36,
    TransactionActive = 37,
    TransactionNotActive = 38,
    TransactionFailed = 39,
    Deadlock = 78,
    RecordLocked = 84,
    FileLocked = 85,
    FileAlreadyOpen = 88,
    Permission = 94,
}

impl StatusCode {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Reverse of [`StatusCode::code`], for a caller (e.g. `client`) that
    /// only has the raw wire value and wants the mnemonic back.
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0 => Self::Success,
            1 => Self::InvalidOperation,
            2 => Self::Io,
            3 => Self::FileNotOpen,
            4 => Self::KeyNotFound,
            5 => Self::DuplicateKey,
            6 => Self::InvalidKeyNumber,
            7 => Self::DifferentKeyNumber,
            8 => Self::InvalidPositioning,
            9 => Self::EndOfFile,
            12 => Self::FileNotFound,
            18 => Self::DiskFull,
            20 => Self::Internal,
            22 => Self::DataBufferTooShort,
            36 => Self::TransactionError,
            37 => Self::TransactionActive,
            38 => Self::TransactionNotActive,
            39 => Self::TransactionFailed,
            78 => Self::Deadlock,
            84 => Self::RecordLocked,
            85 => Self::FileLocked,
            88 => Self::FileAlreadyOpen,
            94 => Self::Permission,
            _ => return None,
        })
    }
}

/// Canonical error type shared across every engine subsystem. Each variant
/// maps to exactly one [`StatusCode`] at the dispatcher boundary.
#[derive(Error, Debug)]
pub enum XtError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("storage: {0}")]
    Storage(String),
    #[error("btree: {0}")]
    Btree(String),
    #[error("lock: {0}")]
    Lock(String),
    #[error("txn: {0}")]
    Txn(String),
    #[error("file manager: {0}")]
    FileManager(String),
    #[error("protocol: {0}")]
    Protocol(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("file not open")]
    FileNotOpen,
    #[error("file not found")]
    FileNotFound,
    #[error("file already open")]
    FileAlreadyOpen,
    #[error("key not found")]
    KeyNotFound,
    #[error("duplicate key")]
    DuplicateKey,
    #[error("invalid key number {0}")]
    InvalidKeyNumber(i16),
    #[error("different key number")]
    DifferentKeyNumber,
    #[error("invalid positioning")]
    InvalidPositioning,
    #[error("end of file")]
    EndOfFile,
    #[error("disk full")]
    DiskFull,
    #[error("data buffer too short")]
    DataBufferTooShort,
    #[error("transaction already active")]
    TransactionActive,
    #[error("no active transaction")]
    TransactionNotActive,
    #[error("transaction failed")]
    TransactionFailed,
    #[error("deadlock detected")]
    Deadlock,
    #[error("record locked")]
    RecordLocked,
    #[error("file locked")]
    FileLocked,
    #[error("permission denied")]
    Permission,
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias that carries an `XtError`.
pub type XtResult<T> = Result<T, XtError>;

/// Maps a subsystem error to the wire status code the dispatcher returns.
/// This is the single place that performs that translation; subsystems
/// never encode a `StatusCode` themselves.
pub fn status_for_error(err: &XtError) -> StatusCode {
    match err {
        XtError::Io(_) | XtError::Storage(_) => StatusCode::Io,
        XtError::FileNotOpen => StatusCode::FileNotOpen,
        XtError::FileNotFound => StatusCode::FileNotFound,
        XtError::FileAlreadyOpen => StatusCode::FileAlreadyOpen,
        XtError::KeyNotFound | XtError::Btree(_) => StatusCode::KeyNotFound,
        XtError::DuplicateKey => StatusCode::DuplicateKey,
        XtError::InvalidKeyNumber(_) => StatusCode::InvalidKeyNumber,
        XtError::DifferentKeyNumber => StatusCode::DifferentKeyNumber,
        XtError::InvalidPositioning => StatusCode::InvalidPositioning,
        XtError::EndOfFile => StatusCode::EndOfFile,
        XtError::DiskFull => StatusCode::DiskFull,
        XtError::DataBufferTooShort => StatusCode::DataBufferTooShort,
        XtError::TransactionActive => StatusCode::TransactionError,
        XtError::TransactionNotActive => StatusCode::TransactionError,
        XtError::TransactionFailed | XtError::Txn(_) => StatusCode::TransactionFailed,
        XtError::Deadlock => StatusCode::Deadlock,
        XtError::RecordLocked | XtError::Lock(_) => StatusCode::RecordLocked,
        XtError::FileLocked => StatusCode::FileLocked,
        XtError::Permission => StatusCode::Permission,
        XtError::InvalidOperation(_) | XtError::Protocol(_) => StatusCode::InvalidOperation,
        XtError::FileManager(_) | XtError::Internal(_) => StatusCode::Internal,
    }
}

/// Runtime configuration for the storage engine and server.
///
/// # Example
/// ```
/// use common::EngineConfig;
/// use std::path::PathBuf;
///
/// let config = EngineConfig::builder()
///     .data_dir(PathBuf::from("./xtrieve_data"))
///     .page_size(4096)
///     .buffer_pool_pages(512)
///     .fsync_on_commit(true)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct EngineConfig {
    /// Directory holding `.xtr` data files.
    #[builder(default = PathBuf::from("./xtrieve_data"))]
    pub data_dir: PathBuf,
    /// Default page size for files created without one explicitly set.
    #[builder(default = 4096)]
    pub page_size: usize,
    /// Number of pages each open file's cache keeps resident.
    #[builder(default = 256)]
    pub buffer_pool_pages: usize,
    /// Whether a committing transaction calls `fsync` before acknowledging.
    #[builder(default = true)]
    pub fsync_on_commit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./xtrieve_data"),
            page_size: 4096,
            buffer_pool_pages: 256,
            fsync_on_commit: true,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{
        status_for_error, EngineConfig, FileId, KeyDescriptor, KeyFlags, OpenMode, PageId,
        PositionBlock, RecordId, StatusCode, TxnId, XtError, XtResult,
    };
    pub use types::{CompositeKey, KeySegment, KeyType};
}
