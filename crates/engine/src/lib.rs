//! Operation dispatcher: the single `dispatch` entry point that decodes a
//! wire [`protocol::Request`] into a call against [`filemgr::FileManager`]
//! and encodes the result back into a [`protocol::Response`].
//!
//! Every subsystem below this crate returns `XtResult`; this is the one
//! place that turns an `XtError` into the wire-visible `status_code`, via
//! `common::status_for_error`. No branch below constructs a `StatusCode`
//! by hand.

use common::{
    status_for_error, FileId, KeyDescriptor, OpenMode, PositionBlock, StatusCode, TxnId, XtError,
    XtResult,
};
use filemgr::{FileManager, RecordView};
use lock::{LockBias, LockKey};
use log::debug;
use protocol::{opcode, CreateSpec, Request, Response};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use types::{CompositeKey, KeySegment};

/// Owns every open file and hands out session ids. One `Engine` is shared
/// by every connection; `dispatch` is synchronous and may block inside a
/// lock wait, so callers run it off the async runtime (see `server`).
pub struct Engine {
    files: Mutex<FileManager>,
    next_session: AtomicU64,
    data_dir: PathBuf,
}

impl Engine {
    pub fn new(config: &common::EngineConfig) -> Self {
        Self {
            files: Mutex::new(FileManager::new(config.buffer_pool_pages)),
            next_session: AtomicU64::new(1),
            data_dir: config.data_dir.clone(),
        }
    }

    /// Resolves a request's `file_path` against the configured data
    /// directory; an already-absolute path passes through untouched.
    fn resolve(&self, file_path: &str) -> PathBuf {
        let candidate = Path::new(file_path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.data_dir.join(candidate)
        }
    }

    /// Mints a fresh session id, one per accepted connection. Locks and
    /// transactions are scoped to this id for the connection's lifetime.
    pub fn new_session(&self) -> TxnId {
        TxnId(self.next_session.fetch_add(1, Ordering::Relaxed))
    }

    /// Releases every lock the session holds and aborts any transaction
    /// left running, without requiring the client to have sent `Close`.
    /// Called on connection teardown.
    pub fn end_session(&self, file_id: Option<FileId>, session: TxnId) {
        if let Some(file_id) = file_id {
            let mut files = self.files.lock().unwrap();
            let _ = files.close(file_id, session);
        }
    }

    pub fn dispatch(&self, session: TxnId, request: &Request) -> Response {
        let response = match self.handle(session, request) {
            Ok(response) => response,
            Err(err) => Response {
                status_code: status_for_error(&err).code(),
                position_block: request.position_block,
                data: Vec::new(),
                key: Vec::new(),
            },
        };
        debug!(
            "session={} op={} -> status={}",
            session.0, request.operation, response.status_code
        );
        response
    }

    fn handle(&self, session: TxnId, request: &Request) -> XtResult<Response> {
        match request.operation {
            opcode::OPEN => self.open(request),
            opcode::CLOSE => self.close(session, request),
            opcode::INSERT => self.insert(session, request),
            opcode::UPDATE => self.update(session, request),
            opcode::DELETE => self.delete(session, request),
            opcode::GET_EQUAL => self.get_equal(session, request),
            opcode::GET_NEXT => self.step_index(session, request, true),
            opcode::GET_PREV => self.step_index(session, request, false),
            opcode::GET_GREATER => self.get_ge(session, request, true),
            opcode::GET_GE => self.get_ge(session, request, false),
            opcode::GET_LESS => self.get_le(session, request, true),
            opcode::GET_LE => self.get_le(session, request, false),
            opcode::GET_FIRST => self.get_endpoint(session, request, true),
            opcode::GET_LAST => self.get_endpoint(session, request, false),
            opcode::CREATE => self.create(request),
            opcode::STAT => self.stat(request),
            opcode::BEGIN => self.begin(session, request),
            opcode::END => self.commit(session, request),
            opcode::ABORT => self.abort(session, request),
            opcode::STEP_NEXT => self.step_physical(session, request, true, true),
            opcode::STEP_FIRST => self.step_physical(session, request, false, true),
            opcode::STEP_LAST => self.step_physical(session, request, false, false),
            opcode::STEP_PREV => self.step_physical(session, request, true, false),
            opcode::UNLOCK => self.unlock(session, request),
            other => Err(XtError::Protocol(format!("unrecognized opcode {other}"))),
        }
    }

    fn open(&self, request: &Request) -> XtResult<Response> {
        let mode = OpenMode::from_key_number(request.key_number)?;
        let path = self.resolve(&request.file_path);
        let (_, position_block) = self.files.lock().unwrap().open(path, mode)?;
        Ok(success(position_block, Vec::new(), Vec::new()))
    }

    fn create(&self, request: &Request) -> XtResult<Response> {
        let spec = CreateSpec::decode(&request.data)?;
        let path = self.resolve(&request.file_path);
        let (_, position_block) = self.files.lock().unwrap().create(
            path,
            spec.page_size,
            spec.record_length,
            spec.key_descriptors,
        )?;
        Ok(success(position_block, Vec::new(), Vec::new()))
    }

    fn close(&self, session: TxnId, request: &Request) -> XtResult<Response> {
        let mut files = self.files.lock().unwrap();
        let file_id = files.validate(&request.position_block)?;
        files.close(file_id, session)?;
        Ok(success(PositionBlock::null(), Vec::new(), Vec::new()))
    }

    fn insert(&self, session: TxnId, request: &Request) -> XtResult<Response> {
        let bias = LockBias::from_i16(request.lock_bias as i16)?;
        let mut files = self.files.lock().unwrap();
        let file_id = files.validate(&request.position_block)?;
        let view = files.insert(file_id, session, &request.data, bias)?;
        let key = extracted_key(&files, file_id, request.key_number, &view.data);
        let mut position_block = request.position_block;
        position_block.reposition(view.record_id, request.key_number);
        Ok(success(position_block, view.data, key))
    }

    fn update(&self, session: TxnId, request: &Request) -> XtResult<Response> {
        let bias = LockBias::from_i16(request.lock_bias as i16)?;
        let mut files = self.files.lock().unwrap();
        let file_id = files.validate(&request.position_block)?;
        let record_id = request
            .position_block
            .record_id()
            .ok_or(XtError::InvalidPositioning)?;
        files.update(file_id, session, record_id, &request.data, bias)?;
        let key = extracted_key(&files, file_id, request.key_number, &request.data);
        Ok(success(request.position_block, Vec::new(), key))
    }

    fn delete(&self, session: TxnId, request: &Request) -> XtResult<Response> {
        let bias = LockBias::from_i16(request.lock_bias as i16)?;
        let mut files = self.files.lock().unwrap();
        let file_id = files.validate(&request.position_block)?;
        let record_id = request
            .position_block
            .record_id()
            .ok_or(XtError::InvalidPositioning)?;
        files.delete(file_id, session, record_id, bias)?;
        let mut position_block = request.position_block;
        position_block.unposition();
        Ok(success(position_block, Vec::new(), Vec::new()))
    }

    fn get_equal(&self, session: TxnId, request: &Request) -> XtResult<Response> {
        let bias = LockBias::from_i16(request.lock_bias as i16)?;
        let mut files = self.files.lock().unwrap();
        let file_id = files.validate(&request.position_block)?;
        let key_number = key_number_of(request.key_number)?;
        let key = composite_key(&files, file_id, key_number, &request.key)?;
        let found = files.get_equal(file_id, session, key_number, &key, bias)?;
        found_to_response(&files, file_id, request, found, StatusCode::KeyNotFound)
    }

    fn get_ge(&self, session: TxnId, request: &Request, strict: bool) -> XtResult<Response> {
        let bias = LockBias::from_i16(request.lock_bias as i16)?;
        let mut files = self.files.lock().unwrap();
        let file_id = files.validate(&request.position_block)?;
        let key_number = key_number_of(request.key_number)?;
        let key = composite_key(&files, file_id, key_number, &request.key)?;
        let found = files.get_ge(file_id, session, key_number, &key, strict, bias)?;
        found_to_response(&files, file_id, request, found, StatusCode::EndOfFile)
    }

    fn get_le(&self, session: TxnId, request: &Request, strict: bool) -> XtResult<Response> {
        let bias = LockBias::from_i16(request.lock_bias as i16)?;
        let mut files = self.files.lock().unwrap();
        let file_id = files.validate(&request.position_block)?;
        let key_number = key_number_of(request.key_number)?;
        let key = composite_key(&files, file_id, key_number, &request.key)?;
        let found = files.get_le(file_id, session, key_number, &key, strict, bias)?;
        found_to_response(&files, file_id, request, found, StatusCode::EndOfFile)
    }

    fn get_endpoint(&self, session: TxnId, request: &Request, first: bool) -> XtResult<Response> {
        let bias = LockBias::from_i16(request.lock_bias as i16)?;
        let mut files = self.files.lock().unwrap();
        let file_id = files.validate(&request.position_block)?;
        let key_number = key_number_of(request.key_number)?;
        let found = if first {
            files.get_first(file_id, session, key_number, bias)?
        } else {
            files.get_last(file_id, session, key_number, bias)?
        };
        found_to_response(&files, file_id, request, found, StatusCode::EndOfFile)
    }

    fn step_index(&self, session: TxnId, request: &Request, forward: bool) -> XtResult<Response> {
        let bias = LockBias::from_i16(request.lock_bias as i16)?;
        let mut files = self.files.lock().unwrap();
        let file_id = files.validate(&request.position_block)?;
        let key_number = key_number_of(request.key_number)?;
        let record_id = request
            .position_block
            .record_id()
            .ok_or(XtError::InvalidPositioning)?;
        let found = files.step(file_id, session, key_number, record_id, forward, bias)?;
        found_to_response(&files, file_id, request, found, StatusCode::EndOfFile)
    }

    fn step_physical(
        &self,
        session: TxnId,
        request: &Request,
        has_current: bool,
        forward: bool,
    ) -> XtResult<Response> {
        let bias = LockBias::from_i16(request.lock_bias as i16)?;
        let mut files = self.files.lock().unwrap();
        let file_id = files.validate(&request.position_block)?;
        let current = if has_current {
            Some(
                request
                    .position_block
                    .record_id()
                    .ok_or(XtError::InvalidPositioning)?,
            )
        } else {
            None
        };
        let found = files.step_physical(file_id, session, current, forward, bias)?;
        found_to_response(&files, file_id, request, found, StatusCode::EndOfFile)
    }

    fn stat(&self, request: &Request) -> XtResult<Response> {
        let files = self.files.lock().unwrap();
        let file_id = files.validate(&request.position_block)?;
        let stat = files.stat(file_id)?;
        let mut data = Vec::with_capacity(16);
        data.extend_from_slice(&stat.record_length.to_le_bytes());
        data.extend_from_slice(&stat.page_size.to_le_bytes());
        data.extend_from_slice(&stat.num_keys.to_le_bytes());
        data.extend_from_slice(&[0u8; 2]);
        data.extend_from_slice(&stat.record_count.to_le_bytes());
        Ok(success(request.position_block, data, Vec::new()))
    }

    fn begin(&self, session: TxnId, request: &Request) -> XtResult<Response> {
        let mut files = self.files.lock().unwrap();
        let file_id = files.validate(&request.position_block)?;
        files.begin(file_id, session)?;
        Ok(success(request.position_block, Vec::new(), Vec::new()))
    }

    fn commit(&self, session: TxnId, request: &Request) -> XtResult<Response> {
        let mut files = self.files.lock().unwrap();
        let file_id = files.validate(&request.position_block)?;
        files.commit(file_id, session)?;
        Ok(success(request.position_block, Vec::new(), Vec::new()))
    }

    fn abort(&self, session: TxnId, request: &Request) -> XtResult<Response> {
        let mut files = self.files.lock().unwrap();
        let file_id = files.validate(&request.position_block)?;
        files.abort(file_id, session)?;
        // Records the aborted transaction inserted or deleted may no
        // longer exist under the cursor's old record id.
        let mut position_block = request.position_block;
        position_block.unposition();
        Ok(success(position_block, Vec::new(), Vec::new()))
    }

    fn unlock(&self, session: TxnId, request: &Request) -> XtResult<Response> {
        let mut files = self.files.lock().unwrap();
        let file_id = files.validate(&request.position_block)?;
        match request.lock_bias as i16 {
            -2 => {
                let record_id = request
                    .position_block
                    .record_id()
                    .ok_or(XtError::InvalidPositioning)?;
                files.unlock(file_id, session, LockKey::Record(file_id, record_id));
            }
            -1 => files.unlock_all(file_id, session),
            other => {
                return Err(XtError::Protocol(format!(
                    "unrecognized unlock bias {other}"
                )))
            }
        }
        Ok(success(request.position_block, Vec::new(), Vec::new()))
    }
}

fn success(position_block: PositionBlock, data: Vec<u8>, key: Vec<u8>) -> Response {
    Response {
        status_code: StatusCode::Success.code(),
        position_block,
        data,
        key,
    }
}

fn key_number_of(key_number: i16) -> XtResult<usize> {
    if key_number < 0 {
        return Err(XtError::InvalidKeyNumber(key_number));
    }
    Ok(key_number as usize)
}

/// Builds the single-segment composite key a positioning request's raw
/// `key_buffer` represents, per the descriptor declared for `key_number`.
/// Segmented keys collapse to their first descriptor, matching the
/// one-descriptor-per-index simplification `filemgr::register` makes.
///
/// A buffer shorter than the descriptor's declared length is a partial
/// key: `GetEqual` matches it against the leftmost stored key sharing
/// that prefix. Only a buffer longer than the descriptor is an error.
fn composite_key(
    files: &FileManager,
    file_id: FileId,
    key_number: usize,
    key_bytes: &[u8],
) -> XtResult<CompositeKey> {
    let kd: KeyDescriptor = files.key_descriptor(file_id, key_number)?;
    if key_bytes.len() > kd.length as usize {
        return Err(XtError::DataBufferTooShort);
    }
    Ok(vec![KeySegment::new(
        key_bytes.to_vec(),
        kd.key_type,
        kd.is_descending(),
    )])
}

/// Best-effort echo of the key bytes at `key_number` lifted out of
/// `record`; empty if `key_number` doesn't name a real key for this file.
fn extracted_key(files: &FileManager, file_id: FileId, key_number: i16, record: &[u8]) -> Vec<u8> {
    if key_number < 0 {
        return Vec::new();
    }
    match files.key_descriptor(file_id, key_number as usize) {
        Ok(kd) => {
            let start = kd.position as usize;
            let end = start + kd.length as usize;
            record.get(start..end).map(|s| s.to_vec()).unwrap_or_default()
        }
        Err(_) => Vec::new(),
    }
}

fn found_to_response(
    files: &FileManager,
    file_id: FileId,
    request: &Request,
    found: Option<RecordView>,
    miss_status: StatusCode,
) -> XtResult<Response> {
    match found {
        Some(view) => {
            let key = extracted_key(files, file_id, request.key_number, &view.data);
            let mut position_block = request.position_block;
            position_block.reposition(view.record_id, request.key_number);
            Ok(success(position_block, view.data, key))
        }
        None => {
            let mut position_block = request.position_block;
            position_block.unposition();
            Ok(Response {
                status_code: miss_status.code(),
                position_block,
                data: Vec::new(),
                key: Vec::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests;
