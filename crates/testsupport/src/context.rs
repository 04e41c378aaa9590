//! Test execution context and engine lifecycle management.
//!
//! Provides a helper for creating an isolated [`Engine`] over a temporary
//! data directory. Each test gets its own clean state that is automatically
//! cleaned up on drop.

use common::{EngineConfig, TxnId, XtResult};
use engine::Engine;
use protocol::{CreateSpec, Request, Response};
use tempfile::TempDir;

/// An [`Engine`] over a temporary data directory, plus the session id most
/// tests drive it with.
///
/// All files created through `session` live under `_temp_dir` and are
/// removed when the context is dropped.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// let ctx = TestContext::new();
/// let (_, create) = ctx.dispatch(ctx.create_request("orders.xtr", unique_key_spec(12)));
/// assert_eq!(create.status_code, 0);
/// ```
pub struct TestContext {
    engine: Engine,
    session: TxnId,
    _temp_dir: TempDir,
}

impl TestContext {
    /// Create a new test context backed by a fresh temporary directory.
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let config = EngineConfig::builder()
            .data_dir(temp_dir.path().to_path_buf())
            .build();
        let engine = Engine::new(&config);
        let session = engine.new_session();
        Self {
            engine,
            session,
            _temp_dir: temp_dir,
        }
    }

    /// The engine this context owns.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The session id most calls through this context should use.
    pub fn session(&self) -> TxnId {
        self.session
    }

    /// Dispatch a request through the default session.
    pub fn dispatch(&self, request: &Request) -> Response {
        self.engine.dispatch(self.session, request)
    }

    /// Mint an additional session sharing the same engine and data
    /// directory, useful for tests exercising locking or concurrent
    /// sessions against the same file.
    pub fn new_session(&self) -> TxnId {
        self.engine.new_session()
    }

    /// Create a file and leave it open, returning the `Response` to the
    /// `Create` request (its `position_block` is what later requests
    /// should reuse).
    pub fn create_file(&self, file_path: &str, spec: CreateSpec) -> XtResult<Response> {
        let mut request = self.blank_request(protocol::opcode::CREATE);
        request.file_path = file_path.to_string();
        request.data = spec.encode();
        let response = self.dispatch(&request);
        require_success(&response)?;
        Ok(response)
    }

    /// Build a blank request carrying no position block, for the first
    /// call against a not-yet-open file (`Create`/`Open`).
    pub fn blank_request(&self, operation: u16) -> Request {
        Request {
            operation,
            position_block: common::PositionBlock::null(),
            data: Vec::new(),
            key: Vec::new(),
            key_number: 0,
            file_path: String::new(),
            lock_bias: 0,
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

fn require_success(response: &Response) -> XtResult<()> {
    if response.status_code == common::StatusCode::Success.code() {
        Ok(())
    } else {
        Err(common::XtError::Internal(format!(
            "expected success, got status {}",
            response.status_code
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::unique_unsigned_key_spec;

    #[test]
    fn context_creates_and_reuses_one_engine() {
        let ctx = TestContext::new();
        let response = ctx
            .create_file("orders.xtr", unique_unsigned_key_spec(12, 4))
            .expect("create succeeds");
        assert_eq!(response.status_code, common::StatusCode::Success.code());
    }

    #[test]
    fn additional_sessions_share_the_same_data_directory() {
        let ctx = TestContext::new();
        ctx.create_file("shared.xtr", unique_unsigned_key_spec(12, 4))
            .expect("create succeeds");
        let other = ctx.new_session();
        assert_ne!(other, ctx.session());
    }
}
