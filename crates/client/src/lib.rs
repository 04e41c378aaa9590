//! Client library for talking to an Xtrieve server over the raw wire
//! protocol.
//!
//! This is a thin collaborator, not a full requester shim: one [`Client`]
//! owns one socket and the [`PositionBlock`] the server last echoed back,
//! and every call mirrors an opcode from the table in `protocol::opcode`.
//!
//! # Example
//!
//! ```no_run
//! use client::Client;
//! use protocol::CreateSpec;
//! use common::{KeyDescriptor, KeyFlags, OpenMode};
//! use types::KeyType;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut client = Client::connect("127.0.0.1:5912").await?;
//!
//!     client
//!         .create(
//!             "orders.xtr",
//!             CreateSpec {
//!                 record_length: 16,
//!                 page_size: 4096,
//!                 key_descriptors: vec![KeyDescriptor {
//!                     position: 0,
//!                     length: 4,
//!                     key_type: KeyType::Unsigned,
//!                     flags: KeyFlags::empty(),
//!                     null_value: 0,
//!                 }],
//!             },
//!         )
//!         .await?;
//!
//!     client.insert(&[0u8; 16], 0).await?;
//!     let record = client.get_first(0).await?;
//!     println!("first record: {record:?}");
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

mod error;

pub use error::{ClientError, Result};

use common::{pretty::FileStat, OpenMode, PositionBlock, StatusCode};
use protocol::{opcode, CreateSpec, Request, Response};
use tokio::net::TcpStream;

/// Connection to a running Xtrieve server, tracking the position block the
/// server last handed back so every subsequent call threads it through
/// automatically.
pub struct Client {
    socket: TcpStream,
    position_block: PositionBlock,
}

impl Client {
    /// Connect to the server at `addr`. The session starts with no file
    /// open, matching the server's freshly-minted, unpositioned state.
    pub async fn connect(addr: &str) -> Result<Self> {
        let socket = TcpStream::connect(addr)
            .await
            .map_err(ClientError::Connection)?;
        Ok(Self {
            socket,
            position_block: PositionBlock::null(),
        })
    }

    /// The position block this client would echo on its next request,
    /// useful for diagnosing a stuck cursor via `common::pretty`.
    pub fn position_block(&self) -> PositionBlock {
        self.position_block
    }

    fn blank_request(&self, operation: u16) -> Request {
        blank_request_for(operation, self.position_block)
    }

    async fn call(&mut self, request: Request) -> Result<Response> {
        request
            .write_to(&mut self.socket)
            .await
            .map_err(ClientError::Protocol)?;
        let response = Response::read_from(&mut self.socket)
            .await
            .map_err(ClientError::Protocol)?;
        self.position_block = response.position_block;
        if response.status_code != StatusCode::Success.code() {
            return Err(ClientError::Database {
                status: response.status_code,
            });
        }
        Ok(response)
    }

    /// `Create` (opcode 14): lay out a new file at `file_path` per `spec`
    /// and open it, positioning this client against the new handle.
    pub async fn create(&mut self, file_path: &str, spec: CreateSpec) -> Result<()> {
        let mut request = self.blank_request(opcode::CREATE);
        request.file_path = file_path.to_string();
        request.data = spec.encode();
        self.call(request).await?;
        Ok(())
    }

    /// `Open` (opcode 0).
    pub async fn open(&mut self, file_path: &str, mode: OpenMode) -> Result<()> {
        let mut request = self.blank_request(opcode::OPEN);
        request.file_path = file_path.to_string();
        request.key_number = match mode {
            OpenMode::Normal => -1,
            OpenMode::ReadOnly => -2,
            OpenMode::Exclusive => -3,
        };
        self.call(request).await?;
        Ok(())
    }

    /// `Close` (opcode 1). Resets the client back to an unopened state.
    pub async fn close(&mut self) -> Result<()> {
        let request = self.blank_request(opcode::CLOSE);
        self.call(request).await?;
        self.position_block = PositionBlock::null();
        Ok(())
    }

    /// `Insert` (opcode 2). Returns the bytes of `key_number`'s key
    /// extracted from the stored record.
    pub async fn insert(&mut self, record: &[u8], key_number: i16) -> Result<Vec<u8>> {
        let mut request = self.blank_request(opcode::INSERT);
        request.data = record.to_vec();
        request.key_number = key_number;
        let response = self.call(request).await?;
        Ok(response.key)
    }

    /// `Update` (opcode 3) against the currently positioned record.
    pub async fn update(&mut self, record: &[u8]) -> Result<()> {
        let mut request = self.blank_request(opcode::UPDATE);
        request.data = record.to_vec();
        self.call(request).await?;
        Ok(())
    }

    /// `Delete` (opcode 4) of the currently positioned record.
    pub async fn delete(&mut self) -> Result<()> {
        let request = self.blank_request(opcode::DELETE);
        self.call(request).await?;
        Ok(())
    }

    async fn positioning_call(&mut self, operation: u16, key_number: i16, key: &[u8]) -> Result<Vec<u8>> {
        let mut request = self.blank_request(operation);
        request.key_number = key_number;
        request.key = key.to_vec();
        let response = self.call(request).await?;
        Ok(response.data)
    }

    /// `GetEqual` (opcode 5).
    pub async fn get_equal(&mut self, key_number: i16, key: &[u8]) -> Result<Vec<u8>> {
        self.positioning_call(opcode::GET_EQUAL, key_number, key).await
    }

    /// `GetNext` (opcode 6).
    pub async fn get_next(&mut self, key_number: i16) -> Result<Vec<u8>> {
        self.positioning_call(opcode::GET_NEXT, key_number, &[]).await
    }

    /// `GetPrev` (opcode 7).
    pub async fn get_prev(&mut self, key_number: i16) -> Result<Vec<u8>> {
        self.positioning_call(opcode::GET_PREV, key_number, &[]).await
    }

    /// `GetGreater` (opcode 8).
    pub async fn get_greater(&mut self, key_number: i16, key: &[u8]) -> Result<Vec<u8>> {
        self.positioning_call(opcode::GET_GREATER, key_number, key).await
    }

    /// `GetGreaterOrEqual` (opcode 9).
    pub async fn get_ge(&mut self, key_number: i16, key: &[u8]) -> Result<Vec<u8>> {
        self.positioning_call(opcode::GET_GE, key_number, key).await
    }

    /// `GetLess` (opcode 10).
    pub async fn get_less(&mut self, key_number: i16, key: &[u8]) -> Result<Vec<u8>> {
        self.positioning_call(opcode::GET_LESS, key_number, key).await
    }

    /// `GetLessOrEqual` (opcode 11).
    pub async fn get_le(&mut self, key_number: i16, key: &[u8]) -> Result<Vec<u8>> {
        self.positioning_call(opcode::GET_LE, key_number, key).await
    }

    /// `GetFirst` (opcode 12).
    pub async fn get_first(&mut self, key_number: i16) -> Result<Vec<u8>> {
        self.positioning_call(opcode::GET_FIRST, key_number, &[]).await
    }

    /// `GetLast` (opcode 13).
    pub async fn get_last(&mut self, key_number: i16) -> Result<Vec<u8>> {
        self.positioning_call(opcode::GET_LAST, key_number, &[]).await
    }

    /// `StepFirst` (opcode 33): physical-order traversal, ignoring indexes.
    pub async fn step_first(&mut self) -> Result<Vec<u8>> {
        self.positioning_call(opcode::STEP_FIRST, 0, &[]).await
    }

    /// `StepNext` (opcode 24).
    pub async fn step_next(&mut self) -> Result<Vec<u8>> {
        self.positioning_call(opcode::STEP_NEXT, 0, &[]).await
    }

    /// `StepPrev` (opcode 35).
    pub async fn step_prev(&mut self) -> Result<Vec<u8>> {
        self.positioning_call(opcode::STEP_PREV, 0, &[]).await
    }

    /// `StepLast` (opcode 34).
    pub async fn step_last(&mut self) -> Result<Vec<u8>> {
        self.positioning_call(opcode::STEP_LAST, 0, &[]).await
    }

    /// `Stat` (opcode 15), decoded into the same summary `common::pretty`
    /// knows how to render.
    pub async fn stat(&mut self) -> Result<FileStat> {
        let request = self.blank_request(opcode::STAT);
        let response = self.call(request).await?;
        let data = &response.data;
        Ok(FileStat {
            record_length: u16::from_le_bytes(data[0..2].try_into().unwrap()),
            page_size: u16::from_le_bytes(data[2..4].try_into().unwrap()),
            num_keys: u16::from_le_bytes(data[4..6].try_into().unwrap()),
            record_count: u64::from_le_bytes(data[8..16].try_into().unwrap()),
        })
    }

    /// `BeginTransaction` (opcode 19).
    pub async fn begin(&mut self) -> Result<()> {
        let request = self.blank_request(opcode::BEGIN);
        self.call(request).await?;
        Ok(())
    }

    /// `EndTransaction` (opcode 20): commits.
    pub async fn commit(&mut self) -> Result<()> {
        let request = self.blank_request(opcode::END);
        self.call(request).await?;
        Ok(())
    }

    /// `Abort` (opcode 21).
    pub async fn abort(&mut self) -> Result<()> {
        let request = self.blank_request(opcode::ABORT);
        self.call(request).await?;
        Ok(())
    }

    /// `Unlock` (opcode 27) of just the currently positioned record.
    pub async fn unlock_current(&mut self) -> Result<()> {
        let mut request = self.blank_request(opcode::UNLOCK);
        request.lock_bias = (-2i16) as u16;
        self.call(request).await?;
        Ok(())
    }

    /// `Unlock` (opcode 27) of every lock this session holds on the file.
    pub async fn unlock_all(&mut self) -> Result<()> {
        let mut request = self.blank_request(opcode::UNLOCK);
        request.lock_bias = (-1i16) as u16;
        self.call(request).await?;
        Ok(())
    }
}

fn blank_request_for(operation: u16, position_block: PositionBlock) -> Request {
    Request {
        operation,
        position_block,
        data: Vec::new(),
        key: Vec::new(),
        key_number: 0,
        file_path: String::new(),
        lock_bias: 0,
    }
}
