//! Wire protocol: fixed binary request/response framing, the opcode table,
//! and the `Create` file-spec payload. The layout is byte-exact (REQUIRED):
//! it is the external contract a legacy client shim decodes directly, so
//! nothing here may reorder or repad a field relative to the published
//! table.


use common::{KeyDescriptor, KeyFlags, PositionBlock, XtError, XtResult, POSITION_BLOCK_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The full opcode table. Request dispatch in `engine` matches on these.
pub mod opcode {
    pub const OPEN: u16 = 0;
    pub const CLOSE: u16 = 1;
    pub const INSERT: u16 = 2;
    pub const UPDATE: u16 = 3;
    pub const DELETE: u16 = 4;
    pub const GET_EQUAL: u16 = 5;
    pub const GET_NEXT: u16 = 6;
    pub const GET_PREV: u16 = 7;
    pub const GET_GREATER: u16 = 8;
    pub const GET_GE: u16 = 9;
    pub const GET_LESS: u16 = 10;
    pub const GET_LE: u16 = 11;
    pub const GET_FIRST: u16 = 12;
    pub const GET_LAST: u16 = 13;
    pub const CREATE: u16 = 14;
    pub const STAT: u16 = 15;
    pub const BEGIN: u16 = 19;
    pub const END: u16 = 20;
    pub const ABORT: u16 = 21;
    pub const STEP_NEXT: u16 = 24;
    pub const UNLOCK: u16 = 27;
    pub const STEP_FIRST: u16 = 33;
    pub const STEP_LAST: u16 = 34;
    pub const STEP_PREV: u16 = 35;
}

/// Guards `data_length`/`key_length`/`path_length` against a corrupt or
/// hostile prefix driving an unbounded allocation before the rest of the
/// frame has even arrived.
pub const MAX_BUFFER_LEN: u32 = 64 * 1024 * 1024;

fn check_len(len: u32) -> XtResult<()> {
    if len > MAX_BUFFER_LEN {
        return Err(XtError::Protocol(format!(
            "frame field of {len} bytes exceeds the {MAX_BUFFER_LEN} byte limit"
        )));
    }
    Ok(())
}

async fn read_u16<R: AsyncRead + Unpin>(r: &mut R) -> XtResult<u16> {
    Ok(r.read_u16_le().await?)
}

async fn read_u32<R: AsyncRead + Unpin>(r: &mut R) -> XtResult<u32> {
    Ok(r.read_u32_le().await?)
}

async fn read_i16<R: AsyncRead + Unpin>(r: &mut R) -> XtResult<i16> {
    Ok(r.read_i16_le().await?)
}

async fn read_exact_vec<R: AsyncRead + Unpin>(r: &mut R, len: usize) -> XtResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

/// One client request: opcode plus the position block it operates against
/// and the operation's data/key/path payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub operation: u16,
    pub position_block: PositionBlock,
    pub data: Vec<u8>,
    pub key: Vec<u8>,
    pub key_number: i16,
    pub file_path: String,
    pub lock_bias: u16,
}

impl Request {
    pub fn encode(&self) -> Vec<u8> {
        let path_bytes = self.file_path.as_bytes();
        let mut buf = Vec::with_capacity(
            2 + POSITION_BLOCK_LEN + 4 + self.data.len() + 2 + self.key.len() + 2 + 2 + path_bytes.len() + 2,
        );
        buf.extend_from_slice(&self.operation.to_le_bytes());
        buf.extend_from_slice(&self.position_block.encode());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&(self.key.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.key_number.to_le_bytes());
        buf.extend_from_slice(&(path_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(path_bytes);
        buf.extend_from_slice(&self.lock_bias.to_le_bytes());
        buf
    }

    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> XtResult<Self> {
        let operation = read_u16(r).await?;
        let mut pb_buf = [0u8; POSITION_BLOCK_LEN];
        r.read_exact(&mut pb_buf).await?;
        let position_block = PositionBlock::decode(&pb_buf);

        let data_length = read_u32(r).await?;
        check_len(data_length)?;
        let data = read_exact_vec(r, data_length as usize).await?;

        let key_length = read_u16(r).await?;
        check_len(key_length as u32)?;
        let key = read_exact_vec(r, key_length as usize).await?;

        let key_number = read_i16(r).await?;

        let path_length = read_u16(r).await?;
        check_len(path_length as u32)?;
        let path_bytes = read_exact_vec(r, path_length as usize).await?;
        let file_path = String::from_utf8(path_bytes)
            .map_err(|e| XtError::Protocol(format!("file path is not valid utf-8: {e}")))?;

        let lock_bias = read_u16(r).await?;

        Ok(Self {
            operation,
            position_block,
            data,
            key,
            key_number,
            file_path,
            lock_bias,
        })
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> XtResult<()> {
        w.write_all(&self.encode()).await?;
        Ok(())
    }
}

/// One server response: status code, updated position block, and the
/// data/key payloads the operation produced (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status_code: u16,
    pub position_block: PositionBlock,
    pub data: Vec<u8>,
    pub key: Vec<u8>,
}

impl Response {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + POSITION_BLOCK_LEN + 4 + self.data.len() + 2 + self.key.len());
        buf.extend_from_slice(&self.status_code.to_le_bytes());
        buf.extend_from_slice(&self.position_block.encode());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&(self.key.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf
    }

    pub async fn read_from<R: AsyncRead + Unpin>(r: &mut R) -> XtResult<Self> {
        let status_code = read_u16(r).await?;
        let mut pb_buf = [0u8; POSITION_BLOCK_LEN];
        r.read_exact(&mut pb_buf).await?;
        let position_block = PositionBlock::decode(&pb_buf);

        let data_length = read_u32(r).await?;
        check_len(data_length)?;
        let data = read_exact_vec(r, data_length as usize).await?;

        let key_length = read_u16(r).await?;
        check_len(key_length as u32)?;
        let key = read_exact_vec(r, key_length as usize).await?;

        Ok(Self {
            status_code,
            position_block,
            data,
            key,
        })
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> XtResult<()> {
        w.write_all(&self.encode()).await?;
        Ok(())
    }
}

/// Parsed `data_buffer` for the `Create` opcode: record/page sizing plus
/// the key descriptor table, laid out exactly as spec.md §6 describes.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSpec {
    pub record_length: u16,
    pub page_size: u16,
    pub key_descriptors: Vec<KeyDescriptor>,
}

const CREATE_HEADER_LEN: usize = 2 + 2 + 2 + 4;
const CREATE_KEY_LEN: usize = 2 + 2 + 2 + 1 + 1 + 8;

impl CreateSpec {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CREATE_HEADER_LEN + self.key_descriptors.len() * CREATE_KEY_LEN);
        buf.extend_from_slice(&self.record_length.to_le_bytes());
        buf.extend_from_slice(&self.page_size.to_le_bytes());
        buf.extend_from_slice(&(self.key_descriptors.len() as u16).to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        for kd in &self.key_descriptors {
            buf.extend_from_slice(&kd.position.to_le_bytes());
            buf.extend_from_slice(&kd.length.to_le_bytes());
            buf.extend_from_slice(&kd.flags.bits().to_le_bytes());
            buf.push(storage::key_type_tag(kd.key_type));
            buf.push(kd.null_value);
            buf.extend_from_slice(&[0u8; 8]);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> XtResult<Self> {
        if buf.len() < CREATE_HEADER_LEN {
            return Err(XtError::Protocol("create spec shorter than its header".into()));
        }
        let record_length = u16::from_le_bytes(buf[0..2].try_into().unwrap());
        let page_size = u16::from_le_bytes(buf[2..4].try_into().unwrap());
        let num_keys = u16::from_le_bytes(buf[4..6].try_into().unwrap()) as usize;

        let mut off = CREATE_HEADER_LEN;
        let mut key_descriptors = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            if off + CREATE_KEY_LEN > buf.len() {
                return Err(XtError::Protocol("create spec truncated key descriptor table".into()));
            }
            let position = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());
            let length = u16::from_le_bytes(buf[off + 2..off + 4].try_into().unwrap());
            let flags = KeyFlags::from_bits_truncate(u16::from_le_bytes(buf[off + 4..off + 6].try_into().unwrap()));
            let key_type = storage::key_type_from_tag(buf[off + 6])?;
            let null_value = buf[off + 7];
            key_descriptors.push(KeyDescriptor {
                position,
                length,
                key_type,
                flags,
                null_value,
            });
            off += CREATE_KEY_LEN;
        }
        Ok(Self {
            record_length,
            page_size,
            key_descriptors,
        })
    }
}
