//! Fixed 84-byte datagram frame.
//!
//! ```text
//! offset size field
//!      0    4 magic        u32 LE, 0x8581DAF3
//!      4    4 version      u32 LE, 1
//!      8    4 status_code  i32 LE
//!     12   64 username     UTF-8, NUL padded
//!     76    8 timestamp    u64 LE, ms since Unix epoch
//! ```

use smile_core::status::{RecognitionStatus, StatusMessage};
use thiserror::Error;

/// First four bytes of SHA-256("FaceRecognizer"), read big-endian.
pub const MAGIC: u32 = 0x8581_DAF3;
pub const VERSION: u32 = 1;
pub const USERNAME_FIELD_LEN: usize = 64;
pub const PACKET_SIZE: usize = 4 + 4 + 4 + USERNAME_FIELD_LEN + 8;

const STATUS_OFFSET: usize = 8;
const USERNAME_OFFSET: usize = 12;
const TIMESTAMP_OFFSET: usize = USERNAME_OFFSET + USERNAME_FIELD_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("expected {PACKET_SIZE} bytes, got {0}")]
    WrongSize(usize),

    #[error("bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported protocol version {0}")]
    BadVersion(u32),

    #[error("unknown status code {0}")]
    UnknownStatus(i32),
}

pub fn encode(message: &StatusMessage) -> [u8; PACKET_SIZE] {
    let mut buf = [0u8; PACKET_SIZE];
    buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
    buf[STATUS_OFFSET..USERNAME_OFFSET].copy_from_slice(&message.status.code().to_le_bytes());
    if let Some(name) = message.username() {
        // At most 63 bytes, so the last byte of the field stays NUL.
        buf[USERNAME_OFFSET..USERNAME_OFFSET + name.len()].copy_from_slice(name.as_bytes());
    }
    buf[TIMESTAMP_OFFSET..].copy_from_slice(&message.timestamp_ms.to_le_bytes());
    buf
}

pub fn decode(bytes: &[u8]) -> Result<StatusMessage, PacketError> {
    if bytes.len() != PACKET_SIZE {
        return Err(PacketError::WrongSize(bytes.len()));
    }
    let magic = read_u32(bytes, 0);
    if magic != MAGIC {
        return Err(PacketError::BadMagic(magic));
    }
    let version = read_u32(bytes, 4);
    if version != VERSION {
        return Err(PacketError::BadVersion(version));
    }
    let code = read_u32(bytes, STATUS_OFFSET) as i32;
    let status = RecognitionStatus::from_code(code).ok_or(PacketError::UnknownStatus(code))?;

    let username = c_string(&bytes[USERNAME_OFFSET..TIMESTAMP_OFFSET]);
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&bytes[TIMESTAMP_OFFSET..]);
    let timestamp_ms = u64::from_le_bytes(ts);

    Ok(StatusMessage::at(status, Some(&username), timestamp_ms))
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}

/// Text up to the first NUL; invalid UTF-8 is replaced rather than rejected.
pub(crate) fn c_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
