//! GTP echo request / reply wire format.
//!
//! ```text
//!  0       1       2               4                               8
//! +-------+-------+---------------+-------------------------------+
//! | flags | type  |  payload len  |             TEID              |
//! +-------+-------+---------------+-------------------------------+
//! |   sequence    | npdu  | next  |
//! +---------------+-------+-------+
//! ```
//!
//! All multi-byte fields are big-endian. Replies may carry trailing
//! information elements (a Recovery IE in practice); they are ignored.

use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the fixed echo header on the wire.
pub const ECHO_LEN: usize = 12;

pub const ECHO_REQUEST: u8 = 0x01;
pub const ECHO_REPLY: u8 = 0x02;

/// Version 1, protocol type GTP, sequence number present.
pub const REQUEST_FLAGS: u8 = 0x32;

/// Bytes following the mandatory part of the header: seq, npdu, next.
const REQUEST_PAYLOAD_LEN: u16 = 4;

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("datagram too short: {0} bytes, need 12")]
    Truncated(usize),
    #[error("malformed echo header: {0}")]
    Codec(#[from] bincode::Error),
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub struct EchoPacket {
    pub flags: u8,
    pub msg_type: u8,
    pub len: u16,
    pub teid: u32,
    pub seq: u16,
    pub npdu: u8,
    pub next: u8,
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

impl EchoPacket {
    pub fn request(teid: u32, seq: u16) -> Self {
        Self {
            flags: REQUEST_FLAGS,
            msg_type: ECHO_REQUEST,
            len: REQUEST_PAYLOAD_LEN,
            teid,
            seq,
            npdu: 0,
            next: 0,
        }
    }

    pub fn is_reply(&self) -> bool {
        self.msg_type == ECHO_REPLY
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let buf = codec().serialize(self)?;
        debug_assert_eq!(buf.len(), ECHO_LEN);
        Ok(buf)
    }

    /// Parse the fixed header from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < ECHO_LEN {
            return Err(PacketError::Truncated(buf.len()));
        }
        Ok(codec().deserialize(&buf[..ECHO_LEN])?)
    }
}
