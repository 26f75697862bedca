//! Response framing for request/response exchanges
//!
//! The serial link is a raw byte stream. While a request is outstanding,
//! every received byte belongs to it; the framing decides when the
//! accumulated bytes form a complete response.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Carriage return, the pH meter's line terminator
pub const CR: u8 = b'\r';

/// Upper bound on the bytes accumulated for one response
pub const MAX_RESPONSE_LEN: usize = 4096;

/// When an accumulated response is complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum ResponseFraming {
    /// The first received chunk is the whole response.
    FirstChunk,
    /// Exactly this many bytes.
    FixedLength(usize),
    /// Everything up to and including this byte.
    Terminator(u8),
}

impl Default for ResponseFraming {
    fn default() -> Self {
        ResponseFraming::Terminator(CR)
    }
}

impl ResponseFraming {
    /// Reject framings that could never complete or complete on nothing
    pub fn validate(&self) -> Result<(), SessionError> {
        match self {
            ResponseFraming::FixedLength(0) => Err(SessionError::invalid_config(
                "fixed-length framing needs at least one byte",
            )),
            ResponseFraming::FixedLength(len) if *len > MAX_RESPONSE_LEN => {
                Err(SessionError::invalid_config(format!(
                    "fixed-length framing is limited to {} bytes",
                    MAX_RESPONSE_LEN
                )))
            }
            _ => Ok(()),
        }
    }

    /// Length of the complete frame at the start of `received`, if any.
    ///
    /// Bytes past the returned length are not part of the response.
    pub fn frame_len(&self, received: &[u8]) -> Option<usize> {
        if received.is_empty() {
            return None;
        }
        match *self {
            ResponseFraming::FirstChunk => Some(received.len()),
            ResponseFraming::FixedLength(len) => (received.len() >= len).then_some(len),
            ResponseFraming::Terminator(byte) => {
                received.iter().position(|&b| b == byte).map(|pos| pos + 1)
            }
        }
    }
}

impl fmt::Display for ResponseFraming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstChunk => write!(f, "first chunk"),
            Self::FixedLength(len) => write!(f, "{} bytes", len),
            Self::Terminator(byte) => write!(f, "terminated by 0x{:02x}", byte),
        }
    }
}
