//! Length-prefixed frame codec for the controller protocol.
//!
//! A frame is a 4-byte big-endian unsigned length followed by exactly that
//! many bytes of ASCII command or reply text.

#![allow(missing_docs)]

use std::io::{ErrorKind, Read, Write};

use crate::error::MbeError;

/// Largest payload accepted from a peer.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

pub const REPLY_OK: &str = "OK";
pub const REPLY_WAIT: &str = "WAIT";
pub const REPLY_PASSWORD: &str = "PWD";

/// Prepend the length header to `payload`.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, MbeError> {
    let len = frame_len(payload.len())?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Read one frame, blocking until the full declared payload has arrived.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, MbeError> {
    let mut header = [0u8; 4];
    reader
        .read_exact(&mut header)
        .map_err(|err| read_error("read frame header", &err))?;
    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_LEN {
        return Err(MbeError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .map_err(|err| read_error("read frame body", &err))?;
    Ok(payload)
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), MbeError> {
    let frame = encode(payload)?;
    writer
        .write_all(&frame)
        .map_err(|err| MbeError::connection("write frame", &err))?;
    writer
        .flush()
        .map_err(|err| MbeError::connection("flush frame", &err))
}

fn frame_len(len: usize) -> Result<u32, MbeError> {
    match u32::try_from(len) {
        Ok(len) if len <= MAX_FRAME_LEN => Ok(len),
        _ => Err(MbeError::FrameTooLarge {
            len: u32::try_from(len).unwrap_or(u32::MAX),
            max: MAX_FRAME_LEN,
        }),
    }
}

fn read_error(context: &str, err: &std::io::Error) -> MbeError {
    if err.kind() == ErrorKind::UnexpectedEof {
        return MbeError::Connection(format!("{context}: connection closed by peer").into());
    }
    MbeError::connection(context, err)
}

/// A decoded reply, with the reserved tokens split out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Wait,
    Password,
    /// Zero-length frame.
    Empty,
    Text(String),
}

impl Reply {
    #[must_use]
    pub fn classify(payload: &[u8]) -> Self {
        match payload {
            [] => Self::Empty,
            b"OK" => Self::Ok,
            b"WAIT" => Self::Wait,
            b"PWD" => Self::Password,
            _ => Self::Text(String::from_utf8_lossy(payload).into_owned()),
        }
    }

    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Ok => REPLY_OK.to_string(),
            Self::Wait => REPLY_WAIT.to_string(),
            Self::Password => REPLY_PASSWORD.to_string(),
            Self::Empty => String::new(),
            Self::Text(text) => text,
        }
    }
}
