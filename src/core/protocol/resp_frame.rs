// src/core/protocol/resp_frame.rs

//! The RESP frame type and the client-side `Encoder`/`Decoder` used by the
//! backend connection. Commands go out as arrays of bulk strings; replies come
//! back as any frame type.

use crate::core::BridgeError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits for replies coming back from the backend.
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024;
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;
const MAX_RECURSION_DEPTH: usize = 256;

/// A single frame in the RESP protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// Builds a command frame (`*N` array of bulk strings) from its parts.
    pub fn command<I, B>(parts: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        RespFrame::Array(
            parts
                .into_iter()
                .map(|p| RespFrame::BulkString(p.into()))
                .collect(),
        )
    }

    /// Returns the payload of a string-like reply.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespFrame::BulkString(b) => Some(b),
            RespFrame::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// The command name of a command frame, for logging.
    pub fn command_name(&self) -> String {
        match self {
            RespFrame::Array(parts) => parts
                .first()
                .and_then(RespFrame::as_bytes)
                .map(|b| String::from_utf8_lossy(b).to_uppercase())
                .unwrap_or_default(),
            _ => String::new(),
        }
    }
}

/// A `tokio_util::codec` implementation for `RespFrame`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = BridgeError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item, dst);
        Ok(())
    }
}

fn encode_frame(frame: &RespFrame, dst: &mut BytesMut) {
    let mut num = itoa::Buffer::new();
    match frame {
        RespFrame::SimpleString(s) => encode_line(b'+', s.as_bytes(), dst),
        RespFrame::Error(s) => encode_line(b'-', s.as_bytes(), dst),
        RespFrame::Integer(i) => encode_line(b':', num.format(*i).as_bytes(), dst),
        RespFrame::BulkString(b) => {
            encode_line(b'$', num.format(b.len()).as_bytes(), dst);
            dst.extend_from_slice(b);
            dst.extend_from_slice(CRLF);
        }
        RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
        RespFrame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
        RespFrame::Array(items) => {
            encode_line(b'*', num.format(items.len()).as_bytes(), dst);
            for item in items {
                encode_frame(item, dst);
            }
        }
    }
}

fn encode_line(prefix: u8, body: &[u8], dst: &mut BytesMut) {
    dst.reserve(1 + body.len() + CRLF_LEN);
    dst.extend_from_slice(&[prefix]);
    dst.extend_from_slice(body);
    dst.extend_from_slice(CRLF);
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = BridgeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut cursor = &src[..];
        match decode_frame(&mut cursor, 0) {
            Ok(frame) => {
                let consumed = src.len() - cursor.len();
                src.advance(consumed);
                Ok(Some(frame))
            }
            // Not enough bytes buffered yet; wait for the next read.
            Err(BridgeError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn decode_frame(cursor: &mut &[u8], depth: usize) -> Result<RespFrame, BridgeError> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(BridgeError::SyntaxError);
    }
    let Some(&prefix) = cursor.first() else {
        return Err(BridgeError::IncompleteData);
    };
    *cursor = &cursor[1..];

    match prefix {
        b'+' => Ok(RespFrame::SimpleString(read_text(cursor)?)),
        b'-' => Ok(RespFrame::Error(read_text(cursor)?)),
        b':' => Ok(RespFrame::Integer(read_number(cursor)?)),
        b'$' => {
            let len = read_number(cursor)?;
            if len == -1 {
                return Ok(RespFrame::Null);
            }
            let len = checked_len(len, MAX_BULK_STRING_SIZE)?;
            if cursor.len() < len + CRLF_LEN {
                return Err(BridgeError::IncompleteData);
            }
            if &cursor[len..len + CRLF_LEN] != CRLF {
                return Err(BridgeError::SyntaxError);
            }
            let data = Bytes::copy_from_slice(&cursor[..len]);
            *cursor = &cursor[len + CRLF_LEN..];
            Ok(RespFrame::BulkString(data))
        }
        b'*' => {
            let len = read_number(cursor)?;
            if len == -1 {
                return Ok(RespFrame::NullArray);
            }
            let len = checked_len(len, MAX_FRAME_ELEMENTS)?;
            let mut items = Vec::with_capacity(len.min(64));
            for _ in 0..len {
                items.push(decode_frame(cursor, depth + 1)?);
            }
            Ok(RespFrame::Array(items))
        }
        _ => Err(BridgeError::SyntaxError),
    }
}

fn checked_len(len: i64, max: usize) -> Result<usize, BridgeError> {
    usize::try_from(len)
        .ok()
        .filter(|l| *l <= max)
        .ok_or(BridgeError::SyntaxError)
}

fn read_line<'a>(cursor: &mut &'a [u8]) -> Result<&'a [u8], BridgeError> {
    let pos = cursor
        .windows(CRLF_LEN)
        .position(|w| w == CRLF)
        .ok_or(BridgeError::IncompleteData)?;
    let line = &cursor[..pos];
    *cursor = &cursor[pos + CRLF_LEN..];
    Ok(line)
}

fn read_text(cursor: &mut &[u8]) -> Result<String, BridgeError> {
    Ok(String::from_utf8_lossy(read_line(cursor)?).into_owned())
}

fn read_number(cursor: &mut &[u8]) -> Result<i64, BridgeError> {
    let line = read_line(cursor)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(BridgeError::SyntaxError)
}
