//! Staged record file format
//!
//! Little-endian layout:
//!
//! ```text
//! i32     header count
//! n x     (string key, string value)
//! u8      claim check stored flag (0/1)
//! string  claim check message id
//! string  claim check content type
//! i32     claim check size
//! ```
//!
//! Strings are a 7-bit encoded (LEB128) byte length followed by UTF-8 bytes.

use bytes::{Buf, BufMut};

use bp_common::{ClaimCheck, Headers, StagedRecord};

use crate::error::CodecError;

pub fn encode(headers: &Headers, claim_check: &ClaimCheck) -> Vec<u8> {
    let estimate: usize = headers.iter().map(|(k, v)| k.len() + v.len() + 4).sum();
    let mut buf = Vec::with_capacity(estimate + claim_check.message_id.len() + 64);

    buf.put_i32_le(headers.len() as i32);
    for (key, value) in headers {
        put_string(&mut buf, key);
        put_string(&mut buf, value);
    }

    buf.put_u8(u8::from(claim_check.stored));
    put_string(&mut buf, &claim_check.message_id);
    put_string(&mut buf, &claim_check.content_type);
    buf.put_i32_le(claim_check.size);
    buf
}

pub fn decode(mut buf: &[u8]) -> Result<StagedRecord, CodecError> {
    let count = get_i32(&mut buf, "header count")?;
    if count < 0 {
        return Err(CodecError::Negative("header count"));
    }

    // every pair takes at least two length bytes
    let count = count as usize;
    if count > buf.remaining() / 2 {
        return Err(CodecError::Truncated("headers"));
    }

    let mut headers = Headers::with_capacity(count);
    for _ in 0..count {
        let key = get_string(&mut buf)?;
        let value = get_string(&mut buf)?;
        headers.insert(key, value);
    }

    if !buf.has_remaining() {
        return Err(CodecError::Truncated("claim check flag"));
    }
    let stored = buf.get_u8() != 0;
    let message_id = get_string(&mut buf)?;
    let content_type = get_string(&mut buf)?;
    let size = get_i32(&mut buf, "claim check size")?;

    if buf.has_remaining() {
        return Err(CodecError::TrailingBytes(buf.remaining()));
    }

    Ok(StagedRecord {
        headers,
        claim_check: ClaimCheck {
            stored,
            message_id,
            content_type,
            size,
        },
    })
}

fn put_string(buf: &mut Vec<u8>, value: &str) {
    let mut len = value.len() as u32;
    while len >= 0x80 {
        buf.put_u8((len as u8) | 0x80);
        len >>= 7;
    }
    buf.put_u8(len as u8);
    buf.put_slice(value.as_bytes());
}

fn get_i32(buf: &mut &[u8], what: &'static str) -> Result<i32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated(what));
    }
    Ok(buf.get_i32_le())
}

fn get_length(buf: &mut &[u8]) -> Result<usize, CodecError> {
    let mut value: u32 = 0;
    for shift in (0..35).step_by(7) {
        if !buf.has_remaining() {
            return Err(CodecError::Truncated("string length"));
        }
        let byte = buf.get_u8();
        if shift == 28 && byte > 0x0f {
            return Err(CodecError::BadLength);
        }
        value |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value as usize);
        }
    }
    Err(CodecError::BadLength)
}

fn get_string(buf: &mut &[u8]) -> Result<String, CodecError> {
    let len = get_length(buf)?;
    if buf.remaining() < len {
        return Err(CodecError::Truncated("string"));
    }
    let data: &[u8] = buf;
    let (bytes, rest) = data.split_at(len);
    let value = std::str::from_utf8(bytes)
        .map_err(|_| CodecError::InvalidUtf8)?
        .to_string();
    *buf = rest;
    Ok(value)
}
