//! Item payload codec for persisted trade documents.
//!
//! **Wire format:** `<TAG>:<base64>` where TAG is `RAW` or `GZIP`.
//!
//! The binary body is a big-endian `u32` entry count followed by that many
//! entries, each laid out as:
//! `u32 kind_len | kind (utf-8) | u32 quantity | u32 meta_len | meta`.
//!
//! Bodies larger than `COMPRESSION_THRESHOLD_BYTES` are gzip-compressed and
//! tagged `GZIP`; smaller ones are tagged `RAW`. An empty item list encodes to
//! the empty string.
//!
//! `decode_items` is fail-open: any malformed payload decodes to an empty
//! list, is logged, and bumps `decode_failures_total()`. Callers that must
//! tell "no items" apart from "corrupt items" use `try_decode_items`.

use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::item::ItemStack;

/// Uncompressed bodies strictly larger than this are gzip-compressed.
pub const COMPRESSION_THRESHOLD_BYTES: usize = 1024;

/// Upper bound on an inflated body. Larger payloads are rejected as corrupt.
pub const MAX_DECODED_BYTES: usize = 16 * 1024 * 1024;

pub const TAG_SEPARATOR: char = ':';

// kind_len + quantity + meta_len
const MIN_ENTRY_BYTES: usize = 12;

static DECODE_FAILURES_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Compression variant recorded in a payload's tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadTag {
    Raw,
    Gzip,
}

impl PayloadTag {
    pub fn as_str(self) -> &'static str {
        match self {
            PayloadTag::Raw => "RAW",
            PayloadTag::Gzip => "GZIP",
        }
    }

    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "RAW" => Some(PayloadTag::Raw),
            "GZIP" => Some(PayloadTag::Gzip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No `TAG:` prefix present.
    MissingTag,
    UnknownTag(String),
    InvalidBase64 { reason: String },
    Decompress { reason: String },
    Compress { reason: String },
    /// Inflated body exceeds `MAX_DECODED_BYTES`.
    TooLarge,
    /// Body ended before the declared entries were read.
    Truncated,
    /// Bytes remain after the declared entries.
    TrailingBytes { remaining: usize },
    InvalidKind,
    /// A field is too long for its `u32` length prefix.
    EntryTooLarge,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTag => write!(f, "payload has no tag separator"),
            Self::UnknownTag(tag) => write!(f, "unknown payload tag '{tag}'"),
            Self::InvalidBase64 { reason } => write!(f, "invalid base64 body: {reason}"),
            Self::Decompress { reason } => write!(f, "gzip inflate failed: {reason}"),
            Self::Compress { reason } => write!(f, "gzip deflate failed: {reason}"),
            Self::TooLarge => write!(f, "inflated body exceeds {MAX_DECODED_BYTES} bytes"),
            Self::Truncated => write!(f, "payload truncated"),
            Self::TrailingBytes { remaining } => {
                write!(f, "{remaining} unexpected bytes after last entry")
            }
            Self::InvalidKind => write!(f, "item kind is not valid utf-8"),
            Self::EntryTooLarge => write!(f, "item field exceeds u32 length prefix"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Encode items into a tagged, base64 payload.
pub fn encode_items(items: &[ItemStack]) -> Result<String, CodecError> {
    if items.is_empty() {
        return Ok(String::new());
    }

    let body = write_entries(items)?;
    let (tag, bytes) = if body.len() > COMPRESSION_THRESHOLD_BYTES {
        (PayloadTag::Gzip, deflate(&body)?)
    } else {
        (PayloadTag::Raw, body)
    };

    let mut out = String::with_capacity(tag.as_str().len() + 1 + bytes.len() * 4 / 3 + 4);
    out.push_str(tag.as_str());
    out.push(TAG_SEPARATOR);
    STANDARD.encode_string(&bytes, &mut out);
    Ok(out)
}

/// Decode a payload, returning an empty list if it is malformed.
pub fn decode_items(payload: &str) -> Vec<ItemStack> {
    match try_decode_items(payload) {
        Ok(items) => items,
        Err(err) => {
            DECODE_FAILURES_TOTAL.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                error = %err,
                payload_len = payload.len(),
                "item payload failed to decode; treating as empty"
            );
            Vec::new()
        }
    }
}

/// Decode a payload, reporting why it is malformed.
pub fn try_decode_items(payload: &str) -> Result<Vec<ItemStack>, CodecError> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }

    let (tag_raw, body) = payload
        .split_once(TAG_SEPARATOR)
        .ok_or(CodecError::MissingTag)?;
    let tag = PayloadTag::parse(tag_raw)
        .ok_or_else(|| CodecError::UnknownTag(tag_raw.to_string()))?;
    let bytes = STANDARD
        .decode(body)
        .map_err(|e| CodecError::InvalidBase64 {
            reason: e.to_string(),
        })?;

    let raw = match tag {
        PayloadTag::Raw => bytes,
        PayloadTag::Gzip => inflate(&bytes)?,
    };
    read_entries(&raw)
}

/// The tag of a payload, or `None` for empty or untagged input.
pub fn payload_tag(payload: &str) -> Option<PayloadTag> {
    let (tag, _) = payload.split_once(TAG_SEPARATOR)?;
    PayloadTag::parse(tag)
}

/// Number of payloads `decode_items` has swallowed since process start.
pub fn decode_failures_total() -> u64 {
    DECODE_FAILURES_TOTAL.load(Ordering::Relaxed)
}

fn write_entries(items: &[ItemStack]) -> Result<Vec<u8>, CodecError> {
    let body_len: usize = items
        .iter()
        .map(|item| MIN_ENTRY_BYTES + item.kind.len() + item.meta.len())
        .sum();
    let mut buf = Vec::with_capacity(4 + body_len);

    buf.extend_from_slice(&len_prefix(items.len())?.to_be_bytes());
    for item in items {
        buf.extend_from_slice(&len_prefix(item.kind.len())?.to_be_bytes());
        buf.extend_from_slice(item.kind.as_bytes());
        buf.extend_from_slice(&item.quantity.to_be_bytes());
        buf.extend_from_slice(&len_prefix(item.meta.len())?.to_be_bytes());
        buf.extend_from_slice(&item.meta);
    }
    Ok(buf)
}

fn len_prefix(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::EntryTooLarge)
}

fn read_entries(raw: &[u8]) -> Result<Vec<ItemStack>, CodecError> {
    let mut reader = ByteReader::new(raw);
    let count = reader.read_u32()? as usize;

    // Never trust the count for allocation size.
    let mut items = Vec::with_capacity(count.min(reader.remaining() / MIN_ENTRY_BYTES));
    for _ in 0..count {
        let kind_len = reader.read_u32()? as usize;
        let kind = std::str::from_utf8(reader.read_bytes(kind_len)?)
            .map_err(|_| CodecError::InvalidKind)?
            .to_string();
        let quantity = reader.read_u32()?;
        let meta_len = reader.read_u32()? as usize;
        let meta = reader.read_bytes(meta_len)?.to_vec();
        items.push(ItemStack {
            kind,
            quantity,
            meta,
        });
    }

    if reader.remaining() > 0 {
        return Err(CodecError::TrailingBytes {
            remaining: reader.remaining(),
        });
    }
    Ok(items)
}

fn deflate(body: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    encoder
        .write_all(body)
        .and_then(|()| encoder.finish())
        .map_err(|e| CodecError::Compress {
            reason: e.to_string(),
        })
}

fn inflate(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .take(MAX_DECODED_BYTES as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Decompress {
            reason: e.to_string(),
        })?;
    if out.len() > MAX_DECODED_BYTES {
        return Err(CodecError::TooLarge);
    }
    Ok(out)
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
