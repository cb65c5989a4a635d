//! Binary encoding of [`Value`] trees.
//!
//! A [`Message`] holds exactly one value framed by start/end markers:
//!
//! ```text
//! 0xE0 | tagged value ... | 0xE1
//! ```
//!
//! Every value starts with a one-byte tag whose high nibble names the variant
//! and whose low bits carry a byte width. Integers use the fewest
//! sign-extended bytes; doubles are 8 bytes big-endian; strings, arrays and
//! maps carry a minimal-width element count followed by their contents.
//!
//! The backing store grows in fixed-size chunks, so appending never copies
//! what was already written. [`Message::get_bytes`] flattens it for sending.

use std::net::Ipv4Addr;

use crate::error::CodecError;
use crate::value::{DateTime, DateTimeKind, Value, ValueMap};

/// Size of one backing-store block.
pub const CHUNK_SIZE: usize = 256;

/// Deepest Array/Map nesting accepted by the encoder and decoder.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Wire tag bytes.
pub mod tags {
    pub const INVALID: u8 = 0x01;
    pub const LOGICAL_FALSE: u8 = 0x10;
    pub const LOGICAL_TRUE: u8 = 0x11;
    /// Low 3 bits hold `byte_count - 1` (1..=8 bytes).
    pub const INTEGER: u8 = 0x20;
    pub const DOUBLE: u8 = 0x30;
    /// Low 2 bits hold the width of the length field minus one.
    pub const STRING: u8 = 0x40;
    pub const ADDRESS: u8 = 0x50;
    pub const DATE: u8 = 0x51;
    pub const TIME: u8 = 0x52;
    /// Low 2 bits hold the width of the element count minus one.
    pub const ARRAY: u8 = 0x60;
    /// Low 2 bits hold the width of the pair count minus one.
    pub const MAP: u8 = 0x70;
    pub const START_OF_MESSAGE: u8 = 0xE0;
    pub const END_OF_MESSAGE: u8 = 0xE1;

    pub(crate) const KIND_MASK: u8 = 0xF0;
    pub(crate) const SIZE_MASK: u8 = 0x0F;
}

// ============================================================================
// Chunked backing store
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ChunkArray {
    chunks: Vec<Box<[u8; CHUNK_SIZE]>>,
    len: usize,
}

impl ChunkArray {
    fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }

    fn len(&self) -> usize {
        self.len
    }

    fn append(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            if self.len == self.chunks.len() * CHUNK_SIZE {
                self.chunks.push(Box::new([0; CHUNK_SIZE]));
            }
            let offset = self.len % CHUNK_SIZE;
            let take = (CHUNK_SIZE - offset).min(data.len());
            let (head, rest) = data.split_at(take);
            let Some(chunk) = self.chunks.last_mut() else {
                return;
            };
            if let Some(slot) = chunk.get_mut(offset..offset + take) {
                slot.copy_from_slice(head);
            }
            self.len += take;
            data = rest;
        }
    }

    fn byte_at(&self, index: usize) -> Option<u8> {
        if index >= self.len {
            return None;
        }
        self.chunks
            .get(index / CHUNK_SIZE)
            .and_then(|chunk| chunk.get(index % CHUNK_SIZE))
            .copied()
    }

    fn copy_range(&self, start: usize, count: usize) -> Option<Vec<u8>> {
        let end = start.checked_add(count)?;
        if end > self.len {
            return None;
        }
        let mut out = Vec::with_capacity(count);
        let mut pos = start;
        while pos < end {
            let chunk = self.chunks.get(pos / CHUNK_SIZE)?;
            let offset = pos % CHUNK_SIZE;
            let take = (CHUNK_SIZE - offset).min(end - pos);
            out.extend_from_slice(chunk.get(offset..offset + take)?);
            pos += take;
        }
        Some(out)
    }

    fn to_vec(&self) -> Vec<u8> {
        self.copy_range(0, self.len).unwrap_or_default()
    }
}

// ============================================================================
// Message
// ============================================================================

/// Lifecycle of a [`Message`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Closed,
    OpenForReading,
    OpenForWriting,
}

/// A growable buffer holding one encoded [`Value`].
#[derive(Debug, Clone)]
pub struct Message {
    buffer: ChunkArray,
    state: MessageState,
    read_cursor: usize,
    has_value: bool,
    terminated: bool,
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Message {
    /// Creates an empty, closed message.
    pub fn new() -> Self {
        Self {
            buffer: ChunkArray::default(),
            state: MessageState::Closed,
            read_cursor: 0,
            has_value: false,
            terminated: false,
        }
    }

    /// Encodes a value into a ready-to-send byte sequence.
    pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut message = Self::new();
        message.open(true);
        message.set_value(value)?;
        message.close();
        Ok(message.get_bytes())
    }

    /// Decodes exactly one message; `None` if it is truncated, malformed,
    /// or followed by anything after its end marker.
    pub fn decode(bytes: &[u8]) -> Option<Value> {
        let mut message = Self::new();
        message.open(true);
        message.append_bytes(bytes).ok()?;
        message.close();
        let value = message.get_value(true)?;
        (message.read_cursor == message.len()).then_some(value)
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    /// Prepares the buffer.
    ///
    /// Opening for writing discards previous contents. Opening for reading
    /// keeps them and rewinds the read cursor.
    pub fn open(&mut self, for_writing: bool) -> &mut Self {
        if for_writing {
            self.buffer.clear();
            self.has_value = false;
            self.terminated = false;
            self.state = MessageState::OpenForWriting;
        } else {
            self.state = MessageState::OpenForReading;
        }
        self.read_cursor = 0;
        self
    }

    /// Appends raw, already-encoded bytes (e.g. as received from a socket).
    pub fn append_bytes(&mut self, data: &[u8]) -> Result<(), CodecError> {
        if self.state != MessageState::OpenForWriting {
            return Err(CodecError::NotOpenForWriting);
        }
        self.buffer.append(data);
        Ok(())
    }

    /// Encodes `value` as the content of this message.
    pub fn set_value(&mut self, value: &Value) -> Result<(), CodecError> {
        if self.state != MessageState::OpenForWriting {
            return Err(CodecError::NotOpenForWriting);
        }
        if self.has_value {
            return Err(CodecError::ValueAlreadySet);
        }
        let mut out = vec![tags::START_OF_MESSAGE];
        encode_value(value, &mut out, 0)?;
        self.buffer.append(&out);
        self.has_value = true;
        Ok(())
    }

    /// Finalizes the buffer. Further writes fail until the message is reopened.
    pub fn close(&mut self) -> &mut Self {
        if self.state == MessageState::OpenForWriting && self.has_value && !self.terminated {
            self.buffer.append(&[tags::END_OF_MESSAGE]);
            self.terminated = true;
        }
        self.state = MessageState::Closed;
        self
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.len() == 0
    }

    /// The whole encoded message as one flat byte sequence.
    pub fn get_bytes(&self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    /// Decodes the next value at the read cursor.
    ///
    /// Reading is allowed while open for reading, or while closed when
    /// `allow_closed` is set. The cursor only moves forward: after a failed
    /// decode it is parked at the end of the buffer.
    pub fn get_value(&mut self, allow_closed: bool) -> Option<Value> {
        let readable = match self.state {
            MessageState::OpenForReading => true,
            MessageState::Closed => allow_closed,
            MessageState::OpenForWriting => false,
        };
        if !readable {
            return None;
        }

        let mut reader = Reader {
            buf: &self.buffer,
            pos: self.read_cursor,
        };
        let result = reader.message();
        self.read_cursor = match result {
            Some(_) => reader.pos,
            None => self.buffer.len(),
        };
        result
    }
}

// ============================================================================
// Encoding
// ============================================================================

fn tail<const N: usize>(bytes: &[u8; N], count: usize) -> &[u8] {
    bytes.get(N - count.min(N)..).unwrap_or_default()
}

/// Fewest bytes (1..=8) that hold `value` as a sign-extended integer.
fn integer_width(value: i64) -> usize {
    (1..8)
        .find(|&n| {
            let bits = n * 8;
            let min = -(1i64 << (bits - 1));
            let max = (1i64 << (bits - 1)) - 1;
            (min..=max).contains(&value)
        })
        .unwrap_or(8)
}

/// Fewest bytes (1..=4) that hold an unsigned count.
fn count_width(count: u32) -> usize {
    match count {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

fn write_count(
    base: u8,
    what: &'static str,
    len: usize,
    out: &mut Vec<u8>,
) -> Result<(), CodecError> {
    let count = u32::try_from(len).map_err(|_| CodecError::TooLarge { what, len })?;
    let width = count_width(count);
    out.push(base | (width as u8 - 1));
    out.extend_from_slice(tail(&count.to_be_bytes(), width));
    Ok(())
}

fn encode_value(value: &Value, out: &mut Vec<u8>, depth: usize) -> Result<(), CodecError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(CodecError::NestingTooDeep {
            max: MAX_NESTING_DEPTH,
        });
    }

    match value {
        Value::Invalid => out.push(tags::INVALID),
        Value::Logical(b) => out.push(if *b {
            tags::LOGICAL_TRUE
        } else {
            tags::LOGICAL_FALSE
        }),
        Value::Integer(i) => {
            let width = integer_width(*i);
            out.push(tags::INTEGER | (width as u8 - 1));
            out.extend_from_slice(tail(&i.to_be_bytes(), width));
        }
        Value::Double(d) => {
            out.push(tags::DOUBLE);
            out.extend_from_slice(&d.to_be_bytes());
        }
        Value::String(s) => {
            write_count(tags::STRING, "string", s.len(), out)?;
            out.extend_from_slice(s.as_bytes());
        }
        Value::Address(a) => {
            out.push(tags::ADDRESS);
            out.extend_from_slice(&u32::from(*a).to_be_bytes());
        }
        Value::DateTime(dt) => {
            out.push(match dt.kind() {
                DateTimeKind::Date => tags::DATE,
                DateTimeKind::Time => tags::TIME,
            });
            out.extend_from_slice(&dt.ticks().to_be_bytes());
        }
        Value::Array(items) => {
            write_count(tags::ARRAY, "array", items.len(), out)?;
            for item in items {
                encode_value(item, out, depth + 1)?;
            }
        }
        Value::Map(map) => {
            write_count(tags::MAP, "map", map.len(), out)?;
            for (key, item) in map {
                encode_value(key, out, depth + 1)?;
                encode_value(item, out, depth + 1)?;
            }
        }
    }
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

struct Reader<'a> {
    buf: &'a ChunkArray,
    pos: usize,
}

impl Reader<'_> {
    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn byte(&mut self) -> Option<u8> {
        let b = self.buf.byte_at(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn bytes(&mut self, count: usize) -> Option<Vec<u8>> {
        let raw = self.buf.copy_range(self.pos, count)?;
        self.pos += count;
        Some(raw)
    }

    fn expect(&mut self, tag: u8) -> Option<()> {
        (self.byte()? == tag).then_some(())
    }

    fn signed(&mut self, width: usize) -> Option<i64> {
        let raw = self.bytes(width)?;
        let negative = raw.first()? & 0x80 != 0;
        let init: i64 = if negative { -1 } else { 0 };
        Some(raw.iter().fold(init, |acc, b| (acc << 8) | i64::from(*b)))
    }

    fn unsigned(&mut self, width: usize) -> Option<u64> {
        let raw = self.bytes(width)?;
        Some(raw.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    fn fixed4(&mut self) -> Option<u32> {
        let raw = self.bytes(4)?;
        Some(u32::from_be_bytes(raw.try_into().ok()?))
    }

    /// Reads a count and rejects it if the remaining input cannot hold
    /// `count * min_bytes_each` bytes.
    fn count(&mut self, size_bits: u8, min_bytes_each: usize) -> Option<usize> {
        if size_bits > 3 {
            return None;
        }
        let count = usize::try_from(self.unsigned(usize::from(size_bits) + 1)?).ok()?;
        (count.saturating_mul(min_bytes_each) <= self.remaining()).then_some(count)
    }

    fn message(&mut self) -> Option<Value> {
        self.expect(tags::START_OF_MESSAGE)?;
        let value = self.value(0)?;
        self.expect(tags::END_OF_MESSAGE)?;
        Some(value)
    }

    fn value(&mut self, depth: usize) -> Option<Value> {
        if depth > MAX_NESTING_DEPTH {
            return None;
        }

        let tag = self.byte()?;
        let size = tag & tags::SIZE_MASK;
        match tag & tags::KIND_MASK {
            0x00 if tag == tags::INVALID => Some(Value::Invalid),
            0x10 => match tag {
                tags::LOGICAL_FALSE => Some(Value::Logical(false)),
                tags::LOGICAL_TRUE => Some(Value::Logical(true)),
                _ => None,
            },
            0x20 if size < 8 => self.signed(usize::from(size) + 1).map(Value::Integer),
            0x30 if tag == tags::DOUBLE => {
                let raw: [u8; 8] = self.bytes(8)?.try_into().ok()?;
                Some(Value::Double(f64::from_be_bytes(raw)))
            }
            0x40 => {
                let len = self.count(size, 1)?;
                let raw = self.bytes(len)?;
                String::from_utf8(raw).ok().map(Value::String)
            }
            0x50 => match tag {
                tags::ADDRESS => self.fixed4().map(|a| Value::Address(Ipv4Addr::from(a))),
                tags::DATE => self
                    .fixed4()
                    .map(|t| Value::DateTime(DateTime::from_ticks(DateTimeKind::Date, t))),
                tags::TIME => self
                    .fixed4()
                    .map(|t| Value::DateTime(DateTime::from_ticks(DateTimeKind::Time, t))),
                _ => None,
            },
            0x60 => {
                let count = self.count(size, 1)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.value(depth + 1)?);
                }
                Some(Value::Array(items))
            }
            0x70 => {
                let count = self.count(size, 2)?;
                let mut map = ValueMap::new();
                for _ in 0..count {
                    let key = self.value(depth + 1)?;
                    let item = self.value(depth + 1)?;
                    map.insert(key, item);
                }
                Some(Value::Map(map))
            }
            _ => None,
        }
    }
}
