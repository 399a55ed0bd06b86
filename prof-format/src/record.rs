//! Typed views and builders over raw record payloads.
//!
//! Every event record shares a fixed `begin:u64, end:u64` prefix so the
//! decoder can convert timestamps without knowing the record kind. Block
//! records add a 4-byte descriptor id and a nul-terminated runtime name
//! (empty name means "inherit the descriptor's name"); value samples
//! reuse the block layout with `end == begin` and an opaque payload tail;
//! context switches carry only the timestamps and a target name.

use crate::pool::SerializedData;

/// Fixed bytes of a block or value record: begin + end + descriptor id.
pub const BLOCK_FIXED_SIZE: usize = 20;
/// Fixed bytes of a context switch record: begin + end.
pub const CSWITCH_FIXED_SIZE: usize = 16;
/// Fixed bytes of a descriptor record: id + line + color + kind.
pub const DESCRIPTOR_FIXED_SIZE: usize = 13;

/// Static classification of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Block,
    Event,
    Value,
}

impl BlockKind {
    /// Unknown tags decode as `Block` so newer recorders stay readable.
    pub fn from_u8(tag: u8) -> Self {
        match tag {
            1 => BlockKind::Event,
            2 => BlockKind::Value,
            _ => BlockKind::Block,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            BlockKind::Block => 0,
            BlockKind::Event => 1,
            BlockKind::Value => 2,
        }
    }
}

fn str_until_nul(tail: &[u8]) -> &str {
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    std::str::from_utf8(&tail[..end]).unwrap_or("")
}

/// Read-only view of a block or value record stored in a pool.
#[derive(Clone, Copy)]
pub struct BlockView<'a> {
    pool: &'a SerializedData,
    offset: u64,
    size: u16,
}

impl<'a> BlockView<'a> {
    pub fn new(pool: &'a SerializedData, offset: u64, size: u16) -> Self {
        BlockView { pool, offset, size }
    }

    pub fn begin(&self) -> u64 {
        self.pool.read_u64(self.offset)
    }

    pub fn end(&self) -> u64 {
        self.pool.read_u64(self.offset + 8)
    }

    pub fn duration(&self) -> u64 {
        self.end() - self.begin()
    }

    pub fn id(&self) -> u32 {
        self.pool.read_u32(self.offset + 16)
    }

    /// Runtime name; empty for statically named blocks and value samples.
    pub fn name(&self) -> &'a str {
        str_until_nul(self.tail())
    }

    /// Raw tail bytes; the sample payload for value records.
    pub fn payload(&self) -> &'a [u8] {
        self.tail()
    }

    fn tail(&self) -> &'a [u8] {
        self.pool.bytes(
            self.offset + BLOCK_FIXED_SIZE as u64,
            self.size as usize - BLOCK_FIXED_SIZE,
        )
    }
}

/// Read-only view of a context switch record.
#[derive(Clone, Copy)]
pub struct CSwitchView<'a> {
    pool: &'a SerializedData,
    offset: u64,
    size: u16,
}

impl<'a> CSwitchView<'a> {
    pub fn new(pool: &'a SerializedData, offset: u64, size: u16) -> Self {
        CSwitchView { pool, offset, size }
    }

    pub fn begin(&self) -> u64 {
        self.pool.read_u64(self.offset)
    }

    pub fn end(&self) -> u64 {
        self.pool.read_u64(self.offset + 8)
    }

    pub fn duration(&self) -> u64 {
        self.end() - self.begin()
    }

    /// Name of whatever the thread was waiting on.
    pub fn name(&self) -> &'a str {
        str_until_nul(self.pool.bytes(
            self.offset + CSWITCH_FIXED_SIZE as u64,
            self.size as usize - CSWITCH_FIXED_SIZE,
        ))
    }
}

/// Read-only view of a block descriptor record.
#[derive(Clone, Copy)]
pub struct DescriptorView<'a> {
    pool: &'a SerializedData,
    offset: u64,
    size: u16,
}

impl<'a> DescriptorView<'a> {
    pub fn new(pool: &'a SerializedData, offset: u64, size: u16) -> Self {
        DescriptorView { pool, offset, size }
    }

    /// Id the descriptor was registered under. Differs from its table
    /// index only for dynamic aliases created during decode.
    pub fn id(&self) -> u32 {
        self.pool.read_u32(self.offset)
    }

    pub fn line(&self) -> u32 {
        self.pool.read_u32(self.offset + 4)
    }

    pub fn color(&self) -> u32 {
        self.pool.read_u32(self.offset + 8)
    }

    pub fn kind(&self) -> BlockKind {
        BlockKind::from_u8(self.bytes()[12])
    }

    pub fn name(&self) -> &'a str {
        str_until_nul(&self.bytes()[DESCRIPTOR_FIXED_SIZE..])
    }

    /// Source file the block was declared in.
    pub fn file(&self) -> &'a str {
        let tail = &self.bytes()[DESCRIPTOR_FIXED_SIZE..];
        match tail.iter().position(|&b| b == 0) {
            Some(nul) => str_until_nul(&tail[nul + 1..]),
            None => "",
        }
    }

    pub fn size(&self) -> u16 {
        self.size
    }

    fn bytes(&self) -> &'a [u8] {
        self.pool.bytes(self.offset, self.size as usize)
    }
}

pub fn build_block_record(begin: u64, end: u64, id: u32, name: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(BLOCK_FIXED_SIZE + name.len() + 1);
    payload.extend_from_slice(&begin.to_le_bytes());
    payload.extend_from_slice(&end.to_le_bytes());
    payload.extend_from_slice(&id.to_le_bytes());
    payload.extend_from_slice(name.as_bytes());
    payload.push(0);
    payload
}

pub fn build_value_record(timestamp: u64, id: u32, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(BLOCK_FIXED_SIZE + data.len());
    payload.extend_from_slice(&timestamp.to_le_bytes());
    payload.extend_from_slice(&timestamp.to_le_bytes());
    payload.extend_from_slice(&id.to_le_bytes());
    payload.extend_from_slice(data);
    payload
}

pub fn build_cswitch_record(begin: u64, end: u64, name: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(CSWITCH_FIXED_SIZE + name.len() + 1);
    payload.extend_from_slice(&begin.to_le_bytes());
    payload.extend_from_slice(&end.to_le_bytes());
    payload.extend_from_slice(name.as_bytes());
    payload.push(0);
    payload
}

pub fn build_descriptor_record(
    id: u32,
    line: u32,
    color: u32,
    kind: BlockKind,
    name: &str,
    file: &str,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(DESCRIPTOR_FIXED_SIZE + name.len() + file.len() + 2);
    payload.extend_from_slice(&id.to_le_bytes());
    payload.extend_from_slice(&line.to_le_bytes());
    payload.extend_from_slice(&color.to_le_bytes());
    payload.push(kind.as_u8());
    payload.extend_from_slice(name.as_bytes());
    payload.push(0);
    payload.extend_from_slice(file.as_bytes());
    payload.push(0);
    payload
}
