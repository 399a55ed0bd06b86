//! Stream header codec with backward-compatible layouts.
//!
//! Layouts changed twice over the format's history: the process id was
//! absent before v1.0.0 and 4 bytes wide before v1.3.0, and v2.0.0
//! moved the count fields after the size fields. The decoder accepts all
//! of them; the encoder always emits the v2 layout.

use std::io::{Read, Write};

use crate::io;
use crate::{FormatError, Result, MIN_COMPATIBLE_VERSION, SIGNATURE, V_1_0_0, V_1_3_0, V_2_0_0};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceHeader {
    pub version: u32,
    pub pid: u64,
    /// Ticks per second; zero means timestamps are already nanoseconds.
    pub cpu_frequency: i64,
    pub begin_time: u64,
    pub end_time: u64,
    /// Total payload bytes of all block and context switch records.
    pub memory_size: u64,
    /// Bytes of the descriptor section, length prefixes included.
    pub descriptors_memory_size: u64,
    pub blocks_count: u32,
    pub descriptors_count: u32,
}

/// Validates the magic and the version floor, returning the version.
pub fn read_signature_and_version<R: Read>(reader: &mut R) -> Result<u32> {
    let signature = io::read_u32(reader)?;
    if signature != SIGNATURE {
        return Err(FormatError::SignatureMismatch { found: signature });
    }
    let version = io::read_u32(reader)?;
    if version < MIN_COMPATIBLE_VERSION {
        return Err(FormatError::IncompatibleVersion { version });
    }
    Ok(version)
}

pub fn read_header<R: Read>(reader: &mut R) -> Result<TraceHeader> {
    let version = read_signature_and_version(reader)?;
    if version < V_2_0_0 {
        read_header_v1(version, reader)
    } else {
        read_header_v2(version, reader)
    }
}

fn nonzero_u32(value: u32, field: &'static str) -> Result<u32> {
    if value == 0 {
        return Err(FormatError::CorruptHeader { field });
    }
    Ok(value)
}

fn nonzero_u64(value: u64, field: &'static str) -> Result<u64> {
    if value == 0 {
        return Err(FormatError::CorruptHeader { field });
    }
    Ok(value)
}

fn read_header_v1<R: Read>(version: u32, reader: &mut R) -> Result<TraceHeader> {
    let pid = if version > V_1_0_0 {
        if version < V_1_3_0 {
            io::read_u32(reader)? as u64
        } else {
            io::read_u64(reader)?
        }
    } else {
        0
    };

    let cpu_frequency = io::read_i64(reader)?;
    let begin_time = io::read_u64(reader)?;
    let end_time = io::read_u64(reader)?;

    let blocks_count = nonzero_u32(io::read_u32(reader)?, "blocks count")?;
    let memory_size = nonzero_u64(io::read_u64(reader)?, "memory size")?;
    let descriptors_count = nonzero_u32(io::read_u32(reader)?, "descriptors count")?;
    let descriptors_memory_size =
        nonzero_u64(io::read_u64(reader)?, "descriptors memory size")?;

    Ok(TraceHeader {
        version,
        pid,
        cpu_frequency,
        begin_time,
        end_time,
        memory_size,
        descriptors_memory_size,
        blocks_count,
        descriptors_count,
    })
}

fn read_header_v2<R: Read>(version: u32, reader: &mut R) -> Result<TraceHeader> {
    let pid = io::read_u64(reader)?;
    let cpu_frequency = io::read_i64(reader)?;
    let begin_time = io::read_u64(reader)?;
    let end_time = io::read_u64(reader)?;

    let memory_size = nonzero_u64(io::read_u64(reader)?, "memory size")?;
    let descriptors_memory_size =
        nonzero_u64(io::read_u64(reader)?, "descriptors memory size")?;
    let blocks_count = nonzero_u32(io::read_u32(reader)?, "blocks count")?;
    let descriptors_count = nonzero_u32(io::read_u32(reader)?, "descriptors count")?;

    Ok(TraceHeader {
        version,
        pid,
        cpu_frequency,
        begin_time,
        end_time,
        memory_size,
        descriptors_memory_size,
        blocks_count,
        descriptors_count,
    })
}

/// Writes the header in the v2 layout. `header.version` should be
/// [`crate::CURRENT_VERSION`] unless a test says otherwise.
pub fn write_header<W: Write>(writer: &mut W, header: &TraceHeader) -> Result<()> {
    io::write_u32(writer, SIGNATURE)?;
    io::write_u32(writer, header.version)?;
    io::write_u64(writer, header.pid)?;
    io::write_i64(writer, header.cpu_frequency)?;
    io::write_u64(writer, header.begin_time)?;
    io::write_u64(writer, header.end_time)?;
    io::write_u64(writer, header.memory_size)?;
    io::write_u64(writer, header.descriptors_memory_size)?;
    io::write_u32(writer, header.blocks_count)?;
    io::write_u32(writer, header.descriptors_count)?;
    Ok(())
}
