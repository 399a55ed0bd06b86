//! # prof-format - Profiling Trace Wire Format
//!
//! Binary format shared by the trace recorder and the persistence engine:
//! the versioned stream header, the size-prefixed record framing, and the
//! raw payload layouts for blocks, context switches and block descriptors.
//!
//! Every multi-byte field is little-endian. A stream opens with a 4-byte
//! signature and a packed version, followed by a version-dependent header,
//! the descriptor table and per-thread record sections. Decoded payloads
//! live in a [`SerializedData`] arena and are addressed by stable offsets.

use thiserror::Error;

pub use header::{read_header, read_signature_and_version, write_header, TraceHeader};
pub use pool::SerializedData;
pub use record::{
    build_block_record, build_cswitch_record, build_descriptor_record, build_value_record,
    BlockKind, BlockView, CSwitchView, DescriptorView, BLOCK_FIXED_SIZE, CSWITCH_FIXED_SIZE,
    DESCRIPTOR_FIXED_SIZE,
};

pub mod header;
pub mod io;
pub mod pool;
pub mod record;

/// Magic bytes opening every trace stream.
pub const SIGNATURE: u32 = 0xE251_F342;

/// Packs a dotted version into `major << 24 | minor << 16 | patch`.
pub const fn version(major: u8, minor: u8, patch: u16) -> u32 {
    ((major as u32) << 24) | ((minor as u32) << 16) | patch as u32
}

/// Oldest stream version this crate still decodes.
pub const MIN_COMPATIBLE_VERSION: u32 = version(0, 1, 0);
/// Process id was added to the header after this version.
pub const V_1_0_0: u32 = version(1, 0, 0);
/// Process and thread ids widened from 4 to 8 bytes.
pub const V_1_3_0: u32 = version(1, 3, 0);
/// Header fields were rearranged.
pub const V_2_0_0: u32 = version(2, 0, 0);
/// Version written by the encoder.
pub const CURRENT_VERSION: u32 = version(2, 1, 0);

/// Numerator of the tick conversion factor.
pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Renders a packed version as dotted `major.minor.patch`.
pub fn version_string(v: u32) -> String {
    format!("{}.{}.{}", v >> 24, (v >> 16) & 0xff, v & 0xffff)
}

/// Size in bytes of a thread id on the wire for the given stream version.
pub const fn thread_id_size(stream_version: u32) -> usize {
    if stream_version < V_1_3_0 {
        4
    } else {
        8
    }
}

/// Conversion factor from CPU ticks to nanoseconds.
///
/// One double-precision division per trace, then a multiply per
/// timestamp. Not bit-exact against integer multiply-then-divide, which
/// is an accepted tradeoff for streams with billions of timestamps.
pub fn conversion_factor(cpu_frequency: i64) -> f64 {
    if cpu_frequency == 0 {
        1.0
    } else {
        NANOS_PER_SECOND as f64 / cpu_frequency as f64
    }
}

/// Converts a raw tick count to nanoseconds using [`conversion_factor`].
pub fn ticks_to_ns(ticks: u64, factor: f64) -> u64 {
    (ticks as f64 * factor) as u64
}

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("wrong signature 0x{found:08x}, this is not a profiler trace stream")]
    SignatureMismatch { found: u32 },

    #[error("incompatible version v{}", version_string(*version))]
    IncompatibleVersion { version: u32 },

    #[error("corrupt header: {field} == 0")]
    CorruptHeader { field: &'static str },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FormatError>;
