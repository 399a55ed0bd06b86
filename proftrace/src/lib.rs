//! # proftrace - Profiling Trace Persistence Engine
//!
//! Decodes a finished binary trace stream into per-thread call trees
//! with aggregated statistics, and re-encodes a (possibly time-windowed)
//! subset of those trees back to the same format.
//!
//! Records arrive in completion order with no parent links; nesting is
//! recovered from timestamp containment in a single forward pass (see
//! [`reader`]). Decoding and encoding report progress through a shared
//! [`Progress`] cell which doubles as a cooperative cancellation flag.
//!
//! ```no_run
//! use proftrace::{decode_file, encode_file, Progress};
//!
//! # fn main() -> proftrace::Result<()> {
//! let progress = Progress::new();
//! let trace = decode_file("session.prof", &progress, true)?;
//! // keep only the two middle seconds
//! encode_file(&trace, "window.prof", Some((2_000_000_000, 4_000_000_000)), &progress)?;
//! # Ok(())
//! # }
//! ```

use prof_format::FormatError;
use thiserror::Error;

pub use model::{
    BlockIndex, BlockStatistics, DescriptorRef, Descriptors, RecordKind, RecordRef, StatsHandle,
    ThreadRoot, Trace, TreeNode,
};
pub use progress::Progress;
pub use reader::{decode_file, decode_stream, read_descriptors_file, read_descriptors_stream};
pub use writer::{encode_file, encode_stream};

pub mod model;
pub mod progress;
pub mod reader;
pub mod stats;
pub mod writer;

/// Hard nesting limit per thread; level 0 is reserved for the synthetic
/// thread root, so a chain of 254 blocks is the deepest decodable tree.
pub const MAX_BLOCK_DEPTH: u16 = 254;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("{0}")]
    Format(#[from] FormatError),

    #[error("corrupt record: {reason}")]
    CorruptRecord { reason: String },

    #[error("unknown descriptor id {id}")]
    UnknownDescriptorId { id: u32 },

    #[error("stack depth exceeded 254 for block \"{name}\" at {file}:{line}")]
    StackDepthExceeded {
        name: String,
        file: String,
        line: u32,
    },

    #[error("nothing to save")]
    EmptyTrace,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TraceError>;

#[cfg(test)]
pub(crate) mod testutil;
