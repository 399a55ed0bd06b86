//! In-memory model of a decoded trace.
//!
//! Tree nodes live in a per-thread arena and reference each other by
//! index, never by address, so growing the arena never invalidates a
//! reference. Keeping each thread's nodes in its own arena also makes
//! the parallel statistics pass safe by construction: every worker gets
//! exclusive mutable access to exactly one [`ThreadRoot`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use prof_format::{BlockView, CSwitchView, DescriptorView, SerializedData};

pub type BlockIndex = u32;

/// Shared ownership handle to one statistics accumulator. All nodes with
/// the same key hold clones of one instance; it is freed when the last
/// referencing node is dropped.
pub type StatsHandle = Arc<Mutex<BlockStatistics>>;

/// Aggregated statistics for one key (descriptor id or runtime name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStatistics {
    pub calls_number: u32,
    pub total_duration: u64,
    pub total_children_duration: u64,
    /// Arena index of the longest occurrence seen so far.
    pub max_duration_block: BlockIndex,
    /// Arena index of the shortest occurrence seen so far.
    pub min_duration_block: BlockIndex,
}

impl BlockStatistics {
    pub fn new(duration: u64, block: BlockIndex) -> Self {
        BlockStatistics {
            calls_number: 1,
            total_duration: duration,
            total_children_duration: 0,
            max_duration_block: block,
            min_duration_block: block,
        }
    }

    /// Derived on demand, never stored.
    pub fn average_duration(&self) -> u64 {
        self.total_duration / u64::from(self.calls_number)
    }

    pub fn self_duration(&self) -> u64 {
        self.total_duration - self.total_children_duration
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Block,
    ContextSwitch,
}

/// Handle to one raw record in the trace's record pool.
#[derive(Debug, Clone, Copy)]
pub struct RecordRef {
    pub offset: u64,
    pub size: u16,
    pub kind: RecordKind,
}

/// One attached record plus its place in the tree.
#[derive(Debug)]
pub struct TreeNode {
    pub record: RecordRef,
    /// Child indices in completion order.
    pub children: Vec<BlockIndex>,
    /// Subtree height: 0 for leaves, `1 + max(child depth)` otherwise.
    pub depth: u16,
    pub per_thread_stats: Option<StatsHandle>,
    pub per_parent_stats: Option<StatsHandle>,
    pub per_frame_stats: Option<StatsHandle>,
}

impl TreeNode {
    pub fn new(record: RecordRef) -> Self {
        TreeNode {
            record,
            children: Vec::new(),
            depth: 0,
            per_thread_stats: None,
            per_parent_stats: None,
            per_frame_stats: None,
        }
    }

    // Both record layouts share the begin/end prefix.
    pub fn begin(&self, pool: &SerializedData) -> u64 {
        pool.read_u64(self.record.offset)
    }

    pub fn end(&self, pool: &SerializedData) -> u64 {
        pool.read_u64(self.record.offset + 8)
    }

    pub fn duration(&self, pool: &SerializedData) -> u64 {
        self.end(pool) - self.begin(pool)
    }

    /// Descriptor id as stored in the record, after any dynamic remap.
    pub fn block_id(&self, pool: &SerializedData) -> u32 {
        pool.read_u32(self.record.offset + 16)
    }

    pub fn block<'a>(&self, pool: &'a SerializedData) -> BlockView<'a> {
        BlockView::new(pool, self.record.offset, self.record.size)
    }

    pub fn cswitch<'a>(&self, pool: &'a SerializedData) -> CSwitchView<'a> {
        CSwitchView::new(pool, self.record.offset, self.record.size)
    }
}

/// Per-thread call tree and its rollup counters.
#[derive(Debug, Default)]
pub struct ThreadRoot {
    pub thread_id: u64,
    pub thread_name: String,
    /// Arena of every node attached to this thread.
    pub nodes: Vec<TreeNode>,
    /// Top-level frames in completion order.
    pub children: Vec<BlockIndex>,
    /// Context switch nodes in completion order.
    pub sync: Vec<BlockIndex>,
    /// Nodes whose descriptor kind is not `Block`.
    pub events: Vec<BlockIndex>,
    pub wait_time: u64,
    /// Top-level nodes of kind `Block`.
    pub frames_number: u32,
    pub blocks_number: u32,
    /// Tree height including the synthetic root level.
    pub depth: u16,
    pub profiled_time: u64,
}

impl ThreadRoot {
    pub fn push_node(&mut self, node: TreeNode) -> BlockIndex {
        let index = self.nodes.len() as BlockIndex;
        self.nodes.push(node);
        index
    }

    pub fn node(&self, index: BlockIndex) -> &TreeNode {
        &self.nodes[index as usize]
    }
}

/// Offset and framed size of one descriptor payload in the pool.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorRef {
    pub offset: u64,
    pub size: u16,
}

/// Decoded descriptor table indexed by descriptor id.
///
/// `None` marks a deliberately absent placeholder. Entries past the
/// static count are dynamic aliases created during decode for
/// runtime-named blocks; they share the pool bytes of the descriptor
/// they alias and are never re-serialized.
#[derive(Debug, Default)]
pub struct Descriptors {
    pub pool: SerializedData,
    pub table: Vec<Option<DescriptorRef>>,
}

impl Descriptors {
    pub fn get(&self, id: u32) -> Option<DescriptorView<'_>> {
        let entry = (*self.table.get(id as usize)?)?;
        Some(DescriptorView::new(&self.pool, entry.offset, entry.size))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// A fully decoded trace.
pub struct Trace {
    /// Raw payloads of every block and context switch record.
    pub pool: SerializedData,
    pub descriptors: Descriptors,
    /// Descriptor table length as read from the stream, before
    /// dynamic-id growth.
    pub static_descriptors_count: u32,
    pub roots: BTreeMap<u64, ThreadRoot>,
    pub version: u32,
    pub pid: u64,
    pub begin_time: u64,
    pub end_time: u64,
    /// Total nodes attached across all threads, context switches
    /// included.
    pub blocks_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_duration_is_derived() {
        let mut stats = BlockStatistics::new(100, 0);
        stats.calls_number = 4;
        stats.total_duration = 1000;
        assert_eq!(stats.average_duration(), 250);
    }

    #[test]
    fn self_duration_subtracts_children() {
        let mut stats = BlockStatistics::new(100, 0);
        stats.total_children_duration = 30;
        assert_eq!(stats.self_duration(), 70);
    }

    #[test]
    fn arena_indices_address_nodes() {
        let mut root = ThreadRoot::default();
        let record = RecordRef {
            offset: 0,
            size: 21,
            kind: RecordKind::Block,
        };
        let first = root.push_node(TreeNode::new(record));
        let second = root.push_node(TreeNode::new(record));
        assert_eq!(first, 0);
        assert_eq!(second, 1);
        assert_eq!(root.node(second).children.len(), 0);
    }
}
