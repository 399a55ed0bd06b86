//! Re-encoding of a decoded trace, optionally restricted to a time
//! window.
//!
//! Serialization order mirrors what the decoder expects: every node's
//! children are written before the node itself, so the stream stays in
//! completion order and decodes back to the same tree shape. Dynamic
//! descriptor ids assigned during decode are patched back to the static
//! id of the descriptor they alias; the written table only ever contains
//! the static entries.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::AddAssign;
use std::path::Path;

use tracing::debug;

use prof_format::{io as wire, write_header, SerializedData, TraceHeader, CURRENT_VERSION};

use crate::model::{BlockIndex, ThreadRoot, Trace, TreeNode};
use crate::progress::Progress;
use crate::{Result, TraceError};

/// Encodes `trace` to `writer`, keeping only records overlapping
/// `range` (begin, end in nanoseconds) when one is given. Returns the
/// number of records written.
///
/// The written header's time range is the extent of the selected
/// records themselves, not the requested window: a straddling record
/// widens it past the window, and when nothing reaches a window edge
/// the range contracts to the records that were kept.
pub fn encode_stream<W: Write>(
    trace: &Trace,
    mut writer: W,
    range: Option<(u64, u64)>,
    progress: &Progress,
) -> Result<u32> {
    progress.checkpoint(0)?;

    let window = range.unwrap_or((trace.begin_time, trace.end_time));
    let mut selections = Vec::with_capacity(trace.roots.len());
    let mut total = MemoryAndCount::default();
    let mut begin_time = u64::MAX;
    let mut end_time = 0u64;

    for root in trace.roots.values() {
        let frames = find_range(&root.nodes, &root.children, &trace.pool, window);
        let sync = find_range(&root.nodes, &root.sync, &trace.pool, window);

        let mut selected = MemoryAndCount::default();
        for &frame in frames {
            selected += subtree_memory_and_count(&root.nodes, frame);
        }
        for &cs in sync {
            selected += record_memory(&root.nodes[cs as usize]);
        }

        // The header range tracks the selection's true extremes rather
        // than the requested bounds, so a straddling block keeps its
        // real extent.
        for &index in frames.iter().chain(sync) {
            let node = &root.nodes[index as usize];
            begin_time = begin_time.min(node.begin(&trace.pool));
            end_time = end_time.max(node.end(&trace.pool));
        }

        total += selected;
        selections.push((root, frames, sync, selected));
    }

    if total.count == 0 {
        return Err(TraceError::EmptyTrace);
    }

    let written_descriptors = trace.static_descriptors_count;
    let descriptors_memory_size =
        trace.descriptors.pool.len() as u64 + 2 * written_descriptors as u64;

    // Timestamps were converted to nanoseconds during decode, so the
    // written stream carries a zero frequency.
    write_header(
        &mut writer,
        &TraceHeader {
            version: CURRENT_VERSION,
            pid: trace.pid,
            cpu_frequency: 0,
            begin_time,
            end_time,
            memory_size: total.memory,
            descriptors_memory_size,
            blocks_count: total.count,
            descriptors_count: written_descriptors,
        },
    )?;

    for id in 0..written_descriptors {
        match trace.descriptors.table[id as usize] {
            Some(entry) => {
                wire::write_u16(&mut writer, entry.size)?;
                writer.write_all(trace.descriptors.pool.bytes(entry.offset, entry.size as usize))?;
            }
            None => wire::write_u16(&mut writer, 0)?,
        }
    }
    progress.checkpoint(15)?;

    let threads = selections.len() as i32;
    for (done, (root, frames, sync, selected)) in selections.into_iter().enumerate() {
        if selected.count == 0 {
            progress.checkpoint(15 + 85 * (done as i32 + 1) / threads)?;
            continue;
        }

        wire::write_u64(&mut writer, root.thread_id)?;
        write_thread_name(&mut writer, &root.thread_name)?;

        wire::write_u32(&mut writer, sync.len() as u32)?;
        for &cs in sync {
            write_record(&mut writer, &root.nodes[cs as usize], trace)?;
        }

        let block_count: u32 = frames
            .iter()
            .map(|&f| subtree_memory_and_count(&root.nodes, f).count)
            .sum();
        wire::write_u32(&mut writer, block_count)?;
        for &frame in frames {
            write_subtree(&mut writer, root, frame, trace)?;
        }

        progress.checkpoint(15 + 85 * (done as i32 + 1) / threads)?;
    }

    progress.checkpoint(100)?;
    debug!(
        blocks = total.count,
        memory = total.memory,
        begin_time,
        end_time,
        "trace encoded"
    );
    Ok(total.count)
}

pub fn encode_file<P: AsRef<Path>>(
    trace: &Trace,
    path: P,
    range: Option<(u64, u64)>,
    progress: &Progress,
) -> Result<u32> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let written = encode_stream(trace, &mut writer, range, progress)?;
    writer.flush()?;
    Ok(written)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct MemoryAndCount {
    /// Payload bytes, size prefixes excluded.
    memory: u64,
    count: u32,
}

impl AddAssign for MemoryAndCount {
    fn add_assign(&mut self, other: Self) {
        self.memory += other.memory;
        self.count += other.count;
    }
}

fn record_memory(node: &TreeNode) -> MemoryAndCount {
    MemoryAndCount {
        memory: node.record.size as u64,
        count: 1,
    }
}

fn subtree_memory_and_count(nodes: &[TreeNode], index: BlockIndex) -> MemoryAndCount {
    let mut acc = record_memory(&nodes[index as usize]);
    for &child in &nodes[index as usize].children {
        acc += subtree_memory_and_count(nodes, child);
    }
    acc
}

/// Selects the contiguous run of `indices` overlapping `window`.
///
/// Siblings at any one level never overlap each other and are stored
/// sorted by begin time, which also sorts them by end time, so both
/// boundaries fall out of a binary search.
fn find_range<'a>(
    nodes: &[TreeNode],
    indices: &'a [BlockIndex],
    pool: &SerializedData,
    window: (u64, u64),
) -> &'a [BlockIndex] {
    let (from, to) = window;
    let first = indices.partition_point(|&i| nodes[i as usize].end(pool) < from);
    let last = indices.partition_point(|&i| nodes[i as usize].begin(pool) <= to);
    &indices[first..last.max(first)]
}

fn write_thread_name<W: Write>(writer: &mut W, name: &str) -> Result<()> {
    if name.is_empty() {
        wire::write_u16(writer, 0)?;
    } else {
        wire::write_u16(writer, name.len() as u16 + 1)?;
        writer.write_all(name.as_bytes())?;
        writer.write_all(&[0])?;
    }
    Ok(())
}

fn write_subtree<W: Write>(
    writer: &mut W,
    root: &ThreadRoot,
    index: BlockIndex,
    trace: &Trace,
) -> Result<()> {
    for &child in &root.nodes[index as usize].children {
        write_subtree(writer, root, child, trace)?;
    }
    write_record(writer, &root.nodes[index as usize], trace)
}

/// Writes one size-prefixed record, restoring the static descriptor id
/// for records that were remapped to a dynamic alias during decode.
fn write_record<W: Write>(writer: &mut W, node: &TreeNode, trace: &Trace) -> Result<()> {
    let record = node.record;
    wire::write_u16(writer, record.size)?;

    let raw = trace.pool.bytes(record.offset, record.size as usize);
    if record.kind == crate::model::RecordKind::Block {
        let stored = node.block_id(&trace.pool);
        if let Some(descriptor) = trace.descriptors.get(stored) {
            let static_id = descriptor.id();
            if static_id != stored {
                let mut patched = raw.to_vec();
                patched[16..20].copy_from_slice(&static_id.to_le_bytes());
                writer.write_all(&patched)?;
                return Ok(());
            }
        }
    }
    writer.write_all(raw)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RecordKind, RecordRef};
    use prof_format::build_block_record;

    fn arena(spans: &[(u64, u64)]) -> (Vec<TreeNode>, Vec<BlockIndex>, SerializedData) {
        let mut pool = SerializedData::new();
        let mut nodes = Vec::new();
        let mut indices = Vec::new();
        for &(begin, end) in spans {
            let payload = build_block_record(begin, end, 0, "");
            let size = payload.len() as u16;
            let offset = pool.push(&payload);
            indices.push(nodes.len() as BlockIndex);
            nodes.push(TreeNode::new(RecordRef {
                offset,
                size,
                kind: RecordKind::Block,
            }));
        }
        (nodes, indices, pool)
    }

    #[test]
    fn find_range_keeps_overlapping_run() {
        let (nodes, indices, pool) = arena(&[(0, 10), (20, 30), (40, 50)]);
        let selected = find_range(&nodes, &indices, &pool, (15, 45));
        assert_eq!(selected, &[1, 2]);
    }

    #[test]
    fn find_range_outside_everything_is_empty() {
        let (nodes, indices, pool) = arena(&[(0, 10), (20, 30)]);
        assert!(find_range(&nodes, &indices, &pool, (100, 200)).is_empty());
        assert!(find_range(&nodes, &indices, &pool, (12, 18)).is_empty());
    }

    #[test]
    fn find_range_without_clipping_keeps_all() {
        let (nodes, indices, pool) = arena(&[(0, 10), (20, 30), (40, 50)]);
        let selected = find_range(&nodes, &indices, &pool, (0, 50));
        assert_eq!(selected, &[0, 1, 2]);
    }

    #[test]
    fn subtree_accounting_is_recursive() {
        let (mut nodes, indices, pool) = arena(&[(1, 3), (0, 10), (0, 50)]);
        nodes[1].children.push(indices[0]);
        nodes[2].children.push(indices[1]);

        let acc = subtree_memory_and_count(&nodes, indices[2]);
        assert_eq!(acc.count, 3);
        let each = nodes[0].record.size as u64;
        assert_eq!(acc.memory, 3 * each);
    }
}
