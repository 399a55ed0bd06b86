//! Stream decoding: header, descriptor table, per-thread tree
//! reconstruction and statistics aggregation.
//!
//! Records arrive flat, in completion order, with no parent links. A
//! block ends up written after all of its descendants, so when a new
//! record begins before the previously appended top-level sibling ends,
//! that record encloses a trailing run of the current top-level list.
//! Moving that run under the new record recovers the nesting in one
//! forward pass; each node is moved at most once, which keeps the whole
//! reconstruction amortized O(n).

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use tracing::{debug, warn};

use prof_format::{
    conversion_factor, io as wire, read_header, read_signature_and_version, thread_id_size,
    ticks_to_ns, version_string, BlockKind, BlockView, FormatError, SerializedData,
    BLOCK_FIXED_SIZE, CSWITCH_FIXED_SIZE, DESCRIPTOR_FIXED_SIZE,
};

use crate::model::{
    BlockIndex, DescriptorRef, Descriptors, RecordKind, RecordRef, ThreadRoot, Trace, TreeNode,
};
use crate::progress::Progress;
use crate::stats::{update_statistics, update_statistics_recursive, NameStatsMap, StatsMap};
use crate::{Result, TraceError, MAX_BLOCK_DEPTH};

/// Decodes a complete trace from a byte stream.
///
/// `gather_statistics` controls the per-thread/per-parent/per-frame
/// accumulators; tree shape and rollup counters are produced either way.
pub fn decode_stream<R: Read>(
    mut reader: R,
    progress: &Progress,
    gather_statistics: bool,
) -> Result<Trace> {
    progress.checkpoint(0)?;

    let header = read_header(&mut reader)?;
    let factor = conversion_factor(header.cpu_frequency);
    let in_ticks = header.cpu_frequency != 0;

    let mut begin_time = header.begin_time;
    let mut end_time = header.end_time;
    if in_ticks {
        begin_time = ticks_to_ns(begin_time, factor);
        end_time = ticks_to_ns(end_time, factor);
    }

    debug!(
        version = %version_string(header.version),
        blocks = header.blocks_count,
        descriptors = header.descriptors_count,
        "decoding trace stream"
    );

    let mut descriptors = read_descriptor_table(
        &mut reader,
        progress,
        header.descriptors_count,
        header.descriptors_memory_size,
        15,
    )?;
    let static_descriptors_count = descriptors.len() as u32;

    let mut pool = SerializedData::with_capacity(header.memory_size);
    let mut roots: BTreeMap<u64, ThreadRoot> = BTreeMap::new();
    let mut name_to_id: HashMap<String, u32> = HashMap::new();

    let tid_size = thread_id_size(header.version);
    let mut consumed = 0u64;
    let mut blocks_count: u32 = 0;

    loop {
        let mut tid_buf = [0u8; 8];
        if !wire::read_or_eof(&mut reader, &mut tid_buf[..tid_size])? {
            break;
        }
        let thread_id = u64::from_le_bytes(tid_buf);
        let root = roots.entry(thread_id).or_default();
        root.thread_id = thread_id;

        let name_size = wire::read_u16(&mut reader)?;
        if name_size != 0 {
            let raw = wire::read_vec(&mut reader, name_size as usize)?;
            root.thread_name = string_from_raw(&raw);
        }

        // Context switches come first within a thread section.
        let mut cswitch_stats = NameStatsMap::new();
        let cswitch_count = wire::read_u32(&mut reader)?;
        for _ in 0..cswitch_count {
            let size = read_record_size(&mut reader, CSWITCH_FIXED_SIZE, "context switch")?;
            check_overrun(consumed, size, header.memory_size)?;
            let payload = wire::read_vec(&mut reader, size as usize)?;
            let offset = pool.push(&payload);
            consumed += size as u64;

            let (begin, end) = convert_timestamps(&mut pool, offset, in_ticks, factor);
            if end > begin_time {
                let begin = clamp_begin(&mut pool, offset, begin, begin_time);
                if end < begin {
                    return Err(TraceError::CorruptRecord {
                        reason: "context switch record ends before it begins".into(),
                    });
                }
                let index = root.push_node(TreeNode::new(RecordRef {
                    offset,
                    size,
                    kind: RecordKind::ContextSwitch,
                }));
                blocks_count += 1;
                root.wait_time += end - begin;
                root.sync.push(index);

                if gather_statistics {
                    let name = root.node(index).cswitch(&pool).name().to_owned();
                    let handle =
                        update_statistics(&mut cswitch_stats, name, &root.nodes, &pool, index, true);
                    root.nodes[index as usize].per_thread_stats = Some(handle);
                }
            }

            progress.checkpoint(20 + (70 * consumed / header.memory_size) as i32)?;
        }

        // Then the thread's blocks, still in completion order.
        let mut thread_stats = StatsMap::new();
        let mut parent_stats = StatsMap::new();
        let block_count = wire::read_u32(&mut reader)?;
        for _ in 0..block_count {
            let size = read_record_size(&mut reader, BLOCK_FIXED_SIZE, "block")?;
            check_overrun(consumed, size, header.memory_size)?;
            let payload = wire::read_vec(&mut reader, size as usize)?;
            let offset = pool.push(&payload);
            consumed += size as u64;

            let (begin, end) = convert_timestamps(&mut pool, offset, in_ticks, factor);
            if end >= begin_time {
                let begin = clamp_begin(&mut pool, offset, begin, begin_time);
                if end < begin {
                    return Err(TraceError::CorruptRecord {
                        reason: "block record ends before it begins".into(),
                    });
                }

                let static_id = pool.read_u32(offset + 16);
                let kind = match descriptors.get(static_id) {
                    Some(descriptor) => descriptor.kind(),
                    None => return Err(TraceError::UnknownDescriptorId { id: static_id }),
                };

                // Runtime-named blocks share a dynamic id so that every
                // occurrence of one name lands on one statistics key.
                if kind != BlockKind::Value {
                    let runtime_name =
                        BlockView::new(&pool, offset, size).name().to_owned();
                    if !runtime_name.is_empty() {
                        let dynamic_id = match name_to_id.get(runtime_name.as_str()).copied() {
                            Some(known) => known,
                            None => {
                                let new_id = descriptors.len() as u32;
                                let alias = descriptors.table[static_id as usize];
                                descriptors.table.push(alias);
                                name_to_id.insert(runtime_name, new_id);
                                new_id
                            }
                        };
                        pool.write_u32(offset + 16, dynamic_id);
                    }
                }

                let mut node = TreeNode::new(RecordRef {
                    offset,
                    size,
                    kind: RecordKind::Block,
                });

                if let Some(&last) = root.children.last() {
                    let last_end = root.nodes[last as usize].end(&pool);
                    if begin < last_end {
                        // This block was still open while the trailing
                        // run of top-level siblings completed; absorb
                        // the run as its children.
                        let mut first = root.children.len() - 1;
                        while first > 0 {
                            let candidate = root.children[first - 1];
                            if root.nodes[candidate as usize].begin(&pool) < begin {
                                break;
                            }
                            first -= 1;
                        }
                        let moved: Vec<BlockIndex> = root.children.drain(first..).collect();

                        let mut max_child_depth = 0u16;
                        if gather_statistics {
                            parent_stats.clear();
                            for &child in &moved {
                                let key = root.nodes[child as usize].block_id(&pool);
                                let handle = update_statistics(
                                    &mut parent_stats,
                                    key,
                                    &root.nodes,
                                    &pool,
                                    child,
                                    true,
                                );
                                root.nodes[child as usize].per_parent_stats = Some(handle);
                                max_child_depth =
                                    max_child_depth.max(root.nodes[child as usize].depth);
                            }
                        } else {
                            for &child in &moved {
                                max_child_depth =
                                    max_child_depth.max(root.nodes[child as usize].depth);
                            }
                        }

                        let depth = max_child_depth + 1;
                        if depth >= MAX_BLOCK_DEPTH {
                            let (name, file, line) = match descriptors.get(static_id) {
                                Some(d) => (d.name().to_owned(), d.file().to_owned(), d.line()),
                                None => (String::new(), String::new(), 0),
                            };
                            warn!(thread_id, name = %name, "stack depth limit hit");
                            return Err(TraceError::StackDepthExceeded { name, file, line });
                        }
                        node.depth = depth;
                        node.children = moved;
                    }
                }

                let index = root.push_node(node);
                blocks_count += 1;
                root.children.push(index);
                root.blocks_number += 1;
                if kind != BlockKind::Block {
                    root.events.push(index);
                }

                if gather_statistics {
                    let key = root.nodes[index as usize].block_id(&pool);
                    let handle =
                        update_statistics(&mut thread_stats, key, &root.nodes, &pool, index, true);
                    root.nodes[index as usize].per_thread_stats = Some(handle);
                }
            }

            progress.checkpoint(20 + (70 * consumed / header.memory_size) as i32)?;
        }
    }

    progress.checkpoint(90)?;
    aggregate_root_statistics(&mut roots, &pool, &descriptors, gather_statistics, progress);

    progress.store(100);
    debug!(threads = roots.len(), blocks = blocks_count, "trace decoded");

    Ok(Trace {
        pool,
        descriptors,
        static_descriptors_count,
        roots,
        version: header.version,
        pid: header.pid,
        begin_time,
        end_time,
        blocks_count,
    })
}

/// Decodes only the descriptor table from a descriptors-only stream
/// (signature, version, count, section size, then the records).
pub fn read_descriptors_stream<R: Read>(
    mut reader: R,
    progress: &Progress,
) -> Result<Descriptors> {
    progress.checkpoint(0)?;

    read_signature_and_version(&mut reader)?;
    let count = wire::read_u32(&mut reader)?;
    if count == 0 {
        return Err(FormatError::CorruptHeader {
            field: "descriptors count",
        }
        .into());
    }
    let memory_size = wire::read_u64(&mut reader)?;
    if memory_size == 0 {
        return Err(FormatError::CorruptHeader {
            field: "descriptors memory size",
        }
        .into());
    }

    let descriptors = read_descriptor_table(&mut reader, progress, count, memory_size, 100)?;
    if descriptors.is_empty() {
        return Err(TraceError::CorruptRecord {
            reason: "descriptor section decoded to nothing".into(),
        });
    }
    Ok(descriptors)
}

pub fn decode_file<P: AsRef<Path>>(
    path: P,
    progress: &Progress,
    gather_statistics: bool,
) -> Result<Trace> {
    let file = File::open(path)?;
    decode_stream(BufReader::new(file), progress, gather_statistics)
}

pub fn read_descriptors_file<P: AsRef<Path>>(
    path: P,
    progress: &Progress,
) -> Result<Descriptors> {
    let file = File::open(path)?;
    read_descriptors_stream(BufReader::new(file), progress)
}

/// Reads up to `count` size-prefixed descriptor records.
///
/// The descriptor section is tolerant by policy: a stream that ends
/// before `count` records is not an error, whatever was decoded is kept.
/// This is the one place truncation is forgiven; the block sections have
/// their byte budget declared in the header, so under-run there is
/// treated as corruption instead.
fn read_descriptor_table<R: Read>(
    reader: &mut R,
    progress: &Progress,
    count: u32,
    memory_size: u64,
    progress_span: u64,
) -> Result<Descriptors> {
    let mut descriptors = Descriptors {
        pool: SerializedData::with_capacity(memory_size),
        table: Vec::with_capacity(count as usize),
    };

    let mut consumed = 0u64;
    while descriptors.len() < count as usize {
        let mut size_buf = [0u8; 2];
        if !wire::read_or_eof(reader, &mut size_buf)? {
            warn!(
                decoded = descriptors.len(),
                expected = count,
                "descriptor section ended early, keeping what was decoded"
            );
            break;
        }
        let size = u16::from_le_bytes(size_buf);
        if size == 0 {
            descriptors.table.push(None);
            continue;
        }
        if (size as usize) < DESCRIPTOR_FIXED_SIZE {
            return Err(TraceError::CorruptRecord {
                reason: format!(
                    "descriptor record of {size} bytes is shorter than its fixed fields"
                ),
            });
        }

        let mut payload = vec![0u8; size as usize];
        match wire::read_or_eof(reader, &mut payload) {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    decoded = descriptors.len(),
                    expected = count,
                    "descriptor section ended early, keeping what was decoded"
                );
                break;
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!(
                    decoded = descriptors.len(),
                    expected = count,
                    "descriptor record truncated, keeping what was decoded"
                );
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let offset = descriptors.pool.push(&payload);
        descriptors.table.push(Some(DescriptorRef { offset, size }));
        consumed += size as u64;

        let done = (progress_span * consumed / memory_size).min(progress_span);
        progress.checkpoint(done as i32)?;
    }

    Ok(descriptors)
}

fn read_record_size<R: Read>(reader: &mut R, fixed: usize, what: &str) -> Result<u16> {
    let size = wire::read_u16(reader)?;
    if size == 0 {
        return Err(TraceError::CorruptRecord {
            reason: format!("{what} record size == 0"),
        });
    }
    if (size as usize) < fixed {
        return Err(TraceError::CorruptRecord {
            reason: format!("{what} record of {size} bytes is shorter than its fixed fields"),
        });
    }
    Ok(size)
}

fn check_overrun(consumed: u64, size: u16, memory_size: u64) -> Result<()> {
    if consumed + size as u64 > memory_size {
        return Err(TraceError::CorruptRecord {
            reason: "record data overruns the memory size declared in the header".into(),
        });
    }
    Ok(())
}

/// Converts the record's begin/end prefix to nanoseconds in place.
fn convert_timestamps(
    pool: &mut SerializedData,
    offset: u64,
    in_ticks: bool,
    factor: f64,
) -> (u64, u64) {
    let mut begin = pool.read_u64(offset);
    let mut end = pool.read_u64(offset + 8);
    if in_ticks {
        begin = ticks_to_ns(begin, factor);
        end = ticks_to_ns(end, factor);
        pool.write_u64(offset, begin);
        pool.write_u64(offset + 8, end);
    }
    (begin, end)
}

/// Records that started before monitoring officially began are clamped
/// to the trace's begin time.
fn clamp_begin(pool: &mut SerializedData, offset: u64, begin: u64, begin_time: u64) -> u64 {
    if begin < begin_time {
        pool.write_u64(offset, begin_time);
        begin_time
    } else {
        begin
    }
}

fn string_from_raw(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Final rollup pass over every thread root: frame counts, depths,
/// profiled time and, when requested, the per-parent/per-frame
/// statistics for top-level frames.
///
/// With statistics enabled this fans out one worker per thread. Each
/// worker takes exclusive ownership of its `ThreadRoot` and fresh local
/// maps, so no locking is needed beyond the shared handles themselves;
/// the orchestrator joins every worker and advances progress after each
/// join.
fn aggregate_root_statistics(
    roots: &mut BTreeMap<u64, ThreadRoot>,
    pool: &SerializedData,
    descriptors: &Descriptors,
    gather_statistics: bool,
    progress: &Progress,
) {
    let total = roots.len() as i32;
    if total == 0 {
        return;
    }

    if gather_statistics {
        std::thread::scope(|scope| {
            let mut workers = Vec::with_capacity(roots.len());
            for root in roots.values_mut() {
                workers.push(scope.spawn(move || root_statistics_pass(root, pool, descriptors)));
            }
            for (joined, worker) in workers.into_iter().enumerate() {
                worker.join().expect("statistics worker panicked");
                progress.store(90 + 10 * (joined as i32 + 1) / total);
            }
        });
    } else {
        for (joined, root) in roots.values_mut().enumerate() {
            for position in 0..root.children.len() {
                let frame = root.children[position];
                if frame_kind(root, frame, pool, descriptors) == BlockKind::Block {
                    root.frames_number += 1;
                }
                let frame_node = &root.nodes[frame as usize];
                root.depth = root.depth.max(frame_node.depth);
                root.profiled_time += frame_node.duration(pool);
            }
            root.depth += 1;
            progress.store(90 + 10 * (joined as i32 + 1) / total);
        }
    }
}

fn frame_kind(
    root: &ThreadRoot,
    frame: BlockIndex,
    pool: &SerializedData,
    descriptors: &Descriptors,
) -> BlockKind {
    let id = root.node(frame).block_id(pool);
    descriptors
        .get(id)
        .map(|d| d.kind())
        .unwrap_or(BlockKind::Block)
}

fn root_statistics_pass(root: &mut ThreadRoot, pool: &SerializedData, descriptors: &Descriptors) {
    let mut parent_stats = StatsMap::new();
    let mut frame_stats = StatsMap::new();
    let mut cs_position = 0usize;

    for position in 0..root.children.len() {
        let frame = root.children[position];
        if frame_kind(root, frame, pool, descriptors) == BlockKind::Block {
            root.frames_number += 1;
        }

        let key = root.node(frame).block_id(pool);
        let handle = update_statistics(&mut parent_stats, key, &root.nodes, pool, frame, true);
        root.nodes[frame as usize].per_parent_stats = Some(handle);

        frame_stats.clear();
        update_statistics_recursive(&mut frame_stats, &mut root.nodes, pool, frame);

        // Context switches overlapping this frame's span get per-frame
        // wait statistics keyed by the wait target's name.
        if cs_position < root.sync.len() {
            let frame_begin = root.node(frame).begin(pool);
            let frame_end = root.node(frame).end(pool);
            let mut frame_cswitch_stats = NameStatsMap::new();
            while cs_position < root.sync.len() {
                let cs = root.sync[cs_position];
                if root.node(cs).end(pool) < frame_begin {
                    cs_position += 1;
                    continue;
                }
                if root.node(cs).begin(pool) > frame_end {
                    break;
                }
                let name = root.node(cs).cswitch(pool).name().to_owned();
                let handle = update_statistics(
                    &mut frame_cswitch_stats,
                    name,
                    &root.nodes,
                    pool,
                    cs,
                    true,
                );
                root.nodes[cs as usize].per_frame_stats = Some(handle);
                cs_position += 1;
            }
        }

        let frame_node = &root.nodes[frame as usize];
        root.depth = root.depth.max(frame_node.depth);
        root.profiled_time += frame_node.duration(pool);
    }

    root.depth += 1;
}
