//! Keyed statistics accumulators.
//!
//! Three grouping dimensions (per-thread, per-parent, per-frame) share
//! one update rule. A map owns the canonical [`StatsHandle`] per key and
//! every occurrence of that key keeps a clone, so all nodes observe
//! later updates through the shared instance. Max/min comparisons go
//! through the referenced record's current duration rather than a cached
//! scalar, so they cannot drift from the arena.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use prof_format::SerializedData;

use crate::model::{BlockIndex, BlockStatistics, StatsHandle, TreeNode};

/// Statistics keyed by descriptor id.
pub type StatsMap = HashMap<u32, StatsHandle>;
/// Statistics keyed by runtime name (context switch targets).
pub type NameStatsMap = HashMap<String, StatsHandle>;

/// Applies one occurrence to the accumulator for `key` and returns the
/// handle the node should keep.
///
/// `calculate_children` additionally rolls the direct children's
/// durations into `total_children_duration`; the recursive frame walk
/// passes `false` and does that rollup itself, child by child.
pub fn update_statistics<K: Eq + Hash>(
    map: &mut HashMap<K, StatsHandle>,
    key: K,
    nodes: &[TreeNode],
    pool: &SerializedData,
    current: BlockIndex,
    calculate_children: bool,
) -> StatsHandle {
    let node = &nodes[current as usize];
    let duration = node.duration(pool);
    let children_duration: u64 = if calculate_children {
        node.children
            .iter()
            .map(|&child| nodes[child as usize].duration(pool))
            .sum()
    } else {
        0
    };

    if let Some(handle) = map.get(&key) {
        {
            let mut stats = handle.lock().expect("statistics lock poisoned");
            stats.calls_number += 1;
            stats.total_duration += duration;
            stats.total_children_duration += children_duration;
            if duration > nodes[stats.max_duration_block as usize].duration(pool) {
                stats.max_duration_block = current;
            }
            if duration < nodes[stats.min_duration_block as usize].duration(pool) {
                stats.min_duration_block = current;
            }
        }
        return handle.clone();
    }

    let mut stats = BlockStatistics::new(duration, current);
    stats.total_children_duration = children_duration;
    let handle: StatsHandle = Arc::new(Mutex::new(stats));
    map.insert(key, handle.clone());
    handle
}

/// Walks a frame's whole subtree, accumulating per-frame statistics for
/// every descendant. Child durations are rolled up incrementally as
/// each child is visited instead of re-scanning child lists.
pub fn update_statistics_recursive(
    map: &mut StatsMap,
    nodes: &mut [TreeNode],
    pool: &SerializedData,
    current: BlockIndex,
) {
    let key = nodes[current as usize].block_id(pool);
    let handle = update_statistics(map, key, nodes, pool, current, false);
    nodes[current as usize].per_frame_stats = Some(handle.clone());

    for position in 0..nodes[current as usize].children.len() {
        let child = nodes[current as usize].children[position];
        let child_duration = nodes[child as usize].duration(pool);
        handle
            .lock()
            .expect("statistics lock poisoned")
            .total_children_duration += child_duration;
        update_statistics_recursive(map, nodes, pool, child);
    }
}
