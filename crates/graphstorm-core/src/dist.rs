//! Distributed context handle.
//!
//! Every driver in this workspace runs once per worker against its own shard
//! of nodes. The worker's identity (rank, world size) and the collective used
//! to line workers up are carried by an explicit [`ProcessGroup`] handle that
//! callers create, pass in, and drop when done.

use std::ops::Range;
use std::sync::{Arc, Barrier};

/// Handle to a group of cooperating workers.
///
/// `ProcessGroup::single()` is the one-worker group. `ProcessGroup::local(n)`
/// creates `n` handles sharing one barrier, one per worker thread.
#[derive(Debug, Clone)]
pub struct ProcessGroup {
    rank: usize,
    world_size: usize,
    barrier: Arc<Barrier>,
}

impl ProcessGroup {
    /// A group with one worker.
    pub fn single() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            barrier: Arc::new(Barrier::new(1)),
        }
    }

    /// One handle per worker of an in-process group of `world_size` workers.
    ///
    /// # Panics
    ///
    /// If `world_size` is zero.
    pub fn local(world_size: usize) -> Vec<Self> {
        assert!(world_size > 0, "world size must be positive");
        let barrier = Arc::new(Barrier::new(world_size));
        (0..world_size)
            .map(|rank| Self {
                rank,
                world_size,
                barrier: Arc::clone(&barrier),
            })
            .collect()
    }

    /// This worker's rank.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of workers in the group.
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Block until every worker of the group reaches the barrier.
    pub fn barrier(&self) {
        self.barrier.wait();
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        tracing::debug!(
            rank = self.rank,
            world_size = self.world_size,
            "releasing process group handle"
        );
    }
}

/// The contiguous range of node ids this worker owns.
///
/// Ranges of all ranks are disjoint and cover `0..num_nodes`; earlier ranks
/// take one extra node when the split is uneven.
pub fn node_split(num_nodes: usize, pg: &ProcessGroup) -> Range<usize> {
    let base = num_nodes / pg.world_size;
    let extra = num_nodes % pg.world_size;
    let start = pg.rank * base + pg.rank.min(extra);
    let len = base + usize::from(pg.rank < extra);
    start..start + len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_owns_everything() {
        assert_eq!(node_split(7, &ProcessGroup::single()), 0..7);
    }

    #[test]
    fn test_local_split_is_disjoint_cover() {
        let groups = ProcessGroup::local(3);
        let ranges: Vec<_> = groups.iter().map(|pg| node_split(10, pg)).collect();
        assert_eq!(ranges, vec![0..4, 4..7, 7..10]);
    }

    #[test]
    fn test_split_fewer_nodes_than_workers() {
        let groups = ProcessGroup::local(4);
        let lens: Vec<_> = groups.iter().map(|pg| node_split(2, pg).len()).collect();
        assert_eq!(lens, vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_barrier_across_threads() {
        let groups = ProcessGroup::local(2);
        std::thread::scope(|s| {
            for pg in &groups {
                s.spawn(move || pg.barrier());
            }
        });
    }
}
