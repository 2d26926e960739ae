//! Parallel connection update fan-out.
//!
//! When a router hosts more than two nodes, per-node connection updates
//! are dispatched to short-lived worker threads over pre-sliced disjoint
//! chunks of the node set. The scope join gates the next maintenance step
//! so link work never interleaves with it; workers communicate results
//! only through a shared atomic work-done flag.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::node::RoutedNode;

/// Runs `update_connection` on every node, fanning out to `worker_count`
/// threads. Returns true when any connection made progress.
pub fn update_connections_parallel(
    nodes: &mut [&mut RoutedNode],
    worker_count: usize,
) -> bool {
    if nodes.is_empty() {
        return false;
    }
    let something_done = AtomicBool::new(false);
    let worker_count = worker_count.max(1);
    let chunk_size = (nodes.len() + worker_count - 1) / worker_count;

    std::thread::scope(|scope| {
        for chunk in nodes.chunks_mut(chunk_size) {
            let something_done = &something_done;
            scope.spawn(move || {
                for node in chunk.iter_mut() {
                    if node.update_connection() {
                        something_done.store(true, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    something_done.load(Ordering::Relaxed)
}
