//! Bounded-concurrency allocation of nodes for functional runs.
//!
//! [`WorkerPool`] hands out the least busy node that still has capacity. All bookkeeping is
//! guarded by a single mutex; callers waiting for capacity are suspended on a [`Notify`] and
//! woken by every [`release`](WorkerPool::release).

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::provider::Node;

/// How many concurrent requests a single node may execute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NodeCapacity {
    /// Nodes are never exhausted.
    #[default]
    Unbounded,
    /// Nodes run at most this many requests at a time.
    Limited(NonZeroUsize),
}

impl NodeCapacity {
    /// Maps an optional per-node limit to a capacity, treating `None` as unbounded.
    pub fn from_limit(limit: Option<NonZeroUsize>) -> Self {
        limit.map_or(NodeCapacity::Unbounded, NodeCapacity::Limited)
    }

    fn is_exhausted(self, in_flight: usize) -> bool {
        match self {
            NodeCapacity::Unbounded => false,
            NodeCapacity::Limited(max) => in_flight >= max.get(),
        }
    }
}

#[derive(Debug)]
struct PoolState {
    nodes: Vec<Node>,
    in_flight: Vec<usize>,
    /// Indices into `nodes` that may accept another request, in no particular order.
    free: Vec<usize>,
}

impl PoolState {
    fn index_of(&self, node: &Node) -> Option<usize> {
        self.nodes.iter().position(|n| n.name() == node.name())
    }
}

/// Shares a fixed set of nodes between many concurrent callers.
///
/// Cloning the pool yields another handle to the same state.
#[derive(Clone)]
pub struct WorkerPool {
    state: Arc<Mutex<PoolState>>,
    capacity: NodeCapacity,
    released: Arc<Notify>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Creates a pool over the given nodes, all of them initially idle.
    pub fn new(nodes: Vec<Node>, capacity: NodeCapacity) -> Self {
        let count = nodes.len();
        Self {
            state: Arc::new(Mutex::new(PoolState {
                nodes,
                in_flight: vec![0; count],
                free: (0..count).collect(),
            })),
            capacity,
            released: Arc::new(Notify::new()),
        }
    }

    /// Returns the per-node capacity of this pool.
    pub fn capacity(&self) -> NodeCapacity {
        self.capacity
    }

    /// Obtains a node, waiting until one has capacity.
    ///
    /// The least busy free node is chosen, ties going to the node that comes first in the
    /// pool. The node must be handed back with [`release`](Self::release).
    pub async fn acquire(&self) -> Node {
        loop {
            // Created before checking, so a release in between is not missed.
            let notified = self.released.notified();
            if let Some(node) = self.try_acquire() {
                return node;
            }
            notified.await;
        }
    }

    /// Obtains a node if one has capacity right now.
    pub fn try_acquire(&self) -> Option<Node> {
        let mut state = self.state.lock().unwrap();

        let (position, &index) = state
            .free
            .iter()
            .enumerate()
            .min_by_key(|&(_, &index)| (state.in_flight[index], index))?;

        state.in_flight[index] += 1;
        if self.capacity.is_exhausted(state.in_flight[index]) {
            state.free.remove(position);
        }

        let node = state.nodes[index].clone();
        tracing::trace!(node = node.name(), in_flight = state.in_flight[index], "acquired node");
        Some(node)
    }

    /// Obtains a node wrapped in a guard that releases it when dropped.
    pub async fn lease(&self) -> NodeLease {
        let node = self.acquire().await;
        NodeLease {
            pool: self.clone(),
            node: Some(node),
        }
    }

    /// Returns a node obtained from [`acquire`](Self::acquire) to the pool.
    ///
    /// Releasing a node that is not part of the pool or has nothing in flight is logged and
    /// otherwise ignored.
    pub fn release(&self, node: &Node) {
        {
            let mut state = self.state.lock().unwrap();
            let Some(index) = state.index_of(node) else {
                tracing::warn!(node = node.name(), "released node that is not in the pool");
                return;
            };
            if state.in_flight[index] == 0 {
                tracing::warn!(node = node.name(), "released node without requests in flight");
                return;
            }

            if self.capacity.is_exhausted(state.in_flight[index]) {
                state.free.push(index);
            }
            state.in_flight[index] -= 1;
            tracing::trace!(node = node.name(), in_flight = state.in_flight[index], "released node");
        }

        self.released.notify_waiters();
    }

    /// Returns the number of requests currently running on the given node.
    pub fn in_flight(&self, node: &Node) -> usize {
        let state = self.state.lock().unwrap();
        state.index_of(node).map_or(0, |index| state.in_flight[index])
    }

    /// Returns `true` if no node can accept another request.
    pub fn all_busy(&self) -> bool {
        self.state.lock().unwrap().free.is_empty()
    }
}

/// RAII guard for a node obtained from a [`WorkerPool`].
///
/// Dropping the lease releases the node and wakes tasks waiting in
/// [`WorkerPool::acquire`].
#[derive(Debug)]
pub struct NodeLease {
    pool: WorkerPool,
    node: Option<Node>,
}

impl NodeLease {
    /// Returns the leased node.
    pub fn node(&self) -> &Node {
        // Only taken in `drop`.
        self.node.as_ref().expect("lease already released")
    }
}

impl Drop for NodeLease {
    fn drop(&mut self) {
        if let Some(node) = self.node.take() {
            self.pool.release(&node);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn nodes(count: usize) -> Vec<Node> {
        (1..=count)
            .map(|i| Node::new(i.to_string(), None, i as u64))
            .collect()
    }

    fn limited(max: usize) -> NodeCapacity {
        NodeCapacity::Limited(NonZeroUsize::new(max).unwrap())
    }

    #[tokio::test]
    async fn fifth_acquire_blocks_until_release() {
        let pool = WorkerPool::new(nodes(2), limited(2));

        let mut acquired = Vec::new();
        for _ in 0..4 {
            acquired.push(pool.acquire().await);
        }
        for node in &acquired {
            assert!(pool.in_flight(node) <= 2);
        }
        assert!(pool.all_busy());

        let mut fifth = Box::pin(pool.acquire());
        assert!(futures::poll!(&mut fifth).is_pending());
        assert!(futures::poll!(&mut fifth).is_pending());

        pool.release(&acquired[3]);
        let node = match futures::poll!(&mut fifth) {
            std::task::Poll::Ready(node) => node,
            std::task::Poll::Pending => panic!("acquire still blocked after release"),
        };
        assert_eq!(node, acquired[3]);
        assert_eq!(pool.in_flight(&node), 2);
    }

    #[test]
    fn picks_least_busy_node() {
        let pool = WorkerPool::new(nodes(3), limited(5));

        let first = pool.try_acquire().unwrap();
        let second = pool.try_acquire().unwrap();
        let third = pool.try_acquire().unwrap();
        assert_eq!(
            [first.name(), second.name(), third.name()],
            ["1", "2", "3"]
        );

        pool.release(&second);
        assert_eq!(pool.try_acquire().unwrap().name(), "2");
        assert_eq!(pool.try_acquire().unwrap().name(), "1");
    }

    #[test]
    fn ties_follow_pool_order_after_release() {
        let pool = WorkerPool::new(nodes(2), limited(1));
        let first = pool.try_acquire().unwrap();
        let second = pool.try_acquire().unwrap();
        assert!(pool.all_busy());

        pool.release(&second);
        pool.release(&first);
        assert_eq!(pool.try_acquire().unwrap().name(), "1");
        assert_eq!(pool.try_acquire().unwrap().name(), "2");
    }

    #[test]
    fn unbounded_nodes_are_always_free() {
        let pool = WorkerPool::new(nodes(1), NodeCapacity::Unbounded);
        for expected in 1..=100 {
            let node = pool.try_acquire().unwrap();
            assert_eq!(pool.in_flight(&node), expected);
        }
        assert!(!pool.all_busy());
    }

    #[test]
    fn exhausted_node_returns_to_free_set() {
        let pool = WorkerPool::new(nodes(1), limited(1));
        let node = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());

        pool.release(&node);
        assert_eq!(pool.in_flight(&node), 0);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn spurious_release_is_ignored() {
        let pool = WorkerPool::new(nodes(1), limited(1));
        let stranger = Node::new("stranger", None, 0);
        pool.release(&stranger);
        pool.release(&nodes(1)[0]);
        assert_eq!(pool.in_flight(&nodes(1)[0]), 0);
        assert!(pool.try_acquire().is_some());
        assert!(pool.try_acquire().is_none());
    }

    #[tokio::test]
    async fn lease_releases_on_drop() {
        let pool = WorkerPool::new(nodes(1), limited(1));
        let lease = pool.lease().await;
        assert_eq!(pool.in_flight(lease.node()), 1);
        drop(lease);
        assert!(!pool.all_busy());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_capacity_under_contention() {
        let pool = WorkerPool::new(nodes(2), limited(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let pool = pool.clone();
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let lease = pool.lease().await;
                    assert!(pool.in_flight(lease.node()) <= 2);
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert!(!pool.all_busy());
    }
}
