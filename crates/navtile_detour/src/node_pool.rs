//! Search state shared by the graph queries.

use std::{cmp::Ordering, collections::BinaryHeap, collections::HashMap};

use bitflags::bitflags;
use glam::Vec3;

use crate::PolyRef;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct NodeFlags: u8 {
        const OPEN = 1 << 0;
        const CLOSED = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Node {
    pub(crate) pos: Vec3,
    pub(crate) cost: f32,
    pub(crate) total: f32,
    pub(crate) parent: Option<usize>,
    pub(crate) flags: NodeFlags,
    pub(crate) poly: PolyRef,
}

/// One node per visited polygon, capped at a maximum.
#[derive(Debug, Clone)]
pub(crate) struct NodePool {
    nodes: Vec<Node>,
    lookup: HashMap<PolyRef, usize>,
    max_nodes: usize,
}

impl NodePool {
    pub(crate) fn new(max_nodes: usize) -> Self {
        Self {
            nodes: Vec::new(),
            lookup: HashMap::new(),
            max_nodes,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.lookup.clear();
    }

    /// The node of a polygon, allocated on first use. `None` once the pool is exhausted.
    pub(crate) fn get_or_insert(&mut self, poly: PolyRef) -> Option<usize> {
        if let Some(&index) = self.lookup.get(&poly) {
            return Some(index);
        }
        if self.nodes.len() >= self.max_nodes {
            return None;
        }
        let index = self.nodes.len();
        self.nodes.push(Node {
            pos: Vec3::ZERO,
            cost: 0.0,
            total: 0.0,
            parent: None,
            flags: NodeFlags::empty(),
            poly,
        });
        self.lookup.insert(poly, index);
        Some(index)
    }

    #[inline]
    pub(crate) fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    #[inline]
    pub(crate) fn node_mut(&mut self, index: usize) -> &mut Node {
        &mut self.nodes[index]
    }

    /// The polygons from the start node to `index`.
    pub(crate) fn path_to(&self, index: usize) -> Vec<PolyRef> {
        let mut path = Vec::new();
        let mut current = Some(index);
        while let Some(i) = current {
            path.push(self.nodes[i].poly);
            current = self.nodes[i].parent;
        }
        path.reverse();
        path
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenEntry {
    total: f32,
    node: usize,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed, the heap pops the cheapest node first.
        other
            .total
            .total_cmp(&self.total)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Priority queue of open nodes. Entries whose node has been improved or closed since are skipped on pop.
#[derive(Debug, Clone, Default)]
pub(crate) struct OpenList {
    heap: BinaryHeap<OpenEntry>,
}

impl OpenList {
    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }

    pub(crate) fn push(&mut self, pool: &NodePool, node: usize) {
        self.heap.push(OpenEntry {
            total: pool.node(node).total,
            node,
        });
    }

    /// Pops the cheapest open node and marks it closed.
    pub(crate) fn pop(&mut self, pool: &mut NodePool) -> Option<usize> {
        while let Some(entry) = self.heap.pop() {
            let node = pool.node_mut(entry.node);
            if !node.flags.contains(NodeFlags::OPEN) || entry.total != node.total {
                continue;
            }
            node.flags.remove(NodeFlags::OPEN);
            node.flags.insert(NodeFlags::CLOSED);
            return Some(entry.node);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_is_capped() {
        let mut pool = NodePool::new(2);
        let a = pool.get_or_insert(PolyRef(1)).unwrap();
        assert_eq!(pool.get_or_insert(PolyRef(1)), Some(a));
        assert!(pool.get_or_insert(PolyRef(2)).is_some());
        assert_eq!(pool.get_or_insert(PolyRef(3)), None);
        pool.clear();
        assert!(pool.get_or_insert(PolyRef(3)).is_some());
    }

    #[test]
    fn open_list_pops_cheapest_and_skips_stale_entries() {
        let mut pool = NodePool::new(8);
        let mut open = OpenList::default();
        for (poly, total) in [(1, 5.0), (2, 3.0), (3, 4.0)] {
            let node = pool.get_or_insert(PolyRef(poly)).unwrap();
            pool.node_mut(node).total = total;
            pool.node_mut(node).flags = NodeFlags::OPEN;
            open.push(&pool, node);
        }
        // Improve node 1 after it was pushed.
        pool.node_mut(0).total = 1.0;
        open.push(&pool, 0);

        let mut popped = Vec::new();
        while let Some(node) = open.pop(&mut pool) {
            popped.push(node);
        }
        let order: Vec<_> = popped.iter().map(|&node| pool.node(node).poly).collect();
        assert_eq!(order, vec![PolyRef(1), PolyRef(2), PolyRef(3)]);
        assert!(pool.node(0).flags.contains(NodeFlags::CLOSED));
    }

    #[test]
    fn path_walks_parents() {
        let mut pool = NodePool::new(8);
        let a = pool.get_or_insert(PolyRef(10)).unwrap();
        let b = pool.get_or_insert(PolyRef(11)).unwrap();
        let c = pool.get_or_insert(PolyRef(12)).unwrap();
        pool.node_mut(b).parent = Some(a);
        pool.node_mut(c).parent = Some(b);
        assert_eq!(pool.path_to(c), vec![PolyRef(10), PolyRef(11), PolyRef(12)]);
    }
}
