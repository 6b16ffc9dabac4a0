//! Global recency ordering
//!
//! Arena-backed doubly-linked list of cached payload handles, most recently
//! used at the head. Nodes do not own payloads: each one names the favicon
//! URL and payload size, which is enough to find the owning bucket entry.
//! Buckets keep the [`SlotId`] of their nodes, so unlinking from either side
//! is O(1).

use std::sync::Arc;

/// Sentinel value for null links
const SENTINEL: usize = usize::MAX;

/// Handle to a node in the ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

/// What the ordering knows about one cached payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OrderingEntry {
    pub url: Arc<str>,
    pub size: u32,
    pub bytes: usize,
}

#[derive(Debug)]
struct Node {
    entry: Option<OrderingEntry>,
    prev: usize,
    next: usize,
}

#[derive(Debug)]
pub(crate) struct LruOrdering {
    nodes: Vec<Node>,
    head: usize,
    tail: usize,
    free_head: usize,
    len: usize,
}

impl Default for LruOrdering {
    fn default() -> Self {
        Self::new()
    }
}

impl LruOrdering {
    pub fn new() -> Self {
        Self { nodes: Vec::new(), head: SENTINEL, tail: SENTINEL, free_head: SENTINEL, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert as most recently used
    pub fn push_front(&mut self, entry: OrderingEntry) -> SlotId {
        let idx = self.alloc_slot(entry);
        self.link_head(idx);
        self.len += 1;
        SlotId(idx)
    }

    /// Mark as most recently used
    pub fn move_to_front(&mut self, slot: SlotId) {
        let idx = slot.0;
        if !self.is_live(idx) || self.head == idx {
            return;
        }
        self.unlink(idx);
        self.link_head(idx);
    }

    pub fn remove(&mut self, slot: SlotId) -> Option<OrderingEntry> {
        if !self.is_live(slot.0) {
            return None;
        }
        self.unlink(slot.0);
        self.free_slot(slot.0)
    }

    /// Remove the least recently used entry
    pub fn pop_back(&mut self) -> Option<OrderingEntry> {
        if self.tail == SENTINEL {
            return None;
        }
        self.remove(SlotId(self.tail))
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.head = SENTINEL;
        self.tail = SENTINEL;
        self.free_head = SENTINEL;
        self.len = 0;
    }

    /// Entries from most to least recently used
    pub fn iter(&self) -> impl Iterator<Item = &OrderingEntry> + '_ {
        let mut current = self.head;
        std::iter::from_fn(move || {
            let node = self.nodes.get(current)?;
            current = node.next;
            node.entry.as_ref()
        })
    }

    fn is_live(&self, idx: usize) -> bool {
        self.nodes.get(idx).is_some_and(|node| node.entry.is_some())
    }

    fn alloc_slot(&mut self, entry: OrderingEntry) -> usize {
        let node = Node { entry: Some(entry), prev: SENTINEL, next: SENTINEL };
        if self.free_head != SENTINEL {
            let idx = self.free_head;
            self.free_head = self.nodes[idx].next;
            self.nodes[idx] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    fn free_slot(&mut self, idx: usize) -> Option<OrderingEntry> {
        let entry = self.nodes[idx].entry.take();
        self.nodes[idx].next = self.free_head;
        self.free_head = idx;
        self.len -= 1;
        entry
    }

    fn unlink(&mut self, idx: usize) {
        let prev = self.nodes[idx].prev;
        let next = self.nodes[idx].next;

        if prev != SENTINEL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }

        if next != SENTINEL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }

        self.nodes[idx].prev = SENTINEL;
        self.nodes[idx].next = SENTINEL;
    }

    fn link_head(&mut self, idx: usize) {
        self.nodes[idx].prev = SENTINEL;
        self.nodes[idx].next = self.head;

        if self.head != SENTINEL {
            self.nodes[self.head].prev = idx;
        }
        self.head = idx;

        if self.tail == SENTINEL {
            self.tail = idx;
        }
    }
}
