//! Probabilistic skip list — the ordered map behind the memtable.
//!
//! ## Design Invariants
//!
//! - Entries are kept in ascending byte-lexicographic key order at level 0;
//!   each higher level is a sparser express lane over the same order.
//! - Each key appears at most once; `set` on an existing key overwrites the
//!   stored entry in place.
//! - Node heights are drawn geometrically: flip a `p`-biased coin until it
//!   fails or the maximum height is reached.
//!
//! ## Representation
//!
//! Nodes live in a flat arena (`Vec<Node>`) and link to each other by index,
//! with index 0 reserved for the head sentinel. This keeps the structure
//! free of `unsafe` and of ownership cycles; node lifetime is simply the
//! arena's lifetime, and the enclosing memtable discards the whole arena on
//! flush.
//!
//! ## Size accounting
//!
//! `set` returns the signed byte-size delta its mutation applied: the full
//! entry cost on insert (key + value + tombstone flag + version + one
//! pointer-sized slot per level of the node's forward array), or the value
//! length difference on overwrite. The memtable feeds these deltas into its
//! residency counter so it can bound memory without heap introspection.

#[cfg(test)]
mod tests;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::entry::Entry;

/// Default maximum tower height.
pub const DEFAULT_MAX_HEIGHT: usize = 18;

/// Default level-up probability.
pub const DEFAULT_P: f64 = 0.5;

/// Sentinel index marking the end of a forward list.
const NIL: usize = usize::MAX;

/// Per-level pointer cost charged by the size accounting.
const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// One skip-list node: an entry plus its forward tower.
struct Node {
    entry: Entry,
    forward: Vec<usize>,
}

/// An ordered map from byte keys to [`Entry`] records.
pub struct SkipList {
    /// Node arena; index 0 is the head sentinel.
    arena: Vec<Node>,

    /// Upper bound on tower height.
    max_height: usize,

    /// Probability of promoting a node one level.
    p: f64,

    /// Highest level currently occupied by any node.
    height: usize,

    /// Number of live entries.
    len: usize,

    rng: StdRng,
}

impl SkipList {
    /// Creates an empty skip list with the default height and probability.
    pub fn new() -> Self {
        Self::with_params(DEFAULT_MAX_HEIGHT, DEFAULT_P)
    }

    /// Creates an empty skip list with explicit parameters.
    pub fn with_params(max_height: usize, p: f64) -> Self {
        let head = Node {
            entry: Entry::put(Vec::new(), Vec::new(), 0),
            forward: vec![NIL; max_height],
        };

        Self {
            arena: vec![head],
            max_height,
            p,
            height: 1,
            len: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Number of entries stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `entry`, overwriting any existing entry with the same key.
    ///
    /// Returns the approximate byte-size delta this mutation applied.
    pub fn set(&mut self, entry: Entry) -> isize {
        let mut update = vec![0usize; self.max_height];
        let mut cur = 0usize;

        for level in (0..self.max_height).rev() {
            loop {
                let next = self.arena[cur].forward[level];
                if next != NIL && self.arena[next].entry.key < entry.key {
                    cur = next;
                } else {
                    break;
                }
            }
            update[level] = cur;
        }

        let candidate = self.arena[cur].forward[0];
        if candidate != NIL && self.arena[candidate].entry.key == entry.key {
            let node = &mut self.arena[candidate];
            let delta = entry.value.len() as isize - node.entry.value.len() as isize;
            node.entry.value = entry.value;
            node.entry.tombstone = entry.tombstone;
            node.entry.version = entry.version;
            return delta;
        }

        let node_height = self.random_height();
        if node_height > self.height {
            for slot in update.iter_mut().take(node_height).skip(self.height) {
                *slot = 0;
            }
            self.height = node_height;
        }

        let delta = (entry.key.len()
            + entry.value.len()
            + 1 // tombstone flag
            + std::mem::size_of::<u64>() // version
            + node_height * POINTER_SIZE) as isize;

        let new_index = self.arena.len();
        let mut forward = vec![NIL; node_height];
        for (level, slot) in forward.iter_mut().enumerate() {
            *slot = self.arena[update[level]].forward[level];
        }
        self.arena.push(Node { entry, forward });

        for level in 0..node_height {
            self.arena[update[level]].forward[level] = new_index;
        }

        self.len += 1;
        delta
    }

    /// Returns the entry stored under `key`, if any.
    pub fn get(&self, key: &[u8]) -> Option<&Entry> {
        let node = self.seek(key);
        match node {
            Some(entry) if entry.key == key => Some(entry),
            _ => None,
        }
    }

    /// Returns the first entry whose key is `>= key`, if any.
    pub fn lower_bound(&self, key: &[u8]) -> Option<&Entry> {
        self.seek(key)
    }

    /// Returns all entries with keys in `[start, end)`, ascending.
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Vec<Entry> {
        let mut out = Vec::new();
        let mut cur = self.seek_index(start);
        while cur != NIL {
            let entry = &self.arena[cur].entry;
            if entry.key.as_slice() >= end {
                break;
            }
            out.push(entry.clone());
            cur = self.arena[cur].forward[0];
        }
        out
    }

    /// Returns every entry in ascending key order.
    pub fn all(&self) -> Vec<Entry> {
        let mut out = Vec::with_capacity(self.len);
        let mut cur = self.arena[0].forward[0];
        while cur != NIL {
            out.push(self.arena[cur].entry.clone());
            cur = self.arena[cur].forward[0];
        }
        out
    }

    /// Descends to the first node with key `>= key` and returns its entry.
    fn seek(&self, key: &[u8]) -> Option<&Entry> {
        let index = self.seek_index(key);
        if index == NIL {
            None
        } else {
            Some(&self.arena[index].entry)
        }
    }

    /// Index of the first node with key `>= key`, or [`NIL`].
    fn seek_index(&self, key: &[u8]) -> usize {
        let mut cur = 0usize;
        for level in (0..self.max_height).rev() {
            loop {
                let next = self.arena[cur].forward[level];
                if next != NIL && self.arena[next].entry.key.as_slice() < key {
                    cur = next;
                } else {
                    break;
                }
            }
        }
        self.arena[cur].forward[0]
    }

    /// Geometric height draw in `[1, max_height]`.
    fn random_height(&mut self) -> usize {
        let mut height = 1;
        while height < self.max_height && self.rng.gen_bool(self.p) {
            height += 1;
        }
        height
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}
