//! Chunk keys and chunk-keyed count tables.
//!
//! A chunk is a contiguous run of units: latent states, or words for a
//! word segmenter. Its identity is the unit sequence itself, so chunk statistics live in hash maps keyed by
//! [`Chunk`], [`(Chunk, Chunk)`] or [`(Chunk, Chunk, Chunk)`]. The
//! sentence-boundary chunk is a separate variant rather than a reserved id.

use crate::invariant::violation;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::hash::Hash;

/// Immutable sequence of unit ids, or the boundary marker
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Chunk {
    /// Sentence boundary: before the first or after the last chunk
    Boundary,
    /// Units of the tokens covered by the chunk, left to right
    States(Box<[usize]>),
}

impl Chunk {
    /// Chunk over the given units
    pub fn new(states: &[usize]) -> Self {
        debug_assert!(!states.is_empty(), "empty chunk");
        Chunk::States(states.into())
    }

    /// Copy of `states` with position `pos` replaced by `state`
    pub fn with_state_at(states: &[usize], pos: usize, state: usize) -> Self {
        let mut v: Box<[usize]> = states.into();
        v[pos] = state;
        Chunk::States(v)
    }

    /// Is this the boundary marker?
    pub fn is_boundary(&self) -> bool {
        matches!(self, Chunk::Boundary)
    }

    /// Covered units; empty for the boundary
    pub fn states(&self) -> &[usize] {
        match self {
            Chunk::Boundary => &[],
            Chunk::States(s) => s,
        }
    }

    /// Number of covered tokens
    pub fn len(&self) -> usize {
        self.states().len()
    }

    /// True for the boundary marker
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `self` followed by `other`
    pub fn concat(&self, other: &Chunk) -> Chunk {
        let mut v = Vec::with_capacity(self.len() + other.len());
        v.extend_from_slice(self.states());
        v.extend_from_slice(other.states());
        Chunk::States(v.into_boxed_slice())
    }
}

/// Hash-keyed counts that drop zero entries.
///
/// `types` is the number of distinct keys with a positive count and
/// `tokens` the sum of all counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    into = "Vec<(K, u32)>",
    from = "Vec<(K, u32)>",
    bound(
        serialize = "K: Serialize + Clone + Eq + Hash + Ord",
        deserialize = "K: Deserialize<'de> + Eq + Hash"
    )
)]
pub struct ChunkCounts<K: Eq + Hash> {
    counts: FnvHashMap<K, u32>,
    types: usize,
    tokens: u64,
}

/// Signed difference between two chunk count tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDelta<K: Eq + Hash> {
    counts: FnvHashMap<K, i64>,
}

impl<K: Eq + Hash> Default for ChunkCounts<K> {
    fn default() -> Self {
        ChunkCounts {
            counts: FnvHashMap::default(),
            types: 0,
            tokens: 0,
        }
    }
}

impl<K: Eq + Hash + Clone> ChunkCounts<K> {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of `key`, zero if absent
    #[inline]
    pub fn get(&self, key: &K) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Distinct keys with a positive count
    pub fn types(&self) -> usize {
        self.types
    }

    /// Sum of all counts
    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Add one event
    pub fn increment(&mut self, key: K) {
        let c = self.counts.entry(key).or_insert(0);
        if *c == 0 {
            self.types += 1;
        }
        *c += 1;
        self.tokens += 1;
    }

    /// Remove one event. A missing key is fatal.
    pub fn decrement(&mut self, key: &K) {
        match self.counts.get_mut(key) {
            Some(c) if *c > 1 => *c -= 1,
            Some(_) => {
                self.counts.remove(key);
                self.types -= 1;
            }
            None => violation("decrement of a chunk key with zero count"),
        }
        self.tokens -= 1;
    }

    /// Iterate over `(key, count)` pairs in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = (&K, u32)> {
        self.counts.iter().map(|(k, &c)| (k, c))
    }

    /// `self - snapshot` over the union of keys
    pub fn delta(&self, snapshot: &Self) -> ChunkDelta<K> {
        let mut counts: FnvHashMap<K, i64> = FnvHashMap::default();
        for (k, &c) in self.counts.iter() {
            let d = c as i64 - snapshot.get(k) as i64;
            if d != 0 {
                counts.insert(k.clone(), d);
            }
        }
        for (k, &c) in snapshot.counts.iter() {
            if !self.counts.contains_key(k) {
                counts.insert(k.clone(), -(c as i64));
            }
        }
        ChunkDelta { counts }
    }

    /// Add a delta in place, keeping `types` and `tokens` in sync
    pub fn apply(&mut self, delta: &ChunkDelta<K>) {
        for (k, &d) in delta.counts.iter() {
            let old = self.get(k) as i64;
            let new = old + d;
            if new < 0 {
                violation(format!("merged chunk count {}", new));
            }
            if old == 0 && new > 0 {
                self.types += 1;
            } else if old > 0 && new == 0 {
                self.types -= 1;
            }
            if new == 0 {
                self.counts.remove(k);
            } else {
                self.counts.insert(k.clone(), new as u32);
            }
            self.tokens = (self.tokens as i64 + d) as u64;
        }
    }
}

impl<K: Eq + Hash + Clone> ChunkDelta<K> {
    /// Empty delta
    pub fn new() -> Self {
        ChunkDelta {
            counts: FnvHashMap::default(),
        }
    }

    /// Sum another delta into this one
    pub fn accumulate(&mut self, other: &ChunkDelta<K>) {
        for (k, &d) in other.counts.iter() {
            let e = self.counts.entry(k.clone()).or_insert(0);
            *e += d;
            if *e == 0 {
                self.counts.remove(k);
            }
        }
    }

    /// True if nothing changed
    pub fn is_zero(&self) -> bool {
        self.counts.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for ChunkDelta<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone + Ord> From<ChunkCounts<K>> for Vec<(K, u32)> {
    fn from(table: ChunkCounts<K>) -> Self {
        let mut entries: Vec<(K, u32)> = table.counts.into_iter().collect();
        entries.sort();
        entries
    }
}

impl<K: Eq + Hash> From<Vec<(K, u32)>> for ChunkCounts<K> {
    fn from(entries: Vec<(K, u32)>) -> Self {
        let mut table = ChunkCounts::default();
        for (k, c) in entries {
            if c == 0 {
                continue;
            }
            let e = table.counts.entry(k).or_insert(0);
            if *e == 0 {
                table.types += 1;
            }
            *e += c;
            table.tokens += c as u64;
        }
        table
    }
}
