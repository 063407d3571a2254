//! Dense count tables.
//!
//! A `DenseCounts<D>` is a D-dimensional table of non-negative counts
//! stored row-major in one `Vec<u32>`, so `table[[a, b]]` lives at
//! `a * dims[1] + b`. Parallel workers clone a table, mutate the clone, and
//! hand back `delta(&clone, &snapshot)` which the coordinator sums and
//! applies once.

use crate::invariant::violation;
use serde::{Deserialize, Serialize};

/// Row-major table of counts with a fixed number of dimensions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseCounts<const D: usize> {
    dims: Vec<usize>,
    data: Vec<u32>,
}

/// Signed elementwise difference between two same-shape tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseDelta {
    data: Vec<i64>,
}

impl<const D: usize> DenseCounts<D> {
    /// Zero table of the given shape. A zero-length axis gives an empty
    /// table, which is how unused tables of a model are represented.
    pub fn zeros(dims: [usize; D]) -> Self {
        let len = dims.iter().product();
        DenseCounts {
            dims: dims.to_vec(),
            data: vec![0; len],
        }
    }

    /// Zero table with the same shape as `self`
    pub fn zeros_like(&self) -> Self {
        DenseCounts {
            dims: self.dims.clone(),
            data: vec![0; self.data.len()],
        }
    }

    /// Copy with the first axis extended to `rows`; the new cells are zero
    pub fn with_rows(&self, rows: usize) -> Self {
        assert!(rows >= self.dims[0], "cannot shrink a table to {} rows", rows);
        let mut dims = self.dims.clone();
        dims[0] = rows;
        let mut data = self.data.clone();
        data.resize(dims.iter().product(), 0);
        DenseCounts { dims, data }
    }

    /// Shape of the table
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the table has no cells
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flattened view of all cells
    pub fn as_slice(&self) -> &[u32] {
        &self.data
    }

    /// Sum over all cells
    pub fn total(&self) -> u64 {
        self.data.iter().map(|&x| x as u64).sum()
    }

    #[inline]
    fn offset(&self, key: [usize; D]) -> usize {
        let mut off = 0;
        for d in 0..D {
            debug_assert!(
                key[d] < self.dims[d],
                "index {} out of range {} on axis {}",
                key[d],
                self.dims[d],
                d
            );
            off = off * self.dims[d] + key[d];
        }
        off
    }

    /// Count at `key`
    #[inline]
    pub fn get(&self, key: [usize; D]) -> u32 {
        self.data[self.offset(key)]
    }

    /// Count at `key` as a float, for probability terms
    #[inline]
    pub fn getf(&self, key: [usize; D]) -> f64 {
        self.get(key) as f64
    }

    /// Add one event at `key`
    #[inline]
    pub fn increment(&mut self, key: [usize; D]) {
        let off = self.offset(key);
        self.data[off] += 1;
    }

    /// Remove one event at `key`. Removing from an empty cell is fatal.
    #[inline]
    pub fn decrement(&mut self, key: [usize; D]) {
        let off = self.offset(key);
        match self.data[off].checked_sub(1) {
            Some(x) => self.data[off] = x,
            None => violation(format!("decrement of zero count at {:?}", key)),
        }
    }

    /// `self - snapshot`, elementwise
    pub fn delta(&self, snapshot: &Self) -> DenseDelta {
        assert_eq!(self.dims, snapshot.dims, "delta between different shapes");
        DenseDelta {
            data: self
                .data
                .iter()
                .zip(snapshot.data.iter())
                .map(|(&a, &b)| a as i64 - b as i64)
                .collect(),
        }
    }

    /// Add a delta in place. A cell pushed below zero is fatal.
    pub fn apply(&mut self, delta: &DenseDelta) {
        assert_eq!(self.data.len(), delta.data.len(), "delta of wrong size");
        for (i, (x, &d)) in self.data.iter_mut().zip(delta.data.iter()).enumerate() {
            let y = *x as i64 + d;
            if y < 0 {
                violation(format!("merged count {} at cell {}", y, i));
            }
            *x = y as u32;
        }
    }
}

impl DenseDelta {
    /// Sum another delta into this one
    pub fn accumulate(&mut self, other: &DenseDelta) {
        assert_eq!(self.data.len(), other.data.len(), "delta of wrong size");
        for (a, &b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
    }

    /// True if every entry is zero
    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|&x| x == 0)
    }

    /// Net number of events added
    pub fn net(&self) -> i64 {
        self.data.iter().sum()
    }
}
