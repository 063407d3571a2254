//! Building blocks for collapsed Gibbs samplers over token sequences.
//!
//! Count tables (dense and chunk-keyed) with decrement/increment and
//! delta-merge support, categorical sampling by cumulative inversion,
//! temperature annealing, per-worker random streams, and the small I/O
//! and progress helpers shared by the samplers.

#![deny(missing_docs)]

/// Simulated annealing and MAP decoding of unnormalized probabilities
pub mod annealer;

/// Categorical draws by cumulative-sum inversion
pub mod categorical;

/// Variable-length chunk keys and hash-keyed chunk n-gram counts
pub mod chunk;

/// Gzip-aware buffered readers and writers
pub mod common_io;

/// Dense flattened count tables and their deltas
pub mod counts;

/// Fatal bookkeeping errors raised as typed panics
pub mod invariant;

/// Progress bar construction
pub mod progress;

/// Reproducible per-worker random streams
pub mod rng;

pub use annealer::{Annealer, TemperatureSchedule};
pub use chunk::{Chunk, ChunkCounts, ChunkDelta};
pub use counts::{DenseCounts, DenseDelta};
pub use invariant::InvariantViolation;
