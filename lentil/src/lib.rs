//! Bayesian sequence models trained by collapsed Gibbs sampling.
//!
//! Five model families share one sampler: a plain HMM, HMM-LDA (one state
//! emits through per-document topics), a document-coupled HMM (content
//! states weighted by their use in the document), an adaptor HMM whose
//! transitions run over variable-length chunks of states, and a word
//! segmenter whose chunks are runs of words. Sweeps run in parallel over
//! sentence-aligned shards and are merged by count deltas. A trained model
//! scores held-out sentences with its tables fixed.

/// Resumable sampler state on disk
pub mod checkpoint;

/// Bayesian word segmenter over chunk bigrams
pub mod chunker;

/// Emission strategies of the model families
pub mod conditional;

/// Token sequence with document and sentence ids
pub mod corpus;

/// Chunk lattice of the adaptor HMM
pub mod lattice;

/// Table layout and pseudo-counts
pub mod model;

/// Normalized emission tables and result writers
pub mod normalize;

/// Training options
pub mod options;

/// Sentence-aligned sharding and delta-merged parallel sweeps
pub mod parallel;

/// Held-out sentence scores under fixed tables
pub mod score;

/// Single-threaded Gibbs sweep
pub mod sweep;

/// Count tables and latent assignments
pub mod tables;

/// Annealing schedule, checkpoints and decoding
pub mod train;

pub use checkpoint::Checkpoint;
pub use corpus::{Corpus, CorpusBuilder};
pub use model::{Hyper, ModelShape};
pub use options::{MarkovOrder, ModelKind, ScoreOptions, TrainOptions};
pub use score::{Scorer, SentenceScore};
pub use sweep::{Sampler, SweepStats};
pub use tables::{CountTables, Latent};
pub use train::Trainer;
