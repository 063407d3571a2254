//! Model shape: which latent variables exist and how big each table is.

use crate::corpus::Corpus;
use crate::options::{MarkovOrder, ModelKind, TrainOptions};
use serde::{Deserialize, Serialize};

/// Sizes and switches that fix the layout of every count table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelShape {
    /// Model family
    pub kind: ModelKind,
    /// Markov order of the state chain
    pub order: MarkovOrder,
    /// All states including the trailing boundary state (`stateS`)
    pub num_states: usize,
    /// Content states at the front of the state range (`stateC`)
    pub num_content: usize,
    /// Topics (`topicK`), 0 without topics
    pub num_topics: usize,
    /// Word types (`W`)
    pub vocab_size: usize,
    /// Documents (`D`)
    pub num_documents: usize,
}

impl ModelShape {
    /// Shape of a model over `corpus` with the given options
    pub fn new(opts: &TrainOptions, corpus: &Corpus) -> Self {
        let (num_content, num_topics) = match opts.model {
            ModelKind::Hmm | ModelKind::AdaptorHmm | ModelKind::Chunker => (0, 0),
            ModelKind::LdaHmm => (1, opts.topics),
            ModelKind::CdHmm => (opts.content_states, 0),
        };
        // the word segmenter has one state, which every token takes
        let function_states = match opts.model {
            ModelKind::Chunker => 1,
            _ => opts.function_states,
        };
        ModelShape {
            kind: opts.model,
            order: opts.order,
            num_states: function_states + num_content + 1,
            num_content,
            num_topics,
            vocab_size: corpus.vocab_size(),
            num_documents: corpus.num_documents(),
        }
    }

    /// Reserved sentence-boundary state
    #[inline]
    pub fn boundary(&self) -> usize {
        self.num_states - 1
    }

    /// Number of assignable states, `[0, boundary)`
    #[inline]
    pub fn num_candidates(&self) -> usize {
        self.num_states - 1
    }

    /// Does the model carry per-token topics?
    pub fn has_topics(&self) -> bool {
        self.kind == ModelKind::LdaHmm
    }

    /// Are content states tied to documents?
    pub fn has_document_coupling(&self) -> bool {
        self.kind == ModelKind::CdHmm
    }

    /// Do transitions run over chunks?
    pub fn has_chunks(&self) -> bool {
        matches!(self.kind, ModelKind::AdaptorHmm | ModelKind::Chunker)
    }

    /// Are chunks made of words rather than states?
    pub fn has_word_chunks(&self) -> bool {
        self.kind == ModelKind::Chunker
    }

    /// Does the model keep state-level transition tables?
    pub fn has_state_transitions(&self) -> bool {
        !self.has_chunks()
    }

    /// Shards must not split documents when document tables are sampled
    pub fn shards_by_document(&self) -> bool {
        self.has_topics() || self.has_document_coupling()
    }
}

/// Dirichlet pseudo-counts and their normalizers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hyper {
    /// Document prior (topics or content states); chunk concentration
    pub alpha: f64,
    /// Topic-word or content-word prior
    pub beta: f64,
    /// Transition prior
    pub gamma: f64,
    /// Function-word prior
    pub delta: f64,
    /// Chunk length stopping probability
    pub phash: f64,
    /// `W * beta`
    pub wbeta: f64,
    /// `W * delta`
    pub wdelta: f64,
    /// `stateC * alpha`
    pub calpha: f64,
    /// `stateS * gamma`
    pub sgamma: f64,
}

impl Hyper {
    /// Pseudo-counts from options, normalizers from the shape
    pub fn new(opts: &TrainOptions, shape: &ModelShape) -> Self {
        let w = shape.vocab_size as f64;
        Hyper {
            alpha: opts.alpha,
            beta: opts.beta,
            gamma: opts.gamma,
            delta: opts.delta,
            phash: opts.phash,
            wbeta: w * opts.beta,
            wdelta: w * opts.delta,
            calpha: shape.num_content as f64 * opts.alpha,
            sgamma: shape.num_states as f64 * opts.gamma,
        }
    }
}
