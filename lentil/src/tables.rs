//! Sufficient statistics of the current sample and the latent arrays they
//! summarize.
//!
//! `CountTables` holds every count table a model family can use; tables a
//! model does not use have a zero-length axis. `Latent` holds the per-token
//! assignments, and `LatentShard` is a mutable window over a contiguous
//! token range so parallel workers can own disjoint parts of it.
//! `TableAccess` lets one sweep either update the tables or read them
//! frozen, as held-out scoring does.

use crate::lattice::{ChunkTables, ChunkTablesDelta};
use crate::model::ModelShape;
use gibbs_util::counts::{DenseCounts, DenseDelta};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// All count tables of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountTables {
    /// `stateByWord[word][state]`
    pub state_by_word: DenseCounts<2>,
    /// `stateCounts[state]`
    pub state_counts: DenseCounts<1>,
    /// `firstOrder[prev][state]`
    pub first_order: DenseCounts<2>,
    /// `secondOrder[pprev][prev][state]`
    pub second_order: DenseCounts<3>,
    /// `topicByWord[word][topic]`
    pub topic_by_word: DenseCounts<2>,
    /// `topicCounts[topic]`
    pub topic_counts: DenseCounts<1>,
    /// `documentByTopic[doc][topic]`
    pub document_by_topic: DenseCounts<2>,
    /// `contentByDocument[doc][content state]`
    pub content_by_document: DenseCounts<2>,
    /// `documentCounts[doc]`, content tokens per document
    pub document_counts: DenseCounts<1>,
    /// Chunk n-gram tables
    pub chunks: ChunkTables,
}

/// Elementwise change of every table
#[derive(Debug, Clone, PartialEq)]
pub struct TableDelta {
    state_by_word: DenseDelta,
    state_counts: DenseDelta,
    first_order: DenseDelta,
    second_order: DenseDelta,
    topic_by_word: DenseDelta,
    topic_counts: DenseDelta,
    document_by_topic: DenseDelta,
    content_by_document: DenseDelta,
    document_counts: DenseDelta,
    chunks: ChunkTablesDelta,
}

impl CountTables {
    /// Zero tables laid out for `shape`
    pub fn zeros(shape: &ModelShape) -> Self {
        let s = shape.num_states;
        let w = shape.vocab_size;
        let d = shape.num_documents;
        let k = shape.num_topics;
        let st = if shape.has_state_transitions() { s } else { 0 };
        let c = if shape.has_document_coupling() {
            shape.num_content
        } else {
            0
        };
        let dc = if shape.has_document_coupling() { d } else { 0 };
        CountTables {
            state_by_word: DenseCounts::zeros([w, s]),
            state_counts: DenseCounts::zeros([s]),
            first_order: DenseCounts::zeros([st, st]),
            second_order: DenseCounts::zeros([st, st, st]),
            topic_by_word: DenseCounts::zeros([w, k]),
            topic_counts: DenseCounts::zeros([k]),
            document_by_topic: DenseCounts::zeros([if k > 0 { d } else { 0 }, k]),
            content_by_document: DenseCounts::zeros([dc, c]),
            document_counts: DenseCounts::zeros([dc]),
            chunks: ChunkTables::default(),
        }
    }

    /// Copy whose word axes cover `vocab_size` words. Words past the
    /// current vocabulary have no counts.
    pub fn with_vocab_size(&self, vocab_size: usize) -> Self {
        let mut out = self.clone();
        out.state_by_word = self.state_by_word.with_rows(vocab_size);
        out.topic_by_word = self.topic_by_word.with_rows(vocab_size);
        out
    }

    /// Count one transition into `state`
    #[inline]
    pub fn add_transition(&mut self, pprev: usize, prev: usize, state: usize) {
        self.first_order.increment([prev, state]);
        self.second_order.increment([pprev, prev, state]);
    }

    /// Remove one transition into `state`
    #[inline]
    pub fn remove_transition(&mut self, pprev: usize, prev: usize, state: usize) {
        self.first_order.decrement([prev, state]);
        self.second_order.decrement([pprev, prev, state]);
    }

    /// `self - snapshot` for every table
    pub fn delta(&self, snapshot: &CountTables) -> TableDelta {
        TableDelta {
            state_by_word: self.state_by_word.delta(&snapshot.state_by_word),
            state_counts: self.state_counts.delta(&snapshot.state_counts),
            first_order: self.first_order.delta(&snapshot.first_order),
            second_order: self.second_order.delta(&snapshot.second_order),
            topic_by_word: self.topic_by_word.delta(&snapshot.topic_by_word),
            topic_counts: self.topic_counts.delta(&snapshot.topic_counts),
            document_by_topic: self.document_by_topic.delta(&snapshot.document_by_topic),
            content_by_document: self
                .content_by_document
                .delta(&snapshot.content_by_document),
            document_counts: self.document_counts.delta(&snapshot.document_counts),
            chunks: self.chunks.delta(&snapshot.chunks),
        }
    }

    /// Apply a (summed) delta
    pub fn apply(&mut self, delta: &TableDelta) {
        self.state_by_word.apply(&delta.state_by_word);
        self.state_counts.apply(&delta.state_counts);
        self.first_order.apply(&delta.first_order);
        self.second_order.apply(&delta.second_order);
        self.topic_by_word.apply(&delta.topic_by_word);
        self.topic_counts.apply(&delta.topic_counts);
        self.document_by_topic.apply(&delta.document_by_topic);
        self.content_by_document.apply(&delta.content_by_document);
        self.document_counts.apply(&delta.document_counts);
        self.chunks.apply(&delta.chunks);
    }
}

impl TableDelta {
    /// Sum another worker's delta into this one
    pub fn accumulate(&mut self, other: &TableDelta) {
        self.state_by_word.accumulate(&other.state_by_word);
        self.state_counts.accumulate(&other.state_counts);
        self.first_order.accumulate(&other.first_order);
        self.second_order.accumulate(&other.second_order);
        self.topic_by_word.accumulate(&other.topic_by_word);
        self.topic_counts.accumulate(&other.topic_counts);
        self.document_by_topic.accumulate(&other.document_by_topic);
        self.content_by_document
            .accumulate(&other.content_by_document);
        self.document_counts.accumulate(&other.document_counts);
        self.chunks.accumulate(&other.chunks);
    }

    /// True if no table changed
    pub fn is_zero(&self) -> bool {
        self.state_by_word.is_zero()
            && self.state_counts.is_zero()
            && self.first_order.is_zero()
            && self.second_order.is_zero()
            && self.topic_by_word.is_zero()
            && self.topic_counts.is_zero()
            && self.document_by_topic.is_zero()
            && self.content_by_document.is_zero()
            && self.document_counts.is_zero()
            && self.chunks.is_zero()
    }
}

/// Tables a sweep reads, and updates unless they are frozen
#[derive(Debug)]
pub enum TableAccess<'t> {
    /// Every move is counted
    Live(&'t mut CountTables),
    /// Nothing is counted; the sweep only reads
    Frozen(&'t CountTables),
}

impl TableAccess<'_> {
    /// Current counts
    #[inline]
    pub fn get(&self) -> &CountTables {
        match self {
            TableAccess::Live(t) => &**t,
            TableAccess::Frozen(t) => *t,
        }
    }

    /// Counts to update, `None` when frozen
    #[inline]
    pub fn edit(&mut self) -> Option<&mut CountTables> {
        match self {
            TableAccess::Live(t) => Some(&mut **t),
            TableAccess::Frozen(_) => None,
        }
    }
}

/// Per-token latent assignments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Latent {
    /// `state[i]`
    pub state: Vec<usize>,
    /// `topic[i]`, zeros without topics
    pub topic: Vec<usize>,
    /// `segment[i]`: a chunk boundary follows token i
    pub segment: Vec<bool>,
    /// Previous state recorded when token i was last counted
    pub first: Vec<usize>,
    /// Pre-previous state recorded when token i was last counted
    pub second: Vec<usize>,
}

impl Latent {
    /// All-zero assignments for `n` tokens
    pub fn new(n: usize) -> Self {
        Latent {
            state: vec![0; n],
            topic: vec![0; n],
            segment: vec![false; n],
            first: vec![0; n],
            second: vec![0; n],
        }
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.state.len()
    }

    /// True without tokens
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// One window over every token
    pub fn whole(&mut self) -> LatentShard<'_> {
        let n = self.len();
        self.shards(&[0..n]).remove(0)
    }

    /// Disjoint windows over consecutive ranges, which must start at 0 and
    /// tile a prefix of the tokens
    pub fn shards(&mut self, bounds: &[Range<usize>]) -> Vec<LatentShard<'_>> {
        let mut state = &mut self.state[..];
        let mut topic = &mut self.topic[..];
        let mut segment = &mut self.segment[..];
        let mut first = &mut self.first[..];
        let mut second = &mut self.second[..];

        let mut out = Vec::with_capacity(bounds.len());
        let mut offset = 0;
        for r in bounds {
            assert_eq!(r.start, offset, "shard ranges must be contiguous");
            let len = r.end - r.start;
            let (s, rest) = std::mem::take(&mut state).split_at_mut(len);
            state = rest;
            let (t, rest) = std::mem::take(&mut topic).split_at_mut(len);
            topic = rest;
            let (g, rest) = std::mem::take(&mut segment).split_at_mut(len);
            segment = rest;
            let (f, rest) = std::mem::take(&mut first).split_at_mut(len);
            first = rest;
            let (p, rest) = std::mem::take(&mut second).split_at_mut(len);
            second = rest;
            out.push(LatentShard {
                offset,
                state: s,
                topic: t,
                segment: g,
                first: f,
                second: p,
            });
            offset = r.end;
        }
        out
    }
}

/// Mutable window over the assignments of tokens `offset..offset+len`,
/// addressed by global token index
#[derive(Debug)]
pub struct LatentShard<'a> {
    offset: usize,
    state: &'a mut [usize],
    topic: &'a mut [usize],
    segment: &'a mut [bool],
    first: &'a mut [usize],
    second: &'a mut [usize],
}

/// Owned copy of a shard's assignments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedShard {
    state: Vec<usize>,
    topic: Vec<usize>,
    segment: Vec<bool>,
    first: Vec<usize>,
    second: Vec<usize>,
}

impl LatentShard<'_> {
    /// Global token range covered
    pub fn range(&self) -> Range<usize> {
        self.offset..(self.offset + self.state.len())
    }

    /// `state[i]`
    #[inline]
    pub fn state(&self, i: usize) -> usize {
        self.state[i - self.offset]
    }

    /// States of tokens `r`
    #[inline]
    pub fn states(&self, r: Range<usize>) -> &[usize] {
        &self.state[(r.start - self.offset)..(r.end - self.offset)]
    }

    /// Set `state[i]`
    #[inline]
    pub fn set_state(&mut self, i: usize, s: usize) {
        self.state[i - self.offset] = s;
    }

    /// `topic[i]`
    #[inline]
    pub fn topic(&self, i: usize) -> usize {
        self.topic[i - self.offset]
    }

    /// Set `topic[i]`
    #[inline]
    pub fn set_topic(&mut self, i: usize, t: usize) {
        self.topic[i - self.offset] = t;
    }

    /// `segment[i]`
    #[inline]
    pub fn segment(&self, i: usize) -> bool {
        self.segment[i - self.offset]
    }

    /// Segment bits of tokens `r`
    #[inline]
    pub fn segments(&self, r: Range<usize>) -> &[bool] {
        &self.segment[(r.start - self.offset)..(r.end - self.offset)]
    }

    /// Set `segment[i]`
    #[inline]
    pub fn set_segment(&mut self, i: usize, b: bool) {
        self.segment[i - self.offset] = b;
    }

    /// `(second[i], first[i])`: the recorded pre-previous and previous state
    #[inline]
    pub fn history(&self, i: usize) -> (usize, usize) {
        (self.second[i - self.offset], self.first[i - self.offset])
    }

    /// Record the history token i was counted with
    #[inline]
    pub fn set_history(&mut self, i: usize, pprev: usize, prev: usize) {
        self.second[i - self.offset] = pprev;
        self.first[i - self.offset] = prev;
    }

    /// Copy of the current assignments
    pub fn save(&self) -> SavedShard {
        SavedShard {
            state: self.state.to_vec(),
            topic: self.topic.to_vec(),
            segment: self.segment.to_vec(),
            first: self.first.to_vec(),
            second: self.second.to_vec(),
        }
    }

    /// Put back assignments taken with [`LatentShard::save`]
    pub fn restore(&mut self, saved: &SavedShard) {
        self.state.copy_from_slice(&saved.state);
        self.topic.copy_from_slice(&saved.topic);
        self.segment.copy_from_slice(&saved.segment);
        self.first.copy_from_slice(&saved.first);
        self.second.copy_from_slice(&saved.second);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shards_address_global_indices() {
        let mut latent = Latent::new(6);
        {
            let mut shards = latent.shards(&[0..2, 2..6]);
            assert_eq!(shards[1].range(), 2..6);
            shards[1].set_state(3, 9);
            shards[0].set_state(1, 7);
            shards[1].set_history(5, 1, 2);
            assert_eq!(shards[1].states(2..4), &[0, 9]);
        }
        assert_eq!(latent.state, vec![0, 7, 0, 9, 0, 0]);
        assert_eq!((latent.second[5], latent.first[5]), (1, 2));
    }

    #[test]
    fn frozen_access_only_reads() {
        let shape = ModelShape {
            kind: crate::options::ModelKind::Hmm,
            order: crate::options::MarkovOrder::Bigram,
            num_states: 3,
            num_content: 0,
            num_topics: 0,
            vocab_size: 2,
            num_documents: 1,
        };
        let mut tables = CountTables::zeros(&shape);
        {
            let mut live = TableAccess::Live(&mut tables);
            if let Some(t) = live.edit() {
                t.add_transition(2, 2, 0);
            }
        }
        let mut frozen = TableAccess::Frozen(&tables);
        assert!(frozen.edit().is_none());
        assert_eq!(frozen.get().first_order.get([2, 0]), 1);

        let grown = tables.with_vocab_size(5);
        assert_eq!(grown.state_by_word.dims(), &[5, 3]);
        assert_eq!(grown.first_order, tables.first_order);
    }

    #[test]
    fn restore_undoes_edits() {
        let mut latent = Latent::new(4);
        let mut shard = latent.whole();
        let saved = shard.save();
        shard.set_state(2, 3);
        shard.set_segment(2, true);
        shard.restore(&saved);
        assert_eq!(latent, Latent::new(4));
    }
}
