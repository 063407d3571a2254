//! Chunk lattice of the adaptor HMM.
//!
//! The `segment` array cuts every sentence into chunks of consecutive
//! states. `ChunkTables` counts chunks, chunk bigrams and chunk trigrams
//! (with the boundary chunk standing in before the first chunk of a
//! sentence). A sweep visits each token once and
//!
//! 1. resamples the boundary after it (merge its chunk with the next one,
//!    or split its chunk at it), then
//! 2. resamples its state with chunk-level transition counts.
//!
//! Around token `i` the sampler keeps the window `aa | a | c | b | bb`:
//! two chunks of history, the chunk containing `i`, and two chunks of
//! lookahead. Chunks outside the sentence are [`Chunk::Boundary`].
//!
//! The word segmenter in [`crate::chunker`] keeps its chunk tables and
//! window here too; its chunks are runs of words. Both sweeps take
//! [`TableAccess`], so held-out sentences can be sampled against frozen
//! counts.

use crate::conditional::{Conditional, Token};
use crate::corpus::Corpus;
use crate::model::{Hyper, ModelShape};
use crate::sweep::SweepStats;
use crate::tables::{CountTables, Latent, LatentShard, TableAccess};
use gibbs_util::annealer::Annealer;
use gibbs_util::categorical::sample_index;
use gibbs_util::chunk::{Chunk, ChunkCounts, ChunkDelta};
use rand::rngs::SmallRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::Range;

type Bigram = (Chunk, Chunk);
type Trigram = (Chunk, Chunk, Chunk);

#[inline]
pub(crate) fn bi(x: &Chunk, y: &Chunk) -> Bigram {
    (x.clone(), y.clone())
}

#[inline]
fn tri(x: &Chunk, y: &Chunk, z: &Chunk) -> Trigram {
    (x.clone(), y.clone(), z.clone())
}

/// `chunkFreq`, `chunk1T`, `chunk2T`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkTables {
    /// Chunk frequencies
    pub freq: ChunkCounts<Chunk>,
    /// `(previous chunk, chunk)` counts
    pub bigram: ChunkCounts<Bigram>,
    /// `(pre-previous chunk, previous chunk, chunk)` counts
    pub trigram: ChunkCounts<Trigram>,
}

/// Change of the chunk tables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkTablesDelta {
    freq: ChunkDelta<Chunk>,
    bigram: ChunkDelta<Bigram>,
    trigram: ChunkDelta<Trigram>,
}

impl ChunkTables {
    /// Count the chunks of `range` from scratch. `units` holds the unit
    /// of every token: its state, or its word for a word segmenter.
    pub fn rebuild(corpus: &Corpus, units: &[usize], segment: &[bool], range: Range<usize>) -> Self {
        let mut tables = ChunkTables::default();
        for sentence in corpus.sentence_ranges(range) {
            let mut aa = Chunk::Boundary;
            let mut a = Chunk::Boundary;
            for span in chunk_spans(segment, sentence) {
                let c = Chunk::new(&units[span]);
                tables.add_chunk(&aa, &a, &c);
                aa = a;
                a = c;
            }
        }
        tables
    }

    /// Count `c` after history `aa, a`
    pub fn add_chunk(&mut self, aa: &Chunk, a: &Chunk, c: &Chunk) {
        self.freq.increment(c.clone());
        self.bigram.increment(bi(a, c));
        self.trigram.increment(tri(aa, a, c));
    }

    /// Total number of chunks
    pub fn num_chunks(&self) -> u64 {
        self.freq.tokens()
    }

    /// Chunk-level transition factor of candidate chunk `x` in the window
    /// `aa | a | x | b | bb`:
    ///
    /// `(abx + γ) · (bxc + γ) / (bx + mγ) · (xcd + γ) / (xc + mγ)`
    ///
    /// where `mγ = max(chunk types, 1) · γ`. A trigram count is only read
    /// when the bigram leading into it is non-zero.
    pub fn state_term(
        &self,
        aa: &Chunk,
        a: &Chunk,
        x: &Chunk,
        b: &Chunk,
        bb: &Chunk,
        gamma: f64,
    ) -> f64 {
        // at least one chunk type, or a lone chunk divides by zero
        let mgamma = self.freq.types().max(1) as f64 * gamma;
        let bx = self.bigram.get(&bi(a, x)) as f64;
        let abx = self.trigram.get(&tri(aa, a, x)) as f64;
        let (xc, bxc, xcd) = if b.is_boundary() {
            (0.0, 0.0, 0.0)
        } else {
            let xc = self.bigram.get(&bi(x, b)) as f64;
            let bxc = if bx > 0.0 {
                self.trigram.get(&tri(a, x, b)) as f64
            } else {
                0.0
            };
            let xcd = if xc > 0.0 && !bb.is_boundary() {
                self.trigram.get(&tri(x, b, bb)) as f64
            } else {
                0.0
            };
            (xc, bxc, xcd)
        };
        (abx + gamma) * ((bxc + gamma) / (bx + mgamma)) * ((xcd + gamma) / (xc + mgamma))
    }

    /// `a | l | r | b → a | lr | b`, and likewise for trigrams with `aa`
    /// and `bb`. Links into a boundary `b` or `bb` are not stored.
    #[allow(clippy::too_many_arguments)]
    pub fn merge_links(
        &mut self,
        l: &Chunk,
        r: &Chunk,
        lr: &Chunk,
        aa: &Chunk,
        a: &Chunk,
        b: &Chunk,
        bb: &Chunk,
    ) {
        self.bigram.decrement(&bi(a, l));
        self.bigram.decrement(&bi(l, r));
        self.bigram.increment(bi(a, lr));
        if !b.is_boundary() {
            self.bigram.decrement(&bi(r, b));
            self.bigram.increment(bi(lr, b));
        }

        self.trigram.decrement(&tri(aa, a, l));
        self.trigram.decrement(&tri(a, l, r));
        self.trigram.increment(tri(aa, a, lr));
        if !b.is_boundary() {
            self.trigram.decrement(&tri(l, r, b));
            self.trigram.increment(tri(a, lr, b));
            if !bb.is_boundary() {
                self.trigram.decrement(&tri(r, b, bb));
                self.trigram.increment(tri(lr, b, bb));
            }
        }
    }

    /// `a | lr | b → a | l | r | b`, the inverse of
    /// [`ChunkTables::merge_links`]
    #[allow(clippy::too_many_arguments)]
    pub fn split_links(
        &mut self,
        lr: &Chunk,
        l: &Chunk,
        r: &Chunk,
        aa: &Chunk,
        a: &Chunk,
        b: &Chunk,
        bb: &Chunk,
    ) {
        self.bigram.decrement(&bi(a, lr));
        self.bigram.increment(bi(a, l));
        self.bigram.increment(bi(l, r));
        if !b.is_boundary() {
            self.bigram.decrement(&bi(lr, b));
            self.bigram.increment(bi(r, b));
        }

        self.trigram.decrement(&tri(aa, a, lr));
        self.trigram.increment(tri(aa, a, l));
        self.trigram.increment(tri(a, l, r));
        if !b.is_boundary() {
            self.trigram.decrement(&tri(a, lr, b));
            self.trigram.increment(tri(l, r, b));
            if !bb.is_boundary() {
                self.trigram.decrement(&tri(lr, b, bb));
                self.trigram.increment(tri(r, b, bb));
            }
        }
    }

    pub(crate) fn remove_window(&mut self, w: &Window) {
        self.freq.decrement(&w.c);
        self.bigram.decrement(&bi(&w.a, &w.c));
        self.trigram.decrement(&tri(&w.aa, &w.a, &w.c));
        if !w.b.is_boundary() {
            self.bigram.decrement(&bi(&w.c, &w.b));
            self.trigram.decrement(&tri(&w.a, &w.c, &w.b));
            if !w.bb.is_boundary() {
                self.trigram.decrement(&tri(&w.c, &w.b, &w.bb));
            }
        }
    }

    pub(crate) fn add_window(&mut self, w: &Window) {
        self.freq.increment(w.c.clone());
        self.bigram.increment(bi(&w.a, &w.c));
        self.trigram.increment(tri(&w.aa, &w.a, &w.c));
        if !w.b.is_boundary() {
            self.bigram.increment(bi(&w.c, &w.b));
            self.trigram.increment(tri(&w.a, &w.c, &w.b));
            if !w.bb.is_boundary() {
                self.trigram.increment(tri(&w.c, &w.b, &w.bb));
            }
        }
    }

    /// `self - snapshot`
    pub fn delta(&self, snapshot: &ChunkTables) -> ChunkTablesDelta {
        ChunkTablesDelta {
            freq: self.freq.delta(&snapshot.freq),
            bigram: self.bigram.delta(&snapshot.bigram),
            trigram: self.trigram.delta(&snapshot.trigram),
        }
    }

    /// Apply a summed delta
    pub fn apply(&mut self, delta: &ChunkTablesDelta) {
        self.freq.apply(&delta.freq);
        self.bigram.apply(&delta.bigram);
        self.trigram.apply(&delta.trigram);
    }
}

impl ChunkTablesDelta {
    /// Sum another delta into this one
    pub fn accumulate(&mut self, other: &ChunkTablesDelta) {
        self.freq.accumulate(&other.freq);
        self.bigram.accumulate(&other.bigram);
        self.trigram.accumulate(&other.trigram);
    }

    /// True if nothing changed
    pub fn is_zero(&self) -> bool {
        self.freq.is_zero() && self.bigram.is_zero() && self.trigram.is_zero()
    }
}

/// Token ranges of the chunks of one sentence. A chunk closes after a set
/// segment bit or at the end of the sentence.
pub fn chunk_spans(segment: &[bool], sentence: Range<usize>) -> Vec<Range<usize>> {
    let mut out = vec![];
    let mut lb = sentence.start;
    for i in sentence.clone() {
        if segment[i] || i + 1 == sentence.end {
            out.push(lb..(i + 1));
            lb = i + 1;
        }
    }
    out
}

/// Every sentence must end on a set segment bit
pub fn partition_is_valid(corpus: &Corpus, segment: &[bool]) -> bool {
    segment.len() == corpus.len()
        && (0..corpus.len()).all(|i| !corpus.is_sentence_end(i) || segment[i])
}

/// Dirichlet-process predictive probability of a chunk.
///
/// The base measure draws each unit with its corpus probability and stops
/// after each position with probability `phash`.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPrior {
    alpha: f64,
    phash: f64,
}

impl ChunkPrior {
    /// Prior with concentration `alpha` and stopping probability `phash`
    pub fn new(hyper: &Hyper) -> Self {
        ChunkPrior {
            alpha: hyper.alpha,
            phash: hyper.phash,
        }
    }

    /// Base measure `p0(c) = Π p(u) · phash · (1 - phash)^(len - 1)`
    pub fn base<U: Fn(usize) -> f64>(&self, unit_prob: U, c: &Chunk) -> f64 {
        let mut p0 = 1.0;
        for &u in c.states() {
            p0 *= unit_prob(u);
        }
        p0 * self.phash * (1.0 - self.phash).powi(c.len() as i32 - 1)
    }

    /// `(freq[c] + alpha p0(c)) / (chunks + alpha + denom_add)`
    pub fn prob<U: Fn(usize) -> f64>(
        &self,
        freq: &ChunkCounts<Chunk>,
        unit_prob: U,
        c: &Chunk,
        denom_add: f64,
    ) -> f64 {
        (freq.get(c) as f64 + self.alpha * self.base(unit_prob, c))
            / (freq.tokens() as f64 + self.alpha + denom_add)
    }

    /// `(h0, h1)` for joining `c` with the next chunk `b` against keeping
    /// them apart, with both removed from `freq`. Nothing joins across a
    /// boundary.
    pub fn merge_odds<U: Fn(usize) -> f64 + Copy>(
        &self,
        freq: &ChunkCounts<Chunk>,
        unit_prob: U,
        c: &Chunk,
        b: &Chunk,
    ) -> (f64, f64) {
        if b.is_boundary() {
            return (0.0, 1.0);
        }
        (
            self.prob(freq, unit_prob, &c.concat(b), 0.0),
            self.prob(freq, unit_prob, c, 0.0) * self.prob(freq, unit_prob, b, 1.0),
        )
    }

    /// `(h0, h1)` for keeping `lr` whole against cutting it into `l | r`,
    /// with `lr` removed from `freq`
    pub fn split_odds<U: Fn(usize) -> f64 + Copy>(
        &self,
        freq: &ChunkCounts<Chunk>,
        unit_prob: U,
        lr: &Chunk,
        l: &Chunk,
        r: &Chunk,
    ) -> (f64, f64) {
        (
            self.prob(freq, unit_prob, lr, 0.0),
            self.prob(freq, unit_prob, l, 0.0) * self.prob(freq, unit_prob, r, 1.0),
        )
    }
}

/// Choose between a joined chunk (weight `together`) and a boundary
/// (weight `apart`). Sampling draws in proportion; MAP decoding takes the
/// heavier side, joining on ties.
pub fn keeps_boundary(annealer: &Annealer, together: f64, apart: f64, rng: &mut SmallRng) -> bool {
    match annealer {
        Annealer::MaximumPosterior => apart > together,
        Annealer::Simulated { .. } => rng.random::<f64>() * (together + apart) >= together,
    }
}

/// What the chunks of a model are made of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Units {
    /// Latent states of the tokens
    States,
    /// Observed words of the tokens
    Words,
}

#[inline]
fn chunk_of(corpus: &Corpus, shard: &LatentShard, units: Units, r: Range<usize>) -> Chunk {
    match units {
        Units::States => Chunk::new(shard.states(r)),
        Units::Words => Chunk::new(&corpus.words()[r]),
    }
}

/// Chunk around the token being resampled, with its neighbors
#[derive(Debug, Clone)]
pub(crate) struct Window {
    pub(crate) aa: Chunk,
    pub(crate) a: Chunk,
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) c: Chunk,
    pub(crate) b: Chunk,
    pub(crate) b_end: usize,
    pub(crate) bb: Chunk,
    pub(crate) bb_end: usize,
}

/// Last token of the chunk that starts at `from`
fn chunk_end(corpus: &Corpus, shard: &LatentShard, from: usize) -> usize {
    let mut j = from;
    while !shard.segment(j) && !corpus.is_sentence_end(j) {
        j += 1;
    }
    j
}

/// Chunk starting at `from` if it is inside the shard and in `sentence`
pub(crate) fn lookahead(
    corpus: &Corpus,
    shard: &LatentShard,
    units: Units,
    from: usize,
    sentence: usize,
) -> (Chunk, usize) {
    if from >= shard.range().end || corpus.sentence(from) != sentence {
        return (Chunk::Boundary, from);
    }
    let end = chunk_end(corpus, shard, from);
    (chunk_of(corpus, shard, units, from..(end + 1)), end)
}

impl Window {
    pub(crate) fn open(
        corpus: &Corpus,
        shard: &LatentShard,
        units: Units,
        start: usize,
        aa: Chunk,
        a: Chunk,
    ) -> Self {
        let sentence = corpus.sentence(start);
        let end = chunk_end(corpus, shard, start);
        let c = chunk_of(corpus, shard, units, start..(end + 1));
        let (b, b_end) = lookahead(corpus, shard, units, end + 1, sentence);
        let (bb, bb_end) = if b.is_boundary() {
            (Chunk::Boundary, b_end)
        } else {
            lookahead(corpus, shard, units, b_end + 1, sentence)
        };
        Window {
            aa,
            a,
            start,
            end,
            c,
            b,
            b_end,
            bb,
            bb_end,
        }
    }

    /// `a | c | b | bb` after joining `c` and `b` into `merged`; `bbb`
    /// is the chunk after `bb`
    pub(crate) fn merge(&mut self, merged: Chunk, bbb: (Chunk, usize)) {
        self.c = merged;
        self.end = self.b_end;
        self.b = std::mem::replace(&mut self.bb, bbb.0);
        self.b_end = self.bb_end;
        self.bb_end = bbb.1;
    }

    /// `a | l | r | b` after cutting `c` after token `i`
    pub(crate) fn split(&mut self, l: Chunk, r: Chunk, i: usize) {
        self.bb = std::mem::replace(&mut self.b, r);
        self.bb_end = self.b_end;
        self.b_end = self.end;
        self.c = l;
        self.end = i;
    }

    /// Chunk after `bb`, boundary if `bb` already is
    pub(crate) fn after_bb(&self, corpus: &Corpus, shard: &LatentShard, units: Units) -> (Chunk, usize) {
        if self.bb.is_boundary() {
            (Chunk::Boundary, self.bb_end)
        } else {
            lookahead(corpus, shard, units, self.bb_end + 1, corpus.sentence(self.start))
        }
    }
}

/// One sweep of the adaptor HMM over a shard
pub struct ChunkSweep<'a> {
    /// Emission strategy
    pub conditional: &'a dyn Conditional,
    /// Table layout
    pub shape: &'a ModelShape,
    /// Pseudo-counts
    pub hyper: &'a Hyper,
    /// Observed tokens
    pub corpus: &'a Corpus,
}

impl ChunkSweep<'_> {
    /// Resample segment bits and states of every token in the shard, left
    /// to right. Frozen tables are read but never updated.
    pub fn run(
        &self,
        shard: &mut LatentShard,
        mut tables: TableAccess<'_>,
        annealer: &Annealer,
        rng: &mut SmallRng,
    ) -> SweepStats {
        let corpus = self.corpus;
        let range = shard.range();
        let mut stats = SweepStats::default();
        if range.is_empty() {
            return stats;
        }

        let prior = ChunkPrior::new(self.hyper);
        let n = tables.get().state_counts.total() as f64;
        let gamma = self.hyper.gamma;
        let mut probs = vec![0.0; self.shape.num_candidates()];
        let mut w = Window::open(
            corpus,
            shard,
            Units::States,
            range.start,
            Chunk::Boundary,
            Chunk::Boundary,
        );

        for i in range.clone() {
            if shard.segment(i) {
                if let Some(t) = tables.edit() {
                    t.chunks.freq.decrement(&w.c);
                    if !w.b.is_boundary() {
                        t.chunks.freq.decrement(&w.b);
                    }
                }
                let (h0, h1) = {
                    let t = tables.get();
                    prior.merge_odds(&t.chunks.freq, |s| t.state_counts.getf([s]) / n, &w.c, &w.b)
                };
                if keeps_boundary(annealer, h0, h1, rng) {
                    if let Some(t) = tables.edit() {
                        t.chunks.freq.increment(w.c.clone());
                        if !w.b.is_boundary() {
                            t.chunks.freq.increment(w.b.clone());
                        }
                    }
                } else {
                    shard.set_segment(i, false);
                    let merged = w.c.concat(&w.b);
                    let bbb = w.after_bb(corpus, shard, Units::States);
                    if let Some(t) = tables.edit() {
                        t.chunks.freq.increment(merged.clone());
                        t.chunks
                            .merge_links(&w.c, &w.b, &merged, &w.aa, &w.a, &w.bb, &bbb.0);
                    }
                    w.merge(merged, bbb);
                    stats.merges += 1;
                }
            } else {
                if let Some(t) = tables.edit() {
                    t.chunks.freq.decrement(&w.c);
                }
                let l = Chunk::new(shard.states(w.start..(i + 1)));
                let r = Chunk::new(shard.states((i + 1)..(w.end + 1)));
                let (h0, h1) = {
                    let t = tables.get();
                    prior.split_odds(&t.chunks.freq, |s| t.state_counts.getf([s]) / n, &w.c, &l, &r)
                };
                if keeps_boundary(annealer, h0, h1, rng) {
                    shard.set_segment(i, true);
                    if let Some(t) = tables.edit() {
                        t.chunks.freq.increment(l.clone());
                        t.chunks.freq.increment(r.clone());
                        t.chunks
                            .split_links(&w.c, &l, &r, &w.aa, &w.a, &w.b, &w.bb);
                    }
                    w.split(l, r, i);
                    stats.splits += 1;
                } else if let Some(t) = tables.edit() {
                    t.chunks.freq.increment(w.c.clone());
                }
            }

            // state of token i given the chunk window
            let old = shard.state(i);
            let tok = Token {
                word: corpus.word(i),
                document: corpus.document(i),
                topic: 0,
            };
            if let Some(t) = tables.edit() {
                self.conditional.remove(t, &tok, old);
                t.chunks.remove_window(&w);
            }

            let states = shard.states(w.start..(w.end + 1)).to_vec();
            let pos = i - w.start;
            {
                let t = tables.get();
                for (j, p) in probs.iter_mut().enumerate() {
                    let x = Chunk::with_state_at(&states, pos, j);
                    *p = self.conditional.emission(t, &tok, j)
                        * t.chunks.state_term(&w.aa, &w.a, &x, &w.b, &w.bb, gamma);
                }
            }

            let total = annealer.anneal(&mut probs);
            let new = sample_index(&probs, total, rng);
            if new != old {
                stats.moves += 1;
            }
            shard.set_state(i, new);
            w.c = Chunk::new(shard.states(w.start..(w.end + 1)));
            if let Some(t) = tables.edit() {
                self.conditional.add(t, &tok, new);
                t.chunks.add_window(&w);
            }

            if shard.segment(i) && i + 1 < range.end {
                let (aa, a) = if corpus.same_sentence(i, i + 1) {
                    (std::mem::replace(&mut w.a, Chunk::Boundary), w.c.clone())
                } else {
                    (Chunk::Boundary, Chunk::Boundary)
                };
                w = Window::open(corpus, shard, Units::States, i + 1, aa, a);
            }
        }
        stats.tokens = range.len();
        stats
    }
}

/// Base-10 log probability of one sentence of the adaptor HMM, given as
/// its words, states and segment bits.
///
/// Each token contributes the probability of its segment decision, of
/// its chunk given the two previous chunks, and of its word given its
/// state. The last token always closes a chunk.
pub fn sentence_log10_prob(
    words: &[usize],
    state: &[usize],
    segment: &[bool],
    tables: &CountTables,
    hyper: &Hyper,
) -> f64 {
    let prior = ChunkPrior::new(hyper);
    let chunks = &tables.chunks;
    let sc = &tables.state_counts;
    let n = sc.total() as f64;
    let unit = |s: usize| sc.getf([s]) / n;
    let mgamma = chunks.freq.types().max(1) as f64 * hyper.gamma;

    let last = words.len().saturating_sub(1);
    let spans = chunk_spans(segment, 0..words.len());
    let mut aa = Chunk::Boundary;
    let mut a = Chunk::Boundary;
    let mut llik = 0.0;
    for (ci, span) in spans.iter().enumerate() {
        let c = Chunk::new(&state[span.clone()]);
        let next = spans
            .get(ci + 1)
            .map(|s| Chunk::new(&state[s.clone()]))
            .unwrap_or(Chunk::Boundary);
        let transition = (chunks.trigram.get(&tri(&aa, &a, &c)) as f64 + hyper.gamma)
            / (chunks.bigram.get(&bi(&aa, &a)) as f64 + mgamma);
        for i in span.clone() {
            let seg = if i == last {
                1.0
            } else if !segment[i] {
                prior.prob(&chunks.freq, unit, &c, 0.0)
            } else {
                prior.prob(&chunks.freq, unit, &c, 0.0) * prior.prob(&chunks.freq, unit, &next, 1.0)
            };
            let s = state[i];
            let emission = (tables.state_by_word.getf([words[i], s]) + hyper.delta)
                / (sc.getf([s]) + hyper.wdelta);
            llik += seg.log10() + transition.log10() + emission.log10();
        }
        aa = a;
        a = c;
    }
    llik
}

/// Base-10 log likelihood of the current segmentation and states, summed
/// over sentences
pub fn log10_likelihood(
    corpus: &Corpus,
    latent: &Latent,
    tables: &CountTables,
    hyper: &Hyper,
) -> f64 {
    corpus
        .sentence_ranges(0..corpus.len())
        .into_iter()
        .map(|r| {
            sentence_log10_prob(
                &corpus.words()[r.clone()],
                &latent.state[r.clone()],
                &latent.segment[r],
                tables,
                hyper,
            )
        })
        .sum()
}
