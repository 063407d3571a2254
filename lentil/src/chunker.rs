//! Bayesian word segmenter.
//!
//! Chunks are runs of words and a sentence is a bigram chain of chunks
//! that starts after the boundary chunk. Chunk `b` follows chunk `a` with
//! probability
//!
//! `(n(a, b) + β P(b)) / (n(a) + β · types)`
//!
//! where `P(b)` is the [`ChunkPrior`] probability of `b` over smoothed
//! word unigrams and the boundary chunk is counted once per sentence. A
//! sweep resamples segment bits only; every token keeps the one state, so
//! that state's emission counts are the word unigram counts.

use crate::corpus::Corpus;
use crate::lattice::{bi, keeps_boundary, ChunkPrior, ChunkTables, Units, Window};
use crate::model::Hyper;
use crate::sweep::SweepStats;
use crate::tables::{CountTables, Latent, LatentShard, TableAccess};
use gibbs_util::annealer::Annealer;
use gibbs_util::chunk::{Chunk, ChunkCounts};
use rand::rngs::SmallRng;
use std::ops::Range;

/// Chunk bigram model over words
#[derive(Debug, Clone, Copy)]
pub struct WordChunks {
    prior: ChunkPrior,
    beta: f64,
    delta: f64,
    wdelta: f64,
    sentences: f64,
}

impl WordChunks {
    /// Model trained on a corpus of `num_sentences` sentences
    pub fn new(hyper: &Hyper, num_sentences: usize) -> Self {
        WordChunks {
            prior: ChunkPrior::new(hyper),
            beta: hyper.beta,
            delta: hyper.delta,
            wdelta: hyper.wdelta,
            sentences: num_sentences as f64,
        }
    }

    /// `P(b | a)`; the boundary follows anything with probability 1
    pub fn transition(&self, tables: &CountTables, a: &Chunk, b: &Chunk) -> f64 {
        if b.is_boundary() {
            return 1.0;
        }
        let chunks = &tables.chunks;
        let n = tables.state_counts.getf([0]);
        let unit = |w: usize| (tables.state_by_word.getf([w, 0]) + self.delta) / (n + self.wdelta);
        let context = if a.is_boundary() {
            self.sentences
        } else {
            chunks.freq.get(a) as f64
        };
        let types = chunks.freq.types().max(1) as f64;
        (chunks.bigram.get(&bi(a, b)) as f64 + self.beta * self.prior.prob(&chunks.freq, unit, b, 0.0))
            / (context + self.beta * types)
    }

    /// `(h0, h1)` for `a | cb | bb` against `a | c | b | bb`, with the
    /// chunks and links of the window removed from `tables`
    pub fn merge_odds(
        &self,
        tables: &CountTables,
        a: &Chunk,
        c: &Chunk,
        b: &Chunk,
        bb: &Chunk,
    ) -> (f64, f64) {
        if b.is_boundary() {
            return (0.0, 1.0);
        }
        let cb = c.concat(b);
        (
            self.transition(tables, a, &cb) * self.transition(tables, &cb, bb),
            self.transition(tables, a, c)
                * self.transition(tables, c, b)
                * self.transition(tables, b, bb),
        )
    }

    /// `(h0, h1)` for `a | lr | b` against `a | l | r | b`
    pub fn split_odds(
        &self,
        tables: &CountTables,
        a: &Chunk,
        lr: &Chunk,
        l: &Chunk,
        r: &Chunk,
        b: &Chunk,
    ) -> (f64, f64) {
        (
            self.transition(tables, a, lr) * self.transition(tables, lr, b),
            self.transition(tables, a, l)
                * self.transition(tables, l, r)
                * self.transition(tables, r, b),
        )
    }
}

/// Links into the boundary are not stored
fn link(chunks: &mut ChunkTables, x: &Chunk, y: &Chunk) {
    if !y.is_boundary() {
        chunks.bigram.increment(bi(x, y));
    }
}

fn unlink(chunks: &mut ChunkTables, x: &Chunk, y: &Chunk) {
    if !y.is_boundary() {
        chunks.bigram.decrement(&bi(x, y));
    }
}

/// Chunk and chunk-bigram counts of `range` from scratch
pub fn rebuild(corpus: &Corpus, segment: &[bool], range: Range<usize>) -> ChunkTables {
    ChunkTables {
        trigram: ChunkCounts::new(),
        ..ChunkTables::rebuild(corpus, corpus.words(), segment, range)
    }
}

/// One sweep of the word segmenter over a shard
pub struct WordChunkSweep<'a> {
    /// Transition model
    pub model: WordChunks,
    /// Observed tokens
    pub corpus: &'a Corpus,
}

impl WordChunkSweep<'_> {
    /// Resample the segment bit after every token in the shard, left to
    /// right. Frozen tables are read but never updated.
    pub fn run(
        &self,
        shard: &mut LatentShard,
        mut tables: TableAccess<'_>,
        annealer: &Annealer,
        rng: &mut SmallRng,
    ) -> SweepStats {
        let corpus = self.corpus;
        let words = corpus.words();
        let range = shard.range();
        let mut stats = SweepStats::default();
        if range.is_empty() {
            return stats;
        }

        let mut w = Window::open(
            corpus,
            shard,
            Units::Words,
            range.start,
            Chunk::Boundary,
            Chunk::Boundary,
        );

        for i in range.clone() {
            if shard.segment(i) {
                if let Some(t) = tables.edit() {
                    let chunks = &mut t.chunks;
                    chunks.freq.decrement(&w.c);
                    unlink(chunks, &w.a, &w.c);
                    if !w.b.is_boundary() {
                        chunks.freq.decrement(&w.b);
                        unlink(chunks, &w.c, &w.b);
                        unlink(chunks, &w.b, &w.bb);
                    }
                }
                let (h0, h1) = self.model.merge_odds(tables.get(), &w.a, &w.c, &w.b, &w.bb);
                if keeps_boundary(annealer, h0, h1, rng) {
                    if let Some(t) = tables.edit() {
                        let chunks = &mut t.chunks;
                        chunks.freq.increment(w.c.clone());
                        link(chunks, &w.a, &w.c);
                        if !w.b.is_boundary() {
                            chunks.freq.increment(w.b.clone());
                            link(chunks, &w.c, &w.b);
                            link(chunks, &w.b, &w.bb);
                        }
                    }
                } else {
                    shard.set_segment(i, false);
                    let merged = w.c.concat(&w.b);
                    let bbb = w.after_bb(corpus, shard, Units::Words);
                    if let Some(t) = tables.edit() {
                        let chunks = &mut t.chunks;
                        chunks.freq.increment(merged.clone());
                        link(chunks, &w.a, &merged);
                        link(chunks, &merged, &w.bb);
                    }
                    w.merge(merged, bbb);
                    stats.merges += 1;
                }
            } else {
                if let Some(t) = tables.edit() {
                    let chunks = &mut t.chunks;
                    chunks.freq.decrement(&w.c);
                    unlink(chunks, &w.a, &w.c);
                    unlink(chunks, &w.c, &w.b);
                }
                let l = Chunk::new(&words[w.start..(i + 1)]);
                let r = Chunk::new(&words[(i + 1)..(w.end + 1)]);
                let (h0, h1) = self.model.split_odds(tables.get(), &w.a, &w.c, &l, &r, &w.b);
                if keeps_boundary(annealer, h0, h1, rng) {
                    shard.set_segment(i, true);
                    if let Some(t) = tables.edit() {
                        let chunks = &mut t.chunks;
                        chunks.freq.increment(l.clone());
                        chunks.freq.increment(r.clone());
                        link(chunks, &w.a, &l);
                        link(chunks, &l, &r);
                        link(chunks, &r, &w.b);
                    }
                    w.split(l, r, i);
                    stats.splits += 1;
                } else if let Some(t) = tables.edit() {
                    let chunks = &mut t.chunks;
                    chunks.freq.increment(w.c.clone());
                    link(chunks, &w.a, &w.c);
                    link(chunks, &w.c, &w.b);
                }
            }

            if shard.segment(i) && i + 1 < range.end {
                let a = if corpus.same_sentence(i, i + 1) {
                    w.c.clone()
                } else {
                    Chunk::Boundary
                };
                w = Window::open(corpus, shard, Units::Words, i + 1, Chunk::Boundary, a);
            }
        }
        stats.tokens = range.len();
        stats
    }
}

/// Base-10 log probability of one segmented sentence: the chain of its
/// chunk transitions from the boundary
pub fn sentence_log10_prob(
    words: &[usize],
    segment: &[bool],
    tables: &CountTables,
    model: &WordChunks,
) -> f64 {
    let mut prev = Chunk::Boundary;
    let mut llik = 0.0;
    for span in crate::lattice::chunk_spans(segment, 0..words.len()) {
        let c = Chunk::new(&words[span]);
        llik += model.transition(tables, &prev, &c).log10();
        prev = c;
    }
    llik
}

/// Base-10 log likelihood of the current segmentation, summed over
/// sentences
pub fn log10_likelihood(corpus: &Corpus, latent: &Latent, tables: &CountTables, hyper: &Hyper) -> f64 {
    let model = WordChunks::new(hyper, corpus.num_sentences());
    corpus
        .sentence_ranges(0..corpus.len())
        .into_iter()
        .map(|r| sentence_log10_prob(&corpus.words()[r.clone()], &latent.segment[r], tables, &model))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::partition_is_valid;
    use crate::model::ModelShape;
    use crate::options::{ModelKind, TrainOptions};
    use crate::sweep::Sampler;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn ch(s: &[usize]) -> Chunk {
        Chunk::new(s)
    }

    /// "a b c" twice and "a b" once, as three sentences
    fn corpus() -> Corpus {
        Corpus::from_ids(
            vec![0, 1, 2, 0, 1, 2, 0, 1],
            vec![0; 8],
            vec![0, 0, 0, 1, 1, 1, 2, 2],
            3,
        )
        .unwrap()
    }

    fn sampler(corpus: &Corpus) -> Sampler {
        let opts = TrainOptions {
            model: ModelKind::Chunker,
            beta: 0.5,
            ..Default::default()
        };
        let shape = ModelShape::new(&opts, corpus);
        Sampler::new(shape, Hyper::new(&opts, &shape))
    }

    #[test]
    fn transition_matches_formula() {
        let corpus = corpus();
        let sampler = sampler(&corpus);
        let mut latent = Latent::new(corpus.len());
        latent.segment = vec![false, true, true, false, true, true, false, true];
        let tables = sampler.recount(&corpus, &latent);

        // chunks: [0 1] x3, [2] x2; links: B->[0 1] x3, [0 1]->[2] x2
        assert_eq!(tables.chunks.freq.get(&ch(&[0, 1])), 3);
        assert_eq!(tables.chunks.bigram.get(&(ch(&[0, 1]), ch(&[2]))), 2);
        assert_eq!(tables.chunks.trigram.tokens(), 0);

        let h = sampler.hyper;
        let model = WordChunks::new(&h, corpus.num_sentences());
        let unit = |w: usize| {
            (tables.state_by_word.getf([w, 0]) + h.delta) / (8.0 + h.wdelta)
        };
        let prior = ChunkPrior::new(&h);

        let p2 = prior.prob(&tables.chunks.freq, unit, &ch(&[2]), 0.0);
        let expected = (2.0 + 0.5 * p2) / (3.0 + 0.5 * 2.0);
        let p = model.transition(&tables, &ch(&[0, 1]), &ch(&[2]));
        assert_relative_eq!(p, expected, max_relative = 1e-12);

        // the boundary context counts one per sentence
        let p01 = prior.prob(&tables.chunks.freq, unit, &ch(&[0, 1]), 0.0);
        let expected = (3.0 + 0.5 * p01) / (3.0 + 0.5 * 2.0);
        let p = model.transition(&tables, &Chunk::Boundary, &ch(&[0, 1]));
        assert_relative_eq!(p, expected, max_relative = 1e-12);

        assert_eq!(model.transition(&tables, &ch(&[2]), &Chunk::Boundary), 1.0);

        let (h0, h1) = model.split_odds(&tables, &Chunk::Boundary, &ch(&[0, 1]), &ch(&[0]), &ch(&[1]), &ch(&[2]));
        assert_relative_eq!(
            h0,
            model.transition(&tables, &Chunk::Boundary, &ch(&[0, 1]))
                * model.transition(&tables, &ch(&[0, 1]), &ch(&[2])),
            max_relative = 1e-12
        );
        assert!(h1 > 0.0);
        assert_eq!(
            model.merge_odds(&tables, &Chunk::Boundary, &ch(&[0, 1]), &Chunk::Boundary, &Chunk::Boundary),
            (0.0, 1.0)
        );
    }

    #[test]
    fn sweeps_keep_tables_and_partition() {
        let corpus = corpus();
        let sampler = sampler(&corpus);
        let mut latent = Latent::new(corpus.len());
        let mut tables = sampler.empty_tables();
        let mut rng = SmallRng::seed_from_u64(11);
        sampler.initialize_random(&corpus, &mut latent, &mut tables, &mut rng);
        assert!(latent.state.iter().all(|&s| s == 0));

        let annealer = Annealer::simulated(1.0);
        for sweep in 0..20 {
            let stats = sampler
                .sequential_sweep(&corpus, &mut latent, &mut tables, &annealer, 5, sweep)
                .unwrap();
            assert_eq!(stats.moves, 0);
            assert!(partition_is_valid(&corpus, &latent.segment));
            assert_eq!(tables.chunks, rebuild(&corpus, &latent.segment, 0..corpus.len()));
        }
        assert_eq!(tables, sampler.recount(&corpus, &latent));

        let llik = log10_likelihood(&corpus, &latent, &tables, &sampler.hyper);
        assert!(llik.is_finite() && llik < 0.0);
    }

    #[test]
    fn frozen_sweep_leaves_counts_alone() {
        let corpus = corpus();
        let sampler = sampler(&corpus);
        let mut latent = Latent::new(corpus.len());
        let mut tables = sampler.empty_tables();
        let mut rng = SmallRng::seed_from_u64(2);
        sampler.initialize_random(&corpus, &mut latent, &mut tables, &mut rng);

        let before = tables.clone();
        let run = WordChunkSweep {
            model: WordChunks::new(&sampler.hyper, corpus.num_sentences()),
            corpus: &corpus,
        };
        let mut shard = latent.whole();
        for _ in 0..10 {
            run.run(&mut shard, TableAccess::Frozen(&tables), &Annealer::simulated(1.0), &mut rng);
        }
        assert_eq!(tables, before);
        assert!(partition_is_valid(&corpus, &latent.segment));
    }
}
