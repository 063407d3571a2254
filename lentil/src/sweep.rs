//! Single-threaded Gibbs sweep.
//!
//! One pass over a token range, strictly left to right. For each token:
//! remove its counts, resolve the Markov context, score every candidate
//! state, anneal, draw, and add the counts back.
//!
//! The context is asymmetric: `prev` and `pprev` are the
//! states drawn earlier in this same pass, while `next` and `nnext` are
//! read from the latent array and so still hold the previous pass's
//! values.

use crate::chunker::{self, WordChunkSweep, WordChunks};
use crate::conditional::{strategy, Conditional, Token};
use crate::corpus::Corpus;
use crate::lattice::{self, ChunkSweep, ChunkTables};
use crate::model::{Hyper, ModelShape};
use crate::options::MarkovOrder;
use crate::tables::{CountTables, Latent, LatentShard, TableAccess};
use gibbs_util::annealer::Annealer;
use gibbs_util::categorical::sample_index;
use gibbs_util::rng::{coin, stream};
use rand::rngs::SmallRng;

/// What a sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Tokens visited
    pub tokens: usize,
    /// Tokens whose state changed
    pub moves: usize,
    /// Chunk merges
    pub merges: usize,
    /// Chunk splits
    pub splits: usize,
}

impl SweepStats {
    /// Add another sweep's numbers
    pub fn accumulate(&mut self, other: &SweepStats) {
        self.tokens += other.tokens;
        self.moves += other.moves;
        self.merges += other.merges;
        self.splits += other.splits;
    }
}

/// Collapsed Gibbs sampler for one model family
pub struct Sampler {
    /// Table layout
    pub shape: ModelShape,
    /// Pseudo-counts
    pub hyper: Hyper,
    conditional: Box<dyn Conditional>,
}

impl Sampler {
    /// Sampler with the emission strategy of `shape.kind`
    pub fn new(shape: ModelShape, hyper: Hyper) -> Self {
        let conditional = strategy(&shape, &hyper);
        Sampler {
            shape,
            hyper,
            conditional,
        }
    }

    /// Emission strategy
    pub fn conditional(&self) -> &dyn Conditional {
        self.conditional.as_ref()
    }

    /// Zero tables for this model
    pub fn empty_tables(&self) -> CountTables {
        CountTables::zeros(&self.shape)
    }

    /// Random assignments for every token, counted into `tables`
    pub fn initialize_random(
        &self,
        corpus: &Corpus,
        latent: &mut Latent,
        tables: &mut CountTables,
        rng: &mut SmallRng,
    ) {
        let b = self.shape.boundary();
        let (mut pprev, mut prev) = (b, b);
        for i in 0..corpus.len() {
            if corpus.is_sentence_start(i) {
                pprev = b;
                prev = b;
            }
            let topic = self.conditional.initial_topic(rng);
            let state = self.conditional.initial_state(rng);
            latent.topic[i] = topic;
            latent.state[i] = state;
            let tok = Token {
                word: corpus.word(i),
                document: corpus.document(i),
                topic,
            };
            self.conditional.add(tables, &tok, state);

            if self.shape.has_chunks() {
                latent.segment[i] = corpus.is_sentence_end(i) || coin(rng);
            } else {
                tables.add_transition(pprev, prev, state);
                latent.second[i] = pprev;
                latent.first[i] = prev;
            }
            pprev = prev;
            prev = state;
        }
        if self.shape.has_chunks() {
            tables.chunks = self.chunk_tables(corpus, latent);
        }
    }

    /// Count tables implied by the latent arrays, from scratch
    pub fn recount(&self, corpus: &Corpus, latent: &Latent) -> CountTables {
        let mut tables = self.empty_tables();
        for i in 0..corpus.len() {
            let tok = Token {
                word: corpus.word(i),
                document: corpus.document(i),
                topic: latent.topic[i],
            };
            self.conditional.add(&mut tables, &tok, latent.state[i]);
            if self.shape.has_state_transitions() {
                tables.add_transition(latent.second[i], latent.first[i], latent.state[i]);
            }
        }
        if self.shape.has_chunks() {
            tables.chunks = self.chunk_tables(corpus, latent);
        }
        tables
    }

    /// Chunk tables implied by the segment bits, over words for the word
    /// segmenter and over states otherwise
    pub fn chunk_tables(&self, corpus: &Corpus, latent: &Latent) -> ChunkTables {
        if self.shape.has_word_chunks() {
            chunker::rebuild(corpus, &latent.segment, 0..corpus.len())
        } else {
            ChunkTables::rebuild(corpus, &latent.state, &latent.segment, 0..corpus.len())
        }
    }

    /// Base-10 log likelihood of a chunk model's current sample, `None`
    /// for models without chunks
    pub fn log10_likelihood(
        &self,
        corpus: &Corpus,
        latent: &Latent,
        tables: &CountTables,
    ) -> Option<f64> {
        if self.shape.has_word_chunks() {
            Some(chunker::log10_likelihood(corpus, latent, tables, &self.hyper))
        } else if self.shape.has_chunks() {
            Some(lattice::log10_likelihood(corpus, latent, tables, &self.hyper))
        } else {
            None
        }
    }

    /// Markov factor of candidate `j` between `pprev, prev` and
    /// `next, nnext`
    pub fn markov_term(
        &self,
        tables: &CountTables,
        pprev: usize,
        prev: usize,
        j: usize,
        next: usize,
        nnext: usize,
    ) -> f64 {
        let g = self.hyper.gamma;
        let sg = self.hyper.sgamma;
        let first = &tables.first_order;
        match self.shape.order {
            MarkovOrder::Bigram => {
                (first.getf([prev, j]) + g) * (first.getf([j, next]) + g)
                    / (tables.state_counts.getf([j]) + sg)
            }
            MarkovOrder::Trigram => {
                let second = &tables.second_order;
                (second.getf([pprev, prev, j]) + g)
                    * ((second.getf([prev, j, next]) + g) / (first.getf([prev, j]) + sg))
                    * ((second.getf([j, next, nnext]) + g) / (first.getf([j, next]) + sg))
            }
        }
    }

    /// `(next, nnext)` of token `i` as currently stored in the shard,
    /// boundary outside the shard or the sentence
    pub fn lookahead(&self, corpus: &Corpus, shard: &LatentShard, i: usize) -> (usize, usize) {
        let b = self.shape.boundary();
        let end = shard.range().end;
        let next = if i + 1 < end && corpus.same_sentence(i, i + 1) {
            shard.state(i + 1)
        } else {
            b
        };
        let nnext = if next != b && i + 2 < end && corpus.same_sentence(i, i + 2) {
            shard.state(i + 2)
        } else {
            b
        };
        (next, nnext)
    }

    /// One pass over the shard's tokens
    pub fn sweep(
        &self,
        corpus: &Corpus,
        shard: &mut LatentShard,
        tables: &mut CountTables,
        annealer: &Annealer,
        rng: &mut SmallRng,
    ) -> anyhow::Result<SweepStats> {
        let range = shard.range();
        anyhow::ensure!(
            range.end <= corpus.len(),
            "shard {:?} exceeds the corpus ({} tokens)",
            range,
            corpus.len()
        );

        if self.shape.has_word_chunks() {
            let chunk_sweep = WordChunkSweep {
                model: WordChunks::new(&self.hyper, corpus.num_sentences()),
                corpus,
            };
            return Ok(chunk_sweep.run(shard, TableAccess::Live(tables), annealer, rng));
        }
        if self.shape.has_chunks() {
            let chunk_sweep = ChunkSweep {
                conditional: self.conditional(),
                shape: &self.shape,
                hyper: &self.hyper,
                corpus,
            };
            return Ok(chunk_sweep.run(shard, TableAccess::Live(tables), annealer, rng));
        }

        let b = self.shape.boundary();
        let mut probs = vec![0.0; self.shape.num_candidates()];
        let mut topic_probs = vec![0.0; self.shape.num_topics];
        let mut stats = SweepStats::default();
        let (mut pprev, mut prev) = (b, b);

        for i in range.clone() {
            if corpus.is_sentence_start(i) {
                pprev = b;
                prev = b;
            }
            let old = shard.state(i);
            let mut tok = Token {
                word: corpus.word(i),
                document: corpus.document(i),
                topic: shard.topic(i),
            };
            let (old_pprev, old_prev) = shard.history(i);
            self.conditional.remove(tables, &tok, old);
            tables.remove_transition(old_pprev, old_prev, old);

            tok.topic = self.conditional.resample_topic(
                tables,
                &tok,
                old,
                annealer,
                rng,
                &mut topic_probs,
            );

            let (next, nnext) = self.lookahead(corpus, shard, i);
            for (j, p) in probs.iter_mut().enumerate() {
                *p = self.conditional.emission(tables, &tok, j)
                    * self.markov_term(tables, pprev, prev, j, next, nnext);
            }
            let total = annealer.anneal(&mut probs);
            let new = sample_index(&probs, total, rng);

            if new != old {
                stats.moves += 1;
            }
            shard.set_state(i, new);
            shard.set_topic(i, tok.topic);
            self.conditional.add(tables, &tok, new);
            tables.add_transition(pprev, prev, new);
            shard.set_history(i, pprev, prev);

            pprev = prev;
            prev = new;
        }
        stats.tokens = range.len();
        Ok(stats)
    }

    /// Sweep the whole corpus on the current thread with the stream of
    /// worker 0
    pub fn sequential_sweep(
        &self,
        corpus: &Corpus,
        latent: &mut Latent,
        tables: &mut CountTables,
        annealer: &Annealer,
        seed: u64,
        sweep: usize,
    ) -> anyhow::Result<SweepStats> {
        let mut rng = stream(seed, sweep, 0);
        let mut shard = latent.whole();
        self.sweep(corpus, &mut shard, tables, annealer, &mut rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ModelKind, TrainOptions};
    use rand::SeedableRng;

    fn sampler_for(corpus: &Corpus, opts: &TrainOptions) -> Sampler {
        let shape = ModelShape::new(opts, corpus);
        Sampler::new(shape, Hyper::new(opts, &shape))
    }

    fn small_corpus() -> Corpus {
        // three documents, five sentences
        let word = vec![0, 1, 2, 3, 0, 4, 1, 2, 5, 0, 1, 3, 4, 2];
        let document = vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 2, 2, 2, 2];
        let sentence = vec![0, 0, 0, 1, 1, 2, 2, 2, 3, 3, 4, 4, 4, 4];
        Corpus::from_ids(word, document, sentence, 6).unwrap()
    }

    #[test]
    fn random_init_counts_every_token() {
        let corpus = Corpus::from_ids(vec![1, 2, 3], vec![0; 3], vec![0; 3], 4).unwrap();
        let opts = TrainOptions {
            function_states: 2,
            ..Default::default()
        };
        let sampler = sampler_for(&corpus, &opts);
        assert_eq!(sampler.shape.num_states, 3);

        let mut latent = Latent::new(corpus.len());
        let mut tables = sampler.empty_tables();
        let mut rng = SmallRng::seed_from_u64(42);
        sampler.initialize_random(&corpus, &mut latent, &mut tables, &mut rng);

        assert_eq!(tables.state_counts.total(), 3);
        assert!(latent.state.iter().all(|&s| s < sampler.shape.boundary()));
        assert_eq!(tables.first_order.total(), 3);
        assert_eq!(tables, sampler.recount(&corpus, &latent));
    }

    #[test]
    fn sweeps_conserve_counts() {
        let corpus = small_corpus();
        for model in [
            ModelKind::Hmm,
            ModelKind::LdaHmm,
            ModelKind::CdHmm,
            ModelKind::AdaptorHmm,
            ModelKind::Chunker,
        ] {
            for order in [MarkovOrder::Bigram, MarkovOrder::Trigram] {
                let opts = TrainOptions {
                    model,
                    order,
                    function_states: 3,
                    content_states: 2,
                    topics: 3,
                    ..Default::default()
                };
                let sampler = sampler_for(&corpus, &opts);
                let mut latent = Latent::new(corpus.len());
                let mut tables = sampler.empty_tables();
                let mut rng = SmallRng::seed_from_u64(42);
                sampler.initialize_random(&corpus, &mut latent, &mut tables, &mut rng);

                let annealer = Annealer::simulated(1.0);
                for sweep in 0..5 {
                    let stats = sampler
                        .sequential_sweep(&corpus, &mut latent, &mut tables, &annealer, 7, sweep)
                        .unwrap();
                    assert_eq!(stats.tokens, corpus.len());
                }

                assert_eq!(tables.state_counts.total(), corpus.len() as u64);
                if sampler.shape.has_topics() {
                    assert_eq!(
                        tables.state_by_word.total() + tables.topic_by_word.total(),
                        corpus.len() as u64
                    );
                } else {
                    assert_eq!(tables.state_by_word.total(), corpus.len() as u64);
                }
                assert_eq!(tables, sampler.recount(&corpus, &latent), "{:?}", model);
            }
        }
    }

    #[test]
    fn history_holds_this_pass_and_lookahead_the_last() {
        let corpus = small_corpus();
        let opts = TrainOptions {
            function_states: 4,
            ..Default::default()
        };
        let sampler = sampler_for(&corpus, &opts);
        let b = sampler.shape.boundary();
        let mut latent = Latent::new(corpus.len());
        let mut tables = sampler.empty_tables();
        let mut rng = SmallRng::seed_from_u64(1);
        sampler.initialize_random(&corpus, &mut latent, &mut tables, &mut rng);
        sampler
            .sequential_sweep(&corpus, &mut latent, &mut tables, &Annealer::simulated(1.0), 3, 0)
            .unwrap();

        // the recorded history of every token is the freshly drawn state of
        // its predecessors
        for i in 0..corpus.len() {
            let prev = if corpus.is_sentence_start(i) {
                b
            } else {
                latent.state[i - 1]
            };
            let pprev = if corpus.is_sentence_start(i) || corpus.is_sentence_start(i - 1) {
                b
            } else {
                latent.state[i - 2]
            };
            assert_eq!((latent.second[i], latent.first[i]), (pprev, prev), "token {}", i);
        }

        // the lookahead reads whatever is stored right now
        latent.state[1] = 3;
        latent.state[2] = 2;
        let shard = latent.whole();
        assert_eq!(sampler.lookahead(&corpus, &shard, 0), (3, 2));
        assert_eq!(sampler.lookahead(&corpus, &shard, 1), (2, b));
        assert_eq!(sampler.lookahead(&corpus, &shard, 2), (b, b));
        assert_eq!(sampler.lookahead(&corpus, &shard, 13), (b, b));
    }

    #[test]
    fn map_decoding_is_deterministic() {
        let corpus = small_corpus();
        for model in [ModelKind::Hmm, ModelKind::AdaptorHmm, ModelKind::Chunker] {
            let opts = TrainOptions {
                model,
                function_states: 3,
                ..Default::default()
            };
            let sampler = sampler_for(&corpus, &opts);
            let mut latent = Latent::new(corpus.len());
            let mut tables = sampler.empty_tables();
            let mut rng = SmallRng::seed_from_u64(5);
            sampler.initialize_random(&corpus, &mut latent, &mut tables, &mut rng);

            let map = Annealer::MaximumPosterior;
            let decoded: Vec<_> = [1, 99, 12345]
                .into_iter()
                .map(|seed| {
                    let mut l = latent.clone();
                    let mut t = tables.clone();
                    for sweep in 0..2 {
                        sampler
                            .sequential_sweep(&corpus, &mut l, &mut t, &map, seed, sweep)
                            .unwrap();
                    }
                    (l, t)
                })
                .collect();
            for (l, t) in &decoded[1..] {
                assert_eq!(l.state, decoded[0].0.state, "{:?}", model);
                assert_eq!(l.segment, decoded[0].0.segment, "{:?}", model);
                assert_eq!(t, &decoded[0].1, "{:?}", model);
            }
        }
    }

    #[test]
    fn bigram_term_matches_formula() {
        let corpus = small_corpus();
        let opts = TrainOptions {
            order: MarkovOrder::Bigram,
            function_states: 2,
            ..Default::default()
        };
        let sampler = sampler_for(&corpus, &opts);
        let mut tables = sampler.empty_tables();
        tables.add_transition(2, 2, 0);
        tables.add_transition(2, 0, 1);
        tables.state_counts.increment([0]);
        tables.state_counts.increment([1]);
        // first[2,0] = 1, first[0,1] = 1, stateCounts[0] = 1, S gamma = 0.3
        let p = sampler.markov_term(&tables, 2, 2, 0, 1, 2);
        assert!((p - 1.1 * 1.1 / 1.3).abs() < 1e-12);
    }
}
