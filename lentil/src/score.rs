//! Held-out scoring with a trained model.
//!
//! The trained count tables stay fixed. Every held-out sentence starts
//! from a random assignment and is resampled on its own for
//! `ScoreOptions::sweeps` sweeps; after burn-in, every `lag`-th sweep
//! contributes the base-10 log probability of the sentence under its
//! current assignment. A sentence's score is the mean of those samples.
//!
//! Topic and content-state proportions are local to the sentence, since a
//! held-out document has no counts in the trained tables.

use crate::chunker::{self, WordChunkSweep, WordChunks};
use crate::conditional::Token;
use crate::corpus::Corpus;
use crate::lattice::{self, ChunkSweep};
use crate::model::ModelShape;
use crate::options::{MarkovOrder, ScoreOptions};
use crate::sweep::Sampler;
use crate::tables::{CountTables, Latent, LatentShard, TableAccess};
use crate::train::Trainer;
use gibbs_util::annealer::Annealer;
use gibbs_util::categorical::sample_index;
use gibbs_util::common_io::write_tsv;
use gibbs_util::rng::{coin, stream};
use log::info;
use rand::rngs::SmallRng;
use rayon::prelude::*;
use std::time::Instant;

/// Score of one held-out sentence
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceScore {
    /// Sentence id in the held-out corpus
    pub sentence: usize,
    /// Tokens
    pub length: usize,
    /// Samples averaged
    pub samples: usize,
    /// Mean sampled log10 probability
    pub log10_prob: f64,
    /// log10 probability under add-one smoothed training unigrams
    pub unigram_log10_prob: f64,
}

impl SentenceScore {
    /// `log10_prob / length`
    pub fn per_token(&self) -> f64 {
        self.log10_prob / self.length as f64
    }

    /// `-log10_prob / unigram_log10_prob`
    pub fn normalized_by_division(&self) -> f64 {
        -(self.log10_prob / self.unigram_log10_prob)
    }

    /// `log10_prob - unigram_log10_prob`
    pub fn normalized_by_subtraction(&self) -> f64 {
        self.log10_prob - self.unigram_log10_prob
    }

    /// Syntactic log-odds ratio: the unigram-normalized score per token
    pub fn slor(&self) -> f64 {
        self.normalized_by_subtraction() / self.length as f64
    }

    /// `10^(-per_token)`
    pub fn perplexity(&self) -> f64 {
        10f64.powf(-self.per_token())
    }
}

/// Topic and content-state use of one held-out sentence
#[derive(Debug, Clone)]
struct SentenceCounts {
    topic: Vec<u32>,
    topic_total: u32,
    content: Vec<u32>,
    content_total: u32,
}

impl SentenceCounts {
    fn new(shape: &ModelShape) -> Self {
        let num_content = if shape.has_document_coupling() {
            shape.num_content
        } else {
            0
        };
        SentenceCounts {
            topic: vec![0; shape.num_topics],
            topic_total: 0,
            content: vec![0; num_content],
            content_total: 0,
        }
    }

    fn add(&mut self, state: usize, topic: usize) {
        if state < self.content.len() {
            self.content[state] += 1;
            self.content_total += 1;
        } else if state == 0 && !self.topic.is_empty() {
            self.topic[topic] += 1;
            self.topic_total += 1;
        }
    }

    fn remove(&mut self, state: usize, topic: usize) {
        if state < self.content.len() {
            self.content[state] -= 1;
            self.content_total -= 1;
        } else if state == 0 && !self.topic.is_empty() {
            self.topic[topic] -= 1;
            self.topic_total -= 1;
        }
    }
}

/// Frozen trained model plus what scoring needs from the training corpus
pub struct Scorer<'a> {
    sampler: &'a Sampler,
    tables: &'a CountTables,
    word_counts: Vec<u64>,
    num_tokens: usize,
    num_sentences: usize,
    bigram_rows: Vec<f64>,
    trigram_rows: Vec<f64>,
}

impl<'a> Scorer<'a> {
    /// Scorer over the current sample of a trainer
    pub fn new(trainer: &'a Trainer<'_>) -> Self {
        let corpus = trainer.corpus();
        let mut word_counts = vec![0; corpus.vocab_size()];
        for &w in corpus.words() {
            word_counts[w] += 1;
        }

        let tables = trainer.tables();
        let ns = trainer.sampler().shape.num_states;
        let mut bigram_rows = vec![0.0; ns];
        let mut trigram_rows = vec![0.0; ns * ns];
        for p in 0..ns {
            for s in 0..ns {
                bigram_rows[p] += tables.first_order.getf([p, s]);
                for pp in 0..ns {
                    trigram_rows[pp * ns + p] += tables.second_order.getf([pp, p, s]);
                }
            }
        }

        Scorer {
            sampler: trainer.sampler(),
            tables,
            word_counts,
            num_tokens: corpus.len(),
            num_sentences: corpus.num_sentences(),
            bigram_rows,
            trigram_rows,
        }
    }

    /// Score every sentence of `heldout`, which must have been read
    /// against the training vocabulary
    pub fn score(&self, heldout: &Corpus, opts: &ScoreOptions) -> anyhow::Result<Vec<SentenceScore>> {
        opts.validate()?;
        anyhow::ensure!(
            heldout.vocab_size() >= self.word_counts.len(),
            "held-out vocabulary ({} words) does not extend the training vocabulary ({} words)",
            heldout.vocab_size(),
            self.word_counts.len()
        );

        let tables = self.tables.with_vocab_size(heldout.vocab_size());
        let ranges = heldout.sentence_ranges(0..heldout.len());
        let mut latent = Latent::new(heldout.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.threads)
            .build()?;

        info!(
            "scoring {} sentences: {} sweeps, samples from sweep {} every {}",
            ranges.len(),
            opts.sweeps,
            opts.burn_in,
            opts.lag
        );
        let start = Instant::now();
        let scores: Vec<SentenceScore> = pool.install(|| {
            latent
                .shards(&ranges)
                .into_par_iter()
                .map(|mut shard| self.score_sentence(heldout, &tables, &mut shard, opts))
                .collect()
        });

        let total: f64 = scores.iter().map(|s| s.log10_prob).sum();
        info!(
            "held-out log10 probability {:.3} ({:.5} per token) in {:.1}s",
            total,
            total / heldout.len().max(1) as f64,
            start.elapsed().as_secs_f64()
        );
        Ok(scores)
    }

    fn score_sentence(
        &self,
        heldout: &Corpus,
        tables: &CountTables,
        shard: &mut LatentShard,
        opts: &ScoreOptions,
    ) -> SentenceScore {
        let range = shard.range();
        let sentence = heldout.sentence(range.start);
        let mut rng = stream(opts.seed, 0, sentence);
        let annealer = Annealer::simulated(1.0);
        let shape = &self.sampler.shape;

        let mut local = SentenceCounts::new(shape);
        self.initialize(heldout, shard, &mut local, &mut rng);

        let word_chunks = WordChunks::new(&self.sampler.hyper, self.num_sentences);
        let mut total = 0.0;
        let mut samples = 0;
        for sweep in 0..opts.sweeps {
            if shape.has_word_chunks() {
                let run = WordChunkSweep {
                    model: word_chunks,
                    corpus: heldout,
                };
                run.run(shard, TableAccess::Frozen(tables), &annealer, &mut rng);
            } else if shape.has_chunks() {
                let run = ChunkSweep {
                    conditional: self.sampler.conditional(),
                    shape,
                    hyper: &self.sampler.hyper,
                    corpus: heldout,
                };
                run.run(shard, TableAccess::Frozen(tables), &annealer, &mut rng);
            } else {
                self.state_sweep(heldout, tables, shard, &mut local, &annealer, &mut rng);
            }

            if opts.is_sample(sweep) {
                let words = &heldout.words()[range.clone()];
                total += if shape.has_word_chunks() {
                    chunker::sentence_log10_prob(words, shard.segments(range.clone()), tables, &word_chunks)
                } else if shape.has_chunks() {
                    lattice::sentence_log10_prob(
                        words,
                        shard.states(range.clone()),
                        shard.segments(range.clone()),
                        tables,
                        &self.sampler.hyper,
                    )
                } else {
                    self.state_log10_prob(heldout, tables, shard, &local)
                };
                samples += 1;
            }
        }

        let unigram_denom = (self.num_tokens + heldout.vocab_size()) as f64;
        let unigram_log10_prob = range
            .clone()
            .map(|i| {
                let c = self.word_counts.get(heldout.word(i)).copied().unwrap_or(0);
                ((c as f64 + 1.0) / unigram_denom).log10()
            })
            .sum();

        SentenceScore {
            sentence,
            length: range.len(),
            samples,
            log10_prob: total / samples.max(1) as f64,
            unigram_log10_prob,
        }
    }

    fn initialize(
        &self,
        heldout: &Corpus,
        shard: &mut LatentShard,
        local: &mut SentenceCounts,
        rng: &mut SmallRng,
    ) {
        let conditional = self.sampler.conditional();
        for i in shard.range() {
            let state = conditional.initial_state(rng);
            let topic = conditional.initial_topic(rng);
            shard.set_state(i, state);
            shard.set_topic(i, topic);
            shard.set_segment(i, heldout.is_sentence_end(i) || coin(rng));
            local.add(state, topic);
        }
    }

    /// Emission of candidate `j`; content states read the sentence's own
    /// content proportions
    fn emission(&self, tables: &CountTables, local: &SentenceCounts, tok: &Token, j: usize) -> f64 {
        let h = &self.sampler.hyper;
        if j < local.content.len() {
            let word = (tables.state_by_word.getf([tok.word, j]) + h.beta)
                / (tables.state_counts.getf([j]) + h.wbeta);
            word * (local.content[j] as f64 + h.alpha) / (local.content_total as f64 + h.calpha)
        } else {
            self.sampler.conditional().emission(tables, tok, j)
        }
    }

    /// One left-to-right pass over a sentence of a state model, counting
    /// into `local` only
    fn state_sweep(
        &self,
        heldout: &Corpus,
        tables: &CountTables,
        shard: &mut LatentShard,
        local: &mut SentenceCounts,
        annealer: &Annealer,
        rng: &mut SmallRng,
    ) {
        let sampler = self.sampler;
        let shape = &sampler.shape;
        let alpha = sampler.hyper.alpha;
        let b = shape.boundary();
        let mut probs = vec![0.0; shape.num_candidates()];
        let mut topic_probs = vec![0.0; shape.num_topics];
        let (mut pprev, mut prev) = (b, b);

        for i in shard.range() {
            let old = shard.state(i);
            let mut tok = Token {
                word: heldout.word(i),
                document: heldout.document(i),
                topic: shard.topic(i),
            };
            local.remove(old, tok.topic);

            if shape.has_topics() {
                for (k, p) in topic_probs.iter_mut().enumerate() {
                    let word = if old == 0 {
                        sampler
                            .conditional()
                            .emission(tables, &Token { topic: k, ..tok }, 0)
                    } else {
                        1.0
                    };
                    *p = (local.topic[k] as f64 + alpha) * word;
                }
                let total = annealer.anneal(&mut topic_probs);
                tok.topic = sample_index(&topic_probs, total, rng);
            }

            let (next, nnext) = sampler.lookahead(heldout, shard, i);
            for (j, p) in probs.iter_mut().enumerate() {
                *p = self.emission(tables, local, &tok, j)
                    * sampler.markov_term(tables, pprev, prev, j, next, nnext);
            }
            let total = annealer.anneal(&mut probs);
            let new = sample_index(&probs, total, rng);

            shard.set_state(i, new);
            shard.set_topic(i, tok.topic);
            local.add(new, tok.topic);
            pprev = prev;
            prev = new;
        }
    }

    /// `Σ log10 P(s_i | history) P(w_i | s_i)` over a sentence of a state
    /// model. The topic state emits the sentence's topic mixture.
    fn state_log10_prob(
        &self,
        heldout: &Corpus,
        tables: &CountTables,
        shard: &LatentShard,
        local: &SentenceCounts,
    ) -> f64 {
        let sampler = self.sampler;
        let shape = &sampler.shape;
        let h = &sampler.hyper;
        let ns = shape.num_states;
        let b = shape.boundary();
        let (mut pprev, mut prev) = (b, b);
        let mut llik = 0.0;

        for i in shard.range() {
            let s = shard.state(i);
            let transition = match shape.order {
                MarkovOrder::Bigram => {
                    (tables.first_order.getf([prev, s]) + h.gamma)
                        / (self.bigram_rows[prev] + h.sgamma)
                }
                MarkovOrder::Trigram => {
                    (tables.second_order.getf([pprev, prev, s]) + h.gamma)
                        / (self.trigram_rows[pprev * ns + prev] + h.sgamma)
                }
            };
            let tok = Token {
                word: heldout.word(i),
                document: heldout.document(i),
                topic: shard.topic(i),
            };
            let emission = if shape.has_topics() && s == 0 {
                let denom = local.topic_total as f64 + shape.num_topics as f64 * h.alpha;
                (0..shape.num_topics)
                    .map(|k| {
                        (local.topic[k] as f64 + h.alpha) / denom
                            * sampler.conditional().emission(tables, &Token { topic: k, ..tok }, 0)
                    })
                    .sum()
            } else {
                self.emission(tables, local, &tok, s)
            };
            llik += (transition * emission).log10();
            pprev = prev;
            prev = s;
        }
        llik
    }
}

/// One line per held-out sentence with its score and the derived
/// normalizations
pub fn write_scores(scores: &[SentenceScore], output_file: &str) -> anyhow::Result<()> {
    let mut rows: Vec<Vec<String>> = Vec::with_capacity(scores.len() + 1);
    rows.push(
        [
            "sentence",
            "length",
            "samples",
            "logprob",
            "unigram_logprob",
            "mean_logprob",
            "norm_logprob_div",
            "norm_logprob_sub",
            "slor",
            "ppl",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
    );
    for s in scores {
        rows.push(vec![
            s.sentence.to_string(),
            s.length.to_string(),
            s.samples.to_string(),
            format!("{:.6}", s.log10_prob),
            format!("{:.6}", s.unigram_log10_prob),
            format!("{:.6}", s.per_token()),
            format!("{:.6}", s.normalized_by_division()),
            format!("{:.6}", s.normalized_by_subtraction()),
            format!("{:.6}", s.slor()),
            format!("{:.6}", s.perplexity()),
        ]);
    }
    write_tsv(&rows, output_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{CorpusBuilder, UNKNOWN_WORD};
    use crate::options::{ModelKind, TrainOptions};
    use approx::assert_relative_eq;

    fn training() -> Corpus {
        let mut b = CorpusBuilder::new();
        for _ in 0..3 {
            b.start_document();
            b.push_sentence(&["the", "dog", "runs"]);
            b.push_sentence(&["a", "cat", "sleeps", "here"]);
            b.push_sentence(&["the", "cat", "runs"]);
        }
        b.build()
    }

    fn heldout(vocab: &[Box<str>]) -> Corpus {
        let mut b = CorpusBuilder::with_vocab(vocab);
        b.push_sentence(&["the", "dog", "sleeps"]);
        b.push_sentence(&["a", "zebra", "runs", "here"]);
        b.build()
    }

    fn quick() -> ScoreOptions {
        ScoreOptions {
            sweeps: 12,
            burn_in: 6,
            lag: 3,
            threads: 2,
            seed: 9,
        }
    }

    fn trained<'a>(corpus: &'a Corpus, model: ModelKind, order: MarkovOrder) -> anyhow::Result<Trainer<'a>> {
        let opts = TrainOptions {
            model,
            order,
            function_states: 3,
            content_states: 2,
            topics: 2,
            iterations: 4,
            threads: 1,
            ..Default::default()
        };
        let mut trainer = Trainer::new(corpus, opts)?;
        trainer.train(None);
        Ok(trainer)
    }

    #[test]
    fn every_model_scores_held_out_text() -> anyhow::Result<()> {
        let corpus = training();
        let test = heldout(corpus.vocab());
        assert_eq!(test.word_name(test.word(4)), UNKNOWN_WORD);

        for model in [
            ModelKind::Hmm,
            ModelKind::LdaHmm,
            ModelKind::CdHmm,
            ModelKind::AdaptorHmm,
            ModelKind::Chunker,
        ] {
            for order in [MarkovOrder::Bigram, MarkovOrder::Trigram] {
                let trainer = trained(&corpus, model, order)?;
                let before = trainer.tables().clone();
                let scores = Scorer::new(&trainer).score(&test, &quick())?;

                assert_eq!(trainer.tables(), &before, "{:?}", model);
                assert_eq!(scores.len(), 2);
                assert_eq!((scores[0].length, scores[1].length), (3, 4));
                for s in &scores {
                    assert_eq!(s.samples, 2);
                    assert!(s.log10_prob.is_finite(), "{:?} {:?}", model, s);
                    assert!(s.unigram_log10_prob < 0.0);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn scores_do_not_depend_on_thread_count() -> anyhow::Result<()> {
        let corpus = training();
        let test = heldout(corpus.vocab());
        for model in [ModelKind::LdaHmm, ModelKind::AdaptorHmm] {
            let trainer = trained(&corpus, model, MarkovOrder::Trigram)?;
            let scorer = Scorer::new(&trainer);
            let one = scorer.score(&test, &ScoreOptions { threads: 1, ..quick() })?;
            let many = scorer.score(&test, &ScoreOptions { threads: 3, ..quick() })?;
            assert_eq!(one, many);
        }
        Ok(())
    }

    #[test]
    fn bigram_sentence_probability_matches_formula() -> anyhow::Result<()> {
        let corpus = training();
        let trainer = trained(&corpus, ModelKind::Hmm, MarkovOrder::Bigram)?;
        let scorer = Scorer::new(&trainer);
        let shape = trainer.sampler().shape;
        let h = trainer.sampler().hyper;
        let t = trainer.tables();
        let b = shape.boundary();

        // "the dog" as states 1, 0
        let test = {
            let mut builder = CorpusBuilder::with_vocab(corpus.vocab());
            builder.push_sentence(&["the", "dog"]);
            builder.build()
        };
        let mut latent = Latent::new(2);
        latent.state = vec![1, 0];
        let shard = latent.whole();
        let local = SentenceCounts::new(&shape);
        let tables = t.with_vocab_size(test.vocab_size());
        let llik = scorer.state_log10_prob(&test, &tables, &shard, &local);

        let row = |p: usize| (0..shape.num_states).map(|s| t.first_order.getf([p, s])).sum::<f64>();
        let emit = |w: usize, s: usize| {
            (t.state_by_word.getf([w, s]) + h.delta) / (t.state_counts.getf([s]) + h.wdelta)
        };
        let (the, dog) = (test.word(0), test.word(1));
        let expected = ((t.first_order.getf([b, 1]) + h.gamma) / (row(b) + h.sgamma) * emit(the, 1)).log10()
            + ((t.first_order.getf([1, 0]) + h.gamma) / (row(1) + h.sgamma) * emit(dog, 0)).log10();
        assert_relative_eq!(llik, expected, max_relative = 1e-12);
        Ok(())
    }

    #[test]
    fn derived_columns() {
        let s = SentenceScore {
            sentence: 0,
            length: 4,
            samples: 10,
            log10_prob: -8.0,
            unigram_log10_prob: -10.0,
        };
        assert_relative_eq!(s.per_token(), -2.0);
        assert_relative_eq!(s.normalized_by_division(), -0.8);
        assert_relative_eq!(s.normalized_by_subtraction(), 2.0);
        assert_relative_eq!(s.slor(), 0.5);
        assert_relative_eq!(s.perplexity(), 100.0, max_relative = 1e-12);
    }

    #[test]
    fn writes_one_row_per_sentence() -> anyhow::Result<()> {
        let corpus = training();
        let test = heldout(corpus.vocab());
        let trainer = trained(&corpus, ModelKind::Chunker, MarkovOrder::Bigram)?;
        let scores = Scorer::new(&trainer).score(&test, &quick())?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("heldout.scores.tsv");
        let path = path.to_str().unwrap();
        write_scores(&scores, path)?;
        let lines = std::fs::read_to_string(path)?;
        let lines: Vec<&str> = lines.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("sentence\tlength\tsamples\tlogprob"));
        assert!(lines[2].starts_with("1\t4\t2\t"));
        Ok(())
    }
}
