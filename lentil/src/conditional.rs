//! Emission side of the per-token conditional.
//!
//! Model families differ only in which tables a token's emission touches
//! and in the emission factor of the conditional; the Markov factor is
//! shared. Each family is one [`Conditional`] implementation.

use crate::model::{Hyper, ModelShape};
use crate::tables::CountTables;
use gibbs_util::annealer::Annealer;
use gibbs_util::categorical::sample_index;
use gibbs_util::rng::{coin, uniform};
use rand::rngs::SmallRng;

/// Observed fields of the token under resampling, plus its current topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    /// Word id
    pub word: usize,
    /// Document id
    pub document: usize,
    /// Topic assignment (0 without topics)
    pub topic: usize,
}

/// Per-family emission strategy
pub trait Conditional: Send + Sync {
    /// Remove the token's emission-side counts for `state`
    fn remove(&self, tables: &mut CountTables, tok: &Token, state: usize);

    /// Add the token's emission-side counts for `state`
    fn add(&self, tables: &mut CountTables, tok: &Token, state: usize);

    /// Unnormalized emission factor of candidate state `j`
    fn emission(&self, tables: &CountTables, tok: &Token, j: usize) -> f64;

    /// Draw a new topic for a token already removed from the tables.
    /// Families without topics keep the current one.
    fn resample_topic(
        &self,
        _tables: &CountTables,
        tok: &Token,
        _state: usize,
        _annealer: &Annealer,
        _rng: &mut SmallRng,
        _probs: &mut [f64],
    ) -> usize {
        tok.topic
    }

    /// State of a token at random initialization
    fn initial_state(&self, rng: &mut SmallRng) -> usize;

    /// Topic of a token at random initialization
    fn initial_topic(&self, _rng: &mut SmallRng) -> usize {
        0
    }
}

/// Strategy for the family in `shape`
pub fn strategy(shape: &ModelShape, hyper: &Hyper) -> Box<dyn Conditional> {
    let plain = PlainEmission {
        num_candidates: shape.num_candidates(),
        delta: hyper.delta,
        wdelta: hyper.wdelta,
    };
    if shape.has_topics() {
        Box::new(TopicEmission {
            plain,
            num_topics: shape.num_topics,
            alpha: hyper.alpha,
            beta: hyper.beta,
            wbeta: hyper.wbeta,
        })
    } else if shape.has_document_coupling() {
        Box::new(DocumentEmission {
            plain,
            num_content: shape.num_content,
            alpha: hyper.alpha,
            beta: hyper.beta,
            wbeta: hyper.wbeta,
            calpha: hyper.calpha,
        })
    } else {
        Box::new(plain)
    }
}

/// `(stateByWord[w][j] + delta) / (stateCounts[j] + W delta)`
#[derive(Debug, Clone, Copy)]
pub struct PlainEmission {
    num_candidates: usize,
    delta: f64,
    wdelta: f64,
}

impl PlainEmission {
    #[inline]
    fn prob(&self, tables: &CountTables, w: usize, j: usize) -> f64 {
        (tables.state_by_word.getf([w, j]) + self.delta)
            / (tables.state_counts.getf([j]) + self.wdelta)
    }
}

impl Conditional for PlainEmission {
    fn remove(&self, tables: &mut CountTables, tok: &Token, state: usize) {
        tables.state_by_word.decrement([tok.word, state]);
        tables.state_counts.decrement([state]);
    }

    fn add(&self, tables: &mut CountTables, tok: &Token, state: usize) {
        tables.state_by_word.increment([tok.word, state]);
        tables.state_counts.increment([state]);
    }

    fn emission(&self, tables: &CountTables, tok: &Token, j: usize) -> f64 {
        self.prob(tables, tok.word, j)
    }

    fn initial_state(&self, rng: &mut SmallRng) -> usize {
        uniform(rng, 0, self.num_candidates)
    }
}

/// HMM-LDA: state 0 emits through the token's topic, the rest are plain
#[derive(Debug, Clone, Copy)]
pub struct TopicEmission {
    plain: PlainEmission,
    num_topics: usize,
    alpha: f64,
    beta: f64,
    wbeta: f64,
}

impl TopicEmission {
    const TOPIC_STATE: usize = 0;

    #[inline]
    fn topic_word(&self, tables: &CountTables, w: usize, k: usize) -> f64 {
        (tables.topic_by_word.getf([w, k]) + self.beta)
            / (tables.topic_counts.getf([k]) + self.wbeta)
    }
}

impl Conditional for TopicEmission {
    fn remove(&self, tables: &mut CountTables, tok: &Token, state: usize) {
        if state == Self::TOPIC_STATE {
            tables.topic_by_word.decrement([tok.word, tok.topic]);
            tables.document_by_topic.decrement([tok.document, tok.topic]);
            tables.topic_counts.decrement([tok.topic]);
        } else {
            tables.state_by_word.decrement([tok.word, state]);
        }
        tables.state_counts.decrement([state]);
    }

    fn add(&self, tables: &mut CountTables, tok: &Token, state: usize) {
        if state == Self::TOPIC_STATE {
            tables.topic_by_word.increment([tok.word, tok.topic]);
            tables.document_by_topic.increment([tok.document, tok.topic]);
            tables.topic_counts.increment([tok.topic]);
        } else {
            tables.state_by_word.increment([tok.word, state]);
        }
        tables.state_counts.increment([state]);
    }

    fn emission(&self, tables: &CountTables, tok: &Token, j: usize) -> f64 {
        if j == Self::TOPIC_STATE {
            self.topic_word(tables, tok.word, tok.topic)
        } else {
            self.plain.prob(tables, tok.word, j)
        }
    }

    fn resample_topic(
        &self,
        tables: &CountTables,
        tok: &Token,
        state: usize,
        annealer: &Annealer,
        rng: &mut SmallRng,
        probs: &mut [f64],
    ) -> usize {
        for k in 0..self.num_topics {
            let doc = tables.document_by_topic.getf([tok.document, k]) + self.alpha;
            probs[k] = if state == Self::TOPIC_STATE {
                doc * self.topic_word(tables, tok.word, k)
            } else {
                doc
            };
        }
        let probs = &mut probs[..self.num_topics];
        let total = annealer.anneal(probs);
        sample_index(probs, total, rng)
    }

    fn initial_state(&self, rng: &mut SmallRng) -> usize {
        if coin(rng) {
            Self::TOPIC_STATE
        } else {
            uniform(rng, 1, self.plain.num_candidates)
        }
    }

    fn initial_topic(&self, rng: &mut SmallRng) -> usize {
        uniform(rng, 0, self.num_topics)
    }
}

/// Document-coupled HMM: content states `0..C` are weighted by how often
/// the document uses them
#[derive(Debug, Clone, Copy)]
pub struct DocumentEmission {
    plain: PlainEmission,
    num_content: usize,
    alpha: f64,
    beta: f64,
    wbeta: f64,
    calpha: f64,
}

impl Conditional for DocumentEmission {
    fn remove(&self, tables: &mut CountTables, tok: &Token, state: usize) {
        tables.state_by_word.decrement([tok.word, state]);
        tables.state_counts.decrement([state]);
        if state < self.num_content {
            tables.content_by_document.decrement([tok.document, state]);
            tables.document_counts.decrement([tok.document]);
        }
    }

    fn add(&self, tables: &mut CountTables, tok: &Token, state: usize) {
        tables.state_by_word.increment([tok.word, state]);
        tables.state_counts.increment([state]);
        if state < self.num_content {
            tables.content_by_document.increment([tok.document, state]);
            tables.document_counts.increment([tok.document]);
        }
    }

    fn emission(&self, tables: &CountTables, tok: &Token, j: usize) -> f64 {
        if j < self.num_content {
            let word = (tables.state_by_word.getf([tok.word, j]) + self.beta)
                / (tables.state_counts.getf([j]) + self.wbeta);
            let doc = (tables.content_by_document.getf([tok.document, j]) + self.alpha)
                / (tables.document_counts.getf([tok.document]) + self.calpha);
            word * doc
        } else {
            self.plain.prob(tables, tok.word, j)
        }
    }

    fn initial_state(&self, rng: &mut SmallRng) -> usize {
        if coin(rng) {
            uniform(rng, 0, self.num_content)
        } else {
            uniform(rng, self.num_content, self.plain.num_candidates)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusBuilder;
    use crate::options::{ModelKind, TrainOptions};
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn setup(model: ModelKind) -> (ModelShape, Hyper, CountTables) {
        let mut b = CorpusBuilder::new();
        b.push_sentence(&["a", "b", "c"]);
        let corpus = b.build();
        let opts = TrainOptions {
            model,
            function_states: 2,
            content_states: 2,
            topics: 3,
            ..Default::default()
        };
        let shape = ModelShape::new(&opts, &corpus);
        let hyper = Hyper::new(&opts, &shape);
        let tables = CountTables::zeros(&shape);
        (shape, hyper, tables)
    }

    #[test]
    fn topic_state_counts_go_to_topic_tables() {
        let (shape, hyper, mut tables) = setup(ModelKind::LdaHmm);
        let c = strategy(&shape, &hyper);
        let tok = Token {
            word: 1,
            document: 0,
            topic: 2,
        };
        c.add(&mut tables, &tok, 0);
        c.add(&mut tables, &tok, 1);
        assert_eq!(tables.topic_by_word.get([1, 2]), 1);
        assert_eq!(tables.document_by_topic.get([0, 2]), 1);
        assert_eq!(tables.state_by_word.total(), 1);
        assert_eq!(tables.state_counts.total(), 2);

        let e0 = c.emission(&tables, &tok, 0);
        assert_relative_eq!(e0, (1.0 + 0.1) / (1.0 + 3.0 * 0.1));

        c.remove(&mut tables, &tok, 0);
        c.remove(&mut tables, &tok, 1);
        assert_eq!(tables, CountTables::zeros(&shape));
    }

    #[test]
    fn document_coupling_only_for_content_states() {
        let (shape, hyper, mut tables) = setup(ModelKind::CdHmm);
        let c = strategy(&shape, &hyper);
        let tok = Token {
            word: 0,
            document: 0,
            topic: 0,
        };
        c.add(&mut tables, &tok, 1);
        c.add(&mut tables, &tok, 3);
        assert_eq!(tables.content_by_document.get([0, 1]), 1);
        assert_eq!(tables.document_counts.get([0]), 1);

        let e1 = c.emission(&tables, &tok, 1);
        let expected = (1.0 + 0.1) / (1.0 + 0.3) * (1.0 + 1.0) / (1.0 + 2.0);
        assert_relative_eq!(e1, expected);
        let e3 = c.emission(&tables, &tok, 3);
        assert_relative_eq!(e3, (1.0 + 0.0001) / (1.0 + 0.0003));
    }

    #[test]
    fn initial_states_avoid_boundary() {
        for model in [ModelKind::Hmm, ModelKind::LdaHmm, ModelKind::CdHmm] {
            let (shape, hyper, _) = setup(model);
            let c = strategy(&shape, &hyper);
            let mut rng = SmallRng::seed_from_u64(42);
            for _ in 0..200 {
                assert!(c.initial_state(&mut rng) < shape.boundary());
                assert!(c.initial_topic(&mut rng) < shape.num_topics.max(1));
            }
        }
    }
}
