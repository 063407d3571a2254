//! Options of a training run and of held-out scoring.
//!
//! `TrainOptions` travels inside every checkpoint, so a resumed run keeps
//! the model it was started with.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which latent variables a model carries
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    /// Plain HMM over function states
    Hmm,
    /// HMM whose state 0 emits through document topics
    LdaHmm,
    /// HMM whose content states are coupled to the document
    CdHmm,
    /// HMM whose transitions run over variable-length state chunks
    AdaptorHmm,
    /// Word segmenter: a chunk bigram model over words without states
    Chunker,
}

/// Markov order of the state chain
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MarkovOrder {
    /// First-order chain
    Bigram,
    /// Second-order chain
    Trigram,
}

/// Training options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainOptions {
    /// Model family. Default: `hmm`
    pub model: ModelKind,
    /// Markov order for state transitions. Default: `trigram`
    pub order: MarkovOrder,
    /// Number of function (syntactic) states. Default: 15
    pub function_states: usize,
    /// Number of content states; ignored by `hmm` and `adaptor-hmm`,
    /// forced to 1 by `lda-hmm`. Default: 0
    pub content_states: usize,
    /// Number of topics (`lda-hmm` only). Default: 50
    pub topics: usize,
    /// Document-topic (or document-content) pseudo-count, also the
    /// chunk concentration of `adaptor-hmm` and `chunker`. Default: 1.0
    pub alpha: f64,
    /// Topic-word (or content-word) pseudo-count, also the chunk
    /// transition concentration of `chunker`. Default: 0.1
    pub beta: f64,
    /// Transition pseudo-count. Default: 0.1
    pub gamma: f64,
    /// Function state emission pseudo-count. Default: 0.0001
    pub delta: f64,
    /// Chunk length stopping probability of the chunk base measure.
    /// Default: 0.5
    pub phash: f64,
    /// Sweeps per outer (temperature) iteration. Default: 100
    pub iterations: usize,
    /// Temperature of the first outer iteration. Default: 1.0
    pub initial_temperature: f64,
    /// Temperature step between outer iterations. Default: 0.1
    pub temperature_decrement: f64,
    /// Final temperature. Default: 1.0
    pub target_temperature: f64,
    /// Worker threads. Default: number of CPUs
    pub threads: usize,
    /// Base random seed. Default: 42
    pub seed: u64,
    /// Save a checkpoint every this many sweeps; 0 disables. Default: 1000
    pub checkpoint_interval: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        TrainOptions {
            model: ModelKind::Hmm,
            order: MarkovOrder::Trigram,
            function_states: 15,
            content_states: 0,
            topics: 50,
            alpha: 1.0,
            beta: 0.1,
            gamma: 0.1,
            delta: 0.0001,
            phash: 0.5,
            iterations: 100,
            initial_temperature: 1.0,
            temperature_decrement: 0.1,
            target_temperature: 1.0,
            threads: num_cpus::get(),
            seed: 42,
            checkpoint_interval: 1000,
        }
    }
}

impl TrainOptions {
    /// Reject option combinations the sampler cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.function_states > 0, "function_states must be > 0");
        anyhow::ensure!(self.threads > 0, "threads must be > 0");
        anyhow::ensure!(
            self.alpha > 0.0 && self.beta > 0.0 && self.gamma > 0.0 && self.delta > 0.0,
            "pseudo-counts alpha, beta, gamma, delta must be > 0"
        );
        anyhow::ensure!(
            self.initial_temperature > 0.0 && self.target_temperature > 0.0,
            "temperatures must be > 0"
        );
        anyhow::ensure!(
            self.initial_temperature >= self.target_temperature,
            "initial temperature ({}) must be >= target temperature ({})",
            self.initial_temperature,
            self.target_temperature
        );
        if self.initial_temperature > self.target_temperature {
            anyhow::ensure!(
                self.temperature_decrement > 0.0,
                "temperature_decrement must be > 0 when annealing"
            );
        }
        match self.model {
            ModelKind::LdaHmm => {
                anyhow::ensure!(self.topics > 0, "lda-hmm needs topics > 0");
            }
            ModelKind::CdHmm => {
                anyhow::ensure!(self.content_states > 0, "cd-hmm needs content_states > 0");
            }
            ModelKind::AdaptorHmm | ModelKind::Chunker => {
                anyhow::ensure!(
                    self.phash > 0.0 && self.phash < 1.0,
                    "phash must be in (0, 1)"
                );
            }
            ModelKind::Hmm => {}
        }
        Ok(())
    }
}

/// Held-out scoring: sweeps per sentence, burn-in and thinning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreOptions {
    /// Sweeps over each held-out sentence. Default: 5000
    pub sweeps: usize,
    /// Sweeps before the first sample. Default: 4500
    pub burn_in: usize,
    /// Sweeps between samples. Default: 10
    pub lag: usize,
    /// Worker threads. Default: number of CPUs
    pub threads: usize,
    /// Base random seed. Default: 42
    pub seed: u64,
}

impl Default for ScoreOptions {
    fn default() -> Self {
        ScoreOptions {
            sweeps: 5000,
            burn_in: 4500,
            lag: 10,
            threads: num_cpus::get(),
            seed: 42,
        }
    }
}

impl ScoreOptions {
    /// Reject settings that take no sample
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.lag > 0, "lag must be > 0");
        anyhow::ensure!(self.threads > 0, "threads must be > 0");
        anyhow::ensure!(
            self.burn_in < self.sweeps,
            "burn-in ({}) leaves no sample in {} sweeps",
            self.burn_in,
            self.sweeps
        );
        Ok(())
    }

    /// Sweep indices after which a sample is taken
    pub fn is_sample(&self, sweep: usize) -> bool {
        sweep >= self.burn_in && (sweep - self.burn_in) % self.lag == 0
    }
}
