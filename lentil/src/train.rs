//! Training schedule: random initialization, annealed outer iterations of
//! parallel sweeps, periodic checkpoints, and MAP decoding.

use crate::checkpoint::Checkpoint;
use crate::corpus::Corpus;
use crate::lattice;
use crate::model::{Hyper, ModelShape};
use crate::options::TrainOptions;
use crate::parallel::shard_bounds;
use crate::sweep::{Sampler, SweepStats};
use crate::tables::{CountTables, Latent};
use gibbs_util::annealer::{Annealer, TemperatureSchedule};
use gibbs_util::progress::new_progress_bar;
use log::{info, warn};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::ops::Range;
use std::time::Instant;

/// Sampler, current sample and worker pool for one corpus
pub struct Trainer<'a> {
    corpus: &'a Corpus,
    options: TrainOptions,
    sampler: Sampler,
    latent: Latent,
    tables: CountTables,
    bounds: Vec<Range<usize>>,
    pool: rayon::ThreadPool,
    sweeps_done: usize,
}

impl<'a> Trainer<'a> {
    /// Randomly initialized trainer
    pub fn new(corpus: &'a Corpus, options: TrainOptions) -> anyhow::Result<Self> {
        options.validate()?;
        anyhow::ensure!(!corpus.is_empty(), "empty corpus");

        let shape = ModelShape::new(&options, corpus);
        let sampler = Sampler::new(shape, Hyper::new(&options, &shape));
        let mut latent = Latent::new(corpus.len());
        let mut tables = sampler.empty_tables();
        let mut rng = SmallRng::seed_from_u64(options.seed);
        sampler.initialize_random(corpus, &mut latent, &mut tables, &mut rng);

        info!(
            "initialized {:?} ({:?}): {} states, {} topics",
            shape.kind, shape.order, shape.num_states, shape.num_topics
        );
        Self::assemble(corpus, options, sampler, latent, tables, 0)
    }

    /// Trainer continuing from a checkpoint. The checkpoint's tables must
    /// match its assignments over `corpus`.
    pub fn from_checkpoint(corpus: &'a Corpus, checkpoint: Checkpoint) -> anyhow::Result<Self> {
        let Checkpoint {
            options,
            sweeps_done,
            latent,
            tables,
        } = checkpoint;
        options.validate()?;
        anyhow::ensure!(
            latent.len() == corpus.len(),
            "checkpoint covers {} tokens, corpus has {}",
            latent.len(),
            corpus.len()
        );

        let shape = ModelShape::new(&options, corpus);
        let sampler = Sampler::new(shape, Hyper::new(&options, &shape));
        anyhow::ensure!(
            latent.state.iter().all(|&s| s < shape.boundary()),
            "checkpoint assigns the boundary state"
        );
        anyhow::ensure!(
            !shape.has_chunks() || lattice::partition_is_valid(corpus, &latent.segment),
            "checkpoint leaves a sentence without a closing chunk boundary"
        );
        anyhow::ensure!(
            tables == sampler.recount(corpus, &latent),
            "checkpoint tables disagree with its assignments"
        );

        info!("resumed after {} sweeps", sweeps_done);
        Self::assemble(corpus, options, sampler, latent, tables, sweeps_done)
    }

    fn assemble(
        corpus: &'a Corpus,
        options: TrainOptions,
        sampler: Sampler,
        latent: Latent,
        tables: CountTables,
        sweeps_done: usize,
    ) -> anyhow::Result<Self> {
        let bounds = shard_bounds(corpus, options.threads, sampler.shape.shards_by_document());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(bounds.len())
            .build()?;
        info!(
            "{} worker(s) over {} tokens",
            bounds.len(),
            corpus.len()
        );
        Ok(Trainer {
            corpus,
            options,
            sampler,
            latent,
            tables,
            bounds,
            pool,
            sweeps_done,
        })
    }

    /// One parallel sweep with the given annealer
    pub fn sweep(&mut self, annealer: &Annealer) -> SweepStats {
        let Trainer {
            corpus,
            options,
            sampler,
            latent,
            tables,
            bounds,
            pool,
            sweeps_done,
        } = self;
        let stats = pool.install(|| {
            sampler.parallel_sweep(
                corpus,
                latent,
                tables,
                annealer,
                bounds,
                options.seed,
                *sweeps_done,
            )
        });
        *sweeps_done += 1;
        stats
    }

    /// Run the annealing schedule to the end, saving to
    /// `checkpoint_file` every `checkpoint_interval` sweeps and once more
    /// when done
    pub fn train(&mut self, checkpoint_file: Option<&str>) -> SweepStats {
        let schedule = TemperatureSchedule::new(
            self.options.initial_temperature,
            self.options.temperature_decrement,
            self.options.target_temperature,
        );
        let iterations = self.options.iterations.max(1);
        let total = schedule.outer_iterations() * iterations;

        let mut stats = SweepStats::default();
        if self.sweeps_done >= total {
            info!("all {} sweeps already done", total);
            return stats;
        }

        info!(
            "{} outer iteration(s) x {} sweeps, temperature {} -> {}",
            schedule.outer_iterations(),
            iterations,
            schedule.initial,
            schedule.target
        );

        let pb = new_progress_bar(total as u64, "Gibbs {bar:40} {pos}/{len} sweeps ({eta})");
        pb.set_position(self.sweeps_done as u64);
        let start = Instant::now();
        let mut outer_stats = SweepStats::default();

        while self.sweeps_done < total {
            let outer = self.sweeps_done / iterations;
            let temperature = schedule.temperature_at(outer);
            let s = self.sweep(&Annealer::simulated(temperature));
            outer_stats.accumulate(&s);
            stats.accumulate(&s);
            pb.inc(1);

            if self.sweeps_done % iterations == 0 {
                info!(
                    "outer iteration {}/{} (T = {:.3}): {} tokens, {} moves, {} merges, {} splits, {:.1}s",
                    outer + 1,
                    schedule.outer_iterations(),
                    temperature,
                    outer_stats.tokens,
                    outer_stats.moves,
                    outer_stats.merges,
                    outer_stats.splits,
                    start.elapsed().as_secs_f64()
                );
                if let Some(llik) = self.log10_likelihood() {
                    info!(
                        "log10 likelihood {:.3} ({:.5} per token)",
                        llik,
                        llik / self.corpus.len() as f64
                    );
                }
                outer_stats = SweepStats::default();
            }

            let interval = self.options.checkpoint_interval;
            if let Some(path) = checkpoint_file {
                if interval > 0 && self.sweeps_done % interval == 0 && self.sweeps_done < total {
                    self.try_checkpoint(path);
                }
            }
        }
        pb.finish_and_clear();

        if let Some(path) = checkpoint_file {
            self.try_checkpoint(path);
        }
        info!("done: {} sweeps in {:.1}s", stats.tokens / self.corpus.len(), start.elapsed().as_secs_f64());
        stats
    }

    /// One sweep that takes the most probable state of every token
    pub fn decode(&mut self) -> SweepStats {
        let stats = self.sweep(&Annealer::MaximumPosterior);
        info!("MAP decoding moved {} of {} tokens", stats.moves, stats.tokens);
        stats
    }

    /// Base-10 log likelihood of a chunk model, `None` for other models
    pub fn log10_likelihood(&self) -> Option<f64> {
        self.sampler
            .log10_likelihood(self.corpus, &self.latent, &self.tables)
    }

    /// Copy of the current state
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            options: self.options.clone(),
            sweeps_done: self.sweeps_done,
            latent: self.latent.clone(),
            tables: self.tables.clone(),
        }
    }

    /// Save a checkpoint; failure is logged and training goes on
    pub fn try_checkpoint(&self, path: &str) {
        match self.checkpoint().save(path) {
            Ok(()) => info!("checkpoint after {} sweeps: {}", self.sweeps_done, path),
            Err(err) => warn!("failed to save checkpoint {}: {:#}", path, err),
        }
    }

    /// Corpus being modeled
    pub fn corpus(&self) -> &'a Corpus {
        self.corpus
    }

    /// Training options
    pub fn options(&self) -> &TrainOptions {
        &self.options
    }

    /// Sampler
    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Current assignments
    pub fn latent(&self) -> &Latent {
        &self.latent
    }

    /// Current counts
    pub fn tables(&self) -> &CountTables {
        &self.tables
    }

    /// Sweeps completed
    pub fn sweeps_done(&self) -> usize {
        self.sweeps_done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ModelKind;

    fn corpus() -> Corpus {
        let mut word = vec![];
        let mut document = vec![];
        let mut sentence = vec![];
        for s in 0..8 {
            for t in 0..4 {
                word.push((s + t * 2) % 6);
                document.push(s / 2);
                sentence.push(s);
            }
        }
        Corpus::from_ids(word, document, sentence, 6).unwrap()
    }

    #[test]
    fn runs_every_outer_iteration() -> anyhow::Result<()> {
        let corpus = corpus();
        let opts = TrainOptions {
            function_states: 3,
            iterations: 2,
            initial_temperature: 1.3,
            temperature_decrement: 0.1,
            target_temperature: 1.0,
            threads: 2,
            ..Default::default()
        };
        let mut trainer = Trainer::new(&corpus, opts)?;
        let stats = trainer.train(None);
        assert_eq!(trainer.sweeps_done(), 8);
        assert_eq!(stats.tokens, 8 * corpus.len());
        assert_eq!(
            trainer.tables(),
            &trainer.sampler().recount(&corpus, trainer.latent())
        );

        // nothing left
        assert_eq!(trainer.train(None).tokens, 0);
        Ok(())
    }

    #[test]
    fn resumes_where_the_checkpoint_left_off() -> anyhow::Result<()> {
        let corpus = corpus();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("run.ckpt.json");
        let path = path.to_str().unwrap();

        let opts = TrainOptions {
            model: ModelKind::AdaptorHmm,
            function_states: 3,
            iterations: 3,
            threads: 2,
            checkpoint_interval: 2,
            ..Default::default()
        };
        let mut trainer = Trainer::new(&corpus, opts.clone())?;
        trainer.train(Some(path));
        assert!(trainer.log10_likelihood().is_some());

        let checkpoint = Checkpoint::load(path)?;
        assert_eq!(checkpoint.sweeps_done, 3);
        let mut resumed = checkpoint.restore(&corpus)?;
        assert_eq!(resumed.latent(), trainer.latent());

        let decoded = resumed.decode();
        assert_eq!(decoded.tokens, corpus.len());
        assert_eq!(resumed.sweeps_done(), 4);
        Ok(())
    }

    #[test]
    fn rejects_a_sentence_left_open() -> anyhow::Result<()> {
        let corpus = Corpus::from_ids(vec![0, 1, 2, 3], vec![0; 4], vec![0, 0, 1, 1], 4)?;
        let opts = TrainOptions {
            model: ModelKind::AdaptorHmm,
            function_states: 2,
            threads: 1,
            ..Default::default()
        };
        let trainer = Trainer::new(&corpus, opts)?;
        let mut checkpoint = trainer.checkpoint();
        checkpoint.latent.segment = vec![false, false, false, true];
        // tables that agree with the broken partition, so only the
        // partition check can catch it
        checkpoint.tables = trainer.sampler().recount(&corpus, &checkpoint.latent);

        let err = match Trainer::from_checkpoint(&corpus, checkpoint.clone()) {
            Ok(_) => panic!("open sentence accepted"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("closing chunk boundary"), "{err}");

        checkpoint.latent.segment = vec![false, true, false, true];
        checkpoint.tables = trainer.sampler().recount(&corpus, &checkpoint.latent);
        assert!(Trainer::from_checkpoint(&corpus, checkpoint).is_ok());
        Ok(())
    }

    #[test]
    fn unwritable_checkpoint_does_not_stop_training() -> anyhow::Result<()> {
        let corpus = corpus();
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x")?;
        let path = blocker.join("ckpt.json");

        let opts = TrainOptions {
            function_states: 2,
            iterations: 2,
            threads: 1,
            checkpoint_interval: 1,
            ..Default::default()
        };
        let mut trainer = Trainer::new(&corpus, opts)?;
        trainer.train(path.to_str());
        assert_eq!(trainer.sweeps_done(), 2);
        Ok(())
    }
}
