//! Fork-join parallel sweep.
//!
//! The corpus is cut into contiguous shards at sentence (or document)
//! boundaries. Every worker clones the shared tables, sweeps its own
//! shard with its own random stream, and hands back `final - snapshot`.
//! The deltas are summed and applied once after the join.
//!
//! A worker that fails contributes nothing and its shard is rolled back
//! to the assignments it started from. Invariant violations are not
//! failures of one worker; they are re-raised.

use crate::corpus::Corpus;
use crate::sweep::{Sampler, SweepStats};
use crate::tables::{CountTables, Latent, LatentShard, TableDelta};
use gibbs_util::annealer::Annealer;
use gibbs_util::invariant::{is_violation, panic_message};
use gibbs_util::rng::stream;
use log::{debug, warn};
use rand::rngs::SmallRng;
use rayon::prelude::*;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};

/// Contiguous token ranges, one per worker, that never split a sentence
/// (or a document when `by_document`).
///
/// The thread count is clamped to the number of units. Worker `j` starts
/// at the first token whose unit id reaches `j * (units / threads)`.
pub fn shard_bounds(corpus: &Corpus, threads: usize, by_document: bool) -> Vec<Range<usize>> {
    let n = corpus.len();
    let (units, num_units) = if by_document {
        (corpus.documents(), corpus.num_documents())
    } else {
        (corpus.sentences(), corpus.num_sentences())
    };
    let threads = threads.clamp(1, num_units.max(1));
    let per = num_units / threads;

    let mut out = Vec::with_capacity(threads);
    let mut lb = 0;
    for j in 1..threads {
        let cut = per * j;
        let ub = units.partition_point(|&u| u < cut);
        if ub > lb {
            out.push(lb..ub);
            lb = ub;
        }
    }
    out.push(lb..n);
    out
}

/// Run `work` on every shard in parallel and merge the count deltas.
///
/// `work` gets the shard, a private copy of the tables and the stream
/// `stream(seed, sweep, worker)`.
pub fn parallel_sweep_with<F>(
    latent: &mut Latent,
    tables: &mut CountTables,
    bounds: &[Range<usize>],
    seed: u64,
    sweep: usize,
    work: F,
) -> SweepStats
where
    F: Fn(&mut LatentShard, &mut CountTables, &mut SmallRng) -> anyhow::Result<SweepStats> + Sync,
{
    let outcomes: Vec<Option<(TableDelta, SweepStats)>> = {
        let snapshot: &CountTables = tables;
        latent
            .shards(bounds)
            .into_par_iter()
            .enumerate()
            .map(|(worker, mut shard)| {
                let saved = shard.save();
                let mut local = snapshot.clone();
                let mut rng = stream(seed, sweep, worker);

                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    work(&mut shard, &mut local, &mut rng)
                }));

                match result {
                    Ok(Ok(stats)) => Some((local.delta(snapshot), stats)),
                    Ok(Err(err)) => {
                        warn!(
                            "worker {} ({:?}) failed in sweep {}: {:#}",
                            worker,
                            shard.range(),
                            sweep,
                            err
                        );
                        shard.restore(&saved);
                        None
                    }
                    Err(payload) => {
                        if is_violation(payload.as_ref()) {
                            panic::resume_unwind(payload);
                        }
                        warn!(
                            "worker {} ({:?}) panicked in sweep {}: {}",
                            worker,
                            shard.range(),
                            sweep,
                            panic_message(payload.as_ref())
                        );
                        shard.restore(&saved);
                        None
                    }
                }
            })
            .collect()
    };

    let failed = outcomes.iter().filter(|o| o.is_none()).count();
    if failed > 0 {
        debug!("sweep {}: {} of {} workers dropped", sweep, failed, outcomes.len());
    }

    let mut stats = SweepStats::default();
    let mut total: Option<TableDelta> = None;
    for (delta, s) in outcomes.into_iter().flatten() {
        stats.accumulate(&s);
        match total.as_mut() {
            Some(t) => t.accumulate(&delta),
            None => total = Some(delta),
        }
    }
    if let Some(delta) = total {
        tables.apply(&delta);
    }
    stats
}

impl Sampler {
    /// One sweep over all shards in the current rayon pool
    #[allow(clippy::too_many_arguments)]
    pub fn parallel_sweep(
        &self,
        corpus: &Corpus,
        latent: &mut Latent,
        tables: &mut CountTables,
        annealer: &Annealer,
        bounds: &[Range<usize>],
        seed: u64,
        sweep: usize,
    ) -> SweepStats {
        parallel_sweep_with(latent, tables, bounds, seed, sweep, |shard, local, rng| {
            self.sweep(corpus, shard, local, annealer, rng)
        })
    }
}
