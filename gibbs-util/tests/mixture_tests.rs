use gibbs_util::annealer::{Annealer, TemperatureSchedule};
use gibbs_util::categorical::sample_index;
use gibbs_util::counts::{DenseCounts, DenseDelta};
use gibbs_util::rng::{stream, uniform};

const K: usize = 2;
const W: usize = 6;

fn data() -> Vec<usize> {
    (0..600).map(|i| (i % 3) + if i < 300 { 0 } else { 3 }).collect()
}

/// One collapsed Gibbs pass of a mixture of categoricals over `range`
fn sweep(
    words: &[usize],
    z: &mut [usize],
    range: std::ops::Range<usize>,
    cluster_word: &mut DenseCounts<2>,
    cluster: &mut DenseCounts<1>,
    annealer: &Annealer,
    rng: &mut rand::rngs::SmallRng,
) {
    let mut probs = [0.0; K];
    for i in range {
        let w = words[i];
        cluster_word.decrement([z[i], w]);
        cluster.decrement([z[i]]);
        for (k, p) in probs.iter_mut().enumerate() {
            *p = (cluster.getf([k]) + 1.0) * (cluster_word.getf([k, w]) + 0.1)
                / (cluster.getf([k]) + W as f64 * 0.1);
        }
        let total = annealer.anneal(&mut probs);
        z[i] = sample_index(&probs, total, rng);
        cluster_word.increment([z[i], w]);
        cluster.increment([z[i]]);
    }
}

#[test]
fn sharded_mixture_keeps_counts() {
    let words = data();
    let n = words.len();
    let mut rng = stream(42, 0, 0);
    let mut z: Vec<usize> = (0..n).map(|_| uniform(&mut rng, 0, K)).collect();

    let mut cluster_word = DenseCounts::<2>::zeros([K, W]);
    let mut cluster = DenseCounts::<1>::zeros([K]);
    for i in 0..n {
        cluster_word.increment([z[i], words[i]]);
        cluster.increment([z[i]]);
    }

    let schedule = TemperatureSchedule::new(2.0, 0.5, 1.0);
    let bounds = [0..200, 200..450, 450..n];
    let mut sweep_id = 0;
    for temperature in schedule.temperatures() {
        let annealer = Annealer::simulated(temperature);
        for _ in 0..10 {
            // every shard starts from the same snapshot
            let mut total: Option<DenseDelta> = None;
            let mut total_c: Option<DenseDelta> = None;
            for (worker, r) in bounds.iter().enumerate() {
                let mut cw = cluster_word.clone();
                let mut c = cluster.clone();
                let mut rng = stream(42, sweep_id, worker);
                sweep(&words, &mut z, r.clone(), &mut cw, &mut c, &annealer, &mut rng);

                let d = cw.delta(&cluster_word);
                let dc = c.delta(&cluster);
                assert_eq!(d.net(), 0);
                match total.as_mut() {
                    Some(t) => t.accumulate(&d),
                    None => total = Some(d),
                }
                match total_c.as_mut() {
                    Some(t) => t.accumulate(&dc),
                    None => total_c = Some(dc),
                }
            }
            cluster_word.apply(&total.unwrap());
            cluster.apply(&total_c.unwrap());
            sweep_id += 1;
        }
    }

    assert_eq!(cluster.total(), n as u64);
    assert_eq!(cluster_word.total(), n as u64);

    let mut recount = DenseCounts::<2>::zeros([K, W]);
    for i in 0..n {
        recount.increment([z[i], words[i]]);
    }
    assert_eq!(recount, cluster_word);
}
