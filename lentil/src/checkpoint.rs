//! Sampler state on disk: options, every count table and the latent
//! arrays, as JSON (gzipped when the file name ends in `.gz`).

use crate::corpus::Corpus;
use crate::options::TrainOptions;
use crate::tables::{CountTables, Latent};
use crate::train::Trainer;
use anyhow::Context;
use flate2::write::GzEncoder;
use flate2::Compression;
use gibbs_util::common_io::{mkdir_parent, open_buf_reader};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Everything needed to continue training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Options the run was started with
    pub options: TrainOptions,
    /// Sweeps completed so far
    pub sweeps_done: usize,
    /// Per-token assignments
    pub latent: Latent,
    /// Count tables matching `latent`
    pub tables: CountTables,
}

impl Checkpoint {
    /// Write to `path`. The file is written next to it as `{path}.tmp`
    /// and renamed into place once complete, so an interrupted save leaves
    /// the previous checkpoint intact.
    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        mkdir_parent(path)?;
        let tmp = format!("{}.tmp", path);
        let file = File::create(&tmp).with_context(|| format!("failed to create {}", tmp))?;
        let mut buf = BufWriter::new(file);
        match Path::new(path).extension().and_then(|x| x.to_str()) {
            Some("gz") => {
                let mut enc = GzEncoder::new(&mut buf, Compression::default());
                serde_json::to_writer(&mut enc, self)
                    .with_context(|| format!("failed to serialize checkpoint {}", path))?;
                enc.finish()?;
            }
            _ => {
                serde_json::to_writer(&mut buf, self)
                    .with_context(|| format!("failed to serialize checkpoint {}", path))?;
            }
        }
        buf.flush()?;
        drop(buf);
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to move {} to {}", tmp, path))?;
        Ok(())
    }

    /// Read from `path`
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let buf = open_buf_reader(path)?;
        let checkpoint = serde_json::from_reader(buf)
            .with_context(|| format!("failed to parse checkpoint {}", path))?;
        Ok(checkpoint)
    }

    /// Trainer that continues from this checkpoint over `corpus`
    pub fn restore(self, corpus: &Corpus) -> anyhow::Result<Trainer<'_>> {
        Trainer::from_checkpoint(corpus, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ModelKind;

    #[test]
    fn save_and_load_round_trip() -> anyhow::Result<()> {
        let corpus = Corpus::from_ids(
            vec![0, 1, 2, 1, 0, 2, 2],
            vec![0, 0, 0, 0, 1, 1, 1],
            vec![0, 0, 0, 1, 2, 2, 2],
            3,
        )?;
        let dir = tempfile::tempdir()?;

        for model in [ModelKind::LdaHmm, ModelKind::AdaptorHmm] {
            let opts = TrainOptions {
                model,
                function_states: 3,
                topics: 2,
                threads: 1,
                ..Default::default()
            };
            let trainer = Trainer::new(&corpus, opts)?;
            let checkpoint = trainer.checkpoint();

            let path = dir.path().join("model.ckpt.json.gz");
            let path = path.to_str().unwrap();
            checkpoint.save(path)?;
            let loaded = Checkpoint::load(path)?;
            assert_eq!(loaded, checkpoint);

            let restored = loaded.restore(&corpus)?;
            assert_eq!(restored.latent(), trainer.latent());
            assert_eq!(restored.tables(), trainer.tables());
        }
        Ok(())
    }

    #[test]
    fn save_replaces_the_file_in_one_step() -> anyhow::Result<()> {
        let corpus = Corpus::from_ids(vec![0, 1, 1, 2], vec![0; 4], vec![0, 0, 1, 1], 3)?;
        let dir = tempfile::tempdir()?;
        let opts = TrainOptions {
            function_states: 2,
            threads: 1,
            ..Default::default()
        };
        let mut trainer = Trainer::new(&corpus, opts)?;

        for name in ["run.ckpt.json", "run.ckpt.json.gz"] {
            let path = dir.path().join(name);
            let path = path.to_str().unwrap();
            let tmp = format!("{}.tmp", path);

            trainer.checkpoint().save(path)?;
            trainer.sweep(&gibbs_util::annealer::Annealer::simulated(1.0));
            let newer = trainer.checkpoint();
            newer.save(path)?;

            assert!(!Path::new(&tmp).exists(), "{} left behind", tmp);
            assert_eq!(Checkpoint::load(path)?, newer);
        }

        // the gzip stream is complete, trailer included
        let path = dir.path().join("run.ckpt.json.gz");
        let mut raw = vec![];
        std::io::Read::read_to_end(&mut flate2::read::GzDecoder::new(File::open(&path)?), &mut raw)?;
        let json: serde_json::Value = serde_json::from_slice(&raw)?;
        assert_eq!(json["sweeps_done"], 2);
        Ok(())
    }

    #[test]
    fn rejects_a_different_corpus() -> anyhow::Result<()> {
        let corpus = Corpus::from_ids(vec![0, 1, 1], vec![0; 3], vec![0; 3], 2)?;
        let other = Corpus::from_ids(vec![0, 1], vec![0; 2], vec![0; 2], 2)?;
        let opts = TrainOptions {
            function_states: 2,
            threads: 1,
            ..Default::default()
        };
        let checkpoint = Trainer::new(&corpus, opts)?.checkpoint();
        assert!(checkpoint.restore(&other).is_err());
        Ok(())
    }
}
