//! Smoothed emission distributions from the final counts, and the TSV
//! writers for them.

use crate::corpus::Corpus;
use crate::lattice::chunk_spans;
use crate::model::{Hyper, ModelShape};
use crate::tables::{CountTables, Latent};
use crate::train::Trainer;
use gibbs_util::common_io::write_tsv;
use log::info;
use nalgebra::DMatrix;

/// `P(word | state)` as a `W x (stateS - 1)` matrix; columns sum to one.
///
/// The topic state of the topic model is the mixture of topic emissions
/// weighted by smoothed topic frequencies. Content states of the
/// document-coupled model are smoothed with `beta`.
pub fn state_emission_probs(tables: &CountTables, shape: &ModelShape, hyper: &Hyper) -> DMatrix<f64> {
    let nw = shape.vocab_size;
    let ns = shape.num_candidates();

    let topic_column = if shape.has_topics() {
        let topics = topic_emission_probs(tables, shape, hyper);
        let mut weights: Vec<f64> = (0..shape.num_topics)
            .map(|k| tables.topic_counts.getf([k]) + hyper.alpha)
            .collect();
        let tot: f64 = weights.iter().sum();
        weights.iter_mut().for_each(|x| *x /= tot);
        Some(&topics * nalgebra::DVector::from_vec(weights))
    } else {
        None
    };

    DMatrix::from_fn(nw, ns, |w, s| match topic_column.as_ref() {
        Some(col) if s == 0 => col[w],
        _ if shape.has_document_coupling() && s < shape.num_content => {
            (tables.state_by_word.getf([w, s]) + hyper.beta)
                / (tables.state_counts.getf([s]) + hyper.wbeta)
        }
        _ => {
            (tables.state_by_word.getf([w, s]) + hyper.delta)
                / (tables.state_counts.getf([s]) + hyper.wdelta)
        }
    })
}

/// `P(word | topic)` as a `W x K` matrix
pub fn topic_emission_probs(tables: &CountTables, shape: &ModelShape, hyper: &Hyper) -> DMatrix<f64> {
    DMatrix::from_fn(shape.vocab_size, shape.num_topics, |w, k| {
        (tables.topic_by_word.getf([w, k]) + hyper.beta)
            / (tables.topic_counts.getf([k]) + hyper.wbeta)
    })
}

/// The `n` most probable rows of every column, most probable first
pub fn top_words(probs: &DMatrix<f64>, n: usize) -> Vec<Vec<usize>> {
    probs
        .column_iter()
        .map(|col| {
            let mut order: Vec<usize> = (0..col.len()).collect();
            order.sort_by(|&a, &b| col[b].total_cmp(&col[a]).then(a.cmp(&b)));
            order.truncate(n);
            order
        })
        .collect()
}

/// Word-by-column probabilities with a header of column names
pub fn write_emissions(
    probs: &DMatrix<f64>,
    corpus: &Corpus,
    column_prefix: &str,
    output_file: &str,
) -> anyhow::Result<()> {
    let mut rows: Vec<Vec<String>> = Vec::with_capacity(probs.nrows() + 1);
    let mut header = vec!["word".to_string()];
    header.extend((0..probs.ncols()).map(|j| format!("{}{}", column_prefix, j)));
    rows.push(header);
    for (w, row) in probs.row_iter().enumerate() {
        let mut cells = vec![corpus.word_name(w).to_string()];
        cells.extend(row.iter().map(|p| format!("{:.6e}", p)));
        rows.push(cells);
    }
    write_tsv(&rows, output_file)
}

/// One line per column: its name and its top words
pub fn write_top_words(
    tops: &[(String, Vec<usize>)],
    corpus: &Corpus,
    output_file: &str,
) -> anyhow::Result<()> {
    let rows: Vec<Vec<&str>> = tops
        .iter()
        .map(|(name, words)| {
            let mut cells = vec![name.as_str()];
            cells.extend(words.iter().map(|&w| corpus.word_name(w)));
            cells
        })
        .collect();
    write_tsv(&rows, output_file)
}

/// One line per token: document, sentence, word, state and, when the
/// model has them, topic and segment bit
pub fn write_assignments(
    corpus: &Corpus,
    latent: &Latent,
    shape: &ModelShape,
    output_file: &str,
) -> anyhow::Result<()> {
    let mut header = vec!["document", "sentence", "word", "state"];
    if shape.has_topics() {
        header.push("topic");
    }
    if shape.has_chunks() {
        header.push("segment");
    }
    let mut rows: Vec<Vec<String>> = vec![header.into_iter().map(String::from).collect()];
    for i in 0..corpus.len() {
        let mut cells = vec![
            corpus.document(i).to_string(),
            corpus.sentence(i).to_string(),
            corpus.word_name(corpus.word(i)).to_string(),
            latent.state[i].to_string(),
        ];
        if shape.has_topics() {
            cells.push(latent.topic[i].to_string());
        }
        if shape.has_chunks() {
            cells.push((latent.segment[i] as u8).to_string());
        }
        rows.push(cells);
    }
    write_tsv(&rows, output_file)
}

/// One line per sentence, one tab-separated cell per chunk holding its
/// words
pub fn write_segmentation(corpus: &Corpus, latent: &Latent, output_file: &str) -> anyhow::Result<()> {
    let rows: Vec<Vec<String>> = corpus
        .sentence_ranges(0..corpus.len())
        .into_iter()
        .map(|sentence| {
            chunk_spans(&latent.segment, sentence)
                .into_iter()
                .map(|span| {
                    span.map(|i| corpus.word_name(corpus.word(i)))
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect()
        })
        .collect();
    write_tsv(&rows, output_file)
}

/// Write every result file under the prefix `out`:
/// `{out}.states.tsv.gz`, `{out}.topics.tsv.gz` (topic model),
/// `{out}.top_words.tsv`, `{out}.assignments.tsv.gz` and
/// `{out}.chunks.tsv.gz` (chunk models)
pub fn write_results(trainer: &Trainer, out: &str, top_n: usize) -> anyhow::Result<()> {
    let corpus = trainer.corpus();
    let shape = &trainer.sampler().shape;
    let hyper = &trainer.sampler().hyper;
    let tables = trainer.tables();

    let states = state_emission_probs(tables, shape, hyper);
    write_emissions(&states, corpus, "state", &format!("{}.states.tsv.gz", out))?;
    let mut tops: Vec<(String, Vec<usize>)> = top_words(&states, top_n)
        .into_iter()
        .enumerate()
        .map(|(s, words)| (format!("state{}", s), words))
        .collect();

    if shape.has_topics() {
        let topics = topic_emission_probs(tables, shape, hyper);
        write_emissions(&topics, corpus, "topic", &format!("{}.topics.tsv.gz", out))?;
        tops.extend(
            top_words(&topics, top_n)
                .into_iter()
                .enumerate()
                .map(|(k, words)| (format!("topic{}", k), words)),
        );
    }

    write_top_words(&tops, corpus, &format!("{}.top_words.tsv", out))?;
    write_assignments(corpus, trainer.latent(), shape, &format!("{}.assignments.tsv.gz", out))?;
    if shape.has_chunks() {
        write_segmentation(corpus, trainer.latent(), &format!("{}.chunks.tsv.gz", out))?;
    }
    info!("wrote {}.*", out);
    Ok(())
}
