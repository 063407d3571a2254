use clap::{Parser, Subcommand};
use lentil::checkpoint::Checkpoint;
use lentil::corpus::Corpus;
use lentil::normalize::write_results;
use lentil::options::{MarkovOrder, ModelKind, ScoreOptions, TrainOptions};
use lentil::score::{write_scores, Scorer};
use lentil::train::Trainer;
use log::info;

/// LENTIL
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Bayesian sequence models by parallel collapsed Gibbs sampling",
    long_about = "Unsupervised HMM, HMM-LDA, document-coupled HMM, adaptor (chunk) HMM\n\
                  and word segmenter trained by collapsed Gibbs sampling with simulated\n\
                  annealing, and held-out scoring with a trained model.\n\n\
                  Input: text files, one document per file (or per blank-line separated\n\
                  block with --doc-per-block), one sentence per line, whitespace tokens.\n\
                  Gzipped inputs (.gz) are read transparently.",
    term_width = 80
)]
struct Cli {
    #[arg(short = 'v', long, global = true, help = "Debug-level logging")]
    verbose: bool,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Train a model from random initialization or a checkpoint",
        long_about = "Train a model by annealed collapsed Gibbs sampling.\n\n\
                      Outputs:\n\
                      - {out}.states.tsv.gz: P(word | state)\n\
                      - {out}.topics.tsv.gz: P(word | topic) (lda-hmm)\n\
                      - {out}.top_words.tsv: most probable words per state and topic\n\
                      - {out}.assignments.tsv.gz: final state (topic, segment) per token\n\
                      - {out}.ckpt.json.gz: checkpoint for --resume and decode"
    )]
    Train(TrainArgs),

    #[command(
        about = "MAP-decode a corpus with a trained checkpoint",
        long_about = "Load a checkpoint, run one sweep that picks the most probable state\n\
                      of every token, and write the same outputs as train."
    )]
    Decode(DecodeArgs),

    #[command(
        about = "Score held-out sentences with a trained checkpoint",
        long_about = "Load a checkpoint, then resample each held-out sentence with the\n\
                      trained tables fixed and average its log10 probability over the\n\
                      samples taken after burn-in. Words unseen in training map to <unk>.\n\n\
                      Output:\n\
                      - {out}.scores.tsv: per sentence log10 probability, unigram\n\
                        baseline, normalized scores (div, sub, SLOR) and perplexity"
    )]
    Score(ScoreArgs),
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    #[arg(required = true, help = "Input text files (.txt or .txt.gz)")]
    files: Vec<Box<str>>,

    #[arg(short, long, required = true, help = "Output file prefix")]
    out: Box<str>,

    #[arg(long, default_value_t = false, help = "Blank lines separate documents")]
    doc_per_block: bool,

    #[arg(long, value_enum, default_value_t = ModelKind::Hmm, help = "Model family")]
    model: ModelKind,

    #[arg(
        long,
        value_enum,
        default_value_t = MarkovOrder::Trigram,
        help = "Markov order of state transitions",
        long_help = "Markov order of state transitions. `trigram` scores a candidate\n\
                     against two states on each side; `bigram` against one.\n\
                     Ignored by adaptor-hmm and chunker, whose transitions run over chunks."
    )]
    order: MarkovOrder,

    #[arg(long, default_value_t = 15, help = "Number of function (syntactic) states")]
    function_states: usize,

    #[arg(
        long,
        default_value_t = 0,
        help = "Number of content states (cd-hmm)",
        long_help = "Number of content states of cd-hmm. Content states emit words\n\
                     weighted by how often the document uses them. lda-hmm always\n\
                     has exactly one content (topic) state."
    )]
    content_states: usize,

    #[arg(long, default_value_t = 50, help = "Number of topics (lda-hmm)")]
    topics: usize,

    #[arg(
        long,
        default_value_t = 1.0,
        help = "Document-topic pseudo-count; chunk concentration of adaptor-hmm and chunker"
    )]
    alpha: f64,

    #[arg(long, default_value_t = 0.1, help = "Topic-word pseudo-count; chunk transition weight of chunker")]
    beta: f64,

    #[arg(long, default_value_t = 0.1, help = "Transition pseudo-count")]
    gamma: f64,

    #[arg(long, default_value_t = 0.0001, help = "Function state emission pseudo-count")]
    delta: f64,

    #[arg(
        long,
        default_value_t = 0.5,
        help = "Chunk stopping probability (adaptor-hmm, chunker)",
        long_help = "Probability of ending a chunk after each state under the chunk\n\
                     base measure. Small values favor long chunks. Must be < 1."
    )]
    phash: f64,

    #[arg(long, default_value_t = 100, help = "Sweeps per temperature")]
    iterations: usize,

    #[arg(long, default_value_t = 1.0, help = "Initial temperature")]
    initial_temperature: f64,

    #[arg(long, default_value_t = 0.1, help = "Temperature decrement per outer iteration")]
    temperature_decrement: f64,

    #[arg(long, default_value_t = 1.0, help = "Target (final) temperature")]
    target_temperature: f64,

    #[arg(long, default_value_t = num_cpus::get(), help = "Worker threads")]
    threads: usize,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(
        long,
        default_value_t = 1000,
        help = "Checkpoint every this many sweeps (0: only at the end)"
    )]
    checkpoint_interval: usize,

    #[arg(long, default_value_t = 20, help = "Words per state/topic in top_words")]
    top_words: usize,

    #[arg(
        long,
        help = "Continue from this checkpoint",
        long_help = "Continue from a checkpoint written by an earlier run. Model options\n\
                     are taken from the checkpoint; --threads still applies."
    )]
    resume: Option<Box<str>>,
}

#[derive(clap::Args, Debug)]
struct DecodeArgs {
    #[arg(required = true, help = "Input text files the model was trained on")]
    files: Vec<Box<str>>,

    #[arg(short, long, required = true, help = "Checkpoint file")]
    checkpoint: Box<str>,

    #[arg(short, long, required = true, help = "Output file prefix")]
    out: Box<str>,

    #[arg(long, default_value_t = false, help = "Blank lines separate documents")]
    doc_per_block: bool,

    #[arg(long, default_value_t = num_cpus::get(), help = "Worker threads")]
    threads: usize,

    #[arg(long, default_value_t = 20, help = "Words per state/topic in top_words")]
    top_words: usize,
}

#[derive(clap::Args, Debug)]
struct ScoreArgs {
    #[arg(required = true, help = "Input text files the model was trained on")]
    files: Vec<Box<str>>,

    #[arg(short, long, required = true, help = "Checkpoint file")]
    checkpoint: Box<str>,

    #[arg(short, long, required = true, num_args = 1.., help = "Held-out text files")]
    test: Vec<Box<str>>,

    #[arg(short, long, required = true, help = "Output file prefix")]
    out: Box<str>,

    #[arg(long, default_value_t = false, help = "Blank lines separate documents")]
    doc_per_block: bool,

    #[arg(long, default_value_t = 5000, help = "Sweeps per held-out sentence")]
    sweeps: usize,

    #[arg(long, default_value_t = 4500, help = "Sweeps before the first sample")]
    burn_in: usize,

    #[arg(long, default_value_t = 10, help = "Sweeps between samples")]
    lag: usize,

    #[arg(long, default_value_t = num_cpus::get(), help = "Worker threads")]
    threads: usize,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,
}

impl TrainArgs {
    fn options(&self) -> TrainOptions {
        TrainOptions {
            model: self.model,
            order: self.order,
            function_states: self.function_states,
            content_states: self.content_states,
            topics: self.topics,
            alpha: self.alpha,
            beta: self.beta,
            gamma: self.gamma,
            delta: self.delta,
            phash: self.phash,
            iterations: self.iterations,
            initial_temperature: self.initial_temperature,
            temperature_decrement: self.temperature_decrement,
            target_temperature: self.target_temperature,
            threads: self.threads,
            seed: self.seed,
            checkpoint_interval: self.checkpoint_interval,
        }
    }
}

fn train(args: &TrainArgs) -> anyhow::Result<()> {
    let corpus = Corpus::load(&args.files, args.doc_per_block)?;
    let checkpoint_file = format!("{}.ckpt.json.gz", args.out);

    let mut trainer = match args.resume.as_deref() {
        Some(path) => {
            let mut checkpoint = Checkpoint::load(path)?;
            checkpoint.options.threads = args.threads;
            checkpoint.restore(&corpus)?
        }
        None => Trainer::new(&corpus, args.options())?,
    };

    let stats = trainer.train(Some(&checkpoint_file));
    info!(
        "{} token visits, {} state moves",
        stats.tokens, stats.moves
    );
    write_results(&trainer, &args.out, args.top_words)
}

fn decode(args: &DecodeArgs) -> anyhow::Result<()> {
    let corpus = Corpus::load(&args.files, args.doc_per_block)?;
    let mut checkpoint = Checkpoint::load(&args.checkpoint)?;
    checkpoint.options.threads = args.threads;
    let mut trainer = checkpoint.restore(&corpus)?;
    trainer.decode();
    write_results(&trainer, &args.out, args.top_words)
}

fn score(args: &ScoreArgs) -> anyhow::Result<()> {
    let corpus = Corpus::load(&args.files, args.doc_per_block)?;
    let mut checkpoint = Checkpoint::load(&args.checkpoint)?;
    checkpoint.options.threads = args.threads;
    let trainer = checkpoint.restore(&corpus)?;

    let heldout = Corpus::load_with_vocab(&args.test, args.doc_per_block, corpus.vocab())?;
    let opts = ScoreOptions {
        sweeps: args.sweeps,
        burn_in: args.burn_in,
        lag: args.lag,
        threads: args.threads,
        seed: args.seed,
    };
    let scores = Scorer::new(&trainer).score(&heldout, &opts)?;
    let output = format!("{}.scores.tsv", args.out);
    write_scores(&scores, &output)?;
    info!("wrote {}", output);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match &cli.commands {
        Commands::Train(args) => {
            train(args)?;
        }
        Commands::Decode(args) => {
            decode(args)?;
        }
        Commands::Score(args) => {
            score(args)?;
        }
    }

    Ok(())
}
