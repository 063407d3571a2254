//! Token sequence with document and sentence structure.
//!
//! All tokens of a corpus are laid out in one flat index space. Three
//! parallel arrays give the word id, the document id and the sentence id
//! of every token. Sentence ids increase along the sequence, so a sentence
//! is a contiguous range and a change of id marks a boundary.

use gibbs_util::common_io::open_buf_reader;
use log::info;
use std::collections::HashMap;
use std::io::BufRead;
use std::ops::Range;

/// Surface form standing in for words outside a fixed vocabulary
pub const UNKNOWN_WORD: &str = "<unk>";

/// Immutable token sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corpus {
    word: Vec<usize>,
    document: Vec<usize>,
    sentence: Vec<usize>,
    vocab: Vec<Box<str>>,
    num_documents: usize,
    num_sentences: usize,
}

impl Corpus {
    /// Corpus from id arrays. Sentence and document ids must be
    /// non-decreasing and every sentence must stay inside one document.
    pub fn from_ids(
        word: Vec<usize>,
        document: Vec<usize>,
        sentence: Vec<usize>,
        vocab_size: usize,
    ) -> anyhow::Result<Self> {
        let n = word.len();
        anyhow::ensure!(
            document.len() == n && sentence.len() == n,
            "word, document and sentence arrays differ in length"
        );
        for i in 0..n {
            anyhow::ensure!(
                word[i] < vocab_size,
                "word id {} >= vocabulary size {}",
                word[i],
                vocab_size
            );
            if i > 0 {
                anyhow::ensure!(
                    sentence[i] >= sentence[i - 1],
                    "sentence ids must be non-decreasing (token {})",
                    i
                );
                anyhow::ensure!(
                    document[i] >= document[i - 1],
                    "document ids must be non-decreasing (token {})",
                    i
                );
                anyhow::ensure!(
                    sentence[i] != sentence[i - 1] || document[i] == document[i - 1],
                    "sentence {} spans two documents",
                    sentence[i]
                );
            }
        }
        let num_documents = document.iter().max().map_or(0, |&d| d + 1);
        let num_sentences = sentence.iter().max().map_or(0, |&s| s + 1);
        let vocab = (0..vocab_size)
            .map(|w| w.to_string().into_boxed_str())
            .collect();
        Ok(Corpus {
            word,
            document,
            sentence,
            vocab,
            num_documents,
            num_sentences,
        })
    }

    /// Read whitespace-tokenized text files, `.gz` or plain.
    ///
    /// Each file is a document, or each blank-line separated block when
    /// `doc_per_block` is set. Each non-empty line is a sentence.
    pub fn load(files: &[Box<str>], doc_per_block: bool) -> anyhow::Result<Self> {
        Self::read(files, doc_per_block, CorpusBuilder::new())
    }

    /// Read held-out text against the vocabulary of a training corpus.
    /// Words the training corpus never saw become [`UNKNOWN_WORD`].
    pub fn load_with_vocab(
        files: &[Box<str>],
        doc_per_block: bool,
        vocab: &[Box<str>],
    ) -> anyhow::Result<Self> {
        Self::read(files, doc_per_block, CorpusBuilder::with_vocab(vocab))
    }

    fn read(
        files: &[Box<str>],
        doc_per_block: bool,
        mut builder: CorpusBuilder,
    ) -> anyhow::Result<Self> {
        for file in files {
            builder.start_document();
            let buf = open_buf_reader(file)?;
            for line in buf.lines() {
                let line = line?;
                let tokens: Vec<&str> = line.split_whitespace().collect();
                if tokens.is_empty() {
                    if doc_per_block {
                        builder.start_document();
                    }
                    continue;
                }
                builder.push_sentence(&tokens);
            }
        }
        let num_unknown = builder.num_unknown();
        let corpus = builder.build();
        anyhow::ensure!(!corpus.is_empty(), "no tokens found in the input files");
        info!(
            "corpus: {} tokens, {} word types, {} sentences, {} documents",
            corpus.len(),
            corpus.vocab_size(),
            corpus.num_sentences(),
            corpus.num_documents()
        );
        if num_unknown > 0 {
            info!("{} tokens outside the vocabulary", num_unknown);
        }
        Ok(corpus)
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.word.len()
    }

    /// True if there are no tokens
    pub fn is_empty(&self) -> bool {
        self.word.is_empty()
    }

    /// Number of word types
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Number of documents
    pub fn num_documents(&self) -> usize {
        self.num_documents
    }

    /// Number of sentences
    pub fn num_sentences(&self) -> usize {
        self.num_sentences
    }

    /// Word id of token `i`
    #[inline]
    pub fn word(&self, i: usize) -> usize {
        self.word[i]
    }

    /// Document id of token `i`
    #[inline]
    pub fn document(&self, i: usize) -> usize {
        self.document[i]
    }

    /// Sentence id of token `i`
    #[inline]
    pub fn sentence(&self, i: usize) -> usize {
        self.sentence[i]
    }

    /// Word ids of all tokens
    pub fn words(&self) -> &[usize] {
        &self.word
    }

    /// Sentence ids of all tokens
    pub fn sentences(&self) -> &[usize] {
        &self.sentence
    }

    /// Document ids of all tokens
    pub fn documents(&self) -> &[usize] {
        &self.document
    }

    /// True if `j` is a valid token in the same sentence as `i`
    #[inline]
    pub fn same_sentence(&self, i: usize, j: usize) -> bool {
        j < self.len() && self.sentence[i] == self.sentence[j]
    }

    /// True if token `i` opens a sentence
    #[inline]
    pub fn is_sentence_start(&self, i: usize) -> bool {
        i == 0 || self.sentence[i - 1] != self.sentence[i]
    }

    /// True if token `i` closes a sentence
    #[inline]
    pub fn is_sentence_end(&self, i: usize) -> bool {
        !self.same_sentence(i, i + 1)
    }

    /// Token ranges of the sentences inside `range`, in order
    pub fn sentence_ranges(&self, range: Range<usize>) -> Vec<Range<usize>> {
        let mut out = vec![];
        let mut lb = range.start;
        for i in range.clone() {
            if self.is_sentence_end(i) || i + 1 == range.end {
                out.push(lb..(i + 1));
                lb = i + 1;
            }
        }
        out
    }

    /// Surface form of word `w`
    pub fn word_name(&self, w: usize) -> &str {
        &self.vocab[w]
    }

    /// All surface forms, indexed by word id
    pub fn vocab(&self) -> &[Box<str>] {
        &self.vocab
    }
}

/// Incremental construction of a [`Corpus`] from string tokens.
///
/// Word ids follow first occurrence, or a fixed vocabulary. Documents
/// without sentences are dropped.
#[derive(Debug, Default)]
pub struct CorpusBuilder {
    word: Vec<usize>,
    document: Vec<usize>,
    sentence: Vec<usize>,
    vocab: Vec<Box<str>>,
    index: HashMap<Box<str>, usize>,
    unknown: Option<usize>,
    num_unknown: usize,
    num_documents: usize,
    num_sentences: usize,
    open_document: bool,
}

impl CorpusBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder over a fixed vocabulary. Known words keep their ids; every
    /// other word takes the id of [`UNKNOWN_WORD`], which is appended to
    /// the vocabulary unless it is already in it.
    pub fn with_vocab(vocab: &[Box<str>]) -> Self {
        let mut vocab = vocab.to_vec();
        let mut index: HashMap<Box<str>, usize> = vocab
            .iter()
            .enumerate()
            .map(|(w, x)| (x.clone(), w))
            .collect();
        let unknown = match index.get(UNKNOWN_WORD) {
            Some(&w) => w,
            None => {
                let w = vocab.len();
                vocab.push(UNKNOWN_WORD.into());
                index.insert(UNKNOWN_WORD.into(), w);
                w
            }
        };
        CorpusBuilder {
            vocab,
            index,
            unknown: Some(unknown),
            ..Default::default()
        }
    }

    /// Tokens mapped to [`UNKNOWN_WORD`] so far
    pub fn num_unknown(&self) -> usize {
        self.num_unknown
    }

    /// Following sentences belong to a new document
    pub fn start_document(&mut self) {
        if self.open_document {
            self.num_documents += 1;
            self.open_document = false;
        }
    }

    /// Append one sentence to the current document
    pub fn push_sentence<S: AsRef<str>>(&mut self, tokens: &[S]) {
        if tokens.is_empty() {
            return;
        }
        self.open_document = true;
        for tok in tokens {
            let tok = tok.as_ref();
            let w = match (self.index.get(tok), self.unknown) {
                (Some(&w), _) => w,
                (None, Some(u)) => {
                    self.num_unknown += 1;
                    u
                }
                (None, None) => {
                    let w = self.vocab.len();
                    self.vocab.push(tok.into());
                    self.index.insert(tok.into(), w);
                    w
                }
            };
            self.word.push(w);
            self.document.push(self.num_documents);
            self.sentence.push(self.num_sentences);
        }
        self.num_sentences += 1;
    }

    /// Finish
    pub fn build(mut self) -> Corpus {
        self.start_document();
        Corpus {
            word: self.word,
            document: self.document,
            sentence: self.sentence,
            vocab: self.vocab,
            num_documents: self.num_documents,
            num_sentences: self.num_sentences,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builder_assigns_ids_by_first_occurrence() {
        let mut b = CorpusBuilder::new();
        b.push_sentence(&["the", "cat", "sat"]);
        b.push_sentence(&["the", "dog"]);
        b.start_document();
        b.start_document();
        b.push_sentence(&["a", "cat"]);
        let c = b.build();

        assert_eq!(c.len(), 7);
        assert_eq!(c.vocab_size(), 5);
        assert_eq!(c.num_sentences(), 3);
        assert_eq!(c.num_documents(), 2);
        assert_eq!(c.word(3), 0);
        assert_eq!(c.word(6), 1);
        assert_eq!(c.document(6), 1);
        assert!(c.is_sentence_start(3));
        assert!(c.is_sentence_end(2));
        assert!(c.is_sentence_end(6));
        assert_eq!(c.sentence_ranges(0..7), vec![0..3, 3..5, 5..7]);
        assert_eq!(c.sentence_ranges(3..7), vec![3..5, 5..7]);
    }

    #[test]
    fn from_ids_rejects_decreasing_sentences() {
        assert!(Corpus::from_ids(vec![0, 1], vec![0, 0], vec![1, 0], 2).is_err());
        assert!(Corpus::from_ids(vec![0, 1], vec![0, 1], vec![0, 0], 2).is_err());
        assert!(Corpus::from_ids(vec![0, 3], vec![0, 0], vec![0, 0], 2).is_err());
        assert!(Corpus::from_ids(vec![1, 2, 3], vec![0, 0, 0], vec![0, 0, 0], 4).is_ok());
    }

    #[test]
    fn load_blocks_as_documents() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("text.txt");
        let mut f = std::fs::File::create(&path)?;
        writeln!(f, "the cat sat")?;
        writeln!(f, "on the mat")?;
        writeln!(f)?;
        writeln!(f, "a dog ran")?;
        drop(f);

        let files = vec![path.to_str().unwrap().into()];
        let c = Corpus::load(&files, true)?;
        assert_eq!(c.num_documents(), 2);
        assert_eq!(c.num_sentences(), 3);
        assert_eq!(c.word_name(c.word(4)), "the");

        let c = Corpus::load(&files, false)?;
        assert_eq!(c.num_documents(), 1);
        Ok(())
    }

    #[test]
    fn held_out_words_keep_training_ids() {
        let mut b = CorpusBuilder::new();
        b.push_sentence(&["the", "cat", "sat"]);
        let train = b.build();

        let mut b = CorpusBuilder::with_vocab(train.vocab());
        b.push_sentence(&["the", "owl", "sat", "down"]);
        assert_eq!(b.num_unknown(), 2);
        let test = b.build();
        assert_eq!(test.vocab_size(), 4);
        assert_eq!(test.words(), &[0, 3, 2, 3]);
        assert_eq!(test.word_name(1), "cat");
        assert_eq!(test.word_name(3), UNKNOWN_WORD);

        // a vocabulary that already has the unknown word reuses it
        let mut b = CorpusBuilder::with_vocab(test.vocab());
        b.push_sentence(&["owl"]);
        assert_eq!(b.build().vocab_size(), 4);
    }
}
