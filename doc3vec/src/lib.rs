//! Word and paragraph embeddings: CBOW, skip-gram and the three paragraph
//! vector models, trained with hierarchical softmax or negative sampling by a
//! pool of threads sharing the weight matrices without locks.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::ops::Index;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

pub mod config;
pub mod context;
pub mod corpus;
pub mod error;
pub mod huffman;
pub mod kmeans;
pub mod layers;
pub mod math;
pub mod negative;
pub mod network;
pub mod persist;
pub mod rng;
pub mod table;
pub mod train;
pub mod vocab;

pub use config::{ModelKind, OutputKind, TrainConfig};
pub use context::{Context as TrainingContext, ContextWindowGenerator, ParagraphSlot, WindowSpec};
pub use corpus::{Corpus, Line, LineReader};
pub use error::{ConfigError, VocabError};
pub use layers::OutputLayer;
pub use negative::NegativeTable;
pub use network::Network;
pub use rng::Rng;
pub use table::{EmbeddingTable, Init, TableRecord};
pub use train::Trainer;
pub use vocab::{ItemKind, VocabItem, Vocabulary};

#[allow(non_camel_case_types)]
pub type real = f32; // Precision of float numbers

/// Tokens longer than this many bytes are truncated.
pub const MAX_STRING: usize = 100;

/// Lines are trained in chunks of at most this many words by default.
pub const MAX_SENTENCE_LENGTH: usize = 1000;

/// Longest Huffman code the hierarchical softmax accepts.
pub const MAX_CODE_LENGTH: usize = 40;

/// Word vectors read back from a file written in the binary word2vec format.
pub struct Vectors {
    /// Embedding vector length (number of dimensions).
    size: usize,

    /// The vocabulary.
    vocab: Vec<String>,

    /// Word to row number.
    rows: HashMap<String, usize>,

    /// `embeddings[k * size..(k+1) * size]` is the vector embedding for word `k`.
    embeddings: Vec<f32>,
}

pub fn norm(v: &[f32]) -> f32 {
    v.iter().copied().map(|e| e * e).sum::<f32>().sqrt()
}

pub fn normalize(v: &mut [f32]) {
    let len = norm(v);
    if len == 0.0 {
        return;
    }
    for e in v {
        *e /= len;
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(&a, &b)| a * b).sum()
}

impl Index<usize> for Vectors {
    type Output = [f32];

    fn index(&self, i: usize) -> &[f32] {
        &self.embeddings[i * self.size..][..self.size]
    }
}

impl Vectors {
    /// Load vectors saved with `persist::save_vectors` in binary mode. Every
    /// row is normalized to unit length.
    pub fn load(file_name: &Path) -> Result<Self> {
        let mut f = BufReader::new(File::open(file_name).context("error opening input file")?);
        let mut line = String::new();
        f.read_line(&mut line).context("error reading input file")?;
        let mut fields = line.split_whitespace();
        let num_words: usize = fields
            .next()
            .ok_or_else(|| anyhow!("invalid input file"))?
            .parse()
            .context("invalid input file")?;
        let size: usize = fields
            .next()
            .ok_or_else(|| anyhow!("invalid input file"))?
            .parse()
            .context("invalid input file")?;

        let mut vocab: Vec<String> = vec![];
        let mut m = vec![0.0; num_words * size];
        for b in 0..num_words {
            let mut vocab_word = Vec::<u8>::new();
            let count = f
                .read_until(b' ', &mut vocab_word)
                .context("error reading input file")?;
            if count == 0 {
                anyhow::bail!("input file ends after {b} of {num_words} vectors");
            }
            if vocab_word.last() == Some(&b' ') {
                vocab_word.pop();
            }
            vocab_word.retain(|c| *c != b'\n');
            vocab.push(String::from_utf8(vocab_word).context("invalid word in input file")?);

            let row = &mut m[b * size..][..size];
            f.read_exact(bytemuck::cast_slice_mut::<f32, u8>(row))
                .context("error reading input file")?;
            for x in row.iter_mut() {
                *x = f32::from_bits(u32::from_le(x.to_bits()));
            }
            normalize(row);
        }

        let rows = vocab
            .iter()
            .enumerate()
            .map(|(i, word)| (word.clone(), i))
            .collect();
        Ok(Vectors {
            size,
            vocab,
            rows,
            embeddings: m,
        })
    }

    pub fn num_words(&self) -> usize {
        self.vocab.len()
    }

    /// Returns the vector size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the index for a word as string. Exact match only, case-sensitive.
    pub fn lookup_word(&self, word: &str) -> Option<usize> {
        self.rows.get(word).copied()
    }

    /// Get the word for a word-index. Panics if `word` is out of range.
    pub fn word(&self, word: usize) -> &str {
        &self.vocab[word]
    }

    /// Cosine similarity of two rows.
    pub fn similarity(&self, a: usize, b: usize) -> f32 {
        dot(&self[a], &self[b])
    }
}
