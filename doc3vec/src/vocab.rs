//! The vocabulary: every word (or paragraph) seen in the corpus, with its
//! count and, once encoded, its Huffman code.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::ops::Range;
use std::panic;
use std::thread;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::corpus::Corpus;
use crate::error::VocabError;
use crate::huffman;
use crate::negative::NegativeTable;
use crate::MAX_CODE_LENGTH;

/// Reserved item 0. Counted once per line.
pub const START_SYMBOL: &str = "</s>";

/// Stands in for every word dropped by `Vocabulary::reduce` with `replace`.
pub const UNKNOWN_SYMBOL: &str = "<unk>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Word,
    Paragraph,
    Special,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabItem {
    pub key: String,
    pub kind: ItemKind,
    pub count: u64,
    /// Position in the vocabulary.
    pub index: usize,
    /// Huffman code; empty until the vocabulary is encoded.
    pub code: Vec<u8>,
    /// Internal tree nodes from the root down, parallel to `code`.
    pub point: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct Vocabulary {
    items: Vec<VocabItem>,
    index: HashMap<String, usize>,
    /// Count threshold of the next `prune`.
    min_reduce: u64,
    encoded: bool,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Vocabulary::new()
    }
}

impl Vocabulary {
    /// An empty vocabulary, holding only the start symbol.
    pub fn new() -> Self {
        let mut vocab = Vocabulary {
            items: Vec::with_capacity(1000),
            index: HashMap::new(),
            min_reduce: 1,
            encoded: false,
        };
        vocab.add_count(START_SYMBOL, ItemKind::Special, 0);
        vocab
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Never true: the start symbol is always present.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> &VocabItem {
        &self.items[index]
    }

    /// Returns position of a key in the vocabulary.
    pub fn lookup(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn items(&self) -> &[VocabItem] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &VocabItem> {
        self.items.iter()
    }

    pub fn counts(&self) -> Vec<u64> {
        self.items.iter().map(|item| item.count).collect()
    }

    /// Total count of everything but the start symbol.
    pub fn train_words(&self) -> u64 {
        self.items[1..].iter().map(|item| item.count).sum()
    }

    pub fn is_encoded(&self) -> bool {
        self.encoded
    }

    /// Count one more occurrence of a word.
    pub fn add_or_increment(&mut self, word: &str) -> usize {
        self.add_count(word, ItemKind::Word, 1)
    }

    /// Add `n` to the count of `key`, creating it with kind `kind` if absent.
    pub fn add_count(&mut self, key: &str, kind: ItemKind, n: u64) -> usize {
        if let Some(&i) = self.index.get(key) {
            self.items[i].count += n;
            return i;
        }
        let i = self.items.len();
        self.items.push(VocabItem {
            key: key.to_string(),
            kind,
            count: n,
            index: i,
            code: Vec::new(),
            point: Vec::new(),
        });
        self.index.insert(key.to_string(), i);
        self.invalidate();
        i
    }

    fn invalidate(&mut self) {
        if self.encoded {
            for item in &mut self.items {
                item.code.clear();
                item.point.clear();
            }
            self.encoded = false;
        }
    }

    /// Add the counts of `other` to this vocabulary.
    pub fn merge(&mut self, other: Vocabulary) {
        self.min_reduce = self.min_reduce.max(other.min_reduce);
        for item in other.items {
            if let Some(&i) = self.index.get(&item.key) {
                self.items[i].count += item.count;
            } else {
                let i = self.items.len();
                self.index.insert(item.key.clone(), i);
                self.items.push(VocabItem {
                    index: i,
                    code: Vec::new(),
                    point: Vec::new(),
                    ..item
                });
            }
        }
        self.invalidate();
    }

    /// Keep the vocabulary under `max_size` items while counting by dropping
    /// the rarest words, raising the bar every time.
    pub fn prune(&mut self, max_size: usize) {
        if self.items.len() <= max_size {
            return;
        }
        let min_reduce = self.min_reduce;
        let mut i = 0;
        self.items.retain(|item| {
            let keep = i == 0 || item.kind != ItemKind::Word || item.count > min_reduce;
            i += 1;
            keep
        });
        self.reindex();
        self.min_reduce += 1;
    }

    /// Drop words seen fewer than `min_count` times, then sort.
    ///
    /// With `replace`, their counts are folded into the `<unk>` item.
    pub fn reduce(&mut self, min_count: u64, replace: bool) {
        let mut removed = 0;
        let mut i = 0;
        self.items.retain(|item| {
            let keep = i == 0 || item.kind != ItemKind::Word || item.count >= min_count;
            if !keep {
                removed += item.count;
            }
            i += 1;
            keep
        });
        self.reindex();
        if replace && removed > 0 {
            self.add_count(UNKNOWN_SYMBOL, ItemKind::Special, removed);
        }
        self.sort();
    }

    /// Sort by descending count, keeping the start symbol at position 0.
    /// Items with equal counts keep their relative order.
    pub fn sort(&mut self) {
        if let Some(pos) = self.items.iter().position(|item| item.key == START_SYMBOL) {
            if pos != 0 {
                let start = self.items.remove(pos);
                self.items.insert(0, start);
            }
        }
        self.items[1..].sort_by_key(|item| Reverse(item.count));
        self.reindex();
    }

    // Positions changed: the index map, the stored indexes and the codes are
    // all stale.
    fn reindex(&mut self) {
        self.index.clear();
        for (i, item) in self.items.iter_mut().enumerate() {
            item.index = i;
            item.code.clear();
            item.point.clear();
            self.index.insert(item.key.clone(), i);
        }
        self.encoded = false;
    }

    /// Assign every item its Huffman code and path. Sort first.
    pub fn encode_huffman(&mut self) -> Result<(), VocabError> {
        let codes = huffman::encode(&self.counts(), MAX_CODE_LENGTH)?;
        for (item, c) in self.items.iter_mut().zip(codes) {
            item.code = c.code;
            item.point = c.point;
        }
        self.encoded = true;
        Ok(())
    }

    /// Table for drawing negative samples in proportion to `count^power`.
    pub fn build_negative_table(&self, size: usize, power: f64) -> Result<NegativeTable, VocabError> {
        NegativeTable::new(&self.counts(), size, power)
    }

    /// Rebuild a vocabulary from persisted items.
    ///
    /// The items must be in index order, sorted by count after the start
    /// symbol. Stored codes are not trusted: the tree is rebuilt from the
    /// counts, and any stored code that disagrees with it is an error.
    pub fn from_records(records: Vec<VocabItem>) -> Result<Self, VocabError> {
        match records.first() {
            Some(first) if first.key == START_SYMBOL => {}
            Some(first) => return Err(VocabError::MissingStart(first.key.clone())),
            None => return Err(VocabError::MissingStart(String::new())),
        }

        let mut index = HashMap::with_capacity(records.len());
        for (i, item) in records.iter().enumerate() {
            if item.index != i {
                return Err(VocabError::IndexOutOfPlace {
                    expected: i,
                    found: item.index,
                });
            }
            if i > 1 && item.count > records[i - 1].count {
                return Err(VocabError::NotSorted(i));
            }
            if index.insert(item.key.clone(), i).is_some() {
                return Err(VocabError::DuplicateKey(item.key.clone()));
            }
        }

        let has_codes = records.iter().any(|item| !item.code.is_empty());
        let mut vocab = Vocabulary {
            items: records,
            index,
            min_reduce: 1,
            encoded: false,
        };
        if has_codes {
            let stored: Vec<(Vec<u8>, Vec<u32>)> = vocab
                .items
                .iter()
                .map(|item| (item.code.clone(), item.point.clone()))
                .collect();
            vocab.encode_huffman()?;
            for (item, (code, point)) in vocab.items.iter().zip(stored) {
                if item.code != code || item.point != point {
                    return Err(VocabError::CodeMismatch(item.key.clone()));
                }
            }
        }
        Ok(vocab)
    }
}

/// Word and paragraph counts for (part of) a corpus.
#[derive(Debug, Clone, Default)]
pub struct CorpusCounts {
    pub words: Vocabulary,
    /// Paragraph items, counted by the number of words in each.
    pub paragraphs: Vocabulary,
    pub lines: usize,
}

impl CorpusCounts {
    pub fn merge(&mut self, other: CorpusCounts) {
        self.words.merge(other.words);
        self.paragraphs.merge(other.paragraphs);
        self.lines += other.lines;
    }
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub workers: usize,
    pub max_vocab_size: usize,
    /// Also count paragraphs.
    pub paragraphs: bool,
}

/// Count every word of the corpus using `options.workers` threads.
///
/// Each worker counts a contiguous range of lines into its own vocabulary.
/// The partial vocabularies are then merged pairwise, one round at a time,
/// halving their number each round. Any read error fails the whole build.
pub fn build_from_corpus(corpus: &Corpus, options: &BuildOptions) -> Result<CorpusCounts> {
    let ranges = corpus.partition(options.workers.max(1));
    let shards = thread::scope(|s| {
        let handles = ranges
            .into_iter()
            .map(|range| s.spawn(move || count_shard(corpus, range, options)))
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
            .collect::<Result<Vec<CorpusCounts>>>()
    })?;
    let counts = merge_tree(shards);
    debug!(
        lines = counts.lines,
        words = counts.words.len(),
        paragraphs = counts.paragraphs.len() - 1,
        "counted corpus"
    );
    Ok(counts)
}

fn count_shard(corpus: &Corpus, range: Range<usize>, options: &BuildOptions) -> Result<CorpusCounts> {
    let mut counts = CorpusCounts::default();
    let mut reader = corpus.reader_at(range.start)?;
    for _ in range {
        let line = match reader.next_line()? {
            Some(line) => line,
            None => break,
        };
        counts.lines += 1;
        counts.words.add_count(START_SYMBOL, ItemKind::Special, 1);
        for token in &line.tokens {
            counts.words.add_or_increment(token);
        }
        if options.paragraphs {
            counts.paragraphs.add_count(
                &line.paragraph_key(),
                ItemKind::Paragraph,
                line.tokens.len() as u64,
            );
        }
        counts.words.prune(options.max_vocab_size);
    }
    Ok(counts)
}

/// Merge partial counts pairwise until one is left. Each round merges its
/// pairs concurrently; an odd one out waits for the next round.
pub fn merge_tree(mut pending: Vec<CorpusCounts>) -> CorpusCounts {
    while pending.len() > 1 {
        let mut pairs = vec![];
        let mut it = pending.into_iter();
        while let Some(left) = it.next() {
            pairs.push((left, it.next()));
        }
        pending = thread::scope(|s| {
            let handles = pairs
                .into_iter()
                .map(|(mut left, right)| {
                    s.spawn(move || {
                        if let Some(right) = right {
                            left.merge(right);
                        }
                        left
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
                .collect()
        });
    }
    pending.pop().unwrap_or_default()
}
