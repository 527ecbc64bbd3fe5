//! The training driver: worker threads, learning-rate decay, progress, and
//! paragraph inference.

use std::mem;
use std::ops::Range;
use std::panic;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context as _, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::config::TrainConfig;
use crate::context::ContextWindowGenerator;
use crate::corpus::Corpus;
use crate::network::{Network, Scratch};
use crate::real;
use crate::rng::Rng;
use crate::table::{EmbeddingTable, Init};
use crate::vocab::{self, BuildOptions, CorpusCounts, Vocabulary, UNKNOWN_SYMBOL};

/// Words a worker processes between updates of the shared word count.
const PROGRESS_INTERVAL: u64 = 10_000;

/// Learning rate after `processed` of `total` words, decaying linearly to
/// 1/10000 of the starting rate.
pub fn learning_rate(start: real, processed: u64, total: u64) -> real {
    start * (1.0 - processed as real / (total + 1) as real).max(0.0001)
}

/// Word counts shared by the workers of one run.
struct Progress {
    processed: AtomicU64,
    total: u64,
    start: Instant,
    bar: ProgressBar,
}

impl Progress {
    fn new(total: u64, visible: bool) -> Result<Self> {
        let bar = if visible {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40} {percent:>3}% {msg}")?,
            );
            bar
        } else {
            ProgressBar::hidden()
        };
        Ok(Progress {
            processed: AtomicU64::new(0),
            total,
            start: Instant::now(),
            bar,
        })
    }

    /// Record `n` more words; returns the new total.
    fn add(&self, n: u64) -> u64 {
        let processed = self.processed.fetch_add(n, Ordering::Relaxed) + n;
        self.bar.set_position(processed.min(self.total));
        processed
    }

    fn words_per_sec(&self) -> f64 {
        self.processed.load(Ordering::Relaxed) as f64 / (self.start.elapsed().as_secs_f64() + 1e-9)
    }
}

#[derive(Debug)]
pub struct Trainer {
    config: TrainConfig,
    vocab: Vocabulary,
    /// Paragraph keys; row `i` of the paragraph table belongs to item `i`.
    paragraphs: Vocabulary,
    network: Network,
}

impl Trainer {
    /// Count the corpus and set up a fresh network for it.
    pub fn from_corpus(config: TrainConfig, corpus: &Corpus) -> Result<Self> {
        config.validate()?;
        let counts = vocab::build_from_corpus(corpus, &build_options(&config))?;
        info!(
            lines = counts.lines,
            words = counts.words.len(),
            "learned vocabulary from {:?}",
            corpus.path()
        );
        Trainer::from_counts(config, counts)
    }

    /// Apply `min_count` to freshly counted words, then set up the network.
    pub fn from_counts(config: TrainConfig, counts: CorpusCounts) -> Result<Self> {
        let CorpusCounts {
            mut words,
            mut paragraphs,
            ..
        } = counts;
        words.reduce(config.min_count, config.replace_unknown);
        paragraphs.sort();
        Trainer::new(config, words, paragraphs)
    }

    /// Set up a fresh network over the given vocabularies. `vocab` is used as is.
    pub fn new(config: TrainConfig, mut vocab: Vocabulary, mut paragraphs: Vocabulary) -> Result<Self> {
        config.validate()?;
        if !vocab.is_encoded() {
            vocab.sort();
            vocab
                .encode_huffman()
                .context("error building the Huffman tree")?;
        }
        if !config.model.uses_paragraphs() {
            paragraphs = Vocabulary::new();
        } else if paragraphs.len() < 2 {
            warn!("no paragraphs in the vocabulary; every line will be skipped");
        }
        info!(
            vocab_size = vocab.len(),
            train_words = vocab.train_words(),
            paragraphs = paragraphs.len() - 1,
            "vocabulary ready"
        );
        let mut rng = Rng::new(config.seed);
        let network = Network::new(&config, &vocab, &paragraphs, &mut rng)?;
        Ok(Trainer {
            config,
            vocab,
            paragraphs,
            network,
        })
    }

    /// Reassemble a trainer from saved parts.
    pub fn from_parts(
        config: TrainConfig,
        vocab: Vocabulary,
        paragraphs: Vocabulary,
        network: Network,
    ) -> Result<Self> {
        config.validate()?;
        if network.words().rows() != vocab.len() {
            bail!(
                "word table has {} rows for a vocabulary of {}",
                network.words().rows(),
                vocab.len()
            );
        }
        if let Some(table) = network.paragraphs() {
            if table.rows() != paragraphs.len() {
                bail!(
                    "paragraph table has {} rows for {} paragraphs",
                    table.rows(),
                    paragraphs.len()
                );
            }
        }
        Ok(Trainer {
            config,
            vocab,
            paragraphs,
            network,
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn paragraphs(&self) -> &Vocabulary {
        &self.paragraphs
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Run every epoch of training over `corpus`.
    pub fn train(&mut self, corpus: &Corpus) -> Result<()> {
        info!(
            model = %self.config.model,
            threads = self.config.threads,
            epochs = self.config.epochs,
            "starting training using file {:?}",
            corpus.path()
        );
        let total = self.vocab.train_words();
        self.run(corpus, self.config.epochs, total)
    }

    /// Learn vectors for the paragraphs of `corpus` with the word vectors and
    /// the output layer held fixed.
    ///
    /// Returns the new paragraphs and their vectors. The trainer's own
    /// paragraph table is left as it was.
    pub fn infer(&mut self, corpus: &Corpus, epochs: usize) -> Result<(Vocabulary, EmbeddingTable)> {
        if !self.config.model.uses_paragraphs() {
            bail!("the {} model has no paragraph vectors to infer", self.config.model);
        }
        if epochs == 0 {
            bail!("inference needs at least one epoch");
        }
        let counts = vocab::build_from_corpus(corpus, &build_options(&self.config))?;
        let mut paragraphs = counts.paragraphs;
        paragraphs.sort();
        let mut rng = Rng::new(self.config.seed ^ 0x5DEE_CE66);
        let table = EmbeddingTable::new(paragraphs.len(), self.config.dim, Init::Uniform, &mut rng)?;
        info!(paragraphs = paragraphs.len() - 1, epochs, "inferring paragraph vectors");

        let saved_paragraphs = mem::replace(&mut self.paragraphs, paragraphs);
        let saved_table = self.network.replace_paragraphs(table);
        self.network.freeze(true);

        let total = words_in_vocab(&self.vocab, &counts.words);
        let result = self.run(corpus, epochs, total);

        self.network.freeze(false);
        let table = match saved_table {
            Some(saved) => self.network.replace_paragraphs(saved),
            None => None,
        };
        let paragraphs = mem::replace(&mut self.paragraphs, saved_paragraphs);
        result?;
        match table {
            Some(table) => Ok((paragraphs, table)),
            None => bail!("paragraph table missing after inference"),
        }
    }

    /// `words_per_epoch` sets the pace of the learning-rate decay.
    fn run(&self, corpus: &Corpus, epochs: usize, words_per_epoch: u64) -> Result<()> {
        let total = epochs as u64 * words_per_epoch;
        let progress = Progress::new(total, self.config.progress)?;
        let ranges = corpus.partition(self.config.threads);
        for epoch in 0..epochs {
            thread::scope(|s| {
                let progress = &progress;
                let handles = ranges
                    .iter()
                    .cloned()
                    .enumerate()
                    .map(|(id, range)| {
                        s.spawn(move || self.train_shard(corpus, range, id, epoch, total, progress))
                    })
                    .collect::<Vec<_>>();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
                    .collect::<Result<Vec<()>>>()
            })
            .with_context(|| format!("training failed in epoch {}", epoch + 1))?;

            let processed = progress.processed.load(Ordering::Relaxed);
            info!(
                epoch = epoch + 1,
                alpha = learning_rate(self.config.starting_alpha(), processed, total),
                words_per_sec = progress.words_per_sec() as u64,
                "finished epoch"
            );
        }
        progress.bar.finish_and_clear();
        Ok(())
    }

    fn train_shard(
        &self,
        corpus: &Corpus,
        range: Range<usize>,
        id: usize,
        epoch: usize,
        total: u64,
        progress: &Progress,
    ) -> Result<()> {
        let config = &self.config;
        let starting_alpha = config.starting_alpha();
        let uses_paragraphs = config.model.uses_paragraphs();
        let unknown = self.vocab.lookup(UNKNOWN_SYMBOL);
        let train_words = self.vocab.train_words();

        let mut rng = Rng::for_worker(config.seed, id, epoch);
        let mut gen = ContextWindowGenerator::new(config.window_spec())?;
        let mut scratch = Scratch::new(config.hidden_size());
        let mut reader = corpus.reader_at(range.start)?;

        let mut alpha = learning_rate(starting_alpha, progress.processed.load(Ordering::Relaxed), total);
        let mut word_count: u64 = 0;
        let mut last_word_count: u64 = 0;
        let mut sen: Vec<usize> = Vec::with_capacity(config.max_line_length);
        for _ in range {
            let line = match reader.next_line()? {
                Some(line) => line,
                None => break,
            };
            let paragraph = if uses_paragraphs {
                match self.paragraphs.lookup(&line.paragraph_key()) {
                    Some(p) => Some(p),
                    None => continue,
                }
            } else {
                None
            };

            sen.clear();
            for token in &line.tokens {
                let word = match self.vocab.lookup(token).or(unknown) {
                    Some(0) | None => continue,
                    Some(w) => w,
                };
                word_count += 1;

                // The subsampling randomly discards frequent words while keeping the ranking same
                if config.sample > 0.0 {
                    let f = self.vocab.get(word).count as real;
                    let k = config.sample * train_words as real;
                    let ran = ((f / k).sqrt() + 1.0) * k / f;
                    if ran < rng.next_float() {
                        continue;
                    }
                }
                sen.push(word);
            }

            for chunk in sen.chunks(config.max_line_length) {
                for position in 0..chunk.len() {
                    let ctx = gen.generate(chunk, paragraph, position, &mut rng);
                    if ctx.size() > 0 {
                        self.network.train(ctx, alpha, &mut scratch, &mut rng);
                    }
                }
            }

            if word_count - last_word_count > PROGRESS_INTERVAL {
                let processed = progress.add(word_count - last_word_count);
                last_word_count = word_count;
                alpha = learning_rate(starting_alpha, processed, total);
            }
        }
        progress.add(word_count - last_word_count);
        debug!(worker = id, epoch = epoch + 1, words = word_count, "worker done");
        Ok(())
    }
}

/// How many of the tokens counted in `counts` a worker trains on: those in
/// `vocab`, or standing in for its `<unk>`, other than `</s>`.
fn words_in_vocab(vocab: &Vocabulary, counts: &Vocabulary) -> u64 {
    let unknown = vocab.lookup(UNKNOWN_SYMBOL);
    counts
        .iter()
        .filter(|item| matches!(vocab.lookup(&item.key).or(unknown), Some(w) if w != 0))
        .map(|item| item.count)
        .sum()
}

fn build_options(config: &TrainConfig) -> BuildOptions {
    BuildOptions {
        workers: config.threads,
        max_vocab_size: config.max_vocab_size,
        paragraphs: config.model.uses_paragraphs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::ItemKind;

    fn vocab_of(words: &[(&str, u64)]) -> Vocabulary {
        let mut vocab = Vocabulary::new();
        for &(w, n) in words {
            vocab.add_count(w, ItemKind::Word, n);
        }
        vocab.sort();
        vocab
    }

    #[test]
    fn test_words_in_vocab_skips_what_training_skips() {
        let mut counts = Vocabulary::new();
        counts.add_count(vocab::START_SYMBOL, ItemKind::Special, 4);
        counts.add_count("the", ItemKind::Word, 6);
        counts.add_count("cat", ItemKind::Word, 2);
        counts.add_count("zebra", ItemKind::Word, 9);

        let plain = vocab_of(&[("the", 5), ("cat", 3)]);
        assert_eq!(words_in_vocab(&plain, &counts), 8);

        // unknown words stand in for <unk> when the vocabulary has one
        let with_unk = vocab_of(&[("the", 5), ("cat", 3), (UNKNOWN_SYMBOL, 1)]);
        assert_eq!(words_in_vocab(&with_unk, &counts), 17);
    }

    #[test]
    fn test_learning_rate_decay() {
        assert_eq!(learning_rate(0.025, 0, 1000), 0.025);
        let half = learning_rate(0.025, 500, 999);
        assert!((half - 0.0125).abs() < 1e-6);
        // floor at 1/10000 of the start
        assert_eq!(learning_rate(0.025, 5000, 1000), 0.025 * 0.0001);
        assert!(learning_rate(0.05, 10, 100) < learning_rate(0.05, 9, 100));
    }
}
