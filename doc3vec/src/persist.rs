//! Reading and writing vocabularies, vectors, word classes and whole models.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::TrainConfig;
use crate::layers::OutputLayer;
use crate::network::Network;
use crate::real;
use crate::table::{EmbeddingTable, TableRecord};
use crate::train::Trainer;
use crate::vocab::{ItemKind, VocabItem, Vocabulary, START_SYMBOL, UNKNOWN_SYMBOL};

/// Third field marking a paragraph line in a vocabulary file.
const PARAGRAPH_TAG: &str = "paragraph";

/// Write one `key count` line per word, then one `key count paragraph` line
/// per paragraph.
pub fn save_vocab(vocab_file: &Path, words: &Vocabulary, paragraphs: &Vocabulary) -> Result<()> {
    let mut fo = BufWriter::new(
        File::create(vocab_file).context("error creating vocab file for write")?,
    );
    for item in words.iter() {
        writeln!(fo, "{} {}", item.key, item.count).context("error writing vocab file")?;
    }
    for item in paragraphs.iter().skip(1) {
        writeln!(fo, "{} {} {PARAGRAPH_TAG}", item.key, item.count)
            .context("error writing vocab file")?;
    }
    fo.flush().context("error writing vocab file")?;
    Ok(())
}

/// Read a file written by `save_vocab`. Returns the words, sorted and
/// Huffman-encoded, and the paragraphs, sorted.
pub fn read_vocab(vocab_file: &Path) -> Result<(Vocabulary, Vocabulary)> {
    let fin = BufReader::new(File::open(vocab_file).context("error opening vocabulary file")?);
    let mut words = Vocabulary::new();
    let mut paragraphs = Vocabulary::new();
    let mut seen = std::collections::HashSet::new();

    for (line_num, line) in fin.lines().enumerate() {
        let line = line.context("error reading vocabulary file")?;
        let fields = line.split_whitespace().collect::<Vec<&str>>();
        if fields.is_empty() {
            continue;
        }
        let (key, kind) = match fields[..] {
            [key, _] if key == START_SYMBOL || key == UNKNOWN_SYMBOL => (key, ItemKind::Special),
            [key, _] => (key, ItemKind::Word),
            [key, _, PARAGRAPH_TAG] => (key, ItemKind::Paragraph),
            _ => bail!("vocabulary file syntax error on line {}", line_num + 1),
        };
        let count = fields[1].parse::<u64>().with_context(|| {
            format!(
                "error reading vocabulary file: unrecognized frequency number format on line {}",
                line_num + 1
            )
        })?;
        anyhow::ensure!(
            seen.insert((kind == ItemKind::Paragraph, key.to_string())),
            "vocabulary file lists {key:?} twice (line {})",
            line_num + 1
        );

        match kind {
            ItemKind::Paragraph => paragraphs.add_count(key, kind, count),
            _ => words.add_count(key, kind, count),
        };
    }

    words.sort();
    words
        .encode_huffman()
        .context("error building the Huffman tree")?;
    paragraphs.sort();
    Ok((words, paragraphs))
}

/// Write vectors in the word2vec format: a `rows cols` header, then each key
/// followed by its vector, as text or as little-endian `f32`s.
pub fn save_vectors(output_file: &Path, keys: &Vocabulary, table: &EmbeddingTable, binary: bool) -> Result<()> {
    if keys.len() != table.rows() {
        bail!("{} keys for {} vectors", keys.len(), table.rows());
    }
    let mut fo = BufWriter::new(File::create(output_file).context("error creating output file")?);
    writeln!(fo, "{} {}", table.rows(), table.cols()).context("error writing output file")?;
    for (a, item) in keys.iter().enumerate() {
        write!(fo, "{} ", item.key).context("error writing output file")?;
        let vector = table.row_vec(a);
        if binary {
            let bits: Vec<u32> = vector.iter().map(|f| f.to_bits().to_le()).collect();
            fo.write_all(bytemuck::cast_slice::<u32, u8>(&bits))
                .context("error writing output file")?;
        } else {
            for f in &vector {
                write!(fo, "{} ", f).context("error writing output file")?;
            }
        }
        writeln!(fo).context("error writing output file")?;
    }
    fo.flush().context("error writing output file")?;
    Ok(())
}

/// Write one `key class` line per item.
pub fn save_classes(output_file: &Path, keys: &Vocabulary, classes: &[usize]) -> Result<()> {
    let mut fo = BufWriter::new(File::create(output_file).context("error creating output file")?);
    for (item, class) in keys.iter().zip(classes) {
        writeln!(fo, "{} {}", item.key, class)
            .context("error writing k-means classes to output file")?;
    }
    fo.flush().context("error writing output file")?;
    Ok(())
}

/// Everything needed to resume training or infer paragraph vectors.
#[derive(Serialize, Deserialize)]
struct Model {
    config: TrainConfig,
    vocab: Vec<VocabItem>,
    paragraphs: Vec<VocabItem>,
    words: TableRecord,
    paragraph_vectors: Option<TableRecord>,
    output: TableRecord,
}

pub fn save_model(model_file: &Path, trainer: &Trainer) -> Result<()> {
    let network = trainer.network();
    let model = Model {
        config: trainer.config().clone(),
        vocab: trainer.vocab().items().to_vec(),
        paragraphs: trainer.paragraphs().items().to_vec(),
        words: network.words().to_record(),
        paragraph_vectors: network.paragraphs().map(EmbeddingTable::to_record),
        output: network.output().save(),
    };
    let mut fo = BufWriter::new(
        File::create(model_file)
            .with_context(|| format!("error creating model file {model_file:?}"))?,
    );
    bincode::serialize_into(&mut fo, &model)
        .with_context(|| format!("error writing model file {model_file:?}"))?;
    fo.flush().context("error writing model file")?;
    Ok(())
}

/// Load a model written by `save_model`, checking that every part agrees
/// with every other.
pub fn load_model(model_file: &Path) -> Result<Trainer> {
    let f = BufReader::new(
        File::open(model_file).with_context(|| format!("failed to open model file {model_file:?}"))?,
    );
    let model: Model = bincode::deserialize_from(f)
        .with_context(|| format!("failed to load model from file {model_file:?}"))?;

    let mut vocab = Vocabulary::from_records(model.vocab).context("corrupt vocabulary in model file")?;
    if !vocab.is_encoded() {
        vocab.encode_huffman()?;
    }
    let paragraphs =
        Vocabulary::from_records(model.paragraphs).context("corrupt paragraph list in model file")?;
    let words = EmbeddingTable::from_record(&model.words).context("corrupt word vectors in model file")?;
    let paragraph_vectors = model
        .paragraph_vectors
        .as_ref()
        .map(EmbeddingTable::from_record)
        .transpose()
        .context("corrupt paragraph vectors in model file")?;
    let output = OutputLayer::load(&model.config, &vocab, &model.output)
        .context("corrupt output layer in model file")?;
    let network = Network::from_parts(&model.config, words, paragraph_vectors, output)?;
    Trainer::from_parts(model.config, vocab, paragraphs, network)
}

/// Read vectors written by `save_vectors` in text mode.
pub fn read_text_vectors(input_file: &Path) -> Result<(Vec<String>, Vec<Vec<real>>)> {
    let fin = BufReader::new(File::open(input_file).context("error opening vectors file")?);
    let mut lines = fin.lines();
    let header = lines
        .next()
        .transpose()
        .context("error reading vectors file")?
        .unwrap_or_default();
    let dims = header
        .split_whitespace()
        .map(str::parse::<usize>)
        .collect::<Result<Vec<usize>, _>>()
        .context("bad header in vectors file")?;
    let &[rows, cols] = dims.as_slice() else {
        bail!("bad header in vectors file: {header:?}");
    };

    let mut keys = Vec::with_capacity(rows);
    let mut vectors = Vec::with_capacity(rows);
    for line in lines {
        let line = line.context("error reading vectors file")?;
        let mut fields = line.split_whitespace();
        let Some(key) = fields.next() else {
            continue;
        };
        let vector = fields
            .map(str::parse::<real>)
            .collect::<Result<Vec<real>, _>>()
            .with_context(|| format!("bad number in the vector for {key:?}"))?;
        anyhow::ensure!(
            vector.len() == cols,
            "vector for {key:?} has {} values, expected {cols}",
            vector.len()
        );
        keys.push(key.to_string());
        vectors.push(vector);
    }
    anyhow::ensure!(
        keys.len() == rows,
        "vectors file has {} rows, header says {rows}",
        keys.len()
    );
    Ok((keys, vectors))
}
