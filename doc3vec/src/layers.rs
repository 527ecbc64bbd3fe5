//! The two output layers: hierarchical softmax and negative sampling.
//!
//! Both turn a hidden vector `h` into a prediction of a target word and,
//! going backward, accumulate the gradient with respect to `h` into `grad`
//! while updating their own weights. Gradients are already multiplied by the
//! learning rate and point uphill on the log-likelihood, so callers add them.

use anyhow::{bail, Result};

use crate::config::{ModelKind, OutputKind, TrainConfig};
use crate::huffman::HuffmanCode;
use crate::math::{log_sigmoid, Sigmoid, MAX_EXP};
use crate::negative::NegativeTable;
use crate::real;
use crate::rng::Rng;
use crate::table::{EmbeddingTable, Init, TableRecord};
use crate::vocab::Vocabulary;

/// How many times a negative sample equal to the target is redrawn before
/// that negative is skipped.
pub const MAX_NEGATIVE_RETRIES: usize = 10;

#[derive(Debug)]
pub struct HierarchicalSoftmax {
    /// One row per internal node of the Huffman tree.
    nodes: EmbeddingTable,
    codes: Vec<HuffmanCode>,
}

impl HierarchicalSoftmax {
    fn forward(&self, target: usize, h: &[real]) -> real {
        let HuffmanCode { code, point } = &self.codes[target];
        code.iter()
            .zip(point)
            .map(|(&bit, &node)| {
                let f = self.nodes.dot(node as usize, h);
                log_sigmoid(if bit == 0 { f } else { -f })
            })
            .sum()
    }

    fn backward(&self, target: usize, h: &[real], grad: &mut [real], alpha: real, sigmoid: &Sigmoid) {
        let HuffmanCode { code, point } = &self.codes[target];
        for (&bit, &node) in code.iter().zip(point) {
            let l2 = node as usize;
            // Propagate hidden -> output
            let f = self.nodes.dot(l2, h);
            if f <= -MAX_EXP || f >= MAX_EXP {
                continue;
            }
            // 'g' is the gradient multiplied by the learning rate
            let g = (1.0 - bit as real - sigmoid.get(f)) * alpha;
            self.nodes.backward_dot(l2, h, g, grad);
        }
    }
}

#[derive(Debug)]
pub struct NegativeSampling {
    /// One row per vocabulary item.
    weights: EmbeddingTable,
    table: NegativeTable,
    negative: usize,
}

impl NegativeSampling {
    /// Draw a negative example other than `target`.
    fn draw(&self, target: usize, rng: &mut Rng) -> Option<usize> {
        for _ in 0..=MAX_NEGATIVE_RETRIES {
            let sample = self.table.sample(rng);
            if sample != target {
                return Some(sample);
            }
        }
        None
    }

    fn forward(&self, target: usize, h: &[real]) -> real {
        log_sigmoid(self.weights.dot(target, h))
    }

    fn backward(
        &self,
        target: usize,
        h: &[real],
        grad: &mut [real],
        alpha: real,
        sigmoid: &Sigmoid,
        rng: &mut Rng,
    ) {
        for d in 0..self.negative + 1 {
            let (sample, label) = if d == 0 {
                (target, 1.0)
            } else {
                match self.draw(target, rng) {
                    Some(sample) => (sample, 0.0),
                    None => continue,
                }
            };
            let f = self.weights.dot(sample, h);
            let g = (label - sigmoid.get(f)) * alpha;
            self.weights.backward_dot(sample, h, g, grad);
        }
    }
}

#[derive(Debug)]
pub enum OutputLayer {
    HierarchicalSoftmax(HierarchicalSoftmax),
    NegativeSampling(NegativeSampling),
}

impl OutputLayer {
    /// A fresh output layer over `vocab` for hidden vectors of length `hidden`.
    pub fn new(config: &TrainConfig, vocab: &Vocabulary, hidden: usize, rng: &mut Rng) -> Result<Self> {
        let init = match config.model {
            ModelKind::PvdmConcat => Init::Sigmoid,
            _ => Init::Zero,
        };
        let rows = match config.output {
            OutputKind::HierarchicalSoftmax => vocab.len().saturating_sub(1),
            OutputKind::NegativeSampling => vocab.len(),
        };
        let table = EmbeddingTable::new(rows, hidden, init, rng)?;
        OutputLayer::with_table(config, vocab, table)
    }

    /// Rebuild an output layer from saved weights.
    pub fn load(config: &TrainConfig, vocab: &Vocabulary, record: &TableRecord) -> Result<Self> {
        let table = EmbeddingTable::from_record(record)?;
        if table.cols() != config.hidden_size() {
            bail!(
                "output layer rows have {} values, expected {}",
                table.cols(),
                config.hidden_size()
            );
        }
        OutputLayer::with_table(config, vocab, table)
    }

    fn with_table(config: &TrainConfig, vocab: &Vocabulary, table: EmbeddingTable) -> Result<Self> {
        if vocab.len() < 2 {
            bail!("vocabulary has {} items, an output layer needs at least 2", vocab.len());
        }
        match config.output {
            OutputKind::HierarchicalSoftmax => {
                if !vocab.is_encoded() {
                    bail!("hierarchical softmax needs a Huffman-encoded vocabulary");
                }
                if table.rows() != vocab.len() - 1 {
                    bail!(
                        "hierarchical softmax has {} node rows for a vocabulary of {}",
                        table.rows(),
                        vocab.len()
                    );
                }
                let codes = vocab
                    .iter()
                    .map(|item| HuffmanCode {
                        code: item.code.clone(),
                        point: item.point.clone(),
                    })
                    .collect();
                Ok(OutputLayer::HierarchicalSoftmax(HierarchicalSoftmax { nodes: table, codes }))
            }
            OutputKind::NegativeSampling => {
                if table.rows() != vocab.len() {
                    bail!(
                        "negative sampling has {} rows for a vocabulary of {}",
                        table.rows(),
                        vocab.len()
                    );
                }
                let negatives = vocab.build_negative_table(config.neg_table_size, config.neg_power)?;
                Ok(OutputLayer::NegativeSampling(NegativeSampling {
                    weights: table,
                    table: negatives,
                    negative: config.negative,
                }))
            }
        }
    }

    pub fn kind(&self) -> OutputKind {
        match self {
            OutputLayer::HierarchicalSoftmax(_) => OutputKind::HierarchicalSoftmax,
            OutputLayer::NegativeSampling(_) => OutputKind::NegativeSampling,
        }
    }

    /// Log-likelihood of `target` given `h`.
    ///
    /// For negative sampling this is the positive term alone, since the
    /// negatives are random.
    pub fn forward(&self, target: usize, h: &[real]) -> real {
        match self {
            OutputLayer::HierarchicalSoftmax(hs) => hs.forward(target, h),
            OutputLayer::NegativeSampling(ns) => ns.forward(target, h),
        }
    }

    /// Add `alpha` times the gradient of the log-likelihood with respect to
    /// `h` into `grad`, and train the layer's own weights.
    pub fn backward(
        &self,
        target: usize,
        h: &[real],
        grad: &mut [real],
        alpha: real,
        sigmoid: &Sigmoid,
        rng: &mut Rng,
    ) {
        match self {
            OutputLayer::HierarchicalSoftmax(hs) => hs.backward(target, h, grad, alpha, sigmoid),
            OutputLayer::NegativeSampling(ns) => ns.backward(target, h, grad, alpha, sigmoid, rng),
        }
    }

    pub fn table(&self) -> &EmbeddingTable {
        match self {
            OutputLayer::HierarchicalSoftmax(hs) => &hs.nodes,
            OutputLayer::NegativeSampling(ns) => &ns.weights,
        }
    }

    pub fn set_update(&mut self, update: bool) {
        match self {
            OutputLayer::HierarchicalSoftmax(hs) => hs.nodes.set_update(update),
            OutputLayer::NegativeSampling(ns) => ns.weights.set_update(update),
        }
    }

    pub fn save(&self) -> TableRecord {
        self.table().to_record()
    }
}
