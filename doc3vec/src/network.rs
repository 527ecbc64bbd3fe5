//! Forward and backward passes of the five models.

use anyhow::{bail, Result};

use crate::config::{ModelKind, TrainConfig};
use crate::context::Context;
use crate::layers::OutputLayer;
use crate::math::Sigmoid;
use crate::real;
use crate::rng::Rng;
use crate::table::{EmbeddingTable, Init};
use crate::vocab::Vocabulary;

/// Per-worker buffers, reused for every context.
#[derive(Debug, Clone)]
pub struct Scratch {
    hidden: Vec<real>,
    grad: Vec<real>,
    rows: Vec<usize>,
}

impl Scratch {
    pub fn new(hidden_size: usize) -> Self {
        Scratch {
            hidden: vec![0.0; hidden_size],
            grad: vec![0.0; hidden_size],
            rows: Vec::with_capacity(16),
        }
    }
}

#[derive(Debug)]
pub struct Network {
    model: ModelKind,
    dim: usize,
    /// Input word vectors; these are the embeddings that get saved.
    words: EmbeddingTable,
    /// Paragraph vectors, for the paragraph models.
    paragraphs: Option<EmbeddingTable>,
    output: OutputLayer,
    sigmoid: Sigmoid,
}

impl Network {
    pub fn new(
        config: &TrainConfig,
        vocab: &Vocabulary,
        paragraphs: &Vocabulary,
        rng: &mut Rng,
    ) -> Result<Self> {
        let words = EmbeddingTable::new(vocab.len(), config.dim, Init::Uniform, rng)?;
        let paragraphs = if config.model.uses_paragraphs() {
            Some(EmbeddingTable::new(paragraphs.len(), config.dim, Init::Uniform, rng)?)
        } else {
            None
        };
        let output = OutputLayer::new(config, vocab, config.hidden_size(), rng)?;
        Network::from_parts(config, words, paragraphs, output)
    }

    /// Assemble a network from existing tables, checking that they fit together.
    pub fn from_parts(
        config: &TrainConfig,
        words: EmbeddingTable,
        paragraphs: Option<EmbeddingTable>,
        output: OutputLayer,
    ) -> Result<Self> {
        if words.cols() != config.dim {
            bail!("word vectors have {} values, expected {}", words.cols(), config.dim);
        }
        match &paragraphs {
            Some(table) if table.cols() != config.dim => {
                bail!("paragraph vectors have {} values, expected {}", table.cols(), config.dim)
            }
            None if config.model.uses_paragraphs() => {
                bail!("the {} model needs a paragraph table", config.model)
            }
            _ => {}
        }
        if output.table().cols() != config.hidden_size() {
            bail!(
                "output layer takes {} inputs, expected {}",
                output.table().cols(),
                config.hidden_size()
            );
        }
        Ok(Network {
            model: config.model,
            dim: config.dim,
            words,
            paragraphs,
            output,
            sigmoid: Sigmoid::new(),
        })
    }

    pub fn model(&self) -> ModelKind {
        self.model
    }

    pub fn words(&self) -> &EmbeddingTable {
        &self.words
    }

    pub fn paragraphs(&self) -> Option<&EmbeddingTable> {
        self.paragraphs.as_ref()
    }

    pub fn output(&self) -> &OutputLayer {
        &self.output
    }

    /// Swap in a different paragraph table, returning the old one.
    pub fn replace_paragraphs(&mut self, table: EmbeddingTable) -> Option<EmbeddingTable> {
        self.paragraphs.replace(table)
    }

    /// Stop (or resume) updating the word vectors and the output layer.
    /// Paragraph vectors keep training.
    pub fn freeze(&mut self, frozen: bool) {
        self.words.set_update(!frozen);
        self.output.set_update(!frozen);
    }

    fn paragraph_table(&self) -> &EmbeddingTable {
        match &self.paragraphs {
            Some(table) => table,
            None => unreachable!("paragraph models always have a paragraph table"),
        }
    }

    /// Train on one context.
    pub fn train(&self, ctx: &Context, alpha: real, scratch: &mut Scratch, rng: &mut Rng) {
        let Scratch { hidden, grad, rows } = scratch;
        rows.clear();
        rows.extend(ctx.words());
        let target = ctx.target;

        match self.model {
            ModelKind::Cbow | ModelKind::Pvdm => {
                let paragraph = ctx.paragraph().filter(|_| self.model == ModelKind::Pvdm);
                let seeded = paragraph.is_some();
                if let Some(p) = paragraph {
                    self.paragraph_table().lookup(p, hidden);
                }
                let n = self.words.lookup_average(rows, hidden, seeded);
                if n == 0 {
                    return;
                }
                grad.fill(0.0);
                self.output.backward(target, hidden, grad, alpha, &self.sigmoid, rng);
                check_finite(grad);
                // hidden -> in
                self.words.backward_average(rows, grad, seeded);
                if let Some(p) = paragraph {
                    self.paragraph_table().add_row(p, grad, 1.0 / n as real);
                }
            }
            ModelKind::SkipGram => {
                for &w in rows.iter() {
                    self.train_single(&self.words, w, target, alpha, hidden, grad, rng);
                }
            }
            ModelKind::PvdmConcat => {
                let Some(p) = ctx.paragraph() else {
                    return;
                };
                let dim = self.dim;
                self.paragraph_table().lookup(p, hidden);
                self.words.lookup_concat(rows, hidden, dim);
                grad.fill(0.0);
                self.output.backward(target, hidden, grad, alpha, &self.sigmoid, rng);
                check_finite(grad);
                self.paragraph_table().add_row(p, &grad[..dim], 1.0);
                self.words.backward_concat(rows, grad, dim);
            }
            ModelKind::Pvdbow => {
                if let Some(p) = ctx.paragraph() {
                    self.train_single(self.paragraph_table(), p, target, alpha, hidden, grad, rng);
                }
                // with a window, the context words also predict the target
                for &w in rows.iter() {
                    self.train_single(&self.words, w, target, alpha, hidden, grad, rng);
                }
            }
        }
    }

    /// One row of `table` alone predicts `target`.
    #[allow(clippy::too_many_arguments)]
    fn train_single(
        &self,
        table: &EmbeddingTable,
        row: usize,
        target: usize,
        alpha: real,
        hidden: &mut [real],
        grad: &mut [real],
        rng: &mut Rng,
    ) {
        table.lookup(row, hidden);
        grad.fill(0.0);
        self.output.backward(target, hidden, grad, alpha, &self.sigmoid, rng);
        check_finite(grad);
        // Learn weights input -> hidden
        table.add_row(row, grad, 1.0);
    }

    /// Log-likelihood the network currently assigns to the context's target.
    /// Summed over the separate predictions for Skip-gram and PVDBOW.
    pub fn log_likelihood(&self, ctx: &Context, scratch: &mut Scratch) -> real {
        let Scratch { hidden, rows, .. } = scratch;
        rows.clear();
        rows.extend(ctx.words());
        let target = ctx.target;

        match self.model {
            ModelKind::Cbow | ModelKind::Pvdm => {
                let paragraph = ctx.paragraph().filter(|_| self.model == ModelKind::Pvdm);
                if let Some(p) = paragraph {
                    self.paragraph_table().lookup(p, hidden);
                }
                if self.words.lookup_average(rows, hidden, paragraph.is_some()) == 0 {
                    return 0.0;
                }
                self.output.forward(target, hidden)
            }
            ModelKind::SkipGram => rows
                .iter()
                .map(|&w| {
                    self.words.lookup(w, hidden);
                    self.output.forward(target, hidden)
                })
                .sum(),
            ModelKind::PvdmConcat => {
                let Some(p) = ctx.paragraph() else {
                    return 0.0;
                };
                self.paragraph_table().lookup(p, hidden);
                self.words.lookup_concat(rows, hidden, self.dim);
                self.output.forward(target, hidden)
            }
            ModelKind::Pvdbow => {
                let mut total = 0.0;
                if let Some(p) = ctx.paragraph() {
                    self.paragraph_table().lookup(p, hidden);
                    total += self.output.forward(target, hidden);
                }
                for &w in rows.iter() {
                    self.words.lookup(w, hidden);
                    total += self.output.forward(target, hidden);
                }
                total
            }
        }
    }
}

fn check_finite(grad: &[real]) {
    if cfg!(feature = "check-numerics") {
        if let Some(x) = grad.iter().find(|x| !x.is_finite()) {
            panic!("non-finite gradient component {x}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputKind;
    use crate::context::ContextWindowGenerator;
    use crate::vocab::ItemKind;

    fn vocabs() -> (Vocabulary, Vocabulary) {
        let mut vocab = Vocabulary::new();
        for (word, n) in [("a", 40), ("b", 30), ("c", 20), ("d", 10), ("e", 5)] {
            vocab.add_count(word, ItemKind::Word, n);
        }
        vocab.sort();
        vocab.encode_huffman().unwrap();
        let mut paragraphs = Vocabulary::new();
        paragraphs.add_count("_*0", ItemKind::Paragraph, 6);
        paragraphs.add_count("_*1", ItemKind::Paragraph, 4);
        paragraphs.sort();
        (vocab, paragraphs)
    }

    fn config(model: ModelKind, output: OutputKind) -> TrainConfig {
        TrainConfig {
            model,
            output,
            dim: 6,
            window: 2,
            neg_table_size: 1000,
            ..TrainConfig::default()
        }
    }

    const LINE: [usize; 6] = [1, 2, 3, 4, 5, 1];

    #[test]
    fn test_cbow_update_is_the_gradient() {
        // With the output layer frozen and a learning rate of 1, the change to
        // each input row is exactly the gradient of the log-likelihood.
        let (vocab, _) = vocabs();
        let config = config(ModelKind::Cbow, OutputKind::HierarchicalSoftmax);
        let mut rng = Rng::new(11);
        let words = EmbeddingTable::new(vocab.len(), 6, Init::Uniform, &mut rng).unwrap();
        let output = OutputLayer::new(
            &TrainConfig {
                model: ModelKind::PvdmConcat,
                window: 0,
                ..config.clone()
            },
            &vocab,
            6,
            &mut rng,
        )
        .unwrap();
        let mut net = Network::from_parts(&config, words, None, output).unwrap();
        net.output.set_update(false);

        let spec = crate::WindowSpec {
            resample: false,
            ..config.window_spec()
        };
        let mut gen = ContextWindowGenerator::new(spec).unwrap();
        let ctx = gen.generate(&LINE, None, 2, &mut rng).clone();
        assert_eq!(ctx.slots(), [1, 2, 4, 5]);

        let mut scratch = Scratch::new(6);
        let eps = 1e-2;
        let mut numeric = vec![];
        for &w in ctx.slots() {
            for c in 0..6 {
                let cell = &net.words.row(w)[c];
                let x = cell.get();
                cell.set(x + eps);
                let plus = net.log_likelihood(&ctx, &mut scratch);
                cell.set(x - eps);
                let minus = net.log_likelihood(&ctx, &mut scratch);
                cell.set(x);
                numeric.push((plus - minus) / (2.0 * eps));
            }
        }

        let before: Vec<Vec<real>> = ctx.slots().iter().map(|&w| net.words.row_vec(w)).collect();
        net.train(&ctx, 1.0, &mut scratch, &mut rng);
        let mut k = 0;
        for (&w, old) in ctx.slots().iter().zip(before) {
            let new = net.words.row_vec(w);
            for c in 0..6 {
                let delta = new[c] - old[c];
                assert!(
                    (delta - numeric[k]).abs() < 0.02,
                    "row {w}, dim {c}: update {delta}, gradient {}",
                    numeric[k]
                );
                k += 1;
            }
        }
    }

    #[test]
    fn test_every_model_learns() {
        let (vocab, paragraphs) = vocabs();
        for model in [
            ModelKind::Cbow,
            ModelKind::SkipGram,
            ModelKind::Pvdm,
            ModelKind::PvdmConcat,
            ModelKind::Pvdbow,
        ] {
            for output in [OutputKind::HierarchicalSoftmax, OutputKind::NegativeSampling] {
                let config = config(model, output);
                let mut rng = Rng::new(7);
                let net = Network::new(&config, &vocab, &paragraphs, &mut rng).unwrap();
                let spec = crate::WindowSpec {
                    resample: false,
                    ..config.window_spec()
                };
                let mut gen = ContextWindowGenerator::new(spec).unwrap();
                let paragraph = model.uses_paragraphs().then_some(1);
                let ctx = gen.generate(&LINE, paragraph, 3, &mut rng).clone();
                let mut scratch = Scratch::new(config.hidden_size());

                let before = net.log_likelihood(&ctx, &mut scratch);
                for _ in 0..20 {
                    net.train(&ctx, 0.05, &mut scratch, &mut rng);
                }
                let after = net.log_likelihood(&ctx, &mut scratch);
                assert!(after > before, "{model} {output:?}: {before} -> {after}");
            }
        }
    }

    #[test]
    fn test_frozen_words_only_move_paragraphs() {
        let (vocab, paragraphs) = vocabs();
        let config = config(ModelKind::Pvdm, OutputKind::NegativeSampling);
        let mut rng = Rng::new(2);
        let mut net = Network::new(&config, &vocab, &paragraphs, &mut rng).unwrap();
        let mut gen = ContextWindowGenerator::new(config.window_spec()).unwrap();
        let mut scratch = Scratch::new(config.hidden_size());
        // the output layer starts at zero; get it moving first
        for position in 0..LINE.len() {
            let ctx = gen.generate(&LINE, Some(1), position, &mut rng);
            net.train(ctx, 0.05, &mut scratch, &mut rng);
        }

        net.freeze(true);
        let words = net.words().to_vec();
        let output = net.output().table().to_vec();
        let para = net.paragraphs().unwrap().row_vec(1);
        for position in 0..LINE.len() {
            let ctx = gen.generate(&LINE, Some(1), position, &mut rng);
            net.train(ctx, 0.05, &mut scratch, &mut rng);
        }
        assert_eq!(net.words().to_vec(), words);
        assert_eq!(net.output().table().to_vec(), output);
        assert_ne!(net.paragraphs().unwrap().row_vec(1), para);
    }

    /// A CBOW network whose output row for the context's target is NaN.
    fn poisoned() -> (Network, Context) {
        let (vocab, paragraphs) = vocabs();
        let config = config(ModelKind::Cbow, OutputKind::NegativeSampling);
        let mut rng = Rng::new(5);
        let net = Network::new(&config, &vocab, &paragraphs, &mut rng).unwrap();
        let mut gen = ContextWindowGenerator::new(config.window_spec()).unwrap();
        let ctx = gen.generate(&LINE, None, 2, &mut rng).clone();
        for cell in net.output().table().row(ctx.target) {
            cell.set(real::NAN);
        }
        (net, ctx)
    }

    #[cfg(feature = "check-numerics")]
    #[test]
    #[should_panic(expected = "non-finite gradient")]
    fn test_non_finite_gradient_panics() {
        let (net, ctx) = poisoned();
        let mut scratch = Scratch::new(6);
        net.train(&ctx, 0.05, &mut scratch, &mut Rng::new(1));
    }

    #[cfg(not(feature = "check-numerics"))]
    #[test]
    fn test_non_finite_gradient_is_unchecked_by_default() {
        let (net, ctx) = poisoned();
        let mut scratch = Scratch::new(6);
        net.train(&ctx, 0.05, &mut scratch, &mut Rng::new(1));
        let w = ctx.slots()[0];
        assert!(net.words().row_vec(w).iter().all(|x| x.is_nan()));
    }

    #[test]
    fn test_from_parts_checks_shapes() {
        let (vocab, _) = vocabs();
        let config = config(ModelKind::Pvdm, OutputKind::NegativeSampling);
        let mut rng = Rng::new(2);
        let words = EmbeddingTable::new(vocab.len(), 6, Init::Zero, &mut rng).unwrap();
        let output = OutputLayer::new(&config, &vocab, 6, &mut rng).unwrap();
        assert!(Network::from_parts(&config, words, None, output).is_err());
    }
}
