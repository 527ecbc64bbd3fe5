//! Training configuration.

use std::fmt;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::context::{ParagraphSlot, WindowSpec};
use crate::error::ConfigError;
use crate::{real, MAX_SENTENCE_LENGTH};

/// Default size of the negative sampling table.
pub const NEGATIVE_TABLE_SIZE: usize = 100_000_000;

/// Vocabulary size above which a shard being counted drops its rarest words.
/// (30M hash slots, 70% full.)
pub const MAX_VOCAB_SIZE: usize = 21_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum ModelKind {
    /// Continuous bag of words: the average of the context predicts the center word.
    Cbow,
    /// Each context word predicts the center word.
    SkipGram,
    /// Paragraph vector, distributed memory: average of the preceding words
    /// and the paragraph predicts the next word.
    Pvdm,
    /// Like `Pvdm`, but the paragraph and the preceding words are concatenated.
    PvdmConcat,
    /// Paragraph vector, distributed bag of words: the paragraph predicts
    /// each of its words.
    Pvdbow,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelKind::Cbow => "cbow",
            ModelKind::SkipGram => "skip-gram",
            ModelKind::Pvdm => "pvdm",
            ModelKind::PvdmConcat => "pvdm-concat",
            ModelKind::Pvdbow => "pvdbow",
        })
    }
}

impl ModelKind {
    pub fn uses_paragraphs(self) -> bool {
        matches!(
            self,
            ModelKind::Pvdm | ModelKind::PvdmConcat | ModelKind::Pvdbow
        )
    }

    /// Models whose hidden layer is built from several context rows at once.
    pub fn averages_context(self) -> bool {
        matches!(self, ModelKind::Cbow | ModelKind::Pvdm)
    }

    /// The shape of the context window this model trains on.
    pub fn window_spec(self, window: usize) -> WindowSpec {
        match self {
            ModelKind::Cbow | ModelKind::SkipGram => WindowSpec {
                before: window,
                after: window,
                symmetric: true,
                paragraph: ParagraphSlot::None,
                padded: false,
                resample: true,
            },
            ModelKind::Pvdm => WindowSpec {
                before: window,
                after: 0,
                symmetric: false,
                paragraph: ParagraphSlot::Appended,
                padded: false,
                resample: true,
            },
            ModelKind::PvdmConcat => WindowSpec {
                before: window,
                after: 0,
                symmetric: false,
                paragraph: ParagraphSlot::Front,
                padded: true,
                resample: false,
            },
            ModelKind::Pvdbow => WindowSpec {
                before: window,
                after: window,
                symmetric: true,
                paragraph: ParagraphSlot::Front,
                padded: false,
                resample: true,
            },
        }
    }

    pub fn default_alpha(self) -> real {
        match self {
            ModelKind::Cbow | ModelKind::Pvdm | ModelKind::PvdmConcat => 0.05,
            ModelKind::SkipGram | ModelKind::Pvdbow => 0.025,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputKind {
    HierarchicalSoftmax,
    NegativeSampling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub model: ModelKind,
    pub output: OutputKind,
    /// Number of negative examples per target, when using negative sampling.
    pub negative: usize,
    /// Embedding vector length.
    pub dim: usize,
    /// Max skip length between words.
    pub window: usize,
    /// Threshold for subsampling frequent words; 0 disables subsampling.
    pub sample: real,
    /// Starting learning rate; `None` picks the model's default.
    pub alpha: Option<real>,
    pub epochs: usize,
    /// Words seen fewer times are dropped from the vocabulary.
    pub min_count: u64,
    /// Fold dropped words into a single `<unk>` item instead of discarding them.
    pub replace_unknown: bool,
    pub threads: usize,
    pub neg_table_size: usize,
    pub neg_power: f64,
    pub seed: u64,
    pub max_vocab_size: usize,
    pub max_line_length: usize,
    /// Draw a progress bar while training.
    #[serde(default)]
    pub progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            model: ModelKind::SkipGram,
            output: OutputKind::NegativeSampling,
            negative: 5,
            dim: 100,
            window: 5,
            sample: 1e-3,
            alpha: None,
            epochs: 5,
            min_count: 5,
            replace_unknown: false,
            threads: default_threads(),
            neg_table_size: NEGATIVE_TABLE_SIZE,
            neg_power: 0.75,
            seed: 1,
            max_vocab_size: MAX_VOCAB_SIZE,
            max_line_length: MAX_SENTENCE_LENGTH,
            progress: false,
        }
    }
}

/// One worker per logical core.
pub fn default_threads() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

impl TrainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dim == 0 {
            return Err(ConfigError::ZeroDimension);
        }
        if self.epochs == 0 {
            return Err(ConfigError::ZeroEpochs);
        }
        if self.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if self.max_line_length == 0 {
            return Err(ConfigError::ZeroLineLength);
        }
        if self.output == OutputKind::NegativeSampling {
            if self.negative == 0 {
                return Err(ConfigError::ZeroNegative);
            }
            if self.neg_table_size == 0 {
                return Err(ConfigError::EmptyNegativeTable);
            }
            if !(self.neg_power.is_finite() && self.neg_power > 0.0) {
                return Err(ConfigError::BadPower(self.neg_power));
            }
        }
        if !(self.sample >= 0.0 && self.sample.is_finite()) {
            return Err(ConfigError::BadSample(self.sample));
        }
        if let Some(alpha) = self.alpha {
            if !(alpha > 0.0 && alpha.is_finite()) {
                return Err(ConfigError::BadAlpha(alpha));
            }
        }
        if self.window == 0
            && matches!(
                self.model,
                ModelKind::Cbow | ModelKind::SkipGram | ModelKind::PvdmConcat
            )
        {
            return Err(ConfigError::WindowTooSmall { model: self.model });
        }
        self.window_spec().validate()
    }

    pub fn window_spec(&self) -> WindowSpec {
        self.model.window_spec(self.window)
    }

    pub fn starting_alpha(&self) -> real {
        self.alpha.unwrap_or_else(|| self.model.default_alpha())
    }

    /// Width of the hidden layer, and so of the output layer's rows.
    pub fn hidden_size(&self) -> usize {
        match self.model {
            ModelKind::PvdmConcat => self.dim * (self.window + 1),
            _ => self.dim,
        }
    }
}
