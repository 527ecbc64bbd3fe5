use thiserror::Error;

use crate::config::ModelKind;
use crate::real;

/// A training configuration that can't work. Detected before any work starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("vector size must be positive")]
    ZeroDimension,
    #[error("number of epochs must be positive")]
    ZeroEpochs,
    #[error("number of threads must be positive")]
    ZeroThreads,
    #[error("negative sampling needs at least one negative example per target")]
    ZeroNegative,
    #[error("the {model} model needs a window of at least 1")]
    WindowTooSmall { model: ModelKind },
    #[error("a symmetric window needs equal sizes before and after, got {before} and {after}")]
    AsymmetricWindow { before: usize, after: usize },
    #[error("a fixed-size padded window can't be resampled")]
    PaddedResample,
    #[error("a fixed-size padded window must carry its paragraph in front")]
    PaddedAppendedParagraph,
    #[error("negative sampling table size must be positive")]
    EmptyNegativeTable,
    #[error("negative sampling power must be positive and finite, got {0}")]
    BadPower(f64),
    #[error("subsampling threshold must be a non-negative number, got {0}")]
    BadSample(real),
    #[error("starting learning rate must be positive, got {0}")]
    BadAlpha(real),
    #[error("maximum line length must be positive")]
    ZeroLineLength,
}

/// A vocabulary, or persisted state derived from one, that breaks an invariant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VocabError {
    #[error("a Huffman tree needs at least 2 items, the vocabulary has {0}")]
    TooSmall(usize),
    #[error("Huffman code for item {index} is {len} bits long, the limit is {max}")]
    CodeTooLong { index: usize, len: usize, max: usize },
    #[error("all counts are zero, nothing to sample from")]
    NoMass,
    #[error("the first item must be the sentence-start symbol, found {0:?}")]
    MissingStart(String),
    #[error("item {found} is stored at position {expected}")]
    IndexOutOfPlace { expected: usize, found: usize },
    #[error("key {0:?} appears twice")]
    DuplicateKey(String),
    #[error("item {0} has a larger count than the item before it")]
    NotSorted(usize),
    #[error("stored Huffman code of {0:?} differs from the one its counts produce")]
    CodeMismatch(String),
    #[error("table is {rows}x{cols} but holds {len} values")]
    TableShape { rows: usize, cols: usize, len: usize },
}
