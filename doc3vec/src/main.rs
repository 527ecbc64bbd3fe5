use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, level_filters::LevelFilter};

use doc3vec::config::{self, NEGATIVE_TABLE_SIZE};
use doc3vec::{kmeans, persist, real, Corpus, ModelKind, OutputKind, TrainConfig, Trainer};

#[derive(Parser)]
#[command(about = "WORD AND PARAGRAPH VECTOR estimation toolkit", long_about = None, version)]
struct Options {
    /// Use text data from FILE to train the model
    #[arg(long = "train", value_name = "FILE")]
    train_file: Option<PathBuf>,

    /// Use FILE to save the resulting word vectors / word clusters
    #[arg(long = "output", value_name = "FILE")]
    output_file: Option<PathBuf>,

    /// Use FILE to save the resulting paragraph vectors
    #[arg(long = "paragraph-output", value_name = "FILE")]
    paragraph_output_file: Option<PathBuf>,

    /// The model to train
    #[arg(long, value_enum, default_value_t = ModelKind::SkipGram)]
    model: ModelKind,

    /// Set size of word vectors; default is 100
    #[arg(long = "size", default_value_t = 100)]
    layer1_size: usize,

    /// Set max skip length between words
    #[arg(long, default_value_t = 5)]
    window: usize,

    /// Set threshold for occurrence of words. Those that appear with higher
    /// frequency in the training data will be randomly down-sampled; default
    /// is 1e-3, useful range is (0, 1e-5)
    #[arg(long, default_value_t = 1e-3)]
    sample: real,

    /// Use Hierarchical Softmax instead of negative sampling
    #[arg(long)]
    hs: bool,

    /// Number of negative examples; default is 5, common values are 3 - 10
    #[arg(long, default_value_t = 5)]
    negative: usize,

    /// Size of the table negative examples are drawn from
    #[arg(long = "negative-table-size", value_name = "N", default_value_t = NEGATIVE_TABLE_SIZE)]
    negative_table_size: usize,

    /// Draw negative examples in proportion to count^POWER
    #[arg(long = "negative-power", value_name = "POWER", default_value_t = 0.75)]
    negative_power: f64,

    /// Use N threads; default is one per core
    #[arg(long = "threads", value_name = "N")]
    num_threads: Option<usize>,

    /// Run more training iterations
    #[arg(long, default_value_t = 5)]
    iter: usize,

    /// Discard words that appear less than N times
    #[arg(long = "min-count", value_name = "N", default_value_t = 5)]
    min_count: u64,

    /// Replace discarded words with a single <unk> word instead of dropping them
    #[arg(long = "replace-unknown")]
    replace_unknown: bool,

    /// Set the starting learning rate; default is 0.025 for skip-gram and
    /// pvdbow, 0.05 for the others
    #[arg(long)]
    alpha: Option<real>,

    /// Seed for the random number generators
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Output word classes rather than word vectors; if unspecified, vectors are written instead
    #[arg(long)]
    classes: Option<usize>,

    /// Set the debug mode (0 = warnings only, 1 = progress, 2 = more info during training)
    #[arg(long = "debug", default_value_t = 1)]
    debug_mode: usize,

    /// Draw a progress bar during training
    #[arg(long)]
    progress: bool,

    /// Save the resulting vectors in binary mode
    #[arg(long)]
    binary: bool,

    /// The vocabulary will be saved to FILE
    #[arg(long = "save-vocab", value_name = "FILE")]
    save_vocab_file: Option<PathBuf>,

    /// The vocabulary will be read from FILE, not constructed from the training data
    #[arg(long = "read-vocab", value_name = "FILE")]
    read_vocab_file: Option<PathBuf>,

    /// Save the whole model (vocabulary, vectors and output layer) to FILE
    #[arg(long = "save-model", value_name = "FILE")]
    save_model_file: Option<PathBuf>,

    /// Start from a model saved with --save-model instead of a fresh one
    #[arg(long = "load-model", value_name = "FILE")]
    load_model_file: Option<PathBuf>,

    /// Learn vectors for the paragraphs of FILE, keeping the words fixed
    #[arg(long = "infer", value_name = "FILE")]
    infer_file: Option<PathBuf>,

    /// Use FILE to save the inferred paragraph vectors
    #[arg(long = "infer-output", value_name = "FILE")]
    infer_output_file: Option<PathBuf>,
}

impl Options {
    fn config(&self) -> TrainConfig {
        TrainConfig {
            model: self.model,
            output: if self.hs {
                OutputKind::HierarchicalSoftmax
            } else {
                OutputKind::NegativeSampling
            },
            negative: self.negative,
            dim: self.layer1_size,
            window: self.window,
            sample: self.sample,
            alpha: self.alpha,
            epochs: self.iter,
            min_count: self.min_count,
            replace_unknown: self.replace_unknown,
            threads: self.num_threads.unwrap_or_else(config::default_threads),
            neg_table_size: self.negative_table_size,
            neg_power: self.negative_power,
            seed: self.seed,
            progress: self.progress,
            ..TrainConfig::default()
        }
    }
}

fn configure_logging(debug_mode: usize) {
    let level = match debug_mode {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn run(options: &Options) -> Result<()> {
    if options.infer_file.is_some() != options.infer_output_file.is_some() {
        bail!("--infer and --infer-output go together");
    }
    let corpus = match &options.train_file {
        Some(path) => Some(Corpus::open(path)?),
        None => None,
    };

    let mut trainer = match (&options.load_model_file, &corpus) {
        (Some(model_file), _) => {
            let trainer = persist::load_model(model_file)?;
            info!(model = %trainer.config().model, "loaded model from {model_file:?}");
            trainer
        }
        (None, Some(corpus)) => {
            let config = options.config();
            match &options.read_vocab_file {
                Some(vocab_file) => {
                    config.validate()?;
                    let (mut words, paragraphs) = persist::read_vocab(vocab_file)?;
                    words.reduce(config.min_count, config.replace_unknown);
                    Trainer::new(config, words, paragraphs)?
                }
                None => Trainer::from_corpus(config, corpus)?,
            }
        }
        (None, None) => bail!("nothing to do: give --train FILE or --load-model FILE"),
    };

    if let Some(vocab_file) = &options.save_vocab_file {
        persist::save_vocab(vocab_file, trainer.vocab(), trainer.paragraphs())?;
    }
    let nothing_to_write = options.output_file.is_none()
        && options.paragraph_output_file.is_none()
        && options.save_model_file.is_none()
        && options.infer_file.is_none();
    if nothing_to_write {
        return Ok(());
    }

    if let Some(corpus) = &corpus {
        trainer.train(corpus)?;
    }

    if let Some(output_file) = &options.output_file {
        let words = trainer.network().words();
        match options.classes {
            None => persist::save_vectors(output_file, trainer.vocab(), words, options.binary)?,
            Some(classes) => {
                // Run K-means on the word vectors
                let cl = kmeans::classes(words, classes, kmeans::DEFAULT_ITERATIONS)?;
                persist::save_classes(output_file, trainer.vocab(), &cl)?;
            }
        }
    }
    if let Some(output_file) = &options.paragraph_output_file {
        let table = trainer
            .network()
            .paragraphs()
            .with_context(|| format!("the {} model has no paragraph vectors", trainer.config().model))?;
        persist::save_vectors(output_file, trainer.paragraphs(), table, options.binary)?;
    }
    if let Some(model_file) = &options.save_model_file {
        persist::save_model(model_file, &trainer)?;
    }

    if let (Some(infer_file), Some(infer_output_file)) = (&options.infer_file, &options.infer_output_file) {
        let corpus = Corpus::open(infer_file)?;
        let epochs = trainer.config().epochs;
        let (paragraphs, table) = trainer.infer(&corpus, epochs)?;
        persist::save_vectors(infer_output_file, &paragraphs, &table, options.binary)?;
    }
    Ok(())
}

fn main() {
    let options = Options::parse();
    configure_logging(options.debug_mode);

    if let Err(err) = run(&options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
