//! End-to-end training runs on a small synthetic corpus.

use std::collections::HashMap;
use std::io::Write;

use tempfile::NamedTempFile;

use doc3vec::vocab::{self, BuildOptions};
use doc3vec::*;

const ANIMALS: [&str; 4] = ["cat", "dog", "mouse", "horse"];
const ANIMAL_VERBS: [&str; 3] = ["eats", "sleeps", "runs"];
const VEHICLES: [&str; 4] = ["car", "truck", "bus", "van"];
const VEHICLE_VERBS: [&str; 3] = ["drives", "parks", "stops"];

/// Lines about either animals or vehicles, never both.
fn corpus_text(lines: usize, seed: u64, labeled: bool) -> String {
    let mut rng = Rng::new(seed);
    let mut text = String::new();
    for i in 0..lines {
        let (nouns, verbs) = if i % 2 == 0 {
            (&ANIMALS, &ANIMAL_VERBS)
        } else {
            (&VEHICLES, &VEHICLE_VERBS)
        };
        if labeled {
            text.push_str(&format!("_*{} ", 1000 + i));
        }
        for k in 0..10 {
            let word = if k % 2 == 0 {
                nouns[(rng.next_u64() >> 16) as usize % nouns.len()]
            } else {
                verbs[(rng.next_u64() >> 16) as usize % verbs.len()]
            };
            text.push_str(word);
            text.push(' ');
        }
        text.push('\n');
    }
    text
}

fn write_corpus(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn small_config(model: ModelKind, output: OutputKind) -> TrainConfig {
    TrainConfig {
        model,
        output,
        dim: 16,
        window: 3,
        sample: 0.0,
        epochs: 2,
        min_count: 1,
        threads: 2,
        neg_table_size: 10_000,
        ..TrainConfig::default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    normalize(&mut a);
    normalize(&mut b);
    dot(&a, &b)
}

#[test]
fn test_every_model_trains() {
    let file = write_corpus(&corpus_text(100, 1, false));
    let corpus = Corpus::open(file.path()).unwrap();
    assert_eq!(corpus.num_lines(), 100);

    for model in [
        ModelKind::Cbow,
        ModelKind::SkipGram,
        ModelKind::Pvdm,
        ModelKind::PvdmConcat,
        ModelKind::Pvdbow,
    ] {
        for output in [OutputKind::HierarchicalSoftmax, OutputKind::NegativeSampling] {
            let mut trainer = Trainer::from_corpus(small_config(model, output), &corpus).unwrap();
            let before = trainer.network().words().to_vec();
            trainer.train(&corpus).unwrap();

            let net = trainer.network();
            let after = net.words().to_vec();
            assert!(after.iter().all(|x| x.is_finite()), "{model} {output:?}");
            // 14 nouns and verbs plus the start symbol
            assert_eq!(trainer.vocab().len(), 15);
            assert_eq!(net.words().rows(), trainer.vocab().len());

            if model.uses_paragraphs() {
                // one paragraph per line, plus the unused start row
                assert_eq!(trainer.paragraphs().len(), 101);
                let paragraphs = net.paragraphs().unwrap();
                assert_eq!(paragraphs.rows(), 101);
                assert!(paragraphs.to_vec().iter().all(|x| x.is_finite()));
            } else {
                assert!(net.paragraphs().is_none());
            }
            assert_ne!(before, after, "{model} {output:?} never touched the word vectors");
        }
    }
}

#[test]
fn test_skip_gram_groups_related_words() {
    let file = write_corpus(&corpus_text(400, 2, false));
    let corpus = Corpus::open(file.path()).unwrap();
    let config = TrainConfig {
        epochs: 10,
        threads: 1,
        ..small_config(ModelKind::SkipGram, OutputKind::NegativeSampling)
    };
    let mut trainer = Trainer::from_corpus(config, &corpus).unwrap();
    trainer.train(&corpus).unwrap();

    let vocab = trainer.vocab();
    let words = trainer.network().words();
    let vec_of = |w: &str| words.row_vec(vocab.lookup(w).unwrap());

    let mut same = vec![];
    let mut different = vec![];
    for a in ANIMALS {
        for b in ANIMALS {
            if a < b {
                same.push(cosine(&vec_of(a), &vec_of(b)));
            }
        }
        for v in VEHICLES {
            different.push(cosine(&vec_of(a), &vec_of(v)));
        }
    }
    let mean = |xs: &[f32]| xs.iter().sum::<f32>() / xs.len() as f32;
    assert!(
        mean(&same) > mean(&different),
        "within {} vs across {}",
        mean(&same),
        mean(&different)
    );
}

#[test]
fn test_worker_count_does_not_change_counts() {
    let file = write_corpus(&corpus_text(57, 3, true));
    let corpus = Corpus::open(file.path()).unwrap();

    let count = |workers: usize| {
        let counts = vocab::build_from_corpus(
            &corpus,
            &BuildOptions {
                workers,
                max_vocab_size: 1000,
                paragraphs: true,
            },
        )
        .unwrap();
        assert_eq!(counts.lines, 57);
        let words: HashMap<String, u64> =
            counts.words.iter().map(|item| (item.key.clone(), item.count)).collect();
        let paragraphs: HashMap<String, u64> = counts
            .paragraphs
            .iter()
            .map(|item| (item.key.clone(), item.count))
            .collect();
        (words, paragraphs)
    };

    let (words, paragraphs) = count(1);
    assert_eq!(words[vocab::START_SYMBOL], 57);
    assert_eq!(paragraphs["_*1000"], 10);
    assert_eq!(paragraphs.len(), 58);
    for workers in [2, 3, 5, 8, 100] {
        assert_eq!(count(workers), (words.clone(), paragraphs.clone()), "{workers} workers");
    }
}

#[test]
fn test_merge_tree_matches_sequential_merge() {
    let parts: Vec<&[&str]> = vec![
        &["a", "b", "a"],
        &["c"],
        &["b", "b", "d"],
        &["a", "e"],
        &["f", "a"],
    ];
    let shards: Vec<vocab::CorpusCounts> = parts
        .iter()
        .map(|words| {
            let mut counts = vocab::CorpusCounts::default();
            for w in *words {
                counts.words.add_or_increment(w);
            }
            counts.lines = 1;
            counts
        })
        .collect();

    let mut sequential = vocab::CorpusCounts::default();
    for shard in shards.clone() {
        sequential.merge(shard);
    }
    let tree = vocab::merge_tree(shards);
    assert_eq!(tree.lines, 5);

    let mut a = tree.words;
    let mut b = sequential.words;
    a.sort();
    b.sort();
    let counts = |v: &Vocabulary| -> HashMap<String, u64> {
        v.iter().map(|item| (item.key.clone(), item.count)).collect()
    };
    assert_eq!(counts(&a), counts(&b));
    assert_eq!(a.get(a.lookup("a").unwrap()).count, 4);
    assert_eq!(a.lookup("a"), Some(1));
}

#[test]
fn test_inference_keeps_words_fixed() {
    let file = write_corpus(&corpus_text(60, 4, false));
    let corpus = Corpus::open(file.path()).unwrap();
    let mut trainer =
        Trainer::from_corpus(small_config(ModelKind::Pvdm, OutputKind::NegativeSampling), &corpus).unwrap();
    trainer.train(&corpus).unwrap();

    let words = trainer.network().words().to_vec();
    let output = trainer.network().output().table().to_vec();
    let paragraphs = trainer.paragraphs().clone();
    let paragraph_table = trainer.network().paragraphs().unwrap().to_vec();

    let new_file = write_corpus(&corpus_text(6, 5, true));
    let new_corpus = Corpus::open(new_file.path()).unwrap();
    let (inferred, table) = trainer.infer(&new_corpus, 3).unwrap();

    assert_eq!(inferred.len(), 7);
    assert!(inferred.lookup("_*1000").is_some());
    assert!(inferred.lookup("_*1005").is_some());
    assert_eq!(table.rows(), 7);
    assert_eq!(table.cols(), 16);
    assert!(table.to_vec().iter().all(|x| x.is_finite()));

    assert_eq!(trainer.network().words().to_vec(), words);
    assert_eq!(trainer.network().output().table().to_vec(), output);
    assert_eq!(trainer.paragraphs().items(), paragraphs.items());
    assert_eq!(trainer.network().paragraphs().unwrap().to_vec(), paragraph_table);

    // training still updates the words afterwards
    trainer.train(&corpus).unwrap();
    assert_ne!(trainer.network().words().to_vec(), words);
}

#[test]
fn test_inference_needs_paragraph_model() {
    let file = write_corpus(&corpus_text(10, 6, false));
    let corpus = Corpus::open(file.path()).unwrap();
    let mut trainer =
        Trainer::from_corpus(small_config(ModelKind::Cbow, OutputKind::NegativeSampling), &corpus).unwrap();
    assert!(trainer.infer(&corpus, 1).is_err());
}

#[test]
fn test_unknown_words_are_replaced() {
    let mut text = corpus_text(20, 7, false);
    text.push_str("zebra cat eats\n");
    let file = write_corpus(&text);
    let corpus = Corpus::open(file.path()).unwrap();
    let config = TrainConfig {
        min_count: 2,
        replace_unknown: true,
        ..small_config(ModelKind::Cbow, OutputKind::HierarchicalSoftmax)
    };
    let mut trainer = Trainer::from_corpus(config, &corpus).unwrap();
    let vocab = trainer.vocab();
    assert_eq!(vocab.lookup("zebra"), None);
    let unk = vocab.lookup(vocab::UNKNOWN_SYMBOL).unwrap();
    assert_eq!(vocab.get(unk).count, 1);
    assert_eq!(vocab.get(unk).kind, ItemKind::Special);
    trainer.train(&corpus).unwrap();
}

#[test]
fn test_bad_config_is_rejected_before_work() {
    let file = write_corpus(&corpus_text(4, 8, false));
    let corpus = Corpus::open(file.path()).unwrap();
    let config = TrainConfig {
        window: 0,
        ..small_config(ModelKind::SkipGram, OutputKind::NegativeSampling)
    };
    let err = Trainer::from_corpus(config, &corpus).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::WindowTooSmall {
            model: ModelKind::SkipGram
        })
    );
}

#[test]
fn test_missing_corpus_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Corpus::open(&dir.path().join("nope.txt")).is_err());
}
