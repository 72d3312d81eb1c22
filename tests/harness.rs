use std::{fs, path::Path};

use image::{Rgb, RgbImage};
use ndarray::{Array3, Array4, ArrayD};
use ocr_parity::{
    graph::Graph,
    harness::{Corpus, Harness},
    CharsetCache, DetectionOptions, Error, Language, Pipeline, Result,
};

const LETTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ ";

/// Class path spelling `text` against [`LETTERS`], with a blank before every symbol.
fn class_path(text: &str) -> Vec<usize> {
    text.chars()
        .flat_map(|c| [0, LETTERS.find(c).unwrap() + 1])
        .collect()
}

fn text_detector() -> impl Graph {
    |input: Array4<f32>| -> Result<ArrayD<f32>> {
        assert_eq!(input.dim(), (1, 3, 608, 800));
        let mut output = Array4::<f32>::zeros((1, 304, 400, 2));
        for y in 100..130 {
            for x in 50..250 {
                output[[0, y, x, 0]] = 0.9;
            }
        }
        Ok(output.into_dyn())
    }
}

fn empty_detector() -> impl Graph {
    |_: Array4<f32>| -> Result<ArrayD<f32>> {
        Ok(Array4::<f32>::zeros((1, 304, 400, 2)).into_dyn())
    }
}

fn recognizer(text: &str) -> impl Graph {
    let path = class_path(text);
    move |input: Array4<f32>| -> Result<ArrayD<f32>> {
        assert_eq!(input.dim(), (1, 1, 64, 1000));
        let mut output = Array3::<f32>::zeros((1, path.len(), LETTERS.len() + 1));
        for (t, class) in path.iter().enumerate() {
            output[[0, t, *class]] = 1.0;
        }
        Ok(output.into_dyn())
    }
}

fn pipeline<D: Graph, R: Graph>(dir: &Path, detector: D, recognizer: R) -> Pipeline<D, R> {
    let charsets = dir.join("character");
    fs::create_dir_all(&charsets).unwrap();
    fs::write(charsets.join("en_char.txt"), LETTERS).unwrap();
    Pipeline::new(
        detector,
        recognizer,
        CharsetCache::new(charsets),
        DetectionOptions::default(),
    )
}

fn corpus_image(dir: &Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(800, 608, Rgb([255, 255, 255]))
        .save(&path)
        .unwrap();
    path
}

#[test]
fn matching_baseline_passes_without_diff_artifact() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let image = corpus_image(dir.path(), "english.png");
    fs::write(dir.path().join("english.python.txt"), "HELLO").unwrap();

    let pipeline = pipeline(dir.path(), text_detector(), recognizer("HELLO"));
    let harness = Harness::new(&pipeline, Corpus::from_images([image]));
    let verdicts = harness.run().collect::<Vec<_>>();

    assert_eq!(verdicts.len(), 1);
    let verdict = &verdicts[0];
    assert!(verdict.equal, "{verdict:?}");
    assert!(verdict.diff.is_empty());
    assert_eq!(verdict.candidate, "HELLO");
    assert_eq!(
        fs::read_to_string(dir.path().join("english.onnx.txt")).unwrap(),
        "HELLO"
    );
    assert!(!dir.path().join("english.diff.txt").exists());
}

#[test]
fn trailing_space_fails_with_single_line_diff() {
    let dir = tempfile::tempdir().unwrap();
    let image = corpus_image(dir.path(), "example.png");
    fs::write(dir.path().join("example.python.txt"), "HELLO").unwrap();

    let pipeline = pipeline(dir.path(), text_detector(), recognizer("HELLO "));
    let harness = Harness::new(&pipeline, Corpus::from_images([image]));
    let verdict = harness.run().next().unwrap();

    assert!(!verdict.equal);
    assert_eq!(verdict.candidate, "HELLO ");
    assert_eq!(
        fs::read_to_string(dir.path().join("example.diff.txt")).unwrap(),
        "--- baseline\n+++ candidate\n@@ -1 +1 @@\n-HELLO\n+HELLO "
    );
    assert!(verdict.status_line().ends_with("matches baseline? false"));
}

#[test]
fn nothing_detected_is_empty_text() {
    let dir = tempfile::tempdir().unwrap();
    let image = corpus_image(dir.path(), "blank.png");

    let pipeline = pipeline(dir.path(), empty_detector(), recognizer("UNUSED"));
    let harness = Harness::new(&pipeline, Corpus::from_images([image]));
    let verdict = harness.run().next().unwrap();

    // No baseline file either, so both sides are empty.
    assert_eq!(verdict.candidate, "");
    assert!(verdict.equal);
    assert!(verdict.error.is_none());
    assert_eq!(
        fs::read_to_string(dir.path().join("blank.onnx.txt")).unwrap(),
        ""
    );
}

#[test]
fn failures_are_isolated_per_image() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a_corrupt.png"), b"not a png").unwrap();
    corpus_image(dir.path(), "b_good.png");
    fs::write(dir.path().join("b_good.python.txt"), "OK").unwrap();

    let pipeline = pipeline(dir.path(), text_detector(), recognizer("OK"));
    let harness = Harness::new(&pipeline, Corpus::scan(dir.path()).unwrap());
    let verdicts = harness.run().collect::<Vec<_>>();

    assert_eq!(verdicts.len(), 2);
    assert_eq!(verdicts[0].id, "a_corrupt.png");
    assert!(verdicts[0].error.as_deref().unwrap().starts_with("invalid image"));
    assert!(!verdicts[0].equal);
    assert!(!dir.path().join("a_corrupt.onnx.txt").exists());
    assert!(verdicts[1].equal);
}

#[test]
fn graph_failure_is_reported_in_the_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let first = corpus_image(dir.path(), "first.png");
    let second = corpus_image(dir.path(), "second.png");

    let calls = std::cell::Cell::new(0);
    let flaky_detector = |input: Array4<f32>| -> Result<ArrayD<f32>> {
        calls.set(calls.get() + 1);
        if calls.get() == 1 {
            return Err(Error::GraphExecution {
                graph: "detector",
                source: "session crashed".into(),
            });
        }
        text_detector().run(input)
    };

    let pipeline = pipeline(dir.path(), flaky_detector, recognizer("HI"));
    let harness = Harness::new(&pipeline, Corpus::from_images([first, second]));
    let verdicts = harness.run().collect::<Vec<_>>();

    assert_eq!(
        verdicts[0].error.as_deref(),
        Some("detector graph execution failed: session crashed")
    );
    assert!(verdicts[0]
        .status_line()
        .starts_with("first.png: FAILED: detector graph"));
    assert_eq!(verdicts[1].candidate, "HI");
    assert!(verdicts[1].error.is_none());
}

#[test]
fn rerunning_an_unchanged_corpus_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    corpus_image(dir.path(), "example2.png");
    corpus_image(dir.path(), "example3.jpg");
    fs::write(dir.path().join("example2.python.txt"), "HELL0").unwrap();

    let pipeline = pipeline(dir.path(), text_detector(), recognizer("HELLO"));
    let harness = Harness::new(&pipeline, Corpus::scan(dir.path()).unwrap());

    let snapshot = || {
        ["example2.onnx.txt", "example2.diff.txt", "example3.onnx.txt", "example3.diff.txt"]
            .map(|name| fs::read_to_string(dir.path().join(name)).unwrap())
    };
    let first = harness.run().collect::<Vec<_>>();
    let first_files = snapshot();
    let second = harness.run().collect::<Vec<_>>();

    assert_eq!(first, second);
    assert_eq!(first_files, snapshot());
}

#[test]
fn stale_diff_is_removed_once_texts_match() {
    let dir = tempfile::tempdir().unwrap();
    let image = corpus_image(dir.path(), "width_ths.png");
    fs::write(dir.path().join("width_ths.python.txt"), "HELLO").unwrap();
    fs::write(dir.path().join("width_ths.diff.txt"), "old mismatch").unwrap();

    let pipeline = pipeline(dir.path(), text_detector(), recognizer("HELLO"));
    let harness = Harness::new(&pipeline, Corpus::from_images([image]));
    assert!(harness.run().all(|verdict| verdict.equal));
    assert!(!dir.path().join("width_ths.diff.txt").exists());
}

#[test]
fn language_is_taken_from_the_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let image = corpus_image(dir.path(), "French.png");
    let pipeline = pipeline(dir.path(), text_detector(), recognizer("AB"));
    // French class 1 and 2 map to different symbols than English.
    fs::write(dir.path().join("character/fr_char.txt"), "éè").unwrap();

    let harness = Harness::new(&pipeline, Corpus::from_images([image]));
    let verdict = harness.run().next().unwrap();

    assert_eq!(verdict.language, Language::Fr);
    assert_eq!(verdict.candidate, "éè");
    assert_eq!(pipeline.charsets().len(), 1);
}

#[test]
fn artifact_write_failure_fails_the_image() {
    let dir = tempfile::tempdir().unwrap();
    let image = corpus_image(dir.path(), "english.png");
    fs::write(dir.path().join("english.python.txt"), "HELLO").unwrap();
    // A directory in place of the candidate file makes the write fail.
    fs::create_dir(dir.path().join("english.onnx.txt")).unwrap();

    let pipeline = pipeline(dir.path(), text_detector(), recognizer("HELLO"));
    let harness = Harness::new(&pipeline, Corpus::from_images([image]));
    let verdict = harness.run().next().unwrap();

    assert_eq!(verdict.candidate, "HELLO");
    assert!(verdict.error.is_some());
    assert!(!verdict.equal);
    assert!(verdict.status_line().starts_with("english.png: FAILED: "));
}

#[test]
fn failed_rerun_clears_previous_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let image = corpus_image(dir.path(), "english.png");
    fs::write(dir.path().join("english.python.txt"), "HELLO").unwrap();

    let fail = std::cell::Cell::new(false);
    let detector = |input: Array4<f32>| -> Result<ArrayD<f32>> {
        if fail.get() {
            return Err(Error::GraphExecution {
                graph: "detector",
                source: "session crashed".into(),
            });
        }
        text_detector().run(input)
    };
    let pipeline = pipeline(dir.path(), detector, recognizer("HELLX"));
    let harness = Harness::new(&pipeline, Corpus::from_images([image]));

    let first = harness.run().next().unwrap();
    assert!(!first.equal && first.error.is_none());
    assert_eq!(
        fs::read_to_string(dir.path().join("english.onnx.txt")).unwrap(),
        "HELLX"
    );
    assert!(dir.path().join("english.diff.txt").exists());

    fail.set(true);
    let second = harness.run().next().unwrap();
    assert!(second.error.is_some());
    assert!(!second.equal);
    assert!(!dir.path().join("english.onnx.txt").exists());
    assert!(!dir.path().join("english.diff.txt").exists());
}
