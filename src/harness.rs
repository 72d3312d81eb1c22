//! Runs the pipeline over a corpus of images and compares every result with the text the
//! reference pipeline recorded for the same image.
//!
//! Corpus layout, for an image `dir/{base}.png`:
//! - `dir/{base}.python.txt` baseline text (optional, missing means empty)
//! - `dir/{base}.onnx.txt` candidate text, written on every run
//! - `dir/{base}.diff.txt` unified diff, present only while the two disagree

use std::{
    error::Error as StdError,
    fs, io,
    path::{Path, PathBuf},
};

use tracing::instrument;

use crate::{diff::diff_texts, graph::Graph, Error, Language, Pipeline, Result};

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
pub const BASELINE_SUFFIX: &str = "python.txt";
pub const CANDIDATE_SUFFIX: &str = "onnx.txt";
pub const DIFF_SUFFIX: &str = "diff.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub image: PathBuf,
    pub language: Language,
}

impl CorpusEntry {
    pub fn new(image: impl Into<PathBuf>) -> Self {
        let image = image.into();
        let language = Language::from_file_name(&image);
        Self { image, language }
    }

    pub fn id(&self) -> String {
        self.image
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.image.display().to_string())
    }

    pub fn baseline_path(&self) -> PathBuf {
        self.image.with_extension(BASELINE_SUFFIX)
    }

    pub fn candidate_path(&self) -> PathBuf {
        self.image.with_extension(CANDIDATE_SUFFIX)
    }

    pub fn diff_path(&self) -> PathBuf {
        self.image.with_extension(DIFF_SUFFIX)
    }
}

/// Images of a corpus directory in file name order.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    entries: Vec<CorpusEntry>,
}

impl Corpus {
    #[instrument(level = "debug", skip(dir), fields(dir = %dir.as_ref().display()))]
    pub fn scan(dir: impl AsRef<Path>) -> Result<Self> {
        let mut images = fs::read_dir(dir.as_ref())?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<io::Result<Vec<_>>>()?;
        images.retain(|path| path.is_file() && is_image(path));
        images.sort();
        log::debug!("Found {} images", images.len());
        Ok(Self::from_images(images))
    }

    pub fn from_images(images: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            entries: images.into_iter().map(CorpusEntry::new).collect(),
        }
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Outcome for one corpus image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub id: String,
    pub language: Language,
    pub baseline: String,
    pub candidate: String,
    /// Exact string equality of baseline and candidate.
    pub equal: bool,
    /// Unified diff lines, empty when both texts have the same lines.
    pub diff: Vec<String>,
    /// Set when the image could not be processed; `candidate` is empty then.
    pub error: Option<String>,
}

impl Verdict {
    pub fn compare(
        id: impl Into<String>,
        language: Language,
        baseline: String,
        candidate: String,
    ) -> Self {
        let diff = diff_texts(&baseline, &candidate);
        let equal = candidate == baseline;
        Self {
            id: id.into(),
            language,
            baseline,
            candidate,
            equal,
            diff,
            error: None,
        }
    }

    pub fn failed(
        id: impl Into<String>,
        language: Language,
        baseline: String,
        error: &Error,
    ) -> Self {
        Self {
            id: id.into(),
            language,
            baseline,
            candidate: String::new(),
            equal: false,
            diff: Vec::new(),
            error: Some(error_chain(error)),
        }
    }

    pub fn status_line(&self) -> String {
        match &self.error {
            Some(error) => format!("{}: FAILED: {error}", self.id),
            None => format!(
                "{}: candidate=\"{}\" | matches baseline? {}",
                self.id, self.candidate, self.equal
            ),
        }
    }
}

fn error_chain(error: &Error) -> String {
    let mut message = error.to_string();
    let mut source = StdError::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = StdError::source(cause);
    }
    message
}

/// Reads a baseline file. A missing file is an empty baseline.
pub fn load_baseline(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            log::debug!("No baseline at {}, comparing against empty text", path.display());
            Ok(String::new())
        }
        Err(err) => Err(err.into()),
    }
}

/// Writes `diff` next to the image, or removes a stale diff when there is nothing to report.
fn write_diff(path: &Path, diff: &[String]) -> Result<()> {
    if diff.is_empty() {
        return remove_stale(path);
    }
    fs::write(path, diff.join("\n"))?;
    Ok(())
}

fn remove_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
        _ => Ok(()),
    }
}

pub struct Harness<'p, D, R> {
    pipeline: &'p Pipeline<D, R>,
    corpus: Corpus,
}

impl<'p, D: Graph, R: Graph> Harness<'p, D, R> {
    pub fn new(pipeline: &'p Pipeline<D, R>, corpus: Corpus) -> Self {
        Self { pipeline, corpus }
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    /// Lazily checks every image in corpus order. Each call starts over from the first image.
    pub fn run(&self) -> Verdicts<'_, 'p, D, R> {
        Verdicts {
            harness: self,
            entries: self.corpus.entries().iter(),
        }
    }

    /// Evaluates one image and persists its artifacts. A failed image leaves no candidate or
    /// diff file behind.
    #[instrument(skip(self, entry), fields(image = %entry.image.display()))]
    pub fn check(&self, entry: &CorpusEntry) -> Verdict {
        let mut verdict = self.evaluate(entry);
        let written = match verdict.error {
            None => persist(entry, &verdict),
            Some(_) => clear_artifacts(entry),
        };
        if let Err(err) = written {
            log::warn!("Failed to update artifacts for {}: {err}", verdict.id);
            verdict.equal = false;
            verdict.error.get_or_insert_with(|| error_chain(&err));
        }
        verdict
    }

    /// Evaluates one image without touching the filesystem beyond reading inputs.
    pub fn evaluate(&self, entry: &CorpusEntry) -> Verdict {
        let id = entry.id();
        let baseline = match load_baseline(&entry.baseline_path()) {
            Ok(baseline) => baseline,
            Err(err) => {
                log::warn!("{id}: {err}");
                return Verdict::failed(id, entry.language, String::new(), &err);
            }
        };

        let candidate = load_image(&entry.image)
            .and_then(|image| self.pipeline.infer(&image, entry.language));
        match candidate {
            Ok(candidate) => Verdict::compare(id, entry.language, baseline, candidate),
            Err(err) => {
                log::warn!("{id}: {err}");
                Verdict::failed(id, entry.language, baseline, &err)
            }
        }
    }
}

/// Iterator returned by [`Harness::run`].
pub struct Verdicts<'h, 'p, D, R> {
    harness: &'h Harness<'p, D, R>,
    entries: std::slice::Iter<'h, CorpusEntry>,
}

impl<D: Graph, R: Graph> Iterator for Verdicts<'_, '_, D, R> {
    type Item = Verdict;

    fn next(&mut self) -> Option<Verdict> {
        let entry = self.entries.next()?;
        Some(self.harness.check(entry))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

pub fn load_image(path: &Path) -> Result<image::DynamicImage> {
    image::open(path).map_err(|source| Error::InvalidImage {
        context: path.display().to_string(),
        source: Some(source),
    })
}

/// Writes the candidate text and, when the texts differ line-wise, the diff.
pub fn persist(entry: &CorpusEntry, verdict: &Verdict) -> Result<()> {
    fs::write(entry.candidate_path(), &verdict.candidate)?;
    write_diff(&entry.diff_path(), &verdict.diff)
}

/// Removes the candidate and diff files of an earlier run.
pub fn clear_artifacts(entry: &CorpusEntry) -> Result<()> {
    remove_stale(&entry.candidate_path())?;
    remove_stale(&entry.diff_path())
}

/// Re-diffs candidate files already present in `dir` against their baselines without running
/// inference. Both texts are trimmed first and a verdict counts as equal when the diff is empty.
#[instrument(level = "debug", skip(dir), fields(dir = %dir.as_ref().display()))]
pub fn report(dir: impl AsRef<Path>) -> Result<Vec<Verdict>> {
    let candidate_suffix = format!(".{CANDIDATE_SUFFIX}");
    let mut candidates = fs::read_dir(dir.as_ref())?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<io::Result<Vec<_>>>()?;
    candidates.retain(|path| {
        path.file_name()
            .is_some_and(|name| name.to_string_lossy().ends_with(&candidate_suffix))
    });
    candidates.sort();

    candidates
        .into_iter()
        .map(|path| -> Result<Verdict> {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let base = name
                .strip_suffix(candidate_suffix.as_str())
                .unwrap_or(&name)
                .to_string();
            let sibling = |suffix: &str| path.with_file_name(format!("{base}.{suffix}"));

            let candidate = fs::read_to_string(&path)?.trim().to_string();
            let baseline = load_baseline(&sibling(BASELINE_SUFFIX))?.trim().to_string();
            let mut verdict =
                Verdict::compare(&base, Language::from_file_name(&base), baseline, candidate);
            verdict.equal = verdict.diff.is_empty();
            write_diff(&sibling(DIFF_SUFFIX), &verdict.diff)?;
            Ok(verdict)
        })
        .collect()
}
