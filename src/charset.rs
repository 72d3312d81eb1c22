use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, RwLock},
};

use tracing::instrument;

use crate::{Error, Result};

/// Recognizer languages with an exported charset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Language {
    #[default]
    En,
    Fr,
    Ja,
    Ko,
    ChSim,
    Th,
}

/// Corpus file stems with a known language. Anything else is English.
const FILE_NAME_TABLE: &[(&str, Language)] = &[
    ("english", Language::En),
    ("example", Language::En),
    ("example2", Language::En),
    ("example3", Language::En),
    ("easyocr_framework", Language::En),
    ("width_ths", Language::En),
    ("french", Language::Fr),
    ("japanese", Language::Ja),
    ("korean", Language::Ko),
    ("chinese", Language::ChSim),
    ("thai", Language::Th),
];

impl Language {
    pub const ALL: [Language; 6] = [
        Language::En,
        Language::Fr,
        Language::Ja,
        Language::Ko,
        Language::ChSim,
        Language::Th,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Fr => "fr",
            Language::Ja => "ja",
            Language::Ko => "ko",
            Language::ChSim => "ch_sim",
            Language::Th => "th",
        }
    }

    /// Unknown tags fall back to English.
    pub fn from_tag(tag: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|lang| lang.tag().eq_ignore_ascii_case(tag))
            .unwrap_or_default()
    }

    /// Derives the language from a corpus file name. Only the part of the file name before the
    /// first `.` is compared, case-insensitively.
    pub fn from_file_name(path: impl AsRef<Path>) -> Self {
        let stem = path
            .as_ref()
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        let stem = stem.split('.').next().unwrap_or_default().to_lowercase();
        FILE_NAME_TABLE
            .iter()
            .find(|(name, _)| *name == stem)
            .map(|(_, lang)| *lang)
            .unwrap_or_default()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Language {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::from_tag(s))
    }
}

/// Recognizable symbols; symbol `i` belongs to recognizer class `i + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Charset {
    symbols: Vec<char>,
}

impl Charset {
    pub fn new(symbols: impl Into<String>) -> Self {
        Self {
            symbols: symbols.into().chars().collect(),
        }
    }

    #[instrument(level = "debug")]
    pub fn load(path: &Path) -> Result<Self> {
        let symbols = std::fs::read_to_string(path).map_err(|source| Error::Charset {
            path: path.to_path_buf(),
            source,
        })?;
        let charset = Self::new(symbols);
        log::debug!("Loaded {} symbols from {}", charset.len(), path.display());
        Ok(charset)
    }

    /// Symbol for a recognizer class. The blank class and classes past the end have none.
    pub fn symbol(&self, class: usize) -> Option<char> {
        class
            .checked_sub(1)
            .and_then(|index| self.symbols.get(index))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Read-through charset cache keyed by language. Entries are never invalidated; concurrent
/// misses may both read the file but only the first insert is kept.
#[derive(Debug)]
pub struct CharsetCache {
    dir: PathBuf,
    entries: RwLock<HashMap<Language, Arc<Charset>>>,
}

impl CharsetCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            entries: RwLock::default(),
        }
    }

    pub fn path_for(&self, language: Language) -> PathBuf {
        self.dir.join(format!("{}_char.txt", language.tag()))
    }

    pub fn get(&self, language: Language) -> Result<Arc<Charset>> {
        if let Some(charset) = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&language)
        {
            return Ok(charset.clone());
        }

        let charset = Arc::new(Charset::load(&self.path_for(language))?);
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(entries.entry(language).or_insert(charset).clone())
    }

    /// Seeds the cache without touching the filesystem. Existing entries win.
    pub fn insert(&self, language: Language, charset: Charset) -> Arc<Charset> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.entry(language).or_insert(Arc::new(charset)).clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
