//! Sentence content seam: words, hint material and concept tags.
//!
//! Content authoring lives outside this crate; the engine only needs to read
//! it. `InMemoryCatalog` loads a JSON array of [`SentenceInfo`].

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::SentenceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordKind {
    Verb,
    Other,
}

/// Material revealed by the three verb hint levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerbHints {
    pub infinitive: String,
    /// e.g. "present tense, first person singular"
    pub form_description: String,
    pub conjugated: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub kind: WordKind,
    #[serde(default)]
    pub verb: Option<VerbHints>,
    /// Distractors offered next to the correct word in a multiple-choice hint.
    #[serde(default)]
    pub distractors: Vec<String>,
    /// Concepts this word exercises. Empty means "the sentence's concepts".
    #[serde(default)]
    pub concepts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceInfo {
    pub id: SentenceId,
    pub source_text: String,
    pub words: Vec<Word>,
    #[serde(default)]
    pub expected_answers: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
}

impl SentenceInfo {
    /// Every concept the sentence exposes, deduplicated and sorted.
    pub fn all_concepts(&self) -> Vec<String> {
        let mut set: BTreeSet<&str> = self.concepts.iter().map(String::as_str).collect();
        for word in &self.words {
            set.extend(word.concepts.iter().map(String::as_str));
        }
        set.into_iter().map(str::to_string).collect()
    }

    /// Concepts touched by a hint on the word at `index`.
    pub fn concepts_for_word(&self, index: usize) -> Vec<String> {
        match self.words.get(index) {
            Some(word) if !word.concepts.is_empty() => word.concepts.clone(),
            Some(_) => self.concepts.clone(),
            None => Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[async_trait]
pub trait SentenceCatalog: Send + Sync {
    async fn sentence(&self, id: SentenceId) -> Option<Arc<SentenceInfo>>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    sentences: HashMap<SentenceId, Arc<SentenceInfo>>,
}

impl InMemoryCatalog {
    pub fn new(sentences: impl IntoIterator<Item = SentenceInfo>) -> Self {
        Self {
            sentences: sentences
                .into_iter()
                .map(|s| (s.id, Arc::new(s)))
                .collect(),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let sentences: Vec<SentenceInfo> = serde_json::from_str(raw)?;
        Ok(Self::new(sentences))
    }

    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn insert(&mut self, sentence: SentenceInfo) {
        self.sentences.insert(sentence.id, Arc::new(sentence));
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}

#[async_trait]
impl SentenceCatalog for InMemoryCatalog {
    async fn sentence(&self, id: SentenceId) -> Option<Arc<SentenceInfo>> {
        self.sentences.get(&id).cloned()
    }
}
