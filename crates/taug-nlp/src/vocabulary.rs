//! Token vocabulary loaded from a word list.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use taug_nn::nn::TokenIndex;

/// Bidirectional mapping between tokens and ids.
///
/// Ids are positions in the source list. When a token occurs more than once,
/// lookups resolve to its first occurrence.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    words: Vec<String>,
    ids: HashMap<String, usize>,
}

impl Vocabulary {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let words: Vec<String> = words.into_iter().map(Into::into).collect();
        let mut ids = HashMap::with_capacity(words.len());
        for (id, word) in words.iter().enumerate() {
            ids.entry(word.clone()).or_insert(id);
        }
        Self { words, ids }
    }

    /// Reads a `vocab.txt` file holding one token per line.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read vocabulary from {}", path.display()))?;
        let vocab = Self::new(text.lines());
        log::info!("loaded {} tokens from {}", vocab.len(), path.display());
        Ok(vocab)
    }

    pub fn index(&self, word: &str) -> Option<usize> {
        self.ids.get(word).copied()
    }

    pub fn word(&self, id: usize) -> Option<&str> {
        self.words.get(id).map(String::as_str)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.ids.contains_key(word)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }
}

impl TokenIndex for Vocabulary {
    fn index(&self, word: &str) -> Option<usize> {
        Vocabulary::index(self, word)
    }

    fn len(&self) -> usize {
        Vocabulary::len(self)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_ids_follow_list_order() {
        let vocab = Vocabulary::new(["[PAD]", "[UNK]", "hello", "[UNK]"]);

        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.index("hello"), Some(2));
        assert_eq!(vocab.index("[UNK]"), Some(1));
        assert_eq!(vocab.word(3), Some("[UNK]"));
        assert_eq!(vocab.index("missing"), None);
        assert_eq!(vocab.word(4), None);
    }

    #[test]
    fn test_from_file_reads_one_token_per_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[PAD]\r\n[CLS]\n[SEP]\nworld\n").unwrap();

        let vocab = Vocabulary::from_file(file.path()).unwrap();
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.index("[CLS]"), Some(1));
        assert_eq!(vocab.index("world"), Some(3));
        assert!(vocab.contains("[PAD]"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Vocabulary::from_file(dir.path().join("vocab.txt")).is_err());
    }
}
