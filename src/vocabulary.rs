//! Domain vocabulary: a priming prompt for the model and literal fix-ups
//! applied to its output.
//!
//! The document is JSON:
//!
//! ```json
//! { "vocabulary": ["Timpanogos", "Orem"], "replacements": { "Oram": "Orem" } }
//! ```
//!
//! Both keys are optional. Replacements run in document order, each one over
//! the output of the previous one.

use anyhow::{Context, Result};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::storage;
use crate::transcriber::Transcript;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    pub vocabulary: Vec<String>,
    #[serde(deserialize_with = "ordered_pairs")]
    pub replacements: Vec<(String, String)>,
}

impl Vocabulary {
    /// Loads the vocabulary for a run. An explicit path wins; without one the
    /// output directory's state folder is consulted. A file that is absent or
    /// cannot be read means "no vocabulary".
    pub fn load(explicit: Option<&Path>, output_root: Option<&Path>) -> Result<Option<Self>> {
        let path = match (explicit, output_root) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(root)) => storage::vocabulary_path(root),
            (None, None) => return Ok(None),
        };
        if !path.is_file() {
            if explicit.is_some() {
                tracing::warn!(path = %path.display(), "vocabulary file not found; continuing without it");
            }
            return Ok(None);
        }
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "vocabulary unreadable; continuing without it");
                return Ok(None);
            }
        };
        let vocab = Self::parse(&contents)
            .with_context(|| format!("parse vocabulary {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            terms = vocab.vocabulary.len(),
            replacements = vocab.replacements.len(),
            "vocabulary loaded"
        );
        Ok(Some(vocab))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Terms joined into the model's initial prompt, or `None` when there are none.
    pub fn prompt(&self) -> Option<String> {
        if self.vocabulary.is_empty() {
            None
        } else {
            Some(self.vocabulary.join(", "))
        }
    }

    /// Case-sensitive literal replacement, applied rule by rule.
    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (old, new) in &self.replacements {
            if old.is_empty() {
                continue;
            }
            out = out.replace(old.as_str(), new);
        }
        out
    }

    pub fn apply_to(&self, transcript: &mut Transcript) {
        if self.replacements.is_empty() {
            return;
        }
        transcript.text = self.apply(&transcript.text);
        for segment in &mut transcript.segments {
            segment.text = self.apply(&segment.text);
        }
    }
}

fn ordered_pairs<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PairsVisitor;

    impl<'de> Visitor<'de> for PairsVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of string replacements")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((old, new)) = map.next_entry::<String, String>()? {
                pairs.push((old, new));
            }
            Ok(pairs)
        }
    }

    deserializer.deserialize_map(PairsVisitor)
}
