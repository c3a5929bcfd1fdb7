
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{PerfError, Result};

/// One aligned sentence pair, keyed by language code
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TranslationRow {
    pub translation: HashMap<String, String>,
}

impl TranslationRow {
    /// Text for `language`; a missing language is a row-shape error.
    #[inline]
    pub fn text(&self, language: &str) -> Result<&str> {
        self.translation
            .get(language)
            .map(String::as_str)
            .ok_or_else(|| {
                let mut present: Vec<&str> = self.translation.keys().map(String::as_str).collect();
                present.sort_unstable();
                PerfError::Validation(format!(
                    "Translation row has no '{language}' text (languages: {present:?})"
                ))
            })
    }
}

pub type TranslationRows<'a> = Box<dyn Iterator<Item = Result<TranslationRow>> + Send + 'a>;

/// Provides the rows of one (subset, split) of a translation dataset.
pub trait TranslationSource: Send + Sync {
    /// Dataset name recorded in every output row
    fn name(&self) -> &str;

    /// Rows for the pair, or `None` when the source has no such split.
    fn rows(&self, subset: &str, split: &str) -> Result<Option<TranslationRows<'_>>>;
}

/// Reads `<root>/<subset>/<split>.jsonl`, one JSON object per line.
#[derive(Debug, Clone)]
pub struct JsonlTranslationSource {
    root: PathBuf,
    name: String,
}

impl JsonlTranslationSource {
    #[inline]
    pub fn new<P: AsRef<Path>>(root: P, name: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            name: name.into(),
        }
    }

    #[inline]
    pub fn split_path(&self, subset: &str, split: &str) -> PathBuf {
        self.root.join(subset).join(format!("{split}.jsonl"))
    }
}

impl TranslationSource for JsonlTranslationSource {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn rows(&self, subset: &str, split: &str) -> Result<Option<TranslationRows<'_>>> {
        let path = self.split_path(subset, split);
        if !path.is_file() {
            return Ok(None);
        }

        debug!("Reading translation rows from {}", path.display());
        let file = File::open(&path)?;
        let reader = BufReader::new(file);

        let rows = reader
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.as_ref().is_ok_and(|l| l.trim().is_empty()))
            .map(move |(index, line)| {
                let line = line?;
                serde_json::from_str::<TranslationRow>(&line).map_err(|e| {
                    PerfError::Validation(format!(
                        "{}:{}: invalid translation row: {}",
                        path.display(),
                        index + 1,
                        e
                    ))
                })
            });

        Ok(Some(Box::new(rows)))
    }
}

/// Derives the non-pivot language of a subset, e.g. `en-vi` with pivot `en`
/// gives `vi`.
#[inline]
pub fn target_language(subset: &str, pivot: &str) -> Result<String> {
    let target = subset
        .replace(pivot, "")
        .trim_matches(|c| matches!(c, ' ' | '_' | '-'))
        .to_string();

    if target.is_empty() || target == subset {
        return Err(PerfError::Configuration(format!(
            "Subset '{subset}' does not pair pivot language '{pivot}' with another language"
        )));
    }
    Ok(target)
}
