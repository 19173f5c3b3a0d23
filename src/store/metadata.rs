/// Article metadata records stored alongside the vector index
use super::StoreError;
use crate::index::write_replacing;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What is known about the article behind one index position
///
/// Appended once when the article's embedding is added; never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    pub article_id: i64,
    /// Stock code the article belongs to; empty means unkeyed
    #[serde(default)]
    pub stock_key: String,
    /// Unix seconds; `None` for legacy entries
    #[serde(default)]
    pub published_at: Option<i64>,
}

impl ArticleMetadata {
    pub fn new(article_id: i64, stock_key: impl Into<String>, published_at: Option<i64>) -> Self {
        Self {
            article_id,
            stock_key: stock_key.into(),
            published_at,
        }
    }

    pub fn is_keyed(&self) -> bool {
        !self.stock_key.is_empty()
    }
}

/// Read the metadata array, order preserved
pub fn read_metadata(path: &Path) -> Result<Vec<ArticleMetadata>, StoreError> {
    let content = std::fs::read(path).map_err(|e| StoreError::Io {
        source: e,
        context: format!("Failed to read metadata file: {:?}", path),
    })?;
    serde_json::from_slice(&content).map_err(|e| StoreError::Metadata {
        source: e,
        context: format!("Failed to parse metadata file: {:?}", path),
    })
}

/// Write the metadata array through a temp file and rename
pub fn write_metadata(path: &Path, entries: &[ArticleMetadata]) -> Result<(), StoreError> {
    let content = serde_json::to_vec(entries).map_err(|e| StoreError::Metadata {
        source: e,
        context: "Failed to serialize metadata".to_string(),
    })?;
    write_replacing(path, &content).map_err(|e| StoreError::Io {
        source: e,
        context: format!("Failed to write metadata file: {:?}", path),
    })
}
