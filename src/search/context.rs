/// News repository seam used to enrich search results and feed the embedding job
use ahash::{HashMap, HashSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("News repository unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Failed to parse articles: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A stored news article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub stock_key: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl ArticleRecord {
    /// Text fed to the encoder: title and body on separate lines
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}", self.title, self.content)
    }
}

/// Forward price change percentages after publication, per horizon
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceChanges {
    #[serde(rename = "1d")]
    pub d1: Option<f64>,
    #[serde(rename = "2d")]
    pub d2: Option<f64>,
    #[serde(rename = "3d")]
    pub d3: Option<f64>,
    #[serde(rename = "5d")]
    pub d5: Option<f64>,
    #[serde(rename = "10d")]
    pub d10: Option<f64>,
    #[serde(rename = "20d")]
    pub d20: Option<f64>,
}

/// A similar article joined with its stored details
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarNewsContext {
    pub news_id: i64,
    pub similarity: f32,
    pub title: String,
    pub content: String,
    pub stock_key: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub price_changes: PriceChanges,
}

/// Relational store of articles and their price statistics
pub trait NewsRepository: Send + Sync {
    /// Article by id; `Ok(None)` when it does not exist
    fn article(&self, id: i64) -> Result<Option<ArticleRecord>, LookupError>;

    /// Previously computed price changes; `Ok(None)` when none were computed
    fn price_changes(&self, id: i64) -> Result<Option<PriceChanges>, LookupError>;

    /// Up to `limit` articles not in `indexed`, newest first
    fn unembedded(
        &self,
        indexed: &HashSet<i64>,
        limit: usize,
    ) -> Result<Vec<ArticleRecord>, LookupError>;
}

/// Repository kept in memory
#[derive(Debug, Default)]
pub struct InMemoryNewsRepository {
    articles: RwLock<HashMap<i64, ArticleRecord>>,
    price_changes: RwLock<HashMap<i64, PriceChanges>>,
}

/// On-disk shape accepted by [`InMemoryNewsRepository::from_json_file`]
#[derive(Debug, Deserialize)]
struct ArticleDump {
    articles: Vec<ArticleRecord>,
    #[serde(default)]
    price_changes: Vec<PriceChangeEntry>,
}

#[derive(Debug, Deserialize)]
struct PriceChangeEntry {
    news_id: i64,
    #[serde(flatten)]
    changes: PriceChanges,
}

impl InMemoryNewsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{"articles": [...], "price_changes": [...]}` from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, LookupError> {
        let content = std::fs::read_to_string(path).map_err(|e| LookupError::Io {
            source: e,
            context: format!("Failed to read articles file: {:?}", path),
        })?;
        let dump: ArticleDump = serde_json::from_str(&content)?;

        let repository = Self::new();
        for article in dump.articles {
            repository.insert_article(article);
        }
        for entry in dump.price_changes {
            repository.insert_price_changes(entry.news_id, entry.changes);
        }
        Ok(repository)
    }

    pub fn insert_article(&self, article: ArticleRecord) {
        self.articles
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(article.id, article);
    }

    pub fn insert_price_changes(&self, id: i64, changes: PriceChanges) {
        self.price_changes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, changes);
    }

    pub fn len(&self) -> usize {
        self.articles.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> LookupError {
    LookupError::Unavailable("repository lock poisoned".to_string())
}

impl NewsRepository for InMemoryNewsRepository {
    fn article(&self, id: i64) -> Result<Option<ArticleRecord>, LookupError> {
        let articles = self.articles.read().map_err(|_| poisoned())?;
        Ok(articles.get(&id).cloned())
    }

    fn price_changes(&self, id: i64) -> Result<Option<PriceChanges>, LookupError> {
        let price_changes = self.price_changes.read().map_err(|_| poisoned())?;
        Ok(price_changes.get(&id).copied())
    }

    fn unembedded(
        &self,
        indexed: &HashSet<i64>,
        limit: usize,
    ) -> Result<Vec<ArticleRecord>, LookupError> {
        let articles = self.articles.read().map_err(|_| poisoned())?;
        let mut pending: Vec<ArticleRecord> = articles
            .values()
            .filter(|a| !indexed.contains(&a.id))
            .cloned()
            .collect();

        // Newest first; undated articles last, then by id for a stable order
        pending.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        pending.truncate(limit);
        Ok(pending)
    }
}
