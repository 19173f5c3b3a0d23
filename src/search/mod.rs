//! Similarity search service
//!
//! Single entry point combining the embedder and the vector store:
//! - Lazy, load-once index (concurrent first callers share one load)
//! - Query by text with an optional stock key filter and similarity threshold
//! - Bulk insertion with write-through persistence
//!
//! The public methods never fail. Every error is logged and turned into an
//! empty result; the `try_*` variants expose the underlying `Result`.

mod context;
mod job;

pub use context::{
    ArticleRecord, InMemoryNewsRepository, LookupError, NewsRepository, PriceChanges,
    SimilarNewsContext,
};
pub use job::{EmbeddingJob, JobReport};

use crate::config::{Config, SearchConfig};
use crate::embedding::{EmbeddingError, NewsEmbedder};
use crate::runtime::{NativeRuntime, RuntimeError};
use crate::store::{ArticleMetadata, StoreError, VectorStore};
use ahash::HashSet;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Lookup failed: {0}")]
    Lookup(#[from] LookupError),

    #[error(
        "Input length mismatch: {ids} ids, {vectors} vectors, {keys} keys, {timestamps} timestamps"
    )]
    LengthMismatch {
        ids: usize,
        vectors: usize,
        keys: usize,
        timestamps: usize,
    },
}

impl From<tokio::task::JoinError> for SearchError {
    fn from(e: tokio::task::JoinError) -> Self {
        SearchError::Runtime(RuntimeError::Join(e))
    }
}

/// One similar article as ranked by the index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarNews {
    pub news_id: i64,
    pub similarity: f32,
    pub stock_key: String,
    pub published_at: Option<i64>,
}

/// Where the service keeps its index and how it opens it
#[derive(Debug, Clone)]
struct StoreLocation {
    index_path: PathBuf,
    metadata_path: PathBuf,
    dimension: usize,
    nprobe: usize,
}

static SHARED: OnceLock<Arc<SimilarityService>> = OnceLock::new();

/// Embedding + index facade
pub struct SimilarityService {
    location: StoreLocation,
    defaults: SearchConfig,
    embedder: Arc<NewsEmbedder>,
    runtime: NativeRuntime,
    store: OnceCell<Arc<Mutex<VectorStore>>>,
    loads: AtomicUsize,
}

impl SimilarityService {
    /// Service over the configured files
    ///
    /// `embedder` must have been built with the same `runtime`.
    pub fn new(config: &Config, embedder: Arc<NewsEmbedder>, runtime: NativeRuntime) -> Self {
        Self {
            location: StoreLocation {
                index_path: config.index_path(),
                metadata_path: config.metadata_path(),
                dimension: config.embedding.dimension,
                nprobe: config.index.nprobe,
            },
            defaults: config.search.clone(),
            embedder,
            runtime,
            store: OnceCell::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// Service with a FastEmbed-backed embedder and its own runtime section
    pub fn from_config(config: &Config) -> Self {
        let runtime = NativeRuntime::new();
        let embedder = Arc::new(NewsEmbedder::from_config(&config.embedding, runtime.clone()));
        Self::new(config, embedder, runtime)
    }

    /// Process-wide instance; the first caller's `init` wins
    pub fn shared(init: impl FnOnce() -> SimilarityService) -> Arc<SimilarityService> {
        SHARED.get_or_init(|| Arc::new(init())).clone()
    }

    /// Default `top_k`, threshold and filter over-fetch
    pub fn defaults(&self) -> &SearchConfig {
        &self.defaults
    }

    pub fn embedder(&self) -> &Arc<NewsEmbedder> {
        &self.embedder
    }

    /// Load the index if this is the first use; later calls return immediately
    pub async fn ensure_loaded(&self) -> Result<(), SearchError> {
        self.loaded_store().await.map(|_| ())
    }

    pub fn is_loaded(&self) -> bool {
        self.store.initialized()
    }

    /// How many times the index files have been read by this service
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    async fn loaded_store(&self) -> Result<&Arc<Mutex<VectorStore>>, SearchError> {
        self.store
            .get_or_try_init(|| async {
                self.loads.fetch_add(1, Ordering::SeqCst);
                let location = self.location.clone();
                let store = self
                    .runtime
                    .run(move || {
                        VectorStore::load(
                            &location.index_path,
                            &location.metadata_path,
                            location.dimension,
                            location.nprobe,
                        )
                    })
                    .await?;
                Ok::<_, SearchError>(Arc::new(Mutex::new(store)))
            })
            .await
    }

    /// Append embeddings with their metadata and persist immediately
    ///
    /// All four inputs must be the same length, else nothing is added.
    pub async fn try_add_embeddings(
        &self,
        ids: Vec<i64>,
        vectors: Vec<Vec<f32>>,
        stock_keys: Vec<String>,
        published_at: Vec<Option<i64>>,
    ) -> Result<usize, SearchError> {
        let n = ids.len();
        if vectors.len() != n || stock_keys.len() != n || published_at.len() != n {
            return Err(SearchError::LengthMismatch {
                ids: n,
                vectors: vectors.len(),
                keys: stock_keys.len(),
                timestamps: published_at.len(),
            });
        }
        if n == 0 {
            return Ok(0);
        }

        let metadata: Vec<ArticleMetadata> = ids
            .into_iter()
            .zip(stock_keys)
            .zip(published_at)
            .map(|((id, key), ts)| ArticleMetadata::new(id, key, ts))
            .collect();

        let mut store = self.loaded_store().await?.clone().lock_owned().await;
        let location = self.location.clone();

        let added = self
            .runtime
            .run(move || -> Result<usize, StoreError> {
                let added = store.try_add(&vectors, metadata)?;
                if let Err(e) = store.persist(&location.index_path, &location.metadata_path) {
                    error!("Failed to persist vector index: {}", e);
                }
                Ok(added)
            })
            .await??;

        info!("Added {} vectors to the index", added);
        Ok(added)
    }

    /// Append embeddings; returns 0 and logs when the call is rejected
    pub async fn add_embeddings(
        &self,
        ids: Vec<i64>,
        vectors: Vec<Vec<f32>>,
        stock_keys: Vec<String>,
        published_at: Vec<Option<i64>>,
    ) -> usize {
        match self
            .try_add_embeddings(ids, vectors, stock_keys, published_at)
            .await
        {
            Ok(added) => added,
            Err(e) => {
                error!("Failed to add embeddings: {}", e);
                0
            }
        }
    }

    pub async fn try_indexed_ids(&self) -> Result<HashSet<i64>, SearchError> {
        let store = self.loaded_store().await?;
        let store = store.lock().await;
        Ok(store.indexed_ids())
    }

    /// Ids of every article already in the index; empty on failure
    pub async fn indexed_ids(&self) -> HashSet<i64> {
        self.try_indexed_ids().await.unwrap_or_else(|e| {
            error!("Failed to read indexed ids: {}", e);
            HashSet::default()
        })
    }

    /// Number of indexed vectors
    pub async fn vector_count(&self) -> Result<usize, SearchError> {
        let store = self.loaded_store().await?;
        let len = store.lock().await.len();
        Ok(len)
    }

    pub async fn try_search_similar(
        &self,
        text: &str,
        key_filter: Option<&str>,
        top_k: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<SimilarNews>, SearchError> {
        let store = self.loaded_store().await?.clone();
        if top_k == 0 || store.lock().await.is_empty() {
            debug!("Vector index is empty; skipping similarity search");
            return Ok(Vec::new());
        }

        let query = self.embed_query(text).await?;

        let key_filter = key_filter.filter(|k| !k.is_empty()).map(str::to_string);
        let overfetch = self.defaults.filter_overfetch.max(1);
        let store = store.lock_owned().await;

        let results = tokio::task::spawn_blocking(move || {
            rank_candidates(
                &store,
                &query,
                key_filter.as_deref(),
                top_k,
                similarity_threshold,
                overfetch,
            )
        })
        .await??;

        debug!("Similarity search returned {} results", results.len());
        Ok(results)
    }

    /// Similar articles, best first; empty when nothing qualifies or on any failure
    pub async fn search_similar(
        &self,
        text: &str,
        key_filter: Option<&str>,
        top_k: usize,
        similarity_threshold: f32,
    ) -> Vec<SimilarNews> {
        match self
            .try_search_similar(text, key_filter, top_k, similarity_threshold)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                error!("Similarity search failed: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn try_with_context(
        &self,
        text: &str,
        key_filter: Option<&str>,
        repository: &dyn NewsRepository,
        top_k: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<SimilarNewsContext>, SearchError> {
        let similar = self
            .try_search_similar(text, key_filter, top_k, similarity_threshold)
            .await?;

        let mut enriched = Vec::with_capacity(similar.len());
        for news in similar {
            let Some(article) = repository.article(news.news_id)? else {
                debug!("Article {} not found in repository; dropping", news.news_id);
                continue;
            };
            let price_changes = repository
                .price_changes(news.news_id)?
                .unwrap_or_default();

            enriched.push(SimilarNewsContext {
                news_id: news.news_id,
                similarity: news.similarity,
                title: article.title,
                content: article.content,
                stock_key: article.stock_key,
                published_at: article.published_at,
                price_changes,
            });
        }

        debug!("Enriched {} similar articles", enriched.len());
        Ok(enriched)
    }

    /// Similar articles joined with their stored text and price changes
    pub async fn with_context(
        &self,
        text: &str,
        key_filter: Option<&str>,
        repository: &dyn NewsRepository,
        top_k: usize,
        similarity_threshold: f32,
    ) -> Vec<SimilarNewsContext> {
        match self
            .try_with_context(text, key_filter, repository, top_k, similarity_threshold)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                error!("Similar news lookup failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Embed texts on a blocking worker, one at a time
    pub async fn embed_texts(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Result<Vec<f32>, EmbeddingError>>, SearchError> {
        let embedder = self.embedder.clone();
        Ok(tokio::task::spawn_blocking(move || embedder.embed_batch(&texts)).await?)
    }

    // The embedder enters the runtime section itself, so this must not go
    // through `NativeRuntime::run`.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let embedder = self.embedder.clone();
        let text = text.to_string();
        Ok(tokio::task::spawn_blocking(move || embedder.embed(&text)).await??)
    }
}

impl std::fmt::Debug for SimilarityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityService")
            .field("index_path", &self.location.index_path)
            .field("loaded", &self.is_loaded())
            .field("loads", &self.load_count())
            .finish()
    }
}

/// Walk the index's ranking and keep what passes the filter and threshold
///
/// Stops as soon as `top_k` results are accepted.
pub(crate) fn rank_candidates(
    store: &VectorStore,
    query: &[f32],
    key_filter: Option<&str>,
    top_k: usize,
    similarity_threshold: f32,
    overfetch: usize,
) -> Result<Vec<SimilarNews>, StoreError> {
    let search_k = match key_filter {
        Some(_) => top_k.saturating_mul(overfetch),
        None => top_k,
    };
    let hits = store.search(query, search_k)?;

    let mut results = Vec::with_capacity(top_k);
    for hit in hits {
        if results.len() >= top_k {
            break;
        }
        let Some(entry) = store.entry(hit.position) else {
            debug!("Hit position {} has no metadata; skipping", hit.position);
            continue;
        };
        if let Some(key) = key_filter {
            if entry.stock_key != key {
                continue;
            }
        }
        if hit.score < similarity_threshold {
            continue;
        }
        results.push(SimilarNews {
            news_id: entry.article_id,
            similarity: hit.score,
            stock_key: entry.stock_key.clone(),
            published_at: entry.published_at,
        });
    }
    Ok(results)
}
