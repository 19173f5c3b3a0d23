/// Embedding job: embed articles that are not yet indexed and add them in bulk
use super::{NewsRepository, SearchError, SimilarityService};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Outcome of one job run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    /// Articles embedded and added to the index
    pub saved: usize,
    /// Articles whose embedding failed
    pub failed: usize,
}

pub struct EmbeddingJob {
    service: Arc<SimilarityService>,
}

impl EmbeddingJob {
    pub fn new(service: Arc<SimilarityService>) -> Self {
        Self { service }
    }

    /// Embed up to `batch_size` unindexed articles, newest first
    pub async fn run(
        &self,
        repository: &dyn NewsRepository,
        batch_size: usize,
    ) -> Result<JobReport, SearchError> {
        let start = Instant::now();
        let indexed = self.service.try_indexed_ids().await?;
        let pending = repository.unembedded(&indexed, batch_size)?;

        if pending.is_empty() {
            info!("No articles waiting for embedding");
            return Ok(JobReport::default());
        }
        info!("Embedding {} articles", pending.len());

        let texts: Vec<String> = pending.iter().map(|a| a.embedding_text()).collect();
        let embeddings = self.service.embed_texts(texts).await?;

        let mut ids = Vec::new();
        let mut vectors = Vec::new();
        let mut stock_keys = Vec::new();
        let mut published_at = Vec::new();
        let mut failed = 0;

        for (article, embedding) in pending.into_iter().zip(embeddings) {
            match embedding {
                Ok(vector) => {
                    ids.push(article.id);
                    vectors.push(vector);
                    stock_keys.push(article.stock_key.unwrap_or_default());
                    published_at.push(article.published_at.map(|t| t.timestamp()));
                }
                Err(e) => {
                    warn!("Skipping article {}: {}", article.id, e);
                    failed += 1;
                }
            }
        }

        let saved = self
            .service
            .try_add_embeddings(ids, vectors, stock_keys, published_at)
            .await?;

        info!(
            "Embedding job finished: {} saved, {} failed ({:.2}s)",
            saved,
            failed,
            start.elapsed().as_secs_f32()
        );
        Ok(JobReport { saved, failed })
    }
}
