//! Shared fixtures: a deterministic offline encoder and temp-dir services
#![allow(dead_code)]

use ndarray::{Array1, Array2};
use newsvec::config::Config;
use newsvec::embedding::{EmbeddingError, Encoder, EncoderOutput, NewsEmbedder};
use newsvec::runtime::NativeRuntime;
use newsvec::search::SimilarityService;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const DIM: usize = 4;

/// Encodes `"v:a,b,c,d"` as that exact vector; any other text is derived
/// from its bytes. Texts containing "boom" fail.
pub struct TableEncoder {
    calls: Arc<AtomicUsize>,
}

impl Encoder for TableEncoder {
    fn forward(&self, text: &str) -> Result<EncoderOutput, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("boom") {
            return Err(EmbeddingError::GenerationError("encoder crashed".into()));
        }

        let values: Vec<f32> = match text.strip_prefix("v:") {
            Some(list) => list
                .split(',')
                .map(|v| v.trim().parse::<f32>())
                .collect::<Result<_, _>>()
                .map_err(|e| EmbeddingError::InvalidInput(e.to_string()))?,
            None => {
                let mut values = vec![1.0f32; DIM];
                for (i, byte) in text.bytes().enumerate() {
                    values[i % DIM] += byte as f32;
                }
                values
            }
        };

        let width = values.len();
        Ok(EncoderOutput {
            hidden_states: Array2::from_shape_vec((1, width), values)
                .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?,
            attention_mask: Array1::from(vec![1.0]),
        })
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "table-encoder"
    }
}

pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.index_path = dir.join("vectors").join("news.index");
    config.storage.metadata_path = dir.join("vectors").join("news_metadata.json");
    config.embedding.dimension = DIM;
    config
}

/// Service over `config` plus a counter of encoder forward passes
pub fn service_with_counter(config: &Config) -> (SimilarityService, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let loader = move || -> Result<Box<dyn Encoder>, EmbeddingError> {
        Ok(Box::new(TableEncoder {
            calls: counter.clone(),
        }))
    };

    let runtime = NativeRuntime::new();
    let embedder = Arc::new(NewsEmbedder::new(loader, DIM, runtime.clone()));
    (SimilarityService::new(config, embedder, runtime), calls)
}

pub fn service(config: &Config) -> SimilarityService {
    service_with_counter(config).0
}

/// Unit-length copy of `v`
pub fn unit(v: [f32; DIM]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

/// Query text that the table encoder turns into `v`
pub fn query_for(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
    format!("v:{}", parts.join(","))
}
