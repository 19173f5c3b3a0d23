/// News embedder: lazy model load, serialized inference, pooled unit vectors
use super::pooling::{l2_norm, l2_normalize, mean_pool};
use super::{EmbeddingError, Encoder, FastEmbedLoader, ModelLoader};
use crate::config::EmbeddingConfig;
use crate::runtime::NativeRuntime;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Turns article text into L2-normalized vectors
///
/// The encoder is loaded on the first call and kept for the life of the
/// embedder. Every load and every forward pass happens inside the shared
/// [`NativeRuntime`] section, so the encoder never sees two threads at once.
pub struct NewsEmbedder {
    loader: Box<dyn ModelLoader>,
    encoder: OnceLock<Box<dyn Encoder>>,
    runtime: NativeRuntime,
    dimension: usize,
}

impl NewsEmbedder {
    pub fn new(
        loader: impl ModelLoader + 'static,
        dimension: usize,
        runtime: NativeRuntime,
    ) -> Self {
        Self {
            loader: Box::new(loader),
            encoder: OnceLock::new(),
            runtime,
            dimension,
        }
    }

    /// Embedder backed by FastEmbed as configured
    pub fn from_config(config: &EmbeddingConfig, runtime: NativeRuntime) -> Self {
        let loader = FastEmbedLoader::new(config.model.clone(), config.max_length);
        Self::new(loader, config.dimension, runtime)
    }

    /// Embed one text
    ///
    /// Failures are returned, never panicked; callers skip the item.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        let _guard = self.runtime.enter();
        let encoder = self.encoder_within_section()?;

        let output = encoder.forward(text)?;
        let pooled = mean_pool(output.hidden_states.view(), output.attention_mask.view())?;

        let mut embedding = pooled.to_vec();
        if embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        let norm = l2_norm(&embedding);
        if !norm.is_finite() || norm <= f32::EPSILON {
            return Err(EmbeddingError::GenerationError(format!(
                "Encoder output cannot be normalized (norm {})",
                norm
            )));
        }
        l2_normalize(&mut embedding);

        debug!("Embedding generated: {} dims", embedding.len());
        Ok(embedding)
    }

    /// Embed texts one at a time; a failed item never blocks the rest
    pub fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let result = self.embed(text);
                if let Err(e) = &result {
                    warn!("Embedding failed for batch item {}: {}", i, e);
                }
                result
            })
            .collect()
    }

    /// Whether the encoder has been loaded yet
    pub fn is_loaded(&self) -> bool {
        self.encoder.get().is_some()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    // Caller must hold the runtime section; that is what makes the
    // check-then-set below race free.
    fn encoder_within_section(&self) -> Result<&dyn Encoder, EmbeddingError> {
        if let Some(encoder) = self.encoder.get() {
            return Ok(encoder.as_ref());
        }

        info!("Loading embedding model...");
        let start = Instant::now();
        let encoder = self.loader.load()?;
        info!(
            "Embedding model {} loaded ({:.2}s)",
            encoder.model_name(),
            start.elapsed().as_secs_f32()
        );

        Ok(self.encoder.get_or_init(|| encoder).as_ref())
    }
}

impl std::fmt::Debug for NewsEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewsEmbedder")
            .field("dimension", &self.dimension)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::pooling::l2_norm;
    use crate::embedding::EncoderOutput;
    use ndarray::{Array1, Array2};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Three tokens plus one padding row, values derived from the text bytes
    struct ByteEncoder {
        dimension: usize,
    }

    impl Encoder for ByteEncoder {
        fn forward(&self, text: &str) -> Result<EncoderOutput, EmbeddingError> {
            if text.contains("boom") {
                return Err(EmbeddingError::GenerationError("encoder crashed".into()));
            }
            let bytes = text.as_bytes();
            let hidden = Array2::from_shape_fn((4, self.dimension), |(t, d)| {
                bytes[(t * 7 + d) % bytes.len()] as f32 + t as f32
            });
            let mask = Array1::from(vec![1.0, 1.0, 1.0, 0.0]);
            Ok(EncoderOutput {
                hidden_states: hidden,
                attention_mask: mask,
            })
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            "byte-encoder"
        }
    }

    fn embedder_with_counter(dimension: usize) -> (NewsEmbedder, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let loader = move || -> Result<Box<dyn Encoder>, EmbeddingError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ByteEncoder { dimension }))
        };
        (
            NewsEmbedder::new(loader, dimension, NativeRuntime::new()),
            loads,
        )
    }

    #[test]
    fn test_embedding_is_unit_length() {
        let (embedder, _) = embedder_with_counter(16);
        for text in ["코스피 상승 마감", "Fed holds rates steady", "x"] {
            let v = embedder.embed(text).unwrap();
            assert_eq!(v.len(), 16);
            assert!((l2_norm(&v) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_model_loaded_once() {
        let (embedder, loads) = embedder_with_counter(8);
        assert!(!embedder.is_loaded());

        embedder.embed("first").unwrap();
        embedder.embed("second").unwrap();

        assert!(embedder.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_first_use_loads_once() {
        let (embedder, loads) = embedder_with_counter(8);
        let embedder = Arc::new(embedder);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let embedder = embedder.clone();
                std::thread::spawn(move || embedder.embed(&format!("article {}", i)).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_batch_failure_isolated() {
        let (embedder, _) = embedder_with_counter(8);
        let texts = vec![
            "good one".to_string(),
            "boom".to_string(),
            "".to_string(),
            "good two".to_string(),
        ];

        let results = embedder.embed_batch(&texts);
        assert_eq!(results.len(), 4);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(EmbeddingError::GenerationError(_))));
        assert!(matches!(results[2], Err(EmbeddingError::InvalidInput(_))));
        assert!(results[3].is_ok());
    }

    #[test]
    fn test_dimension_mismatch() {
        let loader = || -> Result<Box<dyn Encoder>, EmbeddingError> {
            Ok(Box::new(ByteEncoder { dimension: 4 }))
        };
        let embedder = NewsEmbedder::new(loader, 8, NativeRuntime::new());
        assert!(matches!(
            embedder.embed("text"),
            Err(EmbeddingError::DimensionMismatch {
                expected: 8,
                actual: 4
            })
        ));
    }

    /// Emits fixed token rows and mask regardless of the text
    struct FixedEncoder {
        hidden: Array2<f32>,
        mask: Array1<f32>,
    }

    impl Encoder for FixedEncoder {
        fn forward(&self, _text: &str) -> Result<EncoderOutput, EmbeddingError> {
            Ok(EncoderOutput {
                hidden_states: self.hidden.clone(),
                attention_mask: self.mask.clone(),
            })
        }

        fn dimension(&self) -> usize {
            self.hidden.ncols()
        }

        fn model_name(&self) -> &str {
            "fixed-encoder"
        }
    }

    fn fixed_embedder(hidden: Array2<f32>, mask: Array1<f32>) -> NewsEmbedder {
        let dimension = hidden.ncols();
        let loader = move || -> Result<Box<dyn Encoder>, EmbeddingError> {
            Ok(Box::new(FixedEncoder {
                hidden: hidden.clone(),
                mask: mask.clone(),
            }))
        };
        NewsEmbedder::new(loader, dimension, NativeRuntime::new())
    }

    #[test]
    fn test_unnormalizable_output_is_an_error() {
        let all_padding = fixed_embedder(Array2::ones((2, 4)), Array1::zeros(2));
        assert!(matches!(
            all_padding.embed("text"),
            Err(EmbeddingError::GenerationError(_))
        ));

        let all_zero = fixed_embedder(Array2::zeros((2, 4)), Array1::ones(2));
        assert!(matches!(
            all_zero.embed("text"),
            Err(EmbeddingError::GenerationError(_))
        ));

        let mut hidden = Array2::ones((2, 4));
        hidden[[0, 1]] = f32::NAN;
        let not_finite = fixed_embedder(hidden, Array1::ones(2));
        assert!(matches!(
            not_finite.embed("text"),
            Err(EmbeddingError::GenerationError(_))
        ));
    }

    #[test]
    fn test_load_failure_is_returned() {
        let loader = || -> Result<Box<dyn Encoder>, EmbeddingError> {
            Err(EmbeddingError::InitializationError("no weights".into()))
        };
        let embedder = NewsEmbedder::new(loader, 8, NativeRuntime::new());
        assert!(embedder.embed("text").is_err());
        assert!(!embedder.is_loaded());
    }
}
