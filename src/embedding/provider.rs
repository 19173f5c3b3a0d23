/// Encoder seam and the FastEmbed-backed implementation
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use ndarray::{Array1, Array2};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Raw encoder output for one text
///
/// `hidden_states` holds one row per token; `attention_mask` is 1.0 for real
/// tokens and 0.0 for padding.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    pub hidden_states: Array2<f32>,
    pub attention_mask: Array1<f32>,
}

/// A loaded text encoder (tokenizer + model weights)
///
/// Implementations are not required to tolerate concurrent calls; the
/// embedder serializes every forward pass.
pub trait Encoder: Send + Sync {
    /// Tokenize and run the forward pass, truncating silently past the
    /// model's maximum token length
    fn forward(&self, text: &str) -> Result<EncoderOutput, EmbeddingError>;

    /// Width of one token representation
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Resolves a model name to a ready encoder
///
/// Called at most once per embedder, on first use.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn Encoder>, EmbeddingError>;
}

impl<F> ModelLoader for F
where
    F: Fn() -> Result<Box<dyn Encoder>, EmbeddingError> + Send + Sync,
{
    fn load(&self) -> Result<Box<dyn Encoder>, EmbeddingError> {
        self()
    }
}

/// Map a configured model name to the FastEmbed model and its dimension
pub fn resolve_model(model_name: &str) -> Result<(EmbeddingModel, usize), EmbeddingError> {
    let resolved = match model_name {
        "multilingual-e5-base" => (EmbeddingModel::MultilingualE5Base, 768),
        "multilingual-e5-small" => (EmbeddingModel::MultilingualE5Small, 384),
        "paraphrase-multilingual-mpnet-base-v2" => (EmbeddingModel::ParaphraseMLMpnetBaseV2, 768),
        "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
        "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
        _ => {
            return Err(EmbeddingError::InitializationError(format!(
                "Unsupported model: {}. Supported: multilingual-e5-base, multilingual-e5-small, \
                 paraphrase-multilingual-mpnet-base-v2, bge-base-en-v1.5, all-MiniLM-L6-v2",
                model_name
            )));
        }
    };
    Ok(resolved)
}

/// FastEmbed encoder for local inference
///
/// FastEmbed pools token states inside its ONNX session, so each output is
/// surfaced as a single fully-masked row. Mean pooling over one row is the row
/// itself, and the shared pooling path still applies normalization.
pub struct FastEmbedEncoder {
    model: TextEmbedding,
    model_name: String,
    dimension: usize,
}

impl FastEmbedEncoder {
    /// Load the named model, downloading it to the FastEmbed cache if absent
    pub fn new(model_name: &str, max_length: usize) -> Result<Self, EmbeddingError> {
        let (embedding_model, dimension) = resolve_model(model_name)?;

        tracing::info!(
            "Initializing embedding model: {} ({}D, max {} tokens)",
            model_name,
            dimension,
            max_length
        );

        let init_options = InitOptions::new(embedding_model)
            .with_max_length(max_length)
            .with_show_download_progress(true);

        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model,
            model_name: model_name.to_string(),
            dimension,
        })
    }
}

impl Encoder for FastEmbedEncoder {
    fn forward(&self, text: &str) -> Result<EncoderOutput, EmbeddingError> {
        let mut embeddings = self
            .model
            .embed(vec![text.to_string()], None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        let pooled = embeddings.pop().ok_or_else(|| {
            EmbeddingError::GenerationError("No embeddings generated".to_string())
        })?;

        let width = pooled.len();
        let hidden_states = Array2::from_shape_vec((1, width), pooled)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        Ok(EncoderOutput {
            hidden_states,
            attention_mask: Array1::ones(1),
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Loader producing a [`FastEmbedEncoder`]
#[derive(Debug, Clone)]
pub struct FastEmbedLoader {
    model_name: String,
    max_length: usize,
}

impl FastEmbedLoader {
    pub fn new(model_name: impl Into<String>, max_length: usize) -> Self {
        Self {
            model_name: model_name.into(),
            max_length,
        }
    }
}

impl ModelLoader for FastEmbedLoader {
    fn load(&self) -> Result<Box<dyn Encoder>, EmbeddingError> {
        let encoder = FastEmbedEncoder::new(&self.model_name, self.max_length)?;
        Ok(Box::new(encoder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_models() {
        assert_eq!(resolve_model("multilingual-e5-base").unwrap().1, 768);
        assert_eq!(resolve_model("all-MiniLM-L6-v2").unwrap().1, 384);
    }

    #[test]
    fn test_resolve_unknown_model() {
        let result = resolve_model("KoSimCSE-roberta");
        assert!(matches!(
            result,
            Err(EmbeddingError::InitializationError(_))
        ));
    }

    #[test]
    #[ignore] // Requires model download (~1GB) - run with: cargo test -- --ignored
    fn test_fastembed_forward() {
        let encoder = FastEmbedEncoder::new("multilingual-e5-base", 512).unwrap();
        let output = encoder.forward("삼성전자 2분기 영업이익 시장 예상치 상회").unwrap();
        assert_eq!(output.hidden_states.ncols(), 768);
        assert_eq!(output.attention_mask.len(), output.hidden_states.nrows());
    }
}
