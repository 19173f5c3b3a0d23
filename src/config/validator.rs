use crate::config::Config;
use crate::embedding::resolve_model;
use crate::error::{NewsvecError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_search(config, &mut errors);

        if config.job.batch_size == 0 {
            errors.push(ValidationError::new(
                "job.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(NewsvecError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.index_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.index_path",
                "Index file path cannot be empty",
            ));
        }

        if config.storage.metadata_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.metadata_path",
                "Metadata file path cannot be empty",
            ));
        }

        if config.storage.index_path == config.storage.metadata_path {
            errors.push(ValidationError::new(
                "storage.metadata_path",
                "Index and metadata must be separate files",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }

        if !config.embedding.model.is_empty() {
            match resolve_model(&config.embedding.model) {
                Ok((_, dimension))
                    if config.embedding.dimension > 0 && dimension != config.embedding.dimension =>
                {
                    errors.push(ValidationError::new(
                        "embedding.dimension",
                        format!(
                            "Model {} produces {}-dimensional vectors, configured {}",
                            config.embedding.model, dimension, config.embedding.dimension
                        ),
                    ));
                }
                Ok(_) => {}
                Err(e) => errors.push(ValidationError::new("embedding.model", e.to_string())),
            }
        }

        let max_length = config.embedding.max_length;
        if !(1..=8192).contains(&max_length) {
            errors.push(ValidationError::new(
                "embedding.max_length",
                format!("Max token length must be between 1 and 8192, got {}", max_length),
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.nprobe == 0 {
            errors.push(ValidationError::new(
                "index.nprobe",
                "nprobe must be greater than 0",
            ));
        }

        if config.index.max_nlist == 0 {
            errors.push(ValidationError::new(
                "index.max_nlist",
                "max_nlist must be greater than 0",
            ));
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.search.top_k == 0 {
            errors.push(ValidationError::new(
                "search.top_k",
                "top_k must be greater than 0",
            ));
        }

        let threshold = config.search.similarity_threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            errors.push(ValidationError::new(
                "search.similarity_threshold",
                format!("Threshold must be between -1.0 and 1.0, got {}", threshold),
            ));
        }

        if config.search.filter_overfetch == 0 {
            errors.push(ValidationError::new(
                "search.filter_overfetch",
                "Filter overfetch must be greater than 0",
            ));
        }
    }
}
