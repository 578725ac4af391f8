use crate::config::{parse_duration, Config};
use crate::enrichment::local_model_dimension;
use crate::error::{KnowError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_daemon(config, &mut errors);
        Self::validate_enrichment(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_indexing(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(KnowError::ConfigValidation { errors })
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
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
    }

    fn validate_daemon(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.daemon.socket_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "daemon.socket_path",
                "Socket path cannot be empty",
            ));
        }

        match parse_duration(&config.daemon.read_timeout) {
            Some(timeout) if !timeout.is_zero() => {}
            _ => errors.push(ValidationError::new(
                "daemon.read_timeout",
                format!("Invalid read timeout: {}", config.daemon.read_timeout),
            )),
        }

        if config.daemon.max_connections == 0 {
            errors.push(ValidationError::new(
                "daemon.max_connections",
                "Max connections must be greater than 0",
            ));
        }
    }

    fn validate_enrichment(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.enrichment.workers == 0 {
            errors.push(ValidationError::new(
                "enrichment.workers",
                "Worker count must be greater than 0",
            ));
        }

        match parse_duration(&config.enrichment.call_timeout) {
            Some(timeout) if timeout.is_zero() => errors.push(ValidationError::new(
                "enrichment.call_timeout",
                "Call timeout must be greater than 0",
            )),
            Some(_) => {}
            None => errors.push(ValidationError::new(
                "enrichment.call_timeout",
                format!(
                    "Invalid duration format: {}",
                    config.enrichment.call_timeout
                ),
            )),
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.llm.provider;
        let valid_providers = ["gemini"];
        if !valid_providers.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "llm.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    valid_providers, provider
                ),
            ));
        }

        if config.llm.model.is_empty() {
            errors.push(ValidationError::new("llm.model", "Model name cannot be empty"));
        }

        if config.llm.embedding_model.is_empty() {
            errors.push(ValidationError::new(
                "llm.embedding_model",
                "Embedding model name cannot be empty",
            ));
        }

        if !config.llm.base_url.starts_with("http://") && !config.llm.base_url.starts_with("https://")
        {
            errors.push(ValidationError::new(
                "llm.base_url",
                format!("Base URL must be http(s), got '{}'", config.llm.base_url),
            ));
        }

        let embedding_provider = config.llm.embedding_provider.as_str();
        let valid_embedding_providers = ["gemini", "fastembed"];
        if !valid_embedding_providers.contains(&embedding_provider) {
            errors.push(ValidationError::new(
                "llm.embedding_provider",
                format!(
                    "Embedding provider must be one of {:?}, got '{}'",
                    valid_embedding_providers, embedding_provider
                ),
            ));
        } else if embedding_provider == "fastembed" {
            match local_model_dimension(&config.llm.local_embedding_model) {
                None => errors.push(ValidationError::new(
                    "llm.local_embedding_model",
                    format!(
                        "Unsupported local embedding model '{}'",
                        config.llm.local_embedding_model
                    ),
                )),
                Some(dimension) if dimension != config.indexing.vector_dim => {
                    errors.push(ValidationError::new(
                        "indexing.vector_dim",
                        format!(
                            "Local model {} produces {} dimensions, index expects {}",
                            config.llm.local_embedding_model, dimension, config.indexing.vector_dim
                        ),
                    ))
                }
                Some(_) => {}
            }
        }

        let temp = config.llm.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.indexing.vector_dim == 0 {
            errors.push(ValidationError::new(
                "indexing.vector_dim",
                "Vector dimension must be greater than 0",
            ));
        }
    }
}
