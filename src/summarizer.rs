use crate::beam_search::{beam_search, BeamSearchConfig, GenerationError};
use crate::common::ModelError;
use crate::config::{
    BartConfig, ConfigError, GenerationDefaults, SummarizeParams, EARLY_STOPPING, LENGTH_PENALTY, MAX_INPUT_TOKENS,
    NUM_BEAMS,
};
use crate::hub::{HubError, ModelFiles};
use crate::model::BartModel;
use crate::model_loader::{load_safetensors, ModelLoaderError};
use crate::system_resources::SystemResources;
use crate::tokenizer::{TokenizerError, TokenizerWrapper};
use std::fs;

#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Loader(#[from] ModelLoaderError),
    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// A loaded tokenizer and BART model, ready to summarize documents.
#[derive(Debug)]
pub struct Summarizer {
    tokenizer: TokenizerWrapper,
    model: BartModel,
    defaults: GenerationDefaults,
}

impl Summarizer {
    /// Loads `model_name`, either a local directory or a Hub repository id.
    pub fn from_pretrained(model_name: &str) -> Result<Self, SummarizeError> {
        let files = ModelFiles::resolve(model_name)?;
        Self::from_files(&files)
    }

    pub fn from_files(files: &ModelFiles) -> Result<Self, SummarizeError> {
        let config = BartConfig::load(&files.config)?;
        let mut defaults = GenerationDefaults::from_config(&config);
        if let Some(path) = &files.generation_config {
            defaults = defaults.with_overrides_from(path)?;
        }

        match fs::metadata(&files.weights) {
            Ok(meta) => {
                SystemResources::snapshot().warn_if_insufficient(meta.len());
            }
            Err(e) => log::debug!("Cannot stat {}: {}", files.weights.display(), e),
        }
        let weights = load_safetensors(&files.weights)?;
        let model = BartModel::from_weights(&config, &weights)?;
        drop(weights);

        let max_input_tokens = MAX_INPUT_TOKENS.min(model.max_source_positions());
        let tokenizer = TokenizerWrapper::from_file(&files.tokenizer, max_input_tokens)?;
        Ok(Self { tokenizer, model, defaults })
    }

    fn search_config(&self, params: &SummarizeParams) -> BeamSearchConfig {
        BeamSearchConfig::new(&self.defaults, NUM_BEAMS, params.min_length, params.max_length)
            .with_length_penalty(LENGTH_PENALTY)
            .with_early_stopping(EARLY_STOPPING)
    }

    /// Summary token IDs of `text`, decoder start token first.
    pub fn generate(&self, text: &str, params: &SummarizeParams) -> Result<Vec<u32>, SummarizeError> {
        params.validate()?;
        let input_ids = self.tokenizer.encode(text)?;
        log::info!("Encoding {} input tokens", input_ids.len());
        let encoder_states = self.model.encode(&input_ids)?;

        let mut session = self.model.start_decoding(&encoder_states, NUM_BEAMS)?;
        let tokens = beam_search(&mut session, &self.search_config(params))?;
        log::info!("Generated {} summary tokens", tokens.len());
        Ok(tokens)
    }

    pub fn summarize(&self, text: &str, params: &SummarizeParams) -> Result<String, SummarizeError> {
        let tokens = self.generate(text, params)?;
        let summary = self.tokenizer.decode(&tokens)?;
        Ok(summary.trim().to_string())
    }
}

/// Loads `model_name` and summarizes `text` with it.
pub fn summarize_text(text: &str, model_name: &str, params: &SummarizeParams) -> Result<String, SummarizeError> {
    params.validate()?;
    Summarizer::from_pretrained(model_name)?.summarize(text, params)
}
