use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_MODEL: &str = "facebook/bart-large-cnn";
pub const MAX_INPUT_TOKENS: usize = 1024;
pub const NUM_BEAMS: usize = 4;
pub const LENGTH_PENALTY: f32 = 2.0;
pub const EARLY_STOPPING: bool = true;
pub const DEFAULT_MAX_LENGTH: usize = 50;
pub const DEFAULT_MIN_LENGTH: usize = 25;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to deserialize JSON from {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("Invalid model configuration: {0}")]
    Invalid(String),
}

fn default_layer_norm_eps() -> f32 {
    1e-5
}

fn default_activation() -> String {
    "gelu".to_string()
}

fn default_bos() -> u32 {
    0
}

fn default_pad() -> u32 {
    1
}

fn default_eos() -> u32 {
    2
}

/// The parts of a BART-family `config.json` the forward pass and decoder need.
#[derive(Deserialize, Debug, Clone)]
pub struct BartConfig {
    pub vocab_size: usize,
    pub max_position_embeddings: usize,
    pub d_model: usize,
    pub encoder_layers: usize,
    pub decoder_layers: usize,
    pub encoder_attention_heads: usize,
    pub decoder_attention_heads: usize,
    pub encoder_ffn_dim: usize,
    pub decoder_ffn_dim: usize,
    #[serde(default = "default_activation", alias = "hidden_act")]
    pub activation_function: String,
    #[serde(default)]
    pub scale_embedding: bool,
    #[serde(default)]
    pub normalize_before: bool,
    #[serde(default)]
    pub add_final_layer_norm: bool,
    #[serde(default = "default_layer_norm_eps", alias = "layer_norm_epsilon")]
    pub layer_norm_eps: f32,
    #[serde(default = "default_bos")]
    pub bos_token_id: u32,
    #[serde(default = "default_pad")]
    pub pad_token_id: u32,
    #[serde(default = "default_eos")]
    pub eos_token_id: u32,
    pub decoder_start_token_id: Option<u32>,
    pub forced_bos_token_id: Option<u32>,
    pub forced_eos_token_id: Option<u32>,
    #[serde(default)]
    pub no_repeat_ngram_size: usize,
    #[serde(default)]
    pub model_type: Option<String>,
}

impl BartConfig {
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = config_path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: BartConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("vocab_size", self.vocab_size),
            ("d_model", self.d_model),
            ("encoder_attention_heads", self.encoder_attention_heads),
            ("decoder_attention_heads", self.decoder_attention_heads),
            ("encoder_ffn_dim", self.encoder_ffn_dim),
            ("decoder_ffn_dim", self.decoder_ffn_dim),
            ("max_position_embeddings", self.max_position_embeddings),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{} must be positive", name)));
        }
        for heads in [self.encoder_attention_heads, self.decoder_attention_heads] {
            if self.d_model % heads != 0 {
                return Err(ConfigError::Invalid(format!(
                    "d_model ({}) must be divisible by the number of heads ({})",
                    self.d_model, heads
                )));
            }
        }
        if let Some(model_type) = &self.model_type {
            if !matches!(model_type.as_str(), "bart" | "mbart") {
                log::warn!("config declares model_type '{}', treating it as BART", model_type);
            }
        }
        Ok(())
    }

    pub fn decoder_start_token_id(&self) -> u32 {
        self.decoder_start_token_id.unwrap_or(self.eos_token_id)
    }
}

/// Model-side generation defaults. Optional fields in `generation_config.json`
/// override what `config.json` declares.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationDefaults {
    pub decoder_start_token_id: u32,
    pub eos_token_id: u32,
    pub pad_token_id: u32,
    pub forced_bos_token_id: Option<u32>,
    pub forced_eos_token_id: Option<u32>,
    pub no_repeat_ngram_size: usize,
}

#[derive(Deserialize, Debug, Default)]
struct GenerationConfigFile {
    decoder_start_token_id: Option<u32>,
    eos_token_id: Option<u32>,
    pad_token_id: Option<u32>,
    forced_bos_token_id: Option<u32>,
    forced_eos_token_id: Option<u32>,
    no_repeat_ngram_size: Option<usize>,
}

impl GenerationDefaults {
    pub fn from_config(config: &BartConfig) -> Self {
        Self {
            decoder_start_token_id: config.decoder_start_token_id(),
            eos_token_id: config.eos_token_id,
            pad_token_id: config.pad_token_id,
            forced_bos_token_id: config.forced_bos_token_id,
            forced_eos_token_id: config.forced_eos_token_id,
            no_repeat_ngram_size: config.no_repeat_ngram_size,
        }
    }

    pub fn with_overrides_from(mut self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: GenerationConfigFile =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
                path: path.display().to_string(),
                source,
            })?;

        if let Some(id) = file.decoder_start_token_id {
            self.decoder_start_token_id = id;
        }
        if let Some(id) = file.eos_token_id {
            self.eos_token_id = id;
        }
        if let Some(id) = file.pad_token_id {
            self.pad_token_id = id;
        }
        if file.forced_bos_token_id.is_some() {
            self.forced_bos_token_id = file.forced_bos_token_id;
        }
        if file.forced_eos_token_id.is_some() {
            self.forced_eos_token_id = file.forced_eos_token_id;
        }
        if let Some(n) = file.no_repeat_ngram_size {
            self.no_repeat_ngram_size = n;
        }
        Ok(self)
    }
}

/// Output length bounds, in decoder tokens (decoder start token included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummarizeParams {
    pub max_length: usize,
    pub min_length: usize,
}

impl Default for SummarizeParams {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            min_length: DEFAULT_MIN_LENGTH,
        }
    }
}

impl SummarizeParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_length == 0 {
            return Err(ConfigError::Invalid("min_length must be positive".to_string()));
        }
        if self.min_length > self.max_length {
            return Err(ConfigError::Invalid(format!(
                "min_length ({}) must not exceed max_length ({})",
                self.min_length, self.max_length
            )));
        }
        Ok(())
    }
}
