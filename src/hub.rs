use hf_hub::api::sync::{Api, ApiError};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const GENERATION_CONFIG_FILE: &str = "generation_config.json";

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Model '{model}' has no {file}")]
    MissingFile { model: String, file: String },
    #[error("Failed to initialise the Hugging Face Hub client: {0}")]
    Api(#[from] ApiError),
    #[error("Failed to download {file} for model '{model}': {source}")]
    Download {
        model: String,
        file: String,
        source: ApiError,
    },
}

/// Local paths of the files a summarization model is made of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
    pub generation_config: Option<PathBuf>,
}

impl ModelFiles {
    /// An existing directory is used as is; any other name is a Hub repository
    /// id, fetched through the hub's download cache.
    pub fn resolve(model_name: &str) -> Result<Self, HubError> {
        let dir = Path::new(model_name);
        if dir.is_dir() {
            log::info!("Loading model from local directory {}", dir.display());
            return Self::from_dir(dir);
        }
        Self::download(model_name)
    }

    pub fn from_dir(dir: &Path) -> Result<Self, HubError> {
        let required = |file: &str| {
            let path = dir.join(file);
            if path.is_file() {
                Ok(path)
            } else {
                Err(HubError::MissingFile {
                    model: dir.display().to_string(),
                    file: file.to_string(),
                })
            }
        };
        let generation_config = dir.join(GENERATION_CONFIG_FILE);
        Ok(Self {
            config: required(CONFIG_FILE)?,
            tokenizer: required(TOKENIZER_FILE)?,
            weights: required(WEIGHTS_FILE)?,
            generation_config: generation_config.is_file().then_some(generation_config),
        })
    }

    fn download(model_name: &str) -> Result<Self, HubError> {
        log::info!("Fetching '{}' from the Hugging Face Hub", model_name);
        let api = Api::new()?;
        let repo = api.model(model_name.to_string());
        let fetch = |file: &str| {
            repo.get(file).map_err(|source| HubError::Download {
                model: model_name.to_string(),
                file: file.to_string(),
                source,
            })
        };

        let config = fetch(CONFIG_FILE)?;
        let tokenizer = fetch(TOKENIZER_FILE)?;
        let weights = fetch(WEIGHTS_FILE)?;
        let generation_config = match fetch(GENERATION_CONFIG_FILE) {
            Ok(path) => Some(path),
            Err(e) => {
                log::debug!("No generation config for '{}': {}", model_name, e);
                None
            }
        };
        Ok(Self { config, tokenizer, weights, generation_config })
    }
}
