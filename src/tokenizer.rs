use std::path::Path;
use tokenizers::{Tokenizer, TruncationParams};

#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
    #[error("Failed to load tokenizer from {path}: {message}")]
    Load { path: String, message: String },
    #[error("Failed to configure truncation: {0}")]
    Truncation(String),
    #[error("Encoding failed: {0}")]
    Encode(String),
    #[error("Decoding failed for {len} token IDs: {message}")]
    Decode { len: usize, message: String },
}

/// A `tokenizer.json` tokenizer that truncates its input to a fixed token budget.
#[derive(Debug)]
pub struct TokenizerWrapper {
    tokenizer: Tokenizer,
    max_input_tokens: usize,
}

impl TokenizerWrapper {
    pub fn from_file(tokenizer_path: &Path, max_input_tokens: usize) -> Result<Self, TokenizerError> {
        let mut tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| TokenizerError::Load {
            path: tokenizer_path.display().to_string(),
            message: e.to_string(),
        })?;
        // The budget counts the special tokens the post-processor adds.
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_input_tokens,
                ..Default::default()
            }))
            .map_err(|e| TokenizerError::Truncation(e.to_string()))?;
        Ok(Self { tokenizer, max_input_tokens })
    }

    pub fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    /// Token IDs of `text` with special tokens added, cut to the budget.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| TokenizerError::Encode(e.to_string()))?;
        let dropped: usize = encoding.get_overflowing().iter().map(|o| o.len()).sum();
        if dropped > 0 {
            log::warn!(
                "Input truncated to {} tokens ({} tokens dropped)",
                self.max_input_tokens,
                dropped
            );
        }
        Ok(encoding.get_ids().to_vec())
    }

    /// Number of tokens `text` encodes to, truncation applied.
    pub fn token_count(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(self.encode(text)?.len())
    }

    /// Text of `ids` with special tokens skipped.
    pub fn decode(&self, ids: &[u32]) -> Result<String, TokenizerError> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| TokenizerError::Decode {
                len: ids.len(),
                message: e.to_string(),
            })
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.tokenizer.token_to_id(token)
    }
}
