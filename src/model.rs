use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};
use crate::attention::{KVCacheEntry, ModelKVCache, MultiHeadAttention};
use crate::beam_search::{GenerationError, StepDecoder};
use crate::common::{Activation, LayerNorm, Linear, ModelError};
use crate::config::BartConfig;
use crate::mlp::MLP;
use crate::model_loader::Weights;

/// BART learned positions start at row 2 of the table.
const POSITION_OFFSET: usize = 2;

fn linear(weights: &Weights, prefix: &str) -> Result<Linear, ModelError> {
    let weight = weights.get2(&format!("{}.weight", prefix))?;
    let bias_name = format!("{}.bias", prefix);
    let bias = if weights.contains(&bias_name) {
        Some(weights.get1(&bias_name)?)
    } else {
        None
    };
    Linear::from_views(weight, bias)
}

fn layer_norm(weights: &Weights, prefix: &str, eps: f32) -> Result<LayerNorm, ModelError> {
    LayerNorm::from_views(
        weights.get1(&format!("{}.weight", prefix))?,
        weights.get1(&format!("{}.bias", prefix))?,
        eps,
    )
}

fn attention(weights: &Weights, prefix: &str, n_head: usize, n_embd: usize) -> Result<MultiHeadAttention, ModelError> {
    MultiHeadAttention::new(
        n_head,
        n_embd,
        linear(weights, &format!("{}.q_proj", prefix))?,
        linear(weights, &format!("{}.k_proj", prefix))?,
        linear(weights, &format!("{}.v_proj", prefix))?,
        linear(weights, &format!("{}.out_proj", prefix))?,
    )
}

fn expect_shape(name: &str, actual: &[usize], expected: &[usize]) -> Result<(), ModelError> {
    if actual != expected {
        return Err(ModelError::WeightShape {
            name: name.to_string(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

/// Runs `sublayer` with a residual connection, normalizing before (pre-norm)
/// or after (post-norm) the sum.
fn residual<F>(
    hidden_states: &Array3<f32>,
    norm: &LayerNorm,
    normalize_before: bool,
    sublayer: F,
) -> Result<Array3<f32>, ModelError>
where
    F: FnOnce(&Array3<f32>) -> Result<Array3<f32>, ModelError>,
{
    if normalize_before {
        let out = sublayer(&norm.forward(hidden_states)?)?;
        Ok(hidden_states + &out)
    } else {
        let out = sublayer(hidden_states)?;
        norm.forward(&(hidden_states + &out))
    }
}

#[derive(Debug)]
pub struct EncoderLayer {
    self_attn: MultiHeadAttention,
    self_attn_layer_norm: LayerNorm,
    mlp: MLP,
    final_layer_norm: LayerNorm,
    normalize_before: bool,
}

impl EncoderLayer {
    fn from_weights(weights: &Weights, prefix: &str, config: &BartConfig, activation: Activation) -> Result<Self, ModelError> {
        let eps = config.layer_norm_eps;
        Ok(Self {
            self_attn: attention(weights, &format!("{}.self_attn", prefix), config.encoder_attention_heads, config.d_model)?,
            self_attn_layer_norm: layer_norm(weights, &format!("{}.self_attn_layer_norm", prefix), eps)?,
            mlp: MLP::new(
                linear(weights, &format!("{}.fc1", prefix))?,
                linear(weights, &format!("{}.fc2", prefix))?,
                activation,
            )?,
            final_layer_norm: layer_norm(weights, &format!("{}.final_layer_norm", prefix), eps)?,
            normalize_before: config.normalize_before,
        })
    }

    pub fn forward(&self, hidden_states: &Array3<f32>) -> Result<Array3<f32>, ModelError> {
        let h = residual(hidden_states, &self.self_attn_layer_norm, self.normalize_before, |x| {
            self.self_attn.self_attention(x, false, None)
        })?;
        residual(&h, &self.final_layer_norm, self.normalize_before, |x| self.mlp.forward(x))
    }
}

#[derive(Debug)]
pub struct DecoderLayer {
    self_attn: MultiHeadAttention,
    self_attn_layer_norm: LayerNorm,
    encoder_attn: MultiHeadAttention,
    encoder_attn_layer_norm: LayerNorm,
    mlp: MLP,
    final_layer_norm: LayerNorm,
    normalize_before: bool,
}

impl DecoderLayer {
    fn from_weights(weights: &Weights, prefix: &str, config: &BartConfig, activation: Activation) -> Result<Self, ModelError> {
        let eps = config.layer_norm_eps;
        let heads = config.decoder_attention_heads;
        Ok(Self {
            self_attn: attention(weights, &format!("{}.self_attn", prefix), heads, config.d_model)?,
            self_attn_layer_norm: layer_norm(weights, &format!("{}.self_attn_layer_norm", prefix), eps)?,
            encoder_attn: attention(weights, &format!("{}.encoder_attn", prefix), heads, config.d_model)?,
            encoder_attn_layer_norm: layer_norm(weights, &format!("{}.encoder_attn_layer_norm", prefix), eps)?,
            mlp: MLP::new(
                linear(weights, &format!("{}.fc1", prefix))?,
                linear(weights, &format!("{}.fc2", prefix))?,
                activation,
            )?,
            final_layer_norm: layer_norm(weights, &format!("{}.final_layer_norm", prefix), eps)?,
            normalize_before: config.normalize_before,
        })
    }

    /// One decoder layer over the new positions, extending `cache` with their keys/values.
    pub fn forward(
        &self,
        hidden_states: &Array3<f32>,
        encoder_kv: &KVCacheEntry,
        cache: &mut Option<KVCacheEntry>,
    ) -> Result<Array3<f32>, ModelError> {
        let h = residual(hidden_states, &self.self_attn_layer_norm, self.normalize_before, |x| {
            self.self_attn.self_attention(x, true, Some(cache))
        })?;
        let h = residual(&h, &self.encoder_attn_layer_norm, self.normalize_before, |x| {
            self.encoder_attn.cross_attention(x, encoder_kv)
        })?;
        residual(&h, &self.final_layer_norm, self.normalize_before, |x| self.mlp.forward(x))
    }
}

/// Token plus learned position embeddings followed by `layernorm_embedding`.
#[derive(Debug)]
struct EmbeddingStack {
    positions: Array2<f32>,
    layernorm_embedding: LayerNorm,
    final_layer_norm: Option<LayerNorm>,
}

impl EmbeddingStack {
    fn from_weights(weights: &Weights, prefix: &str, config: &BartConfig) -> Result<Self, ModelError> {
        let name = format!("{}.embed_positions.weight", prefix);
        let positions = weights.get2(&name)?.to_owned();
        if positions.ncols() != config.d_model || positions.nrows() <= POSITION_OFFSET {
            return Err(ModelError::WeightShape {
                name,
                expected: vec![config.max_position_embeddings + POSITION_OFFSET, config.d_model],
                actual: positions.shape().to_vec(),
            });
        }
        let final_layer_norm = if config.add_final_layer_norm {
            Some(layer_norm(weights, &format!("{}.layer_norm", prefix), config.layer_norm_eps)?)
        } else {
            None
        };
        Ok(Self {
            positions,
            layernorm_embedding: layer_norm(weights, &format!("{}.layernorm_embedding", prefix), config.layer_norm_eps)?,
            final_layer_norm,
        })
    }

    fn max_positions(&self) -> usize {
        self.positions.nrows() - POSITION_OFFSET
    }

    /// `tokens` is `[batch, seq]`; positions start at `past_len`.
    fn embed(
        &self,
        shared: ArrayView2<f32>,
        scale: f32,
        tokens: &Array2<u32>,
        past_len: usize,
    ) -> Result<Array3<f32>, ModelError> {
        let (batch, seq_len) = tokens.dim();
        let vocab_size = shared.nrows();
        if past_len + seq_len > self.max_positions() {
            return Err(ModelError::SequenceTooLong {
                len: past_len + seq_len,
                max: self.max_positions(),
            });
        }

        let mut hidden = Array3::<f32>::zeros((batch, seq_len, shared.ncols()));
        for ((b, t), &id) in tokens.indexed_iter() {
            if id as usize >= vocab_size {
                return Err(ModelError::TokenOutOfRange { id, vocab_size });
            }
            let position = self.positions.row(past_len + t + POSITION_OFFSET);
            let mut row = hidden.slice_mut(s![b, t, ..]);
            row.assign(&shared.row(id as usize));
            row *= scale;
            row += &position;
        }
        self.layernorm_embedding.forward(&hidden)
    }
}

/// `BartForConditionalGeneration` on the CPU.
#[derive(Debug)]
pub struct BartModel {
    config: BartConfig,
    shared: Array2<f32>,
    embed_scale: f32,
    encoder_embeddings: EmbeddingStack,
    encoder_layers: Vec<EncoderLayer>,
    decoder_embeddings: EmbeddingStack,
    decoder_layers: Vec<DecoderLayer>,
    final_logits_bias: Array1<f32>,
}

impl BartModel {
    pub fn from_weights(config: &BartConfig, weights: &Weights) -> Result<Self, ModelError> {
        let activation = Activation::from_name(&config.activation_function)?;

        let shared_name = if weights.contains("model.shared.weight") {
            "model.shared.weight"
        } else {
            "model.encoder.embed_tokens.weight"
        };
        let shared = weights.get2(shared_name)?.to_owned();
        expect_shape(shared_name, shared.shape(), &[config.vocab_size, config.d_model])?;

        let final_logits_bias = if weights.contains("final_logits_bias") {
            let bias = weights.get("final_logits_bias")?;
            expect_shape("final_logits_bias", &[bias.len()], &[config.vocab_size])?;
            bias.iter().copied().collect::<Array1<f32>>()
        } else {
            log::debug!("Checkpoint has no final_logits_bias, using zeros");
            Array1::zeros(config.vocab_size)
        };

        let encoder_layers = (0..config.encoder_layers)
            .map(|i| EncoderLayer::from_weights(weights, &format!("model.encoder.layers.{}", i), config, activation))
            .collect::<Result<Vec<_>, _>>()?;
        let decoder_layers = (0..config.decoder_layers)
            .map(|i| DecoderLayer::from_weights(weights, &format!("model.decoder.layers.{}", i), config, activation))
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "Built BART with {} encoder and {} decoder layers (d_model {}, vocab {})",
            encoder_layers.len(),
            decoder_layers.len(),
            config.d_model,
            config.vocab_size
        );

        Ok(Self {
            config: config.clone(),
            embed_scale: if config.scale_embedding { (config.d_model as f32).sqrt() } else { 1.0 },
            encoder_embeddings: EmbeddingStack::from_weights(weights, "model.encoder", config)?,
            decoder_embeddings: EmbeddingStack::from_weights(weights, "model.decoder", config)?,
            shared,
            encoder_layers,
            decoder_layers,
            final_logits_bias,
        })
    }

    pub fn config(&self) -> &BartConfig {
        &self.config
    }

    /// Longest input the encoder accepts.
    pub fn max_source_positions(&self) -> usize {
        self.encoder_embeddings.max_positions()
    }

    /// Encoder hidden states `[1, seq_len, d_model]` for one sequence of token IDs.
    pub fn encode(&self, input_ids: &[u32]) -> Result<Array3<f32>, ModelError> {
        if input_ids.is_empty() {
            return Err(ModelError::InvalidInput("Input token list cannot be empty.".to_string()));
        }
        let tokens = Array2::from_shape_vec((1, input_ids.len()), input_ids.to_vec())?;
        let mut hidden = self
            .encoder_embeddings
            .embed(self.shared.view(), self.embed_scale, &tokens, 0)?;
        for layer in &self.encoder_layers {
            hidden = layer.forward(&hidden)?;
        }
        if let Some(norm) = &self.encoder_embeddings.final_layer_norm {
            hidden = norm.forward(&hidden)?;
        }
        Ok(hidden)
    }

    /// Prepares incremental decoding of `num_beams` sequences against one encoder output.
    pub fn start_decoding(&self, encoder_states: &Array3<f32>, num_beams: usize) -> Result<DecodingSession<'_>, ModelError> {
        if encoder_states.len_of(Axis(0)) != 1 {
            return Err(ModelError::InvalidInput(format!(
                "expected encoder states for one sequence, got batch {}",
                encoder_states.len_of(Axis(0))
            )));
        }
        if num_beams == 0 {
            return Err(ModelError::InvalidInput("num_beams must be positive".to_string()));
        }
        let cross_kv = self
            .decoder_layers
            .iter()
            .map(|layer| layer.encoder_attn.project_kv(encoder_states))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DecodingSession {
            model: self,
            cross_kv,
            self_cache: vec![None; self.decoder_layers.len()],
            past_len: 0,
            num_beams,
        })
    }

    /// LM head over `[batch, d_model]` hidden states.
    fn logits(&self, hidden: ArrayView2<f32>) -> Array2<f32> {
        hidden.dot(&self.shared.t()) + &self.final_logits_bias
    }
}

/// Decoder state of a beam search: self-attention caches per layer plus the
/// encoder keys/values, computed once and shared by every beam.
#[derive(Debug)]
pub struct DecodingSession<'a> {
    model: &'a BartModel,
    cross_kv: Vec<KVCacheEntry>,
    self_cache: ModelKVCache,
    past_len: usize,
    num_beams: usize,
}

impl DecodingSession<'_> {
    pub fn past_len(&self) -> usize {
        self.past_len
    }

    /// Feeds `tokens` (`[num_beams, new_len]`) and returns the logits of the last position.
    pub fn forward_tokens(&mut self, tokens: &Array2<u32>) -> Result<Array2<f32>, ModelError> {
        let (batch, seq_len) = tokens.dim();
        if batch != self.num_beams || seq_len == 0 {
            return Err(ModelError::InvalidInput(format!(
                "expected [{}, >0] decoder tokens, got [{}, {}]",
                self.num_beams, batch, seq_len
            )));
        }
        let model = self.model;
        let mut hidden = model
            .decoder_embeddings
            .embed(model.shared.view(), model.embed_scale, tokens, self.past_len)?;
        for ((layer, encoder_kv), cache) in model
            .decoder_layers
            .iter()
            .zip(&self.cross_kv)
            .zip(self.self_cache.iter_mut())
        {
            hidden = layer.forward(&hidden, encoder_kv, cache)?;
        }
        if let Some(norm) = &model.decoder_embeddings.final_layer_norm {
            hidden = norm.forward(&hidden)?;
        }
        self.past_len += seq_len;

        let last = hidden.index_axis(Axis(1), seq_len - 1);
        Ok(model.logits(last))
    }

    pub fn reorder_beams(&mut self, beam_indices: &[usize]) -> Result<(), ModelError> {
        if beam_indices.len() != self.num_beams || beam_indices.iter().any(|&i| i >= self.num_beams) {
            return Err(ModelError::InvalidInput(format!(
                "invalid beam reorder {:?} for {} beams",
                beam_indices, self.num_beams
            )));
        }
        for entry in self.self_cache.iter_mut().flatten() {
            entry.reorder(beam_indices);
        }
        Ok(())
    }
}

impl StepDecoder for DecodingSession<'_> {
    fn next_logits(&mut self, last_tokens: &[u32]) -> Result<Array2<f32>, GenerationError> {
        let tokens = Array2::from_shape_vec((last_tokens.len(), 1), last_tokens.to_vec()).map_err(ModelError::from)?;
        Ok(self.forward_tokens(&tokens)?)
    }

    fn reorder(&mut self, beam_indices: &[usize]) -> Result<(), GenerationError> {
        Ok(self.reorder_beams(beam_indices)?)
    }
}
