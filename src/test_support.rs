//! A tiny randomly initialised BART and a word-level tokenizer, small enough
//! to run the full pipeline in unit tests.

use crate::config::BartConfig;
use crate::model_loader::Weights;
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use safetensors::tensor::TensorView;
use safetensors::Dtype;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const TINY_CONFIG_JSON: &str = r#"{
    "model_type": "bart",
    "vocab_size": 20,
    "max_position_embeddings": 1024,
    "d_model": 8,
    "encoder_layers": 1,
    "decoder_layers": 2,
    "encoder_attention_heads": 2,
    "decoder_attention_heads": 2,
    "encoder_ffn_dim": 16,
    "decoder_ffn_dim": 16,
    "activation_function": "gelu",
    "scale_embedding": false,
    "normalize_before": false,
    "add_final_layer_norm": false,
    "bos_token_id": 0,
    "pad_token_id": 1,
    "eos_token_id": 2,
    "decoder_start_token_id": 2,
    "forced_bos_token_id": 0,
    "forced_eos_token_id": 2,
    "no_repeat_ngram_size": 3
}"#;

pub const WORDS: [&str; 16] = [
    "the", "cat", "sat", "on", "mat", "a", "dog", "ran", "in", "park", "and", "was", "happy", ".", "sun", "day",
];

pub fn tokenizer_json() -> String {
    let mut vocab = serde_json::Map::new();
    for (id, token) in ["<s>", "<pad>", "</s>", "<unk>"].iter().chain(WORDS.iter()).enumerate() {
        vocab.insert(token.to_string(), serde_json::json!(id));
    }
    let added_tokens: Vec<serde_json::Value> = ["<s>", "<pad>", "</s>", "<unk>"]
        .iter()
        .enumerate()
        .map(|(id, content)| {
            serde_json::json!({
                "id": id,
                "content": content,
                "single_word": false,
                "lstrip": false,
                "rstrip": false,
                "normalized": false,
                "special": true
            })
        })
        .collect();
    serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added_tokens,
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": {
            "type": "RobertaProcessing",
            "sep": ["</s>", 2],
            "cls": ["<s>", 0],
            "trim_offsets": true,
            "add_prefix_space": true
        },
        "decoder": null,
        "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "<unk>" }
    })
    .to_string()
}

pub fn tiny_config() -> BartConfig {
    serde_json::from_str(TINY_CONFIG_JSON).unwrap()
}

/// Every tensor a BART checkpoint for `config` holds, with seeded random values.
pub fn random_tensors(config: &BartConfig, seed: u64) -> Vec<(String, Vec<usize>, Vec<f32>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut tensors = Vec::new();
    let d = config.d_model;

    let mut random = |name: String, shape: Vec<usize>, tensors: &mut Vec<(String, Vec<usize>, Vec<f32>)>| {
        let n: usize = shape.iter().product();
        let data = (0..n).map(|_| rng.gen_range(-0.5f32..0.5)).collect();
        tensors.push((name, shape, data));
    };
    let constant = |name: String, shape: Vec<usize>, value: f32, tensors: &mut Vec<(String, Vec<usize>, Vec<f32>)>| {
        let n: usize = shape.iter().product();
        tensors.push((name, shape, vec![value; n]));
    };

    random("model.shared.weight".to_string(), vec![config.vocab_size, d], &mut tensors);
    for (stack, layers, ffn) in [
        ("encoder", config.encoder_layers, config.encoder_ffn_dim),
        ("decoder", config.decoder_layers, config.decoder_ffn_dim),
    ] {
        let prefix = format!("model.{}", stack);
        random(format!("{}.embed_positions.weight", prefix), vec![config.max_position_embeddings + 2, d], &mut tensors);
        constant(format!("{}.layernorm_embedding.weight", prefix), vec![d], 1.0, &mut tensors);
        constant(format!("{}.layernorm_embedding.bias", prefix), vec![d], 0.0, &mut tensors);
        for i in 0..layers {
            let layer = format!("{}.layers.{}", prefix, i);
            let mut blocks = vec!["self_attn"];
            if stack == "decoder" {
                blocks.push("encoder_attn");
            }
            for block in blocks {
                for proj in ["q_proj", "k_proj", "v_proj", "out_proj"] {
                    random(format!("{}.{}.{}.weight", layer, block, proj), vec![d, d], &mut tensors);
                    random(format!("{}.{}.{}.bias", layer, block, proj), vec![d], &mut tensors);
                }
                constant(format!("{}.{}_layer_norm.weight", layer, block), vec![d], 1.0, &mut tensors);
                constant(format!("{}.{}_layer_norm.bias", layer, block), vec![d], 0.0, &mut tensors);
            }
            random(format!("{}.fc1.weight", layer), vec![ffn, d], &mut tensors);
            random(format!("{}.fc1.bias", layer), vec![ffn], &mut tensors);
            random(format!("{}.fc2.weight", layer), vec![d, ffn], &mut tensors);
            random(format!("{}.fc2.bias", layer), vec![d], &mut tensors);
            constant(format!("{}.final_layer_norm.weight", layer), vec![d], 1.0, &mut tensors);
            constant(format!("{}.final_layer_norm.bias", layer), vec![d], 0.0, &mut tensors);
        }
    }

    // Keep <s>, <pad> and <unk> out of the generated text.
    let mut final_logits_bias = vec![0.0f32; config.vocab_size];
    for id in [0usize, 1, 3] {
        final_logits_bias[id] = -1e4;
    }
    tensors.push(("final_logits_bias".to_string(), vec![1, config.vocab_size], final_logits_bias));
    tensors
}

pub fn random_weights(config: &BartConfig, seed: u64) -> Weights {
    let map: HashMap<String, ArrayD<f32>> = random_tensors(config, seed)
        .into_iter()
        .map(|(name, shape, data)| (name, ArrayD::from_shape_vec(IxDyn(&shape), data).unwrap()))
        .collect();
    Weights::from_map(map)
}

/// Writes `config.json`, `tokenizer.json` and `model.safetensors` into `dir`.
pub fn write_model_dir(dir: &Path) {
    fs::write(dir.join("config.json"), TINY_CONFIG_JSON).unwrap();
    fs::write(dir.join("tokenizer.json"), tokenizer_json()).unwrap();

    let tensors = random_tensors(&tiny_config(), 7);
    let bytes: Vec<(String, Vec<usize>, Vec<u8>)> = tensors
        .into_iter()
        .map(|(name, shape, data)| (name, shape, data.iter().flat_map(|v| v.to_le_bytes()).collect()))
        .collect();
    let views: Vec<(String, TensorView)> = bytes
        .iter()
        .map(|(name, shape, data)| (name.clone(), TensorView::new(Dtype::F32, shape.clone(), data).unwrap()))
        .collect();
    let serialized = safetensors::serialize(views, &None).unwrap();
    fs::write(dir.join("model.safetensors"), serialized).unwrap();
}
