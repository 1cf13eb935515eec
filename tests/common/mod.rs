//! Writes a tiny randomly initialised BART model directory for driving the binary offline.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use safetensors::tensor::TensorView;
use safetensors::Dtype;
use serde_json::json;
use std::fs;
use std::path::Path;

const D_MODEL: usize = 8;
const FFN_DIM: usize = 16;
const MAX_POSITIONS: usize = 1024;
const SPECIALS: [&str; 4] = ["<s>", "<pad>", "</s>", "<unk>"];
const WORDS: [&str; 12] = ["the", "cat", "sat", "on", "mat", "dog", "ran", "in", "park", "sun", "shone", "."];

type Tensor = (String, Vec<usize>, Vec<f32>);

fn vocab_size() -> usize {
    SPECIALS.len() + WORDS.len()
}

fn config_json() -> String {
    json!({
        "model_type": "bart",
        "vocab_size": vocab_size(),
        "max_position_embeddings": MAX_POSITIONS,
        "d_model": D_MODEL,
        "encoder_layers": 1,
        "decoder_layers": 1,
        "encoder_attention_heads": 2,
        "decoder_attention_heads": 2,
        "encoder_ffn_dim": FFN_DIM,
        "decoder_ffn_dim": FFN_DIM,
        "activation_function": "gelu",
        "bos_token_id": 0,
        "pad_token_id": 1,
        "eos_token_id": 2,
        "decoder_start_token_id": 2,
        "forced_bos_token_id": 0,
        "forced_eos_token_id": 2,
        "no_repeat_ngram_size": 3
    })
    .to_string()
}

fn tokenizer_json() -> String {
    let vocab: serde_json::Map<String, serde_json::Value> = SPECIALS
        .iter()
        .chain(WORDS.iter())
        .enumerate()
        .map(|(id, token)| (token.to_string(), json!(id)))
        .collect();
    let added_tokens: Vec<serde_json::Value> = SPECIALS
        .iter()
        .enumerate()
        .map(|(id, content)| {
            json!({
                "id": id, "content": content, "single_word": false, "lstrip": false,
                "rstrip": false, "normalized": false, "special": true
            })
        })
        .collect();
    json!({
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

fn tensors(seed: u64) -> Vec<Tensor> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out: Vec<Tensor> = Vec::new();
    let mut push_random = |out: &mut Vec<Tensor>, name: String, shape: Vec<usize>| {
        let n: usize = shape.iter().product();
        let data = (0..n).map(|_| rng.gen_range(-0.5f32..0.5)).collect();
        out.push((name, shape, data));
    };
    let push_norm = |out: &mut Vec<Tensor>, prefix: String| {
        out.push((format!("{}.weight", prefix), vec![D_MODEL], vec![1.0; D_MODEL]));
        out.push((format!("{}.bias", prefix), vec![D_MODEL], vec![0.0; D_MODEL]));
    };

    push_random(&mut out, "model.shared.weight".to_string(), vec![vocab_size(), D_MODEL]);
    for stack in ["encoder", "decoder"] {
        push_random(&mut out, format!("model.{}.embed_positions.weight", stack), vec![MAX_POSITIONS + 2, D_MODEL]);
        push_norm(&mut out, format!("model.{}.layernorm_embedding", stack));
        let layer = format!("model.{}.layers.0", stack);
        let blocks: &[&str] = if stack == "decoder" { &["self_attn", "encoder_attn"] } else { &["self_attn"] };
        for block in blocks {
            for proj in ["q_proj", "k_proj", "v_proj", "out_proj"] {
                push_random(&mut out, format!("{}.{}.{}.weight", layer, block, proj), vec![D_MODEL, D_MODEL]);
                push_random(&mut out, format!("{}.{}.{}.bias", layer, block, proj), vec![D_MODEL]);
            }
            push_norm(&mut out, format!("{}.{}_layer_norm", layer, block));
        }
        push_random(&mut out, format!("{}.fc1.weight", layer), vec![FFN_DIM, D_MODEL]);
        push_random(&mut out, format!("{}.fc1.bias", layer), vec![FFN_DIM]);
        push_random(&mut out, format!("{}.fc2.weight", layer), vec![D_MODEL, FFN_DIM]);
        push_random(&mut out, format!("{}.fc2.bias", layer), vec![D_MODEL]);
        push_norm(&mut out, format!("{}.final_layer_norm", layer));
    }

    // Only words are worth generating.
    let mut bias = vec![0.0f32; vocab_size()];
    for id in [0, 1, 3] {
        bias[id] = -1e4;
    }
    out.push(("final_logits_bias".to_string(), vec![1, vocab_size()], bias));
    out
}

pub fn write_tiny_model(dir: &Path) {
    fs::write(dir.join("config.json"), config_json()).unwrap();
    fs::write(dir.join("tokenizer.json"), tokenizer_json()).unwrap();

    let encoded: Vec<(String, Vec<usize>, Vec<u8>)> = tensors(11)
        .into_iter()
        .map(|(name, shape, data)| (name, shape, data.iter().flat_map(|v| v.to_le_bytes()).collect()))
        .collect();
    let views: Vec<(String, TensorView)> = encoded
        .iter()
        .map(|(name, shape, bytes)| (name.clone(), TensorView::new(Dtype::F32, shape.clone(), bytes).unwrap()))
        .collect();
    fs::write(dir.join("model.safetensors"), safetensors::serialize(views, &None).unwrap()).unwrap();
}
