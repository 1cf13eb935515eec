use ndarray::{concatenate, s, Array2, Array3, Array4, Axis};
use crate::common::{softmax_rows_inplace, Linear, ModelError};

/// Keys and values for one attention layer. Shape: `[batch, n_head, seq_len, head_dim]`.
#[derive(Debug, Clone)]
pub struct KVCacheEntry {
    pub key: Array4<f32>,
    pub value: Array4<f32>,
}

impl KVCacheEntry {
    pub fn seq_len(&self) -> usize {
        self.key.len_of(Axis(2))
    }

    /// Row `i` of the result is row `indices[i]` of `self`.
    pub fn reorder(&mut self, indices: &[usize]) {
        self.key = self.key.select(Axis(0), indices);
        self.value = self.value.select(Axis(0), indices);
    }
}

/// Self-attention cache of a whole decoder, one optional entry per layer.
pub type ModelKVCache = Vec<Option<KVCacheEntry>>;

#[derive(Debug)]
pub struct MultiHeadAttention {
    pub(crate) n_head: usize,
    pub(crate) n_embd: usize,
    pub(crate) head_dim: usize,
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
}

impl MultiHeadAttention {
    pub fn new(
        n_head: usize,
        n_embd: usize,
        q_proj: Linear,
        k_proj: Linear,
        v_proj: Linear,
        out_proj: Linear,
    ) -> Result<Self, ModelError> {
        if n_head == 0 || n_embd == 0 || n_embd % n_head != 0 {
            return Err(ModelError::InvalidInput(format!(
                "n_embd ({}) must be divisible by n_head ({})",
                n_embd, n_head
            )));
        }
        for (name, proj) in [("q_proj", &q_proj), ("k_proj", &k_proj), ("v_proj", &v_proj), ("out_proj", &out_proj)] {
            if proj.in_features() != n_embd || proj.out_features() != n_embd {
                return Err(ModelError::InvalidInput(format!(
                    "{} must map {} -> {} features, got {} -> {}",
                    name,
                    n_embd,
                    n_embd,
                    proj.in_features(),
                    proj.out_features()
                )));
            }
        }
        Ok(Self {
            n_head,
            n_embd,
            head_dim: n_embd / n_head,
            q_proj,
            k_proj,
            v_proj,
            out_proj,
        })
    }

    fn split_heads(&self, x: Array3<f32>) -> Result<Array4<f32>, ModelError> {
        let (batch, seq_len, _) = x.dim();
        let split = x
            .as_standard_layout()
            .into_owned()
            .into_shape((batch, seq_len, self.n_head, self.head_dim))?;
        Ok(split.permuted_axes([0, 2, 1, 3]))
    }

    /// Projects `hidden_states` to keys and values, e.g. encoder states for cross-attention.
    pub fn project_kv(&self, hidden_states: &Array3<f32>) -> Result<KVCacheEntry, ModelError> {
        Ok(KVCacheEntry {
            key: self.split_heads(self.k_proj.forward(hidden_states)?)?,
            value: self.split_heads(self.v_proj.forward(hidden_states)?)?,
        })
    }

    /// Self-attention over `[batch, seq_len, n_embd]`.
    ///
    /// With `causal`, query `i` only sees keys up to its own position. When a
    /// cache slot is given, the new keys/values are appended to it and the
    /// queries attend over the cached prefix as well.
    pub fn self_attention(
        &self,
        hidden_states: &Array3<f32>,
        causal: bool,
        cache: Option<&mut Option<KVCacheEntry>>,
    ) -> Result<Array3<f32>, ModelError> {
        let q = self.split_heads(self.q_proj.forward(hidden_states)?)?;
        let current = self.project_kv(hidden_states)?;

        match cache {
            Some(slot) => {
                let combined = match slot.take() {
                    Some(past) => {
                        if past.key.len_of(Axis(0)) != current.key.len_of(Axis(0)) {
                            return Err(ModelError::InvalidInput(format!(
                                "cache batch {} does not match input batch {}",
                                past.key.len_of(Axis(0)),
                                current.key.len_of(Axis(0))
                            )));
                        }
                        KVCacheEntry {
                            key: concatenate(Axis(2), &[past.key.view(), current.key.view()])?,
                            value: concatenate(Axis(2), &[past.value.view(), current.value.view()])?,
                        }
                    }
                    None => current,
                };
                let output = self.attend(&q, &combined, causal)?;
                *slot = Some(combined);
                Ok(output)
            }
            None => self.attend(&q, &current, causal),
        }
    }

    /// Attention of `hidden_states` over precomputed keys/values. A key batch
    /// of 1 is shared by every query row.
    pub fn cross_attention(&self, hidden_states: &Array3<f32>, kv: &KVCacheEntry) -> Result<Array3<f32>, ModelError> {
        let q = self.split_heads(self.q_proj.forward(hidden_states)?)?;
        self.attend(&q, kv, false)
    }

    fn attend(&self, q: &Array4<f32>, kv: &KVCacheEntry, causal: bool) -> Result<Array3<f32>, ModelError> {
        let (batch, n_head, seq_len_q, head_dim) = q.dim();
        let kv_batch = kv.key.len_of(Axis(0));
        let seq_len_kv = kv.seq_len();
        if kv_batch != batch && kv_batch != 1 {
            return Err(ModelError::InvalidInput(format!(
                "key batch {} cannot serve query batch {}",
                kv_batch, batch
            )));
        }
        if causal && seq_len_kv < seq_len_q {
            return Err(ModelError::InvalidInput(format!(
                "causal attention over {} keys for {} queries",
                seq_len_kv, seq_len_q
            )));
        }

        let scale = (head_dim as f32).powf(-0.5);
        let past_len = seq_len_kv.saturating_sub(seq_len_q);
        let mut context = Array3::<f32>::zeros((batch, seq_len_q, self.n_embd));

        for b in 0..batch {
            let kb = if kv_batch == 1 { 0 } else { b };
            for h in 0..n_head {
                let q_slice = q.slice(s![b, h, .., ..]);
                let k_slice = kv.key.slice(s![kb, h, .., ..]);
                let v_slice = kv.value.slice(s![kb, h, .., ..]);

                let mut scores: Array2<f32> = q_slice.dot(&k_slice.t()) * scale;
                if causal {
                    for i in 0..seq_len_q {
                        for j in (past_len + i + 1)..seq_len_kv {
                            scores[[i, j]] = f32::NEG_INFINITY;
                        }
                    }
                }
                softmax_rows_inplace(&mut scores);

                let ctx = scores.dot(&v_slice);
                context
                    .slice_mut(s![b, .., h * head_dim..(h + 1) * head_dim])
                    .assign(&ctx);
            }
        }

        self.out_proj.forward(&context)
    }
}
