use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, ShapeError};
use crate::model_loader::ModelLoaderError;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Weights(#[from] ModelLoaderError),
    #[error("Weight '{name}' has shape {actual:?}, expected {expected:?}")]
    WeightShape {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Token ID {id} is out of vocab size {vocab_size}")]
    TokenOutOfRange { id: u32, vocab_size: usize },
    #[error("Sequence length ({len}) exceeds maximum positional embeddings ({max})")]
    SequenceTooLong { len: usize, max: usize },
    #[error("Unsupported activation function '{0}'")]
    UnsupportedActivation(String),
    #[error("Invalid model input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Exact GELU, `x * Phi(x)`.
    Gelu,
    /// Tanh approximation used by GPT-2 style checkpoints.
    GeluNew,
    Relu,
    Silu,
}

impl Activation {
    pub fn from_name(name: &str) -> Result<Self, ModelError> {
        match name {
            "gelu" => Ok(Activation::Gelu),
            "gelu_new" | "gelu_fast" | "gelu_pytorch_tanh" => Ok(Activation::GeluNew),
            "relu" => Ok(Activation::Relu),
            "silu" | "swish" => Ok(Activation::Silu),
            other => Err(ModelError::UnsupportedActivation(other.to_string())),
        }
    }

    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Gelu => 0.5 * x * (1.0 + libm::erff(x * std::f32::consts::FRAC_1_SQRT_2)),
            Activation::GeluNew => {
                const SQRT_2_OVER_PI: f32 = 0.797_884_6;
                0.5 * x * (1.0 + libm::tanhf(SQRT_2_OVER_PI * (x + 0.044715 * x * x * x)))
            }
            Activation::Relu => x.max(0.0),
            Activation::Silu => x / (1.0 + (-x).exp()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LayerNorm {
    weight: Array1<f32>, // gamma
    bias: Array1<f32>,   // beta
    epsilon: f32,
}

impl LayerNorm {
    pub fn new(weight: Array1<f32>, bias: Array1<f32>, epsilon: f32) -> Result<Self, ModelError> {
        if weight.len() != bias.len() {
            return Err(ModelError::InvalidInput(format!(
                "LayerNorm weight ({}) and bias ({}) lengths differ",
                weight.len(),
                bias.len()
            )));
        }
        Ok(Self { weight, bias, epsilon })
    }

    pub fn from_views(weight: ArrayView1<f32>, bias: ArrayView1<f32>, epsilon: f32) -> Result<Self, ModelError> {
        Self::new(weight.to_owned(), bias.to_owned(), epsilon)
    }

    /// Normalizes over the last (hidden) axis of `[batch, seq, hidden]`.
    pub fn forward(&self, x: &Array3<f32>) -> Result<Array3<f32>, ModelError> {
        let axis = Axis(2);
        if x.len_of(axis) != self.weight.len() {
            return Err(ModelError::InvalidInput(format!(
                "LayerNorm expects hidden size {}, got {}",
                self.weight.len(),
                x.len_of(axis)
            )));
        }

        let mean = x
            .mean_axis(axis)
            .ok_or_else(|| ModelError::InvalidInput("LayerNorm over an empty axis".to_string()))?;
        let variance = x.var_axis(axis, 0.0);

        let x_minus_mean = x - &mean.insert_axis(axis);
        let std_dev = (variance.insert_axis(axis) + self.epsilon).mapv(f32::sqrt);
        let normalized = x_minus_mean / &std_dev;

        Ok(normalized * &self.weight + &self.bias)
    }
}

/// `y = x W^T + b` with `W` stored `[out_features, in_features]`, as checkpoints ship it.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Option<Array1<f32>>,
}

impl Linear {
    pub fn new(weight: Array2<f32>, bias: Option<Array1<f32>>) -> Result<Self, ModelError> {
        if let Some(b) = &bias {
            if b.len() != weight.nrows() {
                return Err(ModelError::InvalidInput(format!(
                    "Linear bias length {} does not match {} output features",
                    b.len(),
                    weight.nrows()
                )));
            }
        }
        Ok(Self { weight, bias })
    }

    pub fn from_views(weight: ArrayView2<f32>, bias: Option<ArrayView1<f32>>) -> Result<Self, ModelError> {
        Self::new(weight.to_owned(), bias.map(|b| b.to_owned()))
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, x: &Array3<f32>) -> Result<Array3<f32>, ModelError> {
        let (batch, seq_len, hidden) = x.dim();
        if hidden != self.in_features() {
            return Err(ModelError::InvalidInput(format!(
                "Linear expects {} input features, got {}",
                self.in_features(),
                hidden
            )));
        }
        let x_2d = x.as_standard_layout().into_shape((batch * seq_len, hidden))?;
        let mut y = x_2d.dot(&self.weight.t());
        if let Some(bias) = &self.bias {
            y += bias;
        }
        Ok(y.into_shape((batch, seq_len, self.out_features()))?)
    }
}

/// Softmax over each row, in place. Rows that are entirely `-inf` become zeros.
pub fn softmax_rows_inplace(scores: &mut Array2<f32>) {
    for mut row in scores.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        if max == f32::NEG_INFINITY {
            row.fill(0.0);
            continue;
        }
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
}

pub fn log_softmax(logits: ArrayView1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let log_sum_exp = logits.mapv(|v| (v - max).exp()).sum().ln() + max;
    logits.mapv(|v| v - log_sum_exp)
}
