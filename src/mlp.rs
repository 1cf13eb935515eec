use ndarray::Array3;
use crate::common::{Activation, Linear, ModelError};

/// Position-wise feed-forward block: `fc2(act(fc1(x)))`.
#[derive(Debug)]
pub struct MLP {
    fc1: Linear, // [n_inner, n_embd]
    fc2: Linear, // [n_embd, n_inner]
    activation: Activation,
}

impl MLP {
    pub fn new(fc1: Linear, fc2: Linear, activation: Activation) -> Result<Self, ModelError> {
        if fc1.out_features() != fc2.in_features() || fc1.in_features() != fc2.out_features() {
            return Err(ModelError::InvalidInput(format!(
                "fc1 ({} -> {}) and fc2 ({} -> {}) do not compose",
                fc1.in_features(),
                fc1.out_features(),
                fc2.in_features(),
                fc2.out_features()
            )));
        }
        Ok(Self { fc1, fc2, activation })
    }

    pub fn forward(&self, hidden_states: &Array3<f32>) -> Result<Array3<f32>, ModelError> {
        let mut inner = self.fc1.forward(hidden_states)?;
        let activation = self.activation;
        inner.mapv_inplace(|v| activation.apply(v));
        self.fc2.forward(&inner)
    }
}
