use half::{bf16, f16};
use memmap2::Mmap;
use ndarray::{ArrayD, ArrayView1, ArrayView2, Ix1, Ix2, IxDyn};
use safetensors::{Dtype, SafeTensorError, SafeTensors};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ModelLoaderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid safetensors file: {0}")]
    Safetensors(#[from] SafeTensorError),
    #[error("Unsupported dtype {dtype} for tensor '{name}'")]
    UnsupportedDtype { name: String, dtype: String },
    #[error("Tensor '{name}' data does not match its shape: {source}")]
    DataCorruption {
        name: String,
        source: ndarray::ShapeError,
    },
    #[error("Tensor '{0}' not found")]
    TensorNotFound(String),
    #[error("Tensor '{name}' has {actual} dimensions, expected {expected}")]
    Rank {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// Named `f32` tensors of a checkpoint.
#[derive(Debug, Default)]
pub struct Weights {
    tensors: HashMap<String, ArrayD<f32>>,
}

impl Weights {
    pub fn from_map(tensors: HashMap<String, ArrayD<f32>>) -> Self {
        Self { tensors }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelLoaderError> {
        let safetensors = SafeTensors::deserialize(bytes)?;
        let mut tensors = HashMap::new();
        for (name, view) in safetensors.tensors() {
            let data = to_f32(&name, view.dtype(), view.data())?;
            let array = ArrayD::from_shape_vec(IxDyn(view.shape()), data)
                .map_err(|source| ModelLoaderError::DataCorruption { name: name.clone(), source })?;
            tensors.insert(name, array);
        }
        Ok(Self { tensors })
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn parameter_count(&self) -> usize {
        self.tensors.values().map(|t| t.len()).sum()
    }

    fn resolve(&self, name: &str) -> Option<&ArrayD<f32>> {
        // Checkpoints of the bare model omit the "model." prefix.
        self.tensors
            .get(name)
            .or_else(|| name.strip_prefix("model.").and_then(|bare| self.tensors.get(bare)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn get(&self, name: &str) -> Result<&ArrayD<f32>, ModelLoaderError> {
        self.resolve(name)
            .ok_or_else(|| ModelLoaderError::TensorNotFound(name.to_string()))
    }

    pub fn get1(&self, name: &str) -> Result<ArrayView1<f32>, ModelLoaderError> {
        let tensor = self.get(name)?;
        tensor.view().into_dimensionality::<Ix1>().map_err(|_| ModelLoaderError::Rank {
            name: name.to_string(),
            expected: 1,
            actual: tensor.ndim(),
        })
    }

    pub fn get2(&self, name: &str) -> Result<ArrayView2<f32>, ModelLoaderError> {
        let tensor = self.get(name)?;
        tensor.view().into_dimensionality::<Ix2>().map_err(|_| ModelLoaderError::Rank {
            name: name.to_string(),
            expected: 2,
            actual: tensor.ndim(),
        })
    }
}

fn to_f32(name: &str, dtype: Dtype, bytes: &[u8]) -> Result<Vec<f32>, ModelLoaderError> {
    let data = match dtype {
        Dtype::F32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        Dtype::F16 => bytes
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        Dtype::BF16 => bytes
            .chunks_exact(2)
            .map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        other => {
            return Err(ModelLoaderError::UnsupportedDtype {
                name: name.to_string(),
                dtype: format!("{:?}", other),
            })
        }
    };
    Ok(data)
}

/// Memory-maps a `.safetensors` file and converts every tensor to `f32`.
pub fn load_safetensors(file_path: impl AsRef<Path>) -> Result<Weights, ModelLoaderError> {
    let path = file_path.as_ref();
    let file = File::open(path)?;
    // SAFETY: the mapping is read-only and dropped before this function returns;
    // every tensor is copied out into owned arrays.
    let mmap = unsafe { Mmap::map(&file)? };
    let weights = Weights::from_bytes(&mmap)?;
    log::info!(
        "Loaded {} tensors ({} parameters) from {}",
        weights.len(),
        weights.parameter_count(),
        path.display()
    );
    Ok(weights)
}
