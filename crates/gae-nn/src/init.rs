//! Parameter initializers.

use candle_core::{DType, Device, Tensor, Var};

use crate::error::{Error, Result};
use crate::noise::Noise;

/// Glorot/Xavier uniform weight matrix of shape `(input_dim, output_dim)`.
///
/// Samples from `U[-r, r]` with `r = sqrt(6 / (input_dim + output_dim))`.
/// Both dimensions must be non-zero.
pub fn glorot(input_dim: usize, output_dim: usize, noise: &mut Noise, device: &Device) -> Result<Var> {
    if input_dim == 0 || output_dim == 0 {
        return Err(Error::InvalidConfig(format!(
            "zero-width weight matrix ({input_dim} x {output_dim})"
        )));
    }
    let range = (6.0 / (input_dim + output_dim) as f32).sqrt();
    let data = noise.uniform_range(input_dim * output_dim, -range, range);
    Ok(Var::from_vec(data, (input_dim, output_dim), device)?)
}

/// Zero vector of length `len` (biases).
pub fn zeros(len: usize, device: &Device) -> Result<Var> {
    Ok(Var::zeros(len, DType::F32, device)?)
}

/// Trainable scalar stored as a `(1,)` tensor.
pub fn scalar(value: f32, device: &Device) -> Result<Var> {
    Ok(Var::from_tensor(&Tensor::new(&[value], device)?)?)
}
