//! The layer contract shared by every building block.
//!
//! A layer is anything with a name, a set of trainable parameters and a
//! `forward` from node features to a dense output. Construction goes through
//! a [`BuildContext`] (naming registry, initializer randomness, device);
//! forward passes through a [`ForwardCtx`] (dropout randomness, train flag).

use candle_core::{Device, Tensor, Var};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::init;
use crate::naming::LayerRegistry;
use crate::noise::Noise;
use crate::sparse::{dropout_dense, dropout_sparse, SparseTensor};

/// Options every layer accepts: `name` and `logging`, nothing else.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayerOptions {
    /// Overrides the auto-generated `<type>_<uid>` name.
    pub name: Option<String>,
    /// Emit parameter summaries through `tracing` at construction.
    pub logging: bool,
}

impl LayerOptions {
    /// Parse options from a JSON object; unknown keys are rejected.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidArgument(e.to_string()))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }
}

/// Elementwise activation applied as the last step of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// `x -> x`
    Identity,
    #[default]
    Relu,
    Sigmoid,
    Tanh,
    /// Leaky ReLU with the given negative slope.
    LeakyRelu(f64),
}

impl Activation {
    pub fn apply(&self, x: &Tensor) -> Result<Tensor> {
        let out = match self {
            Activation::Identity => x.clone(),
            Activation::Relu => x.relu()?,
            Activation::Sigmoid => candle_nn::ops::sigmoid(x)?,
            Activation::Tanh => x.tanh()?,
            Activation::LeakyRelu(slope) => candle_nn::ops::leaky_relu(x, *slope)?,
        };
        Ok(out)
    }
}

/// Node features fed to a layer: dense rows or a sparse matrix.
#[derive(Debug, Clone)]
pub enum Features {
    Dense(Tensor),
    Sparse(SparseTensor),
}

impl From<Tensor> for Features {
    fn from(t: Tensor) -> Self {
        Features::Dense(t)
    }
}

impl From<SparseTensor> for Features {
    fn from(s: SparseTensor) -> Self {
        Features::Sparse(s)
    }
}

impl Features {
    pub fn is_sparse(&self) -> bool {
        matches!(self, Features::Sparse(_))
    }

    pub fn num_rows(&self) -> Result<usize> {
        match self {
            Features::Dense(t) => Ok(t.dim(0)?),
            Features::Sparse(s) => Ok(s.shape().0),
        }
    }

    pub fn num_cols(&self) -> Result<usize> {
        match self {
            Features::Dense(t) => Ok(t.dim(1)?),
            Features::Sparse(s) => Ok(s.shape().1),
        }
    }

    pub fn to_dense(&self) -> Result<Tensor> {
        match self {
            Features::Dense(t) => Ok(t.clone()),
            Features::Sparse(s) => s.to_dense(),
        }
    }

    /// Dropout matching the input kind. Inactive outside training.
    ///
    /// `num_nonzero` is the expected stored-entry count for sparse input;
    /// `None` means "whatever the input holds".
    pub fn dropout(&self, rate: f64, num_nonzero: Option<usize>, ctx: &mut ForwardCtx) -> Result<Self> {
        if !ctx.train || rate <= 0.0 {
            return Ok(self.clone());
        }
        match self {
            Features::Dense(t) => Ok(Features::Dense(dropout_dense(t, rate, &mut ctx.noise)?)),
            Features::Sparse(s) => {
                let nnz = num_nonzero.unwrap_or_else(|| s.nnz());
                Ok(Features::Sparse(dropout_sparse(s, 1.0 - rate, nnz, &mut ctx.noise)?))
            }
        }
    }

    /// `features · weights`, sparse-dense or dense-dense.
    pub fn matmul(&self, weights: &Tensor) -> Result<Tensor> {
        match self {
            Features::Dense(t) => Ok(t.matmul(weights)?),
            Features::Sparse(s) => s.matmul(weights),
        }
    }
}

/// Everything a layer constructor needs.
#[derive(Debug)]
pub struct BuildContext {
    pub registry: LayerRegistry,
    pub noise: Noise,
    pub device: Device,
}

impl BuildContext {
    pub fn new(device: Device, noise: Noise) -> Self {
        Self {
            registry: LayerRegistry::new(),
            noise,
            device,
        }
    }

    /// CPU context with a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        Self::new(Device::Cpu, Noise::seeded(seed))
    }

    pub fn name_layer(&mut self, layer_type: &str, options: &LayerOptions) -> String {
        self.registry.assign(layer_type, options)
    }

    pub fn glorot(&mut self, input_dim: usize, output_dim: usize) -> Result<Var> {
        init::glorot(input_dim, output_dim, &mut self.noise, &self.device)
    }

    pub fn zeros(&self, len: usize) -> Result<Var> {
        init::zeros(len, &self.device)
    }
}

/// Per-pass state: dropout randomness and the train flag.
#[derive(Debug, Clone)]
pub struct ForwardCtx {
    pub noise: Noise,
    pub train: bool,
}

impl ForwardCtx {
    pub fn new(noise: Noise, train: bool) -> Self {
        Self { noise, train }
    }

    /// Dropout active.
    pub fn training(noise: Noise) -> Self {
        Self::new(noise, true)
    }

    /// Dropout disabled; latent sampling still draws from `noise`.
    pub fn inference(noise: Noise) -> Self {
        Self::new(noise, false)
    }
}

/// A named, parameterized transform of node features.
pub trait Layer {
    fn name(&self) -> &str;

    /// Default is the identity (sparse input is densified).
    fn forward(&self, inputs: &Features, _ctx: &mut ForwardCtx) -> Result<Tensor> {
        inputs.to_dense()
    }

    /// Trainable parameters keyed by parameter name (`weights`, `bias`, ...).
    fn parameters(&self) -> Vec<(String, Var)> {
        Vec::new()
    }
}

/// Log shape/mean/std of each parameter at debug level.
pub fn log_parameters(layer: &str, params: &[(String, Var)]) -> Result<()> {
    for (name, var) in params {
        let t = var.as_tensor();
        let mean = t.mean_all()?.to_scalar::<f32>()?;
        let var_ = t.broadcast_sub(&t.mean_all()?)?.sqr()?.mean_all()?.to_scalar::<f32>()?;
        tracing::debug!(
            layer,
            param = name.as_str(),
            shape = ?t.dims(),
            mean,
            std = var_.sqrt(),
            "parameter"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    struct Passthrough;

    impl Layer for Passthrough {
        fn name(&self) -> &str {
            "passthrough"
        }
    }

    #[test]
    fn test_options_reject_unknown_keys() {
        let ok = LayerOptions::from_json(r#"{"name": "enc", "logging": true}"#).unwrap();
        assert_eq!(ok.name.as_deref(), Some("enc"));
        assert!(ok.logging);

        let err = LayerOptions::from_json(r#"{"name": "enc", "act": "relu"}"#);
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_options_default_from_empty_object() {
        let opts = LayerOptions::from_json("{}").unwrap();
        assert_eq!(opts, LayerOptions::default());
    }

    #[test]
    fn test_default_forward_is_identity() {
        let device = Device::Cpu;
        let x = Tensor::from_vec(vec![1.0f32, -2.0, 3.0, 4.0], (2, 2), &device).unwrap();
        let mut ctx = ForwardCtx::training(Noise::seeded(0));
        let out = Passthrough.forward(&Features::Dense(x.clone()), &mut ctx).unwrap();
        assert_eq!(out.to_vec2::<f32>().unwrap(), x.to_vec2::<f32>().unwrap());
        assert!(Passthrough.parameters().is_empty());
    }

    #[test]
    fn test_activations() {
        let device = Device::Cpu;
        let x = Tensor::from_vec(vec![-1.0f32, 0.0, 2.0], 3, &device).unwrap();
        let relu = Activation::Relu.apply(&x).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(relu, vec![0.0, 0.0, 2.0]);
        let sig = Activation::Sigmoid.apply(&x).unwrap().to_vec1::<f32>().unwrap();
        assert!((sig[1] - 0.5).abs() < 1e-6);
        let leaky = Activation::LeakyRelu(0.2).apply(&x).unwrap().to_vec1::<f32>().unwrap();
        assert!((leaky[0] + 0.2).abs() < 1e-6);
        let id = Activation::Identity.apply(&x).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(id, vec![-1.0, 0.0, 2.0]);
    }

    #[test]
    fn test_activation_serde() {
        let act: Activation = serde_json::from_str(r#""sigmoid""#).unwrap();
        assert_eq!(act, Activation::Sigmoid);
        let act: Activation = serde_json::from_str(r#"{"leaky_relu": 0.1}"#).unwrap();
        assert_eq!(act, Activation::LeakyRelu(0.1));
    }

    #[test]
    fn test_dropout_inactive_outside_training() {
        let device = Device::Cpu;
        let x = Tensor::ones((3, 3), DType::F32, &device).unwrap();
        let mut ctx = ForwardCtx::inference(Noise::seeded(0));
        let out = Features::Dense(x).dropout(0.9, None, &mut ctx).unwrap();
        let vals = out.to_dense().unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(vals.iter().all(|&v| v == 1.0));
    }
}
