//! Fully-connected layer with sparse or dense input.

use candle_core::{Tensor, Var};

use crate::error::{Error, Result};
use crate::layer::{log_parameters, Activation, BuildContext, Features, ForwardCtx, Layer, LayerOptions};

/// Configuration for [`Dense`].
#[derive(Debug, Clone)]
pub struct DenseConfig {
    pub input_dim: usize,
    pub output_dim: usize,
    /// Drop rate applied to the input during training (default: 0).
    pub dropout: f64,
    /// Default: ReLU.
    pub act: Activation,
    /// Add a zero-initialized bias (default: false).
    pub bias: bool,
    /// Constrain weights to be non-negative by squaring them (default: false).
    pub pos: bool,
    /// `Some(nnz)` when inputs are sparse with `nnz` stored entries.
    pub sparse_inputs: Option<usize>,
    pub options: LayerOptions,
}

impl DenseConfig {
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            dropout: 0.0,
            act: Activation::Relu,
            bias: false,
            pos: false,
            sparse_inputs: None,
            options: LayerOptions::default(),
        }
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_activation(mut self, act: Activation) -> Self {
        self.act = act;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_pos(mut self, pos: bool) -> Self {
        self.pos = pos;
        self
    }

    pub fn with_sparse_inputs(mut self, features_nonzero: usize) -> Self {
        self.sparse_inputs = Some(features_nonzero);
        self
    }

    pub fn with_options(mut self, options: LayerOptions) -> Self {
        self.options = options;
        self
    }
}

/// `act(dropout(x) · W + b)`.
///
/// With `pos`, the stored variable is squared on every forward, so the
/// effective weights stay non-negative after optimizer updates as well.
#[derive(Debug)]
pub struct Dense {
    name: String,
    weights: Var,
    bias: Option<Var>,
    config: DenseConfig,
}

impl Dense {
    pub fn new(config: DenseConfig, ctx: &mut BuildContext) -> Result<Self> {
        let name = ctx.name_layer("Dense", &config.options);
        let weights = ctx.glorot(config.input_dim, config.output_dim)?;
        let bias = if config.bias {
            Some(ctx.zeros(config.output_dim)?)
        } else {
            None
        };
        let layer = Self {
            name,
            weights,
            bias,
            config,
        };
        if layer.config.options.logging {
            log_parameters(&layer.name, &layer.parameters())?;
        }
        Ok(layer)
    }

    /// Effective weight matrix (squared when `pos`).
    pub fn weights(&self) -> Result<Tensor> {
        if self.config.pos {
            Ok(self.weights.as_tensor().sqr()?)
        } else {
            Ok(self.weights.as_tensor().clone())
        }
    }

    pub fn output_dim(&self) -> usize {
        self.config.output_dim
    }
}

impl Layer for Dense {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, inputs: &Features, ctx: &mut ForwardCtx) -> Result<Tensor> {
        if inputs.is_sparse() != self.config.sparse_inputs.is_some() {
            return Err(Error::InputKind {
                layer: self.name.clone(),
                expected: if self.config.sparse_inputs.is_some() { "sparse" } else { "dense" },
            });
        }
        let x = inputs.dropout(self.config.dropout, self.config.sparse_inputs, ctx)?;
        let mut out = x.matmul(&self.weights()?)?;
        if let Some(bias) = &self.bias {
            out = out.broadcast_add(bias.as_tensor())?;
        }
        self.config.act.apply(&out)
    }

    fn parameters(&self) -> Vec<(String, Var)> {
        let mut params = vec![("weights".to_string(), self.weights.clone())];
        if let Some(bias) = &self.bias {
            params.push(("bias".to_string(), bias.clone()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::Noise;
    use crate::sparse::SparseTensor;
    use candle_core::{DType, Device};

    #[test]
    fn test_dense_forward_shape() {
        let mut ctx = BuildContext::seeded(0);
        let dense = Dense::new(DenseConfig::new(8, 4).with_bias(true), &mut ctx).unwrap();
        assert_eq!(dense.name(), "dense_1");
        assert_eq!(dense.parameters().len(), 2);

        let x = Tensor::randn(0f32, 1f32, (5, 8), &Device::Cpu).unwrap();
        let mut fwd = ForwardCtx::training(Noise::seeded(1));
        let out = dense.forward(&Features::Dense(x), &mut fwd).unwrap();
        assert_eq!(out.dims(), &[5, 4]);
        // relu
        for v in out.flatten_all().unwrap().to_vec1::<f32>().unwrap() {
            assert!(v >= 0.0);
        }
    }

    #[test]
    fn test_dense_sparse_matches_dense_input() {
        let device = Device::Cpu;
        let mut ctx = BuildContext::seeded(3);
        let x = Tensor::from_vec(vec![1.0f32, 0.0, 0.0, 2.0, 0.0, 3.0], (2, 3), &device).unwrap();
        let sparse = SparseTensor::from_dense(&x).unwrap();

        let config = DenseConfig::new(3, 2).with_activation(Activation::Identity);
        let dense_layer = Dense::new(config.clone(), &mut ctx).unwrap();
        let sparse_layer = Dense {
            name: "sparse".into(),
            weights: dense_layer.weights.clone(),
            bias: None,
            config: config.with_sparse_inputs(sparse.nnz()),
        };

        let mut fwd = ForwardCtx::inference(Noise::seeded(0));
        let a = dense_layer.forward(&Features::Dense(x), &mut fwd).unwrap();
        let b = sparse_layer.forward(&Features::Sparse(sparse), &mut fwd).unwrap();
        let (a, b) = (a.to_vec2::<f32>().unwrap(), b.to_vec2::<f32>().unwrap());
        for (ra, rb) in a.iter().zip(&b) {
            for (va, vb) in ra.iter().zip(rb) {
                assert!((va - vb).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_dense_input_kind_checked() {
        let mut ctx = BuildContext::seeded(0);
        let dense = Dense::new(DenseConfig::new(2, 2).with_sparse_inputs(1), &mut ctx).unwrap();
        let x = Tensor::ones((2, 2), DType::F32, &Device::Cpu).unwrap();
        let mut fwd = ForwardCtx::inference(Noise::seeded(0));
        assert!(matches!(
            dense.forward(&Features::Dense(x), &mut fwd),
            Err(Error::InputKind { expected: "sparse", .. })
        ));
    }

    #[test]
    fn test_pos_weights_non_negative() {
        let mut ctx = BuildContext::seeded(4);
        let dense = Dense::new(DenseConfig::new(6, 6).with_pos(true), &mut ctx).unwrap();
        let w = dense.weights().unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(w.iter().all(|&v| v >= 0.0));
    }
}
