//! Graph convolution layers.
//!
//! All three variants project node features and then aggregate over a
//! first-order neighbourhood operator:
//!
//! - [`GraphConvolutionSparse`]: sparse features, `act(A · (X W))`
//! - [`GraphConvolution`]: dense features, `act(A · (X W))`
//! - [`GraphConvolutionDense`]: two low-rank factors instead of `A`,
//!   `act(R1 (R1ᵀ X W) + R2 (R2ᵀ X W))`
//!
//! ```text
//! h_i' = act( Σ_{j ∈ N(i)} A_ij · (W x_j) )
//! ```
//!
//! The adjacency is expected to be pre-normalized (see
//! [`SparseTensor::normalized_adjacency`]) and is shared between layers
//! through an `Arc`.

use std::sync::Arc;

use candle_core::{Tensor, Var};

use crate::error::{Error, Result};
use crate::layer::{log_parameters, Activation, BuildContext, Features, ForwardCtx, Layer, LayerOptions};
use crate::sparse::SparseTensor;

/// Configuration shared by the graph convolution variants.
#[derive(Debug, Clone)]
pub struct GraphConvConfig {
    pub input_dim: usize,
    pub output_dim: usize,
    /// Drop rate on the input features during training (default: 0).
    pub dropout: f64,
    /// Default: ReLU.
    pub act: Activation,
    /// Stored-entry count of sparse inputs, checked by sparse dropout.
    pub features_nonzero: Option<usize>,
    pub options: LayerOptions,
}

impl GraphConvConfig {
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            dropout: 0.0,
            act: Activation::Relu,
            features_nonzero: None,
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

    pub fn with_features_nonzero(mut self, nnz: usize) -> Self {
        self.features_nonzero = Some(nnz);
        self
    }

    pub fn with_options(mut self, options: LayerOptions) -> Self {
        self.options = options;
        self
    }
}

fn build_weights(
    layer_type: &str,
    config: &GraphConvConfig,
    ctx: &mut BuildContext,
) -> Result<(String, Var)> {
    let name = ctx.name_layer(layer_type, &config.options);
    let weights = ctx.glorot(config.input_dim, config.output_dim)?;
    if config.options.logging {
        log_parameters(&name, &[("weights".to_string(), weights.clone())])?;
    }
    Ok((name, weights))
}

/// Graph convolution over sparse node features.
#[derive(Debug)]
pub struct GraphConvolutionSparse {
    name: String,
    weights: Var,
    adj: Arc<SparseTensor>,
    config: GraphConvConfig,
}

impl GraphConvolutionSparse {
    pub fn new(config: GraphConvConfig, adj: Arc<SparseTensor>, ctx: &mut BuildContext) -> Result<Self> {
        let (name, weights) = build_weights("GraphConvolutionSparse", &config, ctx)?;
        Ok(Self {
            name,
            weights,
            adj,
            config,
        })
    }

    pub fn weights(&self) -> &Var {
        &self.weights
    }
}

impl Layer for GraphConvolutionSparse {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, inputs: &Features, ctx: &mut ForwardCtx) -> Result<Tensor> {
        if !inputs.is_sparse() {
            return Err(Error::InputKind {
                layer: self.name.clone(),
                expected: "sparse",
            });
        }
        let x = inputs.dropout(self.config.dropout, self.config.features_nonzero, ctx)?;
        let h = x.matmul(self.weights.as_tensor())?;
        let h = self.adj.matmul(&h)?;
        self.config.act.apply(&h)
    }

    fn parameters(&self) -> Vec<(String, Var)> {
        vec![("weights".to_string(), self.weights.clone())]
    }
}

/// Graph convolution over dense node features.
#[derive(Debug)]
pub struct GraphConvolution {
    name: String,
    weights: Var,
    adj: Arc<SparseTensor>,
    config: GraphConvConfig,
}

impl GraphConvolution {
    pub fn new(config: GraphConvConfig, adj: Arc<SparseTensor>, ctx: &mut BuildContext) -> Result<Self> {
        let (name, weights) = build_weights("GraphConvolution", &config, ctx)?;
        Ok(Self {
            name,
            weights,
            adj,
            config,
        })
    }

    pub fn weights(&self) -> &Var {
        &self.weights
    }
}

impl Layer for GraphConvolution {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, inputs: &Features, ctx: &mut ForwardCtx) -> Result<Tensor> {
        if inputs.is_sparse() {
            return Err(Error::InputKind {
                layer: self.name.clone(),
                expected: "dense",
            });
        }
        let x = inputs.dropout(self.config.dropout, None, ctx)?;
        let h = x.matmul(self.weights.as_tensor())?;
        let h = self.adj.matmul(&h)?;
        self.config.act.apply(&h)
    }

    fn parameters(&self) -> Vec<(String, Var)> {
        vec![("weights".to_string(), self.weights.clone())]
    }
}

/// Graph convolution through a two-component low-rank operator.
///
/// `recon_1` and `recon_2` are `(num_nodes, k)` factors; the effective
/// neighbourhood operator is `R1 R1ᵀ + R2 R2ᵀ`, never materialized.
#[derive(Debug)]
pub struct GraphConvolutionDense {
    name: String,
    weights: Var,
    recon_1: Tensor,
    recon_2: Tensor,
    config: GraphConvConfig,
}

impl GraphConvolutionDense {
    pub fn new(
        config: GraphConvConfig,
        recon_1: Tensor,
        recon_2: Tensor,
        ctx: &mut BuildContext,
    ) -> Result<Self> {
        let (n1, _) = recon_1.dims2()?;
        let (n2, _) = recon_2.dims2()?;
        if n1 != n2 {
            return Err(Error::DimensionMismatch { expected: n1, got: n2 });
        }
        let (name, weights) = build_weights("GraphConvolutionDense", &config, ctx)?;
        Ok(Self {
            name,
            weights,
            recon_1,
            recon_2,
            config,
        })
    }

    fn propagate(recon: &Tensor, h: &Tensor) -> Result<Tensor> {
        Ok(recon.matmul(&recon.t()?.matmul(h)?)?)
    }
}

impl Layer for GraphConvolutionDense {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, inputs: &Features, ctx: &mut ForwardCtx) -> Result<Tensor> {
        let x = inputs.dropout(self.config.dropout, self.config.features_nonzero, ctx)?;
        let h = x.matmul(self.weights.as_tensor())?;
        let out = (Self::propagate(&self.recon_1, &h)? + Self::propagate(&self.recon_2, &h)?)?;
        self.config.act.apply(&out)
    }

    fn parameters(&self) -> Vec<(String, Var)> {
        vec![("weights".to_string(), self.weights.clone())]
    }
}
