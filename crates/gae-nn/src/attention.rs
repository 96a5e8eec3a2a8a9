//! Graph attention layers.
//!
//! Attention logits are computed only at adjacency coordinates and
//! normalized per source node over its neighbour set, so no dense `N x N`
//! matrix is ever built:
//!
//! ```text
//! e_ij    = LeakyReLU(a1 · h_i + a2 · h_j)      for (i, j) ∈ E
//! α_ij    = exp(e_ij) / Σ_{k : (i, k) ∈ E} exp(e_ik)
//! h_i'    = act( Σ_j α_ij h_j + b )
//! ```
//!
//! Reference: Velickovic et al., "Graph Attention Networks", ICLR 2018.

use std::sync::Arc;

use candle_core::{Tensor, Var};

use crate::error::{Error, Result};
use crate::layer::{log_parameters, Activation, BuildContext, Features, ForwardCtx, Layer, LayerOptions};
use crate::sparse::{dropout_dense, SparseTensor};

/// Configuration for a single attention head.
#[derive(Debug, Clone)]
pub struct AttentionConfig {
    pub input_dim: usize,
    /// Width of this head's output.
    pub output_dim: usize,
    /// Drop rate for inputs, attention weights and projected features.
    pub dropout: f64,
    /// Default: ReLU.
    pub act: Activation,
    /// LeakyReLU slope on the logits (default: 0.2).
    pub negative_slope: f64,
    pub features_nonzero: Option<usize>,
    pub options: LayerOptions,
}

impl AttentionConfig {
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            dropout: 0.0,
            act: Activation::Relu,
            negative_slope: 0.2,
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

    pub fn with_negative_slope(mut self, slope: f64) -> Self {
        self.negative_slope = slope;
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

/// Single-head graph attention.
#[derive(Debug, Clone)]
pub struct GraphAttention {
    name: String,
    weights: Var,
    a1: Var,
    a2: Var,
    bias: Var,
    adj: Arc<SparseTensor>,
    config: AttentionConfig,
}

impl GraphAttention {
    pub fn new(config: AttentionConfig, adj: Arc<SparseTensor>, ctx: &mut BuildContext) -> Result<Self> {
        let name = ctx.name_layer("GraphAttention", &config.options);
        let weights = ctx.glorot(config.input_dim, config.output_dim)?;
        let a1 = ctx.glorot(config.output_dim, 1)?;
        let a2 = ctx.glorot(config.output_dim, 1)?;
        let bias = ctx.zeros(config.output_dim)?;
        let layer = Self {
            name,
            weights,
            a1,
            a2,
            bias,
            adj,
            config,
        };
        if layer.config.options.logging {
            log_parameters(&layer.name, &layer.parameters())?;
        }
        Ok(layer)
    }

    /// Assemble a head from existing parameters.
    pub fn from_parts(
        name: impl Into<String>,
        weights: Var,
        a1: Var,
        a2: Var,
        bias: Var,
        adj: Arc<SparseTensor>,
        config: AttentionConfig,
    ) -> Result<Self> {
        let check_shape = |var: &Var, dims: &[usize]| -> Result<()> {
            if var.dims() != dims {
                return Err(Error::InvalidConfig(format!(
                    "attention parameter shape {:?}, expected {:?}",
                    var.dims(),
                    dims
                )));
            }
            Ok(())
        };
        check_shape(&weights, &[config.input_dim, config.output_dim])?;
        check_shape(&a1, &[config.output_dim, 1])?;
        check_shape(&a2, &[config.output_dim, 1])?;
        check_shape(&bias, &[config.output_dim])?;
        Ok(Self {
            name: name.into(),
            weights,
            a1,
            a2,
            bias,
            adj,
            config,
        })
    }

    pub fn output_dim(&self) -> usize {
        self.config.output_dim
    }

    fn project(&self, inputs: &Features, ctx: &mut ForwardCtx) -> Result<Tensor> {
        let x = inputs.dropout(self.config.dropout, self.config.features_nonzero, ctx)?;
        x.matmul(self.weights.as_tensor())
    }

    /// Softmax-normalized attention at the adjacency coordinates.
    fn normalize(&self, h: &Tensor) -> Result<SparseTensor> {
        if self.adj.nnz() == 0 {
            return Ok(self.adj.as_ref().clone());
        }
        let rows = self.adj.row_ids();
        let a1 = h.matmul(self.a1.as_tensor())?.squeeze(1)?;
        let a2 = h.matmul(self.a2.as_tensor())?.squeeze(1)?;
        let logits = (a1.index_select(rows, 0)? + a2.index_select(self.adj.col_ids(), 0)?)?;
        let logits = candle_nn::ops::leaky_relu(&logits, self.config.negative_slope)?;

        // Per-row max shift, taken as a constant.
        let host = logits.to_vec1::<f32>()?;
        let mut row_max = vec![f32::NEG_INFINITY; self.adj.shape().0];
        for (&r, &v) in self.adj.rows().iter().zip(&host) {
            let m = &mut row_max[r as usize];
            *m = m.max(v);
        }
        let shift: Vec<f32> = self.adj.rows().iter().map(|&r| row_max[r as usize]).collect();
        let shift = Tensor::from_vec(shift, host.len(), h.device())?;

        let exp = logits.sub(&shift)?.exp()?;
        let sums = Tensor::zeros(self.adj.shape().0, exp.dtype(), exp.device())?.index_add(rows, &exp, 0)?;
        let alpha = exp.div(&sums.index_select(rows, 0)?)?;
        self.adj.replace_values(alpha)
    }

    /// Normalized attention weights for `inputs` (no attention dropout).
    pub fn attention(&self, inputs: &Features, ctx: &mut ForwardCtx) -> Result<SparseTensor> {
        let h = self.project(inputs, ctx)?;
        self.normalize(&h)
    }

    /// `(‖W‖² + ‖a1‖² + ‖a2‖²) / 2`.
    pub fn l2_loss(&self) -> Result<Tensor> {
        let sq = |v: &Var| v.as_tensor().sqr().and_then(|t| t.sum_all());
        let total = ((sq(&self.weights)? + sq(&self.a1)?)? + sq(&self.a2)?)?;
        Ok(total.affine(0.5, 0.0)?)
    }
}

impl Layer for GraphAttention {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, inputs: &Features, ctx: &mut ForwardCtx) -> Result<Tensor> {
        let h = self.project(inputs, ctx)?;
        let mut alpha = self.normalize(&h)?;
        let mut h = h;
        if ctx.train && self.config.dropout > 0.0 {
            let dropped = dropout_dense(alpha.values(), self.config.dropout, &mut ctx.noise)?;
            alpha = alpha.replace_values(dropped)?;
            h = dropout_dense(&h, self.config.dropout, &mut ctx.noise)?;
        }
        let out = alpha.matmul(&h)?.broadcast_add(self.bias.as_tensor())?;
        self.config.act.apply(&out)
    }

    fn parameters(&self) -> Vec<(String, Var)> {
        vec![
            ("weights".to_string(), self.weights.clone()),
            ("a1".to_string(), self.a1.clone()),
            ("a2".to_string(), self.a2.clone()),
            ("bias".to_string(), self.bias.clone()),
        ]
    }
}

/// Configuration for [`MultiGraphAttention`].
#[derive(Debug, Clone)]
pub struct MultiAttentionConfig {
    /// Per-head configuration; `head.output_dim` is the width of one head.
    pub head: AttentionConfig,
    pub num_heads: usize,
    /// Concatenate head outputs (width `H·w`) or average them (width `w`).
    pub concat: bool,
}

impl MultiAttentionConfig {
    pub fn new(head: AttentionConfig, num_heads: usize) -> Self {
        Self {
            head,
            num_heads,
            concat: true,
        }
    }

    pub fn with_concat(mut self, concat: bool) -> Self {
        self.concat = concat;
        self
    }
}

/// Independent attention heads over the same input.
#[derive(Debug, Clone)]
pub struct MultiGraphAttention {
    name: String,
    heads: Vec<GraphAttention>,
    concat: bool,
}

impl MultiGraphAttention {
    pub fn new(config: MultiAttentionConfig, adj: Arc<SparseTensor>, ctx: &mut BuildContext) -> Result<Self> {
        let name = ctx.name_layer("MultiGraphAttention", &config.head.options);
        let head_options = LayerOptions::default().with_logging(config.head.options.logging);
        let mut heads = Vec::with_capacity(config.num_heads);
        for _ in 0..config.num_heads {
            let head = config.head.clone().with_options(head_options.clone());
            heads.push(GraphAttention::new(head, adj.clone(), ctx)?);
        }
        Self::from_heads(name, heads, config.concat)
    }

    pub fn from_heads(name: impl Into<String>, heads: Vec<GraphAttention>, concat: bool) -> Result<Self> {
        let Some(first) = heads.first() else {
            return Err(Error::InvalidConfig("attention needs at least one head".into()));
        };
        if !concat {
            let w = first.output_dim();
            if let Some(h) = heads.iter().find(|h| h.output_dim() != w) {
                return Err(Error::DimensionMismatch {
                    expected: w,
                    got: h.output_dim(),
                });
            }
        }
        Ok(Self {
            name: name.into(),
            heads,
            concat,
        })
    }

    pub fn heads(&self) -> &[GraphAttention] {
        &self.heads
    }

    pub fn output_dim(&self) -> usize {
        if self.concat {
            self.heads.iter().map(GraphAttention::output_dim).sum()
        } else {
            self.heads[0].output_dim()
        }
    }

    /// L2 penalty over every head's `W`, `a1`, `a2`, for the caller's loss.
    pub fn l2_regularization(&self) -> Result<Tensor> {
        let mut total = self.heads[0].l2_loss()?;
        for head in &self.heads[1..] {
            total = (total + head.l2_loss()?)?;
        }
        Ok(total)
    }
}

impl Layer for MultiGraphAttention {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, inputs: &Features, ctx: &mut ForwardCtx) -> Result<Tensor> {
        let outputs = self
            .heads
            .iter()
            .map(|head| head.forward(inputs, ctx))
            .collect::<Result<Vec<_>>>()?;
        if self.concat {
            Ok(Tensor::cat(&outputs, 1)?)
        } else {
            Ok(Tensor::stack(&outputs, 0)?.mean(0)?)
        }
    }

    fn parameters(&self) -> Vec<(String, Var)> {
        self.heads
            .iter()
            .flat_map(|head| {
                head.parameters()
                    .into_iter()
                    .map(move |(p, v)| (format!("{}/{p}", head.name()), v))
            })
            .collect()
    }
}

/// Five concatenated heads of width `output_dim / 5`.
///
/// Kept for configurations that name it; equivalent to
/// [`MultiGraphAttention`] with five heads and `concat = true`.
#[derive(Debug, Clone)]
pub struct FiveGraphAttention {
    name: String,
    inner: MultiGraphAttention,
}

impl FiveGraphAttention {
    pub const NUM_HEADS: usize = 5;

    /// `config.output_dim` is the total width and must be divisible by 5.
    pub fn new(config: AttentionConfig, adj: Arc<SparseTensor>, ctx: &mut BuildContext) -> Result<Self> {
        if config.output_dim % Self::NUM_HEADS != 0 {
            return Err(Error::InvalidConfig(format!(
                "output_dim {} not divisible by {} heads",
                config.output_dim,
                Self::NUM_HEADS
            )));
        }
        let name = ctx.name_layer("FiveGraphAttention", &config.options);
        let head_options = LayerOptions::default().with_logging(config.options.logging);
        let mut heads = Vec::with_capacity(Self::NUM_HEADS);
        for _ in 0..Self::NUM_HEADS {
            let mut head = config.clone().with_options(head_options.clone());
            head.output_dim = config.output_dim / Self::NUM_HEADS;
            heads.push(GraphAttention::new(head, adj.clone(), ctx)?);
        }
        let inner = MultiGraphAttention::from_heads(name.clone(), heads, true)?;
        Ok(Self { name, inner })
    }

    pub fn heads(&self) -> &[GraphAttention] {
        self.inner.heads()
    }

    pub fn l2_regularization(&self) -> Result<Tensor> {
        self.inner.l2_regularization()
    }
}

impl Layer for FiveGraphAttention {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, inputs: &Features, ctx: &mut ForwardCtx) -> Result<Tensor> {
        self.inner.forward(inputs, ctx)
    }

    fn parameters(&self) -> Vec<(String, Var)> {
        self.inner.parameters()
    }
}
