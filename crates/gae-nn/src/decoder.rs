//! Inner-product edge decoders for link prediction.
//!
//! Both decoders map node embeddings `Z (N x d)` to a row-major flattened
//! score vector of length `N²`, entry `i * N + j` scoring edge `(i, j)`.

use candle_core::{Tensor, Var};

use crate::error::{Error, Result};
use crate::init;
use crate::layer::{log_parameters, Activation, BuildContext, Features, ForwardCtx, Layer, LayerOptions};

/// Configuration shared by the inner-product decoders.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub input_dim: usize,
    /// Drop rate on the embeddings during training (default: 0).
    pub dropout: f64,
    /// Applied to the scores (default: sigmoid). Use `Identity` to get
    /// logits for a sigmoid cross-entropy loss.
    pub act: Activation,
    pub options: LayerOptions,
}

impl DecoderConfig {
    pub fn new(input_dim: usize) -> Self {
        Self {
            input_dim,
            dropout: 0.0,
            act: Activation::Sigmoid,
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

    pub fn with_options(mut self, options: LayerOptions) -> Self {
        self.options = options;
        self
    }
}

fn embeddings(inputs: &Features, config: &DecoderConfig, ctx: &mut ForwardCtx) -> Result<Tensor> {
    let z = inputs.dropout(config.dropout, None, ctx)?.to_dense()?;
    let d = z.dim(1)?;
    if d != config.input_dim {
        return Err(Error::DimensionMismatch {
            expected: config.input_dim,
            got: d,
        });
    }
    Ok(z)
}

/// `act(Z Zᵀ)`, flattened.
#[derive(Debug)]
pub struct InnerProductDecoder {
    name: String,
    config: DecoderConfig,
}

impl InnerProductDecoder {
    pub fn new(config: DecoderConfig, ctx: &mut BuildContext) -> Result<Self> {
        let name = ctx.name_layer("InnerProductDecoder", &config.options);
        Ok(Self { name, config })
    }
}

impl Layer for InnerProductDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, inputs: &Features, ctx: &mut ForwardCtx) -> Result<Tensor> {
        let z = embeddings(inputs, &self.config, ctx)?;
        let scores = z.matmul(&z.t()?)?.flatten_all()?;
        self.config.act.apply(&scores)
    }
}

/// `act(Z (s² I) Zᵀ)` with a single trainable scale `s` (initially 1).
#[derive(Debug)]
pub struct ScaledInnerProductDecoder {
    name: String,
    scale: Var,
    config: DecoderConfig,
}

impl ScaledInnerProductDecoder {
    pub fn new(config: DecoderConfig, ctx: &mut BuildContext) -> Result<Self> {
        let name = ctx.name_layer("ScaledInnerProductDecoder", &config.options);
        let scale = init::scalar(1.0, &ctx.device)?;
        if config.options.logging {
            log_parameters(&name, &[("scale".to_string(), scale.clone())])?;
        }
        Ok(Self { name, scale, config })
    }

    pub fn scale(&self) -> Result<f32> {
        Ok(self.scale.to_vec1::<f32>()?[0])
    }

    pub fn set_scale(&self, value: f32) -> Result<()> {
        let t = Tensor::new(&[value], self.scale.device())?;
        Ok(self.scale.set(&t)?)
    }
}

impl Layer for ScaledInnerProductDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, inputs: &Features, ctx: &mut ForwardCtx) -> Result<Tensor> {
        let z = embeddings(inputs, &self.config, ctx)?;
        let s2 = self.scale.as_tensor().sqr()?;
        let scores = z.matmul(&z.t()?)?.flatten_all()?.broadcast_mul(&s2)?;
        self.config.act.apply(&scores)
    }

    fn parameters(&self) -> Vec<(String, Var)> {
        vec![("scale".to_string(), self.scale.clone())]
    }
}
