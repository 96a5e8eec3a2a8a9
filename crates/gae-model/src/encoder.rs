//! GCN encoder and latent sampling.
//!
//! ```text
//! H        = relu( Â · X · W₀ )          (sparse X)
//! z_mean   = Â · H · W_μ
//! z_log_std= Â · H · W_σ
//! z        = z_mean + ε ⊙ exp(z_log_std),  ε ~ N(0, I)
//! ```

use std::sync::Arc;

use candle_core::Tensor;
use gae_nn::{
    Activation, BuildContext, Features, ForwardCtx, GraphConvConfig, GraphConvolution, GraphConvolutionSparse,
    Layer, LayerOptions, Noise, SparseTensor,
};

use crate::config::ModelFlags;
use crate::error::Result;

/// Encoder heads evaluated on one feature matrix.
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Latent means, `(N, hidden2)`.
    pub z_mean: Tensor,
    /// Latent log standard deviations, `(N, hidden2)`.
    pub z_log_std: Tensor,
    /// Scalar radius head, `(N, 1)`. Not consumed by any decoder.
    pub z_r: Tensor,
    /// Log standard deviation of the radius head, `(N, 1)`.
    pub z_r_log_std: Tensor,
}

/// Two-layer GCN with Gaussian heads.
#[derive(Debug)]
pub struct GcnEncoder {
    hidden1: GraphConvolutionSparse,
    z_mean: GraphConvolution,
    z_log_std: GraphConvolution,
    z_r: GraphConvolution,
    z_r_log_std: GraphConvolution,
}

impl GcnEncoder {
    /// Layers are created (and named) in the order hidden1, z_mean,
    /// z_log_std, z_r, z_r_log_std.
    pub fn new(
        input_dim: usize,
        features_nonzero: usize,
        flags: &ModelFlags,
        dropout: f64,
        adj: Arc<SparseTensor>,
        logging: bool,
        ctx: &mut BuildContext,
    ) -> Result<Self> {
        let options = LayerOptions::default().with_logging(logging);
        let head = |output_dim: usize| {
            GraphConvConfig::new(flags.hidden1, output_dim)
                .with_dropout(dropout)
                .with_activation(Activation::Identity)
                .with_options(options.clone())
        };

        let hidden1 = GraphConvolutionSparse::new(
            GraphConvConfig::new(input_dim, flags.hidden1)
                .with_dropout(dropout)
                .with_activation(Activation::Relu)
                .with_features_nonzero(features_nonzero)
                .with_options(options.clone()),
            adj.clone(),
            ctx,
        )?;
        let z_mean = GraphConvolution::new(head(flags.hidden2), adj.clone(), ctx)?;
        let z_log_std = GraphConvolution::new(head(flags.hidden2), adj.clone(), ctx)?;
        let z_r = GraphConvolution::new(head(1), adj.clone(), ctx)?;
        let z_r_log_std = GraphConvolution::new(head(1), adj, ctx)?;

        Ok(Self {
            hidden1,
            z_mean,
            z_log_std,
            z_r,
            z_r_log_std,
        })
    }

    pub fn encode(&self, features: &SparseTensor, ctx: &mut ForwardCtx) -> Result<Encoded> {
        let hidden = Features::Dense(self.hidden1.forward(&Features::Sparse(features.clone()), ctx)?);
        Ok(Encoded {
            z_mean: self.z_mean.forward(&hidden, ctx)?,
            z_log_std: self.z_log_std.forward(&hidden, ctx)?,
            z_r: self.z_r.forward(&hidden, ctx)?,
            z_r_log_std: self.z_r_log_std.forward(&hidden, ctx)?,
        })
    }

    pub fn layers(&self) -> [&dyn Layer; 5] {
        [
            &self.hidden1,
            &self.z_mean,
            &self.z_log_std,
            &self.z_r,
            &self.z_r_log_std,
        ]
    }
}

/// Latent embeddings from the encoder heads.
///
/// With `random`, `z = z_mean + ε ⊙ exp(z_log_std)`; otherwise `z_mean`
/// itself and no noise is drawn. `sphere_prior` projects rows onto the unit
/// sphere.
pub fn sample_latent(encoded: &Encoded, random: bool, sphere_prior: bool, noise: &mut Noise) -> Result<Tensor> {
    let z = if random {
        let eps = noise.standard_normal(encoded.z_mean.dims2()?, encoded.z_mean.device())?;
        encoded.z_mean.add(&eps.mul(&encoded.z_log_std.exp()?)?)?
    } else {
        encoded.z_mean.clone()
    };
    if sphere_prior {
        l2_normalize_rows(&z)
    } else {
        Ok(z)
    }
}

/// `x / sqrt(max(Σx², 1e-12))` per row.
pub fn l2_normalize_rows(x: &Tensor) -> Result<Tensor> {
    let norm = x.sqr()?.sum_keepdim(1)?.maximum(1e-12)?.sqrt()?;
    Ok(x.broadcast_div(&norm)?)
}
