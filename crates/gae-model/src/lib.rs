//! Graph autoencoder models.
//!
//! Composes the layers from `gae-nn` into the variational graph autoencoder
//! of [Kipf & Welling 2016](https://arxiv.org/abs/1611.07308) and two
//! decoder variants:
//!
//! | Kind | Decoder |
//! |------|---------|
//! | [`ModelKind::Vae`] | `Z Zᵀ` |
//! | [`ModelKind::Relnet`] | dense relation stack alongside `Z Zᵀ` |
//! | [`ModelKind::Auto`] | autoregressive, conditioned on lower-indexed label neighbours |
//!
//! Every forward pass yields two reconstructions: one from a sampled `z`
//! and one from `z_mean`. Reconstructions are logits; the loss lives with
//! the training driver.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gae_model::{GcnModel, ModelFlags, ModelKind, ModelOptions, Placeholders};
//! use gae_nn::{BuildContext, ForwardCtx, Noise};
//!
//! let mut model = GcnModel::new(ModelKind::Vae, placeholders, num_features, num_nodes, nnz,
//!     ModelFlags::default(), ModelOptions::default());
//! model.build(&mut BuildContext::seeded(42))?;
//! let out = model.forward(&features, &mut ForwardCtx::training(Noise::seeded(7)))?;
//! let loss = candle_nn::loss::binary_cross_entropy_with_logit(&out.reconstructions, &labels)?;
//! let grads = loss.backward()?;
//! ```

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod model;

pub use config::{ModelFlags, ModelOptions};
pub use decoder::{
    AutoregressiveDecoder, DecoderFactory, DecoderSetup, GraphDecoder, InnerProductReconstruction, RelnetDecoder,
};
pub use encoder::{l2_normalize_rows, sample_latent, Encoded, GcnEncoder};
pub use error::{Error, Result};
pub use model::{GcnModel, ModelKind, Placeholders, Reconstructions};
