//! Graph autoencoder layers.
//!
//! A graph autoencoder (GAE) learns node embeddings whose inner products
//! reconstruct the adjacency matrix. The variational variant (VGAE) encodes
//! each node as a Gaussian and samples embeddings with the
//! reparameterization trick. This crate holds the layers; `gae-model`
//! composes them.
//!
//! ## Encoder: graph convolution
//!
//! [Kipf & Welling 2016](https://arxiv.org/abs/1611.07308):
//!
//! ```text
//! H^{(l+1)} = act( Â · H^{(l)} · W^{(l)} ),   Â = D^{-1/2} (A + I) D^{-1/2}
//! ```
//!
//! Node features are usually sparse (bag-of-words, one-hot IDs), so the
//! first layer takes a [`SparseTensor`] and applies [`dropout_sparse`]
//! before the projection.
//!
//! ## Attention
//!
//! [`GraphAttention`] replaces the fixed `Â` weights with learned,
//! per-neighbourhood softmax weights computed at edge coordinates only.
//!
//! ## Decoder
//!
//! ```text
//! Â_rec = act( Z Zᵀ )
//! ```
//!
//! flattened row-major so that a loss can compare it elementwise with the
//! label adjacency.
//!
//! ## Modules
//!
//! - [`sparse`]: COO matrices, sparse × dense products, dropout
//! - [`layer`]: the [`Layer`] trait, options, build/forward contexts
//! - [`dense`]: fully-connected layer
//! - [`conv`]: graph convolutions (sparse, dense, low-rank)
//! - [`attention`]: single-, multi- and five-head graph attention
//! - [`decoder`]: inner-product decoders
//! - [`naming`]: per-type layer name registry
//! - [`init`], [`noise`]: seedable initialization and sampling
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gae_nn::{BuildContext, Features, ForwardCtx, GraphConvConfig, GraphConvolutionSparse, Layer, Noise};
//!
//! let mut ctx = BuildContext::seeded(42);
//! let adj = Arc::new(raw_adj.normalized_adjacency()?);
//! let gcn = GraphConvolutionSparse::new(GraphConvConfig::new(1433, 32), adj, &mut ctx)?;
//! let h = gcn.forward(&Features::Sparse(features), &mut ForwardCtx::training(Noise::seeded(1)))?;
//! ```

pub mod attention;
pub mod conv;
pub mod decoder;
pub mod dense;
pub mod error;
pub mod init;
pub mod layer;
pub mod naming;
pub mod noise;
pub mod sparse;

pub use attention::{AttentionConfig, FiveGraphAttention, GraphAttention, MultiAttentionConfig, MultiGraphAttention};
pub use conv::{GraphConvConfig, GraphConvolution, GraphConvolutionDense, GraphConvolutionSparse};
pub use decoder::{DecoderConfig, InnerProductDecoder, ScaledInnerProductDecoder};
pub use dense::{Dense, DenseConfig};
pub use error::{Error, Result};
pub use layer::{Activation, BuildContext, Features, ForwardCtx, Layer, LayerOptions};
pub use naming::LayerRegistry;
pub use noise::Noise;
pub use sparse::{dropout_dense, dropout_sparse, SparseTensor};
