//! Decoder strategies plugged into [`GcnModel`](crate::model::GcnModel).
//!
//! Every decoder maps latent embeddings `z (N x hidden2)` to flattened
//! reconstruction logits of length `N²`.

use candle_core::{Tensor, Var};
use gae_nn::{
    Activation, BuildContext, DecoderConfig, Dense, DenseConfig, Features, ForwardCtx, InnerProductDecoder, Layer,
    LayerOptions, SparseTensor,
};

use crate::config::ModelFlags;
use crate::error::{Error, Result};

/// What a decoder factory gets to see at build time.
#[derive(Debug, Clone)]
pub struct DecoderSetup {
    pub flags: ModelFlags,
    pub dropout: f64,
    pub num_nodes: usize,
    pub adj_label: SparseTensor,
    pub parallel: usize,
    pub logging: bool,
}

impl DecoderSetup {
    fn options(&self) -> LayerOptions {
        LayerOptions::default().with_logging(self.logging)
    }
}

/// Builds the decoder once the encoder exists. May be called again after
/// a failed build.
pub type DecoderFactory = Box<dyn Fn(&DecoderSetup, &mut BuildContext) -> Result<Box<dyn GraphDecoder>>>;

/// Reconstruction from latent embeddings.
pub trait GraphDecoder {
    fn name(&self) -> &str;

    /// Decoders that don't override this cannot be run.
    fn decode(&self, _z: &Tensor, _ctx: &mut ForwardCtx) -> Result<Tensor> {
        Err(Error::NotImplemented(format!("{}: decode", self.name())))
    }

    /// Parameters keyed `"{layer}/{param}"`.
    fn parameters(&self) -> Vec<(String, Var)> {
        Vec::new()
    }
}

fn prefixed(layers: &[&dyn Layer]) -> Vec<(String, Var)> {
    layers
        .iter()
        .flat_map(|l| {
            l.parameters()
                .into_iter()
                .map(move |(p, v)| (format!("{}/{}", l.name(), p), v))
        })
        .collect()
}

/// Plain `Z Zᵀ` logits.
#[derive(Debug)]
pub struct InnerProductReconstruction {
    inner: InnerProductDecoder,
}

impl InnerProductReconstruction {
    pub fn new(setup: &DecoderSetup, ctx: &mut BuildContext) -> Result<Self> {
        let inner = InnerProductDecoder::new(
            DecoderConfig::new(setup.flags.hidden2)
                .with_activation(Activation::Identity)
                .with_options(setup.options()),
            ctx,
        )?;
        Ok(Self { inner })
    }
}

impl GraphDecoder for InnerProductReconstruction {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn decode(&self, z: &Tensor, ctx: &mut ForwardCtx) -> Result<Tensor> {
        Ok(self.inner.forward(&Features::Dense(z.clone()), ctx)?)
    }
}

/// Two dense layers over `z` followed by the inner product.
///
/// The inner product reads `z` directly, so the dense output never reaches
/// the reconstruction. The layers still run and still own parameters.
#[derive(Debug)]
pub struct RelnetDecoder {
    hidden1: Dense,
    hidden2: Dense,
    inner: InnerProductDecoder,
}

impl RelnetDecoder {
    pub fn new(setup: &DecoderSetup, ctx: &mut BuildContext) -> Result<Self> {
        let flags = &setup.flags;
        let hidden1 = Dense::new(
            DenseConfig::new(flags.hidden2, flags.hidden3)
                .with_dropout(setup.dropout)
                .with_activation(Activation::Relu)
                .with_options(setup.options()),
            ctx,
        )?;
        let hidden2 = Dense::new(
            DenseConfig::new(flags.hidden3, flags.hidden4)
                .with_dropout(setup.dropout)
                .with_activation(Activation::Identity)
                .with_options(setup.options()),
            ctx,
        )?;
        let inner = InnerProductDecoder::new(
            DecoderConfig::new(flags.hidden2)
                .with_activation(Activation::Identity)
                .with_options(setup.options()),
            ctx,
        )?;
        Ok(Self { hidden1, hidden2, inner })
    }
}

impl GraphDecoder for RelnetDecoder {
    fn name(&self) -> &str {
        "relnet"
    }

    fn decode(&self, z: &Tensor, ctx: &mut ForwardCtx) -> Result<Tensor> {
        let input = Features::Dense(z.clone());
        let h1 = self.hidden1.forward(&input, ctx)?;
        let h2 = self.hidden2.forward(&Features::Dense(h1), ctx)?;
        tracing::trace!(decoder = "relnet", relation_dims = ?h2.dims(), "relation features");
        Ok(self.inner.forward(&input, ctx)?)
    }

    fn parameters(&self) -> Vec<(String, Var)> {
        prefixed(&[&self.hidden1, &self.hidden2])
    }
}

/// Edge decoder conditioned on already-decoded neighbours.
///
/// Node `i` is decoded with context from its label neighbours `j < i`
/// (the label adjacency stands in for previously decoded edges):
///
/// ```text
/// c_i = mean_{j < i, (i,j) ∈ A_label} z_j
/// h   = Dense₂( Dense₁( z + c ) )
/// Â   = h hᵀ
/// ```
#[derive(Debug)]
pub struct AutoregressiveDecoder {
    name: String,
    context: SparseTensor,
    hidden1: Dense,
    hidden2: Dense,
    inner: InnerProductDecoder,
    parallel: usize,
}

impl AutoregressiveDecoder {
    pub fn new(setup: &DecoderSetup, ctx: &mut BuildContext) -> Result<Self> {
        let name = ctx.name_layer("AutoregressiveDecoder", &setup.options());
        let flags = &setup.flags;
        let context = mean_context(&setup.adj_label, setup.num_nodes)?;
        let hidden1 = Dense::new(
            DenseConfig::new(flags.hidden2, flags.hidden3)
                .with_dropout(setup.dropout)
                .with_activation(Activation::Relu)
                .with_options(setup.options()),
            ctx,
        )?;
        let hidden2 = Dense::new(
            DenseConfig::new(flags.hidden3, flags.hidden4)
                .with_dropout(setup.dropout)
                .with_activation(Activation::Identity)
                .with_options(setup.options()),
            ctx,
        )?;
        let inner = InnerProductDecoder::new(
            DecoderConfig::new(flags.hidden4)
                .with_activation(Activation::Identity)
                .with_options(setup.options()),
            ctx,
        )?;
        tracing::debug!(decoder = name.as_str(), parallel = setup.parallel, context_edges = context.nnz(), "autoregressive decoder");
        Ok(Self {
            name,
            context,
            hidden1,
            hidden2,
            inner,
            parallel: setup.parallel,
        })
    }

    /// Requested number of nodes decoded per step. Decoding conditions on
    /// the label adjacency, so every node is decoded in one pass regardless.
    pub fn parallel(&self) -> usize {
        self.parallel
    }
}

/// Row-normalized strictly lower part of the label adjacency.
fn mean_context(adj_label: &SparseTensor, num_nodes: usize) -> Result<SparseTensor> {
    if adj_label.shape() != (num_nodes, num_nodes) {
        return Err(gae_nn::Error::DimensionMismatch {
            expected: num_nodes,
            got: adj_label.shape().0,
        }
        .into());
    }
    let lower = adj_label.strict_lower()?;
    let mut degree = vec![0u32; num_nodes];
    for &r in lower.rows() {
        degree[r as usize] += 1;
    }
    let values = lower.rows().iter().map(|&r| 1.0 / degree[r as usize] as f32).collect();
    Ok(SparseTensor::from_triplets(
        lower.rows().to_vec(),
        lower.cols().to_vec(),
        values,
        (num_nodes, num_nodes),
        adj_label.device(),
    )?)
}

impl GraphDecoder for AutoregressiveDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, z: &Tensor, ctx: &mut ForwardCtx) -> Result<Tensor> {
        let context = self.context.matmul(z)?;
        let h = self.hidden1.forward(&Features::Dense(z.add(&context)?), ctx)?;
        let h = self.hidden2.forward(&Features::Dense(h), ctx)?;
        Ok(self.inner.forward(&Features::Dense(h), ctx)?)
    }

    fn parameters(&self) -> Vec<(String, Var)> {
        prefixed(&[&self.hidden1, &self.hidden2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use gae_nn::Noise;

    fn path_label(device: &Device) -> SparseTensor {
        // 0-1, 1-2, 0-2 plus self loops.
        let rows = vec![0, 0, 0, 1, 1, 1, 2, 2, 2];
        let cols = vec![0, 1, 2, 0, 1, 2, 0, 1, 2];
        SparseTensor::from_triplets(rows, cols, vec![1.0; 9], (3, 3), device).unwrap()
    }

    fn setup(device: &Device) -> DecoderSetup {
        DecoderSetup {
            flags: ModelFlags::default().with_hidden(4, 2).with_decoder_hidden(3, 2),
            dropout: 0.0,
            num_nodes: 3,
            adj_label: path_label(device),
            parallel: 1,
            logging: false,
        }
    }

    fn z(device: &Device) -> Tensor {
        Tensor::from_vec(vec![1.0f32, 0.0, 0.5, -1.0, 2.0, 1.0], (3, 2), device).unwrap()
    }

    struct Unfinished;

    impl GraphDecoder for Unfinished {
        fn name(&self) -> &str {
            "unfinished"
        }
    }

    #[test]
    fn test_default_decode_not_implemented() {
        let device = Device::Cpu;
        let err = Unfinished
            .decode(&z(&device), &mut ForwardCtx::inference(Noise::seeded(0)))
            .unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
        assert!(Unfinished.parameters().is_empty());
    }

    #[test]
    fn test_inner_product_reconstruction() {
        let device = Device::Cpu;
        let mut ctx = BuildContext::seeded(0);
        let dec = InnerProductReconstruction::new(&setup(&device), &mut ctx).unwrap();
        let out = dec
            .decode(&z(&device), &mut ForwardCtx::inference(Noise::seeded(0)))
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(out.len(), 9);
        // z1 · z2 = 0.5*2 + -1*1
        assert!((out[5] - 0.0).abs() < 1e-6);
        assert!((out[4] - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_relnet_matches_inner_product_on_z() {
        let device = Device::Cpu;
        let mut ctx = BuildContext::seeded(0);
        let plain = InnerProductReconstruction::new(&setup(&device), &mut ctx).unwrap();
        let relnet = RelnetDecoder::new(&setup(&device), &mut ctx).unwrap();
        let mut fwd = ForwardCtx::inference(Noise::seeded(0));
        let a = plain.decode(&z(&device), &mut fwd).unwrap().to_vec1::<f32>().unwrap();
        let b = relnet.decode(&z(&device), &mut fwd).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(a, b);

        let names: Vec<String> = relnet.parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["dense_1/weights", "dense_2/weights"]);
    }

    #[test]
    fn test_mean_context() {
        let device = Device::Cpu;
        let ctx = mean_context(&path_label(&device), 3).unwrap().to_dense().unwrap();
        assert_eq!(
            ctx.to_vec2::<f32>().unwrap(),
            vec![vec![0.0, 0.0, 0.0], vec![1.0, 0.0, 0.0], vec![0.5, 0.5, 0.0]]
        );
        assert!(mean_context(&path_label(&device), 4).is_err());
    }

    #[test]
    fn test_autoregressive_shape_and_symmetry() {
        let device = Device::Cpu;
        let mut ctx = BuildContext::seeded(5);
        let dec = AutoregressiveDecoder::new(&setup(&device), &mut ctx).unwrap();
        assert_eq!(dec.name(), "autoregressivedecoder_1");
        assert_eq!(dec.parallel(), 1);
        let out = dec
            .decode(&z(&device), &mut ForwardCtx::inference(Noise::seeded(0)))
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(out.len(), 9);
        for i in 0..3 {
            for j in 0..3 {
                assert!((out[i * 3 + j] - out[j * 3 + i]).abs() < 1e-5);
            }
        }
        assert_eq!(dec.parameters().len(), 2);
    }
}
