//! Graph autoencoder models: encoder, sampling and a decoder strategy.

use std::collections::BTreeMap;
use std::sync::Arc;

use candle_core::{Tensor, Var};
use gae_nn::{BuildContext, ForwardCtx, SparseTensor};

use crate::config::{ModelFlags, ModelOptions};
use crate::decoder::{
    AutoregressiveDecoder, DecoderFactory, DecoderSetup, GraphDecoder, InnerProductReconstruction, RelnetDecoder,
};
use crate::encoder::{sample_latent, Encoded, GcnEncoder};
use crate::error::{Error, Result};

/// Graph inputs shared by the encoder and decoder.
#[derive(Debug, Clone)]
pub struct Placeholders {
    /// Normalized adjacency used by the graph convolutions.
    pub adj: Arc<SparseTensor>,
    /// Label adjacency (the autoregressive decoder conditions on it).
    pub adj_label: SparseTensor,
    /// Drop rate applied in every layer while training.
    pub dropout: f64,
    /// Nodes decoded per autoregressive step.
    pub parallel: usize,
}

/// Built-in model variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Variational GAE with an inner-product decoder.
    Vae,
    /// VGAE with a relational dense stack in the decoder.
    Relnet,
    /// VGAE with an autoregressive decoder.
    Auto,
}

impl ModelKind {
    pub fn type_name(self) -> &'static str {
        match self {
            ModelKind::Vae => "GCNModelVAE",
            ModelKind::Relnet => "GCNModelRelnet",
            ModelKind::Auto => "GCNModelAuto",
        }
    }

    fn decoder_factory(self) -> DecoderFactory {
        match self {
            ModelKind::Vae => Box::new(|setup: &DecoderSetup, ctx: &mut BuildContext| -> Result<Box<dyn GraphDecoder>> {
                Ok(Box::new(InnerProductReconstruction::new(setup, ctx)?) as Box<dyn GraphDecoder>)
            }),
            ModelKind::Relnet => Box::new(|setup: &DecoderSetup, ctx: &mut BuildContext| -> Result<Box<dyn GraphDecoder>> {
                Ok(Box::new(RelnetDecoder::new(setup, ctx)?) as Box<dyn GraphDecoder>)
            }),
            ModelKind::Auto => Box::new(|setup: &DecoderSetup, ctx: &mut BuildContext| -> Result<Box<dyn GraphDecoder>> {
                Ok(Box::new(AutoregressiveDecoder::new(setup, ctx)?) as Box<dyn GraphDecoder>)
            }),
        }
    }
}

/// Outputs of one forward pass.
#[derive(Debug, Clone)]
pub struct Reconstructions {
    /// Logits decoded from the sampled `z`, length `N²`.
    pub reconstructions: Tensor,
    /// Logits decoded from `z_mean`.
    pub reconstructions_noiseless: Tensor,
    pub z: Tensor,
    pub z_noiseless: Tensor,
    pub encoded: Encoded,
}

struct Built {
    encoder: GcnEncoder,
    decoder: Box<dyn GraphDecoder>,
}

enum State {
    Unbuilt(DecoderFactory),
    Built(Built),
}

/// GCN encoder + decoder strategy.
///
/// Construction only records the configuration; [`GcnModel::build`] creates
/// the layers, once.
pub struct GcnModel {
    name: String,
    logging: bool,
    placeholders: Placeholders,
    input_dim: usize,
    num_nodes: usize,
    features_nonzero: usize,
    flags: ModelFlags,
    state: State,
}

impl GcnModel {
    pub fn new(
        kind: ModelKind,
        placeholders: Placeholders,
        num_features: usize,
        num_nodes: usize,
        features_nonzero: usize,
        flags: ModelFlags,
        options: ModelOptions,
    ) -> Self {
        let name = match options.name {
            Some(name) if !name.is_empty() => name,
            _ => kind.type_name().to_lowercase(),
        };
        Self {
            name,
            logging: options.logging,
            placeholders,
            input_dim: num_features,
            num_nodes,
            features_nonzero,
            flags,
            state: State::Unbuilt(kind.decoder_factory()),
        }
    }

    /// Replace the decoder strategy. Only valid before `build`.
    pub fn with_decoder(mut self, factory: DecoderFactory) -> Result<Self> {
        if self.is_built() {
            return Err(Error::AlreadyBuilt(self.name.clone()));
        }
        self.state = State::Unbuilt(factory);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> &ModelFlags {
        &self.flags
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn is_built(&self) -> bool {
        matches!(self.state, State::Built(_))
    }

    /// Create encoder and decoder layers.
    ///
    /// On failure the model stays unbuilt and `ctx` is rolled back, so no
    /// layer names or random draws are consumed.
    pub fn build(&mut self, ctx: &mut BuildContext) -> Result<()> {
        let State::Unbuilt(factory) = &self.state else {
            return Err(Error::AlreadyBuilt(self.name.clone()));
        };
        let _span = tracing::debug_span!("build", model = self.name.as_str()).entered();

        let registry = ctx.registry.clone();
        let noise = ctx.noise.clone();
        match self.build_layers(factory, ctx) {
            Ok(built) => self.state = State::Built(built),
            Err(e) => {
                ctx.registry = registry;
                ctx.noise = noise;
                return Err(e);
            }
        }

        tracing::debug!(
            model = self.name.as_str(),
            nodes = self.num_nodes,
            input_dim = self.input_dim,
            hidden1 = self.flags.hidden1,
            hidden2 = self.flags.hidden2,
            "model built"
        );
        Ok(())
    }

    fn build_layers(&self, factory: &DecoderFactory, ctx: &mut BuildContext) -> Result<Built> {
        let adj_shape = self.placeholders.adj.shape();
        if adj_shape != (self.num_nodes, self.num_nodes) {
            return Err(gae_nn::Error::DimensionMismatch {
                expected: self.num_nodes,
                got: adj_shape.0,
            }
            .into());
        }

        let encoder = GcnEncoder::new(
            self.input_dim,
            self.features_nonzero,
            &self.flags,
            self.placeholders.dropout,
            self.placeholders.adj.clone(),
            self.logging,
            ctx,
        )?;
        let setup = DecoderSetup {
            flags: self.flags.clone(),
            dropout: self.placeholders.dropout,
            num_nodes: self.num_nodes,
            adj_label: self.placeholders.adj_label.clone(),
            parallel: self.placeholders.parallel,
            logging: self.logging,
        };
        let decoder = factory(&setup, ctx)?;
        Ok(Built { encoder, decoder })
    }

    fn built(&self) -> Result<&Built> {
        match &self.state {
            State::Built(built) => Ok(built),
            _ => Err(Error::NotBuilt(self.name.clone())),
        }
    }

    /// Run the encoder heads.
    pub fn encode(&self, features: &SparseTensor, ctx: &mut ForwardCtx) -> Result<Encoded> {
        self.built()?.encoder.encode(features, ctx)
    }

    /// Latent embeddings: sampled when `random`, else the means.
    pub fn get_z(&self, encoded: &Encoded, random: bool, ctx: &mut ForwardCtx) -> Result<Tensor> {
        self.built()?;
        sample_latent(encoded, random, self.flags.sphere_prior, &mut ctx.noise)
    }

    /// Encode, sample and decode both the stochastic and noiseless paths.
    pub fn forward(&self, features: &SparseTensor, ctx: &mut ForwardCtx) -> Result<Reconstructions> {
        let built = self.built()?;
        let _span = tracing::debug_span!("forward", model = self.name.as_str(), train = ctx.train).entered();

        let encoded = built.encoder.encode(features, ctx)?;
        let z_noiseless = self.get_z(&encoded, false, ctx)?;
        let z = if self.flags.vae {
            self.get_z(&encoded, true, ctx)?
        } else {
            z_noiseless.clone()
        };

        let reconstructions = built.decoder.decode(&z, ctx)?;
        let reconstructions_noiseless = built.decoder.decode(&z_noiseless, ctx)?;
        Ok(Reconstructions {
            reconstructions,
            reconstructions_noiseless,
            z,
            z_noiseless,
            encoded,
        })
    }

    /// Every trainable variable, keyed `"{model}/{layer}/{param}"`.
    pub fn vars(&self) -> Result<BTreeMap<String, Var>> {
        let built = self.built()?;
        let mut vars = BTreeMap::new();
        for layer in built.encoder.layers() {
            for (param, var) in layer.parameters() {
                vars.insert(format!("{}/{}/{}", self.name, layer.name(), param), var);
            }
        }
        for (param, var) in built.decoder.parameters() {
            vars.insert(format!("{}/{}", self.name, param), var);
        }
        Ok(vars)
    }

    /// Overwrite one variable in place.
    pub fn set_parameter(&self, name: &str, value: &Tensor) -> Result<()> {
        let vars = self.vars()?;
        let var = vars
            .get(name)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))?;
        var.set(value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use gae_nn::Noise;

    fn placeholders(device: &Device) -> Placeholders {
        let raw = SparseTensor::from_triplets(vec![0, 1, 1, 2], vec![1, 0, 2, 1], vec![1.0; 4], (3, 3), device).unwrap();
        Placeholders {
            adj: Arc::new(raw.normalized_adjacency().unwrap()),
            adj_label: raw,
            dropout: 0.0,
            parallel: 1,
        }
    }

    fn model(kind: ModelKind, options: ModelOptions) -> GcnModel {
        let flags = ModelFlags::default().with_hidden(4, 2).with_decoder_hidden(3, 2);
        GcnModel::new(kind, placeholders(&Device::Cpu), 3, 3, 3, flags, options)
    }

    fn features() -> SparseTensor {
        SparseTensor::from_triplets(vec![0, 1, 2], vec![0, 1, 2], vec![1.0; 3], (3, 3), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_auto_names() {
        assert_eq!(model(ModelKind::Vae, ModelOptions::default()).name(), "gcnmodelvae");
        assert_eq!(model(ModelKind::Relnet, ModelOptions::default()).name(), "gcnmodelrelnet");
        assert_eq!(model(ModelKind::Auto, ModelOptions::default()).name(), "gcnmodelauto");
        assert_eq!(model(ModelKind::Vae, ModelOptions::default().with_name("m")).name(), "m");
        assert_eq!(model(ModelKind::Vae, ModelOptions::default().with_name("")).name(), "gcnmodelvae");
    }

    #[test]
    fn test_use_before_build() {
        let m = model(ModelKind::Vae, ModelOptions::default());
        let mut fwd = ForwardCtx::inference(Noise::seeded(0));
        assert!(!m.is_built());
        assert!(matches!(m.forward(&features(), &mut fwd), Err(Error::NotBuilt(_))));
        assert!(matches!(m.encode(&features(), &mut fwd), Err(Error::NotBuilt(_))));
        assert!(matches!(m.vars(), Err(Error::NotBuilt(_))));
    }

    #[test]
    fn test_build_once() {
        let mut m = model(ModelKind::Vae, ModelOptions::default());
        let mut ctx = BuildContext::seeded(0);
        m.build(&mut ctx).unwrap();
        assert!(m.is_built());
        assert!(matches!(m.build(&mut ctx), Err(Error::AlreadyBuilt(_))));
        assert!(m.is_built());
    }

    #[test]
    fn test_vars_keys() {
        let mut m = model(ModelKind::Relnet, ModelOptions::default());
        m.build(&mut BuildContext::seeded(0)).unwrap();
        let keys: Vec<String> = m.vars().unwrap().into_keys().collect();
        assert_eq!(
            keys,
            vec![
                "gcnmodelrelnet/dense_1/weights",
                "gcnmodelrelnet/dense_2/weights",
                "gcnmodelrelnet/graphconvolution_1/weights",
                "gcnmodelrelnet/graphconvolution_2/weights",
                "gcnmodelrelnet/graphconvolution_3/weights",
                "gcnmodelrelnet/graphconvolution_4/weights",
                "gcnmodelrelnet/graphconvolutionsparse_1/weights",
            ]
        );
    }

    #[test]
    fn test_unknown_parameter() {
        let mut m = model(ModelKind::Vae, ModelOptions::default());
        m.build(&mut BuildContext::seeded(0)).unwrap();
        let t = Tensor::zeros((1, 1), candle_core::DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            m.set_parameter("gcnmodelvae/nope/weights", &t),
            Err(Error::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_forward_shapes_all_kinds() {
        for kind in [ModelKind::Vae, ModelKind::Relnet, ModelKind::Auto] {
            let mut m = model(kind, ModelOptions::default());
            m.build(&mut BuildContext::seeded(2)).unwrap();
            let out = m
                .forward(&features(), &mut ForwardCtx::training(Noise::seeded(4)))
                .unwrap();
            assert_eq!(out.reconstructions.dims(), &[9]);
            assert_eq!(out.reconstructions_noiseless.dims(), &[9]);
            assert_eq!(out.z.dims(), &[3, 2]);
        }
    }

    struct Unfinished;

    impl GraphDecoder for Unfinished {
        fn name(&self) -> &str {
            "unfinished"
        }
    }

    #[test]
    fn test_custom_decoder_without_decode() {
        let mut m = model(ModelKind::Vae, ModelOptions::default()).with_decoder(Box::new(
            |_: &DecoderSetup, _: &mut BuildContext| -> Result<Box<dyn GraphDecoder>> { Ok(Box::new(Unfinished)) },
        ))
        .unwrap();
        m.build(&mut BuildContext::seeded(0)).unwrap();
        let err = m
            .forward(&features(), &mut ForwardCtx::inference(Noise::seeded(0)))
            .err()
            .unwrap();
        assert!(matches!(err, Error::NotImplemented(_)));
    }

    #[test]
    fn test_failed_decoder_leaves_model_unbuilt() {
        let mut m = model(ModelKind::Vae, ModelOptions::default())
            .with_decoder(Box::new(
                |_: &DecoderSetup, _: &mut BuildContext| -> Result<Box<dyn GraphDecoder>> {
                    Err(Error::InvalidArgument("decoder".into()))
                },
            ))
            .unwrap();
        let mut ctx = BuildContext::seeded(0);
        assert!(matches!(m.build(&mut ctx), Err(Error::InvalidArgument(_))));
        assert!(!m.is_built());
        assert_eq!(ctx.registry.count("graphconvolution"), 0);
        assert_eq!(ctx.registry.count("graphconvolutionsparse"), 0);

        // Retrying reports the real failure again.
        assert!(matches!(m.build(&mut ctx), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            m.forward(&features(), &mut ForwardCtx::inference(Noise::seeded(0))),
            Err(Error::NotBuilt(_))
        ));
    }

    #[test]
    fn test_rebuild_after_failure_matches_fresh_build() {
        let mut m = model(ModelKind::Vae, ModelOptions::default())
            .with_decoder(Box::new(
                |_: &DecoderSetup, _: &mut BuildContext| -> Result<Box<dyn GraphDecoder>> {
                    Err(Error::InvalidArgument("decoder".into()))
                },
            ))
            .unwrap();
        let mut ctx = BuildContext::seeded(4);
        assert!(m.build(&mut ctx).is_err());
        let mut m = m
            .with_decoder(Box::new(
                |setup: &DecoderSetup, ctx: &mut BuildContext| -> Result<Box<dyn GraphDecoder>> {
                    Ok(Box::new(InnerProductReconstruction::new(setup, ctx)?))
                },
            ))
            .unwrap();
        m.build(&mut ctx).unwrap();

        let mut fresh = model(ModelKind::Vae, ModelOptions::default());
        fresh.build(&mut BuildContext::seeded(4)).unwrap();

        let dump = |m: &GcnModel| -> Vec<(String, Vec<f32>)> {
            m.vars()
                .unwrap()
                .into_iter()
                .map(|(k, v)| (k, v.as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap()))
                .collect()
        };
        assert_eq!(dump(&m), dump(&fresh));
    }

    #[test]
    fn test_with_decoder_after_build() {
        let mut m = model(ModelKind::Vae, ModelOptions::default());
        m.build(&mut BuildContext::seeded(0)).unwrap();
        let replaced = m.with_decoder(Box::new(
            |setup: &DecoderSetup, ctx: &mut BuildContext| -> Result<Box<dyn GraphDecoder>> {
                Ok(Box::new(RelnetDecoder::new(setup, ctx)?))
            },
        ));
        assert!(matches!(replaced, Err(Error::AlreadyBuilt(_))));
    }

    #[test]
    fn test_adjacency_size_checked() {
        let flags = ModelFlags::default().with_hidden(4, 2);
        let mut m = GcnModel::new(ModelKind::Vae, placeholders(&Device::Cpu), 3, 4, 3, flags, ModelOptions::default());
        assert!(matches!(
            m.build(&mut BuildContext::seeded(0)),
            Err(Error::Nn(gae_nn::Error::DimensionMismatch { expected: 4, got: 3 }))
        ));
        assert!(!m.is_built());
        assert!(matches!(m.build(&mut BuildContext::seeded(0)), Err(Error::Nn(_))));
    }
}
