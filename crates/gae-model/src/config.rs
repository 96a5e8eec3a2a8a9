//! Model options and hyperparameter flags.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Keyword options accepted by every model: `name` and `logging`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelOptions {
    /// Overrides the auto-generated name (lowercased model type).
    pub name: Option<String>,
    /// Log parameter summaries after build.
    pub logging: bool,
}

impl ModelOptions {
    /// Parse from a JSON object; unknown keys are rejected.
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

/// Layer widths and model switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelFlags {
    /// Encoder hidden width.
    pub hidden1: usize,
    /// Latent width.
    pub hidden2: usize,
    /// First decoder hidden width (relnet, autoregressive).
    pub hidden3: usize,
    /// Second decoder hidden width (relnet, autoregressive).
    pub hidden4: usize,
    /// Sample `z` with the reparameterization trick.
    pub vae: bool,
    /// Project embeddings onto the unit sphere.
    pub sphere_prior: bool,
}

impl Default for ModelFlags {
    fn default() -> Self {
        Self {
            hidden1: 32,
            hidden2: 16,
            hidden3: 16,
            hidden4: 8,
            vae: true,
            sphere_prior: false,
        }
    }
}

impl ModelFlags {
    /// Parse from a JSON object; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidArgument(e.to_string()))
    }

    pub fn with_hidden(mut self, hidden1: usize, hidden2: usize) -> Self {
        self.hidden1 = hidden1;
        self.hidden2 = hidden2;
        self
    }

    pub fn with_decoder_hidden(mut self, hidden3: usize, hidden4: usize) -> Self {
        self.hidden3 = hidden3;
        self.hidden4 = hidden4;
        self
    }

    pub fn with_vae(mut self, vae: bool) -> Self {
        self.vae = vae;
        self
    }

    pub fn with_sphere_prior(mut self, sphere_prior: bool) -> Self {
        self.sphere_prior = sphere_prior;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_defaults() {
        let flags = ModelFlags::default();
        assert_eq!((flags.hidden1, flags.hidden2, flags.hidden3, flags.hidden4), (32, 16, 16, 8));
        assert!(flags.vae);
        assert!(!flags.sphere_prior);
    }

    #[test]
    fn test_flags_partial_json() {
        let flags = ModelFlags::from_json(r#"{"hidden1": 64, "vae": false}"#).unwrap();
        assert_eq!(flags.hidden1, 64);
        assert_eq!(flags.hidden2, 16);
        assert!(!flags.vae);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(matches!(
            ModelFlags::from_json(r#"{"hidden5": 4}"#),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            ModelOptions::from_json(r#"{"name": "m", "trainable": true}"#),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_options_json() {
        let opts = ModelOptions::from_json(r#"{"name": "vgae", "logging": true}"#).unwrap();
        assert_eq!(opts, ModelOptions::default().with_name("vgae").with_logging(true));
    }
}
