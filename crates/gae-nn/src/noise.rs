//! Seedable randomness for initialization, dropout masks and latent sampling.
//!
//! Candle's CPU device cannot be seeded, so every random draw in this crate
//! goes through a [`Noise`] source that callers own and pass down.

use candle_core::{Device, Tensor};
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal, Uniform};
use rand_xorshift::XorShiftRng;

use crate::error::Result;

/// Random source shared by a build or forward pass.
#[derive(Debug, Clone)]
pub struct Noise {
    rng: XorShiftRng,
}

impl Noise {
    /// Deterministic source from a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: XorShiftRng::seed_from_u64(seed),
        }
    }

    /// Source seeded from the thread RNG.
    pub fn from_entropy() -> Self {
        Self::seeded(rand::thread_rng().gen())
    }

    /// `n` samples from U[0, 1).
    pub fn uniform(&mut self, n: usize) -> Vec<f32> {
        (0..n).map(|_| self.rng.gen::<f32>()).collect()
    }

    /// `n` samples from U[lo, hi).
    pub fn uniform_range(&mut self, n: usize, lo: f32, hi: f32) -> Vec<f32> {
        let dist = Uniform::new(lo, hi);
        (0..n).map(|_| dist.sample(&mut self.rng)).collect()
    }

    /// Standard normal tensor of the given 2-D shape.
    pub fn standard_normal(&mut self, shape: (usize, usize), device: &Device) -> Result<Tensor> {
        let data: Vec<f32> = (0..shape.0 * shape.1)
            .map(|_| StandardNormal.sample(&mut self.rng))
            .collect();
        Ok(Tensor::from_vec(data, shape, device)?)
    }
}

impl Default for Noise {
    fn default() -> Self {
        Self::from_entropy()
    }
}
