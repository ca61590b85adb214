//! Weight initializers.

use anyhow::{anyhow, Result};
use ndarray::{Array2, ArrayD, IxDyn};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;

/// Glorot/Xavier uniform initialization of a `[fan_out, fan_in]` matrix.
pub fn xavier_uniform<R: Rng + ?Sized>(fan_in: usize, fan_out: usize, rng: &mut R) -> Array2<f32> {
    let bound = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
    Array2::random_using((fan_out, fan_in), Uniform::new_inclusive(-bound, bound), rng)
}

/// Samples a tensor from `N(0, std^2)`.
pub fn normal<R: Rng + ?Sized>(shape: &[usize], std: f32, rng: &mut R) -> Result<ArrayD<f32>> {
    let dist = Normal::new(0.0, std).map_err(|e| anyhow!("invalid standard deviation {std}: {e}"))?;
    Ok(ArrayD::random_using(IxDyn(shape), dist, rng))
}
