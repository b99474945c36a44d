//! Perturbation sampling (bootstrap resampling of the relations)
//!
//! Each trial factorizes a copy of the dataset in which every stored value is
//! multiplied by independent noise drawn from `Uniform[1-ε, 1+ε)`. The noise
//! comes from an explicit generator seeded with the trial's perturbation
//! seed, so a trial is reproducible regardless of which worker runs it.

use crate::dataset::{Relation, RelationalDataset};
use crate::{Error, Result};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Random generator owned by one trial
pub type TrialRng = ChaCha8Rng;

/// Fresh generator for perturbation seed `seed`
#[must_use]
pub fn trial_rng(seed: u64) -> TrialRng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Check that `epsilon` is a usable noise level
///
/// # Errors
/// Returns [`Error::InvalidEpsilon`] unless `0 ≤ epsilon < 1`
pub fn validate_epsilon(epsilon: f64) -> Result<()> {
    if epsilon.is_finite() && (0.0..1.0).contains(&epsilon) {
        Ok(())
    } else {
        Err(Error::InvalidEpsilon(epsilon))
    }
}

/// Perturbed copy of a dataset, owned by the trial that drew it
#[derive(Debug, Clone)]
pub struct Perturbation {
    seed: u64,
    epsilon: f64,
    relations: Vec<Relation>,
}

impl Perturbation {
    /// Seed the perturbation was drawn with
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Noise level
    #[must_use]
    pub const fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Perturbed relations, same order and storage as the source dataset
    #[must_use]
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }
}

/// Draw the perturbation for `seed`
///
/// Bit-identical for identical `(dataset, epsilon, seed)`.
///
/// # Errors
/// Returns [`Error::InvalidEpsilon`] unless `0 ≤ epsilon < 1`
pub fn perturb(dataset: &RelationalDataset, epsilon: f64, seed: u64) -> Result<Perturbation> {
    let mut rng = trial_rng(seed);
    perturb_with(dataset, epsilon, seed, &mut rng)
}

/// Draw a perturbation from a caller-owned generator
///
/// The trial runner continues sampling initial factors from the same
/// generator afterwards.
///
/// # Errors
/// Returns [`Error::InvalidEpsilon`] unless `0 ≤ epsilon < 1`
pub fn perturb_with(
    dataset: &RelationalDataset,
    epsilon: f64,
    seed: u64,
    rng: &mut TrialRng,
) -> Result<Perturbation> {
    validate_epsilon(epsilon)?;

    let low = 1.0 - epsilon;
    let width = 2.0 * epsilon;
    let relations = dataset
        .relations()
        .iter()
        .map(|relation| match relation {
            Relation::Dense(m) => Relation::Dense(m.mapv(|x| x * rng.gen::<f64>().mul_add(width, low))),
            Relation::Sparse(m) => Relation::Sparse(m.map_values(|x| x * rng.gen::<f64>().mul_add(width, low))),
        })
        .collect();

    Ok(Perturbation {
        seed,
        epsilon,
        relations,
    })
}
