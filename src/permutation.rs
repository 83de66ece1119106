use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tch::Tensor;

/// Sample order of one bucket. Entry `i` is the index of the row that ends up at
/// position `i` after permuting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permutation(Vec<i64>);

impl Permutation {
    /// `[0, 1, ..., len - 1]`. A zero length still yields the single-element
    /// sentinel `[0]`, since an empty bucket has nothing to reorder.
    pub fn identity(len: usize) -> Self {
        Self((0..len.max(1) as i64).collect())
    }

    pub fn from_indices(indices: Vec<i64>) -> Self {
        Self(indices)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }

    pub fn inverse(&self) -> Self {
        let mut inverse = vec![0i64; self.0.len()];
        for (position, &index) in self.0.iter().enumerate() {
            inverse[index as usize] = position as i64;
        }
        Self(inverse)
    }

    pub fn is_valid(&self) -> bool {
        let mut seen = vec![false; self.0.len()];
        self.0.iter().all(|&index| {
            let index = index as usize;
            index < seen.len() && !std::mem::replace(&mut seen[index], true)
        })
    }

    pub fn to_tensor(&self) -> Tensor {
        Tensor::from_slice(&self.0)
    }
}

/// Fresh uniform permutation of every bucket and the permutations that undo them.
///
/// Randomness comes only from `seed`: identical bucket counts and seed give
/// identical permutations across runs and platforms.
pub fn get_permutations(bucket_counts: &[usize], seed: u64) -> (Vec<Permutation>, Vec<Permutation>) {
    let mut rng = StdRng::seed_from_u64(seed);
    bucket_counts
        .iter()
        .map(|&count| {
            let mut indices: Vec<i64> = (0..count.max(1) as i64).collect();
            indices.shuffle(&mut rng);
            let permutation = Permutation(indices);
            let inverse = permutation.inverse();
            (permutation, inverse)
        })
        .unzip()
}
