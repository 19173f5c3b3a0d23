/// Flat exact index: brute-force squared L2 over every stored vector
use super::{Hit, IndexError};
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Exact index holding all vectors contiguously, row-major
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append rows; positions continue from the current length
    pub fn add(&mut self, vectors: ArrayView2<f32>) -> Result<(), IndexError> {
        if vectors.ncols() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vectors.ncols(),
            });
        }
        self.data.reserve(vectors.len());
        self.data.extend(vectors.iter().copied());
        Ok(())
    }

    /// Exact k nearest by squared L2, nearest first, ties by position
    ///
    /// Scores are `1 / (1 + distance)`, so an identical vector scores 1.0.
    pub fn search(&self, query: ArrayView1<f32>, k: usize) -> Result<Vec<Hit>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<(f32, usize)> = self
            .rows()?
            .rows()
            .into_iter()
            .enumerate()
            .map(|(position, row)| (squared_l2(row, query), position))
            .collect();

        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        candidates.truncate(k);

        Ok(candidates
            .into_iter()
            .map(|(distance, position)| Hit {
                position,
                score: 1.0 / (1.0 + distance),
            })
            .collect())
    }

    /// Copy of the vector stored at `position`
    pub fn reconstruct(&self, position: usize) -> Result<Vec<f32>, IndexError> {
        if position >= self.len() {
            return Err(IndexError::PositionOutOfRange {
                position,
                len: self.len(),
            });
        }
        let start = position * self.dimension;
        Ok(self.data[start..start + self.dimension].to_vec())
    }

    /// Keep only the first `len` vectors
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len * self.dimension);
    }

    /// All stored vectors as an (N x D) view
    pub fn rows(&self) -> Result<ArrayView2<'_, f32>, IndexError> {
        let rows = self.len();
        ArrayView2::from_shape((rows, self.dimension), &self.data[..rows * self.dimension])
            .map_err(|e| IndexError::Corrupt(e.to_string()))
    }

    /// Structural check after deserialization
    pub(crate) fn validate(&self) -> Result<(), IndexError> {
        if self.dimension == 0 || self.data.len() % self.dimension != 0 {
            return Err(IndexError::Corrupt(format!(
                "flat index holds {} floats for dimension {}",
                self.data.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}

fn squared_l2(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}
