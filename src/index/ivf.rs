/// Clustered inner-product index (inverted file over trained centroids)
use super::kmeans::{nearest_centroid, spherical_kmeans};
use super::{Hit, IndexError};
use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Fixed training seed so the same data always yields the same quantizer
const TRAINING_SEED: u64 = 1234;

/// Vectors assigned to one centroid, with their global positions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InvertedList {
    positions: Vec<usize>,
    data: Vec<f32>,
}

/// IVF-flat index with inner-product scoring
///
/// Must be trained before the first insertion. Queries probe the `nprobe`
/// centroids with the highest inner product and score candidates by raw inner
/// product, which is cosine similarity for unit vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfIndex {
    dimension: usize,
    nlist: usize,
    nprobe: usize,
    /// nlist x dimension, row-major; empty until trained
    centroids: Vec<f32>,
    lists: Vec<InvertedList>,
    ntotal: usize,
}

impl IvfIndex {
    /// Untrained index with `nlist` clusters
    pub fn new(dimension: usize, nlist: usize) -> Self {
        Self {
            dimension,
            nlist,
            nprobe: 1,
            centroids: Vec::new(),
            lists: vec![InvertedList::default(); nlist],
            ntotal: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    /// Clusters probed per query, clamped to `1..=nlist`
    pub fn set_nprobe(&mut self, nprobe: usize) {
        self.nprobe = nprobe.clamp(1, self.nlist.max(1));
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ntotal
    }

    pub fn is_empty(&self) -> bool {
        self.ntotal == 0
    }

    /// Train the quantizer on the full sample; replaces any earlier training
    pub fn train(&mut self, sample: ArrayView2<f32>) -> Result<(), IndexError> {
        self.check_width(sample.ncols())?;
        if self.ntotal > 0 {
            return Err(IndexError::AlreadyPopulated);
        }

        let mut rng = StdRng::seed_from_u64(TRAINING_SEED);
        let result = spherical_kmeans(sample, self.nlist, &mut rng)?;
        tracing::debug!(
            "IVF quantizer trained: nlist={}, iterations={}",
            self.nlist,
            result.iterations
        );

        self.centroids = result.centroids.iter().copied().collect();
        Ok(())
    }

    /// Assign each row to its nearest centroid and append it
    pub fn add(&mut self, vectors: ArrayView2<f32>) -> Result<(), IndexError> {
        self.check_width(vectors.ncols())?;
        if !self.is_trained() {
            return Err(IndexError::NotTrained);
        }

        let centroids = self.centroid_view()?.to_owned();
        for row in vectors.rows() {
            let list = nearest_centroid(row, centroids.view());
            let entry = &mut self.lists[list];
            entry.positions.push(self.ntotal);
            entry.data.extend(row.iter().copied());
            self.ntotal += 1;
        }
        Ok(())
    }

    /// Approximate top-k by inner product, best first, ties by position
    pub fn search(&self, query: ArrayView1<f32>, k: usize) -> Result<Vec<Hit>, IndexError> {
        self.check_width(query.len())?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let centroids = self.centroid_view()?;
        let mut ranked: Vec<(f32, usize)> = centroids
            .dot(&query)
            .iter()
            .copied()
            .enumerate()
            .map(|(list, score)| (score, list))
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut candidates: Vec<(f32, usize)> = Vec::new();
        for &(_, list) in ranked.iter().take(self.nprobe) {
            let entry = &self.lists[list];
            for (row, &position) in entry.data.chunks_exact(self.dimension).zip(&entry.positions) {
                let score: f32 = row.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
                candidates.push((score, position));
            }
        }

        candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        candidates.truncate(k);

        Ok(candidates
            .into_iter()
            .map(|(score, position)| Hit { position, score })
            .collect())
    }

    /// Copy of the vector stored at `position`
    pub fn reconstruct(&self, position: usize) -> Result<Vec<f32>, IndexError> {
        for entry in &self.lists {
            if let Some(slot) = entry.positions.iter().position(|&p| p == position) {
                let start = slot * self.dimension;
                return Ok(entry.data[start..start + self.dimension].to_vec());
            }
        }
        Err(IndexError::PositionOutOfRange {
            position,
            len: self.ntotal,
        })
    }

    /// Keep only the vectors at positions `0..len`
    pub fn truncate(&mut self, len: usize) {
        if len >= self.ntotal {
            return;
        }
        let dimension = self.dimension;
        for entry in &mut self.lists {
            let mut positions = Vec::with_capacity(entry.positions.len());
            let mut data = Vec::with_capacity(entry.data.len());
            for (row, &position) in entry.data.chunks_exact(dimension).zip(&entry.positions) {
                if position < len {
                    positions.push(position);
                    data.extend_from_slice(row);
                }
            }
            entry.positions = positions;
            entry.data = data;
        }
        self.ntotal = len;
    }

    /// Structural check after deserialization
    pub(crate) fn validate(&self) -> Result<(), IndexError> {
        let corrupt = |message: String| Err(IndexError::Corrupt(message));

        if self.dimension == 0 || self.nlist == 0 || self.lists.len() != self.nlist {
            return corrupt(format!(
                "IVF header inconsistent: dimension={}, nlist={}, lists={}",
                self.dimension,
                self.nlist,
                self.lists.len()
            ));
        }
        if self.is_trained() && self.centroids.len() != self.nlist * self.dimension {
            return corrupt("IVF centroid table has the wrong size".to_string());
        }

        let mut stored = 0;
        for entry in &self.lists {
            if entry.data.len() != entry.positions.len() * self.dimension {
                return corrupt("IVF inverted list payload does not match its ids".to_string());
            }
            if entry.positions.iter().any(|&p| p >= self.ntotal) {
                return corrupt("IVF inverted list references a missing position".to_string());
            }
            stored += entry.positions.len();
        }
        if stored != self.ntotal {
            return corrupt(format!(
                "IVF lists hold {} vectors but header says {}",
                stored, self.ntotal
            ));
        }
        Ok(())
    }

    fn centroid_view(&self) -> Result<ArrayView2<'_, f32>, IndexError> {
        ArrayView2::from_shape((self.nlist, self.dimension), &self.centroids)
            .map_err(|e| IndexError::Corrupt(e.to_string()))
    }

    fn check_width(&self, actual: usize) -> Result<(), IndexError> {
        if actual != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }
}
