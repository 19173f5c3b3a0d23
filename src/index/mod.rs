//! Vector index topologies and their on-disk format
//!
//! Two topologies share one interface:
//! - Flat-Exact: brute-force squared L2, similarity `1 / (1 + d)`
//! - Clustered-Approximate: IVF over spherical k-means centroids, similarity
//!   is the raw inner product
//!
//! A topology is fixed for the life of an index value. Converting between them
//! means building a new index (see `crate::migration`).

mod flat;
mod ivf;
pub mod kmeans;
mod persistence;

pub use flat::FlatIndex;
pub use ivf::IvfIndex;
pub use kmeans::ClusteringError;
pub use persistence::{read_index, write_index, FORMAT_VERSION, MAGIC};
pub(crate) use persistence::write_replacing;

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Clustered index must be trained before vectors are added")]
    NotTrained,

    #[error("Clustered index already holds vectors; training must precede insertion")]
    AlreadyPopulated,

    #[error("Training failed: {0}")]
    Training(#[from] ClusteringError),

    #[error("Position {position} out of range for {len} vectors")]
    PositionOutOfRange { position: usize, len: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt index file: {0}")]
    Corrupt(String),

    #[error("Unsupported index format version: expected {expected}, got {actual}")]
    UnsupportedVersion { expected: u32, actual: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// One search result: position in the index and its similarity score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub position: usize,
    /// Higher is more similar, whatever the topology
    pub score: f32,
}

/// Which layout an index uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    FlatExact,
    ClusteredApproximate,
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topology::FlatExact => write!(f, "flat-exact (L2)"),
            Topology::ClusteredApproximate => write!(f, "clustered-approximate (IVF, inner product)"),
        }
    }
}

/// An index of either topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VectorIndex {
    Flat(FlatIndex),
    Clustered(IvfIndex),
}

impl VectorIndex {
    /// Fresh, empty flat-exact index
    pub fn empty(dimension: usize) -> Self {
        VectorIndex::Flat(FlatIndex::new(dimension))
    }

    pub fn topology(&self) -> Topology {
        match self {
            VectorIndex::Flat(_) => Topology::FlatExact,
            VectorIndex::Clustered(_) => Topology::ClusteredApproximate,
        }
    }

    pub fn is_clustered(&self) -> bool {
        matches!(self, VectorIndex::Clustered(_))
    }

    pub fn dimension(&self) -> usize {
        match self {
            VectorIndex::Flat(index) => index.dimension(),
            VectorIndex::Clustered(index) => index.dimension(),
        }
    }

    /// Number of stored vectors
    pub fn len(&self) -> usize {
        match self {
            VectorIndex::Flat(index) => index.len(),
            VectorIndex::Clustered(index) => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append rows; nothing is written if any check fails
    pub fn add(&mut self, vectors: ArrayView2<f32>) -> Result<(), IndexError> {
        match self {
            VectorIndex::Flat(index) => index.add(vectors),
            VectorIndex::Clustered(index) => index.add(vectors),
        }
    }

    /// Up to `k` hits, most similar first
    pub fn search(&self, query: ArrayView1<f32>, k: usize) -> Result<Vec<Hit>, IndexError> {
        match self {
            VectorIndex::Flat(index) => index.search(query, k),
            VectorIndex::Clustered(index) => index.search(query, k),
        }
    }

    pub fn reconstruct(&self, position: usize) -> Result<Vec<f32>, IndexError> {
        match self {
            VectorIndex::Flat(index) => index.reconstruct(position),
            VectorIndex::Clustered(index) => index.reconstruct(position),
        }
    }

    /// Drop every vector at position `len` or later
    pub fn truncate(&mut self, len: usize) {
        match self {
            VectorIndex::Flat(index) => index.truncate(len),
            VectorIndex::Clustered(index) => index.truncate(len),
        }
    }

    /// Cluster count, if clustered
    pub fn nlist(&self) -> Option<usize> {
        match self {
            VectorIndex::Flat(_) => None,
            VectorIndex::Clustered(index) => Some(index.nlist()),
        }
    }

    pub fn nprobe(&self) -> Option<usize> {
        match self {
            VectorIndex::Flat(_) => None,
            VectorIndex::Clustered(index) => Some(index.nprobe()),
        }
    }

    /// Apply the probe count; no effect on a flat index
    pub fn set_nprobe(&mut self, nprobe: usize) {
        if let VectorIndex::Clustered(index) = self {
            index.set_nprobe(nprobe);
        }
    }

    pub(crate) fn validate(&self) -> Result<(), IndexError> {
        match self {
            VectorIndex::Flat(index) => index.validate(),
            VectorIndex::Clustered(index) => index.validate(),
        }
    }
}
