//! Vector index store
//!
//! Owns the in-memory index and the positionally aligned metadata array and
//! keeps `metadata.len() == index.len()` after every successful mutation.
//!
//! A count mismatch between the two files (the index is written first, so a
//! crash in between leaves it ahead) is repaired on load by dropping the
//! unpaired trailing entries. Files that fail to decode are moved aside to a
//! `.corrupt-<timestamp>` sibling before the first write that would replace
//! them.
//!
//! The store is synchronous. Callers that may run concurrently must load and
//! persist it from inside the shared [`crate::runtime::NativeRuntime`] section.

mod metadata;

pub use metadata::{read_metadata, write_metadata, ArticleMetadata};

use crate::index::{read_index, write_index, Hit, IndexError, Topology, VectorIndex};
use ahash::HashSet;
use ndarray::{Array2, ArrayView1};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Metadata error: {context}: {source}")]
    Metadata {
        source: serde_json::Error,
        context: String,
    },

    #[error("Input length mismatch: {vectors} vectors, {metadata} metadata entries")]
    LengthMismatch { vectors: usize, metadata: usize },

    #[error("Index holds {vectors} vectors but metadata has {metadata} entries")]
    CountMismatch { vectors: usize, metadata: usize },

    #[error("Index dimension {actual} does not match configured dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Index plus metadata, joined by position
#[derive(Debug, Clone)]
pub struct VectorStore {
    index: VectorIndex,
    metadata: Vec<ArticleMetadata>,
    /// Set when `load` fell back to empty over files that exist but failed
    quarantine_pending: bool,
}

impl VectorStore {
    /// Fresh flat-exact store with no vectors
    pub fn create_empty(dimension: usize) -> Self {
        Self {
            index: VectorIndex::empty(dimension),
            metadata: Vec::new(),
            quarantine_pending: false,
        }
    }

    /// Pair an index with its metadata, checking the counts line up
    pub fn from_parts(
        index: VectorIndex,
        metadata: Vec<ArticleMetadata>,
    ) -> Result<Self, StoreError> {
        if index.len() != metadata.len() {
            return Err(StoreError::CountMismatch {
                vectors: index.len(),
                metadata: metadata.len(),
            });
        }
        Ok(Self {
            index,
            metadata,
            quarantine_pending: false,
        })
    }

    /// Pair an index with its metadata, dropping whichever side has unpaired
    /// trailing entries
    fn reconciled(mut index: VectorIndex, mut metadata: Vec<ArticleMetadata>) -> Self {
        let (vectors, entries) = (index.len(), metadata.len());
        if vectors > entries {
            warn!(
                "Index holds {} vectors but metadata has {} entries; dropping {} unpaired vectors",
                vectors,
                entries,
                vectors - entries
            );
            index.truncate(entries);
        } else if entries > vectors {
            warn!(
                "Metadata has {} entries but index holds {} vectors; dropping {} unpaired entries",
                entries,
                vectors,
                entries - vectors
            );
            metadata.truncate(vectors);
        }
        Self {
            index,
            metadata,
            quarantine_pending: false,
        }
    }

    /// Load both companion files
    ///
    /// Returns `Ok(None)` when the files do not exist; any read, format or
    /// dimension problem is an error. A count mismatch is repaired.
    pub fn try_load(
        index_path: &Path,
        metadata_path: &Path,
        dimension: usize,
    ) -> Result<Option<Self>, StoreError> {
        let has_index = index_path.exists();
        let has_metadata = metadata_path.exists();
        if !has_index || !has_metadata {
            if has_index != has_metadata {
                warn!(
                    "Only one of the index files exists (index: {}, metadata: {}); ignoring it",
                    has_index, has_metadata
                );
            }
            return Ok(None);
        }

        let index = read_index(index_path)?;
        if index.dimension() != dimension {
            return Err(StoreError::DimensionMismatch {
                expected: dimension,
                actual: index.dimension(),
            });
        }
        let metadata = read_metadata(metadata_path)?;

        Ok(Some(Self::reconciled(index, metadata)))
    }

    /// Load both companion files, degrading to an empty store on any problem
    ///
    /// `nprobe` is applied to a clustered index on every load.
    pub fn load(index_path: &Path, metadata_path: &Path, dimension: usize, nprobe: usize) -> Self {
        match Self::try_load(index_path, metadata_path, dimension) {
            Ok(Some(mut store)) => {
                store.index.set_nprobe(nprobe);
                info!(
                    "Loaded vector index: {} vectors, {}",
                    store.len(),
                    store.topology()
                );
                store
            }
            Ok(None) => {
                info!("No existing vector index at {:?}; starting empty", index_path);
                Self::create_empty(dimension)
            }
            Err(e) => {
                warn!(
                    "Failed to load vector index from {:?}: {}; starting empty",
                    index_path, e
                );
                let mut store = Self::create_empty(dimension);
                store.quarantine_pending = true;
                store
            }
        }
    }

    /// Append vectors and their metadata together
    ///
    /// Either every pair is appended or nothing is.
    pub fn try_add(
        &mut self,
        vectors: &[Vec<f32>],
        metadata: Vec<ArticleMetadata>,
    ) -> Result<usize, StoreError> {
        if vectors.len() != metadata.len() {
            return Err(StoreError::LengthMismatch {
                vectors: vectors.len(),
                metadata: metadata.len(),
            });
        }
        if vectors.is_empty() {
            return Ok(0);
        }

        let dimension = self.index.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            }
            .into());
        }

        let flat: Vec<f32> = vectors.iter().flatten().copied().collect();
        let rows = Array2::from_shape_vec((vectors.len(), dimension), flat)
            .map_err(|e| IndexError::Corrupt(e.to_string()))?;

        self.index.add(rows.view())?;
        let added = metadata.len();
        self.metadata.extend(metadata);

        debug!("Added {} vectors (total {})", added, self.len());
        Ok(added)
    }

    /// Append vectors and metadata; a rejected call adds nothing and returns 0
    pub fn add(&mut self, vectors: &[Vec<f32>], metadata: Vec<ArticleMetadata>) -> usize {
        match self.try_add(vectors, metadata) {
            Ok(added) => added,
            Err(e) => {
                error!("Rejected vector insert: {}", e);
                0
            }
        }
    }

    /// Write the index file, then the metadata file
    ///
    /// After a failed load, the unreadable files are first renamed out of the
    /// way; if that fails nothing is written.
    pub fn persist(&mut self, index_path: &Path, metadata_path: &Path) -> Result<(), StoreError> {
        if self.quarantine_pending {
            let suffix = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
            quarantine(index_path, &suffix)?;
            quarantine(metadata_path, &suffix)?;
            self.quarantine_pending = false;
        }

        write_index(&self.index, index_path)?;
        write_metadata(metadata_path, &self.metadata)?;
        debug!("Persisted {} vectors to {:?}", self.len(), index_path);
        Ok(())
    }

    /// Up to `k` hits by the topology's own ranking; empty store yields nothing
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>, StoreError> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.index.search(ArrayView1::from(query), k)?)
    }

    pub fn is_clustered(&self) -> bool {
        self.index.is_clustered()
    }

    pub fn topology(&self) -> Topology {
        self.index.topology()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Number of stored vectors
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn metadata(&self) -> &[ArticleMetadata] {
        &self.metadata
    }

    /// Metadata at `position`, if in range
    pub fn entry(&self, position: usize) -> Option<&ArticleMetadata> {
        self.metadata.get(position)
    }

    /// Every article id currently indexed
    pub fn indexed_ids(&self) -> HashSet<i64> {
        self.metadata.iter().map(|m| m.article_id).collect()
    }
}

/// Rename `path` to `<name>.corrupt-<suffix>` if it exists
fn quarantine(path: &Path, suffix: &str) -> Result<(), StoreError> {
    if !path.exists() {
        return Ok(());
    }
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".corrupt-{}", suffix));
    let target: PathBuf = path.with_file_name(name);

    std::fs::rename(path, &target).map_err(|e| StoreError::Io {
        source: e,
        context: format!("Failed to move unreadable file {:?} aside", path),
    })?;
    warn!("Moved unreadable file {:?} to {:?}", path, target);
    Ok(())
}
