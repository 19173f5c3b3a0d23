//! Flat-exact to clustered index migration
//!
//! One-shot, offline conversion that keeps every vector and leaves the
//! metadata file untouched. Steps:
//! 1. Load the existing index and metadata (already clustered: nothing to do)
//! 2. Copy both files to timestamped backups
//! 3. Reconstruct every vector by position
//! 4. L2-normalize them
//! 5. Train a clustered index with `nlist = min(max_nlist, floor(sqrt(N)))`
//! 6. Insert all vectors in one bulk add
//! 7. Overwrite the index file
//! 8. Reload it and check the count and a self-query
//!
//! Any failure before step 7 leaves the live files as they were.

use crate::config::Config;
use crate::embedding::pooling::l2_normalize;
use crate::index::{read_index, write_index, IndexError, IvfIndex, VectorIndex};
use crate::runtime::NativeRuntime;
use crate::store::{read_metadata, StoreError, VectorStore};
use ndarray::Array2;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Index file not found: {path}")]
    MissingIndex { path: PathBuf },

    #[error("Metadata file not found: {path}")]
    MissingMetadata { path: PathBuf },

    #[error("Index holds no vectors; nothing to cluster")]
    EmptyIndex,

    #[error("Failed to back up {path}: {source}")]
    Backup {
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("Verification failed: {reason}. Restore from {backup}")]
    Verification { reason: String, backup: PathBuf },
}

/// What a migration run did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationReport {
    AlreadyClustered {
        vectors: usize,
    },
    Migrated {
        vectors: usize,
        dimension: usize,
        nlist: usize,
        backup_index: PathBuf,
        backup_metadata: PathBuf,
        elapsed_ms: u128,
    },
}

/// Rebuilds a flat index as a clustered one
#[derive(Debug, Clone)]
pub struct IndexMigrator {
    index_path: PathBuf,
    metadata_path: PathBuf,
    backup_dir: PathBuf,
    max_nlist: usize,
    nprobe: usize,
    min_vectors_for_clustering: usize,
    runtime: NativeRuntime,
}

impl IndexMigrator {
    pub fn from_config(config: &Config, runtime: NativeRuntime) -> Self {
        Self {
            index_path: config.index_path(),
            metadata_path: config.metadata_path(),
            backup_dir: config.backup_dir(),
            max_nlist: config.index.max_nlist,
            nprobe: config.index.nprobe,
            min_vectors_for_clustering: config.index.min_vectors_for_clustering,
            runtime,
        }
    }

    /// Write backups somewhere other than the index directory
    pub fn with_backup_dir(mut self, backup_dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = backup_dir.into();
        self
    }

    pub fn run(&self) -> Result<MigrationReport, MigrationError> {
        let start = Instant::now();

        // 1. Load
        let store = self.load()?;
        if store.is_clustered() {
            info!(
                "Index is already clustered ({} vectors); nothing to migrate",
                store.len()
            );
            return Ok(MigrationReport::AlreadyClustered {
                vectors: store.len(),
            });
        }

        let n = store.len();
        let dimension = store.dimension();
        if n == 0 {
            return Err(MigrationError::EmptyIndex);
        }
        if n < self.min_vectors_for_clustering {
            warn!(
                "Only {} vectors (recommended at least {}); clustering quality may be poor",
                n, self.min_vectors_for_clustering
            );
        }
        info!("Migrating flat index: {} vectors, dimension {}", n, dimension);

        // 2. Back up
        let (backup_index, backup_metadata) = self.back_up()?;

        // 3-4. Reconstruct and normalize
        let vectors = reconstruct_normalized(store.index())?;
        info!("Reconstructed and normalized {} vectors", n);

        // 5-6. Train and fill
        let nlist = cluster_count(n, self.max_nlist);
        info!("Training clustered index with nlist={}", nlist);
        let mut clustered = IvfIndex::new(dimension, nlist);
        clustered.train(vectors.view())?;
        clustered.set_nprobe(self.nprobe);
        let mut index = VectorIndex::Clustered(clustered);
        index.add(vectors.view())?;

        // 7. Overwrite
        {
            let _guard = self.runtime.enter();
            write_index(&index, &self.index_path)?;
        }
        info!("Wrote clustered index to {:?}", self.index_path);

        // 8. Verify
        self.verify(&vectors, &backup_index)?;

        let elapsed_ms = start.elapsed().as_millis();
        info!(
            "Migration complete in {}ms; backups at {:?}",
            elapsed_ms, backup_index
        );

        Ok(MigrationReport::Migrated {
            vectors: n,
            dimension,
            nlist,
            backup_index,
            backup_metadata,
            elapsed_ms,
        })
    }

    fn load(&self) -> Result<VectorStore, MigrationError> {
        if !self.index_path.exists() {
            return Err(MigrationError::MissingIndex {
                path: self.index_path.clone(),
            });
        }
        if !self.metadata_path.exists() {
            return Err(MigrationError::MissingMetadata {
                path: self.metadata_path.clone(),
            });
        }

        let _guard = self.runtime.enter();
        let index = read_index(&self.index_path)?;
        let metadata = read_metadata(&self.metadata_path)?;
        Ok(VectorStore::from_parts(index, metadata)?)
    }

    fn back_up(&self) -> Result<(PathBuf, PathBuf), MigrationError> {
        std::fs::create_dir_all(&self.backup_dir).map_err(|e| MigrationError::Backup {
            source: e,
            path: self.backup_dir.clone(),
        })?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let backup_index = self.backup_dir.join(format!("backup_{}.index", timestamp));
        let backup_metadata = self.backup_dir.join(format!("backup_{}.json", timestamp));

        copy_file(&self.index_path, &backup_index)?;
        copy_file(&self.metadata_path, &backup_metadata)?;
        info!("Backups written: {:?}, {:?}", backup_index, backup_metadata);

        Ok((backup_index, backup_metadata))
    }

    fn verify(&self, vectors: &Array2<f32>, backup: &Path) -> Result<(), MigrationError> {
        let fail = |reason: String| MigrationError::Verification {
            reason,
            backup: backup.to_path_buf(),
        };

        let mut reloaded = {
            let _guard = self.runtime.enter();
            read_index(&self.index_path)?
        };
        reloaded.set_nprobe(self.nprobe);

        if !reloaded.is_clustered() {
            return Err(fail("reloaded index is not clustered".to_string()));
        }
        if reloaded.len() != vectors.nrows() {
            return Err(fail(format!(
                "expected {} vectors, found {}",
                vectors.nrows(),
                reloaded.len()
            )));
        }

        let hits = reloaded.search(vectors.row(0), 5)?;
        match hits.first() {
            Some(hit) if hit.position == 0 => {
                info!(
                    "Verified: {} vectors, self-query similarity {:.4}",
                    reloaded.len(),
                    hit.score
                );
                Ok(())
            }
            Some(hit) => Err(fail(format!(
                "self-query for position 0 returned position {}",
                hit.position
            ))),
            None => Err(fail("self-query returned no results".to_string())),
        }
    }
}

/// `min(max_nlist, floor(sqrt(n)))`, at least 1
pub fn cluster_count(n: usize, max_nlist: usize) -> usize {
    let root = (n as f64).sqrt().floor() as usize;
    root.min(max_nlist).max(1)
}

fn reconstruct_normalized(index: &VectorIndex) -> Result<Array2<f32>, IndexError> {
    let mut vectors = Array2::<f32>::zeros((index.len(), index.dimension()));
    for (position, mut row) in vectors.rows_mut().into_iter().enumerate() {
        let mut vector = index.reconstruct(position)?;
        l2_normalize(&mut vector);
        row.assign(&ndarray::ArrayView1::from(&vector));
    }
    Ok(vectors)
}

fn copy_file(from: &Path, to: &Path) -> Result<(), MigrationError> {
    std::fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| MigrationError::Backup {
            source: e,
            path: from.to_path_buf(),
        })
}
