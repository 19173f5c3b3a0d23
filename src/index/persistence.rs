//! Index file format
//!
//! Layout:
//! - Magic (4 bytes): `NVIX`
//! - Format version (u32, little-endian)
//! - BLAKE3 checksum of the body (32 bytes)
//! - Body: bincode-encoded [`VectorIndex`]
//!
//! A bad magic, unknown version, checksum mismatch or structurally invalid
//! body is reported as [`IndexError::Corrupt`] / [`IndexError::UnsupportedVersion`].

use super::{IndexError, VectorIndex};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Magic bytes identifying index files.
pub const MAGIC: &[u8; 4] = b"NVIX";

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

const CHECKSUM_SIZE: usize = 32;
const HEADER_SIZE: usize = 4 + 4 + CHECKSUM_SIZE;

/// Write `index` to `path`, creating parent directories as needed.
///
/// The bytes go to a sibling temp file which is then renamed over `path`, so
/// readers never see a half-written index file.
pub fn write_index(index: &VectorIndex, path: &Path) -> Result<(), IndexError> {
    let body = bincode::serialize(index).map_err(|e| IndexError::Serialization(e.to_string()))?;
    let checksum = blake3::hash(&body);

    let mut bytes = Vec::with_capacity(HEADER_SIZE + body.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(checksum.as_bytes());
    bytes.extend_from_slice(&body);

    write_replacing(path, &bytes)?;
    Ok(())
}

/// Read and verify an index file.
pub fn read_index(path: &Path) -> Result<VectorIndex, IndexError> {
    let bytes = fs::read(path)?;

    if bytes.len() < HEADER_SIZE {
        return Err(IndexError::Corrupt(format!(
            "file is {} bytes, shorter than the {}-byte header",
            bytes.len(),
            HEADER_SIZE
        )));
    }
    if &bytes[0..4] != MAGIC {
        return Err(IndexError::Corrupt("bad magic bytes".to_string()));
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..8]);
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(IndexError::UnsupportedVersion {
            expected: FORMAT_VERSION,
            actual: version,
        });
    }

    let stored = &bytes[8..HEADER_SIZE];
    let body = &bytes[HEADER_SIZE..];
    if blake3::hash(body).as_bytes() != stored {
        return Err(IndexError::Corrupt("checksum mismatch".to_string()));
    }

    let index: VectorIndex =
        bincode::deserialize(body).map_err(|e| IndexError::Corrupt(e.to_string()))?;
    index.validate()?;
    Ok(index)
}

/// Write `bytes` to `path` through a temp file and rename.
pub(crate) fn write_replacing(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path = temp_path(path);
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
