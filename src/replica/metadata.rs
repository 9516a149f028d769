//! Replica metadata reader
//!
//! Metadata lives in `<dir>/volume.meta` as JSON. Readers must tell a
//! missing file apart from an unreadable one: the former means the replica
//! was never created, the latter puts it in the `Error` state.

use crate::common::{Error, Result};
use crate::replica::Info;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const META_FILE: &str = "volume.meta";

/// Reads persisted replica metadata from a directory
pub trait MetadataReader: Send + Sync {
    /// Fails with an error whose `is_not_found()` is true when no metadata exists
    fn read(&self, dir: &Path) -> Result<Info>;
}

/// Reads `volume.meta` from the replica directory
#[derive(Debug, Default, Clone, Copy)]
pub struct FileMetadataReader;

impl FileMetadataReader {
    pub fn meta_path(dir: &Path) -> PathBuf {
        dir.join(META_FILE)
    }
}

impl MetadataReader for FileMetadataReader {
    fn read(&self, dir: &Path) -> Result<Info> {
        let path = Self::meta_path(dir);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::MetadataNotFound(dir.to_path_buf()))
            }
            Err(e) => {
                return Err(Error::MetadataRead {
                    path,
                    reason: e.to_string(),
                })
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| Error::MetadataRead {
            path,
            reason: e.to_string(),
        })
    }
}

/// Write `info` to `<dir>/volume.meta` via a temp file and rename
pub fn write_info(dir: &Path, info: &Info) -> Result<()> {
    fs::create_dir_all(dir)?;
    let path = FileMetadataReader::meta_path(dir);
    let tmp = path.with_extension("meta.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(info)?)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}
