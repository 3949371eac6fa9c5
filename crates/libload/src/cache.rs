//! On-disk artifact cache.
//!
//! Artifacts are stored under the manager's save directory using the same
//! layout as a Maven repository. Relocated jars live next to the original
//! under `relocated/<digest>/`, one directory per distinct rule set.
//!
//! An artifact whose bytes were hashed against a declared checksum gets a
//! `<file>.sha256` marker holding that checksum. Cache hits are only
//! reported as verified when the marker matches.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::checksum::Checksum;
use crate::library::Library;
use crate::{LibraryError, Result};

const CHECKSUM_SUFFIX: &str = ".sha256";

/// Location of one cached file, relative to the cache root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(PathBuf);

impl CacheKey {
    /// The artifact exactly as downloaded
    pub fn artifact(library: &Library) -> Self {
        Self(Self::directory(library).join(library.file_name()))
    }

    /// The relocated artifact, if the library has relocation rules
    pub fn relocated(library: &Library) -> Option<Self> {
        let digest = library.relocation_digest()?;
        Some(Self(
            Self::directory(library)
                .join("relocated")
                .join(digest)
                .join(library.file_name()),
        ))
    }

    /// The file that ends up being injected
    pub fn for_library(library: &Library) -> Self {
        Self::relocated(library).unwrap_or_else(|| Self::artifact(library))
    }

    pub fn relative_path(&self) -> &Path {
        &self.0
    }

    /// Marker recording the checksum the file at this key was verified with
    fn checksum_marker(&self) -> Self {
        let mut marker = self.0.clone().into_os_string();
        marker.push(CHECKSUM_SUFFIX);
        Self(PathBuf::from(marker))
    }

    fn directory(library: &Library) -> PathBuf {
        let mut path: PathBuf = library.group_id().split('.').collect();
        path.push(library.artifact_id());
        path.push(library.version());
        path
    }
}

#[derive(Debug, Clone)]
pub struct LibraryCache {
    root: PathBuf,
}

impl LibraryCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(&key.0)
    }

    pub fn has(&self, key: &CacheKey) -> bool {
        self.path(key).is_file()
    }

    pub async fn read(&self, key: &CacheKey) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.path(key)).await
    }

    /// Write `bytes` for `key` atomically and return the final path.
    ///
    /// Bytes go to a temporary file in the target directory which is then
    /// moved into place without replacing anything. Readers never see a
    /// partial file. When another writer got there first its file is kept.
    pub fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<PathBuf> {
        self.persist(key, bytes).map(|(path, _)| path)
    }

    /// Write bytes that matched `checksum` and mark them as verified.
    ///
    /// Returns the final path and whether the file now in the cache holds
    /// verified bytes. When a concurrent writer won, its file is hashed
    /// before being marked.
    pub fn write_verified(
        &self,
        key: &CacheKey,
        bytes: &[u8],
        checksum: &Checksum,
    ) -> Result<(PathBuf, bool)> {
        let (path, created) = self.persist(key, bytes)?;
        let verified = created || Checksum::compute(&fs::read(&path)?) == *checksum;
        if verified {
            self.record_checksum(key, checksum)?;
        }
        Ok((path, verified))
    }

    /// Mark the file at `key` as matching `checksum`.
    pub fn record_checksum(&self, key: &CacheKey, checksum: &Checksum) -> Result<()> {
        let marker = self.path(&key.checksum_marker());
        let failed = |source: io::Error| LibraryError::CacheWriteFailed {
            path: marker.clone(),
            source,
        };

        let parent = marker
            .parent()
            .ok_or_else(|| failed(io::Error::new(io::ErrorKind::InvalidInput, "no parent directory")))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".checksum-")
            .suffix(".part")
            .tempfile_in(parent)
            .map_err(&failed)?;
        temp.write_all(checksum.to_hex().as_bytes()).map_err(&failed)?;
        temp.persist(&marker).map_err(|err| failed(err.error))?;
        Ok(())
    }

    /// Whether the file at `key` was verified against `checksum`.
    pub fn is_verified(&self, key: &CacheKey, checksum: &Checksum) -> bool {
        if !self.has(key) {
            return false;
        }
        fs::read_to_string(self.path(&key.checksum_marker()))
            .ok()
            .and_then(|recorded| Checksum::from_hex(recorded.trim()).ok())
            .is_some_and(|recorded| recorded == *checksum)
    }

    fn persist(&self, key: &CacheKey, bytes: &[u8]) -> Result<(PathBuf, bool)> {
        let path = self.path(key);
        let failed = |source: io::Error| LibraryError::CacheWriteFailed {
            path: path.clone(),
            source,
        };

        let parent = path
            .parent()
            .ok_or_else(|| failed(io::Error::new(io::ErrorKind::InvalidInput, "no parent directory")))?;
        fs::create_dir_all(parent).map_err(&failed)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".part")
            .tempfile_in(parent)
            .map_err(&failed)?;
        temp.write_all(bytes).map_err(&failed)?;
        temp.as_file().sync_all().map_err(&failed)?;

        match temp.persist_noclobber(&path) {
            Ok(_) => Ok((path.clone(), true)),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                log::debug!("{} was written concurrently, keeping it", path.display());
                Ok((path.clone(), false))
            }
            Err(err) => Err(failed(err.error)),
        }
    }

    /// Remove the file at `key` along with its checksum marker.
    pub fn remove(&self, key: &CacheKey) -> io::Result<()> {
        remove_if_present(&self.path(&key.checksum_marker()))?;
        remove_if_present(&self.path(key))
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
