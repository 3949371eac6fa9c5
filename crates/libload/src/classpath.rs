//! Injection targets for resolved artifacts.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum InjectionError {
    #[error("{} cannot be expressed as a classpath URL", .0.display())]
    InvalidPath(PathBuf),

    #[error("{0}")]
    Rejected(String),
}

/// Adds a resolved artifact to a live code-loading mechanism.
///
/// The manager calls this at most once per library; implementations do not
/// need to deduplicate.
pub trait ClasspathInjector: Send + Sync {
    fn inject(&self, path: &Path) -> Result<(), InjectionError>;
}

impl<F> ClasspathInjector for F
where
    F: Fn(&Path) -> Result<(), InjectionError> + Send + Sync,
{
    fn inject(&self, path: &Path) -> Result<(), InjectionError> {
        self(path)
    }
}

/// Ordered list of `file://` URLs, the same shape a URL class loader
/// searches.
#[derive(Debug, Default)]
pub struct UrlClasspath {
    urls: Mutex<Vec<Url>>,
}

impl UrlClasspath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the URLs injected so far, in injection order
    pub fn urls(&self) -> Vec<Url> {
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.urls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, path: &Path) -> bool {
        match file_url(path) {
            Ok(url) => self
                .urls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&url),
            Err(_) => false,
        }
    }
}

impl ClasspathInjector for UrlClasspath {
    fn inject(&self, path: &Path) -> Result<(), InjectionError> {
        let url = file_url(path)?;
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url);
        Ok(())
    }
}

fn file_url(path: &Path) -> Result<Url, InjectionError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|_| InjectionError::InvalidPath(path.to_path_buf()))?
            .join(path)
    };

    Url::from_file_path(&absolute).map_err(|()| InjectionError::InvalidPath(path.to_path_buf()))
}
