use std::path::PathBuf;

use libload_relocator::RelocationError;
use thiserror::Error;

use crate::classpath::InjectionError;
use crate::http::HttpError;
use crate::repository::{RepositoryFailure, RepositoryUrlError};

#[derive(Error, Debug)]
pub enum LibraryError {
    // Configuration errors, raised before any network activity
    #[error("Invalid library {library}: {message}")]
    InvalidLibrary { library: String, message: String },

    #[error("Invalid repository {url}: {source}")]
    InvalidRepository {
        url: String,
        #[source]
        source: RepositoryUrlError,
    },

    #[error("Failed to parse library descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    // Resolution errors
    #[error("Could not resolve {library}: {}", describe_attempts(.attempts))]
    ResolutionFailed {
        library: String,
        attempts: Vec<RepositoryFailure>,
    },

    #[error("Failed to relocate {library}: {source}")]
    Relocation {
        library: String,
        #[source]
        source: RelocationError,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    CacheWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to add {library} to the classpath: {source}")]
    Injection {
        library: String,
        #[source]
        source: InjectionError,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LibraryError {
    /// Whether the error comes from the declaration itself rather than from
    /// resolving it.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            LibraryError::InvalidLibrary { .. }
                | LibraryError::InvalidRepository { .. }
                | LibraryError::Descriptor(_)
                | LibraryError::Config(_)
        )
    }
}

fn describe_attempts(attempts: &[RepositoryFailure]) -> String {
    if attempts.is_empty() {
        return "no repositories to try".to_string();
    }

    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, LibraryError>;
