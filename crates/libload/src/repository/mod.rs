//! Remote repositories and artifact resolution.

mod resolver;
mod snapshot;

pub use resolver::{Fetched, Resolver};
pub use snapshot::SnapshotVersion;

use std::fmt;

use thiserror::Error;
use url::Url;

use crate::checksum::Checksum;
use crate::http::HttpError;
use crate::library::Library;

pub const MAVEN_CENTRAL: &str = "https://repo1.maven.org/maven2/";
pub const SONATYPE: &str = "https://oss.sonatype.org/content/groups/public/";
pub const JITPACK: &str = "https://jitpack.io/";

#[derive(Debug, Error)]
pub enum RepositoryUrlError {
    #[error(transparent)]
    Parse(#[from] url::ParseError),

    #[error("unsupported scheme {0:?}, expected http, https or file")]
    UnsupportedScheme(String),
}

/// Validate a repository base URL and make sure it ends with `/`.
pub fn normalize_repository(url: &str) -> Result<String, RepositoryUrlError> {
    let url = url.trim();
    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "http" | "https" | "file" => {}
        other => return Err(RepositoryUrlError::UnsupportedScheme(other.to_string())),
    }

    if url.ends_with('/') {
        Ok(url.to_string())
    } else {
        Ok(format!("{url}/"))
    }
}

/// `file://` URL of the local Maven repository under the user's home.
pub fn maven_local() -> Option<String> {
    let home = directories::BaseDirs::new()?.home_dir().to_path_buf();
    let path = home.join(".m2").join("repository");
    Url::from_directory_path(path).ok().map(|url| url.to_string())
}

/// Repositories to try for `library`, in order: the library's own, then the
/// manager's, then the fallback. Duplicates keep their first position.
pub fn candidate_repositories(
    library: &Library,
    repositories: &[String],
    fallback: Option<&str>,
) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    let all = library
        .repositories()
        .iter()
        .map(String::as_str)
        .chain(repositories.iter().map(String::as_str))
        .chain(fallback);

    for repository in all {
        if !candidates.iter().any(|c| c == repository) {
            candidates.push(repository.to_string());
        }
    }

    candidates
}

/// Why a single repository could not supply an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Unreachable(String),
    Timeout,
    HttpStatus(u16),
    NotFound,
    ChecksumMismatch { expected: Checksum, actual: Checksum },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Unreachable(message) => write!(f, "unreachable ({message})"),
            FailureReason::Timeout => f.write_str("timed out"),
            FailureReason::HttpStatus(status) => write!(f, "HTTP {status}"),
            FailureReason::NotFound => f.write_str("not found"),
            FailureReason::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch (expected {expected}, got {actual})")
            }
        }
    }
}

impl From<HttpError> for FailureReason {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::HttpStatus { status, .. } => FailureReason::HttpStatus(status),
            HttpError::Timeout { .. } => FailureReason::Timeout,
            HttpError::Request(err) if err.is_timeout() => FailureReason::Timeout,
            HttpError::Request(err) => FailureReason::Unreachable(err.to_string()),
        }
    }
}

/// One failed attempt, kept so a resolution failure can list every
/// repository that was tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryFailure {
    pub repository: String,
    pub reason: FailureReason,
}

impl fmt::Display for RepositoryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.repository, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_repository() {
        assert_eq!(
            normalize_repository("https://repo.example.com/maven").unwrap(),
            "https://repo.example.com/maven/"
        );
        assert_eq!(
            normalize_repository(" https://repo.example.com/maven/ ").unwrap(),
            "https://repo.example.com/maven/"
        );
        assert_eq!(
            normalize_repository("file:///srv/maven").unwrap(),
            "file:///srv/maven/"
        );
        assert!(matches!(
            normalize_repository("ftp://example.com/"),
            Err(RepositoryUrlError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            normalize_repository("not a url"),
            Err(RepositoryUrlError::Parse(_))
        ));
    }

    #[test]
    fn test_candidate_order_and_deduplication() {
        let library = Library::builder()
            .group_id("com.example")
            .artifact_id("foo")
            .version("1.0")
            .repository("https://own.example.com/")
            .repository("https://shared.example.com/")
            .build()
            .unwrap();
        let global = vec![
            "https://shared.example.com/".to_string(),
            "https://global.example.com/".to_string(),
            MAVEN_CENTRAL.to_string(),
        ];

        assert_eq!(
            candidate_repositories(&library, &global, Some(MAVEN_CENTRAL)),
            vec![
                "https://own.example.com/",
                "https://shared.example.com/",
                "https://global.example.com/",
                MAVEN_CENTRAL,
            ]
        );
        assert_eq!(
            candidate_repositories(&library, &[], None),
            vec!["https://own.example.com/", "https://shared.example.com/"]
        );
    }

    #[test]
    fn test_failure_display() {
        let failure = RepositoryFailure {
            repository: "https://repo.example.com/".to_string(),
            reason: FailureReason::HttpStatus(404),
        };
        assert_eq!(failure.to_string(), "https://repo.example.com/: HTTP 404");

        let mismatch = FailureReason::ChecksumMismatch {
            expected: Checksum::compute(b"a"),
            actual: Checksum::compute(b"b"),
        };
        assert!(mismatch.to_string().starts_with("checksum mismatch (expected "));
    }

    #[test]
    fn test_failure_reason_from_http_error() {
        let status = HttpError::HttpStatus {
            status: 503,
            url: "https://repo.example.com/a.jar".to_string(),
        };
        assert_eq!(FailureReason::from(status), FailureReason::HttpStatus(503));

        let timeout = HttpError::Timeout {
            url: "https://repo.example.com/a.jar".to_string(),
        };
        assert_eq!(FailureReason::from(timeout), FailureReason::Timeout);
    }

    #[test]
    fn test_maven_local_is_a_file_url() {
        if let Some(url) = maven_local() {
            assert!(url.starts_with("file://"));
            assert!(url.ends_with(".m2/repository/"));
        }
    }
}
