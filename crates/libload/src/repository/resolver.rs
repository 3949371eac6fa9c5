use std::sync::Arc;

use url::Url;

use super::{candidate_repositories, FailureReason, RepositoryFailure, SnapshotVersion};
use crate::checksum::{verify_checksum, Verification};
use crate::http::HttpClient;
use crate::library::Library;
use crate::logging::Logger;
use crate::{LibraryError, Result};

/// Artifact bytes together with where they came from.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub repository: String,
    pub verification: Verification,
}

/// Finds an artifact by trying candidate repositories in order.
///
/// A repository that fails in any way, including serving bytes that do not
/// match the declared checksum, is recorded and the next one is tried.
pub struct Resolver {
    http: Arc<HttpClient>,
    logger: Logger,
}

impl Resolver {
    pub fn new(http: Arc<HttpClient>, logger: Logger) -> Self {
        Self { http, logger }
    }

    pub(crate) fn set_logger(&mut self, logger: Logger) {
        self.logger = logger;
    }

    /// Fetch and verify `library` from the first repository that can supply it.
    pub async fn resolve(
        &self,
        library: &Library,
        repositories: &[String],
        fallback: Option<&str>,
    ) -> Result<Fetched> {
        let candidates = candidate_repositories(library, repositories, fallback);
        let mut attempts = Vec::with_capacity(candidates.len());

        for repository in candidates {
            match self.try_repository(library, &repository).await {
                Ok(fetched) => {
                    self.logger.debug(format_args!(
                        "Downloaded {} from {}",
                        library, repository
                    ));
                    return Ok(fetched);
                }
                Err(reason) => {
                    self.logger.debug(format_args!(
                        "Could not get {} from {}: {}",
                        library, repository, reason
                    ));
                    attempts.push(RepositoryFailure { repository, reason });
                }
            }
        }

        Err(LibraryError::ResolutionFailed {
            library: library.id(),
            attempts,
        })
    }

    async fn try_repository(
        &self,
        library: &Library,
        repository: &str,
    ) -> std::result::Result<Fetched, FailureReason> {
        let url = self.artifact_url(library, repository).await;
        let bytes = self.fetch(&url).await?;

        let verification = verify_checksum(&bytes, library.checksum()).map_err(|mismatch| {
            FailureReason::ChecksumMismatch {
                expected: mismatch.expected,
                actual: mismatch.actual,
            }
        })?;

        Ok(Fetched {
            bytes,
            repository: repository.to_string(),
            verification,
        })
    }

    /// Download URL of `library` inside `repository`.
    ///
    /// Snapshots are looked up in the repository's metadata first; when it is
    /// missing or carries no timestamped build the plain file name is used.
    pub async fn artifact_url(&self, library: &Library, repository: &str) -> String {
        if library.is_snapshot() {
            let metadata_url = format!(
                "{}{}/maven-metadata.xml",
                repository,
                library.directory_path()
            );
            match self.fetch(&metadata_url).await {
                Ok(bytes) => {
                    if let Some(snapshot) = SnapshotVersion::parse(&String::from_utf8_lossy(&bytes)) {
                        return format!(
                            "{}{}/{}",
                            repository,
                            library.directory_path(),
                            library.snapshot_file_name(&snapshot.timestamp, &snapshot.build_number)
                        );
                    }
                }
                Err(reason) => {
                    self.logger.debug(format_args!(
                        "No snapshot metadata for {} in {}: {}",
                        library, repository, reason
                    ));
                }
            }
        }

        format!("{}{}", repository, library.path())
    }

    /// Fetch a URL, reading `file://` URLs straight from disk.
    pub async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FailureReason> {
        if !url.starts_with("file:") {
            return self.http.get_bytes(url).await.map_err(FailureReason::from);
        }

        let path = Url::parse(url)
            .ok()
            .and_then(|url| url.to_file_path().ok())
            .ok_or_else(|| FailureReason::Unreachable(format!("invalid file URL {url}")))?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(FailureReason::NotFound),
            Err(err) => Err(FailureReason::Unreachable(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;
    use crate::logging::LogLevel;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver() -> Resolver {
        Resolver::new(
            Arc::new(HttpClient::new().unwrap()),
            Logger::new("test", LogLevel::Debug),
        )
    }

    fn foo() -> Library {
        Library::builder()
            .group_id("com.example")
            .artifact_id("foo")
            .version("1.0")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_resolve_from_file_repository() {
        let dir = TempDir::new().unwrap();
        let artifact_dir = dir.path().join("com/example/foo/1.0");
        std::fs::create_dir_all(&artifact_dir).unwrap();
        std::fs::write(artifact_dir.join("foo-1.0.jar"), b"local jar").unwrap();

        let repository = Url::from_directory_path(dir.path()).unwrap().to_string();
        let fetched = resolver()
            .resolve(&foo(), &[repository.clone()], None)
            .await
            .unwrap();

        assert_eq!(fetched.bytes, b"local jar");
        assert_eq!(fetched.repository, repository);
        assert_eq!(fetched.verification, Verification::Unverified);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let repository = Url::from_directory_path(dir.path()).unwrap().to_string();

        let err = resolver()
            .resolve(&foo(), &[repository.clone()], None)
            .await
            .unwrap_err();

        match err {
            LibraryError::ResolutionFailed { library, attempts } => {
                assert_eq!(library, "com.example:foo:1.0");
                assert_eq!(
                    attempts,
                    vec![RepositoryFailure {
                        repository,
                        reason: FailureReason::NotFound,
                    }]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let err = resolver().resolve(&foo(), &[], None).await.unwrap_err();
        assert!(matches!(err, LibraryError::ResolutionFailed { ref attempts, .. } if attempts.is_empty()));
    }

    #[tokio::test]
    async fn test_snapshot_uses_timestamped_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/com/example/foo/1.0-SNAPSHOT/maven-metadata.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<metadata><versioning><snapshot><timestamp>20240101.120000</timestamp>\
                 <buildNumber>3</buildNumber></snapshot></versioning></metadata>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/com/example/foo/1.0-SNAPSHOT/foo-1.0-20240101.120000-3.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"snapshot".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let library = Library::builder()
            .group_id("com.example")
            .artifact_id("foo")
            .version("1.0-SNAPSHOT")
            .checksum(Checksum::compute(b"snapshot"))
            .build()
            .unwrap();
        let repository = format!("{}/", server.uri());

        let fetched = resolver()
            .resolve(&library, &[repository], None)
            .await
            .unwrap();
        assert_eq!(fetched.bytes, b"snapshot");
        assert_eq!(fetched.verification, Verification::Verified);
    }

    #[tokio::test]
    async fn test_snapshot_without_metadata_uses_plain_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/com/example/foo/1.0-SNAPSHOT/foo-1.0-SNAPSHOT.jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"plain".to_vec()))
            .mount(&server)
            .await;

        let library = Library::builder()
            .group_id("com.example")
            .artifact_id("foo")
            .version("1.0-SNAPSHOT")
            .build()
            .unwrap();
        let repository = format!("{}/", server.uri());

        let fetched = resolver()
            .resolve(&library, &[repository], None)
            .await
            .unwrap();
        assert_eq!(fetched.bytes, b"plain");
    }
}
