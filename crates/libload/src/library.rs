//! Library coordinates and their construction.

use std::fmt;

use libload_relocator::Relocation;
use sha2::{Digest, Sha256};

use crate::checksum::Checksum;
use crate::repository::normalize_repository;
use crate::{LibraryError, Result};

pub const DEFAULT_EXTENSION: &str = "jar";
const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

/// A dependency identified by Maven coordinates, plus everything needed to
/// fetch, verify, relocate and inject it.
///
/// Built through [`Library::builder`], which rejects malformed coordinates
/// before anything touches the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    group_id: String,
    artifact_id: String,
    version: String,
    classifier: Option<String>,
    extension: String,
    checksum: Option<Checksum>,
    relocations: Vec<Relocation>,
    repositories: Vec<String>,
    isolated_load: bool,
    loader_id: Option<String>,
}

impl Library {
    pub fn builder() -> LibraryBuilder {
        LibraryBuilder::default()
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn classifier(&self) -> Option<&str> {
        self.classifier.as_deref()
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    pub fn has_relocations(&self) -> bool {
        !self.relocations.is_empty()
    }

    /// Repositories tried before the manager's own list
    pub fn repositories(&self) -> &[String] {
        &self.repositories
    }

    pub fn isolated_load(&self) -> bool {
        self.isolated_load
    }

    pub fn loader_id(&self) -> Option<&str> {
        self.loader_id.as_deref()
    }

    /// `group:artifact:version[:classifier]`
    pub fn id(&self) -> String {
        match &self.classifier {
            Some(classifier) => format!(
                "{}:{}:{}:{}",
                self.group_id, self.artifact_id, self.version, classifier
            ),
            None => format!("{}:{}:{}", self.group_id, self.artifact_id, self.version),
        }
    }

    pub fn is_snapshot(&self) -> bool {
        self.version.ends_with(SNAPSHOT_SUFFIX)
    }

    /// Repository directory holding the artifact, e.g. `com/google/code/gson/gson/2.10.1`
    pub fn directory_path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.group_id.replace('.', "/"),
            self.artifact_id,
            self.version
        )
    }

    /// `artifact-version[-classifier].extension`
    pub fn file_name(&self) -> String {
        self.file_name_for_version(&self.version)
    }

    /// Repository-relative path of the artifact
    pub fn path(&self) -> String {
        format!("{}/{}", self.directory_path(), self.file_name())
    }

    /// File name of a timestamped snapshot build, e.g.
    /// `foo-1.0-20240101.120000-3.jar` for version `1.0-SNAPSHOT`.
    pub fn snapshot_file_name(&self, timestamp: &str, build_number: &str) -> String {
        let base = self
            .version
            .strip_suffix(SNAPSHOT_SUFFIX)
            .unwrap_or(&self.version);
        self.file_name_for_version(&format!("{base}-{timestamp}-{build_number}"))
    }

    fn file_name_for_version(&self, version: &str) -> String {
        match &self.classifier {
            Some(classifier) => format!(
                "{}-{}-{}.{}",
                self.artifact_id, version, classifier, self.extension
            ),
            None => format!("{}-{}.{}", self.artifact_id, version, self.extension),
        }
    }

    /// Short digest of the coordinate and its relocation rules, or `None`
    /// when the library is not relocated.
    ///
    /// Different rule sets for the same coordinate get different digests, so
    /// their relocated jars never share a cache entry.
    pub fn relocation_digest(&self) -> Option<String> {
        if self.relocations.is_empty() {
            return None;
        }

        let mut hasher = Sha256::new();
        hash_field(&mut hasher, &self.id());
        for rule in &self.relocations {
            hash_field(&mut hasher, rule.pattern());
            hash_field(&mut hasher, rule.relocated_pattern());
            for globs in [rule.includes(), rule.excludes()] {
                hasher.update((globs.len() as u64).to_be_bytes());
                for glob in globs {
                    hash_field(&mut hasher, glob);
                }
            }
        }

        let digest = hex::encode(hasher.finalize());
        Some(digest[..16].to_string())
    }

    /// Key recorded once the library has been injected. Two declarations
    /// share it only when they would inject the same file into the same
    /// target.
    pub(crate) fn injection_key(&self) -> String {
        let mut key = self.id();
        if let Some(digest) = self.relocation_digest() {
            key.push('@');
            key.push_str(&digest);
        }
        if self.isolated_load {
            if let Some(loader_id) = &self.loader_id {
                key.push('#');
                key.push_str(loader_id);
            }
        }
        key
    }
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// Builder for [`Library`].
#[derive(Debug, Clone, Default)]
pub struct LibraryBuilder {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
    classifier: Option<String>,
    extension: Option<String>,
    checksum: Option<Checksum>,
    relocations: Vec<Relocation>,
    repositories: Vec<String>,
    isolated_load: bool,
    loader_id: Option<String>,
}

impl LibraryBuilder {
    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn artifact_id(mut self, artifact_id: impl Into<String>) -> Self {
        self.artifact_id = Some(artifact_id.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    /// Artifact file extension, `jar` unless set
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn relocate(mut self, relocation: Relocation) -> Self {
        self.relocations.push(relocation);
        self
    }

    pub fn relocations(mut self, relocations: impl IntoIterator<Item = Relocation>) -> Self {
        self.relocations.extend(relocations);
        self
    }

    pub fn repository(mut self, url: impl Into<String>) -> Self {
        self.repositories.push(url.into());
        self
    }

    pub fn isolated_load(mut self, isolated_load: bool) -> Self {
        self.isolated_load = isolated_load;
        self
    }

    pub fn loader_id(mut self, loader_id: impl Into<String>) -> Self {
        self.loader_id = Some(loader_id.into());
        self
    }

    pub fn build(self) -> Result<Library> {
        let label = format!(
            "{}:{}:{}",
            self.group_id.as_deref().unwrap_or("?"),
            self.artifact_id.as_deref().unwrap_or("?"),
            self.version.as_deref().unwrap_or("?")
        );
        let invalid = |message: String| LibraryError::InvalidLibrary {
            library: label.clone(),
            message,
        };

        let group_id = required(self.group_id, "groupId").map_err(&invalid)?;
        let artifact_id = required(self.artifact_id, "artifactId").map_err(&invalid)?;
        let version = required(self.version, "version").map_err(&invalid)?;

        check_component(&group_id, "groupId").map_err(&invalid)?;
        if group_id.split('.').any(str::is_empty) {
            return Err(invalid("groupId has an empty segment".to_string()));
        }
        check_component(&artifact_id, "artifactId").map_err(&invalid)?;
        check_component(&version, "version").map_err(&invalid)?;

        let classifier = optional(self.classifier);
        if let Some(classifier) = &classifier {
            check_component(classifier, "classifier").map_err(&invalid)?;
        }

        let extension = optional(self.extension).unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        check_component(&extension, "extension").map_err(&invalid)?;

        for relocation in &self.relocations {
            relocation
                .validate()
                .map_err(|err| invalid(err.to_string()))?;
        }

        let loader_id = optional(self.loader_id);
        if self.isolated_load && loader_id.is_none() {
            return Err(invalid("isolated load requires a loader id".to_string()));
        }

        let mut repositories: Vec<String> = Vec::with_capacity(self.repositories.len());
        for url in &self.repositories {
            let normalized = normalize_repository(url)
                .map_err(|err| invalid(format!("repository {url}: {err}")))?;
            if !repositories.contains(&normalized) {
                repositories.push(normalized);
            }
        }

        Ok(Library {
            group_id,
            artifact_id,
            version,
            classifier,
            extension,
            checksum: self.checksum,
            relocations: self.relocations,
            repositories,
            isolated_load: self.isolated_load,
            loader_id,
        })
    }
}

/// Length-prefixed so adjacent fields can never run together.
fn hash_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn required(value: Option<String>, field: &str) -> std::result::Result<String, String> {
    optional(value).ok_or_else(|| format!("missing {field}"))
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Coordinates become path segments, so they must not be able to escape
/// the repository or cache directory.
fn check_component(value: &str, field: &str) -> std::result::Result<(), String> {
    if value == "." || value == ".." {
        return Err(format!("{field} must not be a relative path"));
    }
    if value
        .chars()
        .any(|c| matches!(c, '/' | '\\' | ':') || c.is_whitespace() || c.is_control())
    {
        return Err(format!("{field} contains an invalid character: {value:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gson() -> LibraryBuilder {
        Library::builder()
            .group_id("com.google.code.gson")
            .artifact_id("gson")
            .version("2.10.1")
    }

    #[test]
    fn test_paths() {
        let library = gson().build().unwrap();

        assert_eq!(library.id(), "com.google.code.gson:gson:2.10.1");
        assert_eq!(library.directory_path(), "com/google/code/gson/gson/2.10.1");
        assert_eq!(library.file_name(), "gson-2.10.1.jar");
        assert_eq!(
            library.path(),
            "com/google/code/gson/gson/2.10.1/gson-2.10.1.jar"
        );
        assert_eq!(library.to_string(), library.id());
    }

    #[test]
    fn test_classifier_and_extension() {
        let library = gson()
            .classifier("sources")
            .extension("zip")
            .build()
            .unwrap();

        assert_eq!(library.id(), "com.google.code.gson:gson:2.10.1:sources");
        assert_eq!(library.file_name(), "gson-2.10.1-sources.zip");
    }

    #[test]
    fn test_snapshot_file_name() {
        let library = Library::builder()
            .group_id("com.example")
            .artifact_id("foo")
            .version("1.0-SNAPSHOT")
            .build()
            .unwrap();

        assert!(library.is_snapshot());
        assert_eq!(library.file_name(), "foo-1.0-SNAPSHOT.jar");
        assert_eq!(
            library.snapshot_file_name("20240101.120000", "3"),
            "foo-1.0-20240101.120000-3.jar"
        );
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let err = Library::builder()
            .group_id("com.example")
            .version("1.0")
            .build()
            .unwrap_err();
        assert!(matches!(err, LibraryError::InvalidLibrary { ref message, .. } if message == "missing artifactId"));

        assert!(gson().version("  ").build().is_err());
    }

    #[test]
    fn test_path_escapes_are_rejected() {
        assert!(gson().artifact_id("..").build().is_err());
        assert!(gson().artifact_id("../etc").build().is_err());
        assert!(gson().group_id("com..example").build().is_err());
        assert!(gson().version("1.0 beta").build().is_err());
        assert!(gson().classifier("a\\b").build().is_err());
    }

    #[test]
    fn test_isolated_load_requires_loader_id() {
        let err = gson().isolated_load(true).build().unwrap_err();
        assert!(err.is_configuration_error());

        let library = gson().isolated_load(true).loader_id("scripting").build().unwrap();
        assert_eq!(library.loader_id(), Some("scripting"));
    }

    #[test]
    fn test_invalid_relocation_is_rejected() {
        let err = gson()
            .relocate(Relocation::new("com.google.gson.", "shaded"))
            .build()
            .unwrap_err();
        assert!(matches!(err, LibraryError::InvalidLibrary { .. }));
    }

    #[test]
    fn test_repositories_are_normalized_and_deduplicated() {
        let library = gson()
            .repository("https://repo.example.com/maven")
            .repository("https://repo.example.com/maven/")
            .build()
            .unwrap();

        assert_eq!(library.repositories(), ["https://repo.example.com/maven/"]);
        assert!(gson().repository("ftp://example.com/").build().is_err());
    }

    #[test]
    fn test_relocation_digest() {
        let plain = gson().build().unwrap();
        let shaded = gson()
            .relocate(Relocation::new("com.google.gson", "a.gson"))
            .build()
            .unwrap();
        let other = gson()
            .relocate(Relocation::new("com.google.gson", "b.gson"))
            .build()
            .unwrap();

        assert_eq!(plain.relocation_digest(), None);
        let digest = shaded.relocation_digest().unwrap();
        assert_eq!(digest.len(), 16);
        assert_eq!(shaded.relocation_digest(), Some(digest.clone()));
        assert_ne!(other.relocation_digest(), Some(digest));
    }

    #[test]
    fn test_relocation_digest_separates_globs() {
        let joined = gson()
            .relocate(Relocation::new("com.google.gson", "a.gson").with_includes(["a,b"]))
            .build()
            .unwrap();
        let split = gson()
            .relocate(Relocation::new("com.google.gson", "a.gson").with_includes(["a", "b"]))
            .build()
            .unwrap();
        let excluded = gson()
            .relocate(Relocation::new("com.google.gson", "a.gson").with_excludes(["a,b"]))
            .build()
            .unwrap();

        assert_ne!(joined.relocation_digest(), split.relocation_digest());
        assert_ne!(joined.relocation_digest(), excluded.relocation_digest());
    }

    #[test]
    fn test_injection_key() {
        let plain = gson().build().unwrap();
        let isolated = gson().isolated_load(true).loader_id("scripting").build().unwrap();

        assert_eq!(plain.injection_key(), "com.google.code.gson:gson:2.10.1");
        assert_eq!(
            isolated.injection_key(),
            "com.google.code.gson:gson:2.10.1#scripting"
        );
    }
}
