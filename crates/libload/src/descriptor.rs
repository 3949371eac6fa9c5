//! JSON library descriptors bundled with a plugin.
//!
//! ```json
//! {
//!   "version": 1,
//!   "repositories": ["https://repo.example.com/maven/"],
//!   "relocations": [
//!     { "pattern": "com.google.gson", "relocatedPattern": "org.example.libs.gson" }
//!   ],
//!   "libraries": [
//!     {
//!       "groupId": "com.google.code.gson",
//!       "artifactId": "gson",
//!       "version": "2.10.1",
//!       "checksum": "5d2a1c5a0a5c4a5d8b0e0ce7a6f6a6b7e0f0a5b1c2d3e4f5a6b7c8d9e0f1a2b3"
//!     }
//!   ]
//! }
//! ```
//!
//! Relocations at the top level apply to every library, after the
//! library's own rules.

use std::io::Read;

use libload_relocator::Relocation;
use serde::Deserialize;

use crate::checksum::Checksum;
use crate::library::Library;
use crate::{LibraryError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub version: Option<u32>,

    #[serde(default)]
    pub repositories: Vec<String>,

    #[serde(default)]
    pub relocations: Vec<RelocationEntry>,

    #[serde(default)]
    pub libraries: Vec<LibraryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelocationEntry {
    pub pattern: String,
    pub relocated_pattern: String,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

impl RelocationEntry {
    pub fn to_relocation(&self) -> Relocation {
        Relocation::new(&self.pattern, &self.relocated_pattern)
            .with_includes(self.includes.iter().cloned())
            .with_excludes(self.excludes.iter().cloned())
    }
}

/// A library as written in a descriptor.
///
/// Coordinates are optional here so one incomplete entry is reported on its
/// own instead of failing the whole document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
    pub classifier: Option<String>,
    pub extension: Option<String>,
    pub checksum: Option<String>,
    #[serde(default)]
    pub repositories: Vec<String>,
    #[serde(default)]
    pub relocations: Vec<RelocationEntry>,
    #[serde(default)]
    pub isolated_load: bool,
    pub loader_id: Option<String>,
}

impl LibraryEntry {
    /// `group:artifact:version` with `?` for missing parts
    pub fn label(&self) -> String {
        let mut label = format!(
            "{}:{}:{}",
            self.group_id.as_deref().unwrap_or("?"),
            self.artifact_id.as_deref().unwrap_or("?"),
            self.version.as_deref().unwrap_or("?")
        );
        if let Some(classifier) = &self.classifier {
            label.push(':');
            label.push_str(classifier);
        }
        label
    }

    pub fn to_library(&self, global_relocations: &[Relocation]) -> Result<Library> {
        let mut builder = Library::builder().isolated_load(self.isolated_load);

        if let Some(group_id) = &self.group_id {
            builder = builder.group_id(group_id);
        }
        if let Some(artifact_id) = &self.artifact_id {
            builder = builder.artifact_id(artifact_id);
        }
        if let Some(version) = &self.version {
            builder = builder.version(version);
        }
        if let Some(classifier) = &self.classifier {
            builder = builder.classifier(classifier);
        }
        if let Some(extension) = &self.extension {
            builder = builder.extension(extension);
        }
        if let Some(loader_id) = &self.loader_id {
            builder = builder.loader_id(loader_id);
        }
        if let Some(checksum) = self.checksum.as_deref().filter(|c| !c.trim().is_empty()) {
            let checksum = Checksum::parse(checksum).map_err(|err| LibraryError::InvalidLibrary {
                library: self.label(),
                message: err.to_string(),
            })?;
            builder = builder.checksum(checksum);
        }
        for repository in &self.repositories {
            builder = builder.repository(repository);
        }

        builder
            .relocations(self.relocations.iter().map(RelocationEntry::to_relocation))
            .relocations(global_relocations.iter().cloned())
            .build()
    }
}

impl Descriptor {
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Convert every entry, in declared order.
    ///
    /// Each result is paired with the entry's label so invalid entries can
    /// be reported without a coordinate.
    pub fn libraries(&self) -> Vec<(String, Result<Library>)> {
        let global: Vec<Relocation> = self
            .relocations
            .iter()
            .map(RelocationEntry::to_relocation)
            .collect();

        self.libraries
            .iter()
            .map(|entry| (entry.label(), entry.to_library(&global)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"{
        "version": 1,
        "repositories": ["https://repo.example.com/maven"],
        "relocations": [
            { "pattern": "org.slf4j", "relocatedPattern": "shaded.slf4j" }
        ],
        "libraries": [
            {
                "groupId": "com.google.code.gson",
                "artifactId": "gson",
                "version": "2.10.1",
                "checksum": "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
                "relocations": [
                    {
                        "pattern": "com.google.gson",
                        "relocatedPattern": "example.gson",
                        "excludes": ["com.google.gson.internal.*"]
                    }
                ]
            },
            { "groupId": "com.example", "version": "1.0" },
            {
                "groupId": "com.example",
                "artifactId": "scripting",
                "version": "2.0",
                "classifier": "all",
                "repositories": ["https://scripting.example.com/"],
                "isolatedLoad": true,
                "loaderId": "scripts"
            }
        ]
    }"#;

    #[test]
    fn test_parse() {
        let descriptor = Descriptor::parse(DESCRIPTOR).unwrap();

        assert_eq!(descriptor.version, Some(1));
        assert_eq!(descriptor.repositories, vec!["https://repo.example.com/maven"]);
        assert_eq!(descriptor.relocations.len(), 1);
        assert_eq!(descriptor.libraries.len(), 3);
    }

    #[test]
    fn test_libraries_keep_order_and_isolate_invalid_entries() {
        let descriptor = Descriptor::parse(DESCRIPTOR).unwrap();
        let libraries = descriptor.libraries();

        assert_eq!(libraries.len(), 3);

        let (label, gson) = &libraries[0];
        assert_eq!(label, "com.google.code.gson:gson:2.10.1");
        let gson = gson.as_ref().unwrap();
        assert_eq!(gson.checksum(), Some(&Checksum::compute(b"hello")));
        let patterns: Vec<&str> = gson.relocations().iter().map(|r| r.pattern()).collect();
        assert_eq!(patterns, vec!["com.google.gson", "org.slf4j"]);
        assert_eq!(gson.relocations()[0].excludes(), ["com.google.gson.internal.*"]);

        let (label, missing) = &libraries[1];
        assert_eq!(label, "com.example:?:1.0");
        assert!(matches!(missing, Err(LibraryError::InvalidLibrary { .. })));

        let (_, scripting) = &libraries[2];
        let scripting = scripting.as_ref().unwrap();
        assert_eq!(scripting.id(), "com.example:scripting:2.0:all");
        assert!(scripting.isolated_load());
        assert_eq!(scripting.loader_id(), Some("scripts"));
        assert_eq!(scripting.repositories(), ["https://scripting.example.com/"]);
    }

    #[test]
    fn test_invalid_checksum_is_reported_per_entry() {
        let descriptor = Descriptor::parse(
            r#"{"libraries": [{"groupId": "a", "artifactId": "b", "version": "1", "checksum": "abc"}]}"#,
        )
        .unwrap();

        let libraries = descriptor.libraries();
        assert!(matches!(
            libraries[0].1,
            Err(LibraryError::InvalidLibrary { ref library, .. }) if library == "a:b:1"
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            Descriptor::parse("{\"libraries\": ["),
            Err(LibraryError::Descriptor(_))
        ));
    }

    #[test]
    fn test_empty_descriptor() {
        let descriptor = Descriptor::parse("{}").unwrap();
        assert!(descriptor.libraries().is_empty());
    }
}
