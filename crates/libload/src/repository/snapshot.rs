//! Timestamped snapshot builds.
//!
//! A `-SNAPSHOT` version is published under a timestamped file name that is
//! recorded in the version directory's `maven-metadata.xml`.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotVersion {
    pub timestamp: String,
    pub build_number: String,
}

fn snapshot_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<snapshot>(.*?)</snapshot>").expect("snapshot pattern is valid")
    })
}

fn timestamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<timestamp>\s*([0-9]{8}\.[0-9]{6})\s*</timestamp>")
            .expect("timestamp pattern is valid")
    })
}

fn build_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<buildNumber>\s*([0-9]+)\s*</buildNumber>")
            .expect("build number pattern is valid")
    })
}

impl SnapshotVersion {
    /// Read the latest build from version-level `maven-metadata.xml`.
    ///
    /// Returns `None` when the metadata carries no timestamped build, as is
    /// the case for snapshots installed into a local repository.
    pub fn parse(metadata: &str) -> Option<Self> {
        let block = snapshot_regex().captures(metadata)?.get(1)?.as_str();
        let timestamp = timestamp_regex().captures(block)?.get(1)?.as_str();
        let build_number = build_number_regex().captures(block)?.get(1)?.as_str();

        Some(Self {
            timestamp: timestamp.to_string(),
            build_number: build_number.to_string(),
        })
    }
}
