#![allow(dead_code)]

use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;

use libload::{Config, Library, LibraryManager, UrlClasspath};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Config that never falls back to a public repository.
pub fn offline_config() -> Config {
    Config {
        timeout: 5,
        connect_timeout: 2,
        fallback_repository: None,
        ..Config::default()
    }
}

pub fn manager(data_directory: &Path) -> (LibraryManager, Arc<UrlClasspath>) {
    manager_with_config(data_directory, offline_config())
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn manager_with_config(
    data_directory: &Path,
    config: Config,
) -> (LibraryManager, Arc<UrlClasspath>) {
    init_logging();
    let classpath = Arc::new(UrlClasspath::new());
    let manager = LibraryManager::new(classpath.clone(), data_directory, config).unwrap();
    (manager, classpath)
}

pub fn library(group_id: &str, artifact_id: &str, version: &str) -> libload::LibraryBuilder {
    Library::builder()
        .group_id(group_id)
        .artifact_id(artifact_id)
        .version(version)
}

/// Base URL of a repository served under `prefix` by `server`.
pub fn repository(server: &MockServer, prefix: &str) -> String {
    format!("{}/{}/", server.uri(), prefix)
}

/// Serve `bytes` for `library` from the repository under `prefix`,
/// expecting exactly `times` downloads.
pub async fn serve(server: &MockServer, prefix: &str, library: &Library, bytes: &[u8], times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/{}/{}", prefix, library.path())))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()))
        .expect(times)
        .mount(server)
        .await;
}

/// A repository address nothing listens on.
pub fn unreachable_repository() -> String {
    "http://127.0.0.1:9/maven/".to_string()
}

/// Minimal class file for `name` (slash form) extending `java/lang/Object`.
pub fn class_file(name: &str) -> Vec<u8> {
    let mut out = vec![0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34];
    out.extend_from_slice(&5u16.to_be_bytes());

    for (utf8, class_index) in [(name, 1u16), ("java/lang/Object", 3u16)] {
        out.push(1);
        out.extend_from_slice(&(utf8.len() as u16).to_be_bytes());
        out.extend_from_slice(utf8.as_bytes());
        out.push(7);
        out.extend_from_slice(&class_index.to_be_bytes());
    }

    out.extend_from_slice(&0x0021u16.to_be_bytes());
    out.extend_from_slice(&2u16.to_be_bytes());
    out.extend_from_slice(&4u16.to_be_bytes());
    out.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);
    out
}

pub fn jar(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn jar_entry_names(bytes: &[u8]) -> Vec<String> {
    let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    archive.file_names().map(str::to_string).collect()
}

pub fn jar_entry(bytes: &[u8], name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut contents = Vec::new();
    entry.read_to_end(&mut contents).unwrap();
    contents
}
