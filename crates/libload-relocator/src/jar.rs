//! Archive-level relocation.

use std::collections::HashSet;
use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::class_file;
use crate::rule::{relocate_dotted_all, relocate_path_all, CompiledRule};
use crate::{Relocation, RelocationError, Result};

const SERVICES_DIR: &str = "META-INF/services/";
const VERSIONS_DIR: &str = "META-INF/versions/";
const SIGNATURE_EXTENSIONS: [&str; 4] = [".SF", ".DSA", ".RSA", ".EC"];

/// How an archive entry is treated during relocation.
#[derive(Debug, PartialEq, Eq)]
enum EntryKind<'a> {
    /// A compiled class, optionally under a multi-release version directory.
    Class { version_dir: &'a str, class_name: &'a str },
    /// A `META-INF/services/<interface>` declaration.
    Service { interface: &'a str },
    /// A jar signature, invalid once classes change.
    Signature,
    /// A directory entry, named without its trailing slash.
    Directory { path: &'a str },
    Other,
}

fn classify(name: &str, is_dir: bool) -> EntryKind<'_> {
    if is_dir {
        return EntryKind::Directory {
            path: name.trim_end_matches('/'),
        };
    }

    if let Some(interface) = name.strip_prefix(SERVICES_DIR) {
        if !interface.is_empty() && !interface.contains('/') {
            return EntryKind::Service { interface };
        }
    }

    if let Some(file) = name.strip_prefix("META-INF/") {
        let upper = file.to_ascii_uppercase();
        if !file.contains('/') && SIGNATURE_EXTENSIONS.iter().any(|ext| upper.ends_with(ext)) {
            return EntryKind::Signature;
        }
    }

    if let Some(path) = name.strip_suffix(".class") {
        let split = path
            .strip_prefix(VERSIONS_DIR)
            .and_then(|rest| rest.find('/'))
            .map_or(0, |slash| VERSIONS_DIR.len() + slash + 1);
        let (version_dir, class_name) = path.split_at(split);
        return EntryKind::Class { version_dir, class_name };
    }

    EntryKind::Other
}

/// Relocate every reference covered by `rules` inside the jar `input`.
///
/// Rules are applied one after another in the order given, so the output of
/// one rule is visible to the next. An empty rule list returns the input
/// unchanged. Entries keep their order; rewritten entries get a fixed
/// timestamp so the same input and rules always produce identical bytes.
pub fn relocate(input: &[u8], rules: &[Relocation]) -> Result<Vec<u8>> {
    if rules.is_empty() {
        return Ok(input.to_vec());
    }

    let rules = rules
        .iter()
        .map(Relocation::compile)
        .collect::<Result<Vec<_>>>()?;

    let mut archive = ZipArchive::new(Cursor::new(input))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(input.len())));
    let mut written = HashSet::new();

    for index in 0..archive.len() {
        let (name, is_dir, compression) = {
            let entry = archive.by_index_raw(index)?;
            (entry.name().to_string(), entry.is_dir(), entry.compression())
        };

        match classify(&name, is_dir) {
            EntryKind::Signature => {
                log::debug!("Dropping signature file {}", name);
            }
            EntryKind::Class { version_dir, class_name } => {
                let contents = read_entry(&mut archive, index)?;
                let relocated = class_file::relocate_class(&contents, &rules).map_err(|source| {
                    RelocationError::MalformedClass {
                        entry: name.clone(),
                        source,
                    }
                })?;

                let target = match relocate_path_all(class_name, &rules) {
                    Some(relocated_name) => format!("{version_dir}{relocated_name}.class"),
                    None => name.clone(),
                };
                claim(&mut written, &target)?;
                writer.start_file(target, rewritten_options(compression))?;
                writer.write_all(&relocated)?;
            }
            EntryKind::Service { interface } => {
                let contents = read_entry(&mut archive, index)?;
                let target = match relocate_dotted_all(interface, &rules) {
                    Some(relocated) => format!("{SERVICES_DIR}{relocated}"),
                    None => name.clone(),
                };
                let contents = match String::from_utf8(contents) {
                    Ok(text) => relocate_service_file(&text, &rules).into_bytes(),
                    Err(err) => err.into_bytes(),
                };
                claim(&mut written, &target)?;
                writer.start_file(target, rewritten_options(compression))?;
                writer.write_all(&contents)?;
            }
            EntryKind::Directory { path } => {
                let target = match relocate_path_all(path, &rules) {
                    Some(relocated) => format!("{relocated}/"),
                    None => name.clone(),
                };
                // Several source packages may map onto one directory
                if !written.insert(target.clone()) {
                    continue;
                }
                if target == name {
                    let entry = archive.by_index_raw(index)?;
                    writer.raw_copy_file(entry)?;
                } else {
                    writer.add_directory(target, rewritten_options(CompressionMethod::Stored))?;
                }
            }
            EntryKind::Other => {
                claim(&mut written, &name)?;
                let entry = archive.by_index_raw(index)?;
                writer.raw_copy_file(entry)?;
            }
        }
    }

    Ok(writer.finish()?.into_inner())
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, index: usize) -> Result<Vec<u8>> {
    let mut entry = archive.by_index(index)?;
    let mut contents = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
    entry.read_to_end(&mut contents)?;
    Ok(contents)
}

fn claim(written: &mut HashSet<String>, name: &str) -> Result<()> {
    if written.insert(name.to_string()) {
        Ok(())
    } else {
        Err(RelocationError::DuplicateEntry {
            entry: name.to_string(),
        })
    }
}

fn rewritten_options(compression: CompressionMethod) -> SimpleFileOptions {
    let method = match compression {
        CompressionMethod::Stored => CompressionMethod::Stored,
        _ => CompressionMethod::Deflated,
    };
    SimpleFileOptions::default()
        .compression_method(method)
        .last_modified_time(DateTime::default())
}

/// Rewrite the implementation class named on each line, keeping comments,
/// whitespace and line endings.
fn relocate_service_file(text: &str, rules: &[CompiledRule]) -> String {
    let mut out = String::with_capacity(text.len());

    for line in text.split_inclusive('\n') {
        let content_start = line.len() - line.trim_start().len();
        let (indent, rest) = line.split_at(content_start);
        let name_len = rest
            .find(|c: char| c.is_whitespace() || c == '#')
            .unwrap_or(rest.len());
        let (class_name, tail) = rest.split_at(name_len);

        out.push_str(indent);
        match relocate_dotted_all(class_name, rules) {
            Some(relocated) if !class_name.is_empty() => out.push_str(&relocated),
            _ => out.push_str(class_name),
        }
        out.push_str(tail);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_entries() {
        assert_eq!(
            classify("com/example/Foo.class", false),
            EntryKind::Class {
                version_dir: "",
                class_name: "com/example/Foo"
            }
        );
        assert_eq!(
            classify("META-INF/versions/11/com/example/Foo.class", false),
            EntryKind::Class {
                version_dir: "META-INF/versions/11/",
                class_name: "com/example/Foo"
            }
        );
        assert_eq!(
            classify("META-INF/services/com.example.spi.Codec", false),
            EntryKind::Service {
                interface: "com.example.spi.Codec"
            }
        );
        assert_eq!(classify("META-INF/CERT.SF", false), EntryKind::Signature);
        assert_eq!(classify("META-INF/cert.rsa", false), EntryKind::Signature);
        assert_eq!(classify("META-INF/MANIFEST.MF", false), EntryKind::Other);
        assert_eq!(
            classify("META-INF/services/", true),
            EntryKind::Directory {
                path: "META-INF/services"
            }
        );
        assert_eq!(classify("com/example/messages.properties", false), EntryKind::Other);
    }

    #[test]
    fn test_relocate_service_file_keeps_layout() {
        let rules = vec![Relocation::new("com.example", "shaded.example")
            .compile()
            .unwrap()];
        let text = "# codecs\ncom.example.JsonCodec\n  com.example.XmlCodec # legacy\r\norg.other.Codec\n";

        assert_eq!(
            relocate_service_file(text, &rules),
            "# codecs\nshaded.example.JsonCodec\n  shaded.example.XmlCodec # legacy\r\norg.other.Codec\n"
        );
    }
}
