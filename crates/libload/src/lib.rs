//! Runtime library loading for plugins.
//!
//! A plugin declares the libraries it needs by Maven coordinate instead of
//! shipping them. At startup a [`LibraryManager`] resolves each coordinate
//! against an ordered list of repositories, verifies the download against
//! its declared SHA-256 checksum, optionally relocates its packages, caches
//! the result under the plugin's data directory and finally hands the jar to
//! the host's [`ClasspathInjector`] exactly once.
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use libload::{Config, Library, LibraryManager, Relocation, UrlClasspath};
//!
//! # async fn example() -> libload::Result<()> {
//! let classpath = Arc::new(UrlClasspath::new());
//! let mut manager = LibraryManager::new(classpath.clone(), Path::new("plugins/example"), Config::default())?;
//! manager.add_maven_central()?;
//!
//! let gson = Library::builder()
//!     .group_id("com.google.code.gson")
//!     .artifact_id("gson")
//!     .version("2.10.1")
//!     .relocate(Relocation::new("com.google.gson", "org.example.libs.gson"))
//!     .build()?;
//!
//! let report = manager.load_libraries(&[gson]).await;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod checksum;
pub mod classpath;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod host;
pub mod http;
pub mod library;
pub mod logging;
pub mod manager;
pub mod repository;

pub use cache::{CacheKey, LibraryCache};
pub use checksum::{verify_checksum, Checksum, ChecksumMismatch, Verification};
pub use classpath::{ClasspathInjector, InjectionError, UrlClasspath};
pub use config::{Config, ConfigLoader};
pub use descriptor::Descriptor;
pub use error::{LibraryError, Result};
pub use host::{Host, StandaloneHost};
pub use library::{Library, LibraryBuilder};
pub use logging::{LogLevel, Logger};
pub use manager::{LibraryManager, LoadEntry, LoadOutcome, LoadReport, Resolution};
pub use repository::{FailureReason, RepositoryFailure, Resolver};

pub use libload_relocator::{Relocation, RelocationError};
