//! The library manager: resolve, verify, relocate, cache and inject.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::cache::{CacheKey, LibraryCache};
use crate::checksum::{Checksum, Verification};
use crate::classpath::{ClasspathInjector, UrlClasspath};
use crate::config::Config;
use crate::descriptor::Descriptor;
use crate::host::Host;
use crate::http::HttpClient;
use crate::library::Library;
use crate::logging::{LogLevel, Logger};
use crate::repository::{self, Resolver, JITPACK, MAVEN_CENTRAL, SONATYPE};
use crate::{LibraryError, Result};

/// Where a library's final file is and how it got there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path: PathBuf,
    /// Repository the artifact was downloaded from, `None` when it came from
    /// the cache
    pub source_repository: Option<String>,
    pub from_cache: bool,
    /// Whether the bytes were checked against a declared checksum
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(Resolution),
    /// An identical library was injected earlier; nothing was done
    AlreadyLoaded,
}

#[derive(Debug)]
pub struct LoadEntry {
    pub library: String,
    pub result: Result<LoadOutcome>,
}

impl LoadEntry {
    pub fn resolution(&self) -> Option<&Resolution> {
        match &self.result {
            Ok(LoadOutcome::Loaded(resolution)) => Some(resolution),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&LibraryError> {
        self.result.as_ref().err()
    }
}

/// Per-library outcome of a batch load, in declared order.
#[derive(Debug, Default)]
pub struct LoadReport {
    entries: Vec<LoadEntry>,
}

impl LoadReport {
    fn push(&mut self, library: String, result: Result<LoadOutcome>) {
        self.entries.push(LoadEntry { library, result });
    }

    pub fn entries(&self) -> &[LoadEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.entries.iter().all(|entry| entry.result.is_ok())
    }

    pub fn get(&self, library: &str) -> Option<&LoadEntry> {
        self.entries.iter().find(|entry| entry.library == library)
    }

    pub fn failures(&self) -> impl Iterator<Item = &LoadEntry> {
        self.entries.iter().filter(|entry| entry.result.is_err())
    }

    pub fn loaded(&self) -> impl Iterator<Item = &LoadEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.resolution().is_some())
    }

    /// Libraries loaded without a declared checksum
    pub fn unverified(&self) -> impl Iterator<Item = &LoadEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.resolution().is_some_and(|r| !r.verified))
    }
}

/// Loads libraries for one plugin.
///
/// Repository configuration takes `&mut self` and is expected to happen
/// before loading. Loading takes `&self` and may run concurrently; each
/// library is injected at most once per manager.
pub struct LibraryManager {
    cache: LibraryCache,
    resolver: Resolver,
    repositories: Vec<String>,
    fallback_repository: Option<String>,
    injector: Arc<dyn ClasspathInjector>,
    injected: Mutex<HashSet<String>>,
    isolated: Mutex<HashMap<String, Arc<UrlClasspath>>>,
    host: Option<Arc<dyn Host>>,
    logger: Logger,
    verify_cached: bool,
}

impl LibraryManager {
    /// Create a manager caching under `data_directory/<directory-name>`.
    pub fn new(
        injector: Arc<dyn ClasspathInjector>,
        data_directory: &Path,
        config: Config,
    ) -> Result<Self> {
        let logger = Logger::new("libload", config.log_level);
        let http = Arc::new(HttpClient::with_config(config.http_config())?);

        let fallback_repository = match &config.fallback_repository {
            Some(url) => Some(normalize(url)?),
            None => None,
        };

        let mut manager = Self {
            cache: LibraryCache::new(data_directory.join(&config.directory_name)),
            resolver: Resolver::new(http, logger.clone()),
            repositories: Vec::new(),
            fallback_repository,
            injector,
            injected: Mutex::new(HashSet::new()),
            isolated: Mutex::new(HashMap::new()),
            host: None,
            logger,
            verify_cached: config.verify_cached,
        };

        for url in &config.repositories {
            manager.add_repository(url)?;
        }

        Ok(manager)
    }

    /// Create a manager for a plugin host: its data directory, its injector
    /// and its name as the logging target.
    pub fn for_host(host: Arc<dyn Host>, config: Config) -> Result<Self> {
        let level = config.log_level;
        let mut manager = Self::new(host.injector(), &host.data_directory(), config)?;
        manager.set_logger(Logger::new(host.name(), level));
        manager.host = Some(host);
        Ok(manager)
    }

    fn set_logger(&mut self, logger: Logger) {
        self.resolver.set_logger(logger.clone());
        self.logger = logger;
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn set_log_level(&mut self, level: LogLevel) {
        let mut logger = self.logger.clone();
        logger.set_level(level);
        self.set_logger(logger);
    }

    /// Directory libraries are cached in
    pub fn save_directory(&self) -> &Path {
        self.cache.root()
    }

    /// Manager-level repositories, in the order they are tried
    pub fn repositories(&self) -> &[String] {
        &self.repositories
    }

    /// Append a repository. Adding one that is already present keeps its
    /// original position.
    pub fn add_repository(&mut self, url: &str) -> Result<()> {
        let url = normalize(url)?;
        if !self.repositories.contains(&url) {
            self.logger.debug(format_args!("Added repository {}", url));
            self.repositories.push(url);
        }
        Ok(())
    }

    /// Add a repository ahead of all others, moving it if already present.
    pub fn add_repository_with_priority(&mut self, url: &str) -> Result<()> {
        let url = normalize(url)?;
        self.repositories.retain(|existing| *existing != url);
        self.logger.debug(format_args!("Added priority repository {}", url));
        self.repositories.insert(0, url);
        Ok(())
    }

    pub fn add_maven_central(&mut self) -> Result<()> {
        self.add_repository(MAVEN_CENTRAL)
    }

    pub fn add_sonatype(&mut self) -> Result<()> {
        self.add_repository(SONATYPE)
    }

    pub fn add_jitpack(&mut self) -> Result<()> {
        self.add_repository(JITPACK)
    }

    /// Add the local Maven repository (`~/.m2/repository`)
    pub fn add_maven_local(&mut self) -> Result<()> {
        let url = repository::maven_local().ok_or_else(|| {
            LibraryError::Config("cannot locate the home directory for ~/.m2/repository".to_string())
        })?;
        self.add_repository(&url)
    }

    /// Classpath for libraries loaded in isolation under `loader_id`,
    /// created on first use.
    pub fn isolated_classpath(&self, loader_id: &str) -> Arc<UrlClasspath> {
        let mut isolated = self.isolated.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            isolated
                .entry(loader_id.to_string())
                .or_insert_with(|| Arc::new(UrlClasspath::new())),
        )
    }

    pub fn is_loaded(&self, library: &Library) -> bool {
        self.injected_keys().contains(&library.injection_key())
    }

    fn injected_keys(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.injected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Produce the final local file for `library` without injecting it.
    ///
    /// A cached final file short-circuits everything else. Otherwise the
    /// artifact is taken from the cache or downloaded and verified, then
    /// relocated when the library has rules.
    pub async fn resolve(&self, library: &Library) -> Result<Resolution> {
        let final_key = CacheKey::for_library(library);
        if self.usable_cache_entry(library, &final_key).await? {
            let path = self.cache.path(&final_key);
            self.logger
                .debug(format_args!("Using cached {} at {}", library, path.display()));
            return Ok(Resolution {
                path,
                source_repository: None,
                from_cache: true,
                verified: self.cached_artifact_verified(library),
            });
        }

        let artifact_key = CacheKey::artifact(library);
        let (bytes, source_repository, verified) =
            if self.usable_cache_entry(library, &artifact_key).await? {
                let bytes = self.cache.read(&artifact_key).await?;
                (bytes, None, self.cached_artifact_verified(library))
            } else {
                let fetched = self
                    .resolver
                    .resolve(library, &self.repositories, self.fallback_repository.as_deref())
                    .await?;
                if fetched.verification == Verification::Unverified {
                    self.logger.warn(format_args!(
                        "UNVERIFIED: {} has no checksum; trusting the download from {}",
                        library, fetched.repository
                    ));
                }
                let (path, verified) = match (fetched.verification, library.checksum()) {
                    (Verification::Verified, Some(checksum)) => {
                        self.cache
                            .write_verified(&artifact_key, &fetched.bytes, checksum)?
                    }
                    _ => (self.cache.write(&artifact_key, &fetched.bytes)?, false),
                };
                self.logger
                    .debug(format_args!("Saved {} to {}", library, path.display()));
                (fetched.bytes, Some(fetched.repository), verified)
            };

        let from_cache = source_repository.is_none();
        let Some(relocated_key) = CacheKey::relocated(library) else {
            return Ok(Resolution {
                path: self.cache.path(&artifact_key),
                source_repository,
                from_cache,
                verified,
            });
        };

        let relocated = libload_relocator::relocate(&bytes, library.relocations()).map_err(
            |source| LibraryError::Relocation {
                library: library.id(),
                source,
            },
        )?;
        let path = self.cache.write(&relocated_key, &relocated)?;
        self.logger
            .debug(format_args!("Relocated {} to {}", library, path.display()));

        Ok(Resolution {
            path,
            source_repository,
            from_cache,
            verified,
        })
    }

    /// Whether the cached artifact was checked against the library's
    /// declared checksum, now or when it was downloaded.
    fn cached_artifact_verified(&self, library: &Library) -> bool {
        library
            .checksum()
            .is_some_and(|checksum| self.cache.is_verified(&CacheKey::artifact(library), checksum))
    }

    /// Whether `key` is cached and, with `verify-cached`, still matches the
    /// declared checksum. A mismatching file is deleted.
    async fn usable_cache_entry(&self, library: &Library, key: &CacheKey) -> Result<bool> {
        if !self.cache.has(key) {
            return Ok(false);
        }

        let expected = match library.checksum() {
            Some(expected) if self.verify_cached && *key == CacheKey::artifact(library) => expected,
            _ => return Ok(true),
        };

        let actual = Checksum::of_file(&self.cache.path(key)).await?;
        if actual == *expected {
            self.cache.record_checksum(key, expected)?;
            return Ok(true);
        }

        self.logger.warn(format_args!(
            "Cached {} does not match its checksum (expected {}, got {}), downloading again",
            library, expected, actual
        ));
        self.cache.remove(key)?;
        Ok(false)
    }

    fn injection_target(&self, library: &Library) -> Arc<dyn ClasspathInjector> {
        match library.loader_id() {
            Some(loader_id) if library.isolated_load() => {
                self.isolated_classpath(loader_id) as Arc<dyn ClasspathInjector>
            }
            _ => Arc::clone(&self.injector),
        }
    }

    /// Resolve `library` and inject it, once.
    ///
    /// Loading the same library again, even concurrently, returns
    /// [`LoadOutcome::AlreadyLoaded`] without a second injection.
    pub async fn load_library(&self, library: &Library) -> Result<LoadOutcome> {
        let key = library.injection_key();
        if self.injected_keys().contains(&key) {
            self.logger
                .debug(format_args!("{} is already loaded", library));
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        let resolution = self.resolve(library).await?;
        let target = self.injection_target(library);

        {
            let mut injected = self.injected_keys();
            if injected.contains(&key) {
                return Ok(LoadOutcome::AlreadyLoaded);
            }
            target
                .inject(&resolution.path)
                .map_err(|source| LibraryError::Injection {
                    library: library.id(),
                    source,
                })?;
            injected.insert(key);
        }

        self.logger.info(format_args!(
            "Loaded {}{}",
            library,
            library
                .loader_id()
                .filter(|_| library.isolated_load())
                .map(|id| format!(" into isolated loader {id}"))
                .unwrap_or_default()
        ));
        Ok(LoadOutcome::Loaded(resolution))
    }

    /// Load libraries in order. A failure is recorded in the report and
    /// does not stop the libraries after it.
    pub async fn load_libraries(&self, libraries: &[Library]) -> LoadReport {
        let mut report = LoadReport::default();
        for library in libraries {
            let result = self.load_library(library).await;
            if let Err(err) = &result {
                self.logger
                    .error(format_args!("Failed to load {}: {}", library, err));
            }
            report.push(library.id(), result);
        }
        self.log_summary(&report);
        report
    }

    /// [`load_libraries`](Self::load_libraries) for callers without an async
    /// runtime. Must not be called from inside one.
    pub fn load_libraries_blocking(&self, libraries: &[Library]) -> Result<LoadReport> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(runtime.block_on(self.load_libraries(libraries)))
    }

    /// Load everything a descriptor declares.
    ///
    /// Its repositories are added to this manager first. Every entry is
    /// validated before anything is downloaded; invalid entries show up in
    /// the report as configuration errors.
    pub async fn load_descriptor(&mut self, descriptor: &Descriptor) -> Result<LoadReport> {
        for url in &descriptor.repositories {
            self.add_repository(url)?;
        }

        let libraries = descriptor.libraries();
        for (label, result) in &libraries {
            if let Err(err) = result {
                self.logger
                    .error(format_args!("Invalid library {}: {}", label, err));
            }
        }

        let mut report = LoadReport::default();
        for (label, result) in libraries {
            match result {
                Ok(library) => {
                    let result = self.load_library(&library).await;
                    if let Err(err) = &result {
                        self.logger
                            .error(format_args!("Failed to load {}: {}", library, err));
                    }
                    report.push(library.id(), result);
                }
                Err(err) => report.push(label, Err(err)),
            }
        }
        self.log_summary(&report);
        Ok(report)
    }

    /// Parse a JSON descriptor and load it
    pub async fn load_descriptor_from<R: Read>(&mut self, reader: R) -> Result<LoadReport> {
        let descriptor = Descriptor::from_reader(reader)?;
        self.load_descriptor(&descriptor).await
    }

    /// Load the host's default descriptor resource
    pub async fn load_default_descriptor(&mut self) -> Result<LoadReport> {
        let name = self.host()?.default_descriptor().to_string();
        self.load_descriptor_resource(&name).await
    }

    /// Load a descriptor bundled as a host resource. A missing resource
    /// loads nothing.
    pub async fn load_descriptor_resource(&mut self, name: &str) -> Result<LoadReport> {
        let Some(reader) = self.host()?.open_resource(name)? else {
            self.logger
                .debug(format_args!("No descriptor {} to load", name));
            return Ok(LoadReport::default());
        };
        let descriptor = Descriptor::from_reader(reader)?;
        self.load_descriptor(&descriptor).await
    }

    fn host(&self) -> Result<&Arc<dyn Host>> {
        self.host.as_ref().ok_or_else(|| {
            LibraryError::Config("descriptor resources need a manager created for a host".to_string())
        })
    }

    fn log_summary(&self, report: &LoadReport) {
        let unverified: Vec<&str> = report
            .unverified()
            .map(|entry| entry.library.as_str())
            .collect();
        if !unverified.is_empty() {
            self.logger.warn(format_args!(
                "UNVERIFIED: {} loaded without a checksum: {}",
                unverified.len(),
                unverified.join(", ")
            ));
        }

        let failed = report.failures().count();
        if failed > 0 {
            self.logger.error(format_args!(
                "{} of {} libraries failed to load",
                failed,
                report.len()
            ));
        }
    }
}

fn normalize(url: &str) -> Result<String> {
    repository::normalize_repository(url).map_err(|source| LibraryError::InvalidRepository {
        url: url.to_string(),
        source,
    })
}
