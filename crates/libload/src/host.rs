//! The environment a manager runs in.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::classpath::{ClasspathInjector, UrlClasspath};

/// Descriptor resource read by [`StandaloneHost`] unless told otherwise
pub const DEFAULT_DESCRIPTOR: &str = "libraries.json";

/// What a plugin host provides to its library manager.
pub trait Host: Send + Sync {
    /// Used as the logging target
    fn name(&self) -> &str;

    /// Directory the cache lives under
    fn data_directory(&self) -> PathBuf;

    /// Where non-isolated libraries are injected
    fn injector(&self) -> Arc<dyn ClasspathInjector>;

    /// Open a resource bundled with the plugin, `Ok(None)` if it does not exist
    fn open_resource(&self, name: &str) -> io::Result<Option<Box<dyn Read + Send>>>;

    /// Name of the descriptor resource loaded by default
    fn default_descriptor(&self) -> &str {
        DEFAULT_DESCRIPTOR
    }
}

/// A host backed by plain directories, for applications that load libraries
/// into their own URL classpath.
#[derive(Debug)]
pub struct StandaloneHost {
    name: String,
    data_directory: PathBuf,
    resource_directory: PathBuf,
    descriptor: String,
    classpath: Arc<UrlClasspath>,
}

impl StandaloneHost {
    pub fn new(
        name: impl Into<String>,
        data_directory: impl Into<PathBuf>,
        resource_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            data_directory: data_directory.into(),
            resource_directory: resource_directory.into(),
            descriptor: DEFAULT_DESCRIPTOR.to_string(),
            classpath: Arc::new(UrlClasspath::new()),
        }
    }

    pub fn with_descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.descriptor = descriptor.into();
        self
    }

    /// The classpath non-isolated libraries end up on
    pub fn classpath(&self) -> Arc<UrlClasspath> {
        Arc::clone(&self.classpath)
    }

    fn resource_path(&self, name: &str) -> io::Result<PathBuf> {
        let relative = Path::new(name);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("resource name {name:?} must be a plain relative path"),
            ));
        }
        Ok(self.resource_directory.join(relative))
    }
}

impl Host for StandaloneHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn data_directory(&self) -> PathBuf {
        self.data_directory.clone()
    }

    fn injector(&self) -> Arc<dyn ClasspathInjector> {
        self.classpath()
    }

    fn open_resource(&self, name: &str) -> io::Result<Option<Box<dyn Read + Send>>> {
        match File::open(self.resource_path(name)?) {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn default_descriptor(&self) -> &str {
        &self.descriptor
    }
}
