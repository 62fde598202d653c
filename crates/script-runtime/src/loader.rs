//! Resource loaders: identifier in, bytes out.

use std::collections::HashMap;
use std::path::PathBuf;

use splice_common::error::{SpliceError, SpliceResult};

/// Resolves a resource identifier (path or URL) to its bytes.
pub trait ResourceLoader: Send + 'static {
    fn load(&self, resource: &str) -> SpliceResult<Vec<u8>>;
}

/// Reads plain paths and `file://` URLs, resolving relative ones against a root.
#[derive(Debug, Clone)]
pub struct FileLoader {
    root: PathBuf,
}

impl FileLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, resource: &str) -> PathBuf {
        let raw = resource.strip_prefix("file://").unwrap_or(resource);
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            path
        } else {
            self.root.join(path)
        }
    }
}

impl ResourceLoader for FileLoader {
    fn load(&self, resource: &str) -> SpliceResult<Vec<u8>> {
        let path = self.resolve(resource);
        if !path.exists() {
            return Err(SpliceError::ResourceNotFound { path });
        }
        Ok(std::fs::read(&path)?)
    }
}

/// In-memory resources keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    resources: HashMap<String, Vec<u8>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resource: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.resources.insert(resource.into(), bytes.into());
        self
    }
}

impl ResourceLoader for MemoryLoader {
    fn load(&self, resource: &str) -> SpliceResult<Vec<u8>> {
        self.resources
            .get(resource)
            .cloned()
            .ok_or_else(|| SpliceError::ResourceNotFound {
                path: PathBuf::from(resource),
            })
    }
}
