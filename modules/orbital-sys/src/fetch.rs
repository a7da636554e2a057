//! Resource fetching for the dynamic loader.
//!
//! A resource is anything a canonical identifier can name: a JSON manifest
//! on disk, a manifest served over HTTP, or a module registered in-process
//! under an opaque key. Fetching returns the resource's exports in order.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::submission::Submission;

/// Ordered `(export name, value)` pairs.
pub type Exports = Vec<(String, Submission)>;

/// Export name used when a manifest's top level is not an object.
pub const DEFAULT_EXPORT: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("unsupported resource: {0}")]
    Unsupported(String),

    #[error("failed to read {resource}: {source}")]
    Io {
        resource: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed manifest {resource}: {source}")]
    Malformed {
        resource: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("http fetch of {resource} failed: {source}")]
    Http {
        resource: String,
        #[source]
        source: reqwest::Error,
    },
}

#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, resource: &str) -> Result<Exports, FetchError>;
}

/// Turn a parsed manifest into exports. An object exports each key; any
/// other value is exported whole under [`DEFAULT_EXPORT`].
pub fn manifest_exports(manifest: Value) -> Exports {
    match manifest {
        Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| (key, Submission::from(value)))
            .collect(),
        other => vec![(DEFAULT_EXPORT.to_string(), Submission::from(other))],
    }
}

// ---------------------------------------------------------------------------
// Resource kinds
// ---------------------------------------------------------------------------

/// What kind of resource an identifier names. Decided from the string alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResourceKind {
    Http,
    File(PathBuf),
    Module,
}

pub(crate) fn detect_resource(resource: &str) -> Result<ResourceKind, FetchError> {
    let lower = resource.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Ok(ResourceKind::Http);
    }
    if lower.starts_with("file://") {
        let path = Url::parse(resource)
            .ok()
            .and_then(|url| url.to_file_path().ok())
            .ok_or_else(|| FetchError::Unsupported(resource.to_string()))?;
        return Ok(ResourceKind::File(path));
    }
    if resource.starts_with('/') {
        return Ok(ResourceKind::File(PathBuf::from(resource)));
    }
    Ok(ResourceKind::Module)
}

// ---------------------------------------------------------------------------
// FileFetcher
// ---------------------------------------------------------------------------

/// Reads JSON manifests from disk.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher;

#[async_trait]
impl ResourceFetcher for FileFetcher {
    async fn fetch(&self, resource: &str) -> Result<Exports, FetchError> {
        let path = match detect_resource(resource)? {
            ResourceKind::File(path) => path,
            _ => return Err(FetchError::Unsupported(resource.to_string())),
        };
        let bytes = tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                FetchError::NotFound(resource.to_string())
            } else {
                FetchError::Io {
                    resource: resource.to_string(),
                    source,
                }
            }
        })?;
        let manifest: Value =
            serde_json::from_slice(&bytes).map_err(|source| FetchError::Malformed {
                resource: resource.to_string(),
                source,
            })?;
        Ok(manifest_exports(manifest))
    }
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// Fetches JSON manifests over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, resource: &str) -> Result<Exports, FetchError> {
        let http = |source| FetchError::Http {
            resource: resource.to_string(),
            source,
        };
        let resp = self
            .client
            .get(resource)
            .header("User-Agent", "orbital-sys/0.1")
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(http)?;
        let bytes = resp.bytes().await.map_err(http)?;
        let manifest: Value =
            serde_json::from_slice(&bytes).map_err(|source| FetchError::Malformed {
                resource: resource.to_string(),
                source,
            })?;
        Ok(manifest_exports(manifest))
    }
}

// ---------------------------------------------------------------------------
// ModuleRegistry
// ---------------------------------------------------------------------------

/// Builds one export value. Called once per fetch.
pub type ExportFactory = Arc<dyn Fn() -> Submission + Send + Sync>;

/// A named set of exports defined in code.
///
/// Exports are factories rather than values: every engine that loads the
/// module gets its own entities and its own resolver state.
#[derive(Clone, Default)]
pub struct Module {
    exports: Vec<(String, ExportFactory)>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export<F, T>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Into<Submission>,
    {
        let build: ExportFactory = Arc::new(move || -> Submission { factory().into() });
        self.exports.push((key.into(), build));
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.exports.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    /// A fresh set of exports, in definition order.
    pub fn build(&self) -> Exports {
        self.exports
            .iter()
            .map(|(key, factory)| (key.clone(), factory()))
            .collect()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("exports", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// In-process modules addressed by opaque keys such as `orbital/tick`.
///
/// Cheap to clone; clones share the same table, so modules defined after
/// an engine is built are still visible to it.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: Arc<RwLock<HashMap<String, Module>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(self, name: impl Into<String>, module: Module) -> Self {
        self.define(name, module);
        self
    }

    pub fn define(&self, name: impl Into<String>, module: Module) {
        let name = name.into();
        info!(module = name.as_str(), exports = module.len(), "Module defined");
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, module);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

#[async_trait]
impl ResourceFetcher for ModuleRegistry {
    async fn fetch(&self, resource: &str) -> Result<Exports, FetchError> {
        let module = self
            .modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(resource)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(resource.to_string()))?;
        Ok(module.build())
    }
}

// ---------------------------------------------------------------------------
// RoutingFetcher
// ---------------------------------------------------------------------------

/// Default fetcher: picks files, HTTP or modules by resource kind.
#[derive(Debug, Clone)]
pub struct RoutingFetcher {
    files: FileFetcher,
    http: Option<HttpFetcher>,
    modules: ModuleRegistry,
}

impl RoutingFetcher {
    pub fn new(http_timeout: Duration, modules: ModuleRegistry) -> Self {
        let http = match HttpFetcher::new(http_timeout) {
            Ok(http) => Some(http),
            Err(e) => {
                warn!(error = %e, "HTTP client unavailable; http resources will fail");
                None
            }
        };
        Self {
            files: FileFetcher,
            http,
            modules,
        }
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }
}

#[async_trait]
impl ResourceFetcher for RoutingFetcher {
    async fn fetch(&self, resource: &str) -> Result<Exports, FetchError> {
        match detect_resource(resource)? {
            ResourceKind::Http => match &self.http {
                Some(http) => http.fetch(resource).await,
                None => Err(FetchError::Unsupported(resource.to_string())),
            },
            ResourceKind::File(_) => self.files.fetch(resource).await,
            ResourceKind::Module => self.modules.fetch(resource).await,
        }
    }
}
