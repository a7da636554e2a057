use std::env;
use std::path::{self, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::harmonize::DEFAULT_INDEX;

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct SysConfig {
    /// Relative load references never resolve above this directory.
    pub root: PathBuf,
    /// Manifest name appended to references that end in `/`.
    pub index: String,
    /// Timeout for `http://` and `https://` resources.
    pub http_timeout: Duration,
}

impl Default for SysConfig {
    fn default() -> Self {
        Self::new(env::current_dir().unwrap_or_else(|_| PathBuf::from("/")))
    }
}

impl SysConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: absolute_root(root.into()),
            index: DEFAULT_INDEX.to_string(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(root) = env::var("ORBITAL_ROOT") {
            config = config.with_root(root);
        }
        if let Ok(index) = env::var("ORBITAL_INDEX") {
            config.index = index;
        }
        if let Ok(secs) = env::var("ORBITAL_HTTP_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .context("ORBITAL_HTTP_TIMEOUT_SECS must be a number")?;
            config.http_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = absolute_root(root.into());
        self
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn log_summary(&self) {
        info!(
            root = %self.root.display(),
            index = self.index.as_str(),
            http_timeout_secs = self.http_timeout.as_secs(),
            "Orbital config"
        );
    }
}

/// Anchor a relative root at the working directory, so paths joined onto it
/// stay comparable with the anchors they produce.
pub(crate) fn absolute_root(root: PathBuf) -> PathBuf {
    if root.is_absolute() {
        return root;
    }
    path::absolute(&root)
        .or_else(|_| env::current_dir().map(|cwd| cwd.join(&root)))
        .unwrap_or(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_roots_are_made_absolute() {
        let cwd = env::current_dir().unwrap();
        assert_eq!(SysConfig::new("site").root, cwd.join("site"));
        assert_eq!(SysConfig::new("/srv/app").root, PathBuf::from("/srv/app"));
        assert_eq!(
            SysConfig::new("/srv/app").with_root("conf").root,
            cwd.join("conf")
        );
    }
}
