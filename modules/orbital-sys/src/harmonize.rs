//! Path harmonization: turning a raw `load` reference into a canonical
//! resource identifier.
//!
//! References come in four shapes:
//!
//! - external (`http://`, `https://`, `file://`): passed through untouched
//! - root-absolute (`/thing.json`): rejected as non-portable
//! - bare (`orbital/tick`): an opaque lookup key, no base applied
//! - relative (`./a.json`, `../b/`): resolved against the anchor, or the
//!   working root when there is none, and never allowed above the root
//!
//! A reference ending in `/` names a directory and gets the default manifest
//! name appended.

use std::path::{Path, PathBuf};

use url::Url;

use crate::config::{absolute_root, SysConfig};

pub const DEFAULT_INDEX: &str = "index.json";

const EXTERNAL_SCHEMES: [&str; 3] = ["http://", "https://", "file://"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HarmonizeError {
    #[error("empty resource reference")]
    Empty,

    #[error("not portable to start a resource at an absolute path: {0}")]
    Absolute(String),

    #[error("{reference} resolves above the root {root}")]
    EscapesRoot { reference: String, root: String },

    #[error("invalid anchor {anchor}: {reason}")]
    BadAnchor { anchor: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct Harmonizer {
    root: PathBuf,
    index: String,
}

impl Harmonizer {
    pub fn new(root: impl Into<PathBuf>, index: impl Into<String>) -> Self {
        Self {
            root: absolute_root(root.into()),
            index: index.into(),
        }
    }

    pub fn from_config(config: &SysConfig) -> Self {
        Self::new(config.root.clone(), config.index.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `reference` against `base` (the requesting entity's anchor).
    pub fn harmonize(&self, base: Option<&str>, reference: &str) -> Result<String, HarmonizeError> {
        if reference.is_empty() {
            return Err(HarmonizeError::Empty);
        }
        if is_external(reference) {
            return Ok(reference.to_string());
        }
        if reference.starts_with('/') {
            return Err(HarmonizeError::Absolute(reference.to_string()));
        }
        if !reference.starts_with('.') {
            return Ok(self.with_index(reference.to_string()));
        }
        match base {
            Some(anchor) if is_external(anchor) => self.join_url(anchor, reference),
            Some(anchor) => {
                let dir = self.anchor_dir(anchor)?;
                self.join_path(dir, reference)
            }
            None => self.join_path(Vec::new(), reference),
        }
    }

    /// Segments of the anchor's directory, relative to the root.
    fn anchor_dir(&self, anchor: &str) -> Result<Vec<String>, HarmonizeError> {
        let relative = if anchor.starts_with('/') {
            Path::new(anchor)
                .strip_prefix(&self.root)
                .map_err(|_| self.escapes(anchor))?
                .to_string_lossy()
                .into_owned()
        } else {
            anchor.to_string()
        };

        let mut dir = Vec::new();
        for segment in relative.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    dir.pop().ok_or_else(|| self.escapes(anchor))?;
                }
                name => dir.push(name.to_string()),
            }
        }
        // An anchor names a file unless it ends in a separator.
        if !anchor.ends_with('/') && !relative.is_empty() {
            dir.pop();
        }
        Ok(dir)
    }

    fn join_path(&self, mut stack: Vec<String>, reference: &str) -> Result<String, HarmonizeError> {
        for segment in reference.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    stack.pop().ok_or_else(|| self.escapes(reference))?;
                }
                name => stack.push(name.to_string()),
            }
        }
        if names_directory(reference) {
            stack.push(self.index.clone());
        }

        let root = self.root.to_string_lossy();
        let root = root.trim_end_matches('/');
        Ok(format!("{root}/{}", stack.join("/")))
    }

    fn join_url(&self, anchor: &str, reference: &str) -> Result<String, HarmonizeError> {
        let bad_anchor = |reason: String| HarmonizeError::BadAnchor {
            anchor: anchor.to_string(),
            reason,
        };
        let base = Url::parse(anchor).map_err(|e| bad_anchor(e.to_string()))?;
        let joined = base.join(reference).map_err(|e| bad_anchor(e.to_string()))?;

        if joined.scheme() == "file" {
            let inside = joined
                .to_file_path()
                .is_ok_and(|path| path.starts_with(&self.root));
            if !inside {
                return Err(self.escapes(reference));
            }
        }
        Ok(self.with_index(joined.to_string()))
    }

    fn with_index(&self, mut reference: String) -> String {
        if reference.ends_with('/') {
            reference.push_str(&self.index);
        }
        reference
    }

    fn escapes(&self, reference: &str) -> HarmonizeError {
        HarmonizeError::EscapesRoot {
            reference: reference.to_string(),
            root: self.root.display().to_string(),
        }
    }
}

fn is_external(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    EXTERNAL_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

fn names_directory(reference: &str) -> bool {
    matches!(reference.rsplit('/').next(), Some("" | "." | ".."))
}
