//! Visible-path → real-path translation.

use std::path::{Path, PathBuf};

/// Maps externally visible mount paths onto the mirrored source tree.
///
/// Stateless: every method is a pure function of the configured root, so the
/// translator can be shared freely across concurrent calls.
#[derive(Debug, Clone)]
pub struct PathTranslator {
    root: PathBuf,
}

impl PathTranslator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PathTranslator { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `/a/b` as seen through the mount → `{root}/a/b` on the source tree.
    pub fn real_path(&self, visible: &str) -> PathBuf {
        let rel = visible.trim_start_matches('/');
        if rel.is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    /// Rewrite a symlink target read from the source tree so it stays inside
    /// the mount: absolute targets under the root become root-relative,
    /// everything else passes through untouched.
    pub fn rewrite_link_target(&self, target: &Path) -> PathBuf {
        if target.is_absolute() {
            match target.strip_prefix(&self.root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => target.to_path_buf(),
            }
        } else {
            target.to_path_buf()
        }
    }
}
