//! dumpfs-overlay: the synthetic aggregate-file subsystem.
//!
//! ## Projection
//!
//! The overlay mirrors a source tree unchanged, except that a directory
//! matching the recognition policy is additionally presented as containing
//! one synthetic file — the concatenation of its member dumps:
//!
//! ```text
//! Source:
//!   backup/2024_01_01-00_00_00/databases/mysql/app/
//!     schema.sql   (100 B)
//!     data.sql     (5000 B)
//!
//! Projected:
//!   backup/2024_01_01-00_00_00/databases/mysql/app/
//!     schema.sql
//!     data.sql
//!     app_DB_DUMP.sql   (synthetic, 5100 B — the two dumps end to end)
//! ```
//!
//! The aggregate has no backing inode. Its name, size, timestamps and content
//! are re-derived from the live member set on every call; a directory whose
//! members all disappear simply stops offering the name.

pub mod attrs;
pub mod members;
pub mod policy;
pub mod reader;
pub mod translate;

use std::path::{Path, PathBuf};

use dumpfs_core::{DumpfsError, DumpfsResult};

pub use attrs::AggregateAttrs;
pub use members::{list_members, MemberFile};
pub use policy::AggregatePolicy;
pub use reader::read_range;
pub use translate::PathTranslator;

/// How a visible path is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// Delegate to the real entry at this translated path.
    Real(PathBuf),
    /// Project the aggregate of this (real) eligible directory.
    Synthetic { dir: PathBuf },
}

/// Translator + policy bundle: the non-FUSE half of the dispatcher.
///
/// Every query goes back to the live tree; the overlay holds no state about
/// directory contents.
#[derive(Debug)]
pub struct Overlay {
    translator: PathTranslator,
    policy: AggregatePolicy,
}

impl Overlay {
    pub fn new(root: impl Into<PathBuf>, policy: AggregatePolicy) -> Self {
        Overlay {
            translator: PathTranslator::new(root),
            policy,
        }
    }

    pub fn translator(&self) -> &PathTranslator {
        &self.translator
    }

    pub fn policy(&self) -> &AggregatePolicy {
        &self.policy
    }

    pub fn real_path(&self, visible: &str) -> PathBuf {
        self.translator.real_path(visible)
    }

    /// Decide whether `visible` denotes the synthetic aggregate of its parent
    /// directory: final component == parent directory name + marker, and the
    /// parent is currently eligible. Everything else is passthrough — even
    /// marker-suffixed names whose stem does not match their parent.
    pub async fn resolve(&self, visible: &str) -> Resolved {
        let real = self.real_path(visible);
        match self.synthetic_dir(&real).await {
            Some(dir) => Resolved::Synthetic { dir },
            None => Resolved::Real(real),
        }
    }

    async fn synthetic_dir(&self, real: &Path) -> Option<PathBuf> {
        // The mount root is never synthetic: its parent lies outside the
        // mirrored tree.
        if real == self.translator.root() {
            return None;
        }
        let name = real.file_name()?.to_str()?;
        let stem = self.policy.synthetic_stem(name)?;
        let parent = real.parent()?;
        if stem != parent.file_name()?.to_str()? {
            return None;
        }
        if !self.policy.is_eligible(parent).await {
            return None;
        }
        Some(parent.to_path_buf())
    }

    /// Aggregate attributes for an eligible directory.
    ///
    /// A directory with zero current members yields `NoSuchEntry`, consistent
    /// with `readdir` omitting the synthetic name — the projection simply
    /// does not exist at that instant.
    pub async fn synthetic_attrs(&self, dir: &Path) -> DumpfsResult<AggregateAttrs> {
        let members = list_members(dir, &self.policy).await?;
        if members.is_empty() {
            return Err(DumpfsError::NoSuchEntry(self.synthetic_path(dir)));
        }
        Ok(AggregateAttrs::synthesize(&members))
    }

    /// The extra entry a listing of `real_dir` must include, if any.
    pub async fn synthetic_entry(&self, real_dir: &Path) -> Option<String> {
        self.synthetic_dirent(real_dir).await.map(|(name, _)| name)
    }

    /// Name and attributes of the projected entry, for listings that reply
    /// with attributes inline. One enumeration serves both.
    pub async fn synthetic_dirent(&self, real_dir: &Path) -> Option<(String, AggregateAttrs)> {
        if !self.policy.is_eligible(real_dir).await {
            return None;
        }
        let members = list_members(real_dir, &self.policy).await.ok()?;
        if members.is_empty() {
            return None;
        }
        let name = real_dir.file_name()?.to_str()?;
        Some((
            self.policy.synthetic_name(name),
            AggregateAttrs::synthesize(&members),
        ))
    }

    /// Range read against the aggregate of `dir`. See [`reader::read_range`].
    pub async fn read_synthetic(
        &self,
        dir: &Path,
        offset: u64,
        length: usize,
    ) -> DumpfsResult<Vec<u8>> {
        reader::read_range(dir, &self.policy, offset, length).await
    }

    fn synthetic_path(&self, dir: &Path) -> PathBuf {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        dir.join(self.policy.synthetic_name(&name))
    }
}
