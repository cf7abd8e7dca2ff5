//! Aggregate recognition policy — which directories expose a synthetic dump
//! file, which of their entries contribute to it, and what it is called.

use std::path::Path;

use dumpfs_core::config::OverlayConfig;
use dumpfs_core::{DumpfsError, DumpfsResult};
use regex::Regex;

/// Decides eligibility and naming for synthetic aggregate files.
///
/// Holds no mutable state and never memoizes: the underlying tree is mutable
/// by entities outside this process, so every decision is re-derived from the
/// live path at call time.
#[derive(Debug)]
pub struct AggregatePolicy {
    member_suffix: String,
    marker: String,
    /// `None` when strict path validation is disabled — any directory is
    /// eligible then.
    pattern: Option<Regex>,
}

impl AggregatePolicy {
    /// Build a policy from configuration, rejecting marker choices that make
    /// synthetic names ambiguous with real member names.
    pub fn from_config(cfg: &OverlayConfig) -> DumpfsResult<Self> {
        if cfg.member_suffix.is_empty() {
            return Err(DumpfsError::Config("member_suffix must not be empty".into()));
        }
        if cfg.synthetic_marker.is_empty() {
            return Err(DumpfsError::Config("synthetic_marker must not be empty".into()));
        }
        if cfg.synthetic_marker.contains('/') {
            return Err(DumpfsError::Config(
                "synthetic_marker must not contain path separators".into(),
            ));
        }
        if cfg.synthetic_marker == cfg.member_suffix {
            // every member name would also parse as a synthetic name
            return Err(DumpfsError::Config(format!(
                "synthetic_marker {:?} equals member_suffix; aggregate names would be ambiguous",
                cfg.synthetic_marker
            )));
        }

        let pattern = if cfg.strict_path_validation {
            let re = Regex::new(&cfg.path_validation_pattern).map_err(|e| {
                DumpfsError::Config(format!(
                    "invalid path_validation_pattern {:?}: {e}",
                    cfg.path_validation_pattern
                ))
            })?;
            Some(re)
        } else {
            None
        };

        Ok(AggregatePolicy {
            member_suffix: cfg.member_suffix.clone(),
            marker: cfg.synthetic_marker.clone(),
            pattern,
        })
    }

    pub fn member_suffix(&self) -> &str {
        &self.member_suffix
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// True for names that contribute to the aggregate. A name ending with
    /// the synthetic marker is excluded even when it also carries the member
    /// suffix: a real file named like the aggregate is shadowed by the
    /// projection and must never count as its own member.
    pub fn is_member(&self, name: &str) -> bool {
        name.ends_with(&self.member_suffix) && !name.ends_with(&self.marker)
    }

    /// The synthetic filename projected into a directory: `app` → `app_DB_DUMP.sql`.
    pub fn synthetic_name(&self, dir_name: &str) -> String {
        format!("{dir_name}{}", self.marker)
    }

    /// Invert [`synthetic_name`]: `app_DB_DUMP.sql` → `app`. `None` when the
    /// name cannot be a synthetic name.
    ///
    /// [`synthetic_name`]: Self::synthetic_name
    pub fn synthetic_stem<'a>(&self, name: &'a str) -> Option<&'a str> {
        name.strip_suffix(self.marker.as_str()).filter(|s| !s.is_empty())
    }

    /// Structural check only — does the real path have the recognized shape?
    pub fn matches_pattern(&self, real_dir: &Path) -> bool {
        match &self.pattern {
            None => true,
            Some(re) => re.is_match(&real_dir.to_string_lossy()),
        }
    }

    /// A directory may expose an aggregate when it currently is a directory
    /// and (under strict validation) its real path matches the configured
    /// shape. Re-evaluated on every call; never cached.
    pub async fn is_eligible(&self, real_dir: &Path) -> bool {
        if !self.matches_pattern(real_dir) {
            return false;
        }
        match tokio::fs::metadata(real_dir).await {
            Ok(meta) => meta.is_dir(),
            Err(_) => false,
        }
    }
}
