use serde::{Deserialize, Serialize};

/// Top-level configuration (loaded from dumpfs.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpfsConfig {
    pub overlay: OverlayConfig,
    pub mount: MountConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Filename suffix that marks a member file (default: ".sql")
    pub member_suffix: String,
    /// Token appended to a directory name to form the synthetic aggregate
    /// filename (default: "_DB_DUMP.sql")
    pub synthetic_marker: String,
    /// Require directory paths to match `path_validation_pattern` before they
    /// may expose an aggregate (default: true)
    pub strict_path_validation: bool,
    /// Regex a directory's real path must match when strict validation is on
    pub path_validation_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Reject every mutating operation on the whole mount (default: false)
    pub read_only: bool,
    /// Allow access by users other than the mounting one (default: true)
    pub allow_other: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Default shape of a dated backup tree: `2024_01_01-00_00_00/databases/mysql/app/`
pub const DEFAULT_PATH_PATTERN: &str =
    r"\d{4}_\d{2}_\d{2}-\d{2}_\d{2}_\d{2}/databases/(psql|mysql)/(.*)";

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            member_suffix: ".sql".into(),
            synthetic_marker: "_DB_DUMP.sql".into(),
            strict_path_validation: true,
            path_validation_pattern: DEFAULT_PATH_PATTERN.into(),
        }
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            allow_other: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[overlay]
member_suffix = ".dump"
synthetic_marker = "_ALL.dump"
strict_path_validation = false
path_validation_pattern = 'backups/.*'

[mount]
read_only = true
allow_other = false

[log]
level = "debug"
format = "json"
"#;
        let config: DumpfsConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.overlay.member_suffix, ".dump");
        assert_eq!(config.overlay.synthetic_marker, "_ALL.dump");
        assert!(!config.overlay.strict_path_validation);
        assert_eq!(config.overlay.path_validation_pattern, "backups/.*");
        assert!(config.mount.read_only);
        assert!(!config.mount.allow_other);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config: DumpfsConfig = toml::from_str("").unwrap();

        assert_eq!(config.overlay.member_suffix, ".sql");
        assert_eq!(config.overlay.synthetic_marker, "_DB_DUMP.sql");
        assert!(config.overlay.strict_path_validation);
        assert_eq!(config.overlay.path_validation_pattern, DEFAULT_PATH_PATTERN);
        assert!(!config.mount.read_only);
        assert!(config.mount.allow_other);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "text");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[mount]
read_only = true
"#;
        let config: DumpfsConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert!(config.mount.read_only);
        // Defaults
        assert!(config.mount.allow_other);
        assert_eq!(config.overlay.member_suffix, ".sql");
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = DumpfsConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: DumpfsConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.overlay.member_suffix, parsed.overlay.member_suffix);
        assert_eq!(config.overlay.synthetic_marker, parsed.overlay.synthetic_marker);
        assert_eq!(config.mount.read_only, parsed.mount.read_only);
    }
}
