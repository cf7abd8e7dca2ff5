//! dumpfs: present database dump directories as single concatenated files
//!
//! Commands:
//!   mount <source> <mountpoint>  - mirror <source> with aggregate projection
//!   unmount <mountpoint>         - unmount a dumpfs mountpoint
//!   config show                  - display the merged configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::warn;

use dumpfs_core::config::DumpfsConfig;
#[cfg(feature = "fuse")]
use dumpfs_overlay::{AggregatePolicy, Overlay};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "dumpfs",
    version,
    about = "Aggregate dump filesystem",
    long_about = "dumpfs: mirror a backup tree over FUSE, presenting every recognized \
                  database dump directory with one synthetic concatenated dump file"
)]
struct Cli {
    /// Path to dumpfs.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "DUMPFS_CONFIG",
        default_value = "/etc/dumpfs/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "DUMPFS_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides the config file
    #[arg(long, env = "DUMPFS_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mount a source tree with aggregate dump projection (requires FUSE)
    #[cfg(feature = "fuse")]
    Mount {
        /// Source directory to mirror
        source: PathBuf,
        /// Local mountpoint
        mountpoint: PathBuf,
        /// Reject every mutating operation on the mount
        #[arg(long)]
        read_only: bool,
        /// Recognize any directory with dumps, not just dated backup paths
        #[arg(long)]
        no_strict_paths: bool,
    },

    /// Unmount a dumpfs mountpoint (requires FUSE)
    #[cfg(feature = "fuse")]
    Unmount {
        /// Local mountpoint to unmount
        mountpoint: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

// Single-threaded runtime: filesystem calls are dispatched one at a time, so
// a getattr/read pair never interleaves with another in-flight aggregate walk.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(level, &format);

    if !cli.config.exists() {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    match cli.command {
        #[cfg(feature = "fuse")]
        Commands::Mount {
            source,
            mountpoint,
            read_only,
            no_strict_paths,
        } => cmd_mount(&config, &source, &mountpoint, read_only, no_strict_paths).await,
        #[cfg(feature = "fuse")]
        Commands::Unmount { mountpoint } => cmd_unmount(&mountpoint),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<DumpfsConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(DumpfsConfig::default())
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}

// ── `dumpfs mount` ────────────────────────────────────────────────────────────

#[cfg(feature = "fuse")]
async fn cmd_mount(
    config: &DumpfsConfig,
    source: &Path,
    mountpoint: &Path,
    read_only: bool,
    no_strict_paths: bool,
) -> Result<()> {
    let source = tokio::fs::canonicalize(source)
        .await
        .with_context(|| format!("resolving source: {}", source.display()))?;
    let meta = tokio::fs::metadata(&source)
        .await
        .with_context(|| format!("reading source: {}", source.display()))?;
    anyhow::ensure!(meta.is_dir(), "source is not a directory: {}", source.display());

    let mut overlay_cfg = config.overlay.clone();
    if no_strict_paths {
        overlay_cfg.strict_path_validation = false;
    }
    let policy =
        AggregatePolicy::from_config(&overlay_cfg).context("building aggregate policy")?;
    let overlay = Overlay::new(&source, policy);

    // Ensure mountpoint exists
    tokio::fs::create_dir_all(mountpoint)
        .await
        .with_context(|| format!("creating mountpoint: {}", mountpoint.display()))?;

    let read_only = read_only || config.mount.read_only;

    println!(
        "Mounting {} → {}{}",
        source.display(),
        mountpoint.display(),
        if read_only { " (read-only)" } else { "" }
    );
    println!(
        "Press Ctrl-C or run `dumpfs unmount {}` to stop.",
        mountpoint.display()
    );

    dumpfs_fuse::mount(dumpfs_fuse::MountConfig {
        overlay,
        mountpoint: mountpoint.to_path_buf(),
        read_only,
        allow_other: config.mount.allow_other,
    })
    .await
    .context("FUSE mount failed")
}

// ── `dumpfs unmount` (requires fuse feature) ──────────────────────────────────

#[cfg(feature = "fuse")]
fn cmd_unmount(mountpoint: &Path) -> Result<()> {
    // macOS: use umount directly (works with FUSE-T and macFUSE)
    // Linux: use fusermount3 first, fall back to umount
    #[cfg(target_os = "macos")]
    {
        let status = std::process::Command::new("umount")
            .arg(mountpoint)
            .status();
        match status {
            Ok(s) if s.success() => {
                println!("Unmounted: {}", mountpoint.display());
                Ok(())
            }
            Ok(s) => anyhow::bail!(
                "umount exited {}: try `diskutil unmount {}`",
                s,
                mountpoint.display()
            ),
            Err(e) => anyhow::bail!("failed to run umount: {e}"),
        }
    }

    #[cfg(not(target_os = "macos"))]
    {
        let status = std::process::Command::new("fusermount3")
            .args(["-u", &mountpoint.to_string_lossy()])
            .status();

        match status {
            Ok(s) if s.success() => {
                println!("Unmounted: {}", mountpoint.display());
                Ok(())
            }
            Ok(s) => {
                // Fallback: try plain umount (works as root)
                let fallback = std::process::Command::new("umount")
                    .arg(mountpoint)
                    .status();
                match fallback {
                    Ok(f) if f.success() => {
                        println!("Unmounted: {}", mountpoint.display());
                        Ok(())
                    }
                    _ => anyhow::bail!(
                        "fusermount3 exited {}: use `fusermount3 -u {}` or `umount {}` manually",
                        s,
                        mountpoint.display(),
                        mountpoint.display()
                    ),
                }
            }
            Err(e) => anyhow::bail!("failed to run fusermount3: {e}"),
        }
    }
}

// ── `dumpfs config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &DumpfsConfig, path: &Path) -> Result<()> {
    if path.exists() {
        println!("# config: {}", path.display());
    } else {
        println!("# config: {} (not found, showing defaults)", path.display());
    }
    print!("{}", toml::to_string_pretty(config).context("serializing config")?);
    Ok(())
}
