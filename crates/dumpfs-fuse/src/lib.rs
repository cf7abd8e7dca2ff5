//! dumpfs-fuse: async FUSE passthrough driver with aggregate dump projection
//!
//! Linux: fuse3 crate (kernel FUSE, unprivileged mount via fusermount3)
//! macOS: fuse3 with macFUSE 4.x (feature: macos-fuse)

pub mod driver;

// Re-export the mount API when the fuse feature is enabled
#[cfg(feature = "fuse")]
pub use driver::{mount, MountConfig};
