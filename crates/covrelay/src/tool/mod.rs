//! Coverage tool acquisition.
//!
//! The tool is resolved to a local [`ToolHandle`] before anything runs.
//! Downloads are pinned by SHA-256 and verified before a single byte is
//! written to the cache, replacing the fetch-and-pipe-to-shell install.

pub mod archive;
pub mod checksum;
pub mod fetch;
pub mod install;

pub use fetch::{Fetcher, HttpFetcher};
pub use install::ToolInstaller;

use crate::exec::Invocation;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a tool handle was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOrigin {
    /// Configured path, used as-is
    Existing,
    /// Fetched during this run
    Downloaded,
    /// Reused from the cache
    Cached,
    /// Built by `cargo install` during this run
    CargoInstalled,
}

/// A resolved, runnable coverage tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolHandle {
    /// Tool name
    pub name: String,
    /// Pinned version
    pub version: String,
    /// Executable path
    pub path: PathBuf,
    /// Acquisition route
    pub origin: ToolOrigin,
}

impl ToolHandle {
    /// Cargo subcommand name when the tool is a `cargo-*` plugin
    #[must_use]
    pub fn subcommand(&self) -> Option<&str> {
        self.name.strip_prefix("cargo-").filter(|s| !s.is_empty())
    }

    /// Start an invocation of the tool
    ///
    /// Cargo plugins expect their subcommand name as the first argument
    /// when run directly, so it is inserted here.
    #[must_use]
    pub fn invocation(&self) -> Invocation {
        let invocation = Invocation::new(&self.path);
        match self.subcommand() {
            Some(sub) => invocation.arg(sub),
            None => invocation,
        }
    }
}

/// Operating system and architecture the tool must run on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// OS family, as in `std::env::consts::OS`
    pub os: String,
    /// Architecture, as in `std::env::consts::ARCH`
    pub arch: String,
}

impl Platform {
    /// A platform by name
    #[must_use]
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this binary was built for
    #[must_use]
    pub fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Whether pinned release downloads exist for this platform
    #[must_use]
    pub fn supports_downloads(&self) -> bool {
        matches!(self.os.as_str(), "linux" | "macos")
    }
}
