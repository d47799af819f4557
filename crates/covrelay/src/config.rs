//! Pipeline configuration.
//!
//! Every field has a default, so `covrelay` runs with no configuration file
//! at all. A YAML file (see [`DEFAULT_CONFIG_FILE`]) may override any subset:
//!
//! ```yaml
//! tool:
//!   version: "0.31.2"
//!   source:
//!     kind: download
//!     url: https://github.com/xd009642/tarpaulin/releases/download/0.31.2/cargo-tarpaulin-x86_64-unknown-linux-musl.tar.gz
//!     sha256: 4f5c3ad2...
//!     archive: tar-gz
//!   args: ["--workspace", "--timeout", "120"]
//! report:
//!   format: xml
//! passes: two-pass
//! upload:
//!   endpoint: https://codecov.io/upload/v2
//! context:
//!   provider: travis-ci
//!   forward_env: [COVERALLS_REPO_TOKEN]
//! ```

use crate::report::ReportFormat;
use crate::result::ConfigError;
use crate::tool::checksum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file picked up from the working directory when present
pub const DEFAULT_CONFIG_FILE: &str = "covrelay.yaml";

/// Coverage tool installed when nothing else is configured
pub const DEFAULT_TOOL_NAME: &str = "cargo-tarpaulin";

/// Pinned tool version
pub const DEFAULT_TOOL_VERSION: &str = "0.31.2";

/// Default aggregation endpoint
pub const DEFAULT_ENDPOINT: &str = "https://codecov.io/upload/v2";

/// How the coverage tool is obtained
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ToolSource {
    /// `cargo install <name> --version <version> --locked` into the cache
    #[default]
    CargoInstall,
    /// Fetch a pinned release artifact
    Download {
        /// Artifact URL
        url: String,
        /// Hex SHA-256 of the artifact bytes
        sha256: String,
        /// Packaging of the artifact
        #[serde(default)]
        archive: ArchiveKind,
    },
    /// Use an executable already on disk
    Path {
        /// Executable location
        path: PathBuf,
        /// Optional hex SHA-256 the executable must match
        #[serde(default)]
        sha256: Option<String>,
    },
}

/// Packaging of a downloaded tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveKind {
    /// The artifact is the executable itself
    #[default]
    Raw,
    /// A gzip tarball containing the executable
    TarGz,
}

/// Whether identity forwarding and report emission share one tool run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PassMode {
    /// One run forwarding job identity, a second run emitting the report
    #[default]
    TwoPass,
    /// A single run carrying both identity flags and `--out`
    SinglePass,
}

/// Coverage tool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Executable name (cargo subcommands start with `cargo-`)
    pub name: String,
    /// Pinned version
    pub version: String,
    /// Where the executable comes from
    pub source: ToolSource,
    /// Extra arguments appended to every tool invocation
    pub args: Vec<String>,
    /// Download and install cache
    pub cache_dir: PathBuf,
    /// Directory the tool runs in (defaults to the current directory)
    pub working_dir: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_TOOL_NAME.to_string(),
            version: DEFAULT_TOOL_VERSION.to_string(),
            source: ToolSource::default(),
            args: Vec::new(),
            cache_dir: PathBuf::from("target/covrelay/tools"),
            working_dir: None,
        }
    }
}

/// Report settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Report serialization
    pub format: ReportFormat,
    /// Directory the tool writes the report into
    pub output_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: ReportFormat::default(),
            output_dir: PathBuf::from("target/covrelay"),
        }
    }
}

/// Upload settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Aggregation endpoint receiving the report
    pub endpoint: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: 120,
        }
    }
}

/// Where the job context is read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Provider name; overrides `provider_var` when set
    pub provider: Option<String>,
    /// Variable holding the provider name
    pub provider_var: String,
    /// Variable holding the job identifier
    pub job_id_var: String,
    /// Variable holding the upload token
    pub token_var: String,
    /// Variables captured as credentials and forwarded to the tool
    pub forward_env: Vec<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            provider: None,
            provider_var: "CI_PROVIDER".to_string(),
            job_id_var: "CI_JOB_ID".to_string(),
            token_var: "COVERAGE_TOKEN".to_string(),
            forward_env: Vec::new(),
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CovConfig {
    /// Coverage tool
    pub tool: ToolConfig,
    /// Report output
    pub report: ReportConfig,
    /// Pass mode
    pub passes: PassMode,
    /// Upload target
    pub upload: UploadConfig,
    /// Job context sources
    pub context: ContextConfig,
}

impl CovConfig {
    /// Create the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the report format
    #[must_use]
    pub const fn with_format(mut self, format: ReportFormat) -> Self {
        self.report.format = format;
        self
    }

    /// Set the report output directory
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report.output_dir = dir.into();
        self
    }

    /// Set the pass mode
    #[must_use]
    pub const fn with_passes(mut self, passes: PassMode) -> Self {
        self.passes = passes;
        self
    }

    /// Set the upload endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.upload.endpoint = endpoint.into();
        self
    }

    /// Set the tool source
    #[must_use]
    pub fn with_tool_source(mut self, source: ToolSource) -> Self {
        self.tool.source = source;
        self
    }

    /// Set the tool cache directory
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tool.cache_dir = dir.into();
        self
    }

    /// Set the provider name, ignoring the environment
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.context.provider = Some(provider.into());
        self
    }

    /// Parse YAML configuration; `origin` is only used in error messages
    ///
    /// # Errors
    ///
    /// Returns error if the YAML is malformed or fails validation
    pub fn from_yaml_str(yaml: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml_ng::from_str(yaml).map_err(|e| ConfigError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed, or validated
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml, path)
    }

    /// Load `explicit` if given, else [`DEFAULT_CONFIG_FILE`] in `dir` if it
    /// exists, else the defaults
    ///
    /// # Errors
    ///
    /// Returns error if a chosen file cannot be read, parsed, or validated
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = dir.join(DEFAULT_CONFIG_FILE);
        if candidate.is_file() {
            tracing::debug!(path = %candidate.display(), "using discovered config file");
            return Self::load(&candidate);
        }
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot check
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid value
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = self.tool.name.trim();
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(ConfigError::invalid(format!(
                "tool.name {:?} must be a bare executable name",
                self.tool.name
            )));
        }
        if self.tool.version.trim().is_empty() {
            return Err(ConfigError::invalid("tool.version must not be empty"));
        }

        match &self.tool.source {
            ToolSource::CargoInstall => {}
            ToolSource::Download { url, sha256, .. } => {
                if !is_http_url(url) {
                    return Err(ConfigError::invalid(format!(
                        "tool.source.url {url:?} must be an http(s) URL"
                    )));
                }
                if !checksum::is_valid_digest(sha256) {
                    return Err(ConfigError::invalid(
                        "tool.source.sha256 must be 64 hex characters",
                    ));
                }
            }
            ToolSource::Path { sha256, .. } => {
                if let Some(digest) = sha256 {
                    if !checksum::is_valid_digest(digest) {
                        return Err(ConfigError::invalid(
                            "tool.source.sha256 must be 64 hex characters",
                        ));
                    }
                }
            }
        }

        if !is_http_url(&self.upload.endpoint) {
            return Err(ConfigError::invalid(format!(
                "upload.endpoint {:?} must be an http(s) URL",
                self.upload.endpoint
            )));
        }
        if self.upload.timeout_secs == 0 {
            return Err(ConfigError::invalid("upload.timeout_secs must be positive"));
        }

        for var in [
            &self.context.provider_var,
            &self.context.job_id_var,
            &self.context.token_var,
        ]
        .into_iter()
        .chain(&self.context.forward_env)
        {
            if var.trim().is_empty() || var.contains('=') {
                return Err(ConfigError::invalid(format!(
                    "environment variable name {var:?} is not valid"
                )));
            }
        }

        Ok(())
    }
}

fn is_http_url(value: &str) -> bool {
    reqwest::Url::parse(value)
        .is_ok_and(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
}
