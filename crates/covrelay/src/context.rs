//! Job context: the CI identity of the current run.
//!
//! Built once at process start from an injected variable lookup and never
//! mutated afterwards. Steps receive it by reference.

use crate::config::ContextConfig;
use crate::result::ConfigError;
use std::collections::BTreeMap;
use std::fmt;

/// Provider name used when neither configuration nor environment names one
pub const DEFAULT_PROVIDER: &str = "generic";

/// A credential value whose formatting is redacted
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a credential value
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for handing to a child process or HTTP header
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Immutable record of the CI job the pipeline runs for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    provider: String,
    job_id: String,
    upload_token: Option<Secret>,
    credentials: BTreeMap<String, Secret>,
}

impl JobContext {
    /// Create a context with no credentials
    ///
    /// # Errors
    ///
    /// Returns error if the provider or job id is empty or malformed
    pub fn new(provider: impl Into<String>, job_id: impl Into<String>) -> Result<Self, ConfigError> {
        let provider = provider.into().trim().to_string();
        let job_id = job_id.into().trim().to_string();

        if !is_valid_provider(&provider) {
            return Err(ConfigError::invalid(format!(
                "provider name {provider:?} must be non-empty and use only [A-Za-z0-9._-]"
            )));
        }
        if job_id.is_empty() {
            return Err(ConfigError::invalid("job identifier must not be empty"));
        }

        Ok(Self {
            provider,
            job_id,
            upload_token: None,
            credentials: BTreeMap::new(),
        })
    }

    /// Attach the upload token
    #[must_use]
    pub fn with_upload_token(mut self, token: Secret) -> Self {
        self.upload_token = Some(token);
        self
    }

    /// Attach a credential forwarded to the coverage tool
    #[must_use]
    pub fn with_credential(mut self, name: impl Into<String>, value: Secret) -> Self {
        let _ = self.credentials.insert(name.into(), value);
        self
    }

    /// Build the context from the process environment
    ///
    /// # Errors
    ///
    /// Returns error if the job identifier variable is missing
    pub fn from_env(settings: &ContextConfig) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok(), settings)
    }

    /// Build the context from an arbitrary variable lookup
    ///
    /// Empty and whitespace-only values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns error if the job identifier variable is missing or a value is malformed
    pub fn from_lookup<F>(lookup: F, settings: &ContextConfig) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let provider = settings
            .provider
            .clone()
            .or_else(|| read(&settings.provider_var))
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());

        let job_id = read(&settings.job_id_var)
            .ok_or_else(|| ConfigError::missing_variable(&settings.job_id_var))?;

        let mut context = Self::new(provider, job_id)?;

        if let Some(token) = read(&settings.token_var) {
            context = context.with_upload_token(Secret::new(token));
        }

        for name in &settings.forward_env {
            if let Some(value) = read(name) {
                context = context.with_credential(name.clone(), Secret::new(value));
            }
        }

        Ok(context)
    }

    /// CI provider name, as passed to the coverage tool
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// CI job identifier
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Token presented to the aggregation backend
    #[must_use]
    pub const fn upload_token(&self) -> Option<&Secret> {
        self.upload_token.as_ref()
    }

    /// Credentials forwarded to the coverage tool's environment
    #[must_use]
    pub const fn credentials(&self) -> &BTreeMap<String, Secret> {
        &self.credentials
    }
}

fn is_valid_provider(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
