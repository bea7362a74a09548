//! Synchronizer configuration
//!
//! Resolution order, later wins: built-in defaults, an optional TOML file,
//! then `UL_*` environment variables.
//!
//! ```toml
//! api_url = "https://listing.example.org"
//! username = "importer"
//! concurrency = 25
//! compare_fields = ["name", "description", "manufacturer", "sid", "source"]
//! output_dir = "./reports"
//! ```

use crate::error::{Result, SyncError};
use crate::reconcile::{ReconcileOptions, DEFAULT_COMPARE_FIELDS, DEFAULT_VOLATILE_FIELDS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default Unified Listing API location
pub const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Default per-request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default ceiling on simultaneous writes against the API
pub const DEFAULT_CONCURRENCY: usize = 50;

/// Default `limit` when fetching a source's existing records
pub const DEFAULT_EXISTING_LIMIT: usize = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the Unified Listing API
    pub api_url: String,

    /// Login name; login is skipped when unset
    pub username: Option<String>,

    #[serde(skip_serializing)]
    pub password: Option<String>,

    pub request_timeout_secs: u64,

    /// Maximum simultaneous write requests
    pub concurrency: usize,

    /// `limit` passed when fetching existing records
    pub existing_limit: usize,

    /// Fields whose change triggers an update
    pub compare_fields: Vec<String>,

    /// Fields never compared, even if listed in `compare_fields`
    pub volatile_fields: Vec<String>,

    /// Where failed/updated record sets are written, if anywhere
    pub output_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            username: None,
            password: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            concurrency: DEFAULT_CONCURRENCY,
            existing_limit: DEFAULT_EXISTING_LIMIT,
            compare_fields: DEFAULT_COMPARE_FIELDS.iter().map(ToString::to_string).collect(),
            volatile_fields: DEFAULT_VOLATILE_FIELDS.iter().map(ToString::to_string).collect(),
            output_dir: None,
        }
    }
}

impl SyncConfig {
    /// Defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.overlay(|key| std::env::var(key).ok())
    }

    /// Parse a TOML file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| {
            SyncError::config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = lookup("UL_API_URL") {
            self.api_url = url;
        }
        if let Some(username) = lookup("UL_USERNAME") {
            self.username = Some(username);
        }
        if let Some(password) = lookup("UL_PASSWORD") {
            self.password = Some(password);
        }
        if let Some(value) = lookup("UL_CONCURRENCY") {
            self.concurrency = parse_number("UL_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("UL_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_number("UL_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("UL_EXISTING_LIMIT") {
            self.existing_limit = parse_number("UL_EXISTING_LIMIT", &value)?;
        }
        if let Some(dir) = lookup("UL_OUTPUT_DIR") {
            self.output_dir = Some(PathBuf::from(dir));
        }
        Ok(self)
    }

    /// Reject settings that cannot produce a working run
    pub fn validate(&self) -> Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(SyncError::config(format!(
                "api_url must be an http(s) URL, got '{}'",
                self.api_url
            )));
        }
        if self.concurrency == 0 {
            return Err(SyncError::config("concurrency must be at least 1"));
        }
        if self.compare_fields.is_empty() {
            return Err(SyncError::config("compare_fields must name at least one field"));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(SyncError::config("username and password must be set together"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `(username, password)` when both are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.username.as_deref()?, self.password.as_deref()?))
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            compare_fields: self.compare_fields.clone(),
            volatile_fields: self.volatile_fields.clone(),
            concurrency: self.concurrency,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SyncError::config(format!("{} must be a number, got '{}'", key, value)))
}
