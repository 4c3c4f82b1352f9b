use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_NAME_ATTEMPTS: usize = 10;

/// Connection settings for one panel.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Panels are commonly deployed with self-signed certificates.
    pub accept_invalid_certs: bool,
    pub user_agent: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            accept_invalid_certs: true,
            user_agent: format!("panel-sync/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Check the URL and strip trailing slashes.
    pub fn validated(mut self) -> Result<Self> {
        let trimmed = self.base_url.trim().trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            return Err(SyncError::InvalidConfiguration("panel URL is empty".into()));
        }
        if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
            return Err(SyncError::InvalidConfiguration(format!(
                "panel URL must start with http:// or https://, got '{}'",
                trimmed
            )));
        }
        if self.timeout.is_zero() {
            return Err(SyncError::InvalidConfiguration("timeout must be positive".into()));
        }
        self.base_url = trimmed;
        Ok(self)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Knobs for a user reconciliation run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOptions {
    /// Create attempts per record, counting the unsuffixed name.
    pub max_name_attempts: usize,
    /// Replaces every record's groups when set.
    pub group_override: Option<BTreeSet<i64>>,
    /// Strip remote group membership from updated accounts that import
    /// without groups.
    pub clear_groups_when_empty: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            max_name_attempts: DEFAULT_MAX_NAME_ATTEMPTS,
            group_override: None,
            clear_groups_when_empty: true,
        }
    }
}

impl ReconcileOptions {
    pub fn with_group_override(mut self, groups: impl IntoIterator<Item = i64>) -> Self {
        self.group_override = Some(groups.into_iter().collect());
        self
    }

    pub fn with_max_name_attempts(mut self, attempts: usize) -> Self {
        self.max_name_attempts = attempts.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_trimmed() {
        let config = ClientConfig::new("https://panel.example:2053/ ").validated().unwrap();
        assert_eq!(config.base_url, "https://panel.example:2053");
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(config.accept_invalid_certs);
    }

    #[test]
    fn url_without_scheme_is_rejected() {
        let err = ClientConfig::new("panel.example").validated().unwrap_err();
        assert!(matches!(err, SyncError::InvalidConfiguration(_)));
    }

    #[test]
    fn password_is_not_logged() {
        let debug = format!("{:?}", Credentials::new("admin", "hunter2"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn name_attempts_never_drop_to_zero() {
        assert_eq!(ReconcileOptions::default().with_max_name_attempts(0).max_name_attempts, 1);
    }
}
