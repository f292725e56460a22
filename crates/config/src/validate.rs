//! Configuration validation.
//!
//! Catches values serde accepts but the runtime cannot work with, and flags
//! suspicious settings before they bite at account start.

use crate::schema::VoleryConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "bridge.request_timeout_ms".
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate a loaded configuration.
#[must_use]
pub fn validate(config: &VoleryConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.bridge.request_timeout_ms == 0 {
        result.push(
            Severity::Error,
            "bridge.request_timeout_ms",
            "must be greater than 0",
        );
    }
    if config.bridge.ping_interval_ms > 0 && config.bridge.ping_interval_ms < 1_000 {
        result.push(
            Severity::Warning,
            "bridge.ping_interval_ms",
            "sub-second keep-alive intervals flood slow clients",
        );
    }
    if let Some(token) = config.bridge.token()
        && token.len() < 8
    {
        result.push(
            Severity::Warning,
            "bridge.auth_token",
            "token shorter than 8 characters is easy to brute-force",
        );
    }

    if config.dispatch.debounce_ms > 60_000 {
        result.push(
            Severity::Warning,
            "dispatch.debounce_ms",
            "windows above one minute delay every reply by that long",
        );
    }

    for (account_id, value) in &config.channels.bridge {
        if account_id.trim().is_empty() {
            result.push(
                Severity::Error,
                "channels.bridge",
                "account id must not be empty",
            );
        }
        if !value.is_object() {
            result.push(
                Severity::Error,
                &format!("channels.bridge.{account_id}"),
                "account config must be a table",
            );
        }
    }

    if let Some(dir) = &config.storage.state_dir
        && dir.trim().is_empty()
    {
        result.push(
            Severity::Error,
            "storage.state_dir",
            "must not be empty when set",
        );
    }

    result
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_clean() {
        let result = validate(&VoleryConfig::default());
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn zero_request_timeout_is_error() {
        let cfg: VoleryConfig = toml::from_str("[bridge]\nrequest_timeout_ms = 0\n").unwrap();
        let result = validate(&cfg);
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].path, "bridge.request_timeout_ms");
    }

    #[test]
    fn short_token_warns() {
        let cfg: VoleryConfig = toml::from_str("[bridge]\nauth_token = \"abc\"\n").unwrap();
        let result = validate(&cfg);
        assert!(!result.has_errors());
        assert_eq!(result.diagnostics[0].severity, Severity::Warning);
    }

    #[test]
    fn scalar_account_config_is_error() {
        let cfg: VoleryConfig =
            toml::from_str("[channels]\nbridge = { main = 5 }\n").unwrap();
        let result = validate(&cfg);
        assert!(result.has_errors());
    }

    #[test]
    fn huge_debounce_warns() {
        let cfg: VoleryConfig = toml::from_str("[dispatch]\ndebounce_ms = 120000\n").unwrap();
        let result = validate(&cfg);
        assert!(!result.has_errors());
        assert!(!result.diagnostics.is_empty());
    }
}
