//! Settings error types.
//!
//! Loading fails with [`SettingsError::Read`] or [`SettingsError::Parse`];
//! the remaining variants come from [`EmberSettings::validate`].
//!
//! [`EmberSettings::validate`]: crate::EmberSettings::validate

use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading or validating Ember settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file {}: {source}", path.display())]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying IO failure.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON or has a field of the wrong type.
    #[error("failed to parse settings file {}: {source}", path.display())]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Underlying JSON failure.
        #[source]
        source: serde_json::Error,
    },

    /// `numShards` is zero.
    #[error("numShards must be at least 1")]
    ZeroShards,

    /// Nodes are configured but no bot user id is set.
    #[error("userId is required when nodes are configured")]
    MissingUserId,

    /// A node entry lacks its host or gateway.
    #[error("node {host:?} needs both a host and a gateway")]
    InvalidNode {
        /// Host key as configured (possibly empty).
        host: String,
    },

    /// Two node entries share a host key.
    #[error("duplicate node host {0}")]
    DuplicateNode(String),

    /// A reconnect interval lies outside the accepted range.
    #[error("reconnect interval {value_ms} ms{} is outside {min_ms}..={max_ms} ms", node_suffix(host.as_deref()))]
    ReconnectInterval {
        /// Node whose override is invalid; `None` for the global interval.
        host: Option<String>,
        /// Configured value.
        value_ms: u64,
        /// Smallest accepted value.
        min_ms: u64,
        /// Largest accepted value.
        max_ms: u64,
    },
}

fn node_suffix(host: Option<&str>) -> String {
    host.map(|host| format!(" for node {host}")).unwrap_or_default()
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn read_error_names_file() {
        let err = SettingsError::Read {
            path: PathBuf::from("/etc/ember.json"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().starts_with("failed to read settings file /etc/ember.json"));
        assert!(err.source().is_some());
    }

    #[test]
    fn parse_error_names_file() {
        let source = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err = SettingsError::Parse {
            path: PathBuf::from("settings.json"),
            source,
        };
        assert!(err.to_string().starts_with("failed to parse settings file settings.json"));
    }

    #[test]
    fn node_errors_display() {
        assert_eq!(
            SettingsError::DuplicateNode("a".into()).to_string(),
            "duplicate node host a"
        );
        assert_eq!(
            SettingsError::InvalidNode { host: String::new() }.to_string(),
            r#"node "" needs both a host and a gateway"#
        );
    }

    #[test]
    fn reconnect_interval_display() {
        let global = SettingsError::ReconnectInterval {
            host: None,
            value_ms: 0,
            min_ms: 100,
            max_ms: 3_600_000,
        };
        assert_eq!(
            global.to_string(),
            "reconnect interval 0 ms is outside 100..=3600000 ms"
        );

        let per_node = SettingsError::ReconnectInterval {
            host: Some("eu".into()),
            value_ms: 5,
            min_ms: 100,
            max_ms: 3_600_000,
        };
        assert_eq!(
            per_node.to_string(),
            "reconnect interval 5 ms for node eu is outside 100..=3600000 ms"
        );
    }
}
