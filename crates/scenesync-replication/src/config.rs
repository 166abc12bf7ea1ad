//! Reconciler configuration.
//!
//! [`ReplicationConfig`] is plain data with serde support so a host can load
//! it from the same JSON document as the rest of its settings.
//!
//! ```
//! use scenesync_replication::config::{PeerRole, ReplicationConfig};
//!
//! let config = ReplicationConfig::from_json(r#"{ "role": "server" }"#).unwrap();
//! assert_eq!(config.role, PeerRole::Server);
//! assert!(config.suppress_echoes);
//! ```

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PeerRole
// ---------------------------------------------------------------------------

/// Which side of the session this peer is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    /// The authoritative peer. Assigns replicated ids and issues renames.
    Server,
    /// A non-authoritative peer. Uses unacked ids until the server renames them.
    #[default]
    Client,
}

// ---------------------------------------------------------------------------
// ReplicationConfig
// ---------------------------------------------------------------------------

/// Settings for a [`ReplicationReconciler`](crate::reconciler::ReplicationReconciler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Role of this peer.
    pub role: PeerRole,
    /// Treat inbound component data identical to the applied state as a no-op.
    pub suppress_echoes: bool,
    /// Refuse further messages after a fatal consistency error.
    pub close_on_fatal: bool,
}

impl Default for ReplicationConfig {
    /// Client role, echo suppression on, close on fatal errors.
    fn default() -> Self {
        Self {
            role: PeerRole::Client,
            suppress_echoes: true,
            close_on_fatal: true,
        }
    }
}

impl ReplicationConfig {
    /// Default settings for the authoritative peer.
    pub fn server() -> Self {
        Self {
            role: PeerRole::Server,
            ..Self::default()
        }
    }

    /// Default settings for a non-authoritative peer.
    pub fn client() -> Self {
        Self::default()
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Whether this peer is the authority.
    pub fn is_server(&self) -> bool {
        self.role == PeerRole::Server
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = ReplicationConfig::from_json("{}").unwrap();
        assert_eq!(config, ReplicationConfig::default());
        assert!(!config.is_server());
    }

    #[test]
    fn all_fields_parse() {
        let config = ReplicationConfig::from_json(
            r#"{ "role": "server", "suppress_echoes": false, "close_on_fatal": false }"#,
        )
        .unwrap();
        assert!(config.is_server());
        assert!(!config.suppress_echoes);
        assert!(!config.close_on_fatal);
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(ReplicationConfig::from_json(r#"{ "role": "observer" }"#).is_err());
    }

    #[test]
    fn serializes_back() {
        let json = serde_json::to_string(&ReplicationConfig::server()).unwrap();
        assert!(json.contains(r#""role":"server""#));
    }
}
