// config.rs — Node configuration.
//
// Loaded from a TOML file (e.g. `zrc.toml`). Every field has a default, so an
// empty file or a missing section is valid:
//
//   [node]
//   namespace = "zrc"
//   codec = "json"
//
//   [service]
//   timeout_ms = 5000
//
//   [action]
//   wait_timeout_ms = 30000
//   result_cache_ttl_ms = 60000
//   goal_timeout_ms = 600000

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zrc_codec::CodecKind;

use crate::error::ZrcError;
use crate::keys::{KeyLayout, DEFAULT_NAMESPACE};

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,

    #[serde(default)]
    pub service: ServiceSection,

    #[serde(default)]
    pub action: ActionSection,
}

/// Key layout and payload format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Base namespace prefixed to every key.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Default codec for endpoints created by the node.
    #[serde(default)]
    pub codec: CodecKind,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            codec: CodecKind::default(),
        }
    }
}

/// Service client defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Timeout used by `ServiceClient::call_default`.
    #[serde(default = "default_service_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_service_timeout_ms(),
        }
    }
}

/// Action client defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSection {
    /// Timeout used by `ActionClient::wait_for_result_default`.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// How long a client keeps a finished goal's result for late waiters.
    #[serde(default = "default_result_cache_ttl_ms")]
    pub result_cache_ttl_ms: u64,

    /// How long a client tracks a goal that never produced a result before
    /// dropping its subscriptions. 0 keeps such goals forever.
    #[serde(default = "default_goal_timeout_ms")]
    pub goal_timeout_ms: u64,
}

impl Default for ActionSection {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout_ms(),
            result_cache_ttl_ms: default_result_cache_ttl_ms(),
            goal_timeout_ms: default_goal_timeout_ms(),
        }
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_service_timeout_ms() -> u64 {
    5_000
}

fn default_wait_timeout_ms() -> u64 {
    30_000
}

fn default_result_cache_ttl_ms() -> u64 {
    60_000
}

fn default_goal_timeout_ms() -> u64 {
    600_000
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ZrcError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ZrcError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ZrcError> {
        toml::from_str(content).map_err(|e| ZrcError::Config(e.to_string()))
    }

    /// Same defaults, different namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.node.namespace = namespace.into();
        self
    }

    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.node.codec = codec;
        self
    }

    pub fn key_layout(&self) -> KeyLayout {
        KeyLayout::new(&self.node.namespace)
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(self.service.timeout_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.action.wait_timeout_ms)
    }

    pub fn result_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.action.result_cache_ttl_ms)
    }

    /// `None` when unfinished goals are tracked without limit.
    pub fn goal_timeout(&self) -> Option<Duration> {
        match self.action.goal_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl fmt::Display for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "namespace={}, codec={}, service_timeout={}ms, wait_timeout={}ms, result_cache_ttl={}ms, goal_timeout={}ms",
            self.node.namespace,
            self.node.codec,
            self.service.timeout_ms,
            self.action.wait_timeout_ms,
            self.action.result_cache_ttl_ms,
            self.action.goal_timeout_ms
        )
    }
}
