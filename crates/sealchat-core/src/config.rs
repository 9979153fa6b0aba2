use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use sealchat_crypto::KdfParams;

use crate::error::{SealchatError, SealchatResult};

/// Top-level client configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealchatConfig {
    pub server: ServerConfig,
    pub crypto: CryptoConfig,
    pub auth: AuthConfig,
    pub push: PushConfig,
    pub messages: MessagesConfig,
    pub log: LogConfig,
}

impl SealchatConfig {
    pub fn from_toml(text: &str) -> SealchatResult<Self> {
        toml::from_str(text).map_err(|e| SealchatError::Config(format!("parsing config: {e}")))
    }

    /// Load from `path`, or return defaults when the file does not exist.
    pub fn load(path: &Path) -> SealchatResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| SealchatError::Config(format!("{}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory base URL (default: http://localhost:8000)
    pub base_url: String,
    /// Per-request timeout in seconds (default: 30)
    pub request_timeout_secs: u64,
}

/// Argon2id cost used for new registrations and for challenges that omit kdfParams
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

impl CryptoConfig {
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams::argon2id(
            self.argon2_mem_cost_kib,
            self.argon2_time_cost,
            self.argon2_parallelism,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// How long an issued challenge may stay unanswered (default: 30)
    pub challenge_timeout_secs: u64,
}

impl AuthConfig {
    pub fn challenge_timeout(&self) -> Duration {
        Duration::from_secs(self.challenge_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// First reconnect delay in milliseconds (default: 1000)
    pub reconnect_base_ms: u64,
    /// Upper bound on the reconnect delay in milliseconds (default: 10000)
    pub reconnect_cap_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagesConfig {
    /// Messages held per conversation while its session key is missing (default: 256)
    pub max_pending_per_conversation: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            challenge_timeout_secs: 30,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: 1000,
            reconnect_cap_ms: 10_000,
        }
    }
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            max_pending_per_conversation: 256,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[server]
base_url = "https://chat.example.com"
request_timeout_secs = 10

[crypto]
argon2_mem_cost_kib = 131072
argon2_time_cost = 4
argon2_parallelism = 8

[auth]
challenge_timeout_secs = 5

[push]
reconnect_base_ms = 500
reconnect_cap_ms = 30000

[messages]
max_pending_per_conversation = 16

[log]
level = "debug"
format = "json"
"#;
        let config = SealchatConfig::from_toml(toml_str).unwrap();

        assert_eq!(config.server.base_url, "https://chat.example.com");
        assert_eq!(config.server.request_timeout_secs, 10);
        assert_eq!(config.crypto.kdf_params(), KdfParams::argon2id(131072, 4, 8));
        assert_eq!(config.auth.challenge_timeout(), Duration::from_secs(5));
        assert_eq!(config.push.reconnect_cap_ms, 30000);
        assert_eq!(config.messages.max_pending_per_conversation, 16);
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config = SealchatConfig::from_toml("").unwrap();

        assert_eq!(config.server.base_url, "http://localhost:8000");
        assert_eq!(config.crypto.kdf_params(), KdfParams::default());
        assert_eq!(config.auth.challenge_timeout_secs, 30);
        assert_eq!(config.push.reconnect_base_ms, 1000);
        assert_eq!(config.push.reconnect_cap_ms, 10_000);
        assert_eq!(config.messages.max_pending_per_conversation, 256);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[server]
base_url = "http://192.168.1.100:8000"
"#;
        let config = SealchatConfig::from_toml(toml_str).unwrap();

        // Overridden
        assert_eq!(config.server.base_url, "http://192.168.1.100:8000");
        // Defaults
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.crypto.argon2_mem_cost_kib, 65536);
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let err = SealchatConfig::from_toml("[server]\nrequest_timeout_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, SealchatError::Config(_)));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SealchatConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.base_url, "http://localhost:8000");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[auth]\nchallenge_timeout_secs = 7\n").unwrap();
        let config = SealchatConfig::load(&path).unwrap();
        assert_eq!(config.auth.challenge_timeout_secs, 7);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = SealchatConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = SealchatConfig::from_toml(&toml_str).unwrap();

        assert_eq!(config.server.base_url, parsed.server.base_url);
        assert_eq!(config.push.reconnect_cap_ms, parsed.push.reconnect_cap_ms);
    }
}
