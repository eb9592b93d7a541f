use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, WorkchatError};
use crate::workchat::ids::UserId;

/// Uploads above this size are rejected before any network call.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_GEOLOCATION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 500;

/// Transport-level retry schedule for the chat socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts after the first failure before giving up. Zero disables reconnection.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based): `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkchatConfig {
    /// Base URL of the REST backend, e.g. `https://ops.example.com/api`
    pub api_base_url: String,

    /// WebSocket endpoint of the chat server
    pub socket_url: String,

    /// Directory for application logs
    pub logs_dir: PathBuf,

    pub request_timeout: Duration,

    /// Upper bound on a one-shot position fix
    pub geolocation_timeout: Duration,

    pub max_upload_bytes: u64,

    pub event_channel_capacity: usize,

    pub reconnect: ReconnectPolicy,
}

impl WorkchatConfig {
    pub fn new(api_base_url: &str, socket_url: &str, logs_dir: &Path) -> Self {
        let env_suffix = if cfg!(debug_assertions) {
            "dev"
        } else {
            "release"
        };

        Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            socket_url: socket_url.to_string(),
            logs_dir: logs_dir.join(env_suffix),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            geolocation_timeout: DEFAULT_GEOLOCATION_TIMEOUT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Builds a configuration from `WORKCHAT_*` environment variables, loading `.env` first.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine, the variables may come from the real environment.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| WorkchatError::Configuration(format!("{} is not set", key)))
        };

        let api_base_url = required("WORKCHAT_API_URL")?;
        let socket_url = required("WORKCHAT_SOCKET_URL")?;
        let logs_dir = lookup("WORKCHAT_LOGS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("workchat").join("logs"));

        let mut config = Self::new(&api_base_url, &socket_url, &logs_dir);

        if let Some(raw) = lookup("WORKCHAT_MAX_UPLOAD_MB") {
            let megabytes: u64 = raw.trim().parse().map_err(|_| {
                WorkchatError::Configuration(format!(
                    "WORKCHAT_MAX_UPLOAD_MB must be a whole number, got {:?}",
                    raw
                ))
            })?;
            config.max_upload_bytes = megabytes.saturating_mul(1024 * 1024);
        }

        Ok(config)
    }
}

/// Output of the external authentication store.
#[derive(Clone)]
pub struct Session {
    pub user_id: UserId,
    pub token: String,
}

impl Session {
    pub fn new(user_id: impl Into<UserId>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("token", &"<REDACTED>")
            .finish()
    }
}
