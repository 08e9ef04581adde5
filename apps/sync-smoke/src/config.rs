//! Environment-backed configuration for `sync-smoke`.

use std::{env, error::Error, fmt, time::Duration};

use sync_core::{SyncConfig, ThreadId, UserId};

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000/api/messages";
const DEFAULT_RUN_SECS: u64 = 60;

/// What the smoke run connects to and does once connected.
#[derive(Debug, Clone, PartialEq)]
pub struct SmokeConfig {
    /// Messages API root.
    pub base_url: String,
    /// Bearer token. Missing means the run starts signed out.
    pub token: Option<String>,
    /// Thread opened after the first list refresh.
    pub open_thread: Option<ThreadId>,
    /// Peer whose conversation is created or reused and opened.
    pub open_with_user: Option<UserId>,
    /// Text sent once a thread is open.
    pub send_text: Option<String>,
    /// Stop after this long; zero runs until ctrl-c.
    pub run_for: Duration,
    pub sync: SyncConfig,
}

impl SmokeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let base_url = optional_trimmed_env("SYNC_BASE_URL", &mut lookup)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        let token = optional_trimmed_env("SYNC_TOKEN", &mut lookup);

        let Some(self_user_id) = parse_optional::<UserId, _>("SYNC_USER_ID", &mut lookup)? else {
            return Err(ConfigError::Missing { key: "SYNC_USER_ID" });
        };
        let open_thread = parse_optional::<ThreadId, _>("SYNC_OPEN_THREAD", &mut lookup)?;
        let open_with_user = parse_optional::<UserId, _>("SYNC_OPEN_WITH_USER", &mut lookup)?;
        let send_text = optional_trimmed_env("SYNC_SEND_TEXT", &mut lookup);
        let run_secs =
            parse_optional::<u64, _>("SYNC_RUN_SECS", &mut lookup)?.unwrap_or(DEFAULT_RUN_SECS);

        let mut sync = SyncConfig::new(self_user_id);
        if let Some(limit) = parse_positive::<u16, _>("SYNC_INITIAL_LIMIT", &mut lookup)? {
            sync.initial_limit = limit;
        }
        if let Some(limit) = parse_positive::<u16, _>("SYNC_OLDER_LIMIT", &mut lookup)? {
            sync.older_limit = limit;
        }
        if let Some(ms) = parse_positive::<u64, _>("SYNC_MESSAGE_TIMEOUT_MS", &mut lookup)? {
            sync.message_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_positive::<u64, _>("SYNC_THREAD_LIST_TIMEOUT_MS", &mut lookup)? {
            sync.thread_list_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_positive::<u64, _>("SYNC_THREAD_LIST_POLL_MS", &mut lookup)? {
            sync.thread_list_poll = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_positive::<u64, _>("SYNC_MESSAGE_POLL_MS", &mut lookup)? {
            sync.message_poll = Duration::from_millis(ms);
        }

        if open_thread.is_some() && open_with_user.is_some() {
            return Err(ConfigError::InvalidValue {
                key: "SYNC_OPEN_WITH_USER",
                value: open_with_user.map(|id| id.to_string()).unwrap_or_default(),
                reason: "cannot be combined with SYNC_OPEN_THREAD".to_owned(),
            });
        }

        Ok(Self {
            base_url,
            token,
            open_thread,
            open_with_user,
            send_text,
            run_for: Duration::from_secs(run_secs),
            sync,
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is not set.
    Missing { key: &'static str },
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { key } => write!(f, "{key} must be set"),
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional<T, F>(key: &'static str, lookup: &mut F) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<T>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_positive<T, F>(key: &'static str, lookup: &mut F) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr + Default + PartialEq + fmt::Display,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    match parse_optional::<T, F>(key, lookup)? {
        Some(value) if value == T::default() => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "must be at least 1".to_owned(),
        }),
        parsed => Ok(parsed),
    }
}
