use crate::error::AppError;
use crate::market::history::resolve_history_endpoint;
use crate::market::types::FeedArgs;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_RESUME_PROBE_INTERVAL_MS: u64 = 30_000;

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Loads `.env` from the working directory when present. Real environment
/// variables win over file entries.
pub fn load_dotenv() -> Result<Option<PathBuf>, dotenvy::Error> {
    match dotenvy::dotenv() {
        Ok(path) => Ok(Some(path)),
        Err(error) if error.not_found() => Ok(None),
        Err(error) => Err(error),
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub feed: FeedArgs,
    pub history_endpoint: String,
    pub data_dir: PathBuf,
    /// Period of the headless foreground-resume probe. `None` disables it.
    pub resume_probe_interval: Option<Duration>,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let resume_probe_interval_ms = match env_value("RESUME_PROBE_INTERVAL_MS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                AppError::InvalidArgument(format!(
                    "RESUME_PROBE_INTERVAL_MS must be a whole number of milliseconds, got {raw:?}"
                ))
            })?,
            None => DEFAULT_RESUME_PROBE_INTERVAL_MS,
        };

        Ok(Self {
            feed: FeedArgs {
                app_key: env_value("PUSHER_APP_KEY"),
                cluster: env_value("PUSHER_CLUSTER"),
                channel_name: env_value("CHANNEL_NAME"),
                event_name: env_value("EVENT_NAME"),
                ..FeedArgs::default()
            },
            history_endpoint: resolve_history_endpoint(),
            data_dir: env_value("APP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            resume_probe_interval: (resume_probe_interval_ms > 0)
                .then(|| Duration::from_millis(resume_probe_interval_ms)),
        })
    }
}
