use crate::error::AppError;
use crate::market::price::parse_price_wire;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CHANNEL_NAME: &str = "gold-rate";
pub const DEFAULT_EVENT_NAME: &str = "gold-rate-event";
pub const DEFAULT_BASE_RETRY_DELAY_MS: u64 = 2_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const MIN_BASE_RETRY_DELAY_MS: u64 = 100;
pub const MAX_BASE_RETRY_DELAY_MS: u64 = 60_000;
pub const MAX_RETRIES_LIMIT: u32 = 10;
pub const DEFAULT_CONNECTION_ERROR: &str = "Connection error";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Initialized,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Unavailable,
}

impl ChannelState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Unavailable => "unavailable",
        }
    }

    /// States from which a foreground resume restarts the connection.
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Unavailable)
    }

    /// States in which an explicit disconnect is redundant.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedPhase {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Misconfigured,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    pub buying_rate: Option<i64>,
    pub selling_rate: Option<i64>,
    pub last_updated_ms: Option<i64>,
}

impl PriceSnapshot {
    pub fn has_both_rates(&self) -> bool {
        self.buying_rate.is_some() && self.selling_rate.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatusSnapshot {
    pub phase: FeedPhase,
    pub channel_state: ChannelState,
    pub error: Option<String>,
    pub retry_count: u32,
    pub is_connected: bool,
    pub last_updated_ms: Option<i64>,
}

impl FeedStatusSnapshot {
    pub fn idle() -> Self {
        Self {
            phase: FeedPhase::Idle,
            channel_state: ChannelState::Initialized,
            error: None,
            retry_count: 0,
            is_connected: false,
            last_updated_ms: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoldRateWire {
    pub buying_rate: Option<String>,
    pub selling_rate: Option<String>,
}

impl GoldRateWire {
    pub fn into_snapshot(self, now_unix_ms: i64) -> PriceSnapshot {
        PriceSnapshot {
            buying_rate: parse_price_wire(self.buying_rate.as_deref()),
            selling_rate: parse_price_wire(self.selling_rate.as_deref()),
            last_updated_ms: Some(now_unix_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FeedArgs {
    pub app_key: Option<String>,
    pub cluster: Option<String>,
    pub channel_name: Option<String>,
    pub event_name: Option<String>,
    pub base_retry_delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub app_key: String,
    pub cluster: String,
    pub channel_name: String,
    pub event_name: String,
    pub base_retry_delay: Duration,
    pub max_retries: u32,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl FeedArgs {
    pub fn normalize(self) -> Result<FeedConfig, AppError> {
        let (Some(app_key), Some(cluster)) = (non_empty(self.app_key), non_empty(self.cluster))
        else {
            return Err(AppError::Configuration(
                "missing push channel configuration: app key and cluster are required"
                    .to_string(),
            ));
        };

        let channel_name =
            non_empty(self.channel_name).unwrap_or_else(|| DEFAULT_CHANNEL_NAME.to_string());
        let event_name =
            non_empty(self.event_name).unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string());

        let base_retry_delay_ms = self
            .base_retry_delay_ms
            .unwrap_or(DEFAULT_BASE_RETRY_DELAY_MS);
        if !(MIN_BASE_RETRY_DELAY_MS..=MAX_BASE_RETRY_DELAY_MS).contains(&base_retry_delay_ms) {
            return Err(AppError::InvalidArgument(format!(
                "baseRetryDelayMs must be between {MIN_BASE_RETRY_DELAY_MS} and {MAX_BASE_RETRY_DELAY_MS}"
            )));
        }

        let max_retries = self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        if max_retries > MAX_RETRIES_LIMIT {
            return Err(AppError::InvalidArgument(format!(
                "maxRetries must not exceed {MAX_RETRIES_LIMIT}"
            )));
        }

        Ok(FeedConfig {
            app_key,
            cluster,
            channel_name,
            event_name,
            base_retry_delay: Duration::from_millis(base_retry_delay_ms),
            max_retries,
        })
    }
}
