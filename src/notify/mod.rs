pub mod channel;
pub mod terminal;
#[cfg(feature = "desktop")]
pub mod webview;

use crate::error::AppError;
use async_trait::async_trait;
use channel::{DirectChannel, NotificationChannel, WorkerChannel};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const NOTIFICATION_ICON: &str = "/gold-icon.svg";
pub const NOTIFICATION_SOUND: &str = "/notification-sound.mp3";
pub const NOTIFICATION_SOUND_VOLUME: f32 = 0.5;
pub const DEFAULT_NOTIFICATION_TAG: &str = "treasury-gold-alert";
pub const VIBRATION_PATTERN: [u32; 3] = [200, 100, 200];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    #[default]
    Default,
    Granted,
    Denied,
}

impl PermissionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub icon: String,
    pub badge: String,
    pub require_interaction: bool,
    pub vibrate: Vec<u32>,
}

impl Notification {
    pub fn new(title: &str, body: &str, tag: &str) -> Self {
        let tag = if tag.trim().is_empty() {
            DEFAULT_NOTIFICATION_TAG
        } else {
            tag
        };

        Self {
            title: title.to_string(),
            body: body.to_string(),
            tag: tag.to_string(),
            icon: NOTIFICATION_ICON.to_string(),
            badge: NOTIFICATION_ICON.to_string(),
            require_interaction: true,
            vibrate: VIBRATION_PATTERN.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationReceipt {
    pub channel: String,
    pub tag: String,
}

#[async_trait]
pub trait NotificationPlatform: Send + Sync {
    async fn permission(&self) -> PermissionState;
    async fn request_permission(&self) -> Result<PermissionState, AppError>;
    async fn show(&self, notification: &Notification) -> Result<(), AppError>;
    async fn play_cue(&self) -> Result<(), AppError>;
}

pub struct NotificationGateway {
    platform: Arc<dyn NotificationPlatform>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    permission: RwLock<PermissionState>,
}

impl NotificationGateway {
    pub async fn start(platform: Arc<dyn NotificationPlatform>, cancel_token: CancellationToken) -> Self {
        let worker = WorkerChannel::spawn(Arc::clone(&platform), cancel_token);
        let direct = DirectChannel::new(Arc::clone(&platform));
        Self::with_channels(platform, vec![Arc::new(worker), Arc::new(direct)]).await
    }

    pub async fn with_channels(
        platform: Arc<dyn NotificationPlatform>,
        channels: Vec<Arc<dyn NotificationChannel>>,
    ) -> Self {
        let permission = platform.permission().await;
        tracing::debug!(permission = permission.as_str(), "notification permission");
        Self {
            platform,
            channels,
            permission: RwLock::new(permission),
        }
    }

    pub fn permission(&self) -> PermissionState {
        *self.permission.read()
    }

    pub fn set_permission(&self, permission: PermissionState) {
        *self.permission.write() = permission;
    }

    pub async fn request_permission(&self) -> bool {
        match self.platform.request_permission().await {
            Ok(permission) => {
                self.set_permission(permission);
                permission == PermissionState::Granted
            }
            Err(error) => {
                tracing::warn!(%error, "notification permission request failed");
                false
            }
        }
    }

    pub async fn send(&self, title: &str, body: &str, tag: &str) -> Option<NotificationReceipt> {
        if self.permission() != PermissionState::Granted {
            tracing::warn!(tag, "notification permission not granted");
            return None;
        }

        if let Err(error) = self.platform.play_cue().await {
            tracing::debug!(%error, "audio cue unavailable");
        }

        let Some(channel) = self.channels.iter().find(|channel| channel.is_available()) else {
            tracing::warn!(tag, "no notification channel available");
            return None;
        };

        match channel.deliver(Notification::new(title, body, tag)).await {
            Ok(receipt) => {
                tracing::info!(channel = channel.name(), tag, "notification delivered");
                Some(receipt)
            }
            Err(error) => {
                tracing::error!(%error, channel = channel.name(), tag, "notification delivery failed");
                None
            }
        }
    }
}
