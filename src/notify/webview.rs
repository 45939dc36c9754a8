use crate::error::AppError;
use crate::notify::{
    Notification, NotificationPlatform, PermissionState, NOTIFICATION_SOUND,
    NOTIFICATION_SOUND_VOLUME,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tauri::{AppHandle, Emitter};
use tokio::sync::oneshot;

pub const SHOW_NOTIFICATION_EVENT: &str = "notification_show";
pub const PLAY_CUE_EVENT: &str = "notification_cue";
pub const PERMISSION_REQUEST_EVENT: &str = "notification_permission_request";
const PERMISSION_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CuePayload {
    src: &'static str,
    volume: f32,
}

/// Desktop platform: the webview owns the browser notification API, so
/// display is an event and permission is reported back through a command.
pub struct WebviewPlatform {
    app: AppHandle,
    permission: Mutex<PermissionState>,
    pending_request: Mutex<Option<oneshot::Sender<PermissionState>>>,
}

impl WebviewPlatform {
    pub fn new(app: AppHandle) -> Self {
        Self {
            app,
            permission: Mutex::new(PermissionState::Default),
            pending_request: Mutex::new(None),
        }
    }

    /// Called from the permission command with the webview's current answer.
    pub fn report_permission(&self, permission: PermissionState) {
        *self.permission.lock() = permission;
        if let Some(waiter) = self.pending_request.lock().take() {
            let _ = waiter.send(permission);
        }
    }
}

#[async_trait]
impl NotificationPlatform for WebviewPlatform {
    async fn permission(&self) -> PermissionState {
        *self.permission.lock()
    }

    async fn request_permission(&self) -> Result<PermissionState, AppError> {
        let (waiter, answer) = oneshot::channel();
        *self.pending_request.lock() = Some(waiter);
        self.app.emit(PERMISSION_REQUEST_EVENT, ())?;

        match tokio::time::timeout(PERMISSION_REQUEST_TIMEOUT, answer).await {
            Ok(Ok(permission)) => Ok(permission),
            Ok(Err(_)) => Err(AppError::Notification(
                "permission request superseded".to_string(),
            )),
            Err(_) => {
                self.pending_request.lock().take();
                Err(AppError::Notification(
                    "permission request timed out".to_string(),
                ))
            }
        }
    }

    async fn show(&self, notification: &Notification) -> Result<(), AppError> {
        self.app.emit(SHOW_NOTIFICATION_EVENT, notification)?;
        Ok(())
    }

    async fn play_cue(&self) -> Result<(), AppError> {
        self.app.emit(
            PLAY_CUE_EVENT,
            CuePayload {
                src: NOTIFICATION_SOUND,
                volume: NOTIFICATION_SOUND_VOLUME,
            },
        )?;
        Ok(())
    }
}
