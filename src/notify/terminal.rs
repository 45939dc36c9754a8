use crate::error::AppError;
use crate::notify::{Notification, NotificationPlatform, PermissionState};
use async_trait::async_trait;
use std::io::Write;

const BELL: &[u8] = b"\x07";

/// Headless platform: notifications go to stdout and the cue is the
/// terminal bell. Permission is implicitly granted.
#[derive(Debug, Default)]
pub struct TerminalPlatform;

#[async_trait]
impl NotificationPlatform for TerminalPlatform {
    async fn permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn request_permission(&self) -> Result<PermissionState, AppError> {
        Ok(PermissionState::Granted)
    }

    async fn show(&self, notification: &Notification) -> Result<(), AppError> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "[{}] {}", notification.tag, notification.title)?;
        for line in notification.body.lines() {
            writeln!(stdout, "    {line}")?;
        }
        stdout.flush()?;
        Ok(())
    }

    async fn play_cue(&self) -> Result<(), AppError> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(BELL)?;
        stdout.flush()?;
        Ok(())
    }
}
