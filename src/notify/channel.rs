use crate::error::AppError;
use crate::notify::{Notification, NotificationPlatform, NotificationReceipt};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

const WORKER_QUEUE_CAPACITY: usize = 16;

/// One way of getting a notification onto the platform. Probed in order at
/// send time; the first available channel is used.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_available(&self) -> bool;
    async fn deliver(&self, notification: Notification) -> Result<NotificationReceipt, AppError>;
}

type WorkerJob = (Notification, oneshot::Sender<Result<(), AppError>>);

/// Background delivery task fed through a bounded queue. Unavailable once
/// the task has stopped.
pub struct WorkerChannel {
    jobs: mpsc::Sender<WorkerJob>,
}

impl WorkerChannel {
    pub fn spawn(platform: Arc<dyn NotificationPlatform>, cancel_token: CancellationToken) -> Self {
        let (jobs, mut queue) = mpsc::channel::<WorkerJob>(WORKER_QUEUE_CAPACITY);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    job = queue.recv() => {
                        let Some((notification, reply)) = job else {
                            break;
                        };
                        let result = platform.show(&notification).await;
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::debug!("notification worker stopped");
        });

        Self { jobs }
    }
}

#[async_trait]
impl NotificationChannel for WorkerChannel {
    fn name(&self) -> &'static str {
        "worker"
    }

    fn is_available(&self) -> bool {
        !self.jobs.is_closed()
    }

    async fn deliver(&self, notification: Notification) -> Result<NotificationReceipt, AppError> {
        let tag = notification.tag.clone();
        let (reply, outcome) = oneshot::channel();
        self.jobs
            .send((notification, reply))
            .await
            .map_err(|_| AppError::Notification("notification worker stopped".to_string()))?;

        outcome
            .await
            .map_err(|_| AppError::Notification("notification worker dropped the job".to_string()))??;

        Ok(NotificationReceipt {
            channel: self.name().to_string(),
            tag,
        })
    }
}

pub struct DirectChannel {
    platform: Arc<dyn NotificationPlatform>,
}

impl DirectChannel {
    pub fn new(platform: Arc<dyn NotificationPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl NotificationChannel for DirectChannel {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn deliver(&self, notification: Notification) -> Result<NotificationReceipt, AppError> {
        self.platform.show(&notification).await?;
        Ok(NotificationReceipt {
            channel: self.name().to_string(),
            tag: notification.tag,
        })
    }
}
