use crate::alerts::engine::{spawn_alert_engine, AlertEngine, AlertEngineHandle};
use crate::config::RuntimeConfig;
use crate::db::initialize_pool;
use crate::error::AppError;
use crate::market::feed::{start_realtime_feed, FeedHandle, FeedPublisher};
use crate::market::history::{fetch_history, HistoricalPricePoint, Timeframe};
use crate::market::persistence::{KeyValueStore, SqliteKvStore};
use crate::market::price::format_price_display;
use crate::market::types::{FeedPhase, FeedStatusSnapshot, PriceSnapshot};
use crate::notify::{NotificationGateway, NotificationPlatform};
use reqwest::Client;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_ms: u128,
    pub db: &'static str,
    pub feed: FeedPhase,
}

pub async fn build_health_report(
    started_at: Instant,
    pool: &SqlitePool,
    feed: &FeedStatusSnapshot,
) -> HealthReport {
    let db_status = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await
    {
        Ok(_) => "ok",
        Err(_) => "error",
    };

    HealthReport {
        status: "ok",
        uptime_ms: started_at.elapsed().as_millis(),
        db: db_status,
        feed: feed.phase,
    }
}

/// Every long-lived task of the monitor, started in dependency order and
/// stopped through one cancellation token.
pub struct MonitorServices {
    pub started_at: Instant,
    pub db_pool: SqlitePool,
    pub publisher: FeedPublisher,
    pub gateway: Arc<NotificationGateway>,
    pub http: Client,
    pub history_endpoint: String,
    feed: FeedHandle,
    alerts: AlertEngineHandle,
    cancel_token: CancellationToken,
}

impl MonitorServices {
    pub async fn start(
        config: &RuntimeConfig,
        platform: Arc<dyn NotificationPlatform>,
    ) -> Result<Self, AppError> {
        let started_at = Instant::now();
        let cancel_token = CancellationToken::new();

        let db_pool = initialize_pool(&config.data_dir).await?;
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteKvStore::new(db_pool.clone()));
        let gateway = Arc::new(NotificationGateway::start(platform, cancel_token.child_token()).await);

        let publisher = FeedPublisher::new();
        // Subscribe before the feed starts so the first snapshot is not missed.
        let engine = AlertEngine::load(store, Arc::clone(&gateway)).await;
        let alerts = spawn_alert_engine(
            engine,
            publisher.subscribe_snapshots(),
            cancel_token.child_token(),
        );

        let feed = start_realtime_feed(
            config.feed.clone(),
            publisher.clone(),
            cancel_token.child_token(),
        )
        .await;

        tracing::info!(data_dir = %config.data_dir.display(), "monitor services started");

        Ok(Self {
            started_at,
            db_pool,
            publisher,
            gateway,
            http: Client::new(),
            history_endpoint: config.history_endpoint.clone(),
            feed,
            alerts,
            cancel_token,
        })
    }

    pub fn alerts(&self) -> &AlertEngineHandle {
        &self.alerts
    }

    pub fn feed(&self) -> &FeedHandle {
        &self.feed
    }

    pub async fn history(
        &self,
        timeframe: Timeframe,
    ) -> Result<Vec<HistoricalPricePoint>, AppError> {
        fetch_history(&self.http, &self.history_endpoint, timeframe).await
    }

    pub async fn health(&self) -> HealthReport {
        let feed = self.publisher.status().await;
        build_health_report(self.started_at, &self.db_pool, &feed).await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Stops the feed first so no snapshot reaches a stopped engine.
    pub async fn shutdown(self) {
        self.cancel();
        self.feed.join().await;
        self.alerts.join().await;
        self.db_pool.close().await;
        tracing::info!("monitor services stopped");
    }
}

fn log_snapshot(snapshot: &PriceSnapshot) {
    tracing::info!(
        buy = %format_price_display(snapshot.buying_rate),
        sell = %format_price_display(snapshot.selling_rate),
        "gold price update"
    );
}

fn log_status(status: &FeedStatusSnapshot) {
    match status.error.as_deref() {
        Some(error) => tracing::warn!(
            phase = ?status.phase,
            channel = status.channel_state.as_str(),
            retries = status.retry_count,
            error,
            "feed status"
        ),
        None => tracing::info!(
            phase = ?status.phase,
            channel = status.channel_state.as_str(),
            connected = status.is_connected,
            "feed status"
        ),
    }
}

/// Headless monitor loop: logs prices and feed transitions, probes for
/// resume and exits on Ctrl-C.
pub async fn run_headless(
    config: RuntimeConfig,
    platform: Arc<dyn NotificationPlatform>,
) -> Result<(), AppError> {
    let services = MonitorServices::start(&config, platform).await?;
    let mut snapshots = services.publisher.subscribe_snapshots();
    let mut statuses = services.publisher.subscribe_statuses();
    log_status(&services.publisher.status().await);

    let mut resume_probe = config.resume_probe_interval.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    });

    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    let mut last_phase = None;
    loop {
        let probe_tick = async {
            match resume_probe.as_mut() {
                Some(interval) => {
                    interval.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            signal = &mut shutdown_signal => {
                if let Err(error) = signal {
                    tracing::error!(%error, "failed to listen for shutdown signal");
                }
                break;
            }
            snapshot = snapshots.recv() => match snapshot {
                Ok(snapshot) => log_snapshot(&snapshot),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "price log lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            status = statuses.recv() => match status {
                Ok(status) => {
                    if last_phase != Some(status.phase) {
                        log_status(&status);
                        last_phase = Some(status.phase);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = probe_tick => {
                services.feed().resume();
            }
        }
    }

    services.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::FeedArgs;
    use crate::notify::testing::RecordingPlatform;
    use std::path::PathBuf;

    fn unique_data_dir() -> PathBuf {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock should be after unix epoch")
            .as_nanos();

        std::env::temp_dir().join(format!("gold-watch-runtime-{timestamp}"))
    }

    #[tokio::test]
    async fn health_reports_ok_status_and_db_health() {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should initialize");

        let report = build_health_report(Instant::now(), &pool, &FeedStatusSnapshot::idle()).await;

        assert_eq!(report.status, "ok");
        assert_eq!(report.db, "ok");
        assert_eq!(report.feed, FeedPhase::Idle);
        assert!(report.uptime_ms <= 1_000);
    }

    #[tokio::test]
    async fn starts_misconfigured_without_push_credentials_and_shuts_down() {
        let data_dir = unique_data_dir();
        let config = RuntimeConfig {
            feed: FeedArgs::default(),
            history_endpoint: "http://127.0.0.1:9/unused".to_string(),
            data_dir: data_dir.clone(),
            resume_probe_interval: None,
        };

        let services = MonitorServices::start(&config, Arc::new(RecordingPlatform::granted()))
            .await
            .expect("services should start without push credentials");

        let health = services.health().await;
        assert_eq!(health.db, "ok");
        assert_eq!(health.feed, FeedPhase::Misconfigured);
        assert!(!services.feed().resume());

        let view = services
            .alerts()
            .edit(crate::alerts::AlertEdit::SetSellTarget(Some(3_000_000)))
            .await
            .expect("alert edits should persist");
        assert_eq!(view.sell_input, "3.000.000");

        services.shutdown().await;
        let _ = std::fs::remove_dir_all(data_dir);
    }
}
