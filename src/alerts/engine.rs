use crate::alerts::debounce::{Debouncer, ALERT_DEBOUNCE_QUIET_PERIOD};
use crate::alerts::evaluator::AlertEvaluator;
use crate::alerts::{AlertConfig, AlertEdit, AlertSettingsView};
use crate::error::AppError;
use crate::market::persistence::{load_alert_config, save_alert_config, KeyValueStore};
use crate::market::types::PriceSnapshot;
use crate::notify::NotificationGateway;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const EDIT_QUEUE_CAPACITY: usize = 32;

/// Owns the alert settings: the working config edited by the user, the
/// settled config the evaluator sees, and the cooldown state.
pub struct AlertEngine {
    working: AlertConfig,
    settled: AlertConfig,
    debouncer: Debouncer<AlertConfig>,
    evaluator: AlertEvaluator,
    latest: Option<PriceSnapshot>,
    store: Arc<dyn KeyValueStore>,
    gateway: Arc<NotificationGateway>,
}

impl AlertEngine {
    /// The stored config is treated as already settled.
    pub async fn load(store: Arc<dyn KeyValueStore>, gateway: Arc<NotificationGateway>) -> Self {
        let config = load_alert_config(store.as_ref()).await;
        Self {
            working: config.clone(),
            settled: config,
            debouncer: Debouncer::new(ALERT_DEBOUNCE_QUIET_PERIOD),
            evaluator: AlertEvaluator::default(),
            latest: None,
            store,
            gateway,
        }
    }

    pub fn view(&self) -> AlertSettingsView {
        AlertSettingsView::from_config(&self.working)
    }

    pub fn settled(&self) -> &AlertConfig {
        &self.settled
    }

    pub fn debounce_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    pub async fn apply_edit(
        &mut self,
        edit: &AlertEdit,
        now: Instant,
    ) -> Result<AlertSettingsView, AppError> {
        self.working = edit.apply(&self.working);
        self.debouncer.push(self.working.clone(), now);
        save_alert_config(self.store.as_ref(), &self.working).await?;
        Ok(self.view())
    }

    pub async fn on_snapshot(&mut self, snapshot: PriceSnapshot, now: Instant) {
        self.latest = Some(snapshot);
        self.evaluate(now).await;
    }

    pub async fn on_debounce_elapsed(&mut self, now: Instant) {
        if let Some(config) = self.debouncer.poll(now) {
            tracing::debug!(?config, "alert settings settled");
            self.settled = config;
            self.evaluate(now).await;
        }
    }

    async fn evaluate(&mut self, now: Instant) {
        let Some(snapshot) = self.latest.as_ref() else {
            return;
        };

        for alert in self.evaluator.evaluate(&self.settled, snapshot, now) {
            tracing::info!(direction = alert.direction.as_str(), "price alert triggered");
            if self
                .gateway
                .send(&alert.title, &alert.body, alert.tag)
                .await
                .is_none()
            {
                tracing::warn!(direction = alert.direction.as_str(), "price alert not delivered");
            }
        }
    }
}

struct EditRequest {
    edit: AlertEdit,
    reply: oneshot::Sender<Result<AlertSettingsView, AppError>>,
}

pub struct AlertEngineHandle {
    edits: mpsc::Sender<EditRequest>,
    view: Arc<RwLock<AlertSettingsView>>,
    join_handle: Option<JoinHandle<()>>,
}

impl AlertEngineHandle {
    pub fn settings(&self) -> AlertSettingsView {
        self.view.read().clone()
    }

    pub async fn edit(&self, edit: AlertEdit) -> Result<AlertSettingsView, AppError> {
        let (reply, response) = oneshot::channel();
        self.edits
            .send(EditRequest { edit, reply })
            .await
            .map_err(|_| AppError::InvalidArgument("alert engine is not running".to_string()))?;

        response
            .await
            .map_err(|_| AppError::InvalidArgument("alert engine stopped mid-edit".to_string()))?
    }

    pub async fn join(mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}

pub fn spawn_alert_engine(
    engine: AlertEngine,
    snapshots: broadcast::Receiver<PriceSnapshot>,
    cancel_token: CancellationToken,
) -> AlertEngineHandle {
    let (edits, edit_rx) = mpsc::channel(EDIT_QUEUE_CAPACITY);
    let view = Arc::new(RwLock::new(engine.view()));
    let task_view = Arc::clone(&view);

    let join_handle = tokio::spawn(async move {
        run_alert_engine(engine, snapshots, edit_rx, task_view, cancel_token).await;
    });

    AlertEngineHandle {
        edits,
        view,
        join_handle: Some(join_handle),
    }
}

async fn run_alert_engine(
    mut engine: AlertEngine,
    mut snapshots: broadcast::Receiver<PriceSnapshot>,
    mut edits: mpsc::Receiver<EditRequest>,
    view: Arc<RwLock<AlertSettingsView>>,
    cancel_token: CancellationToken,
) {
    let mut snapshots_open = true;

    loop {
        let deadline = engine.debounce_deadline();
        let debounce_timer = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            request = edits.recv() => {
                let Some(EditRequest { edit, reply }) = request else {
                    break;
                };
                let result = engine.apply_edit(&edit, Instant::now()).await;
                if let Err(error) = &result {
                    tracing::error!(%error, "failed to persist alert settings");
                }
                *view.write() = engine.view();
                let _ = reply.send(result);
            }
            snapshot = snapshots.recv(), if snapshots_open => {
                match snapshot {
                    Ok(snapshot) => engine.on_snapshot(snapshot, Instant::now()).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "alert engine lagged behind price updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => snapshots_open = false,
                }
            }
            _ = debounce_timer => engine.on_debounce_elapsed(Instant::now()).await,
        }
    }

    tracing::debug!("alert engine stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::persistence::{MemoryKvStore, ALERT_CONFIG_KEY};
    use crate::notify::testing::RecordingPlatform;
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryKvStore>,
        platform: Arc<RecordingPlatform>,
        prices: broadcast::Sender<PriceSnapshot>,
        handle: AlertEngineHandle,
        cancel: CancellationToken,
    }

    async fn start_harness(store: MemoryKvStore) -> Harness {
        let store = Arc::new(store);
        let platform = Arc::new(RecordingPlatform::granted());
        let cancel = CancellationToken::new();
        let gateway = Arc::new(NotificationGateway::start(platform.clone(), cancel.clone()).await);
        let engine = AlertEngine::load(store.clone(), gateway).await;
        let (prices, snapshots) = broadcast::channel(16);
        let handle = spawn_alert_engine(engine, snapshots, cancel.clone());

        Harness {
            store,
            platform,
            prices,
            handle,
            cancel,
        }
    }

    fn snapshot(buy: i64, sell: i64) -> PriceSnapshot {
        PriceSnapshot {
            buying_rate: Some(buy),
            selling_rate: Some(sell),
            last_updated_ms: Some(1),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn edits_are_persisted_immediately() {
        let harness = start_harness(MemoryKvStore::default()).await;

        let view = harness
            .handle
            .edit(AlertEdit::BuyTargetText("2800000".to_string()))
            .await
            .expect("edit should succeed");

        assert_eq!(view.buy_input, "2.800.000");
        let stored = harness
            .store
            .raw(ALERT_CONFIG_KEY)
            .expect("settings should be stored");
        assert!(stored.contains(r#""buyTarget":2800000"#));
        assert_eq!(harness.handle.settings(), view);

        harness.cancel.cancel();
        harness.handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn evaluation_waits_for_quiet_period() {
        let harness = start_harness(MemoryKvStore::default()).await;

        harness
            .prices
            .send(snapshot(2_700_000, 2_600_000))
            .expect("engine should be subscribed");
        settle().await;

        harness
            .handle
            .edit(AlertEdit::SetBuyEnabled(true))
            .await
            .expect("edit should succeed");
        harness
            .handle
            .edit(AlertEdit::SetBuyTarget(Some(2_800_000)))
            .await
            .expect("edit should succeed");

        tokio::time::sleep(Duration::from_millis(1_499)).await;
        assert!(harness.platform.shown().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        settle().await;
        let shown = harness.platform.shown();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].tag, "treasury-buy-alert");

        harness.cancel.cancel();
        harness.handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stored_config_is_live_and_cooldown_applies() {
        let store = MemoryKvStore::with_entry(
            ALERT_CONFIG_KEY,
            r#"{"buyEnabled":false,"buyTarget":null,"sellEnabled":true,"sellTarget":2900000}"#,
        );
        let harness = start_harness(store).await;

        for sell in [2_950_000, 3_000_000] {
            harness
                .prices
                .send(snapshot(3_100_000, sell))
                .expect("engine should be subscribed");
            settle().await;
        }
        assert_eq!(harness.platform.shown().len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        harness
            .prices
            .send(snapshot(3_100_000, 2_910_000))
            .expect("engine should be subscribed");
        settle().await;

        let shown = harness.platform.shown();
        assert_eq!(shown.len(), 2);
        assert_eq!(shown[1].tag, "treasury-sell-alert");
        assert!(shown[1].body.contains("Rp\u{a0}2.910.000"));

        harness.cancel.cancel();
        harness.handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn edit_after_shutdown_is_an_error() {
        let harness = start_harness(MemoryKvStore::default()).await;
        harness.cancel.cancel();
        tokio::task::yield_now().await;
        settle().await;

        let result = harness.handle.edit(AlertEdit::ToggleBuy).await;
        assert!(result.is_err());
    }
}
