use crate::error::AppError;
use crate::market::pusher::{ChannelEvent, PushChannel, PusherChannel};
use crate::market::types::{
    ChannelState, FeedArgs, FeedConfig, FeedPhase, FeedStatusSnapshot, GoldRateWire,
    PriceSnapshot, DEFAULT_CONNECTION_ERROR,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const SNAPSHOT_BROADCAST_CAPACITY: usize = 256;
const STATUS_BROADCAST_CAPACITY: usize = 64;
const CONTROL_QUEUE_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedAction {
    Connect,
    Subscribe,
    Unsubscribe,
    Disconnect,
    ScheduleRetry(Duration),
    CancelRetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedControl {
    Resume,
}

/// Connection lifecycle bookkeeping. Pure: every transition returns the
/// side effects the driver has to perform, in order.
#[derive(Debug)]
pub struct FeedMachine {
    phase: FeedPhase,
    retry_count: u32,
    base_retry_delay: Duration,
    max_retries: u32,
    error: Option<String>,
}

impl FeedMachine {
    pub fn new(base_retry_delay: Duration, max_retries: u32) -> Self {
        Self {
            phase: FeedPhase::Idle,
            retry_count: 0,
            base_retry_delay,
            max_retries,
            error: None,
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(config.base_retry_delay, config.max_retries)
    }

    pub fn phase(&self) -> FeedPhase {
        self.phase
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn start(&mut self) -> Vec<FeedAction> {
        self.phase = FeedPhase::Connecting;
        vec![FeedAction::Connect, FeedAction::Subscribe]
    }

    pub fn misconfigure(&mut self, message: String) {
        self.phase = FeedPhase::Misconfigured;
        self.error = Some(message);
    }

    pub fn on_connected(&mut self) {
        self.phase = FeedPhase::Connected;
        self.retry_count = 0;
        self.error = None;
    }

    pub fn on_disconnected(&mut self) {
        if matches!(self.phase, FeedPhase::Connecting | FeedPhase::Connected) {
            self.phase = FeedPhase::Disconnected;
        }
    }

    pub fn on_error(&mut self, message: Option<String>) -> Vec<FeedAction> {
        self.phase = FeedPhase::Failed;
        self.error = Some(
            message
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONNECTION_ERROR.to_string()),
        );

        match self.next_retry_delay() {
            Some(delay) => vec![FeedAction::ScheduleRetry(delay)],
            None => Vec::new(),
        }
    }

    pub fn on_retry_elapsed(&mut self) -> Vec<FeedAction> {
        self.phase = FeedPhase::Connecting;
        vec![FeedAction::Disconnect, FeedAction::Connect]
    }

    pub fn on_resume(&mut self, channel_state: ChannelState) -> Vec<FeedAction> {
        if matches!(self.phase, FeedPhase::Idle | FeedPhase::Misconfigured)
            || !channel_state.is_resumable()
        {
            return Vec::new();
        }

        self.retry_count = 0;
        self.phase = FeedPhase::Connecting;
        vec![
            FeedAction::CancelRetry,
            FeedAction::Disconnect,
            FeedAction::Connect,
        ]
    }

    pub fn teardown(&mut self, channel_state: ChannelState) -> Vec<FeedAction> {
        let mut actions = vec![FeedAction::CancelRetry, FeedAction::Unsubscribe];
        if !channel_state.is_closed() {
            actions.push(FeedAction::Disconnect);
        }
        self.phase = FeedPhase::Idle;
        actions
    }

    fn next_retry_delay(&mut self) -> Option<Duration> {
        if self.retry_count >= self.max_retries {
            return None;
        }

        let factor = 1_u32.checked_shl(self.retry_count).unwrap_or(u32::MAX);
        self.retry_count += 1;
        Some(self.base_retry_delay.saturating_mul(factor))
    }
}

/// Shared view of the feed: latest snapshot and status for polling, plus
/// ordered broadcasts for subscribers.
#[derive(Clone)]
pub struct FeedPublisher {
    status_store: Arc<RwLock<FeedStatusSnapshot>>,
    latest_snapshot: Arc<RwLock<PriceSnapshot>>,
    snapshots: broadcast::Sender<PriceSnapshot>,
    statuses: broadcast::Sender<FeedStatusSnapshot>,
}

impl Default for FeedPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedPublisher {
    pub fn new() -> Self {
        let (snapshots, _) = broadcast::channel(SNAPSHOT_BROADCAST_CAPACITY);
        let (statuses, _) = broadcast::channel(STATUS_BROADCAST_CAPACITY);
        Self {
            status_store: Arc::new(RwLock::new(FeedStatusSnapshot::idle())),
            latest_snapshot: Arc::new(RwLock::new(PriceSnapshot::default())),
            snapshots,
            statuses,
        }
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<PriceSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn subscribe_statuses(&self) -> broadcast::Receiver<FeedStatusSnapshot> {
        self.statuses.subscribe()
    }

    pub async fn status(&self) -> FeedStatusSnapshot {
        self.status_store.read().await.clone()
    }

    pub async fn latest_snapshot(&self) -> PriceSnapshot {
        self.latest_snapshot.read().await.clone()
    }

    async fn publish_snapshot(&self, snapshot: PriceSnapshot) {
        {
            let mut writable = self.latest_snapshot.write().await;
            *writable = snapshot.clone();
        }
        let _ = self.snapshots.send(snapshot);
    }

    async fn publish_status(&self, machine: &FeedMachine, channel_state: ChannelState) {
        let latest = self.latest_snapshot.read().await.clone();
        let snapshot = FeedStatusSnapshot {
            phase: machine.phase(),
            channel_state,
            error: machine.error().map(str::to_string),
            retry_count: machine.retry_count(),
            is_connected: machine.phase() == FeedPhase::Connected && latest.has_both_rates(),
            last_updated_ms: latest.last_updated_ms,
        };

        {
            let mut writable = self.status_store.write().await;
            *writable = snapshot.clone();
        }
        let _ = self.statuses.send(snapshot);
    }
}

pub struct FeedHandle {
    publisher: FeedPublisher,
    controls: Option<mpsc::Sender<FeedControl>>,
    join_handle: Option<JoinHandle<()>>,
}

impl FeedHandle {
    pub fn publisher(&self) -> &FeedPublisher {
        &self.publisher
    }

    pub fn resume(&self) -> bool {
        match self.controls.as_ref() {
            Some(controls) => controls.try_send(FeedControl::Resume).is_ok(),
            None => false,
        }
    }

    pub async fn join(mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}

/// Starts the realtime feed against the Pusher transport. Missing connection
/// settings leave the feed in the terminal misconfigured phase.
pub async fn start_realtime_feed(
    args: FeedArgs,
    publisher: FeedPublisher,
    cancel_token: CancellationToken,
) -> FeedHandle {
    let config = match args.normalize() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "realtime feed not started");
            let mut machine = FeedMachine::new(Duration::ZERO, 0);
            machine.misconfigure(error.to_string());
            publisher
                .publish_status(&machine, ChannelState::Initialized)
                .await;
            return FeedHandle {
                publisher,
                controls: None,
                join_handle: None,
            };
        }
    };

    let (channel, events) = PusherChannel::new(&config);
    spawn_feed(channel, events, config, publisher, cancel_token)
}

pub fn spawn_feed<C>(
    channel: C,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    config: FeedConfig,
    publisher: FeedPublisher,
    cancel_token: CancellationToken,
) -> FeedHandle
where
    C: PushChannel + 'static,
{
    let (controls, control_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
    let task_publisher = publisher.clone();
    let join_handle = tokio::spawn(async move {
        run_realtime_feed(
            channel,
            events,
            control_rx,
            config,
            task_publisher,
            cancel_token,
        )
        .await;
    });

    FeedHandle {
        publisher,
        controls: Some(controls),
        join_handle: Some(join_handle),
    }
}

pub async fn run_realtime_feed<C: PushChannel>(
    mut channel: C,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    mut controls: mpsc::Receiver<FeedControl>,
    config: FeedConfig,
    publisher: FeedPublisher,
    cancel_token: CancellationToken,
) {
    let mut machine = FeedMachine::from_config(&config);
    let mut retry_at: Option<Instant> = None;
    let mut controls_open = true;

    tracing::info!(
        channel = %config.channel_name,
        event = %config.event_name,
        "starting realtime feed"
    );
    let actions = machine.start();
    apply_actions(&mut channel, &config, &machine, actions, &mut retry_at);
    publisher.publish_status(&machine, channel.state()).await;

    loop {
        let retry_deadline = retry_at;
        let retry_timer = async move {
            match retry_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                handle_channel_event(
                    event,
                    &mut channel,
                    &config,
                    &mut machine,
                    &publisher,
                    &mut retry_at,
                )
                .await;
            }
            control = controls.recv(), if controls_open => {
                match control {
                    Some(FeedControl::Resume) => {
                        let channel_state = channel.state();
                        let actions = machine.on_resume(channel_state);
                        if actions.is_empty() {
                            tracing::debug!(state = channel_state.as_str(), "resume ignored");
                        } else {
                            tracing::info!(state = channel_state.as_str(), "app resumed, reconnecting");
                            apply_actions(&mut channel, &config, &machine, actions, &mut retry_at);
                        }
                    }
                    None => controls_open = false,
                }
            }
            _ = retry_timer => {
                retry_at = None;
                tracing::info!(
                    attempt = machine.retry_count(),
                    max = config.max_retries,
                    "retrying connection"
                );
                let actions = machine.on_retry_elapsed();
                apply_actions(&mut channel, &config, &machine, actions, &mut retry_at);
            }
        }

        publisher.publish_status(&machine, channel.state()).await;
    }

    let actions = machine.teardown(channel.state());
    apply_actions(&mut channel, &config, &machine, actions, &mut retry_at);
    publisher.publish_status(&machine, channel.state()).await;
    tracing::info!("realtime feed stopped");
}

async fn handle_channel_event<C: PushChannel>(
    event: ChannelEvent,
    channel: &mut C,
    config: &FeedConfig,
    machine: &mut FeedMachine,
    publisher: &FeedPublisher,
    retry_at: &mut Option<Instant>,
) {
    match event {
        ChannelEvent::Connected => {
            tracing::info!("push channel connected");
            machine.on_connected();
        }
        ChannelEvent::Disconnected => {
            tracing::info!("push channel disconnected");
            machine.on_disconnected();
        }
        ChannelEvent::Error(message) => {
            tracing::warn!(error = %message, "push channel error");
            let actions = machine.on_error(Some(message));
            if actions.is_empty() {
                tracing::error!(
                    retries = machine.retry_count(),
                    "giving up automatic reconnects until the app resumes"
                );
            }
            apply_actions(channel, config, machine, actions, retry_at);
        }
        ChannelEvent::Message {
            channel: channel_name,
            event,
            payload,
        } => {
            if channel_name != config.channel_name || event != config.event_name {
                return;
            }
            match decode_price_event(payload, now_unix_ms()) {
                Ok(snapshot) => publisher.publish_snapshot(snapshot).await,
                Err(error) => tracing::warn!(%error, "dropping undecodable price event"),
            }
        }
    }
}

fn apply_actions<C: PushChannel>(
    channel: &mut C,
    config: &FeedConfig,
    machine: &FeedMachine,
    actions: Vec<FeedAction>,
    retry_at: &mut Option<Instant>,
) {
    for action in actions {
        match action {
            FeedAction::Connect => channel.connect(),
            FeedAction::Subscribe => channel.subscribe(&config.channel_name),
            FeedAction::Unsubscribe => channel.unsubscribe(&config.channel_name),
            FeedAction::Disconnect => {
                if let Err(error) = channel.disconnect() {
                    tracing::debug!(%error, "ignoring disconnect failure");
                }
            }
            FeedAction::ScheduleRetry(delay) => {
                tracing::info!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = machine.retry_count(),
                    max = config.max_retries,
                    "scheduling reconnect"
                );
                *retry_at = Some(Instant::now() + delay);
            }
            FeedAction::CancelRetry => *retry_at = None,
        }
    }
}

pub fn decode_price_event(payload: String, now_unix_ms: i64) -> Result<PriceSnapshot, AppError> {
    let mut bytes = payload.into_bytes();
    let wire: GoldRateWire = simd_json::serde::from_slice(bytes.as_mut_slice())?;
    Ok(wire.into_snapshot(now_unix_ms))
}

fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    const BASE: Duration = Duration::from_millis(2_000);

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum MockCall {
        Connect,
        Subscribe,
        Unsubscribe,
        Disconnect,
    }

    #[derive(Clone, Default)]
    struct MockChannel {
        calls: Arc<Mutex<Vec<(MockCall, Instant)>>>,
        state: Arc<Mutex<Option<ChannelState>>>,
        fail_disconnect: bool,
    }

    impl MockChannel {
        fn set_state(&self, state: ChannelState) {
            *self.state.lock() = Some(state);
        }

        fn calls(&self) -> Vec<MockCall> {
            self.calls.lock().iter().map(|(call, _)| *call).collect()
        }

        fn connect_times(&self) -> Vec<Instant> {
            self.calls
                .lock()
                .iter()
                .filter(|(call, _)| *call == MockCall::Connect)
                .map(|(_, at)| *at)
                .collect()
        }

        fn record(&self, call: MockCall) {
            self.calls.lock().push((call, Instant::now()));
        }
    }

    impl PushChannel for MockChannel {
        fn connect(&mut self) {
            self.record(MockCall::Connect);
            self.set_state(ChannelState::Connecting);
        }

        fn subscribe(&mut self, _channel: &str) {
            self.record(MockCall::Subscribe);
        }

        fn unsubscribe(&mut self, _channel: &str) {
            self.record(MockCall::Unsubscribe);
        }

        fn disconnect(&mut self) -> Result<(), AppError> {
            self.record(MockCall::Disconnect);
            self.set_state(ChannelState::Disconnected);
            if self.fail_disconnect {
                return Err(AppError::Connection("disconnect during reentry".to_string()));
            }
            Ok(())
        }

        fn state(&self) -> ChannelState {
            self.state.lock().unwrap_or(ChannelState::Initialized)
        }
    }

    fn feed_config() -> FeedConfig {
        FeedConfig {
            app_key: "key".to_string(),
            cluster: "ap1".to_string(),
            channel_name: "gold-rate".to_string(),
            event_name: "gold-rate-event".to_string(),
            base_retry_delay: BASE,
            max_retries: 3,
        }
    }

    struct Harness {
        mock: MockChannel,
        events: mpsc::UnboundedSender<ChannelEvent>,
        handle: FeedHandle,
        statuses: broadcast::Receiver<FeedStatusSnapshot>,
        cancel: CancellationToken,
    }

    // Waits for the initial connect so later `set_state` calls stick.
    async fn start_harness(mock: MockChannel) -> Harness {
        let (events, event_rx) = mpsc::unbounded_channel();
        let publisher = FeedPublisher::new();
        let mut statuses = publisher.subscribe_statuses();
        let cancel = CancellationToken::new();
        let handle = spawn_feed(mock.clone(), event_rx, feed_config(), publisher, cancel.clone());
        next_status_where(&mut statuses, |status| status.phase == FeedPhase::Connecting).await;
        assert_eq!(mock.connect_times().len(), 1);
        Harness {
            mock,
            events,
            handle,
            statuses,
            cancel,
        }
    }

    async fn next_status_where(
        statuses: &mut broadcast::Receiver<FeedStatusSnapshot>,
        predicate: impl Fn(&FeedStatusSnapshot) -> bool,
    ) -> FeedStatusSnapshot {
        loop {
            let status = statuses.recv().await.expect("status stream should stay open");
            if predicate(&status) {
                return status;
            }
        }
    }

    #[test]
    fn retry_delays_double_until_cap() {
        let mut machine = FeedMachine::new(BASE, 3);
        machine.start();

        assert_eq!(machine.on_error(None), vec![FeedAction::ScheduleRetry(BASE)]);
        assert_eq!(machine.on_retry_elapsed(), vec![FeedAction::Disconnect, FeedAction::Connect]);
        assert_eq!(
            machine.on_error(Some("boom".to_string())),
            vec![FeedAction::ScheduleRetry(BASE * 2)]
        );
        machine.on_retry_elapsed();
        assert_eq!(
            machine.on_error(Some("boom".to_string())),
            vec![FeedAction::ScheduleRetry(BASE * 4)]
        );
        machine.on_retry_elapsed();
        assert!(machine.on_error(Some("boom".to_string())).is_empty());
        assert_eq!(machine.phase(), FeedPhase::Failed);
        assert_eq!(machine.retry_count(), 3);
    }

    #[test]
    fn connecting_resets_retries_and_clears_error() {
        let mut machine = FeedMachine::new(BASE, 3);
        machine.start();
        machine.on_error(Some("boom".to_string()));
        assert_eq!(machine.error(), Some("boom"));

        machine.on_connected();
        assert_eq!(machine.phase(), FeedPhase::Connected);
        assert_eq!(machine.retry_count(), 0);
        assert_eq!(machine.error(), None);
    }

    #[test]
    fn blank_error_message_uses_default() {
        let mut machine = FeedMachine::new(BASE, 3);
        machine.start();
        machine.on_error(Some("  ".to_string()));
        assert_eq!(machine.error(), Some(DEFAULT_CONNECTION_ERROR));
    }

    #[test]
    fn disconnect_only_leaves_active_phases() {
        let mut machine = FeedMachine::new(BASE, 3);
        machine.start();
        machine.on_error(None);
        machine.on_disconnected();
        assert_eq!(machine.phase(), FeedPhase::Failed);

        machine.on_retry_elapsed();
        machine.on_connected();
        machine.on_disconnected();
        assert_eq!(machine.phase(), FeedPhase::Disconnected);
    }

    #[test]
    fn resume_only_restarts_from_resumable_states() {
        let mut machine = FeedMachine::new(BASE, 3);
        machine.start();
        machine.on_connected();
        assert!(machine.on_resume(ChannelState::Connected).is_empty());

        machine.on_error(None);
        assert_eq!(machine.retry_count(), 1);
        assert_eq!(
            machine.on_resume(ChannelState::Failed),
            vec![
                FeedAction::CancelRetry,
                FeedAction::Disconnect,
                FeedAction::Connect
            ]
        );
        assert_eq!(machine.retry_count(), 0);
        assert_eq!(machine.phase(), FeedPhase::Connecting);
    }

    #[test]
    fn misconfigured_feed_ignores_resume() {
        let mut machine = FeedMachine::new(BASE, 3);
        machine.misconfigure("missing key".to_string());
        assert!(machine.on_resume(ChannelState::Unavailable).is_empty());
        assert_eq!(machine.phase(), FeedPhase::Misconfigured);
    }

    #[test]
    fn teardown_skips_redundant_disconnect() {
        let mut machine = FeedMachine::new(BASE, 3);
        machine.start();
        assert_eq!(
            machine.teardown(ChannelState::Failed),
            vec![FeedAction::CancelRetry, FeedAction::Unsubscribe]
        );

        let mut machine = FeedMachine::new(BASE, 3);
        machine.start();
        assert_eq!(
            machine.teardown(ChannelState::Connected),
            vec![
                FeedAction::CancelRetry,
                FeedAction::Unsubscribe,
                FeedAction::Disconnect
            ]
        );
    }

    #[test]
    fn decodes_price_event_payload() {
        let snapshot = decode_price_event(
            r#"{"buying_rate":"2.885.222","selling_rate":"2.790.000"}"#.to_string(),
            42,
        )
        .expect("payload should decode");

        assert_eq!(snapshot.buying_rate, Some(2_885_222));
        assert_eq!(snapshot.selling_rate, Some(2_790_000));
        assert_eq!(snapshot.last_updated_ms, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_exponential_backoff_then_stops() {
        let mut harness = start_harness(MockChannel::default()).await;

        for expected_delay in [BASE, BASE * 2, BASE * 4] {
            harness.mock.set_state(ChannelState::Unavailable);
            harness
                .events
                .send(ChannelEvent::Error("unreachable".to_string()))
                .expect("feed should be running");
            next_status_where(&mut harness.statuses, |status| {
                status.phase == FeedPhase::Failed
            })
            .await;
            let failed_at = Instant::now();

            next_status_where(&mut harness.statuses, |status| {
                status.phase == FeedPhase::Connecting
            })
            .await;
            let last_connect = *harness
                .mock
                .connect_times()
                .last()
                .expect("a reconnect should have been issued");
            assert_eq!(last_connect - failed_at, expected_delay);
        }

        harness.mock.set_state(ChannelState::Unavailable);
        harness
            .events
            .send(ChannelEvent::Error("unreachable".to_string()))
            .expect("feed should be running");
        let exhausted = next_status_where(&mut harness.statuses, |status| {
            status.phase == FeedPhase::Failed
        })
        .await;
        assert_eq!(exhausted.retry_count, 3);

        let connects_before = harness.mock.connect_times().len();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(harness.mock.connect_times().len(), connects_before);

        harness.cancel.cancel();
        harness.handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn resume_reconnects_immediately_while_failed() {
        let mut harness = start_harness(MockChannel::default()).await;

        harness.mock.set_state(ChannelState::Failed);
        harness
            .events
            .send(ChannelEvent::Error("socket closed".to_string()))
            .expect("feed should be running");
        let failed = next_status_where(&mut harness.statuses, |status| {
            status.phase == FeedPhase::Failed
        })
        .await;
        assert_eq!(failed.retry_count, 1);

        let resumed_at = Instant::now();
        assert!(harness.handle.resume());
        let resumed = next_status_where(&mut harness.statuses, |status| {
            status.phase == FeedPhase::Connecting
        })
        .await;

        assert_eq!(resumed.retry_count, 0);
        let calls = harness.mock.calls();
        assert_eq!(
            &calls[calls.len() - 2..],
            &[MockCall::Disconnect, MockCall::Connect]
        );
        let last_connect = *harness.mock.connect_times().last().expect("connect issued");
        assert_eq!(last_connect, resumed_at);

        // The cancelled backoff timer must not fire a second reconnect.
        let connects = harness.mock.connect_times().len();
        tokio::time::sleep(BASE * 2).await;
        assert_eq!(harness.mock.connect_times().len(), connects);

        harness.cancel.cancel();
        harness.handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn resume_is_ignored_while_connected() {
        let mut harness = start_harness(MockChannel::default()).await;

        harness.mock.set_state(ChannelState::Connected);
        harness
            .events
            .send(ChannelEvent::Connected)
            .expect("feed should be running");
        next_status_where(&mut harness.statuses, |status| {
            status.phase == FeedPhase::Connected
        })
        .await;

        assert!(harness.handle.resume());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(harness.mock.connect_times().len(), 1);

        harness.cancel.cancel();
        harness.handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_snapshots_in_delivery_order() {
        let mut harness = start_harness(MockChannel::default()).await;
        let mut snapshots = harness.handle.publisher().subscribe_snapshots();

        harness.mock.set_state(ChannelState::Connected);
        harness
            .events
            .send(ChannelEvent::Connected)
            .expect("feed should be running");
        for (buy, sell) in [("2.900.000", "2.800.000"), ("2.850.000", "2.750.000")] {
            harness
                .events
                .send(ChannelEvent::Message {
                    channel: "gold-rate".to_string(),
                    event: "gold-rate-event".to_string(),
                    payload: format!(r#"{{"buying_rate":"{buy}","selling_rate":"{sell}"}}"#),
                })
                .expect("feed should be running");
        }
        harness
            .events
            .send(ChannelEvent::Message {
                channel: "other-channel".to_string(),
                event: "gold-rate-event".to_string(),
                payload: r#"{"buying_rate":"1.000","selling_rate":"1.000"}"#.to_string(),
            })
            .expect("feed should be running");

        let first = snapshots.recv().await.expect("first snapshot");
        let second = snapshots.recv().await.expect("second snapshot");
        assert_eq!(first.buying_rate, Some(2_900_000));
        assert_eq!(second.buying_rate, Some(2_850_000));
        assert_eq!(second.selling_rate, Some(2_750_000));

        let live = next_status_where(&mut harness.statuses, |status| status.is_connected).await;
        assert_eq!(live.phase, FeedPhase::Connected);

        harness.cancel.cancel();
        harness.handle.join().await;
        assert!(snapshots.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_unsubscribes_and_swallows_disconnect_errors() {
        let mock = MockChannel {
            fail_disconnect: true,
            ..MockChannel::default()
        };
        let mut harness = start_harness(mock).await;

        harness.mock.set_state(ChannelState::Connected);
        harness
            .events
            .send(ChannelEvent::Connected)
            .expect("feed should be running");
        next_status_where(&mut harness.statuses, |status| {
            status.phase == FeedPhase::Connected
        })
        .await;

        harness.cancel.cancel();
        harness.handle.join().await;

        assert_eq!(
            harness.mock.calls(),
            vec![
                MockCall::Connect,
                MockCall::Subscribe,
                MockCall::Unsubscribe,
                MockCall::Disconnect
            ]
        );
    }

    #[tokio::test]
    async fn missing_configuration_is_terminal() {
        let publisher = FeedPublisher::new();
        let handle = start_realtime_feed(
            FeedArgs::default(),
            publisher.clone(),
            CancellationToken::new(),
        )
        .await;

        let status = publisher.status().await;
        assert_eq!(status.phase, FeedPhase::Misconfigured);
        assert!(status.error.is_some());
        assert!(!handle.resume());
    }
}
