use crate::error::AppError;
use crate::market::types::{ChannelState, FeedConfig, DEFAULT_CONNECTION_ERROR};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

const PUSHER_PROTOCOL_VERSION: u8 = 7;
const PUSHER_CLIENT_NAME: &str = "gold-watch";
const DEFAULT_ACTIVITY_TIMEOUT_SECS: u64 = 120;
const MAX_ACTIVITY_TIMEOUT_SECS: u64 = 120;
const PONG_TIMEOUT: Duration = Duration::from_secs(30);

const EVENT_CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
const EVENT_ERROR: &str = "pusher:error";
const EVENT_PING: &str = "pusher:ping";
const EVENT_PONG: &str = "pusher:pong";
const EVENT_SUBSCRIBE: &str = "pusher:subscribe";
const EVENT_UNSUBSCRIBE: &str = "pusher:unsubscribe";
const EVENT_SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";

pub type PusherWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Error(String),
    Message {
        channel: String,
        event: String,
        payload: String,
    },
}

/// A long-lived subscription transport. Connection outcomes are reported
/// asynchronously as [`ChannelEvent`]s on the receiver handed out at
/// construction.
pub trait PushChannel: Send {
    fn connect(&mut self);
    fn subscribe(&mut self, channel: &str);
    fn unsubscribe(&mut self, channel: &str);
    fn disconnect(&mut self) -> Result<(), AppError>;
    fn state(&self) -> ChannelState;
}

fn ws_endpoint(app_key: &str, cluster: &str) -> String {
    format!(
        "wss://ws-{cluster}.pusher.com/app/{app_key}?protocol={PUSHER_PROTOCOL_VERSION}&client={PUSHER_CLIENT_NAME}&version={}&flash=false",
        env!("CARGO_PKG_VERSION")
    )
}

#[derive(Debug, Deserialize)]
struct PusherFrameWire {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Option<simd_json::OwnedValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PusherFrame {
    pub event: String,
    pub channel: Option<String>,
    pub payload: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionEstablishedWire {
    #[allow(dead_code)]
    socket_id: String,
    #[serde(default)]
    activity_timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PusherErrorWire {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

#[derive(Debug, Serialize)]
struct OutboundFrame<'a, T: Serialize> {
    event: &'a str,
    data: T,
}

#[derive(Debug, Serialize)]
struct ChannelRef<'a> {
    channel: &'a str,
}

#[derive(Debug, Serialize)]
struct EmptyData {}

/// Decodes a raw Pusher frame. `data` may arrive JSON-encoded inside a string
/// or as an inline object; both are flattened into a JSON text payload.
pub fn decode_frame(text: String) -> Result<PusherFrame, AppError> {
    let mut bytes = text.into_bytes();
    let wire: PusherFrameWire = simd_json::serde::from_slice(bytes.as_mut_slice())?;

    let payload = match wire.data {
        Some(simd_json::OwnedValue::String(encoded)) => encoded,
        Some(inline) => simd_json::serde::to_string(&inline)?,
        None => "{}".to_string(),
    };

    Ok(PusherFrame {
        event: wire.event,
        channel: wire.channel,
        payload,
    })
}

fn encode_frame<T: Serialize>(event: &str, data: T) -> Result<String, AppError> {
    Ok(simd_json::serde::to_string(&OutboundFrame { event, data })?)
}

fn subscribe_frame(channel: &str) -> Result<String, AppError> {
    encode_frame(EVENT_SUBSCRIBE, ChannelRef { channel })
}

fn unsubscribe_frame(channel: &str) -> Result<String, AppError> {
    encode_frame(EVENT_UNSUBSCRIBE, ChannelRef { channel })
}

fn pusher_error_message(payload: &str) -> String {
    let mut bytes = payload.as_bytes().to_vec();
    match simd_json::serde::from_slice::<PusherErrorWire>(bytes.as_mut_slice()) {
        Ok(PusherErrorWire {
            message: Some(message),
            code: Some(code),
        }) => format!("{message} (code {code})"),
        Ok(PusherErrorWire {
            message: Some(message),
            ..
        }) => message,
        _ => DEFAULT_CONNECTION_ERROR.to_string(),
    }
}

fn activity_timeout_from(payload: &str) -> Duration {
    let mut bytes = payload.as_bytes().to_vec();
    let seconds = simd_json::serde::from_slice::<ConnectionEstablishedWire>(bytes.as_mut_slice())
        .ok()
        .and_then(|wire| wire.activity_timeout)
        .filter(|seconds| *seconds > 0)
        .unwrap_or(DEFAULT_ACTIVITY_TIMEOUT_SECS)
        .min(MAX_ACTIVITY_TIMEOUT_SECS);
    Duration::from_secs(seconds)
}

pub async fn connect_pusher_socket(endpoint: &str) -> Result<PusherWsStream, AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(1 << 20),
        max_frame_size: Some(1 << 20),
        ..Default::default()
    };

    let (stream, _) = connect_async_with_config(endpoint, Some(ws_config), false).await?;
    Ok(stream)
}

#[derive(Default)]
struct PusherShared {
    state: Mutex<Option<ChannelState>>,
    subscriptions: Mutex<Vec<String>>,
}

impl PusherShared {
    fn set_state(&self, state: ChannelState) {
        *self.state.lock() = Some(state);
    }

    fn state(&self) -> ChannelState {
        self.state.lock().unwrap_or(ChannelState::Initialized)
    }
}

struct PusherConnection {
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<String>,
}

pub struct PusherChannel {
    endpoint: String,
    shared: Arc<PusherShared>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    connection: Option<PusherConnection>,
}

impl PusherChannel {
    pub fn new(config: &FeedConfig) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        Self::with_endpoint(ws_endpoint(&config.app_key, &config.cluster))
    }

    pub fn with_endpoint(endpoint: String) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let channel = Self {
            endpoint,
            shared: Arc::new(PusherShared::default()),
            events,
            connection: None,
        };
        (channel, receiver)
    }

    fn send_frame(&self, frame: Result<String, AppError>) {
        let Some(connection) = self.connection.as_ref() else {
            return;
        };
        if self.shared.state() != ChannelState::Connected {
            return;
        }
        match frame {
            Ok(text) => {
                let _ = connection.outbound.send(text);
            }
            Err(error) => tracing::warn!(%error, "failed to encode pusher frame"),
        }
    }
}

impl PushChannel for PusherChannel {
    fn connect(&mut self) {
        if let Some(previous) = self.connection.take() {
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        self.shared.set_state(ChannelState::Connecting);

        tokio::spawn(run_connection(
            self.endpoint.clone(),
            Arc::clone(&self.shared),
            self.events.clone(),
            outbound_rx,
            cancel.clone(),
        ));

        self.connection = Some(PusherConnection { cancel, outbound });
    }

    fn subscribe(&mut self, channel: &str) {
        {
            let mut subscriptions = self.shared.subscriptions.lock();
            if subscriptions.iter().any(|existing| existing == channel) {
                return;
            }
            subscriptions.push(channel.to_string());
        }
        self.send_frame(subscribe_frame(channel));
    }

    fn unsubscribe(&mut self, channel: &str) {
        self.shared
            .subscriptions
            .lock()
            .retain(|existing| existing != channel);
        self.send_frame(unsubscribe_frame(channel));
    }

    fn disconnect(&mut self) -> Result<(), AppError> {
        if let Some(connection) = self.connection.take() {
            connection.cancel.cancel();
        }
        self.shared.set_state(ChannelState::Disconnected);
        Ok(())
    }

    fn state(&self) -> ChannelState {
        self.shared.state()
    }
}

enum SessionEnd {
    Closed,
    Failed(String),
}

/// `None` once cancelled, so a stale session cannot report `Connected`.
fn establish_session(
    payload: &str,
    shared: &PusherShared,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    cancel: &CancellationToken,
) -> Option<Duration> {
    if cancel.is_cancelled() {
        return None;
    }
    shared.set_state(ChannelState::Connected);
    let _ = events.send(ChannelEvent::Connected);
    Some(activity_timeout_from(payload))
}

async fn run_connection(
    endpoint: String,
    shared: Arc<PusherShared>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        result = connect_pusher_socket(&endpoint) => result,
    };

    let websocket_stream = match connected {
        Ok(stream) => stream,
        Err(error) => {
            if !cancel.is_cancelled() {
                shared.set_state(ChannelState::Unavailable);
                let _ = events.send(ChannelEvent::Error(error.to_string()));
            }
            return;
        }
    };

    let (mut sink, mut source) = websocket_stream.split();
    let mut activity_timeout = Duration::from_secs(DEFAULT_ACTIVITY_TIMEOUT_SECS);
    let mut read_deadline = Instant::now() + activity_timeout;
    let mut awaiting_pong = false;

    let outcome = loop {
        let next_message = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            Some(frame) = outbound_rx.recv() => {
                if let Err(error) = sink.send(Message::Text(frame)).await {
                    break SessionEnd::Failed(error.to_string());
                }
                continue;
            }
            next_message = tokio::time::timeout_at(read_deadline, source.next()) => next_message,
        };

        let message = match next_message {
            Err(_) if awaiting_pong => {
                break SessionEnd::Failed("activity timeout: server stopped responding".to_string());
            }
            Err(_) => {
                awaiting_pong = true;
                read_deadline = Instant::now() + PONG_TIMEOUT;
                let ping = match encode_frame(EVENT_PING, EmptyData {}) {
                    Ok(ping) => ping,
                    Err(error) => break SessionEnd::Failed(error.to_string()),
                };
                if let Err(error) = sink.send(Message::Text(ping)).await {
                    break SessionEnd::Failed(error.to_string());
                }
                continue;
            }
            Ok(None) => break SessionEnd::Closed,
            Ok(Some(Err(error))) => break SessionEnd::Failed(error.to_string()),
            Ok(Some(Ok(message))) => message,
        };
        awaiting_pong = false;
        read_deadline = Instant::now() + activity_timeout;

        let text = match message {
            Message::Text(text) => text,
            Message::Binary(binary) => match String::from_utf8(binary) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Message::Close(_) => break SessionEnd::Closed,
            _ => continue,
        };

        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(%error, "dropping undecodable pusher frame");
                continue;
            }
        };

        match frame.event.as_str() {
            EVENT_CONNECTION_ESTABLISHED => {
                let Some(timeout) = establish_session(&frame.payload, &shared, &events, &cancel)
                else {
                    return;
                };
                activity_timeout = timeout;
                read_deadline = Instant::now() + activity_timeout;

                let subscriptions = shared.subscriptions.lock().clone();
                for channel in subscriptions {
                    let subscribe = match subscribe_frame(&channel) {
                        Ok(subscribe) => subscribe,
                        Err(error) => {
                            tracing::warn!(%error, channel = %channel, "failed to encode subscribe frame");
                            continue;
                        }
                    };
                    if let Err(error) = sink.send(Message::Text(subscribe)).await {
                        tracing::warn!(%error, channel = %channel, "failed to send subscribe frame");
                    }
                }
            }
            EVENT_ERROR => break SessionEnd::Failed(pusher_error_message(&frame.payload)),
            EVENT_PING => {
                if let Ok(pong) = encode_frame(EVENT_PONG, EmptyData {}) {
                    let _ = sink.send(Message::Text(pong)).await;
                }
            }
            EVENT_PONG => {}
            EVENT_SUBSCRIPTION_SUCCEEDED => {
                tracing::debug!(channel = ?frame.channel, "channel subscription confirmed");
            }
            _ => {
                if let Some(channel) = frame.channel {
                    let _ = events.send(ChannelEvent::Message {
                        channel,
                        event: frame.event,
                        payload: frame.payload,
                    });
                }
            }
        }
    };

    if cancel.is_cancelled() {
        return;
    }

    match outcome {
        SessionEnd::Closed => {
            shared.set_state(ChannelState::Disconnected);
            let _ = events.send(ChannelEvent::Disconnected);
        }
        SessionEnd::Failed(message) => {
            shared.set_state(ChannelState::Failed);
            let _ = events.send(ChannelEvent::Error(message));
        }
    }
}
