use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::types::{MinedTxEvent, MinedTxOptions, RpcFrame, SubscriptionRequest, SUBSCRIPTION_METHOD};
use crate::error::StreamError;

pub const ALCHEMY_WS_URL: &str = "wss://eth-mainnet.g.alchemy.com/v2/";

/// Capacity of the decoded event channel handed to the subscriber.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

const SUBSCRIPTION_REQUEST_ID: u64 = 1;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Output of a successful subscription.
///
/// `failures` resolves at most once, when the read loop dies on a transport
/// error. There is no reconnect: after a failure `events` yields nothing more.
/// A closed `failures` channel means the loop stopped on purpose.
#[derive(Debug)]
pub struct Subscription {
    pub events: mpsc::Receiver<MinedTxEvent>,
    pub failures: oneshot::Receiver<StreamError>,
}

/// Source of mined transaction events.
#[async_trait]
pub trait MinedTxSource: Send + Sync {
    async fn subscribe_mined_transactions(&self, options: MinedTxOptions) -> Result<Subscription, StreamError>;

    async fn close(&self) -> Result<(), StreamError>;
}

/// One Alchemy websocket connection carrying a single subscription.
pub struct AlchemyClient {
    writer: Mutex<WsWriter>,
    reader: Mutex<Option<WsReader>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl AlchemyClient {
    pub async fn connect(url: &str) -> Result<Self, StreamError> {
        info!("🔌 Connecting to Alchemy: {}", mask_endpoint(url));
        let (stream, _) = connect_async(url).await.map_err(StreamError::Connect)?;
        let (writer, reader) = stream.split();

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(Some(reader)),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub async fn subscribe(&self, options: MinedTxOptions) -> Result<Subscription, StreamError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Closed);
        }

        let request = SubscriptionRequest::mined_transactions(SUBSCRIPTION_REQUEST_ID, &options);
        let payload = serde_json::to_string(&request)?;

        let mut reader = self.reader.lock().await;
        let source = reader.take().ok_or(StreamError::AlreadySubscribed)?;

        let sent = {
            let mut writer = self.writer.lock().await;
            writer.send(Message::Text(payload.into())).await
        };
        if let Err(e) = sent {
            *reader = Some(source);
            return Err(StreamError::Subscribe(e));
        }

        debug!(filters = options.addresses.len(), "subscription request sent");

        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (failure_tx, failures) = oneshot::channel();
        tokio::spawn(read_loop(source, events_tx, failure_tx, self.shutdown.clone()));

        Ok(Subscription { events, failures })
    }

    /// Stops the read loop and closes the socket with a normal closure.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<(), StreamError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.cancel();

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client closed".into(),
        };
        let mut writer = self.writer.lock().await;
        match writer.send(Message::Close(Some(frame))).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                info!("[AlchemyClient] Connection closed");
                Ok(())
            }
            Err(e) => Err(StreamError::Close(e)),
        }
    }
}

#[async_trait]
impl MinedTxSource for AlchemyClient {
    async fn subscribe_mined_transactions(&self, options: MinedTxOptions) -> Result<Subscription, StreamError> {
        self.subscribe(options).await
    }

    async fn close(&self) -> Result<(), StreamError> {
        self.shutdown().await
    }
}

async fn read_loop(
    mut source: WsReader,
    events: mpsc::Sender<MinedTxEvent>,
    failure: oneshot::Sender<StreamError>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("[AlchemyClient] Read loop stopped due to cancellation");
                return;
            }
            message = source.next() => message,
        };

        let decoded = match message {
            Some(Ok(Message::Text(text))) => decode_frame(text.as_bytes()),
            Some(Ok(Message::Binary(data))) => decode_frame(&data),
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| format!("{} {}", f.code, f.reason))
                    .unwrap_or_else(|| "no close frame".to_string());
                report_failure(failure, StreamError::ClosedByRemote(reason));
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                report_failure(failure, StreamError::Read(e));
                return;
            }
            None => {
                report_failure(failure, StreamError::StreamEnded);
                return;
            }
        };

        let event = match decoded {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!("[AlchemyClient] JSON unmarshal error: {}", e);
                continue;
            }
        };

        // Blocks while the consumer is behind; this is the only backpressure.
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("[AlchemyClient] Read loop stopped due to cancellation");
                return;
            }
            sent = events.send(event) => {
                if sent.is_err() {
                    warn!("[AlchemyClient] Event receiver dropped, stopping read loop");
                    return;
                }
            }
        }
    }
}

fn report_failure(failure: oneshot::Sender<StreamError>, err: StreamError) {
    error!("[AlchemyClient] Read error: {}", err);
    let _ = failure.send(err);
}

/// Decodes one frame. `Ok(None)` is a valid frame that carries no event.
pub(crate) fn decode_frame(payload: &[u8]) -> Result<Option<MinedTxEvent>, serde_json::Error> {
    let frame: RpcFrame = serde_json::from_slice(payload)?;

    if frame.method.as_deref() == Some(SUBSCRIPTION_METHOD) {
        return Ok(frame.params.map(|body| body.result));
    }

    if let Some(error) = frame.error {
        error!("[AlchemyClient] RPC error response: {}", error);
    } else if let (Some(id), Some(result)) = (frame.id, frame.result) {
        info!("✅ Subscription {} confirmed for request {}", result, id);
    }

    Ok(None)
}

/// Hides the API key that Alchemy carries as the last path segment.
pub fn mask_endpoint(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return "***".to_string();
    };
    let authority_start = scheme_end + 3;

    match url[authority_start..].rfind('/') {
        Some(last_slash) => format!("{}/***", &url[..authority_start + last_slash]),
        None => url.to_string(),
    }
}
