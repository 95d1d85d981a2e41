//!
//! Push transport for real-time marketplace events.
//!
//! Implements the marketplace's channel-based WebSocket protocol: one socket,
//! one joined topic per collection, a periodic heartbeat, and a read loop that
//! routes incoming event frames to per-topic handlers. Connection failures are
//! reported through a fault channel handed out by `open`; recovery policy
//! (backoff, resubscription) belongs to the caller, not this client.

use super::types::{ChannelFrame, MarketplaceError, StreamEvent, TransportFault};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
	MaybeTlsStream, WebSocketStream, connect_async,
	tungstenite::{Message, client::IntoClientRequest},
};
use tracing::{debug, warn};

/// Callback invoked for every event frame received on a joined topic.
pub type StreamEventHandler = Arc<dyn Fn(StreamEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Interval between protocol heartbeats on an open socket.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Push-transport contract consumed by the streaming monitor.
///
/// `open` yields a fresh fault receiver per connection; a fault means the
/// connection is dead and a new `open` is required. Handlers registered via
/// `join_collection` live for the duration of one connection only.
#[async_trait]
pub trait StreamTransport: Send + Sync {
	/// Open (or reopen) the connection. Any previous connection is discarded.
	async fn open(&self) -> Result<mpsc::UnboundedReceiver<TransportFault>, MarketplaceError>;

	/// Join a collection topic and register the handler for its events.
	async fn join_collection(
		&self,
		slug: &str,
		handler: StreamEventHandler,
	) -> Result<(), MarketplaceError>;

	/// Close the connection and drop all topic handlers.
	async fn close(&self);
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

struct SocketInner {
	sender: Arc<Mutex<WsSink>>,
	handlers: Arc<Mutex<HashMap<String, StreamEventHandler>>>,
	read_task: JoinHandle<()>,
	heartbeat_task: JoinHandle<()>,
}

/// WebSocket client for the marketplace push feed
pub struct MarketplaceStreamSocket {
	/// The WebSocket URL for the push feed.
	ws_url: String,
	/// API key appended to the connection request.
	api_key: String,
	/// Monotonic message reference counter, shared across tasks.
	next_ref: Arc<AtomicU64>,
	inner: Mutex<Option<SocketInner>>,
}

impl MarketplaceStreamSocket {
	/// Create a new push-feed client. No connection is made until `open`.
	pub fn new(ws_url: String, api_key: String) -> Self {
		Self {
			ws_url,
			api_key,
			next_ref: Arc::new(AtomicU64::new(1)),
			inner: Mutex::new(None),
		}
	}

	fn next_ref(&self) -> u64 {
		self.next_ref.fetch_add(1, Ordering::Relaxed)
	}

	/// Dispatch one parsed frame to the handler joined on its topic.
	async fn route_frame(handlers: &Mutex<HashMap<String, StreamEventHandler>>, frame: ChannelFrame) {
		match frame.event.as_str() {
			"phx_reply" => {
				debug!("Channel reply on {}: {}", frame.topic, frame.payload);
			}
			event_type => {
				let handler = { handlers.lock().await.get(&frame.topic).cloned() };
				let Some(handler) = handler else {
					debug!("No handler joined on topic {}, ignoring {}", frame.topic, event_type);
					return;
				};

				match serde_json::from_value(frame.payload) {
					Ok(payload) => {
						handler(StreamEvent {
							event_type: event_type.to_string(),
							payload,
						})
						.await;
					}
					Err(e) => {
						warn!(
							"Failed to decode {} payload on {}: {}",
							event_type, frame.topic, e
						);
					}
				}
			}
		}
	}
}

#[async_trait]
impl StreamTransport for MarketplaceStreamSocket {
	async fn open(&self) -> Result<mpsc::UnboundedReceiver<TransportFault>, MarketplaceError> {
		if self.api_key.is_empty() {
			return Err(MarketplaceError::MissingCredentials);
		}

		// Discard any previous connection before dialing a new one.
		self.close().await;

		debug!("Attempting WebSocket connection to: {}", self.ws_url);

		let request = format!("{}?token={}", self.ws_url, self.api_key).into_client_request()?;
		let (ws_stream, response) = connect_async(request).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);

		let (ws_sender, mut ws_receiver) = ws_stream.split();
		let sender = Arc::new(Mutex::new(ws_sender));
		let handlers: Arc<Mutex<HashMap<String, StreamEventHandler>>> =
			Arc::new(Mutex::new(HashMap::new()));
		let (fault_tx, fault_rx) = mpsc::unbounded_channel();

		let read_handlers = handlers.clone();
		let read_task = tokio::spawn(async move {
			let fault = loop {
				let Some(msg) = ws_receiver.next().await else {
					break TransportFault::Closed;
				};

				match msg {
					Ok(Message::Text(text)) => match serde_json::from_str::<ChannelFrame>(&text) {
						Ok(frame) => Self::route_frame(&read_handlers, frame).await,
						Err(e) => debug!("Ignoring unparseable frame: {}", e),
					},
					Ok(Message::Close(_)) => break TransportFault::Closed,
					Ok(_) => {}
					Err(e) => break TransportFault::Error(e.to_string()),
				}
			};
			let _ = fault_tx.send(fault);
		});

		let heartbeat_sender = sender.clone();
		let heartbeat_ref = self.next_ref.clone();
		let heartbeat_task = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
			// The first tick completes immediately; the connection is fresh, skip it.
			ticker.tick().await;
			loop {
				ticker.tick().await;
				let frame = json!({
					"topic": "phoenix",
					"event": "heartbeat",
					"payload": {},
					"ref": heartbeat_ref.fetch_add(1, Ordering::Relaxed),
				});
				let mut sender = heartbeat_sender.lock().await;
				if sender.send(Message::Text(frame.to_string())).await.is_err() {
					// The read loop surfaces the fault; just stop beating.
					debug!("Heartbeat send failed, stopping");
					break;
				}
			}
		});

		let mut guard = self.inner.lock().await;
		*guard = Some(SocketInner {
			sender,
			handlers,
			read_task,
			heartbeat_task,
		});

		Ok(fault_rx)
	}

	async fn join_collection(
		&self,
		slug: &str,
		handler: StreamEventHandler,
	) -> Result<(), MarketplaceError> {
		let guard = self.inner.lock().await;
		let inner = guard
			.as_ref()
			.ok_or_else(|| MarketplaceError::HandshakeError("socket is not open".to_string()))?;

		let topic = format!("collection:{}", slug);
		inner.handlers.lock().await.insert(topic.clone(), handler);

		let frame = json!({
			"topic": topic,
			"event": "phx_join",
			"payload": {},
			"ref": self.next_ref(),
		});
		inner
			.sender
			.lock()
			.await
			.send(Message::Text(frame.to_string()))
			.await?;

		debug!("Joined topic {}", topic);
		Ok(())
	}

	async fn close(&self) {
		let mut guard = self.inner.lock().await;
		if let Some(inner) = guard.take() {
			inner.read_task.abort();
			inner.heartbeat_task.abort();
			inner.handlers.lock().await.clear();
			let mut sender = inner.sender.lock().await;
			let _ = sender.send(Message::Close(None)).await;
		}
	}
}
