//! Push backend: streaming monitor with reconnection and replay.
//!
//! Holds a persistent push connection and recovers from transport faults
//! without losing subscriber intent: on failure the monitor backs off
//! exponentially, reopens the connection, and replays every prior
//! subscription from a snapshot. Delivery is best-effort, at-most-once per
//! connection lifetime; events missed while reconnecting are not backfilled.

use crate::marketplace::{StreamEvent, StreamEventHandler, StreamTransport, TransportFault};
use crate::monitor::event::EventType;
use crate::monitor::normalize::{stream_event_to_canonical, stream_event_wallets};
use crate::monitor::registry::{EventCallback, Subscription, SubscriptionRegistry};
use crate::monitor::{ConnectionState, Monitor, MonitorError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Tuning knobs for the streaming monitor's reconnection policy.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Upper bound on the reconnection delay.
    pub max_delay: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Exponent cap; keeps the doubling math clear of overflow for any cap a
/// caller could configure.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Delay before reconnection attempt `attempt` (1-based):
/// `min(max_delay, base_delay * 2^(attempt-1))`.
fn reconnect_delay(options: &StreamOptions, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    options
        .base_delay
        .saturating_mul(1u32 << exponent)
        .min(options.max_delay)
}

struct StreamState {
    connection: ConnectionState,
    registry: SubscriptionRegistry,
    /// Consecutive failed attempts; reset only after a successful reopen.
    reconnect_attempts: u32,
    /// Waits for the current connection's first fault.
    supervisor_task: Option<JoinHandle<()>>,
    /// The single in-flight reconnection, if one is scheduled.
    reconnect_task: Option<JoinHandle<()>>,
}

/// Push-transport monitor backed by the marketplace stream feed.
pub struct StreamingMonitor {
    transport: Arc<dyn StreamTransport>,
    options: StreamOptions,
    state: Arc<Mutex<StreamState>>,
}

impl StreamingMonitor {
    pub fn new(transport: Arc<dyn StreamTransport>, options: StreamOptions) -> Self {
        Self {
            transport,
            options,
            state: Arc::new(Mutex::new(StreamState {
                connection: ConnectionState::Disconnected,
                registry: SubscriptionRegistry::new(),
                reconnect_attempts: 0,
                supervisor_task: None,
                reconnect_task: None,
            })),
        }
    }

    /// Arm the per-connection fault supervisor.
    ///
    /// Exactly one handler per connection: the first fault schedules
    /// recovery, anything after it belongs to a connection already dead.
    fn arm_supervisor(
        st: &mut StreamState,
        transport: Arc<dyn StreamTransport>,
        options: StreamOptions,
        state: Arc<Mutex<StreamState>>,
        mut faults: mpsc::UnboundedReceiver<TransportFault>,
    ) {
        if let Some(task) = st.supervisor_task.take() {
            task.abort();
        }
        st.supervisor_task = Some(tokio::spawn(async move {
            if let Some(fault) = faults.recv().await {
                Self::on_transport_fault(transport, options, state, fault).await;
            }
        }));
    }

    async fn on_transport_fault(
        transport: Arc<dyn StreamTransport>,
        options: StreamOptions,
        state: Arc<Mutex<StreamState>>,
        fault: TransportFault,
    ) {
        let mut st = state.lock().await;
        if st.connection == ConnectionState::Disconnected {
            debug!("Ignoring transport fault after disconnect: {}", fault);
            return;
        }
        if st.reconnect_task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Reconnection already scheduled, ignoring fault: {}", fault);
            return;
        }

        warn!("Transport fault: {}; scheduling reconnection", fault);
        st.connection = ConnectionState::Reconnecting;
        st.reconnect_task = Some(tokio::spawn(Self::reconnect_loop(
            transport,
            options,
            state.clone(),
        )));
    }

    /// Back off, reopen, replay; repeat until success or disconnect.
    async fn reconnect_loop(
        transport: Arc<dyn StreamTransport>,
        options: StreamOptions,
        state: Arc<Mutex<StreamState>>,
    ) {
        loop {
            let delay = {
                let mut st = state.lock().await;
                if st.connection == ConnectionState::Disconnected {
                    st.reconnect_task = None;
                    return;
                }
                st.reconnect_attempts += 1;
                let delay = reconnect_delay(&options, st.reconnect_attempts);
                info!(
                    "Reconnecting in {:?} (attempt {})",
                    delay, st.reconnect_attempts
                );
                delay
            };
            tokio::time::sleep(delay).await;

            {
                let mut st = state.lock().await;
                if st.connection == ConnectionState::Disconnected {
                    st.reconnect_task = None;
                    return;
                }
            }

            let faults = match transport.open().await {
                Ok(faults) => faults,
                Err(e) => {
                    error!("Reconnection attempt failed: {}", e);
                    continue;
                }
            };

            // Snapshot the registry, clear it, then replay every prior
            // subscription into the fresh connection.
            let snapshot = {
                let mut st = state.lock().await;
                let snapshot = st.registry.snapshot();
                st.registry.clear();
                snapshot
            };

            let mut replay_failed = false;
            for subscription in &snapshot {
                match Self::register_with_transport(&transport, &state, subscription).await {
                    Ok(()) => {
                        state.lock().await.registry.add(subscription.clone());
                    }
                    Err(e) => {
                        error!(
                            "Resubscription to {} failed, reconnect attempt abandoned: {}",
                            subscription.collection(),
                            e
                        );
                        replay_failed = true;
                        break;
                    }
                }
            }

            if replay_failed {
                // Restore subscriber intent for the next attempt.
                let mut st = state.lock().await;
                for subscription in snapshot {
                    st.registry.add(subscription);
                }
                continue;
            }

            let mut st = state.lock().await;
            st.connection = ConnectionState::Connected;
            st.reconnect_attempts = 0;
            st.reconnect_task = None;
            info!(
                "Stream monitor reconnected, {} subscriptions replayed",
                st.registry.len()
            );
            Self::arm_supervisor(&mut st, transport.clone(), options.clone(), state.clone(), faults);
            return;
        }
    }

    /// Join the subscription's collection topic with a dispatching handler.
    async fn register_with_transport(
        transport: &Arc<dyn StreamTransport>,
        state: &Arc<Mutex<StreamState>>,
        subscription: &Subscription,
    ) -> Result<(), crate::marketplace::MarketplaceError> {
        let handler = Self::make_handler(state.clone(), subscription.collection().to_string());
        transport
            .join_collection(subscription.collection(), handler)
            .await
    }

    fn make_handler(state: Arc<Mutex<StreamState>>, collection_filter: String) -> StreamEventHandler {
        Arc::new(move |raw: StreamEvent| {
            let state = state.clone();
            let collection_filter = collection_filter.clone();
            Box::pin(async move {
                Self::dispatch_stream_event(state, collection_filter, raw).await;
            })
        })
    }

    /// Deliver one raw push event to the subscriptions on its topic.
    ///
    /// The state lock is released before callbacks run, so a callback may call
    /// back into the monitor (including `disconnect`) without deadlocking.
    async fn dispatch_stream_event(
        state: Arc<Mutex<StreamState>>,
        collection_filter: String,
        raw: StreamEvent,
    ) {
        let subscriptions = {
            let st = state.lock().await;
            if st.connection != ConnectionState::Connected {
                return;
            }
            st.registry.snapshot_for_filter(&collection_filter)
        };
        if subscriptions.is_empty() {
            return;
        }

        // Wallet relevance is judged on the raw payload, not the normalized
        // event: with a filter set and no address fields present, the event
        // is dropped (fail closed).
        let raw_wallets = stream_event_wallets(&raw.payload);

        let Some(event) = stream_event_to_canonical(&raw) else {
            debug!("Dropping {} stream event: not normalizable", raw.event_type);
            return;
        };

        for subscription in subscriptions {
            if !subscription.wants_type(event.event_type) {
                continue;
            }
            if let Some(wallet) = subscription.wallet() {
                if raw_wallets.is_empty() {
                    debug!(
                        "Dropping {} event without address fields (wallet filter set)",
                        event.event_type
                    );
                    continue;
                }
                if !raw_wallets.iter().any(|w| w == wallet) {
                    continue;
                }
            }
            if let Err(e) = (subscription.callback())(event.clone()).await {
                error!(
                    "Subscriber callback failed for {} event: {}",
                    event.event_type, e
                );
            }
        }
    }
}

#[async_trait]
impl Monitor for StreamingMonitor {
    async fn connect(&self) -> Result<(), MonitorError> {
        {
            let mut st = self.state.lock().await;
            match st.connection {
                ConnectionState::Disconnected => st.connection = ConnectionState::Connecting,
                // Already connected or recovering; nothing to do.
                _ => return Ok(()),
            }
        }

        match self.transport.open().await {
            Ok(faults) => {
                let mut st = self.state.lock().await;
                st.connection = ConnectionState::Connected;
                st.reconnect_attempts = 0;
                Self::arm_supervisor(
                    &mut st,
                    self.transport.clone(),
                    self.options.clone(),
                    self.state.clone(),
                    faults,
                );
                info!("Stream monitor connected");
                Ok(())
            }
            Err(e) => {
                self.state.lock().await.connection = ConnectionState::Disconnected;
                error!("Stream connect failed: {}", e);
                Err(MonitorError::Transport(e))
            }
        }
    }

    async fn subscribe_to_collection(
        &self,
        collection: &str,
        event_types: &[EventType],
        callback: EventCallback,
        wallet_filter: Option<&str>,
    ) -> Result<(), MonitorError> {
        {
            let st = self.state.lock().await;
            if st.connection != ConnectionState::Connected {
                return Err(MonitorError::NotConnected);
            }
        }

        let subscription = Subscription::new(collection, event_types, callback, wallet_filter)?;
        Self::register_with_transport(&self.transport, &self.state, &subscription).await?;

        let mut st = self.state.lock().await;
        st.registry.add(subscription);
        debug!(
            "Subscribed to {} ({} subscriptions active)",
            collection,
            st.registry.len()
        );
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), MonitorError> {
        // Halts dispatch only; the transport connection stays open.
        let mut st = self.state.lock().await;
        st.registry.clear();
        Ok(())
    }

    async fn disconnect(&self) {
        {
            let mut st = self.state.lock().await;
            st.connection = ConnectionState::Disconnected;
            if let Some(task) = st.supervisor_task.take() {
                task.abort();
            }
            if let Some(task) = st.reconnect_task.take() {
                task.abort();
            }
            st.registry.clear();
            st.reconnect_attempts = 0;
        }
        self.transport.close().await;
        info!("Stream monitor disconnected");
    }

    async fn connection_state(&self) -> ConnectionState {
        self.state.lock().await.connection
    }

    async fn subscription_count(&self) -> usize {
        self.state.lock().await.registry.len()
    }
}
