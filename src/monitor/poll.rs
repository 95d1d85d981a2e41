//! Pull backend: fixed-interval polling monitor.
//!
//! Simulates push delivery by periodically fetching recent events for every
//! distinct wallet filter across the active subscriptions, then normalizing,
//! deduplicating and dispatching them. A watermark timestamp separates
//! already-seen from not-yet-fetched results; it only moves forward and never
//! past wall-clock now. The loop is self-healing: a failed fetch, a bad feed
//! entry or a failing subscriber callback is logged and skipped, never fatal.

use crate::chain::{self, ChainConfig};
use crate::marketplace::{AccountEventsQuery, MarketplaceApi};
use crate::monitor::dedup::{DEFAULT_DEDUP_CAPACITY, DeduplicationCache};
use crate::monitor::event::EventType;
use crate::monitor::normalize::{account_event_to_canonical, dedup_identifier};
use crate::monitor::registry::{EventCallback, Subscription, SubscriptionRegistry};
use crate::monitor::{ConnectionState, Monitor, MonitorError};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Tuning knobs for the polling monitor.
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Interval between poll cycles.
    pub poll_interval: Duration,
    /// How far back the watermark starts on connect, in seconds.
    pub initial_lookback_seconds: i64,
    /// Page size requested per wallet fetch.
    pub page_limit: u32,
    /// Capacity of the dedup cache.
    pub dedup_capacity: usize,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            initial_lookback_seconds: 300,
            page_limit: 100,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

struct PollState {
    connection: ConnectionState,
    registry: SubscriptionRegistry,
    dedup: DeduplicationCache,
    /// Unix seconds; lower bound for the next fetch.
    watermark: i64,
    poll_task: Option<JoinHandle<()>>,
}

/// Pull-transport monitor backed by the marketplace REST API.
pub struct PollingMonitor {
    client: Arc<dyn MarketplaceApi>,
    chain: ChainConfig,
    options: PollOptions,
    state: Arc<Mutex<PollState>>,
}

/// Reset value for a watermark that drifted past wall-clock now.
///
/// A corrupted or externally-advanced watermark would make every `after`
/// filter return nothing forever; detect it and fall back to the lookback
/// window. Returns `None` when the watermark is sane.
fn guarded_watermark(watermark: i64, now: i64, lookback: i64) -> Option<i64> {
    (watermark > now).then_some(now - lookback)
}

/// Advance a watermark after a processed batch: forward only, never past now.
fn advance_watermark(current: i64, batch_max: i64, now: i64) -> i64 {
    current.max(batch_max.min(now))
}

impl PollingMonitor {
    /// Create a polling monitor for one chain.
    ///
    /// Fails with a configuration error if the chain is not in the
    /// configuration tables.
    pub fn new(
        client: Arc<dyn MarketplaceApi>,
        chain_id: &str,
        options: PollOptions,
    ) -> Result<Self, MonitorError> {
        let chain = chain::config(chain_id)
            .ok_or_else(|| MonitorError::Configuration(format!("unknown chain: {}", chain_id)))?;

        let dedup_capacity = options.dedup_capacity;
        Ok(Self {
            client,
            chain,
            options,
            state: Arc::new(Mutex::new(PollState {
                connection: ConnectionState::Disconnected,
                registry: SubscriptionRegistry::new(),
                dedup: DeduplicationCache::new(dedup_capacity),
                watermark: 0,
                poll_task: None,
            })),
        })
    }

    /// Start the polling loop: one immediate cycle, then one per interval.
    fn spawn_poll_loop(&self) -> JoinHandle<()> {
        let client = self.client.clone();
        let chain = self.chain.clone();
        let options = self.options.clone();
        let state = self.state.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(options.poll_interval);
            loop {
                ticker.tick().await;
                Self::poll_cycle(&client, &chain, &options, &state).await;
            }
        })
    }

    /// One poll cycle across all monitored wallets.
    ///
    /// The state lock is never held across a fetch or a subscriber callback,
    /// so callbacks may call back into the monitor (including `disconnect`)
    /// without deadlocking.
    async fn poll_cycle(
        client: &Arc<dyn MarketplaceApi>,
        chain: &ChainConfig,
        options: &PollOptions,
        state: &Arc<Mutex<PollState>>,
    ) {
        let (wallets, after) = {
            let mut st = state.lock().await;
            if st.connection != ConnectionState::Connected {
                return;
            }
            let now = Utc::now().timestamp();
            if let Some(reset) =
                guarded_watermark(st.watermark, now, options.initial_lookback_seconds)
            {
                warn!(
                    "Watermark {} is ahead of now {}, resetting to {}",
                    st.watermark, now, reset
                );
                st.watermark = reset;
            }
            (st.registry.distinct_wallets(), st.watermark)
        };

        let mut batch_max = i64::MIN;
        for wallet in wallets {
            let query = AccountEventsQuery {
                event_types: Vec::new(),
                after: Some(after),
                limit: Some(options.page_limit),
            };
            let response = match client.get_account_events(&wallet, &query).await {
                Ok(response) => response,
                Err(e) => {
                    // One wallet failing must not starve the others.
                    error!("Event fetch failed for {}: {}", wallet, e);
                    continue;
                }
            };
            debug!(
                "Fetched {} events for {} after {}",
                response.asset_events.len(),
                wallet,
                after
            );

            for raw in &response.asset_events {
                batch_max = batch_max.max(raw.event_timestamp);

                let id = dedup_identifier(raw);
                {
                    let mut st = state.lock().await;
                    if st.connection != ConnectionState::Connected {
                        return;
                    }
                    if st.dedup.seen(&id) {
                        debug!("Skipping duplicate event {}", id);
                        continue;
                    }
                    st.dedup.remember(id);
                }

                let Some(event) = account_event_to_canonical(raw, chain) else {
                    continue;
                };

                let callbacks: Vec<EventCallback> = {
                    let st = state.lock().await;
                    st.registry.matching(&event).map(|s| s.callback()).collect()
                };
                for callback in callbacks {
                    if let Err(e) = callback(event.clone()).await {
                        error!(
                            "Subscriber callback failed for {} event: {}",
                            event.event_type, e
                        );
                    }
                }
            }
        }

        if batch_max > i64::MIN {
            let mut st = state.lock().await;
            let now = Utc::now().timestamp();
            st.watermark = advance_watermark(st.watermark, batch_max, now);
            debug!("Watermark advanced to {}", st.watermark);
        }
    }
}

#[async_trait]
impl Monitor for PollingMonitor {
    async fn connect(&self) -> Result<(), MonitorError> {
        let mut st = self.state.lock().await;
        if st.connection == ConnectionState::Connected {
            return Ok(());
        }

        st.connection = ConnectionState::Connecting;
        st.watermark = Utc::now().timestamp() - self.options.initial_lookback_seconds;
        st.dedup.clear();
        st.connection = ConnectionState::Connected;

        info!(
            "Poll monitor connected for chain {} (lookback {}s, interval {:?})",
            self.chain.id, self.options.initial_lookback_seconds, self.options.poll_interval
        );
        Ok(())
    }

    async fn subscribe_to_collection(
        &self,
        collection: &str,
        event_types: &[EventType],
        callback: EventCallback,
        wallet_filter: Option<&str>,
    ) -> Result<(), MonitorError> {
        let mut st = self.state.lock().await;
        if st.connection != ConnectionState::Connected {
            return Err(MonitorError::NotConnected);
        }

        let subscription = Subscription::new(collection, event_types, callback, wallet_filter)?;
        st.registry.add(subscription);

        // Lazy loop start; starting twice is a no-op.
        if st.poll_task.is_none() {
            st.poll_task = Some(self.spawn_poll_loop());
            info!("Polling started, every {:?}", self.options.poll_interval);
        }

        debug!(
            "Subscribed to {} ({} subscriptions active)",
            collection,
            st.registry.len()
        );
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), MonitorError> {
        let mut st = self.state.lock().await;
        st.registry.clear();
        if let Some(task) = st.poll_task.take() {
            task.abort();
            info!("Polling stopped, no subscriptions remain");
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let mut st = self.state.lock().await;
        if let Some(task) = st.poll_task.take() {
            task.abort();
        }
        st.registry.clear();
        st.dedup.clear();
        st.connection = ConnectionState::Disconnected;
        info!("Poll monitor disconnected");
    }

    async fn connection_state(&self) -> ConnectionState {
        self.state.lock().await.connection
    }

    async fn subscription_count(&self) -> usize {
        self.state.lock().await.registry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::{
        AccountEventsResponse, CollectionOffersResponse, MarketplaceError, RawAccountEvent,
    };
    use crate::monitor::event::CanonicalEvent;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Scripted API: responses are popped in call order; once the script is
    /// exhausted, every fetch returns an empty page.
    struct MockMarketplaceApi {
        script: StdMutex<VecDeque<Result<AccountEventsResponse, MarketplaceError>>>,
        calls: StdMutex<Vec<(String, Option<i64>)>>,
    }

    impl MockMarketplaceApi {
        fn new(script: Vec<Result<AccountEventsResponse, MarketplaceError>>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script.into()),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MarketplaceApi for MockMarketplaceApi {
        async fn get_account_events(
            &self,
            wallet: &str,
            query: &AccountEventsQuery,
        ) -> Result<AccountEventsResponse, MarketplaceError> {
            self.calls
                .lock()
                .unwrap()
                .push((wallet.to_string(), query.after));
            self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
                Ok(AccountEventsResponse {
                    asset_events: Vec::new(),
                    next: None,
                })
            })
        }

        async fn get_collection_offers(
            &self,
            _slug: &str,
        ) -> Result<CollectionOffersResponse, MarketplaceError> {
            Ok(CollectionOffersResponse { offers: Vec::new() })
        }
    }

    fn capture_callback() -> (EventCallback, Arc<StdMutex<Vec<CanonicalEvent>>>) {
        let captured = Arc::new(StdMutex::new(Vec::new()));
        let sink = captured.clone();
        let callback: EventCallback = Arc::new(move |event| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push(event);
                Ok(())
            })
        });
        (callback, captured)
    }

    fn raw_sale(seller: &str, timestamp: i64, tx: &str) -> RawAccountEvent {
        serde_json::from_value(serde_json::json!({
            "event_type": "sale",
            "event_timestamp": timestamp,
            "chain": "ethereum",
            "transaction": tx,
            "nft": {
                "identifier": "7",
                "collection": "azuki",
                "contract": "0xcontract",
            },
            "payment": {
                "quantity": "1000000000000000000",
                "token_address": "0x0000000000000000000000000000000000000000",
                "decimals": 18,
                "symbol": "ETH"
            },
            "seller": seller,
            "buyer": "0xbuyer"
        }))
        .unwrap()
    }

    fn page(events: Vec<RawAccountEvent>) -> Result<AccountEventsResponse, MarketplaceError> {
        Ok(AccountEventsResponse {
            asset_events: events,
            next: None,
        })
    }

    fn fast_options() -> PollOptions {
        PollOptions {
            poll_interval: Duration::from_millis(30),
            ..PollOptions::default()
        }
    }

    #[test]
    fn test_unknown_chain_is_configuration_error() {
        let client = MockMarketplaceApi::new(Vec::new());
        let result = PollingMonitor::new(client, "no-such-chain", PollOptions::default());
        assert!(matches!(result, Err(MonitorError::Configuration(_))));
    }

    #[test]
    fn test_watermark_advance_is_monotonic_and_capped() {
        // Forward only.
        assert_eq!(advance_watermark(100, 90, 1000), 100);
        // Advances to the batch max.
        assert_eq!(advance_watermark(100, 150, 1000), 150);
        // Never past now, even with bad feed timestamps.
        assert_eq!(advance_watermark(100, 5000, 1000), 1000);
    }

    #[test]
    fn test_clock_skew_guard() {
        assert_eq!(guarded_watermark(1100, 1000, 300), Some(700));
        assert_eq!(guarded_watermark(900, 1000, 300), None);
        assert_eq!(guarded_watermark(1000, 1000, 300), None);
    }

    #[tokio::test]
    async fn test_subscribe_requires_connect() {
        let client = MockMarketplaceApi::new(Vec::new());
        let monitor = PollingMonitor::new(client, "ethereum", fast_options()).unwrap();
        let (callback, _) = capture_callback();

        let result = monitor
            .subscribe_to_collection("azuki", &[EventType::ItemSold], callback, None)
            .await;
        assert!(matches!(result, Err(MonitorError::NotConnected)));
    }

    #[tokio::test]
    async fn test_empty_event_types_rejected() {
        let client = MockMarketplaceApi::new(Vec::new());
        let monitor = PollingMonitor::new(client, "ethereum", fast_options()).unwrap();
        monitor.connect().await.unwrap();
        let (callback, _) = capture_callback();

        let result = monitor
            .subscribe_to_collection("azuki", &[], callback, None)
            .await;
        assert!(matches!(result, Err(MonitorError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let client = MockMarketplaceApi::new(Vec::new());
        let monitor = PollingMonitor::new(client, "ethereum", fast_options()).unwrap();
        monitor.connect().await.unwrap();
        monitor.connect().await.unwrap();
        assert_eq!(monitor.connection_state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_end_to_end_sale_delivered_once() {
        let now = Utc::now().timestamp();
        // The identical raw event arrives in two consecutive cycles.
        let sale = raw_sale("0x1111111111111111111111111111111111111111", now - 10, "0xtx");
        let client =
            MockMarketplaceApi::new(vec![page(vec![sale.clone()]), page(vec![sale.clone()])]);
        let monitor =
            PollingMonitor::new(client.clone(), "ethereum", fast_options()).unwrap();
        let (callback, captured) = capture_callback();

        monitor.connect().await.unwrap();
        monitor
            .subscribe_to_collection(
                "azuki",
                &[EventType::ItemSold, EventType::ItemListed],
                callback,
                Some("0x1111111111111111111111111111111111111111"),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        monitor.disconnect().await;

        let events = captured.lock().unwrap();
        assert_eq!(events.len(), 1, "duplicate delivery must collapse to one");
        assert_eq!(events[0].event_type, EventType::ItemSold);
        assert_eq!(
            events[0].participants.from.as_deref(),
            Some("0x1111111111111111111111111111111111111111")
        );
        assert!(client.call_count() >= 2, "expected repeated poll cycles");
    }

    #[tokio::test]
    async fn test_fetch_failure_does_not_abort_cycle() {
        let now = Utc::now().timestamp();
        let sale = raw_sale("0xbbbb", now - 10, "0xtx-b");
        // First wallet's fetch fails; the second wallet still gets its events.
        let client = MockMarketplaceApi::new(vec![
            Err(MarketplaceError::ApiError("HTTP 500".to_string())),
            page(vec![sale]),
        ]);
        let monitor =
            PollingMonitor::new(client.clone(), "ethereum", fast_options()).unwrap();
        let (callback_a, captured_a) = capture_callback();
        let (callback_b, captured_b) = capture_callback();

        monitor.connect().await.unwrap();
        monitor
            .subscribe_to_collection("azuki", &[EventType::ItemSold], callback_a, Some("0xaaaa"))
            .await
            .unwrap();
        monitor
            .subscribe_to_collection("azuki", &[EventType::ItemSold], callback_b, Some("0xbbbb"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        monitor.disconnect().await;

        assert!(captured_a.lock().unwrap().is_empty());
        assert_eq!(captured_b.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_open_without_wallet_filter() {
        let now = Utc::now().timestamp();
        // Correctly-typed sale with no address fields at all.
        let mut sale = raw_sale("0xunused", now - 10, "0xtx");
        sale.seller = None;
        sale.buyer = None;
        let client = MockMarketplaceApi::new(vec![page(vec![sale])]);
        let monitor =
            PollingMonitor::new(client.clone(), "ethereum", fast_options()).unwrap();
        // The filtered subscription supplies the fetch target; the filterless
        // one must still receive the address-less event.
        let (filtered_cb, filtered) = capture_callback();
        let (open_cb, open) = capture_callback();

        monitor.connect().await.unwrap();
        monitor
            .subscribe_to_collection("azuki", &[EventType::ItemSold], filtered_cb, Some("0xaaaa"))
            .await
            .unwrap();
        monitor
            .subscribe_to_all_collections(&[EventType::ItemSold], open_cb, None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        monitor.disconnect().await;

        assert!(filtered.lock().unwrap().is_empty(), "wallet mismatch must drop");
        assert_eq!(open.lock().unwrap().len(), 1, "no filter means fail open");
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_polling() {
        let client = MockMarketplaceApi::new(Vec::new());
        let monitor =
            PollingMonitor::new(client.clone(), "ethereum", fast_options()).unwrap();
        let (callback, _) = capture_callback();

        monitor.connect().await.unwrap();
        monitor
            .subscribe_to_collection("azuki", &[EventType::ItemSold], callback, Some("0xaaaa"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        monitor.unsubscribe().await.unwrap();
        assert_eq!(monitor.subscription_count().await, 0);
        let calls_at_unsubscribe = client.call_count();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            client.call_count(),
            calls_at_unsubscribe,
            "no fetches after unsubscribe"
        );
        // Still connected; only the loop is idle.
        assert_eq!(monitor.connection_state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_skewed_watermark_reset_before_fetch() {
        let client = MockMarketplaceApi::new(Vec::new());
        let monitor =
            PollingMonitor::new(client.clone(), "ethereum", fast_options()).unwrap();
        let (callback, _) = capture_callback();

        monitor.connect().await.unwrap();
        let skewed = Utc::now().timestamp() + 10_000;
        monitor.state.lock().await.watermark = skewed;

        monitor
            .subscribe_to_collection("azuki", &[EventType::ItemSold], callback, Some("0xaaaa"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.disconnect().await;

        let calls = client.calls.lock().unwrap();
        assert!(!calls.is_empty());
        let after = calls[0].1.expect("after filter must be set");
        assert!(after < skewed, "skewed watermark must be reset before fetching");
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let client = MockMarketplaceApi::new(Vec::new());
        let monitor = PollingMonitor::new(client, "ethereum", fast_options()).unwrap();
        monitor.connect().await.unwrap();
        monitor.disconnect().await;
        monitor.disconnect().await;
        assert_eq!(
            monitor.connection_state().await,
            ConnectionState::Disconnected
        );
        assert_eq!(monitor.subscription_count().await, 0);
    }
}
