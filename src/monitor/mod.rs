//! Marketplace event monitoring module
//!
//! This module provides the dual-transport engine that watches marketplace
//! activity and delivers normalized events to subscriber callbacks. It is
//! composed of several submodules, each responsible for one aspect of the
//! pipeline:
//!
//! - `event`: the canonical, transport-independent event model.
//! - `registry`: active subscriptions and the matching rules applied to every
//!   incoming event.
//! - `dedup`: a bounded cache of already-delivered event identifiers.
//! - `normalize`: transformation of raw transport payloads into canonical
//!   events, including the event-type and currency mapping tables.
//! - `poll`: the pull backend, which simulates push delivery by periodically
//!   fetching recent events per monitored wallet.
//! - `stream`: the push backend, which holds a persistent connection and
//!   recovers from transport failures with exponential backoff.
//!
//! Both backends implement the [`Monitor`] trait, so callers can switch
//! transports without changing any call sites.

/// Bounded cache of delivered event identifiers
pub mod dedup;
/// Canonical event model shared by both transports
pub mod event;
/// Raw-to-canonical event transformation
pub mod normalize;
/// Pull backend driven by a polling timer
pub mod poll;
/// Subscription storage and matching
pub mod registry;
/// Push backend with reconnection and replay
pub mod stream;

pub use dedup::DeduplicationCache;
pub use event::{CanonicalEvent, EventType, MoneyInfo, NftInfo, Participants};
pub use poll::{PollOptions, PollingMonitor};
pub use registry::{CallbackError, EventCallback, Subscription, SubscriptionRegistry};
pub use stream::{StreamOptions, StreamingMonitor};

use crate::marketplace::MarketplaceError;
use async_trait::async_trait;

/// Collection filter that matches every collection.
pub const WILDCARD_COLLECTION: &str = "*";

/// Connection lifecycle state of a monitor.
///
/// `Disconnected` is both the initial and the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Error types for monitor operations
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Missing or invalid configuration, surfaced at construction or connect.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation that requires a connection was attempted before `connect`.
    #[error("monitor is not connected")]
    NotConnected,

    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A transport-level failure that must surface to the caller.
    #[error("transport error: {0}")]
    Transport(#[from] MarketplaceError),
}

/// Transport-agnostic monitoring contract.
///
/// Implemented identically by the poll and stream backends; steady-state
/// failures (fetch errors, reconnection attempts, bad feed entries, subscriber
/// callback errors) never surface through these methods — only connection
/// establishment and caller mistakes do.
#[async_trait]
pub trait Monitor: Send + Sync {
    /// Establish the transport. Idempotent; on failure the monitor stays
    /// disconnected.
    async fn connect(&self) -> Result<(), MonitorError>;

    /// Subscribe a callback to events for one collection (or the wildcard).
    ///
    /// Requires a connected monitor. Re-subscribing with the same
    /// (collection, event types, wallet) key replaces the callback.
    async fn subscribe_to_collection(
        &self,
        collection: &str,
        event_types: &[EventType],
        callback: EventCallback,
        wallet_filter: Option<&str>,
    ) -> Result<(), MonitorError>;

    /// Subscribe to every collection; sugar for the wildcard filter.
    async fn subscribe_to_all_collections(
        &self,
        event_types: &[EventType],
        callback: EventCallback,
        wallet_filter: Option<&str>,
    ) -> Result<(), MonitorError> {
        self.subscribe_to_collection(WILDCARD_COLLECTION, event_types, callback, wallet_filter)
            .await
    }

    /// Remove all subscriptions without closing the transport.
    async fn unsubscribe(&self) -> Result<(), MonitorError>;

    /// Stop all background activity and clear subscription and dedup state.
    /// Idempotent, and safe to call from inside a subscriber callback.
    async fn disconnect(&self);

    /// Current lifecycle state.
    async fn connection_state(&self) -> ConnectionState;

    /// Number of active subscriptions.
    async fn subscription_count(&self) -> usize;
}
