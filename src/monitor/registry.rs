//! Subscription storage and matching.
//!
//! Holds the active (collection filter, event types, wallet filter, callback)
//! tuples and decides which of them an incoming canonical event is delivered
//! to. Pure data structure: no I/O, no locking; both backends keep one behind
//! their own state lock.

use super::event::{CanonicalEvent, EventType};
use super::{MonitorError, WILDCARD_COLLECTION};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Error type subscriber callbacks may return; logged and swallowed by the
/// dispatch loops.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Async callback invoked once per delivered event.
pub type EventCallback =
    Arc<dyn Fn(CanonicalEvent) -> BoxFuture<'static, Result<(), CallbackError>> + Send + Sync>;

/// Identity of a subscription: collection filter, sorted event types, wallet.
pub type SubscriptionKey = (String, Vec<EventType>, Option<String>);

/// One active subscription.
#[derive(Clone)]
pub struct Subscription {
    collection: String,
    event_types: Vec<EventType>,
    wallet: Option<String>,
    callback: EventCallback,
}

impl Subscription {
    /// Create a subscription.
    ///
    /// Event types are sorted and deduplicated; the wallet filter is
    /// lowercased. Fails with `InvalidArgument` if no event types are given.
    pub fn new(
        collection: &str,
        event_types: &[EventType],
        callback: EventCallback,
        wallet: Option<&str>,
    ) -> Result<Self, MonitorError> {
        if event_types.is_empty() {
            return Err(MonitorError::InvalidArgument(
                "at least one event type is required".to_string(),
            ));
        }

        let mut event_types = event_types.to_vec();
        event_types.sort();
        event_types.dedup();

        Ok(Self {
            collection: collection.to_string(),
            event_types,
            wallet: wallet.map(|w| w.to_ascii_lowercase()),
            callback,
        })
    }

    pub fn key(&self) -> SubscriptionKey {
        (
            self.collection.clone(),
            self.event_types.clone(),
            self.wallet.clone(),
        )
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn event_types(&self) -> &[EventType] {
        &self.event_types
    }

    pub fn wallet(&self) -> Option<&str> {
        self.wallet.as_deref()
    }

    pub fn callback(&self) -> EventCallback {
        self.callback.clone()
    }

    pub fn wants_type(&self, event_type: EventType) -> bool {
        self.event_types.contains(&event_type)
    }

    /// Check the collection filter against an event's collection slug.
    /// The wildcard matches everything; a specific slug must match exactly.
    pub fn matches_collection(&self, slug: Option<&str>) -> bool {
        self.collection == WILDCARD_COLLECTION || slug.is_some_and(|s| s == self.collection)
    }

    /// Full matching rule for canonical events.
    ///
    /// A subscription without a wallet filter passes every event (fail-open);
    /// with one, the wallet must appear among the event's participants.
    pub fn matches(&self, event: &CanonicalEvent) -> bool {
        if !self.wants_type(event.event_type) {
            return false;
        }
        if !self.matches_collection(event.nft.collection_slug.as_deref()) {
            return false;
        }
        match &self.wallet {
            None => true,
            Some(wallet) => event.participants.involves(wallet),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("collection", &self.collection)
            .field("event_types", &self.event_types)
            .field("wallet", &self.wallet)
            .finish_non_exhaustive()
    }
}

/// Registry of active subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription, replacing any existing one with the same key.
    pub fn add(&mut self, subscription: Subscription) {
        let key = subscription.key();
        match self.entries.iter_mut().find(|s| s.key() == key) {
            Some(existing) => *existing = subscription,
            None => self.entries.push(subscription),
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ordered copy of all entries, for snapshot-then-clear replay.
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.entries.clone()
    }

    /// Entries registered under exactly this collection filter (no wildcard
    /// expansion — the push transport scopes delivery per joined topic).
    pub fn snapshot_for_filter(&self, collection_filter: &str) -> Vec<Subscription> {
        self.entries
            .iter()
            .filter(|s| s.collection == collection_filter)
            .cloned()
            .collect()
    }

    /// Distinct wallet filters across all entries, in insertion order.
    /// Subscriptions without a wallet filter contribute nothing.
    pub fn distinct_wallets(&self) -> Vec<String> {
        let mut wallets: Vec<String> = Vec::new();
        for entry in &self.entries {
            if let Some(wallet) = &entry.wallet {
                if !wallets.contains(wallet) {
                    wallets.push(wallet.clone());
                }
            }
        }
        wallets
    }

    /// Iterate the subscriptions an event should be delivered to.
    pub fn matching<'a>(
        &'a self,
        event: &'a CanonicalEvent,
    ) -> impl Iterator<Item = &'a Subscription> {
        self.entries.iter().filter(move |s| s.matches(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::event::{NftInfo, Participants};
    use chrono::Utc;

    fn noop_callback() -> EventCallback {
        Arc::new(|_| Box::pin(async { Ok(()) }))
    }

    fn sale_event(slug: &str, seller: &str) -> CanonicalEvent {
        CanonicalEvent {
            event_type: EventType::ItemSold,
            timestamp: Utc::now(),
            chain: "ethereum".to_string(),
            nft: NftInfo {
                contract_address: Some("0xcontract".to_string()),
                token_id: Some("1".to_string()),
                collection_slug: Some(slug.to_string()),
                ..NftInfo::default()
            },
            money: None,
            participants: Participants {
                from: Some(seller.to_string()),
                to: None,
                maker: None,
            },
            is_collection_level_offer: false,
        }
    }

    #[test]
    fn test_empty_event_types_rejected() {
        let result = Subscription::new("azuki", &[], noop_callback(), None);
        assert!(matches!(result, Err(MonitorError::InvalidArgument(_))));
    }

    #[test]
    fn test_add_replaces_same_key() {
        let mut registry = SubscriptionRegistry::new();
        let types = [EventType::ItemSold, EventType::ItemListed];
        // Same key regardless of the order the caller lists the types in.
        registry.add(Subscription::new("azuki", &types, noop_callback(), Some("0xA")).unwrap());
        registry.add(
            Subscription::new(
                "azuki",
                &[EventType::ItemListed, EventType::ItemSold],
                noop_callback(),
                Some("0xa"),
            )
            .unwrap(),
        );
        assert_eq!(registry.len(), 1);

        // A different wallet is a different key.
        registry.add(Subscription::new("azuki", &types, noop_callback(), Some("0xb")).unwrap());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_wildcard_matches_any_collection() {
        let sub =
            Subscription::new("*", &[EventType::ItemSold], noop_callback(), None).unwrap();
        assert!(sub.matches(&sale_event("azuki", "0xseller")));
        assert!(sub.matches(&sale_event("doodles", "0xseller")));
    }

    #[test]
    fn test_specific_slug_must_match() {
        let sub =
            Subscription::new("azuki", &[EventType::ItemSold], noop_callback(), None).unwrap();
        assert!(sub.matches(&sale_event("azuki", "0xseller")));
        assert!(!sub.matches(&sale_event("doodles", "0xseller")));

        // An event with no slug cannot satisfy a specific filter.
        let mut event = sale_event("azuki", "0xseller");
        event.nft.collection_slug = None;
        assert!(!sub.matches(&event));
    }

    #[test]
    fn test_unsubscribed_type_skipped() {
        let sub =
            Subscription::new("azuki", &[EventType::ItemListed], noop_callback(), None).unwrap();
        assert!(!sub.matches(&sale_event("azuki", "0xseller")));
    }

    #[test]
    fn test_wallet_filter_fail_open_without_filter() {
        let sub =
            Subscription::new("azuki", &[EventType::ItemSold], noop_callback(), None).unwrap();
        let mut event = sale_event("azuki", "0xseller");
        event.participants = Participants::default();
        // No filter declared: address-less events still pass.
        assert!(sub.matches(&event));
    }

    #[test]
    fn test_wallet_filter_drops_on_mismatch() {
        let sub = Subscription::new(
            "azuki",
            &[EventType::ItemSold],
            noop_callback(),
            Some("0xAAA"),
        )
        .unwrap();
        assert!(sub.matches(&sale_event("azuki", "0xaaa")));
        assert!(!sub.matches(&sale_event("azuki", "0xbbb")));
    }

    #[test]
    fn test_distinct_wallets_deduplicates() {
        let mut registry = SubscriptionRegistry::new();
        let types = [EventType::ItemSold];
        registry.add(Subscription::new("a", &types, noop_callback(), Some("0xAA")).unwrap());
        registry.add(Subscription::new("b", &types, noop_callback(), Some("0xaa")).unwrap());
        registry.add(Subscription::new("c", &types, noop_callback(), Some("0xbb")).unwrap());
        registry.add(Subscription::new("d", &types, noop_callback(), None).unwrap());
        assert_eq!(registry.distinct_wallets(), vec!["0xaa", "0xbb"]);
    }
}
