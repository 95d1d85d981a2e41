//! Canonical event model.
//!
//! The normalized, transport-independent representation of marketplace
//! activity. Both backends produce [`CanonicalEvent`]s; subscriber callbacks
//! never see raw transport payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of marketplace activity the monitor can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// An item was listed for sale.
    ItemListed,
    /// An item was sold.
    ItemSold,
    /// An item changed hands outside a sale.
    ItemTransferred,
    /// An item or collection received a bid.
    ItemReceivedBid,
    /// A listing or offer was cancelled.
    ItemCancelled,
    /// An item's metadata changed.
    ItemMetadataUpdated,
}

impl EventType {
    /// Every deliverable event type, in a stable order.
    pub const ALL: [EventType; 6] = [
        EventType::ItemListed,
        EventType::ItemSold,
        EventType::ItemTransferred,
        EventType::ItemReceivedBid,
        EventType::ItemCancelled,
        EventType::ItemMetadataUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ItemListed => "item_listed",
            EventType::ItemSold => "item_sold",
            EventType::ItemTransferred => "item_transferred",
            EventType::ItemReceivedBid => "item_received_bid",
            EventType::ItemCancelled => "item_cancelled",
            EventType::ItemMetadataUpdated => "item_metadata_updated",
        }
    }

    /// Parse a canonical event-type name.
    pub fn parse(name: &str) -> Option<EventType> {
        EventType::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Check if events of this type carry payment details.
    pub fn is_priced(&self) -> bool {
        matches!(
            self,
            EventType::ItemListed | EventType::ItemSold | EventType::ItemReceivedBid
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token details attached to a canonical event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NftInfo {
    /// Contract address; absent only for collection-level offers.
    pub contract_address: Option<String>,
    /// Token id; absent for collection-level events.
    pub token_id: Option<String>,
    pub name: Option<String>,
    pub image_url: Option<String>,
    pub collection_slug: Option<String>,
    pub collection_name: Option<String>,
}

/// Payment details for priced events (listings, sales, bids).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneyInfo {
    /// Decimal amount in whole-token units, e.g. "1.25".
    pub amount: String,
    /// Currency symbol, e.g. "ETH" or "WETH".
    pub currency: String,
}

/// Wallet addresses involved in an event, lowercased.
///
/// Which fields are populated depends on the event type: sales and transfers
/// carry `from`/`to`, order events carry `maker`. Transports do not always
/// supply these, so all fields are optional; filtering semantics for absent
/// addresses differ per backend and live there, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Participants {
    pub from: Option<String>,
    pub to: Option<String>,
    pub maker: Option<String>,
}

impl Participants {
    /// Check whether a wallet appears as sender, receiver or maker.
    pub fn involves(&self, wallet: &str) -> bool {
        [&self.from, &self.to, &self.maker]
            .into_iter()
            .any(|addr| addr.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(wallet)))
    }
}

/// A normalized marketplace event, the unit of delivery to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Chain identifier, e.g. "ethereum" or "base".
    pub chain: String,
    pub nft: NftInfo,
    /// Present iff `event_type.is_priced()`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub money: Option<MoneyInfo>,
    pub participants: Participants,
    /// True for bids targeting a whole collection rather than a single token.
    pub is_collection_level_offer: bool,
}
