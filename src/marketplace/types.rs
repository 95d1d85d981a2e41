//! Types for the marketplace REST and stream transports

use serde::{Deserialize, Serialize};

/// Query parameters for the account-events endpoint.
#[derive(Debug, Clone, Default)]
pub struct AccountEventsQuery {
	/// Raw event type names to filter by; empty fetches all types.
	pub event_types: Vec<String>,
	/// Only return events strictly after this unix timestamp (seconds).
	pub after: Option<i64>,
	/// Page size cap.
	pub limit: Option<u32>,
}

/// A single raw event from the account-events REST endpoint.
///
/// All fields besides the type discriminator are optional; the feed omits
/// whole sections depending on the event type, and partial entries are
/// expected to be dropped downstream rather than rejected at parse time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAccountEvent {
	pub event_type: String,
	/// Discriminates listings from offers for `order` events.
	#[serde(default)]
	pub order_type: Option<String>,
	#[serde(default)]
	pub chain: Option<String>,
	/// Unix seconds.
	#[serde(default)]
	pub event_timestamp: i64,
	/// Transaction hash, present for on-chain events (sales, transfers).
	#[serde(default)]
	pub transaction: Option<String>,
	/// Order hash, present for off-chain order events.
	#[serde(default)]
	pub order_hash: Option<String>,
	#[serde(default)]
	pub nft: Option<RawNft>,
	/// Order events carry the token under `asset` instead of `nft`.
	#[serde(default)]
	pub asset: Option<RawNft>,
	#[serde(default)]
	pub payment: Option<RawPayment>,
	#[serde(default)]
	pub seller: Option<String>,
	#[serde(default)]
	pub buyer: Option<String>,
	#[serde(default)]
	pub maker: Option<String>,
	#[serde(default)]
	pub taker: Option<String>,
	#[serde(default)]
	pub from_address: Option<String>,
	#[serde(default)]
	pub to_address: Option<String>,
	/// Present for collection- and trait-level offers in place of `asset`.
	#[serde(default)]
	pub criteria: Option<RawCriteria>,
	#[serde(default)]
	pub quantity: Option<u64>,
}

impl RawAccountEvent {
	/// The token this event concerns, regardless of which field the feed used.
	pub fn token(&self) -> Option<&RawNft> {
		self.nft.as_ref().or(self.asset.as_ref())
	}
}

/// Token details embedded in a raw event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawNft {
	/// Token id within the contract.
	#[serde(default)]
	pub identifier: Option<String>,
	/// Collection slug.
	#[serde(default)]
	pub collection: Option<String>,
	/// Contract address.
	#[serde(default)]
	pub contract: Option<String>,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub display_image_url: Option<String>,
}

/// Payment details embedded in a raw event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPayment {
	/// Amount in base currency units, as a decimal string.
	#[serde(default)]
	pub quantity: Option<String>,
	#[serde(default)]
	pub token_address: Option<String>,
	#[serde(default)]
	pub decimals: Option<u32>,
	#[serde(default)]
	pub symbol: Option<String>,
}

/// Criteria block describing the target of a collection- or trait-level offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCriteria {
	#[serde(default)]
	pub collection: Option<RawCriteriaCollection>,
	#[serde(default)]
	pub contract: Option<RawCriteriaContract>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCriteriaCollection {
	#[serde(default)]
	pub slug: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCriteriaContract {
	#[serde(default)]
	pub address: Option<String>,
}

/// Response envelope for the account-events endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEventsResponse {
	#[serde(default)]
	pub asset_events: Vec<RawAccountEvent>,
	/// Pagination cursor for the next page, if any.
	#[serde(default)]
	pub next: Option<String>,
}

/// Response envelope for the collection-offers endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionOffersResponse {
	#[serde(default)]
	pub offers: Vec<RawCollectionOffer>,
}

/// A single collection-level offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCollectionOffer {
	#[serde(default)]
	pub order_hash: Option<String>,
	#[serde(default)]
	pub chain: Option<String>,
	#[serde(default)]
	pub criteria: Option<RawCriteria>,
	#[serde(default)]
	pub price: Option<RawOfferPrice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOfferPrice {
	#[serde(default)]
	pub currency: Option<String>,
	#[serde(default)]
	pub decimals: Option<u32>,
	#[serde(default)]
	pub value: Option<String>,
}

/// A raw event delivered over the push transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
	pub event_type: String,
	#[serde(default)]
	pub payload: StreamPayload,
}

/// Payload of a push-transport event.
///
/// The push transport sends a flat payload whose populated sections depend on
/// the event type; everything is optional here for the same reason as
/// [`RawAccountEvent`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamPayload {
	#[serde(default)]
	pub item: Option<StreamItem>,
	#[serde(default)]
	pub collection: Option<StreamCollection>,
	/// Listing/offer price in base units, as a decimal string.
	#[serde(default)]
	pub base_price: Option<String>,
	/// Sale price in base units, as a decimal string.
	#[serde(default)]
	pub sale_price: Option<String>,
	#[serde(default)]
	pub payment_token: Option<StreamPaymentToken>,
	#[serde(default)]
	pub maker: Option<StreamAccount>,
	#[serde(default)]
	pub taker: Option<StreamAccount>,
	#[serde(default)]
	pub from_account: Option<StreamAccount>,
	#[serde(default)]
	pub to_account: Option<StreamAccount>,
	/// ISO-8601 instant.
	#[serde(default)]
	pub event_timestamp: Option<String>,
	#[serde(default)]
	pub transaction: Option<StreamTransaction>,
	#[serde(default)]
	pub order_hash: Option<String>,
	#[serde(default)]
	pub quantity: Option<u64>,
	/// Set on bids targeting a whole collection rather than a single token.
	#[serde(default)]
	pub is_collection_offer: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamItem {
	/// Composite id in the form `chain/contract/token_id`.
	#[serde(default)]
	pub nft_id: Option<String>,
	#[serde(default)]
	pub metadata: Option<StreamItemMetadata>,
	#[serde(default)]
	pub chain: Option<StreamChain>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamItemMetadata {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChain {
	#[serde(default)]
	pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamCollection {
	#[serde(default)]
	pub slug: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamAccount {
	#[serde(default)]
	pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamPaymentToken {
	#[serde(default)]
	pub address: Option<String>,
	#[serde(default)]
	pub decimals: Option<u32>,
	#[serde(default)]
	pub symbol: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamTransaction {
	#[serde(default)]
	pub hash: Option<String>,
	#[serde(default)]
	pub timestamp: Option<String>,
}

/// Wire frame used by the push transport's channel protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelFrame {
	pub topic: String,
	pub event: String,
	#[serde(default)]
	pub payload: serde_json::Value,
	#[serde(rename = "ref", default)]
	pub reference: Option<u64>,
}

/// Failure signal emitted by an open push connection.
#[derive(Debug, Clone)]
pub enum TransportFault {
	/// The server closed the connection.
	Closed,
	/// The connection failed with an error.
	Error(String),
}

impl std::fmt::Display for TransportFault {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			TransportFault::Closed => write!(f, "connection closed by server"),
			TransportFault::Error(e) => write!(f, "connection error: {}", e),
		}
	}
}

/// Error types for marketplace transport operations
#[derive(Debug, thiserror::Error)]
pub enum MarketplaceError {
	#[error("API error: {0}")]
	ApiError(String),

	#[error("missing API credentials")]
	MissingCredentials,

	#[error("WebSocket error: {0}")]
	WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("handshake error: {0}")]
	HandshakeError(String),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_partial_account_event_deserializes() {
		let raw: RawAccountEvent =
			serde_json::from_str(r#"{"event_type":"sale"}"#).expect("partial event should parse");
		assert_eq!(raw.event_type, "sale");
		assert!(raw.token().is_none());
		assert_eq!(raw.event_timestamp, 0);
	}

	#[test]
	fn test_token_prefers_nft_over_asset() {
		let raw: RawAccountEvent = serde_json::from_str(
			r#"{
				"event_type": "order",
				"nft": {"identifier": "1", "contract": "0xaa"},
				"asset": {"identifier": "2", "contract": "0xbb"}
			}"#,
		)
		.unwrap();
		assert_eq!(raw.token().unwrap().identifier.as_deref(), Some("1"));
	}

	#[test]
	fn test_empty_stream_payload_deserializes() {
		let event: StreamEvent =
			serde_json::from_str(r#"{"event_type":"item_sold","payload":{}}"#).unwrap();
		assert_eq!(event.event_type, "item_sold");
		assert!(event.payload.item.is_none());
		assert!(event.payload.maker.is_none());
	}
}
