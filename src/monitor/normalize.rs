//! Raw-to-canonical event transformation.
//!
//! Translates the payload shapes of both transports into [`CanonicalEvent`]s.
//! The mapping tables are fixed at compile time: raw REST type names map
//! through `canonical_account_event_type`, push-feed names through
//! `canonical_stream_event_type`, and payment currencies resolve through the
//! chain tables. Inputs missing a required field are dropped with a debug
//! note — a partial event is never forwarded.

use crate::chain::{self, ChainConfig, NATIVE_TOKEN_ADDRESS};
use crate::marketplace::{RawAccountEvent, StreamEvent, StreamPayload};
use crate::monitor::event::{CanonicalEvent, EventType, MoneyInfo, NftInfo, Participants};
use crate::utils::format_base_units;
use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

/// Map a raw REST event to its canonical type.
///
/// `order` events split on the offer discriminator: offers become bids,
/// everything else is a listing. Unsupported types (e.g. `redemption`)
/// map to `None` and are dropped by the caller.
pub fn canonical_account_event_type(raw: &RawAccountEvent) -> Option<EventType> {
    match raw.event_type.as_str() {
        "sale" => Some(EventType::ItemSold),
        "transfer" => Some(EventType::ItemTransferred),
        "order" => {
            if is_offer_order(raw.order_type.as_deref()) {
                Some(EventType::ItemReceivedBid)
            } else {
                Some(EventType::ItemListed)
            }
        }
        "cancel" => Some(EventType::ItemCancelled),
        _ => None,
    }
}

fn is_offer_order(order_type: Option<&str>) -> bool {
    matches!(
        order_type,
        Some("offer" | "item_offer" | "collection_offer" | "trait_offer")
    )
}

fn is_collection_scope_order(order_type: Option<&str>) -> bool {
    matches!(order_type, Some("collection_offer" | "trait_offer"))
}

/// Map a push-feed event name to its canonical type.
pub fn canonical_stream_event_type(name: &str) -> Option<EventType> {
    match name {
        "item_listed" => Some(EventType::ItemListed),
        "item_sold" => Some(EventType::ItemSold),
        "item_transferred" => Some(EventType::ItemTransferred),
        "item_received_bid" | "item_received_offer" => Some(EventType::ItemReceivedBid),
        "item_cancelled" => Some(EventType::ItemCancelled),
        "item_metadata_updated" => Some(EventType::ItemMetadataUpdated),
        _ => None,
    }
}

/// Resolve a payment token to a currency symbol.
///
/// The zero address is the chain's native currency; known wrapped-token
/// addresses map to their canonical symbols; otherwise the transport-supplied
/// symbol is used. `None` means the currency cannot be determined at all.
pub fn resolve_currency(
    token_address: Option<&str>,
    fallback_symbol: Option<&str>,
    chain: &ChainConfig,
) -> Option<String> {
    if let Some(address) = token_address {
        if address.eq_ignore_ascii_case(NATIVE_TOKEN_ADDRESS) {
            return Some(chain.native_currency_symbol.to_string());
        }
        if let Some(symbol) = chain::wrapped_token_symbol(address) {
            return Some(symbol.to_string());
        }
    }
    fallback_symbol.map(|s| s.to_string())
}

/// Deterministic identifier for deduplication.
///
/// Joined from the stable fields of a raw event so that repeated delivery of
/// the same underlying event produces the same identifier.
pub fn dedup_identifier(raw: &RawAccountEvent) -> String {
    let token = raw.token();
    let contract = token.and_then(|t| t.contract.as_deref()).unwrap_or("-");
    let token_id = token.and_then(|t| t.identifier.as_deref()).unwrap_or("-");
    let hash = raw
        .transaction
        .as_deref()
        .or(raw.order_hash.as_deref())
        .unwrap_or("-");

    format!(
        "{}:{}:{}:{}:{}",
        raw.event_timestamp, raw.event_type, contract, token_id, hash
    )
}

fn lowercased(address: &Option<String>) -> Option<String> {
    address.as_ref().map(|a| a.to_ascii_lowercase())
}

/// Transform a raw REST event into a canonical event.
///
/// Returns `None` (with a debug note) for unsupported types and for inputs
/// missing a field their type requires.
pub fn account_event_to_canonical(
    raw: &RawAccountEvent,
    chain: &ChainConfig,
) -> Option<CanonicalEvent> {
    let Some(event_type) = canonical_account_event_type(raw) else {
        debug!("Dropping unsupported event type: {}", raw.event_type);
        return None;
    };

    if raw.event_timestamp <= 0 {
        debug!("Dropping {} event without a timestamp", raw.event_type);
        return None;
    }
    let timestamp = Utc.timestamp_opt(raw.event_timestamp, 0).single()?;

    let is_collection_level_offer = event_type == EventType::ItemReceivedBid
        && (is_collection_scope_order(raw.order_type.as_deref())
            || (raw.token().is_none() && raw.criteria.is_some()));

    let nft = match raw.token() {
        Some(token) => {
            let Some(contract) = token.contract.clone() else {
                debug!("Dropping {} event without a contract address", raw.event_type);
                return None;
            };
            NftInfo {
                contract_address: Some(contract),
                token_id: token.identifier.clone(),
                name: token.name.clone(),
                image_url: token.display_image_url.clone(),
                collection_slug: token.collection.clone(),
                collection_name: None,
            }
        }
        None if is_collection_level_offer => {
            // Collection-level offers target criteria, not a token.
            let Some(criteria) = raw.criteria.as_ref() else {
                debug!("Dropping collection offer without criteria");
                return None;
            };
            let contract_address = criteria.contract.as_ref().and_then(|c| c.address.clone());
            let collection_slug = criteria.collection.as_ref().and_then(|c| c.slug.clone());
            if contract_address.is_none() && collection_slug.is_none() {
                debug!("Dropping collection offer with empty criteria");
                return None;
            }
            NftInfo {
                contract_address,
                collection_slug,
                ..NftInfo::default()
            }
        }
        None => {
            debug!("Dropping {} event without token details", raw.event_type);
            return None;
        }
    };

    let money = if event_type.is_priced() {
        let Some(payment) = raw.payment.as_ref() else {
            debug!("Dropping {} event without payment details", raw.event_type);
            return None;
        };
        let amount = match (payment.quantity.as_deref(), payment.decimals) {
            (Some(quantity), Some(decimals)) => match quantity.parse::<u128>() {
                Ok(units) => format_base_units(units, decimals),
                Err(_) => {
                    debug!("Dropping event with unparseable payment quantity: {}", quantity);
                    return None;
                }
            },
            _ => {
                debug!("Dropping {} event with incomplete payment", raw.event_type);
                return None;
            }
        };
        let Some(currency) = resolve_currency(
            payment.token_address.as_deref(),
            payment.symbol.as_deref(),
            chain,
        ) else {
            debug!("Dropping {} event with unresolvable currency", raw.event_type);
            return None;
        };
        Some(MoneyInfo { amount, currency })
    } else {
        None
    };

    let participants = match event_type {
        EventType::ItemSold => Participants {
            from: lowercased(&raw.seller),
            to: lowercased(&raw.buyer),
            maker: None,
        },
        EventType::ItemTransferred => Participants {
            from: lowercased(&raw.from_address),
            to: lowercased(&raw.to_address),
            maker: None,
        },
        EventType::ItemListed | EventType::ItemReceivedBid | EventType::ItemCancelled => {
            Participants {
                from: None,
                to: None,
                maker: lowercased(&raw.maker),
            }
        }
        EventType::ItemMetadataUpdated => Participants::default(),
    };

    Some(CanonicalEvent {
        event_type,
        timestamp,
        chain: raw.chain.clone().unwrap_or_else(|| chain.id.to_string()),
        nft,
        money,
        participants,
        is_collection_level_offer,
    })
}

/// Split a composite `chain/contract/token_id` item identifier.
fn split_nft_id(nft_id: &str) -> (Option<&str>, Option<&str>, Option<&str>) {
    let mut parts = nft_id.splitn(3, '/');
    (parts.next(), parts.next(), parts.next())
}

/// Wallet addresses present in a raw push-feed payload, lowercased.
///
/// Used by the stream backend's wallet filter, which inspects the raw payload
/// rather than the canonical participants.
pub fn stream_event_wallets(payload: &StreamPayload) -> Vec<String> {
    [
        &payload.maker,
        &payload.taker,
        &payload.from_account,
        &payload.to_account,
    ]
    .into_iter()
    .filter_map(|account| account.as_ref().and_then(|a| a.address.as_ref()))
    .map(|address| address.to_ascii_lowercase())
    .collect()
}

/// Transform a raw push-feed event into a canonical event.
pub fn stream_event_to_canonical(raw: &StreamEvent) -> Option<CanonicalEvent> {
    let Some(event_type) = canonical_stream_event_type(&raw.event_type) else {
        debug!("Dropping unsupported stream event type: {}", raw.event_type);
        return None;
    };
    let payload = &raw.payload;

    let timestamp_str = payload
        .event_timestamp
        .as_deref()
        .or_else(|| payload.transaction.as_ref().and_then(|t| t.timestamp.as_deref()));
    let Some(timestamp) = timestamp_str.and_then(parse_instant) else {
        debug!("Dropping {} stream event without a timestamp", raw.event_type);
        return None;
    };

    let item = payload.item.as_ref();
    let (id_chain, id_contract, id_token) = item
        .and_then(|i| i.nft_id.as_deref())
        .map(split_nft_id)
        .unwrap_or((None, None, None));

    let is_collection_level_offer = event_type == EventType::ItemReceivedBid
        && (payload.is_collection_offer == Some(true) || id_contract.is_none());

    let contract_address = id_contract.map(|c| c.to_string());
    if contract_address.is_none() && !is_collection_level_offer {
        debug!("Dropping {} stream event without token details", raw.event_type);
        return None;
    }

    let collection_slug = payload.collection.as_ref().and_then(|c| c.slug.clone());
    if contract_address.is_none() && collection_slug.is_none() {
        debug!("Dropping collection offer with no collection reference");
        return None;
    }

    let metadata = item.and_then(|i| i.metadata.as_ref());
    let nft = NftInfo {
        contract_address,
        token_id: id_token.map(|t| t.to_string()),
        name: metadata.and_then(|m| m.name.clone()),
        image_url: metadata.and_then(|m| m.image_url.clone()),
        collection_slug,
        collection_name: None,
    };

    let chain_name = item
        .and_then(|i| i.chain.as_ref())
        .and_then(|c| c.name.clone())
        .or_else(|| id_chain.map(|c| c.to_string()));
    let Some(chain_name) = chain_name else {
        debug!("Dropping {} stream event without a chain", raw.event_type);
        return None;
    };

    let money = if event_type.is_priced() {
        let price = match event_type {
            EventType::ItemSold => payload.sale_price.as_deref().or(payload.base_price.as_deref()),
            _ => payload.base_price.as_deref(),
        };
        let token = payload.payment_token.as_ref();
        let amount = match (price, token.and_then(|t| t.decimals)) {
            (Some(price), Some(decimals)) => match price.parse::<u128>() {
                Ok(units) => format_base_units(units, decimals),
                Err(_) => {
                    debug!("Dropping stream event with unparseable price: {}", price);
                    return None;
                }
            },
            _ => {
                debug!("Dropping {} stream event with incomplete payment", raw.event_type);
                return None;
            }
        };
        let token_address = token.and_then(|t| t.address.as_deref());
        let token_symbol = token.and_then(|t| t.symbol.as_deref());
        let currency = match chain::config(&chain_name) {
            Some(chain_config) => resolve_currency(token_address, token_symbol, &chain_config),
            // Unknown chain: no native-symbol mapping, wrapped table and the
            // transport symbol still apply.
            None => token_address
                .and_then(chain::wrapped_token_symbol)
                .map(str::to_string)
                .or_else(|| token_symbol.map(str::to_string)),
        };
        let Some(currency) = currency else {
            debug!("Dropping {} stream event with unresolvable currency", raw.event_type);
            return None;
        };
        Some(MoneyInfo { amount, currency })
    } else {
        None
    };

    let account_address =
        |account: &Option<crate::marketplace::StreamAccount>| -> Option<String> {
            account.as_ref().and_then(|a| lowercased(&a.address))
        };

    let participants = match event_type {
        EventType::ItemSold => Participants {
            from: account_address(&payload.maker),
            to: account_address(&payload.taker),
            maker: None,
        },
        EventType::ItemTransferred => Participants {
            from: account_address(&payload.from_account),
            to: account_address(&payload.to_account),
            maker: None,
        },
        EventType::ItemListed | EventType::ItemReceivedBid | EventType::ItemCancelled => {
            Participants {
                from: None,
                to: None,
                maker: account_address(&payload.maker),
            }
        }
        EventType::ItemMetadataUpdated => Participants::default(),
    };

    Some(CanonicalEvent {
        event_type,
        timestamp,
        chain: chain_name,
        nft,
        money,
        participants,
        is_collection_level_offer,
    })
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
