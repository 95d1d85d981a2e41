//! Chain configuration tables for the marketplace monitor.
//!
//! Maps marketplace chain identifiers to display names and native currency
//! symbols, and resolves well-known wrapped-token contract addresses to their
//! canonical symbols. Tables are immutable and inlined; unknown chains are a
//! configuration error surfaced by the caller.

/// Configuration for a single supported chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    /// Marketplace identifier, e.g. "ethereum" or "base".
    pub id: &'static str,
    /// Human-readable chain name.
    pub name: &'static str,
    /// Symbol of the chain's native currency.
    pub native_currency_symbol: &'static str,
}

/// The zero address, used by the marketplace feed for native-currency payments.
pub const NATIVE_TOKEN_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Look up the configuration for a chain identifier.
pub fn config(id: &str) -> Option<ChainConfig> {
    let (id, name, native_currency_symbol) = match id {
        "ethereum" => ("ethereum", "Ethereum", "ETH"),
        "base" => ("base", "Base", "ETH"),
        "arbitrum" => ("arbitrum", "Arbitrum One", "ETH"),
        "optimism" => ("optimism", "Optimism", "ETH"),
        "matic" | "polygon" => ("matic", "Polygon", "POL"),
        "sepolia" => ("sepolia", "Sepolia", "ETH"),
        _ => return None,
    };

    Some(ChainConfig {
        id,
        name,
        native_currency_symbol,
    })
}

/// Resolve a wrapped-token contract address to its canonical symbol.
///
/// Covers the wrapped native tokens the marketplace settles offers in.
/// Addresses are compared case-insensitively.
pub fn wrapped_token_symbol(address: &str) -> Option<&'static str> {
    match address.to_ascii_lowercase().as_str() {
        // WETH: mainnet, Base, Arbitrum One, Optimism, Sepolia
        "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2" => Some("WETH"),
        "0x4200000000000000000000000000000000000006" => Some("WETH"),
        "0x82af49447d8a07e3bd95bd0d56f35241523fbab1" => Some("WETH"),
        "0xfff9976782d46cc05630d1f6ebab18b2324d6b14" => Some("WETH"),
        // Wrapped POL on Polygon
        "0x0d500b1d8e8ef31e21c99d1db9a6444d3adf1270" => Some("WPOL"),
        // Bridged WETH on Polygon
        "0x7ceb23fd6bc0add59e62ac25578270cff1b9f619" => Some("WETH"),
        _ => None,
    }
}
