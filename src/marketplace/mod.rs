//! Marketplace transport module
//!
//! This module provides the clients and types for talking to the marketplace:
//! a REST client used by the poll backend to page through recent account
//! events, and a WebSocket client used by the stream backend for real-time
//! push delivery. Both are exposed behind traits so the monitors can be
//! exercised against scripted transports in tests.

/// REST client for the marketplace HTTP API
mod client;
/// WebSocket client for the marketplace push feed
mod stream;
/// Type definitions for transport payloads
mod types;

pub use client::{MarketplaceApi, MarketplaceClient};
pub use stream::{MarketplaceStreamSocket, StreamEventHandler, StreamTransport};
pub use types::*;
