mod chain;
mod marketplace;
mod monitor;
mod utils;

use std::sync::Arc;
use tracing::{error, info};

use crate::marketplace::{MarketplaceClient, MarketplaceStreamSocket};
use crate::monitor::{
	EventCallback, EventType, Monitor, PollOptions, PollingMonitor, StreamOptions, StreamingMonitor,
};

fn env_or(name: &str, default: &str) -> String {
	std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
	// Initialize tracing subscriber; RUST_LOG overrides the default level
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting marketplace monitor");

	let api_key = env_or("MARKETPLACE_API_KEY", "");
	let api_url = env_or("MARKETPLACE_API_URL", "https://api.opensea.io");
	let ws_url = env_or(
		"MARKETPLACE_WS_URL",
		"wss://stream.openseabeta.com/socket/websocket",
	);
	let chain_id = env_or("MONITOR_CHAIN", "ethereum");
	let collection = env_or("MONITOR_COLLECTION", "*");
	let transport = env_or("MONITOR_TRANSPORT", "poll");
	let wallet = std::env::var("MONITOR_WALLET").ok();

	// Comma-separated list of canonical type names; everything by default.
	let event_types: Vec<EventType> = match std::env::var("MONITOR_EVENT_TYPES") {
		Ok(names) => {
			let mut types = Vec::new();
			for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
				match EventType::parse(name) {
					Some(event_type) => types.push(event_type),
					None => {
						error!("Unknown event type in MONITOR_EVENT_TYPES: {}", name);
						return;
					}
				}
			}
			types
		}
		Err(_) => EventType::ALL.to_vec(),
	};

	// Delivery seam: downstream notification handling is the subscriber's
	// concern, so the demo just logs each canonical event.
	let callback: EventCallback = Arc::new(|event| {
		Box::pin(async move {
			let token = match (&event.nft.collection_slug, &event.nft.token_id) {
				(Some(slug), Some(id)) => format!("{} #{}", slug, id),
				(Some(slug), None) => slug.clone(),
				(None, _) => event
					.nft
					.contract_address
					.clone()
					.unwrap_or_else(|| "unknown".to_string()),
			};
			let price = event
				.money
				.as_ref()
				.map(|m| format!(" for {} {}", m.amount, m.currency))
				.unwrap_or_default();
			info!("[{}] {} {}{}", event.chain, event.event_type, token, price);
			Ok(())
		})
	});

	let monitor: Arc<dyn Monitor> = match transport.as_str() {
		"stream" => {
			let socket = Arc::new(MarketplaceStreamSocket::new(ws_url, api_key));
			Arc::new(StreamingMonitor::new(socket, StreamOptions::default()))
		}
		_ => {
			let client = Arc::new(MarketplaceClient::new(api_url, api_key));
			match PollingMonitor::new(client, &chain_id, PollOptions::default()) {
				Ok(monitor) => Arc::new(monitor),
				Err(e) => {
					error!("Failed to create poll monitor: {:?}", e);
					return;
				}
			}
		}
	};

	if let Err(e) = monitor.connect().await {
		error!("Failed to connect: {:?}", e);
		return;
	}

	if let Err(e) = monitor
		.subscribe_to_collection(&collection, &event_types, callback, wallet.as_deref())
		.await
	{
		error!("Failed to subscribe: {:?}", e);
		monitor.disconnect().await;
		return;
	}

	info!(
		"Monitoring {} on {} via {} transport, Ctrl-C to stop",
		collection, chain_id, transport
	);

	if let Err(e) = tokio::signal::ctrl_c().await {
		error!("Failed to listen for shutdown signal: {}", e);
	}

	monitor.disconnect().await;
	info!("Monitor stopped");
}
