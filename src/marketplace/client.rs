//!
//! REST client for the marketplace API.
//!
//! Provides an async client for the marketplace's HTTP endpoints. Requests carry
//! the API key header, and transient failures (rate limits, server errors,
//! connection drops) are retried with exponential backoff before an error is
//! surfaced to the caller.

use super::types::*;
use async_trait::async_trait;
use backoff::{ExponentialBackoff, future::retry};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Read-only view of the marketplace REST API.
///
/// The poll backend depends on this trait rather than the concrete client so
/// tests can substitute a scripted implementation.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
	/// Fetch recent events involving a wallet.
	async fn get_account_events(
		&self,
		wallet: &str,
		query: &AccountEventsQuery,
	) -> Result<AccountEventsResponse, MarketplaceError>;

	/// Fetch the open collection-level offers for a collection.
	#[allow(dead_code)]
	async fn get_collection_offers(
		&self,
		slug: &str,
	) -> Result<CollectionOffersResponse, MarketplaceError>;
}

/// Marketplace REST API client
#[derive(Clone)]
pub struct MarketplaceClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the REST API, without a trailing slash.
	base_url: String,
	/// API key sent with every request.
	api_key: String,
}

impl MarketplaceClient {
	/// Create a new marketplace client.
	///
	/// # Arguments
	/// * `base_url` - Base URL of the REST API.
	/// * `api_key` - API key for the `x-api-key` header.
	pub fn new(base_url: String, api_key: String) -> Self {
		let http_client = Client::builder()
			.timeout(Duration::from_secs(30))
			.build()
			.expect("Failed to create HTTP client");

		Self {
			http_client,
			base_url: base_url.trim_end_matches('/').to_string(),
			api_key,
		}
	}

	/// Retry schedule for transient request failures.
	///
	/// Bounded well below the poll interval so a flapping endpoint delays a
	/// cycle instead of stalling the loop.
	fn retry_policy() -> ExponentialBackoff {
		ExponentialBackoff {
			max_elapsed_time: Some(Duration::from_secs(10)),
			..ExponentialBackoff::default()
		}
	}

	/// Execute a GET request and decode the JSON response.
	///
	/// Rate limits (429), server errors and connection failures are retried;
	/// other client errors fail immediately.
	async fn get_json<T: DeserializeOwned>(
		&self,
		path: &str,
		params: &[(String, String)],
	) -> Result<T, MarketplaceError> {
		let url = format!("{}{}", self.base_url, path);

		let response = retry(Self::retry_policy(), || async {
			let resp = self
				.http_client
				.get(&url)
				.header("x-api-key", &self.api_key)
				.header("Accept", "application/json")
				.query(params)
				.send()
				.await
				.map_err(|e| {
					warn!("Marketplace request to {} failed, retrying: {}", path, e);
					backoff::Error::transient(MarketplaceError::HttpError(e))
				})?;

			let status = resp.status();
			if status.is_success() {
				return Ok(resp);
			}

			let err = MarketplaceError::ApiError(format!("HTTP {} from {}", status, path));
			if status.as_u16() == 429 || status.is_server_error() {
				warn!("Marketplace returned {} for {}, retrying", status, path);
				Err(backoff::Error::transient(err))
			} else {
				Err(backoff::Error::permanent(err))
			}
		})
		.await?;

		let parsed = response.json::<T>().await?;
		Ok(parsed)
	}
}

#[async_trait]
impl MarketplaceApi for MarketplaceClient {
	async fn get_account_events(
		&self,
		wallet: &str,
		query: &AccountEventsQuery,
	) -> Result<AccountEventsResponse, MarketplaceError> {
		let mut params: Vec<(String, String)> = Vec::new();
		for event_type in &query.event_types {
			params.push(("event_type".to_string(), event_type.clone()));
		}
		if let Some(after) = query.after {
			params.push(("after".to_string(), after.to_string()));
		}
		if let Some(limit) = query.limit {
			params.push(("limit".to_string(), limit.to_string()));
		}

		debug!(
			"Fetching account events for {} (after: {:?}, limit: {:?})",
			wallet, query.after, query.limit
		);

		self.get_json(&format!("/api/v2/events/accounts/{}", wallet), &params)
			.await
	}

	async fn get_collection_offers(
		&self,
		slug: &str,
	) -> Result<CollectionOffersResponse, MarketplaceError> {
		debug!("Fetching collection offers for {}", slug);

		self.get_json(&format!("/api/v2/offers/collection/{}", slug), &[])
			.await
	}
}
