//! REST client for the paginated content API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use crate::application::content::{ContentApi, ContentPage, FetchError};
use crate::cache::ParamMap;
use crate::config::ApiSettings;

use super::error::InfraError;

// `X-WP-Total` / `X-WP-TotalPages`; header names are case-insensitive.
pub const TOTAL_ITEMS_HEADER: &str = "x-wp-total";
pub const TOTAL_PAGES_HEADER: &str = "x-wp-totalpages";

const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Clone, Debug)]
pub struct RestContentApi {
    client: Client,
    base: Url,
}

impl RestContentApi {
    pub fn new(settings: &ApiSettings) -> Result<Self, InfraError> {
        Self::with_timeout(settings.base_url.clone(), settings.timeout)
    }

    pub fn with_timeout(base: Url, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self {
            client,
            base: with_trailing_slash(base),
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("postloop/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Full request URL for one page of `collection`.
    pub fn page_url(&self, collection: &str, params: &ParamMap) -> Result<Url, FetchError> {
        let mut url = self
            .base
            .join(collection.trim_matches('/'))
            .map_err(|err| FetchError::transport(format!("invalid collection `{collection}`: {err}")))?;

        let pairs = params.to_query_pairs();
        if !pairs.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in &pairs {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl ContentApi for RestContentApi {
    #[instrument(skip(self, params))]
    async fn fetch_page(
        &self,
        collection: &str,
        params: &ParamMap,
    ) -> Result<ContentPage, FetchError> {
        let url = self.page_url(collection, params)?;
        debug!(url = %url, "requesting content page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::transport(err.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| FetchError::transport(err.to_string()))?;

        if !status.is_success() {
            return Err(http_error(status, &bytes));
        }

        let items: Vec<Value> = serde_json::from_slice(&bytes)
            .map_err(|err| FetchError::decode(format!("expected a JSON array: {err}")))?;
        Ok(page_from_parts(items, &headers))
    }
}

fn with_trailing_slash(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

fn http_error(status: StatusCode, body: &[u8]) -> FetchError {
    let text = String::from_utf8_lossy(body);
    let message: String = text.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
    let message = if message.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        message
    };
    FetchError::http(status.as_u16(), message)
}

/// Combine decoded items with the totals advertised in headers, falling back
/// to the item count and a single page when a header is missing or malformed.
fn page_from_parts(items: Vec<Value>, headers: &HeaderMap) -> ContentPage {
    let total_items =
        header_number::<u64>(headers, TOTAL_ITEMS_HEADER).unwrap_or(items.len() as u64);
    let total_pages = header_number::<u32>(headers, TOTAL_PAGES_HEADER)
        .unwrap_or_else(|| u32::from(!items.is_empty()));

    ContentPage::new(items, total_items, total_pages)
}

fn header_number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}
