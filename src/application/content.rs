//! Seam to the external paginated content API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::cache::ParamMap;

/// One page of results plus the totals reported alongside it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPage {
    pub items: Vec<Value>,
    pub total_items: u64,
    pub total_pages: u32,
}

impl ContentPage {
    pub fn new(items: Vec<Value>, total_items: u64, total_pages: u32) -> Self {
        Self {
            items,
            total_items,
            total_pages,
        }
    }

    /// Page built from items alone: everything fits on one page.
    pub fn single(items: Vec<Value>) -> Self {
        let total_items = items.len() as u64;
        let total_pages = u32::from(!items.is_empty());
        Self::new(items, total_items, total_pages)
    }
}

/// Fetch failure. `Clone` so every waiter on a coalesced fetch gets a copy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("content API returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }
}

#[async_trait]
pub trait ContentApi: Send + Sync {
    /// Fetch one page of `collection` filtered by compiled query parameters.
    async fn fetch_page(&self, collection: &str, params: &ParamMap)
    -> Result<ContentPage, FetchError>;
}
