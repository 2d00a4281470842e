use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use tokio::task::JoinError;
use tracing::debug;

use super::content::{ContentPage, FetchError};

pub(crate) const METRIC_FETCH_COALESCED: &str = "postloop_fetch_coalesced_total";

type SharedFetch = Shared<BoxFuture<'static, Result<ContentPage, FetchError>>>;

/// Fetches currently running, keyed by canonical cache key.
///
/// Concurrent requests for the same key share one underlying fetch; every
/// caller receives a clone of its result. Each fetch runs on its own task,
/// so it completes and leaves the map even after every waiter was dropped.
#[derive(Default, Clone)]
pub struct InFlightFetches {
    pending: Arc<DashMap<String, (u64, SharedFetch)>>,
    next_id: Arc<AtomicU64>,
}

impl InFlightFetches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Await the fetch running for `key`, starting it with `start` if there
    /// is none.
    pub async fn run<F, Fut>(&self, key: &str, start: F) -> Result<ContentPage, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ContentPage, FetchError>> + Send + 'static,
    {
        let shared = match self.pending.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                counter!(METRIC_FETCH_COALESCED).increment(1);
                debug!(key, "joining in-flight fetch");
                occupied.get().1.clone()
            }
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let pending = Arc::clone(&self.pending);
                let owned_key = key.to_string();
                let fetch = start();
                let task = tokio::spawn(async move {
                    let result = fetch.await;
                    pending.remove_if(&owned_key, |_, (entry_id, _)| *entry_id == id);
                    result
                });
                let shared = task.map(flatten_join).boxed().shared();
                vacant.insert((id, shared.clone()));
                shared
            }
        };

        shared.await
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn flatten_join(
    joined: Result<Result<ContentPage, FetchError>, JoinError>,
) -> Result<ContentPage, FetchError> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => Err(FetchError::Cancelled),
        Err(err) => Err(FetchError::transport(format!("fetch task failed: {err}"))),
    }
}
