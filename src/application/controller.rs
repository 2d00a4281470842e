//! Loop controller: owns one displayed query and decides how each fetch
//! interacts with the response cache.
//!
//! Replace fetches (initial load, page change, refresh, invalidation) read
//! and write the cache keyed by the exact page. Append fetches (load more,
//! infinite scroll) read it but never write, so a cached page always holds
//! exactly what one replace fetch returned.
//!
//! Every replace fetch supersedes whatever ran before it: the previous waiter
//! is aborted, and a result that arrives for an outdated generation is
//! discarded without touching the cache or the displayed items.

use std::slice;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future::{AbortHandle, AbortRegistration, Abortable};
use metrics::histogram;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::cache::{
    ContentEvent, EventBus, EventKind, PAGE_PARAM, ParamMap, ResponseCache, cache_key,
    logical_query_key, mutex_lock,
};
use crate::domain::query::QueryState;

use super::compiler::QueryCompiler;
use super::content::{ContentApi, ContentPage, FetchError};
use super::inflight::InFlightFetches;
use super::pagination::{PageLink, page_links};

const SOURCE: &str = "application::controller";

pub(crate) const METRIC_FETCH_MS: &str = "postloop_fetch_ms";

pub const DEFAULT_PREFETCH_MARGIN_PX: u32 = 100;
pub const DEFAULT_INVALIDATION_DEBOUNCE: Duration = Duration::from_millis(1_000);
pub const DEFAULT_AUTO_REFRESH: Duration = Duration::from_millis(30_000);

/// Behavior knobs for one controller.
#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Distance from the end of the list at which infinite scroll loads more.
    pub prefetch_margin_px: u32,
    /// Quiet period after the last content event before invalidating.
    pub invalidation_debounce: Duration,
    /// Periodic refresh interval; `None` disables it.
    pub auto_refresh: Option<Duration>,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            prefetch_margin_px: DEFAULT_PREFETCH_MARGIN_PX,
            invalidation_debounce: DEFAULT_INVALIDATION_DEBOUNCE,
            auto_refresh: None,
        }
    }
}

impl From<&crate::config::LoopSettings> for LoopOptions {
    fn from(settings: &crate::config::LoopSettings) -> Self {
        Self {
            prefetch_margin_px: settings.prefetch_margin_px,
            invalidation_debounce: settings.invalidation_debounce,
            auto_refresh: settings.auto_refresh,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Idle,
    Fetching,
    Error,
}

/// Read-only snapshot of the controller for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopView {
    pub status: LoopStatus,
    pub items: Vec<Value>,
    pub current_page: u32,
    pub last_loaded_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
    pub has_more: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    Replace,
    Append,
}

impl FetchMode {
    fn as_str(self) -> &'static str {
        match self {
            FetchMode::Replace => "replace",
            FetchMode::Append => "append",
        }
    }
}

struct LoopState {
    query: QueryState,
    /// Parameters compiled for `query`. Reused by refresh, invalidation and
    /// append fetches so relative dates resolve once per displayed query.
    params: ParamMap,
    status: LoopStatus,
    items: Vec<Value>,
    last_loaded_page: u32,
    total_items: u64,
    total_pages: u32,
    error: Option<FetchError>,
    generation: u64,
    loaded: bool,
    abort: Option<AbortHandle>,
}

impl LoopState {
    fn has_more(&self) -> bool {
        self.loaded && self.last_loaded_page < self.total_pages
    }

    fn view(&self) -> LoopView {
        LoopView {
            status: self.status,
            items: self.items.clone(),
            current_page: self.query.current_page,
            last_loaded_page: self.last_loaded_page,
            total_items: self.total_items,
            total_pages: self.total_pages,
            has_more: self.has_more(),
            error: self.error.as_ref().map(ToString::to_string),
        }
    }
}

/// Fetch prepared under the state lock, executed without it.
struct FetchPlan {
    mode: FetchMode,
    generation: u64,
    query: QueryState,
    params: ParamMap,
    registration: AbortRegistration,
}

pub struct LoopController {
    api: Arc<dyn ContentApi>,
    cache: Arc<ResponseCache<ContentPage>>,
    inflight: InFlightFetches,
    compiler: QueryCompiler,
    options: LoopOptions,
    state: Mutex<LoopState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LoopController {
    pub fn new(
        api: Arc<dyn ContentApi>,
        cache: Arc<ResponseCache<ContentPage>>,
        compiler: QueryCompiler,
        options: LoopOptions,
    ) -> Self {
        Self {
            api,
            cache,
            inflight: InFlightFetches::new(),
            compiler,
            options,
            state: Mutex::new(LoopState {
                query: QueryState::default(),
                params: ParamMap::new(),
                status: LoopStatus::Idle,
                items: Vec::new(),
                last_loaded_page: 0,
                total_items: 0,
                total_pages: 0,
                error: None,
                generation: 0,
                loaded: false,
                abort: None,
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Share in-flight fetches with other controllers using the same API.
    pub fn with_inflight(mut self, inflight: InFlightFetches) -> Self {
        self.inflight = inflight;
        self
    }

    pub fn options(&self) -> &LoopOptions {
        &self.options
    }

    pub fn snapshot(&self) -> LoopView {
        self.lock_state("snapshot").view()
    }

    pub fn query(&self) -> QueryState {
        self.lock_state("query").query.clone()
    }

    pub fn status(&self) -> LoopStatus {
        self.lock_state("status").status
    }

    pub fn is_fetching(&self) -> bool {
        self.status() == LoopStatus::Fetching
    }

    pub fn has_more(&self) -> bool {
        self.lock_state("has_more").has_more()
    }

    /// Numbered links for the current page and total.
    pub fn page_links(&self) -> Vec<PageLink> {
        let state = self.lock_state("page_links");
        page_links(state.total_pages, state.query.current_page)
    }

    /// Display a new query, replacing the current results.
    #[instrument(skip_all, fields(post_type = %query.post_type, page = query.current_page))]
    pub async fn load(&self, query: QueryState) -> Result<LoopView, FetchError> {
        let plan = self.begin_replace(query);
        self.execute(plan).await
    }

    /// Show page `page` of the current query.
    #[instrument(skip(self))]
    pub async fn go_to_page(&self, page: u32) -> Result<LoopView, FetchError> {
        let query = self.query().with_page(page);
        let plan = self.begin_replace(query);
        self.execute(plan).await
    }

    /// Reload the current page, bypassing its cached entry.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<LoopView, FetchError> {
        let (query, displayed_key) = {
            let state = self.lock_state("refresh");
            let key = state
                .loaded
                .then(|| cache_key(state.query.collection(), &state.params));
            (state.query.clone(), key)
        };
        if let Some(key) = displayed_key
            && self.cache.remove(&key)
        {
            debug!(key = %key, "dropped cached page before refresh");
        }

        let plan = self.begin_replace(query);
        self.execute(plan).await
    }

    /// Append the page after the last loaded one.
    ///
    /// No-op returning the current view while a fetch is running or when the
    /// last page is already loaded. After a failed append the same page is
    /// requested again.
    #[instrument(skip(self))]
    pub async fn load_more(&self) -> Result<LoopView, FetchError> {
        let plan = {
            let mut state = self.lock_state("load_more");
            if state.status == LoopStatus::Fetching || !state.has_more() {
                debug!(
                    status = ?state.status,
                    has_more = state.has_more(),
                    "load more ignored"
                );
                return Ok(state.view());
            }

            let (abort, registration) = AbortHandle::new_pair();
            state.abort = Some(abort);
            state.status = LoopStatus::Fetching;
            let next_page = state.last_loaded_page + 1;
            FetchPlan {
                mode: FetchMode::Append,
                generation: state.generation,
                query: state.query.with_page(next_page),
                params: state.params.clone().with(PAGE_PARAM, next_page),
                registration,
            }
        };
        self.execute(plan).await
    }

    /// Infinite scroll trigger: the end-of-list sentinel is `distance_px`
    /// away from the viewport. Returns `None` when nothing was loaded.
    pub async fn on_sentinel(&self, distance_px: u32) -> Option<Result<LoopView, FetchError>> {
        if distance_px > self.options.prefetch_margin_px {
            return None;
        }
        {
            let state = self.lock_state("on_sentinel");
            if state.status == LoopStatus::Fetching || !state.has_more() {
                return None;
            }
        }
        Some(self.load_more().await)
    }

    /// Apply one content event. See [`LoopController::handle_events`].
    pub async fn handle_event(&self, event: &ContentEvent) -> Option<Result<LoopView, FetchError>> {
        self.handle_events(slice::from_ref(event)).await
    }

    /// Invalidate for a batch of content events and reload the current page.
    ///
    /// Events scoped to another content type are ignored. A scoped event
    /// drops every cached page of the displayed query; an unscoped one clears
    /// the whole cache. Returns `None` when nothing applied or nothing has
    /// been loaded yet.
    #[instrument(skip_all, fields(events = events.len()))]
    pub async fn handle_events(
        &self,
        events: &[ContentEvent],
    ) -> Option<Result<LoopView, FetchError>> {
        let (query, params, loaded) = {
            let state = self.lock_state("handle_events");
            (state.query.clone(), state.params.clone(), state.loaded)
        };

        let relevant: Vec<&ContentEvent> = events
            .iter()
            .filter(|event| event.applies_to(&query.post_type))
            .collect();
        if relevant.is_empty() {
            debug!(post_type = %query.post_type, "content events out of scope");
            return None;
        }

        if relevant.iter().any(|event| event.content_type.is_none()) {
            self.cache.clear();
            info!(post_type = %query.post_type, "cleared response cache");
        } else {
            let logical = logical_query_key(query.collection(), &params);
            let removed = self.cache.remove_query(&logical);
            info!(
                post_type = %query.post_type,
                removed,
                "invalidated cached pages of displayed query"
            );
        }

        if !loaded {
            return None;
        }
        let plan = self.begin_replace(query);
        Some(self.execute(plan).await)
    }

    /// Consume content events from `receiver`, debouncing bursts into one
    /// invalidation.
    pub fn spawn_event_listener(self: &Arc<Self>, receiver: broadcast::Receiver<ContentEvent>) {
        let controller = Arc::downgrade(self);
        let debounce = self.options.invalidation_debounce;
        let handle = tokio::spawn(listen_for_events(controller, receiver, debounce));
        self.track(handle);
    }

    /// Re-issue [`LoopController::refresh`] every `period`, skipping ticks
    /// while any fetch is running.
    pub fn spawn_auto_refresh(self: &Arc<Self>, period: Duration) {
        let controller = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await; // Skip the first immediate tick
            loop {
                ticker.tick().await;
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                if controller.is_fetching() {
                    debug!("auto refresh skipped: fetch in progress");
                    continue;
                }
                if let Err(err) = controller.refresh().await {
                    warn!(error = %err, "auto refresh failed");
                }
            }
        });
        self.track(handle);
    }

    /// Start the background tasks the options ask for.
    pub fn start(self: &Arc<Self>, events: Option<&EventBus>) {
        if let Some(bus) = events {
            self.spawn_event_listener(bus.subscribe());
        }
        if let Some(period) = self.options.auto_refresh {
            self.spawn_auto_refresh(period);
        }
    }

    /// Abort background tasks and any running fetch.
    pub fn dispose(&self) {
        for handle in mutex_lock(&self.tasks, SOURCE, "dispose").drain(..) {
            handle.abort();
        }
        let mut state = self.lock_state("dispose");
        if let Some(abort) = state.abort.take() {
            abort.abort();
        }
        state.generation += 1;
        if state.status == LoopStatus::Fetching {
            state.status = LoopStatus::Idle;
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = mutex_lock(&self.tasks, SOURCE, "track");
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn lock_state(&self, op: &'static str) -> std::sync::MutexGuard<'_, LoopState> {
        mutex_lock(&self.state, SOURCE, op)
    }

    fn begin_replace(&self, query: QueryState) -> FetchPlan {
        let params = self.compiler.compile(&query);
        let mut state = self.lock_state("begin_replace");
        state.generation += 1;
        if let Some(previous) = state.abort.take() {
            previous.abort();
            debug!(generation = state.generation, "superseded running fetch");
        }

        let (abort, registration) = AbortHandle::new_pair();
        state.abort = Some(abort);
        state.status = LoopStatus::Fetching;
        state.query = query.clone();
        state.params = params.clone();

        FetchPlan {
            mode: FetchMode::Replace,
            generation: state.generation,
            query,
            params,
            registration,
        }
    }

    async fn execute(&self, plan: FetchPlan) -> Result<LoopView, FetchError> {
        let FetchPlan {
            mode,
            generation,
            query,
            params,
            registration,
        } = plan;

        let collection = query.collection().to_string();
        let key = cache_key(&collection, &params);

        let (result, from_cache) = match self.cache.get(&key) {
            Some(page) => (Ok(page), true),
            None => {
                let fetch = self.fetch_shared(&key, &collection, &params);
                match Abortable::new(fetch, registration).await {
                    Ok(result) => (result, false),
                    Err(_) => {
                        debug!(generation, mode = mode.as_str(), "fetch aborted");
                        return Err(FetchError::Cancelled);
                    }
                }
            }
        };

        let mut state = self.lock_state("execute");
        if state.generation != generation {
            debug!(
                generation,
                current = state.generation,
                mode = mode.as_str(),
                "discarding superseded result"
            );
            return Err(FetchError::Cancelled);
        }
        state.abort = None;

        match result {
            Ok(page) => {
                if mode == FetchMode::Replace && !from_cache {
                    self.store(&collection, &params, &key, &page);
                }
                apply_page(&mut state, mode, query.current_page, page);
                debug!(
                    key = %key,
                    mode = mode.as_str(),
                    from_cache,
                    items = state.items.len(),
                    "loop updated"
                );
                Ok(state.view())
            }
            Err(err) => {
                warn!(key = %key, mode = mode.as_str(), error = %err, "loop fetch failed");
                state.status = LoopStatus::Error;
                state.error = Some(err.clone());
                Err(err)
            }
        }
    }

    async fn fetch_shared(
        &self,
        key: &str,
        collection: &str,
        params: &ParamMap,
    ) -> Result<ContentPage, FetchError> {
        let api = Arc::clone(&self.api);
        let collection = collection.to_string();
        let params = params.clone();
        self.inflight
            .run(key, move || async move {
                let started = Instant::now();
                let result = api.fetch_page(&collection, &params).await;
                histogram!(METRIC_FETCH_MS).record(started.elapsed().as_secs_f64() * 1_000.0);
                result
            })
            .await
    }

    fn store(&self, collection: &str, params: &ParamMap, key: &str, page: &ContentPage) {
        let logical = logical_query_key(collection, params);
        if let Some(evicted) = self.cache.set_in_query(logical, key, page.clone()) {
            debug!(evicted = %evicted, "cache full; dropped oldest page");
        }
    }
}

impl Drop for LoopController {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn apply_page(state: &mut LoopState, mode: FetchMode, page_number: u32, page: ContentPage) {
    let ContentPage {
        items,
        total_items,
        total_pages,
    } = page;

    match mode {
        FetchMode::Replace => state.items = items,
        FetchMode::Append => state.items.extend(items),
    }
    state.last_loaded_page = page_number;
    state.total_items = total_items;
    state.total_pages = total_pages;
    state.status = LoopStatus::Idle;
    state.error = None;
    state.loaded = true;
}

async fn listen_for_events(
    controller: Weak<LoopController>,
    mut receiver: broadcast::Receiver<ContentEvent>,
    debounce: Duration,
) {
    loop {
        let first = match receiver.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => lagged_event(skipped),
            Err(RecvError::Closed) => break,
        };

        let mut batch = vec![first];
        let mut closed = false;
        loop {
            match tokio::time::timeout(debounce, receiver.recv()).await {
                Ok(Ok(event)) => batch.push(event),
                Ok(Err(RecvError::Lagged(skipped))) => batch.push(lagged_event(skipped)),
                Ok(Err(RecvError::Closed)) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        let Some(controller) = controller.upgrade() else {
            break;
        };
        debug!(events = batch.len(), "debounced content events");
        if let Some(Err(err)) = controller.handle_events(&batch).await {
            warn!(error = %err, "reload after invalidation failed");
        }
        if closed {
            break;
        }
    }
}

/// Missed events could have concerned anything, so treat them as a global refresh.
fn lagged_event(skipped: u64) -> ContentEvent {
    warn!(skipped, "content event listener lagged; clearing cache");
    ContentEvent::unscoped(EventKind::Refresh)
}
