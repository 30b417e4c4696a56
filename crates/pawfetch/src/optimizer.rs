//! Request optimizer: read-through caching, retry, batching, debounce and throttle

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use pawcache::{api_key, CacheStore, Expiry};
use reqwest::Method;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::config::{ConfigError, OptimizerConfig};
use crate::error::RequestError;
use crate::metrics::{OptimizerStats, RequestMetrics};
use crate::queue::RequestQueue;
use crate::transport::{RequestOptions, Transport};

type Callback<A> = Arc<dyn Fn(A) + Send + Sync>;
type BatchCallback = Box<dyn FnOnce(Result<Value, RequestError>) + Send>;

/// Pending debounce timer
struct TimerSlot {
    id: u64,
    handle: JoinHandle<()>,
}

/// Throttle window shared by every wrapper with the same key
#[derive(Default)]
struct ThrottleState {
    last_run: Option<Instant>,
    trailing: Option<Box<dyn FnOnce() + Send>>,
    timer: Option<JoinHandle<()>>,
}

struct PendingCall {
    params: Value,
    callback: BatchCallback,
}

/// Calls accumulated for one endpoint group
struct BatchWindow {
    id: u64,
    pending: Vec<PendingCall>,
    scheduled_at: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    config: OptimizerConfig,
    cache: Arc<CacheStore>,
    transport: Arc<dyn Transport>,
    metrics: RequestMetrics,
    timers: Mutex<AHashMap<String, TimerSlot>>,
    throttles: Mutex<AHashMap<String, ThrottleState>>,
    batches: Mutex<AHashMap<String, BatchWindow>>,
    next_id: AtomicU64,
}

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Shapes outbound requests and caches their responses
///
/// Cheap to clone; clones share timers, batch windows and metrics. Methods
/// that schedule work (`debounce`, `throttle`, `batch_request`) must be
/// called from within a tokio runtime.
#[derive(Clone)]
pub struct RequestOptimizer {
    inner: Arc<Inner>,
}

/// Debounced wrapper returned by [`RequestOptimizer::debounce`]
pub struct Debounced<A> {
    inner: Arc<Inner>,
    f: Callback<A>,
    delay: Duration,
    timer_key: String,
}

impl<A> Clone for Debounced<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            f: self.f.clone(),
            delay: self.delay,
            timer_key: self.timer_key.clone(),
        }
    }
}

impl<A: Send + 'static> Debounced<A> {
    /// Restart the timer; `args` replace those of any pending call
    pub fn call(&self, args: A) {
        let id = self.inner.next_id();
        let inner = self.inner.clone();
        let f = self.f.clone();
        let delay = self.delay;
        let timer_key = self.timer_key.clone();

        let mut timers = self.inner.timers.lock();
        if let Some(previous) = timers.remove(&self.timer_key) {
            previous.handle.abort();
        }

        let handle = tokio::spawn(async move {
            sleep(delay).await;
            {
                let mut timers = inner.timers.lock();
                if timers.get(&timer_key).is_some_and(|slot| slot.id == id) {
                    timers.remove(&timer_key);
                }
            }
            inner.metrics.record_debounced();
            f(args);
        });

        timers.insert(self.timer_key.clone(), TimerSlot { id, handle });
    }
}

/// Throttled wrapper returned by [`RequestOptimizer::throttle`]
pub struct Throttled<A> {
    inner: Arc<Inner>,
    f: Callback<A>,
    delay: Duration,
    key: String,
}

impl<A> Clone for Throttled<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            f: self.f.clone(),
            delay: self.delay,
            key: self.key.clone(),
        }
    }
}

impl<A: Send + 'static> Throttled<A> {
    /// Run now if the window is open, otherwise schedule the trailing call
    pub fn call(&self, args: A) {
        let now = Instant::now();

        let leading = {
            let mut throttles = self.inner.throttles.lock();
            let state = throttles.entry(self.key.clone()).or_default();
            let cooled = state
                .last_run
                .map_or(true, |last| now.duration_since(last) >= self.delay);

            if cooled && state.timer.is_none() {
                state.last_run = Some(now);
                Some(args)
            } else {
                let f = self.f.clone();
                state.trailing = Some(Box::new(move || f(args)));

                if state.timer.is_none() {
                    let wait = state
                        .last_run
                        .map(|last| (last + self.delay).saturating_duration_since(now))
                        .unwrap_or_default();
                    state.timer = Some(tokio::spawn(Self::trailing_edge(
                        self.inner.clone(),
                        self.key.clone(),
                        wait,
                    )));
                }
                None
            }
        };

        if let Some(args) = leading {
            self.inner.metrics.record_throttled();
            (self.f)(args);
        }
    }

    async fn trailing_edge(inner: Arc<Inner>, key: String, wait: Duration) {
        sleep(wait).await;

        let job = {
            let mut throttles = inner.throttles.lock();
            let Some(state) = throttles.get_mut(&key) else {
                return;
            };
            state.timer = None;
            state.last_run = Some(Instant::now());
            state.trailing.take()
        };

        if let Some(job) = job {
            inner.metrics.record_throttled();
            job();
        }
    }
}

impl RequestOptimizer {
    /// Create an optimizer over `cache` and `transport`
    pub fn new(
        config: OptimizerConfig,
        cache: Arc<CacheStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        if config.batch.enabled {
            debug!(
                "Batching enabled for {:?} (max {}, window {}ms)",
                config.batch.enabled_endpoints, config.batch.max_batch_size, config.batch.batch_delay_ms
            );
        } else {
            warn!("Batch processing disabled");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                cache,
                transport,
                metrics: RequestMetrics::default(),
                timers: Mutex::new(AHashMap::new()),
                throttles: Mutex::new(AHashMap::new()),
                batches: Mutex::new(AHashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        })
    }

    /// Get current configuration
    pub fn config(&self) -> &OptimizerConfig {
        &self.inner.config
    }

    /// Cache the optimizer reads through
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.inner.cache
    }

    /// Wrap `f` so that only the last call of a burst runs, `delay` after it
    ///
    /// Wrappers sharing `key` share one pending timer.
    pub fn debounce<A, F>(&self, f: F, delay: Duration, key: &str) -> Debounced<A>
    where
        A: Send + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        Debounced {
            inner: self.inner.clone(),
            f: Arc::new(f),
            delay,
            timer_key: format!("debounce_{}", key),
        }
    }

    /// Debounce with the configured search delay
    pub fn debounced_search<A, F>(&self, f: F) -> Debounced<A>
    where
        A: Send + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        let delay = Duration::from_millis(self.inner.config.debounce.search);
        self.debounce(f, delay, "search")
    }

    /// Debounce with the configured filter delay
    pub fn debounced_filter<A, F>(&self, f: F) -> Debounced<A>
    where
        A: Send + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        let delay = Duration::from_millis(self.inner.config.debounce.filter);
        self.debounce(f, delay, "filter")
    }

    /// Wrap `f` so it runs at most once per `delay` for `key`
    ///
    /// Calls inside the window collapse into one trailing call at its end,
    /// made with the latest arguments.
    pub fn throttle<A, F>(&self, f: F, delay: Duration, key: &str) -> Throttled<A>
    where
        A: Send + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        Throttled {
            inner: self.inner.clone(),
            f: Arc::new(f),
            delay,
            key: format!("throttle_{}", key),
        }
    }

    /// Throttle with the configured scroll delay
    pub fn throttled_scroll<A, F>(&self, f: F) -> Throttled<A>
    where
        A: Send + 'static,
        F: Fn(A) + Send + Sync + 'static,
    {
        let delay = Duration::from_millis(self.inner.config.throttle.scroll);
        self.throttle(f, delay, "scroll")
    }

    /// Serve `url` from cache, or fetch it and cache a 2xx response
    ///
    /// Only GET requests are read from or written to the cache; other
    /// methods always reach the network. Without `ttl`, the TTL comes from
    /// the URL's resource category.
    pub async fn cached_request(
        &self,
        url: &str,
        options: RequestOptions,
        ttl: Option<Duration>,
    ) -> Result<Value, RequestError> {
        self.inner.metrics.record_request();

        let result = self.fetch_cached(url, &options, ttl).await;
        if let Err(e) = &result {
            self.inner.metrics.record_failure();
            debug!("Request failed: {}: {}", url, e);
        }
        result
    }

    /// [`cached_request`](Self::cached_request) with retry and backoff
    ///
    /// Only network errors and allow-listed statuses are retried. Without
    /// `max_retries`, the configured count applies. Metrics count one
    /// request, and at most one failure, however many attempts are made.
    pub async fn request_with_retry(
        &self,
        url: &str,
        options: RequestOptions,
        max_retries: Option<u32>,
    ) -> Result<Value, RequestError> {
        let retry = &self.inner.config.retry;
        let max_retries = max_retries.unwrap_or(retry.max_retries);
        let mut attempt = 0;

        self.inner.metrics.record_request();

        loop {
            match self.fetch_cached(url, &options, None).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_retries && e.is_retryable(&retry.retryable_status_codes) => {
                    attempt += 1;
                    let delay = retry.delay_for(attempt);
                    warn!(
                        "Retrying request ({}/{}) in {:?}: {}: {}",
                        attempt, max_retries, delay, url, e
                    );
                    sleep(delay).await;
                    self.inner.metrics.record_retry();
                }
                Err(e) => {
                    self.inner.metrics.record_failure();
                    debug!("Request failed after {} retries: {}: {}", attempt, url, e);
                    return Err(e);
                }
            }
        }
    }

    /// One attempt: cache lookup for GET, then the network
    async fn fetch_cached(
        &self,
        url: &str,
        options: &RequestOptions,
        ttl: Option<Duration>,
    ) -> Result<Value, RequestError> {
        let inner = &self.inner;
        let ttl = ttl.unwrap_or_else(|| inner.config.cache_ttl.ttl_for(url));
        let key = (options.method == Method::GET).then(|| cache_key(url, options));

        if let Some(key) = &key {
            if let Some(record) = inner.cache.cached_api_record(key) {
                let age = inner.cache.now_millis().saturating_sub(record.cached_at);
                if u128::from(age) < ttl.as_millis() {
                    inner.metrics.record_hit();
                    debug!("Cache hit: {}", url);
                    return Ok(record.data);
                }
            }
        }

        let started = Instant::now();
        let body = self.perform(url, options).await?;
        inner.metrics.record_response(started.elapsed(), &body);

        if let Some(key) = &key {
            inner.cache.cache_api_response(key, &body, Expiry::After(ttl));
        }
        Ok(body)
    }

    async fn perform(&self, url: &str, options: &RequestOptions) -> Result<Value, RequestError> {
        let response = self.inner.transport.send(url, options).await?;
        if !response.is_success() {
            return Err(match response.body {
                Value::String(text) if !text.is_empty() => RequestError::Http {
                    status: response.status,
                    message: text,
                },
                _ => RequestError::http(response.status),
            });
        }
        Ok(response.body)
    }

    /// Queue `params` for the endpoint's batch window; `callback` gets this call's share
    ///
    /// Groups that are not batched are requested right away on a spawned task.
    pub fn batch_request<F>(&self, endpoint: &str, params: Value, callback: F)
    where
        F: FnOnce(Result<Value, RequestError>) + Send + 'static,
    {
        let group = batch_group(endpoint);
        let batch = &self.inner.config.batch;

        if !batch.applies_to(&group) {
            let this = self.clone();
            let url = with_params(endpoint, &params);
            tokio::spawn(async move {
                callback(this.cached_request(&url, RequestOptions::default(), None).await);
            });
            return;
        }

        let full = {
            let mut windows = self.inner.batches.lock();
            let window = windows.entry(group.clone()).or_insert_with(|| BatchWindow {
                id: self.inner.next_id(),
                pending: Vec::new(),
                scheduled_at: None,
                timer: None,
            });

            window.pending.push(PendingCall {
                params,
                callback: Box::new(callback),
            });

            if window.pending.len() >= batch.max_batch_size {
                windows.remove(&group)
            } else {
                if window.timer.is_none() {
                    window.scheduled_at = Some(Instant::now());
                    let this = self.clone();
                    let group = group.clone();
                    let id = window.id;
                    let delay = batch.batch_delay();
                    window.timer = Some(tokio::spawn(async move {
                        sleep(delay).await;
                        this.flush_window(&group, id).await;
                    }));
                }
                None
            }
        };

        if let Some(mut window) = full {
            if let Some(timer) = window.timer.take() {
                timer.abort();
            }
            let this = self.clone();
            tokio::spawn(async move {
                this.dispatch_batch(&group, window).await;
            });
        }
    }

    /// Future form of [`batch_request`](Self::batch_request)
    ///
    /// The call joins its window immediately, before the future is polled.
    pub fn batch(
        &self,
        endpoint: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value, RequestError>> {
        let (tx, rx) = oneshot::channel();
        self.batch_request(endpoint, params, move |result| {
            let _ = tx.send(result);
        });
        async move { rx.await.unwrap_or(Err(RequestError::Cancelled)) }
    }

    async fn flush_window(&self, group: &str, id: u64) {
        let window = {
            let mut windows = self.inner.batches.lock();
            match windows.get(group) {
                Some(window) if window.id == id => windows.remove(group),
                _ => None,
            }
        };

        if let Some(window) = window {
            self.dispatch_batch(group, window).await;
        }
    }

    async fn dispatch_batch(&self, group: &str, window: BatchWindow) {
        if window.pending.is_empty() {
            return;
        }
        if let Some(scheduled_at) = window.scheduled_at {
            debug!("Batch window {} for {} open {:?}", window.id, group, scheduled_at.elapsed());
        }

        let (params, callbacks): (Vec<Value>, Vec<BatchCallback>) = window
            .pending
            .into_iter()
            .map(|call| (call.params, call.callback))
            .unzip();
        let count = callbacks.len();
        let url = batch_url(group, &params);

        info!("Dispatching batch of {} requests for {}", count, group);

        match self.cached_request(&url, RequestOptions::default(), None).await {
            Ok(response) => {
                self.inner.metrics.record_batched(count as u64);
                for (index, callback) in callbacks.into_iter().enumerate() {
                    callback(Ok(batch_share(&response, index)));
                }
            }
            Err(e) => {
                warn!("Batch for {} failed: {}", group, e);
                for callback in callbacks {
                    callback(Err(RequestError::Batch(Box::new(e.clone()))));
                }
            }
        }
    }

    /// FIFO queue running at most `limit` tasks at once
    pub fn create_request_queue(&self, limit: usize) -> RequestQueue {
        RequestQueue::new(limit)
    }

    /// Queue with the configured concurrency limit
    pub fn default_request_queue(&self) -> RequestQueue {
        RequestQueue::new(self.inner.config.concurrency_limit)
    }

    /// Get request metrics
    pub fn stats(&self) -> OptimizerStats {
        self.inner.metrics.snapshot()
    }

    /// Write the current metrics to the log
    pub fn log_metrics(&self) {
        self.stats().log();
    }

    /// Log metrics every `interval` until the returned task is aborted
    pub fn spawn_metrics_reporter(&self, interval: Duration) -> JoinHandle<()> {
        let this = self.clone();
        let interval = interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                this.log_metrics();
            }
        })
    }

    /// Cancel every pending debounce, throttle and batch timer
    ///
    /// Calls waiting in a batch window receive [`RequestError::Cancelled`].
    pub fn cleanup(&self) {
        for (_, slot) in self.inner.timers.lock().drain() {
            slot.handle.abort();
        }

        for (_, state) in self.inner.throttles.lock().drain() {
            if let Some(timer) = state.timer {
                timer.abort();
            }
        }

        let windows: Vec<BatchWindow> = self
            .inner
            .batches
            .lock()
            .drain()
            .map(|(_, window)| window)
            .collect();
        for window in windows {
            if let Some(timer) = window.timer {
                timer.abort();
            }
            for call in window.pending {
                (call.callback)(Err(RequestError::Cancelled));
            }
        }

        info!("Request optimizer cleaned up");
    }
}

/// Cache key for a request
///
/// Readable method and path, then a SHA-256 digest of the method, path,
/// sorted query and full body, so requests differing anywhere get
/// distinct keys.
pub fn cache_key(url: &str, options: &RequestOptions) -> String {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));

    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    pairs.sort();
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();

    let mut hasher = Sha256::new();
    for part in [options.method.as_str(), path, query.as_str()] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    if let Some(body) = &options.body {
        hasher.update(body.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());

    api_key(&format!("{}_{}_{}", options.method, path, digest))
}

/// Batch group of an endpoint: its first non-empty path segment
pub fn batch_group(endpoint: &str) -> String {
    let path = endpoint.split(['?', '#']).next().unwrap_or(endpoint);
    path.split('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn batch_url(group: &str, params: &[Value]) -> String {
    let json = Value::Array(params.to_vec()).to_string();
    let encoded: String = form_urlencoded::byte_serialize(json.as_bytes()).collect();
    format!("/api/batch/{}?batch={}", group, encoded)
}

/// Element `index` of an array response; anything else goes out whole
fn batch_share(response: &Value, index: usize) -> Value {
    match response.get(index) {
        Some(item) if !item.is_null() => item.clone(),
        _ => response.clone(),
    }
}

/// Append object params to `endpoint` as query pairs; other values go in `params`
fn with_params(endpoint: &str, params: &Value) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    match params {
        Value::Null => return endpoint.to_string(),
        Value::Object(map) => {
            for (name, value) in map {
                match value {
                    Value::String(s) => query.append_pair(name, s),
                    other => query.append_pair(name, &other.to_string()),
                };
            }
        }
        other => {
            query.append_pair("params", &other.to_string());
        }
    }

    let query = query.finish();
    if query.is_empty() {
        endpoint.to_string()
    } else if endpoint.contains('?') {
        format!("{}&{}", endpoint, query)
    } else {
        format!("{}?{}", endpoint, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use crate::transport::ApiResponse;
    use pawcache::{CacheConfig, ManualClock, MemoryStorage};
    use serde_json::json;

    const START: u64 = 1_700_000_000_000;

    fn optimizer_with(
        config: OptimizerConfig,
        transport: Arc<MockTransport>,
    ) -> (RequestOptimizer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let cache = Arc::new(
            CacheStore::with_clock(Arc::new(MemoryStorage::new()), CacheConfig::default(), clock.clone())
                .unwrap(),
        );
        let optimizer = RequestOptimizer::new(config, cache, transport).unwrap();
        (optimizer, clock)
    }

    fn optimizer(transport: Arc<MockTransport>) -> (RequestOptimizer, Arc<ManualClock>) {
        optimizer_with(OptimizerConfig::default(), transport)
    }

    fn ok(body: Value) -> Result<ApiResponse, RequestError> {
        Ok(ApiResponse { status: 200, body })
    }

    fn status(code: u16) -> Result<ApiResponse, RequestError> {
        Ok(ApiResponse {
            status: code,
            body: Value::Null,
        })
    }

    #[test]
    fn test_cache_key_ignores_query_order() {
        let a = cache_key("/api/products?page=2&sort=price", &RequestOptions::get());
        let b = cache_key("/api/products?sort=price&page=2", &RequestOptions::get());
        assert_eq!(a, b);
        assert!(a.starts_with("get__api_products_"));
        assert_eq!(a.len(), "get__api_products_".len() + 64);
    }

    #[test]
    fn test_cache_key_keeps_query_distinct() {
        let get = RequestOptions::get();

        assert_ne!(
            cache_key("/api/products?x=1&y=2", &get),
            cache_key("/api/products?x=1_y_2", &get)
        );
        assert_ne!(
            cache_key("/api/search?q=Bone", &get),
            cache_key("/api/search?q=bone", &get)
        );
    }

    #[test]
    fn test_cache_key_covers_whole_body() {
        let order = |id: u32| {
            RequestOptions::post_json(&json!({
                "customerEmail": "someone@example.com",
                "shippingAddress": "221B Baker Street, London",
                "productId": id,
            }))
        };

        assert_ne!(cache_key("/api/orders", &order(1)), cache_key("/api/orders", &order(2)));
    }

    #[test]
    fn test_cache_key_distinguishes_method_and_body() {
        let get = cache_key("/api/cart", &RequestOptions::get());
        let post_a = cache_key("/api/cart", &RequestOptions::post_json(&json!({"id": 1})));
        let post_b = cache_key("/api/cart", &RequestOptions::post_json(&json!({"id": 2})));

        assert_ne!(get, post_a);
        assert_ne!(post_a, post_b);
    }

    #[test]
    fn test_batch_group() {
        assert_eq!(batch_group("products"), "products");
        assert_eq!(batch_group("products/42"), "products");
        assert_eq!(batch_group("/orders?page=1"), "orders");
        assert_eq!(batch_group(""), "");
    }

    #[test]
    fn test_batch_url_encoding() {
        let url = batch_url("products", &[json!({"id": 1}), json!({"id": 2})]);
        let query = url.split_once("?batch=").unwrap().1;
        let decoded: String = form_urlencoded::parse(format!("batch={}", query).as_bytes())
            .next()
            .unwrap()
            .1
            .into_owned();

        assert!(url.starts_with("/api/batch/products?batch="));
        assert_eq!(decoded, r#"[{"id":1},{"id":2}]"#);
    }

    #[test]
    fn test_batch_share() {
        let response = json!([{"id": 1}, null]);
        assert_eq!(batch_share(&response, 0), json!({"id": 1}));
        assert_eq!(batch_share(&response, 1), response);
        assert_eq!(batch_share(&response, 5), response);
        assert_eq!(batch_share(&json!({"all": true}), 0), json!({"all": true}));
    }

    #[test]
    fn test_with_params() {
        assert_eq!(with_params("reviews", &json!({"id": 5, "q": "a b"})), "reviews?id=5&q=a+b");
        assert_eq!(with_params("reviews?x=1", &json!({"id": 5})), "reviews?x=1&id=5");
        assert_eq!(with_params("reviews", &Value::Null), "reviews");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_request_round_trip() {
        let transport = Arc::new(MockTransport::new(|_, _| ok(json!([{"id": 1}]))));
        let (optimizer, _) = optimizer(transport.clone());

        let first = optimizer
            .cached_request("/api/products", RequestOptions::get(), None)
            .await
            .unwrap();
        let second = optimizer
            .cached_request("/api/products", RequestOptions::get(), None)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.call_count(), 1);

        let stats = optimizer.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.hit_rate_percent, 50.0);
        assert_eq!(stats.bytes_transferred, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_request_uses_category_ttl() {
        let transport = Arc::new(MockTransport::new(|_, _| ok(json!({"q": "collar"}))));
        let (optimizer, clock) = optimizer(transport.clone());

        optimizer
            .cached_request("/api/search?q=collar", RequestOptions::get(), None)
            .await
            .unwrap();

        clock.advance(Duration::from_secs(9 * 60));
        optimizer
            .cached_request("/api/search?q=collar", RequestOptions::get(), None)
            .await
            .unwrap();
        assert_eq!(transport.call_count(), 1);

        clock.advance(Duration::from_secs(60));
        optimizer
            .cached_request("/api/search?q=collar", RequestOptions::get(), None)
            .await
            .unwrap();
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_bypass_cache() {
        let transport = Arc::new(MockTransport::new(|_, n| ok(json!({ "call": n }))));
        let (optimizer, _) = optimizer(transport.clone());
        let order = |id: u32| {
            RequestOptions::post_json(&json!({
                "customerEmail": "someone@example.com",
                "productId": id,
            }))
        };

        let first = optimizer.cached_request("/api/orders", order(1), None).await.unwrap();
        let second = optimizer.cached_request("/api/orders", order(1), None).await.unwrap();
        let third = optimizer.cached_request("/api/orders", order(2), None).await.unwrap();

        assert_eq!(first, json!({"call": 0}));
        assert_eq!(second, json!({"call": 1}));
        assert_eq!(third, json!({"call": 2}));
        assert_eq!(transport.call_count(), 3);
        assert_eq!(optimizer.stats().cache_hits, 0);
        assert_eq!(optimizer.cache().stats().total_keys, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_override() {
        let transport = Arc::new(MockTransport::new(|_, _| ok(json!(1))));
        let (optimizer, clock) = optimizer(transport.clone());
        let ttl = Some(Duration::from_secs(5));

        optimizer.cached_request("/api/products", RequestOptions::get(), ttl).await.unwrap();
        clock.advance(Duration::from_secs(5));
        optimizer.cached_request("/api/products", RequestOptions::get(), ttl).await.unwrap();

        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_not_cached() {
        let transport = Arc::new(MockTransport::new(|_, n| {
            if n == 0 {
                status(404)
            } else {
                ok(json!("found"))
            }
        }));
        let (optimizer, _) = optimizer(transport.clone());

        let err = optimizer
            .cached_request("/api/products/9", RequestOptions::get(), None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.kind().as_str(), "HTTP");

        let value = optimizer
            .cached_request("/api/products/9", RequestOptions::get(), None)
            .await
            .unwrap();
        assert_eq!(value, json!("found"));
        assert_eq!(optimizer.stats().failed_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_sequence() {
        let transport = Arc::new(MockTransport::new(|_, _| status(500)));
        let (optimizer, _) = optimizer(transport.clone());

        let err = optimizer
            .request_with_retry("/api/orders", RequestOptions::get(), Some(3))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(500));
        assert_eq!(
            transport.call_offsets(),
            vec![
                Duration::ZERO,
                Duration::from_millis(1000),
                Duration::from_millis(3000),
                Duration::from_millis(7000),
            ]
        );
        let stats = optimizer.stats();
        assert_eq!(stats.retried_requests, 3);
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.failed_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_fast() {
        let transport = Arc::new(MockTransport::new(|_, _| status(400)));
        let (optimizer, _) = optimizer(transport.clone());

        let err = optimizer
            .request_with_retry("/api/orders", RequestOptions::get(), None)
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(400));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_network_error() {
        let transport = Arc::new(MockTransport::new(|_, n| {
            if n < 2 {
                Err(RequestError::Network("connection reset".into()))
            } else {
                ok(json!({"ok": true}))
            }
        }));
        let (optimizer, _) = optimizer(transport.clone());

        let value = optimizer
            .request_with_retry("/api/orders", RequestOptions::get(), None)
            .await
            .unwrap();

        assert_eq!(value, json!({"ok": true}));
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries() {
        let transport = Arc::new(MockTransport::new(|_, _| status(503)));
        let (optimizer, _) = optimizer(transport.clone());

        assert!(optimizer
            .request_with_retry("/api/orders", RequestOptions::get(), Some(0))
            .await
            .is_err());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_burst() {
        let transport = Arc::new(MockTransport::new(|_, _| ok(Value::Null)));
        let (optimizer, _) = optimizer(transport);
        let start = Instant::now();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let recorded = calls.clone();
        let search = optimizer.debounce(
            move |query: &'static str| recorded.lock().push((start.elapsed(), query)),
            Duration::from_millis(200),
            "search",
        );

        search.call("c");
        sleep(Duration::from_millis(50)).await;
        search.call("co");
        sleep(Duration::from_millis(50)).await;
        search.call("col");

        sleep(Duration::from_millis(199)).await;
        assert!(calls.lock().is_empty());

        sleep(Duration::from_millis(100)).await;
        assert_eq!(*calls.lock(), vec![(Duration::from_millis(300), "col")]);
        assert_eq!(optimizer.stats().debounced_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_keys_are_independent() {
        let transport = Arc::new(MockTransport::new(|_, _| ok(Value::Null)));
        let (optimizer, _) = optimizer(transport);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let recorded = calls.clone();
        let search = optimizer.debounce(move |v: u32| recorded.lock().push(v), Duration::from_millis(100), "a");
        let recorded = calls.clone();
        let filter = optimizer.debounce(move |v: u32| recorded.lock().push(v), Duration::from_millis(100), "b");

        search.call(1);
        filter.call(2);
        sleep(Duration::from_millis(150)).await;

        let mut seen = calls.lock().clone();
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_leading_and_trailing() {
        let transport = Arc::new(MockTransport::new(|_, _| ok(Value::Null)));
        let (optimizer, _) = optimizer(transport);
        let start = Instant::now();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let recorded = calls.clone();
        let scroll = optimizer.throttle(
            move |y: u32| recorded.lock().push((start.elapsed(), y)),
            Duration::from_millis(100),
            "scroll",
        );

        scroll.call(0);
        sleep(Duration::from_millis(50)).await;
        scroll.call(50);
        sleep(Duration::from_millis(100)).await;
        scroll.call(150);
        sleep(Duration::from_millis(200)).await;

        assert_eq!(
            *calls.lock(),
            vec![
                (Duration::ZERO, 0),
                (Duration::from_millis(100), 50),
                (Duration::from_millis(200), 150),
            ]
        );
        assert_eq!(optimizer.stats().throttled_calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_trailing_uses_latest_args() {
        let transport = Arc::new(MockTransport::new(|_, _| ok(Value::Null)));
        let (optimizer, _) = optimizer(transport);
        let calls = Arc::new(Mutex::new(Vec::new()));

        let recorded = calls.clone();
        let resize = optimizer.throttle(move |w: u32| recorded.lock().push(w), Duration::from_millis(250), "resize");

        resize.call(800);
        resize.call(900);
        resize.call(1000);
        sleep(Duration::from_millis(300)).await;

        assert_eq!(*calls.lock(), vec![800, 1000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_cancels_timers() {
        let transport = Arc::new(MockTransport::new(|_, _| ok(json!([]))));
        let (optimizer, _) = optimizer(transport.clone());
        let calls = Arc::new(Mutex::new(0));

        let recorded = calls.clone();
        let search = optimizer.debounced_search(move |_: ()| *recorded.lock() += 1);
        search.call(());
        let pending = optimizer.batch("products", json!({"id": 1}));

        optimizer.cleanup();
        sleep(Duration::from_secs(1)).await;

        assert_eq!(*calls.lock(), 0);
        assert_eq!(pending.await, Err(RequestError::Cancelled));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_grouping() {
        let transport = Arc::new(MockTransport::new(|url, _| {
            if url.starts_with("/api/batch/products") {
                ok(json!([{"id": 1, "name": "Collar"}, {"id": 2, "name": "Bowl"}]))
            } else {
                ok(json!({"id": 3, "status": "shipped"}))
            }
        }));
        let (optimizer, _) = optimizer(transport.clone());

        let first = optimizer.batch("products", json!({"id": 1}));
        let second = optimizer.batch("products", json!({"id": 2}));
        let third = optimizer.batch("orders", json!({"id": 3}));

        let (first, second, third) = tokio::join!(first, second, third);

        assert_eq!(first.unwrap()["name"], "Collar");
        assert_eq!(second.unwrap()["name"], "Bowl");
        assert_eq!(third.unwrap()["status"], "shipped");

        let mut urls = transport.urls();
        urls.sort();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].starts_with("/api/batch/orders?batch="));
        assert!(urls[1].starts_with("/api/batch/products?batch="));
        assert_eq!(transport.call_offsets(), vec![Duration::from_millis(100); 2]);
        assert_eq!(optimizer.stats().batched_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_window_dispatches_immediately() {
        let transport = Arc::new(MockTransport::new(|_, _| ok(json!(["a", "b"]))));
        let mut config = OptimizerConfig::default();
        config.batch.max_batch_size = 2;
        let (optimizer, _) = optimizer_with(config, transport.clone());

        let (a, b) = tokio::join!(
            optimizer.batch("users", json!({"id": "a"})),
            optimizer.batch("users", json!({"id": "b"}))
        );

        assert_eq!(a.unwrap(), json!("a"));
        assert_eq!(b.unwrap(), json!("b"));
        assert_eq!(transport.call_offsets(), vec![Duration::ZERO]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_failure_reaches_every_call() {
        let transport = Arc::new(MockTransport::new(|_, _| status(502)));
        let (optimizer, _) = optimizer(transport.clone());

        let (a, b) = tokio::join!(
            optimizer.batch("orders", json!({"id": 1})),
            optimizer.batch("orders", json!({"id": 2}))
        );

        for result in [a, b] {
            let err = result.unwrap_err();
            assert_eq!(err.kind().as_str(), "BATCH");
            assert_eq!(err.status(), Some(502));
        }
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbatched_group_requests_directly() {
        let transport = Arc::new(MockTransport::new(|_, _| ok(json!({"stars": 5}))));
        let (optimizer, _) = optimizer(transport.clone());

        let review = optimizer.batch("reviews", json!({"id": 5})).await.unwrap();

        assert_eq!(review, json!({"stars": 5}));
        assert_eq!(transport.urls(), vec!["reviews?id=5".to_string()]);
        assert_eq!(transport.call_offsets(), vec![Duration::ZERO]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batching_disabled() {
        let transport = Arc::new(MockTransport::new(|_, _| ok(json!(1))));
        let mut config = OptimizerConfig::default();
        config.batch.enabled = false;
        let (optimizer, _) = optimizer_with(config, transport.clone());

        let (a, b) = tokio::join!(
            optimizer.batch("products", json!({"id": 1})),
            optimizer.batch("products", json!({"id": 2}))
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(transport.call_count(), 2);
        assert_eq!(optimizer.stats().batched_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_window_after_dispatch() {
        let transport = Arc::new(MockTransport::new(|_, _| ok(json!([]))));
        let (optimizer, _) = optimizer(transport.clone());

        optimizer.batch("products", json!({"id": 1})).await.unwrap();
        optimizer.batch("products", json!({"id": 2})).await.unwrap();

        assert_eq!(transport.call_count(), 2);
        assert_eq!(
            transport.call_offsets(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_runs_optimized_requests() {
        let transport = Arc::new(MockTransport::new(|url, _| ok(json!(url))));
        let (optimizer, _) = optimizer(transport.clone());
        let queue = optimizer.default_request_queue();
        assert_eq!(queue.limit(), 5);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let optimizer = optimizer.clone();
                queue.add(async move {
                    optimizer
                        .cached_request(&format!("/api/products/{}", i), RequestOptions::get(), None)
                        .await
                })
            })
            .collect();

        for (i, task) in futures::future::join_all(tasks).await.into_iter().enumerate() {
            assert_eq!(task.unwrap().unwrap(), json!(format!("/api/products/{}", i)));
        }
        assert_eq!(transport.call_count(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_reporter_can_be_stopped() {
        let transport = Arc::new(MockTransport::new(|_, _| ok(Value::Null)));
        let (optimizer, _) = optimizer(transport);

        let reporter = optimizer.spawn_metrics_reporter(Duration::from_secs(60));
        sleep(Duration::from_secs(130)).await;
        reporter.abort();

        assert!(reporter.await.unwrap_err().is_cancelled());
    }
}
