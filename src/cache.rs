// src/cache.rs

use crate::client::JwksFetcher;
use crate::config::CachePolicy;
use crate::error::{FetchError, KeyLookupError};
use crate::model::SigningKey;
use arc_swap::ArcSwapOption;
use futures::future::{BoxFuture, FutureExt, Shared};
use moka::future::Cache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Provider `max-age` values below this are raised to it.
const MIN_FRESHNESS: Duration = Duration::from_secs(30);

/// An immutable snapshot of the keys fetched from a JWKS endpoint.
///
/// The cache replaces the whole snapshot on every successful refresh;
/// a snapshot is never modified after it is published.
#[derive(Debug)]
pub struct KeySet {
    keys: HashMap<String, Arc<SigningKey>>,
    fetched_at: Instant,
    fresh_for: Duration,
    max_age: Duration,
    generation: u64,
}

impl KeySet {
    fn new(keys: Vec<SigningKey>, fresh_for: Duration, max_age: Duration, generation: u64) -> Self {
        let keys = keys
            .into_iter()
            .map(|key| (key.kid.clone(), Arc::new(key)))
            .collect();
        Self {
            keys,
            fetched_at: Instant::now(),
            fresh_for,
            max_age,
            generation,
        }
    }

    pub fn get(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.keys.get(kid).cloned()
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Increases by one with every successful refresh of the owning cache.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the snapshot may be served without attempting a refresh.
    pub fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.fresh_for
    }

    /// Whether the snapshot may still be served while refreshes fail.
    fn is_usable(&self) -> bool {
        self.fetched_at.elapsed() <= self.max_age
    }
}

/// What every caller waiting on one refresh observes.
#[derive(Clone)]
enum RefreshOutcome {
    /// A fresh key set is in place.
    Refreshed(Arc<KeySet>),
    /// The fetch failed; the previous key set is still within its max age.
    Stale {
        keys: Arc<KeySet>,
        error: Arc<FetchError>,
    },
    /// The fetch failed and no usable key set exists.
    Failed(Arc<FetchError>),
}

type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct FailedRefresh {
    at: Instant,
    error: Arc<FetchError>,
}

/// A cache of verification keys for a single JWKS endpoint.
///
/// Lookups against a fresh key set never block. A miss or an expired set
/// triggers a refresh; at most one refresh runs at a time and concurrent
/// callers await the same result. A miss against a set younger than the
/// policy's `min_refresh_interval` is answered without refreshing. The
/// refresh runs on its own task, so a caller that gives up does not cancel
/// it for the others.
#[derive(Clone)]
pub struct KeyCache {
    // The cache is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    jwks_uri: Url,
    fetcher: Arc<dyn JwksFetcher>,
    policy: CachePolicy,
    current: ArcSwapOption<KeySet>,
    in_flight: Mutex<Option<PendingRefresh>>,
    last_failure: Mutex<Option<FailedRefresh>>,
    generation: AtomicU64,
    // kids a successful refresh confirmed absent
    unknown_kids: Cache<String, ()>,
}

impl KeyCache {
    /// Creates an empty cache. Nothing is fetched until the first lookup.
    pub fn new(jwks_uri: Url, fetcher: Arc<dyn JwksFetcher>, policy: CachePolicy) -> Self {
        let unknown_kids = Cache::builder()
            .max_capacity(1024)
            .time_to_live(policy.unknown_kid_ttl)
            .build();
        Self {
            inner: Arc::new(Inner {
                jwks_uri,
                fetcher,
                policy,
                current: ArcSwapOption::const_empty(),
                in_flight: Mutex::new(None),
                last_failure: Mutex::new(None),
                generation: AtomicU64::new(0),
                unknown_kids,
            }),
        }
    }

    pub fn jwks_uri(&self) -> &Url {
        &self.inner.jwks_uri
    }

    /// Returns the key set currently held, fresh or not.
    pub fn snapshot(&self) -> Option<Arc<KeySet>> {
        self.inner.current.load_full()
    }

    /// Retrieves the verification key for the given Key ID (`kid`).
    ///
    /// A fresh cached key is returned without I/O. Otherwise the key set is
    /// refreshed (or an in-flight refresh is joined) and looked up again.
    #[instrument(skip(self), err)]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<SigningKey>, KeyLookupError> {
        let seen = self.inner.current.load_full();
        if let Some(keys) = seen.as_deref().filter(|keys| keys.is_fresh()) {
            if let Some(key) = keys.get(kid) {
                debug!("JWK cache hit for kid: {}", kid);
                return Ok(key);
            }
            if self.inner.unknown_kids.contains_key(kid) {
                debug!("kid {} was recently confirmed absent", kid);
                return Err(KeyLookupError::UnknownKey(kid.to_string()));
            }
            if keys.fetched_at.elapsed() < self.inner.policy.min_refresh_interval {
                debug!("kid {} not in a key set fetched {:?} ago", kid, keys.fetched_at.elapsed());
                return Err(KeyLookupError::UnknownKey(kid.to_string()));
            }
        }

        debug!("JWK cache miss for kid: {}. Refreshing key set.", kid);
        let seen_generation = seen.as_ref().map(|keys| keys.generation);
        match self.inner.refresh(seen_generation, false).await {
            RefreshOutcome::Refreshed(keys) => match keys.get(kid) {
                Some(key) => Ok(key),
                None => {
                    if !self.inner.policy.unknown_kid_ttl.is_zero() {
                        self.inner.unknown_kids.insert(kid.to_string(), ()).await;
                    }
                    Err(KeyLookupError::UnknownKey(kid.to_string()))
                }
            },
            RefreshOutcome::Stale { keys, error } => keys.get(kid).ok_or(KeyLookupError::Unavailable(error)),
            RefreshOutcome::Failed(error) => Err(KeyLookupError::Unavailable(error)),
        }
    }

    /// Fetches the key set now, or joins the refresh already in flight.
    ///
    /// Useful to warm the cache at startup. On failure the previous key set,
    /// if any, stays in place.
    pub async fn refresh(&self) -> Result<Arc<KeySet>, Arc<FetchError>> {
        match self.inner.refresh(None, true).await {
            RefreshOutcome::Refreshed(keys) => Ok(keys),
            RefreshOutcome::Stale { error, .. } | RefreshOutcome::Failed(error) => Err(error),
        }
    }
}

impl Inner {
    /// Starts or joins a refresh.
    ///
    /// `seen` is the generation the caller observed before deciding to refresh;
    /// if a newer fresh set has been published since, it is returned directly.
    async fn refresh(self: &Arc<Self>, seen: Option<u64>, force: bool) -> RefreshOutcome {
        let pending = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.as_ref() {
                Some(pending) => {
                    debug!("Joining in-flight JWKS refresh");
                    pending.clone()
                }
                None => {
                    if !force {
                        if let Some(keys) = self.current.load_full() {
                            if Some(keys.generation) != seen && keys.is_fresh() {
                                return RefreshOutcome::Refreshed(keys);
                            }
                        }
                        if let Some(error) = self.recent_failure() {
                            debug!("JWKS refresh cooling down after failure");
                            return self.degraded(error);
                        }
                    }
                    let pending = self.spawn_refresh();
                    *in_flight = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    fn spawn_refresh(self: &Arc<Self>) -> PendingRefresh {
        let task = tokio::spawn(Arc::clone(self).run_refresh());
        async move {
            task.await
                .unwrap_or_else(|e| RefreshOutcome::Failed(Arc::new(FetchError::Aborted(e.to_string()))))
        }
        .boxed()
        .shared()
    }

    async fn run_refresh(self: Arc<Self>) -> RefreshOutcome {
        let _clear = ClearInFlight(&self.in_flight);

        let timeout = self.policy.fetch_timeout;
        let fetched = match tokio::time::timeout(timeout, self.fetcher.fetch(&self.jwks_uri)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        };

        match fetched {
            Ok(document) => {
                let fresh_for = document
                    .max_age
                    .map_or(self.policy.ttl, |max_age| max_age.max(MIN_FRESHNESS).min(self.policy.max_stale));
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                let keys = Arc::new(KeySet::new(document.keys, fresh_for, self.policy.max_stale, generation));

                info!(
                    "Fetched {} keys from {}. Fresh for {:?}",
                    keys.len(),
                    self.jwks_uri,
                    fresh_for
                );
                self.current.store(Some(Arc::clone(&keys)));
                *self.last_failure.lock() = None;
                RefreshOutcome::Refreshed(keys)
            }
            Err(error) => {
                warn!("Failed to refresh JWKS from {}: {}", self.jwks_uri, error);
                let error = Arc::new(error);
                *self.last_failure.lock() = Some(FailedRefresh {
                    at: Instant::now(),
                    error: Arc::clone(&error),
                });
                self.degraded(error)
            }
        }
    }

    fn recent_failure(&self) -> Option<Arc<FetchError>> {
        self.last_failure
            .lock()
            .as_ref()
            .filter(|failure| failure.at.elapsed() < self.policy.refresh_cooldown)
            .map(|failure| Arc::clone(&failure.error))
    }

    fn degraded(&self, error: Arc<FetchError>) -> RefreshOutcome {
        match self.current.load_full() {
            Some(keys) if keys.is_usable() => {
                warn!("Serving cached keys from {} after failed refresh", self.jwks_uri);
                RefreshOutcome::Stale { keys, error }
            }
            _ => RefreshOutcome::Failed(error),
        }
    }
}

/// Empties the in-flight slot when the refresh task ends, including on panic.
struct ClearInFlight<'a>(&'a Mutex<Option<PendingRefresh>>);

impl Drop for ClearInFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}
