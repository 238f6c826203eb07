//! Search-as-you-type resolver backing one entity picker.
//!
//! Every `search` call supersedes the previous one: the prior request is
//! cancelled through its token and a fresh generation number is issued. A
//! response only reaches picker state when its generation is still the
//! latest, so out-of-order completions are dropped silently.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::cache::EntityCache;
use crate::error::{with_timeout, BackendError};
use crate::models::Entity;

#[derive(Debug, Clone)]
pub struct LookupConfig {
    /// Quiet period after the last keystroke before a request is sent
    pub debounce: Duration,
    /// Maximum results requested per query
    pub limit: usize,
    pub request_timeout: Duration,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            limit: 20,
            request_timeout: Duration::from_millis(12_000),
        }
    }
}

/// What the picker currently shows.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupState {
    Idle,
    Pending { query: String },
    Ready { query: String, results: Vec<Entity> },
    Failed { query: String, message: String },
}

/// How one `search` call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Applied(Vec<Entity>),
    /// A newer search (or teardown) took over; nothing was applied.
    Superseded,
    Failed(BackendError),
}

#[derive(Default)]
struct Inflight {
    generation: u64,
    token: Option<CancellationToken>,
}

pub struct LookupResolver {
    backend: Arc<dyn Backend>,
    cache: EntityCache,
    config: LookupConfig,
    parent: CancellationToken,
    inflight: Mutex<Inflight>,
    bound: Mutex<Option<CancellationToken>>,
    state_tx: watch::Sender<LookupState>,
}

impl LookupResolver {
    pub fn new(
        backend: Arc<dyn Backend>,
        cache: EntityCache,
        config: LookupConfig,
        parent: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(LookupState::Idle);
        Self {
            backend,
            cache,
            config,
            parent,
            inflight: Mutex::new(Inflight::default()),
            bound: Mutex::new(None),
            state_tx,
        }
    }

    pub fn state(&self) -> LookupState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LookupState> {
        self.state_tx.subscribe()
    }

    /// Latest issued generation number.
    pub fn generation(&self) -> u64 {
        self.inflight.lock().generation
    }

    /// Issue a new generation, cancelling whatever was in flight.
    fn begin(&self) -> (u64, CancellationToken) {
        let token = self.parent.child_token();
        let mut inflight = self.inflight.lock();
        inflight.generation += 1;
        if let Some(prev) = inflight.token.replace(token.clone()) {
            prev.cancel();
        }
        (inflight.generation, token)
    }

    /// Publish `state` only if `generation` is still the latest. The check and
    /// the publish happen under the same lock.
    fn publish_if_current(
        &self,
        generation: u64,
        token: &CancellationToken,
        state: LookupState,
    ) -> bool {
        let inflight = self.inflight.lock();
        if inflight.generation != generation || token.is_cancelled() {
            return false;
        }
        self.state_tx.send_replace(state);
        true
    }

    pub async fn search(&self, query: &str) -> LookupOutcome {
        let (generation, token) = self.begin();
        let query = query.trim().to_string();

        if query.is_empty() {
            let state = LookupState::Ready {
                query,
                results: Vec::new(),
            };
            return if self.publish_if_current(generation, &token, state) {
                LookupOutcome::Applied(Vec::new())
            } else {
                LookupOutcome::Superseded
            };
        }

        tokio::select! {
            _ = token.cancelled() => return LookupOutcome::Superseded,
            _ = tokio::time::sleep(self.config.debounce) => {}
        }

        self.publish_if_current(
            generation,
            &token,
            LookupState::Pending {
                query: query.clone(),
            },
        );

        let res = tokio::select! {
            _ = token.cancelled() => return LookupOutcome::Superseded,
            res = with_timeout(
                self.config.request_timeout,
                self.backend.search_entities(&query, self.config.limit),
            ) => res,
        };

        match res {
            Ok(found) => {
                let results = rank_unique(found, self.cache.key_field());
                let state = LookupState::Ready {
                    query: query.clone(),
                    results: results.clone(),
                };
                // Gate first: a superseded response must not touch the cache either.
                let inflight = self.inflight.lock();
                if inflight.generation != generation || token.is_cancelled() {
                    debug!(query = %query, generation, "Discarding stale lookup response");
                    return LookupOutcome::Superseded;
                }
                self.cache.upsert_all(results.iter().cloned());
                self.state_tx.send_replace(state);
                drop(inflight);
                LookupOutcome::Applied(results)
            }
            Err(e) => {
                let state = LookupState::Failed {
                    query: query.clone(),
                    message: e.user_message(),
                };
                if self.publish_if_current(generation, &token, state) {
                    warn!(query = %query, error = %e, "Lookup failed");
                    LookupOutcome::Failed(e)
                } else {
                    LookupOutcome::Superseded
                }
            }
        }
    }

    /// Resolve a pre-selected key for display. Served from cache when
    /// possible; otherwise one point lookup, independent of `search`.
    pub async fn resolve_bound(&self, key: &str) -> Result<Entity, BackendError> {
        if let Some(hit) = self.cache.get(key) {
            return Ok(hit);
        }

        let token = self.parent.child_token();
        if let Some(prev) = self.bound.lock().replace(token.clone()) {
            prev.cancel();
        }

        let res = tokio::select! {
            _ = token.cancelled() => return Err(BackendError::Cancelled),
            res = with_timeout(self.config.request_timeout, self.backend.get_entity(key)) => res,
        };
        if token.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        match res {
            Ok(Some(mut entity)) => {
                if entity.key_of(self.cache.key_field()).is_none() {
                    entity.insert(self.cache.key_field(), key);
                }
                self.cache.upsert(entity);
                self.cache.get(key).ok_or(BackendError::NotFound)
            }
            Ok(None) => Err(BackendError::NotFound),
            Err(e) => {
                warn!(key, error = %e, "Bound value lookup failed");
                Err(e)
            }
        }
    }

    /// Drop any in-flight search and point lookup without touching state.
    pub fn cancel(&self) {
        if let Some(token) = self.inflight.lock().token.take() {
            token.cancel();
        }
        if let Some(token) = self.bound.lock().take() {
            token.cancel();
        }
    }
}

impl Drop for LookupResolver {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Keep backend order, drop keyless entries and later duplicates.
fn rank_unique(found: Vec<Entity>, key_field: &str) -> Vec<Entity> {
    let mut seen = HashSet::with_capacity(found.len());
    found
        .into_iter()
        .filter(|e| match e.key_of(key_field) {
            Some(key) => seen.insert(key),
            None => false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PaperBackend;

    fn resolver(backend: Arc<PaperBackend>, cache: EntityCache) -> Arc<LookupResolver> {
        Arc::new(LookupResolver::new(
            backend,
            cache,
            LookupConfig::default(),
            CancellationToken::new(),
        ))
    }

    #[test]
    fn test_rank_unique_keeps_first_occurrence() {
        let found = vec![
            Entity::new().with("id", "a").with("name", "first"),
            Entity::new().with("name", "no key"),
            Entity::new().with("id", "b"),
            Entity::new().with("id", "a").with("name", "dup"),
        ];
        let ranked = rank_unique(found, "id");
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].get_str("name"), Some("first"));
        assert_eq!(ranked[1].key().as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_applies_and_populates_cache() {
        let backend = Arc::new(PaperBackend::demo());
        let cache = EntityCache::new();
        let r = resolver(backend, cache.clone());

        let outcome = r.search("  siti ").await;
        let LookupOutcome::Applied(results) = outcome else {
            panic!("expected applied outcome");
        };
        assert_eq!(results.len(), 1);
        assert!(cache.contains("emp-002"));
        assert!(matches!(r.state(), LookupState::Ready { ref query, .. } if query == "siti"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_sends_only_last_query() {
        let backend = Arc::new(PaperBackend::demo());
        let r = resolver(backend.clone(), EntityCache::new());

        let first = tokio::spawn({
            let r = r.clone();
            async move { r.search("b").await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = tokio::spawn({
            let r = r.clone();
            async move { r.search("bu").await }
        });

        assert_eq!(first.await.unwrap(), LookupOutcome::Superseded);
        assert!(matches!(second.await.unwrap(), LookupOutcome::Applied(_)));
        assert_eq!(backend.search_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_earlier_response_never_replaces_newer() {
        let backend = Arc::new(PaperBackend::demo());
        backend.set_search_latency("a", Duration::from_secs(3));
        backend.set_search_latency("ag", Duration::from_millis(10));
        let r = resolver(backend.clone(), EntityCache::new());

        let slow = tokio::spawn({
            let r = r.clone();
            async move { r.search("a").await }
        });
        // Past the debounce: the slow request is on the wire
        tokio::time::sleep(Duration::from_millis(400)).await;
        let fast = r.search("ag").await;
        let LookupOutcome::Applied(fast_results) = fast else {
            panic!("newer search should apply");
        };

        assert_eq!(slow.await.unwrap(), LookupOutcome::Superseded);
        tokio::time::sleep(Duration::from_secs(5)).await;

        match r.state() {
            LookupState::Ready { query, results } => {
                assert_eq!(query, "ag");
                assert_eq!(results, fast_results);
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(backend.search_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_picker_local() {
        let backend = Arc::new(PaperBackend::demo());
        backend.set_search_offline(true);
        let cache = EntityCache::new();
        let r = resolver(backend, cache.clone());

        let outcome = r.search("budi").await;
        assert!(matches!(outcome, LookupOutcome::Failed(BackendError::Network(_))));
        assert!(matches!(r.state(), LookupState::Failed { .. }));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_surfaces_as_failure() {
        let backend = Arc::new(PaperBackend::demo());
        backend.set_search_latency("budi", Duration::from_secs(60));
        let r = resolver(backend, EntityCache::new());

        let outcome = r.search("budi").await;
        assert!(matches!(outcome, LookupOutcome::Failed(BackendError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_query_resets_without_request() {
        let backend = Arc::new(PaperBackend::demo());
        let r = resolver(backend.clone(), EntityCache::new());
        assert_eq!(r.search("   ").await, LookupOutcome::Applied(vec![]));
        assert_eq!(backend.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_bound_point_lookup() {
        let backend = Arc::new(PaperBackend::demo());
        let cache = EntityCache::new();
        let r = resolver(backend, cache.clone());

        let e = r.resolve_bound("emp-003").await.unwrap();
        assert_eq!(e.get_str("name"), Some("Agus Pratama"));
        assert!(cache.contains("emp-003"));

        assert_eq!(r.resolve_bound("emp-999").await, Err(BackendError::NotFound));
        assert!(!cache.contains("emp-999"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_supersedes() {
        let backend = Arc::new(PaperBackend::demo());
        let parent = CancellationToken::new();
        let r = Arc::new(LookupResolver::new(
            backend,
            EntityCache::new(),
            LookupConfig::default(),
            parent.clone(),
        ));
        let task = tokio::spawn({
            let r = r.clone();
            async move { r.search("budi").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        parent.cancel();
        assert_eq!(task.await.unwrap(), LookupOutcome::Superseded);
        assert_eq!(r.state(), LookupState::Idle);
    }
}
