//! One screen's lifetime: owns the entity cache and every resolver and push
//! channel opened for the screen. Teardown cancels all of them.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backend::Backend;
use crate::cache::EntityCache;
use crate::config::Config;
use crate::error::{with_timeout, BackendError};
use crate::lookup::LookupResolver;
use crate::models::Entity;
use crate::rows::RowCollection;
use crate::settlement::SettlementEngine;
use crate::sync::{ChannelState, PushConnector, SyncChannel, SyncHandle, TopicSink};

pub struct Session {
    backend: Arc<dyn Backend>,
    connector: Arc<dyn PushConnector>,
    config: Config,
    cache: EntityCache,
    root: CancellationToken,
    channels: Mutex<Vec<SyncHandle>>,
}

impl Session {
    pub fn new(backend: Arc<dyn Backend>, connector: Arc<dyn PushConnector>, config: Config) -> Self {
        let cache = EntityCache::with_key_field(&config.entity_key_field);
        Self {
            backend,
            connector,
            config,
            cache,
            root: CancellationToken::new(),
            channels: Mutex::new(Vec::new()),
        }
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    /// Empty row collection keyed the same way as the cache.
    pub fn rows(&self) -> RowCollection {
        RowCollection::with_key_field(&self.config.entity_key_field)
    }

    /// A resolver for one picker; cancelled with the session.
    pub fn lookup(&self) -> LookupResolver {
        LookupResolver::new(
            self.backend.clone(),
            self.cache.clone(),
            self.config.lookup.clone(),
            self.root.child_token(),
        )
    }

    pub fn settlement(&self) -> SettlementEngine {
        SettlementEngine::new(
            self.backend.clone(),
            self.cache.clone(),
            self.config.request_timeout,
        )
    }

    /// Start a push channel feeding `rows` (and the cache when
    /// `mirror_to_cache`) for `topic`.
    pub fn open_channel(
        &self,
        topic: &str,
        rows: RowCollection,
        mirror_to_cache: bool,
    ) -> watch::Receiver<ChannelState> {
        let sink = TopicSink::new(topic, rows, mirror_to_cache.then(|| self.cache.clone()));
        let handle = SyncChannel::new(
            sink,
            self.connector.clone(),
            self.config.backoff.clone(),
            self.root.child_token(),
        )
        .spawn();
        let state = handle.subscribe();
        self.channels.lock().push(handle);
        state
    }

    /// Full-list refresh of a subject's kasbon rows; the authoritative view
    /// after any gap in push delivery.
    pub async fn refresh_loans(
        &self,
        subject_key: &str,
        rows: &RowCollection,
    ) -> Result<usize, BackendError> {
        let loans = with_timeout(
            self.config.request_timeout,
            self.backend.disbursed_loans(subject_key),
        )
        .await?;
        let key_field = self.cache.key_field();
        let entities: Vec<Entity> = loans
            .iter()
            .filter_map(|loan| Entity::from_keyed_record(loan, key_field, &loan.id))
            .collect();
        let count = entities.len();
        self.cache.upsert_all(entities.iter().cloned());
        rows.replace_all(entities);
        Ok(count)
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancel every lookup and close every channel, then wait for the channel
    /// tasks to finish.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let channels: Vec<SyncHandle> = self.channels.lock().drain(..).collect();
        let count = channels.len();
        for handle in channels {
            handle.shutdown().await;
        }
        info!(channels = count, "Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
