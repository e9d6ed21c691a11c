//! Webhook subscription cache.
//!
//! Lazily populated from the subscription store on first lookup per event
//! kind. Entries never expire on their own; callers invalidate or refresh
//! explicitly when the subscription table changes.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{AppError, SubscriptionStore, WebhookEventKind, WebhookSubscription};

/// Thread-safe event-kind to active-subscription cache
pub struct SubscriptionCache {
    store: Arc<dyn SubscriptionStore>,
    entries: DashMap<WebhookEventKind, Vec<WebhookSubscription>>,
}

impl SubscriptionCache {
    #[must_use]
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
        }
    }

    /// Active subscriptions for an event kind, loading on first miss.
    /// An empty list is cached too, so a kind with no subscribers does
    /// not reload the table on every event.
    pub async fn get(&self, kind: WebhookEventKind) -> Result<Vec<WebhookSubscription>, AppError> {
        if let Some(entry) = self.entries.get(&kind) {
            return Ok(entry.value().clone());
        }
        self.load(kind).await
    }

    /// Drop the cached entry for an event kind.
    pub fn invalidate(&self, kind: WebhookEventKind) {
        self.entries.remove(&kind);
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Reload an event kind from the store, bypassing the cache.
    pub async fn refresh(
        &self,
        kind: WebhookEventKind,
    ) -> Result<Vec<WebhookSubscription>, AppError> {
        self.load(kind).await
    }

    async fn load(&self, kind: WebhookEventKind) -> Result<Vec<WebhookSubscription>, AppError> {
        let subscriptions = self.store.all_subscriptions().await?;
        let matching: Vec<WebhookSubscription> = subscriptions
            .into_iter()
            .filter(|s| s.active && s.event_kind == kind)
            .collect();

        debug!(kind = %kind, count = matching.len(), "Loaded webhook subscriptions");
        self.entries.insert(kind, matching.clone());
        Ok(matching)
    }
}
