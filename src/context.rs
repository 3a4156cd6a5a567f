//! Task context and session rules, supplied by the external session/task
//! store and cached in-process for a bounded time per session.

use anyhow::Result;
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;

use crate::cache::TtlCache;
use crate::detect::Rule;

/// Summary of one reference material attached to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceSummary {
    pub title: String,
    pub summary: String,
}

/// The user's declared goal plus reference-material summaries; read-only
/// from the core's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub task_name: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub reference_summaries: Vec<ReferenceSummary>,
}

/// Per-session rule lists resolved from storage.
#[derive(Debug, Clone, Default)]
pub struct SessionRules {
    pub always_allowed: Vec<Rule>,
    pub always_blocked: Vec<Rule>,
}

/// External session/task store. Assumed slow enough to be worth caching and
/// unreliable enough that errors degrade to "no context" rather than failing
/// a decision cycle.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn task_context(&self, session_id: &str) -> Result<Option<TaskContext>>;
    async fn always_allowed(&self, session_id: &str) -> Result<Vec<Rule>>;
    async fn always_blocked(&self, session_id: &str) -> Result<Vec<Rule>>;
}

/// Caches task context and rules per session with a bounded lifetime, so the
/// detector does not hit the store on every cycle.
pub struct ContextCache {
    store: Arc<dyn SessionStore>,
    contexts: Mutex<TtlCache<String, TaskContext>>,
    rules: Mutex<TtlCache<String, SessionRules>>,
}

impl ContextCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        Self {
            store,
            contexts: Mutex::new(TtlCache::new(ttl)),
            rules: Mutex::new(TtlCache::new(ttl)),
        }
    }

    /// Task context for the session, or `None` when the store has none (or
    /// failed). Only present contexts are cached so a session that gains
    /// context mid-run is picked up on the next cycle.
    pub async fn task_context(&self, session_id: &str) -> Option<TaskContext> {
        {
            let mut cache = self.contexts.lock().await;
            if let Some(context) = cache.get(&session_id.to_string()) {
                return Some(context.clone());
            }
        }

        match self.store.task_context(session_id).await {
            Ok(Some(context)) => {
                self.contexts
                    .lock()
                    .await
                    .insert(session_id.to_string(), context.clone());
                Some(context)
            }
            Ok(None) => None,
            Err(err) => {
                warn!("task context lookup failed for session {session_id}: {err:#}");
                None
            }
        }
    }

    /// Always-allowed/always-blocked rules for the session. Store failures
    /// degrade to empty lists.
    pub async fn session_rules(&self, session_id: &str) -> SessionRules {
        {
            let mut cache = self.rules.lock().await;
            if let Some(rules) = cache.get(&session_id.to_string()) {
                return rules.clone();
            }
        }

        let always_allowed = match self.store.always_allowed(session_id).await {
            Ok(rules) => rules,
            Err(err) => {
                warn!("always-allowed lookup failed for session {session_id}: {err:#}");
                Vec::new()
            }
        };
        let always_blocked = match self.store.always_blocked(session_id).await {
            Ok(rules) => rules,
            Err(err) => {
                warn!("always-blocked lookup failed for session {session_id}: {err:#}");
                Vec::new()
            }
        };

        let rules = SessionRules {
            always_allowed,
            always_blocked,
        };
        self.rules
            .lock()
            .await
            .insert(session_id.to_string(), rules.clone());
        rules
    }

    /// Drops cached data for a session, e.g. after its rules were edited.
    pub async fn invalidate(&self, session_id: &str) {
        self.contexts.lock().await.remove(&session_id.to_string());
        self.rules.lock().await.remove(&session_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingStore {
        context_calls: AtomicU32,
        context: Option<TaskContext>,
    }

    #[async_trait]
    impl SessionStore for CountingStore {
        async fn task_context(&self, _session_id: &str) -> Result<Option<TaskContext>> {
            self.context_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.context.clone())
        }

        async fn always_allowed(&self, _session_id: &str) -> Result<Vec<Rule>> {
            Ok(Vec::new())
        }

        async fn always_blocked(&self, _session_id: &str) -> Result<Vec<Rule>> {
            Ok(Vec::new())
        }
    }

    fn context() -> TaskContext {
        TaskContext {
            task_name: "thesis".into(),
            description: "write chapter 2".into(),
            keywords: vec!["research".into()],
            reference_summaries: Vec::new(),
        }
    }

    #[tokio::test]
    async fn present_contexts_are_cached() {
        let store = Arc::new(CountingStore {
            context_calls: AtomicU32::new(0),
            context: Some(context()),
        });
        let cache = ContextCache::new(store.clone(), Duration::from_secs(300));

        assert!(cache.task_context("s1").await.is_some());
        assert!(cache.task_context("s1").await.is_some());
        assert_eq!(store.context_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn absent_contexts_are_retried() {
        let store = Arc::new(CountingStore {
            context_calls: AtomicU32::new(0),
            context: None,
        });
        let cache = ContextCache::new(store.clone(), Duration::from_secs(300));

        assert!(cache.task_context("s1").await.is_none());
        assert!(cache.task_context("s1").await.is_none());
        assert_eq!(store.context_calls.load(Ordering::SeqCst), 2);
    }
}
