use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;

use crate::cache::TtlCache;
use crate::context::TaskContext;
use crate::detect::DetectedContent;
use crate::resilience::{retry_with_backoff, Backoff, CircuitBreaker};

use super::backend::ReasoningBackend;
use super::prompt::{build_prompt, parse_reply, Classification};

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// How long an identical (domain, title) decision is reused.
    pub cache_ttl: Duration,
    /// Overall bound racing one classification, retries included.
    pub call_timeout: Duration,
    /// Attempts per classification before it counts as a failure.
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    /// Consecutive failures before the circuit opens.
    pub breaker_threshold: u32,
    pub breaker_cool_down: Duration,
    /// Keywords that flag a free-text reply as "distraction". Loose policy,
    /// not a contract.
    pub distraction_keywords: Vec<String>,
    pub max_prompt_len: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            breaker_threshold: 5,
            breaker_cool_down: Duration::from_secs(60),
            distraction_keywords: ["yes", "distraction", "block", "blocked"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_prompt_len: 3000,
        }
    }
}

/// Asks the reasoning backend whether detected content is a distraction,
/// shielded by a short-lived decision cache, bounded retries, and a circuit
/// breaker. Never fails the caller: every degraded path returns the
/// conservative default.
pub struct ClassificationService {
    backend: Arc<dyn ReasoningBackend>,
    config: ClassifierConfig,
    cache: Mutex<TtlCache<String, Classification>>,
    breaker: Mutex<CircuitBreaker>,
}

impl ClassificationService {
    pub fn new(backend: Arc<dyn ReasoningBackend>, config: ClassifierConfig) -> Self {
        let cache = TtlCache::new(config.cache_ttl);
        let breaker = CircuitBreaker::new(config.breaker_threshold, config.breaker_cool_down);
        Self {
            backend,
            config,
            cache: Mutex::new(cache),
            breaker: Mutex::new(breaker),
        }
    }

    pub async fn classify(
        &self,
        content: &DetectedContent,
        context: &TaskContext,
    ) -> Classification {
        let cache_key = format!(
            "{}::{}",
            content.domain.as_deref().unwrap_or(""),
            content.window_title
        );

        if let Some(cached) = self.cache.lock().await.get(&cache_key) {
            debug!("classification cache hit for {cache_key}");
            return cached.clone();
        }

        if !self.breaker.lock().await.try_acquire() {
            debug!("classifier circuit open, returning conservative default");
            return Classification::conservative_default("classifier circuit open");
        }

        let prompt = build_prompt(content, context, self.config.max_prompt_len);
        let backend = Arc::clone(&self.backend);
        let attempts = retry_with_backoff(
            "classification",
            self.config.max_attempts,
            Backoff::Linear(self.config.retry_backoff),
            |_| {
                let backend = Arc::clone(&backend);
                let prompt = prompt.clone();
                async move { backend.complete(&prompt).await }
            },
        );

        let reply = match tokio::time::timeout(self.config.call_timeout, attempts).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                self.note_failure(format!("{err:#}")).await;
                return Classification::conservative_default("classifier unavailable");
            }
            Err(_) => {
                self.note_failure(format!(
                    "timed out after {:?}",
                    self.config.call_timeout
                ))
                .await;
                return Classification::conservative_default("classifier timed out");
            }
        };

        self.breaker.lock().await.record_success();

        let classification = parse_reply(&reply, &self.config.distraction_keywords);
        self.cache
            .lock()
            .await
            .insert(cache_key, classification.clone());
        classification
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    async fn note_failure(&self, detail: String) {
        let mut breaker = self.breaker.lock().await;
        if breaker.record_failure() {
            warn!(
                "{} failed {} times in a row, opening circuit: {detail}",
                self.backend.name(),
                breaker.failures()
            );
        } else {
            debug!("{} classification failed: {detail}", self.backend.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedBackend {
        replies: std::sync::Mutex<Vec<Result<String, String>>>,
        calls: AtomicU32,
    }

    impl ScriptedBackend {
        fn always(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                replies: std::sync::Mutex::new(vec![Ok(reply.to_string())]),
                calls: AtomicU32::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                replies: std::sync::Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReasoningBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let replies = self.replies.lock().unwrap();
            match replies.last() {
                Some(Ok(reply)) => Ok(reply.clone()),
                Some(Err(message)) => Err(anyhow::anyhow!(message.clone())),
                None => Err(anyhow::anyhow!("backend down")),
            }
        }
    }

    fn content() -> DetectedContent {
        DetectedContent {
            domain: Some("example.com".into()),
            url: Some("https://example.com".into()),
            window_title: "Example".into(),
            recognized_text: String::new(),
        }
    }

    fn context() -> TaskContext {
        TaskContext {
            task_name: "thesis".into(),
            description: String::new(),
            keywords: Vec::new(),
            reference_summaries: Vec::new(),
        }
    }

    fn config() -> ClassifierConfig {
        ClassifierConfig {
            max_attempts: 1,
            ..ClassifierConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cached_decisions_skip_the_backend() {
        let backend =
            ScriptedBackend::always("{\"isDistraction\": false, \"confidence\": 0.9, \"reason\": \"on task\"}");
        let service = ClassificationService::new(backend.clone(), config());

        let first = service.classify(&content(), &context()).await;
        let second = service.classify(&content(), &context()).await;

        assert_eq!(first, second);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_expires_after_ttl() {
        let backend =
            ScriptedBackend::always("{\"isDistraction\": false, \"confidence\": 0.9, \"reason\": \"ok\"}");
        let service = ClassificationService::new(backend.clone(), config());

        service.classify(&content(), &context()).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        service.classify(&content(), &context()).await;

        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_after_threshold_and_short_circuits() {
        let backend = ScriptedBackend::failing();
        let service = ClassificationService::new(backend.clone(), config());

        for _ in 0..5 {
            let verdict = service.classify(&content(), &context()).await;
            assert!(verdict.is_distraction);
            assert_eq!(verdict.confidence, 0.5);
        }
        assert_eq!(backend.calls(), 5);

        // Circuit is open now; the backend must not be consulted.
        let verdict = service.classify(&content(), &context()).await;
        assert_eq!(verdict.reason, "classifier circuit open");
        assert_eq!(backend.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_allows_a_probe_after_cool_down() {
        let backend = ScriptedBackend::failing();
        let service = ClassificationService::new(backend.clone(), config());

        for _ in 0..5 {
            service.classify(&content(), &context()).await;
        }
        assert_eq!(backend.calls(), 5);

        tokio::time::advance(Duration::from_secs(61)).await;
        backend
            .replies
            .lock()
            .unwrap()
            .push(Ok("{\"isDistraction\": true, \"confidence\": 0.8, \"reason\": \"x\"}".into()));

        let verdict = service.classify(&content(), &context()).await;
        assert_eq!(backend.calls(), 6);
        assert!(verdict.is_distraction);
        assert_eq!(verdict.confidence, 0.8);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_are_retried_with_backoff() {
        let backend = ScriptedBackend::failing();
        let service = ClassificationService::new(
            backend.clone(),
            ClassifierConfig {
                max_attempts: 3,
                ..ClassifierConfig::default()
            },
        );

        let verdict = service.classify(&content(), &context()).await;
        assert_eq!(backend.calls(), 3);
        assert!(verdict.is_distraction);
    }
}
