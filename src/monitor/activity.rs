use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::detect::DetectionMethod;
use crate::state_machine::AttentionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    StateChange,
    DistractionDetected,
    Observation,
}

/// One activity record emitted per decision tick (and per state change) for
/// external persistence.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: Uuid,
    pub session_id: String,
    pub activity_type: ActivityType,
    pub state: AttentionState,
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub detected_domain: Option<String>,
    pub detected_url: Option<String>,
    pub is_distraction: Option<bool>,
    pub is_blocked: Option<bool>,
    pub method: Option<DetectionMethod>,
    pub metadata: Value,
    pub at: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(session_id: &str, activity_type: ActivityType, state: AttentionState) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            activity_type,
            state,
            app_name: None,
            window_title: None,
            detected_domain: None,
            detected_url: None,
            is_distraction: None,
            is_blocked: None,
            method: None,
            metadata: Value::Null,
            at: Utc::now(),
        }
    }
}

/// Destination for activity records. Delivery is best-effort: the monitor
/// logs failed writes and moves on.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn record(&self, record: ActivityRecord) -> Result<()>;
}

/// Sink that drops everything; for embedders that do their own logging.
pub struct NullActivitySink;

#[async_trait]
impl ActivitySink for NullActivitySink {
    async fn record(&self, _record: ActivityRecord) -> Result<()> {
        Ok(())
    }
}
