use serde::Serialize;

use crate::state_machine::AttentionState;

/// Per-session usage counters, accumulated in-process. Persistence of the
/// numbers is the embedder's job.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    pub monitoring_seconds: u64,
    pub green_seconds: u64,
    pub yellow_seconds: u64,
    pub ambiguous_seconds: u64,
    pub red_seconds: u64,
    pub distractions_detected: u64,
    pub blocks_applied: u64,
    pub captures_taken: u64,
}

impl UsageStats {
    pub fn record_tick(
        &mut self,
        state: AttentionState,
        elapsed_secs: u64,
        is_distraction: bool,
        blocked: bool,
    ) {
        self.monitoring_seconds += elapsed_secs;
        match state {
            AttentionState::Green => self.green_seconds += elapsed_secs,
            AttentionState::Yellow => self.yellow_seconds += elapsed_secs,
            AttentionState::Ambiguous => self.ambiguous_seconds += elapsed_secs,
            AttentionState::Red => self.red_seconds += elapsed_secs,
        }
        if is_distraction {
            self.distractions_detected += 1;
        }
        if blocked {
            self.blocks_applied += 1;
        }
        self.captures_taken += 1;
    }
}
