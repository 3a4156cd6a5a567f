mod activity;
mod overlay;
mod session;
mod stats;

pub use activity::{ActivityRecord, ActivitySink, ActivityType, NullActivitySink};
pub use overlay::{blocking_zone, BlockZone, BlockingSurface};
pub use session::{
    derive_next_state, EscalationConfig, MonitorParts, MonitorStatus, SessionMonitor,
    SessionMonitorConfig,
};
pub use stats::UsageStats;
