use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Screen-space rectangle of a window. Dimensions are validated before a
/// snapshot is accepted; window managers occasionally report zero-sized or
/// absurd bounds mid-switch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl WindowBounds {
    /// Sane ceiling for a single display dimension.
    pub const MAX_DIMENSION: f64 = 10_000.0;

    pub fn is_valid(&self) -> bool {
        self.width > 0.0
            && self.height > 0.0
            && self.width < Self::MAX_DIMENSION
            && self.height < Self::MAX_DIMENSION
    }
}

/// What the OS reports for the foreground window. Produced by a
/// [`WindowQuery`](super::WindowQuery) implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowMetadata {
    pub app_name: String,
    pub window_title: String,
    pub bounds: WindowBounds,
}

/// Cached, validated view of the foreground window. Replaced wholesale on
/// each successful poll, never partially mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSnapshot {
    pub app_name: String,
    pub window_title: String,
    /// Resolved process name for the foreground app, when one could be found.
    /// Rules with a `process` target kind match against this.
    pub process_name: Option<String>,
    pub bounds: WindowBounds,
    pub timestamp: DateTime<Utc>,
}

impl WindowSnapshot {
    /// Whether the app or title differs from `other`, the signal that a
    /// window change should be announced (after debouncing).
    pub fn differs_from(&self, other: &WindowSnapshot) -> bool {
        self.app_name != other.app_name || self.window_title != other.window_title
    }
}
