use async_trait::async_trait;
use serde::Serialize;

use crate::window::WindowBounds;

/// A rectangle for the blocking surface to black out.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockZone {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub reason: String,
}

/// The external compositing layer that shows or hides blackout zones. The
/// core treats it as fire-and-forget and never awaits rendering completion,
/// so the calls are infallible from the caller's perspective.
#[async_trait]
pub trait BlockingSurface: Send + Sync {
    async fn show(&self, zones: Vec<BlockZone>, display_bounds: WindowBounds);
    async fn hide(&self);
}

/// Margins keeping window chrome (title bar, close buttons) usable while the
/// content area is covered.
const INSET_SIDE: f64 = 100.0;
const INSET_TOP: f64 = 150.0;
const INSET_BOTTOM: f64 = 100.0;

/// The zone to black out for a distracting window: its bounds inset by a
/// margin.
pub fn blocking_zone(bounds: &WindowBounds, reason: &str) -> BlockZone {
    BlockZone {
        x: bounds.x + INSET_SIDE,
        y: bounds.y + INSET_TOP,
        w: (bounds.width - 2.0 * INSET_SIDE).max(0.0),
        h: (bounds.height - INSET_TOP - INSET_BOTTOM).max(0.0),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zones_are_inset_from_the_window_bounds() {
        let bounds = WindowBounds {
            x: 50.0,
            y: 40.0,
            width: 1200.0,
            height: 800.0,
        };
        let zone = blocking_zone(&bounds, "youtube.com");
        assert_eq!(zone.x, 150.0);
        assert_eq!(zone.y, 190.0);
        assert_eq!(zone.w, 1000.0);
        assert_eq!(zone.h, 550.0);
        assert_eq!(zone.reason, "youtube.com");
    }

    #[test]
    fn tiny_windows_clamp_to_empty_zones() {
        let bounds = WindowBounds {
            x: 0.0,
            y: 0.0,
            width: 150.0,
            height: 100.0,
        };
        let zone = blocking_zone(&bounds, "x");
        assert_eq!(zone.w, 0.0);
        assert_eq!(zone.h, 0.0);
    }
}
