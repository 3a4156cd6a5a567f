use tokio::time::Duration;

use crate::classify::ClassifierConfig;
use crate::detect::DetectorConfig;
use crate::monitor::SessionMonitorConfig;
use crate::ocr::OcrConfig;
use crate::sensing::{ChangeConfig, SamplerConfig};
use crate::window::WindowObserverConfig;

/// Every tunable in one place. Components take their own sub-config, so
/// embedders can also construct them piecemeal.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub window: WindowObserverConfig,
    pub sampler: SamplerConfig,
    pub change: ChangeConfig,
    pub ocr: OcrConfig,
    pub classifier: ClassifierConfig,
    pub detector: DetectorConfig,
    pub session: SessionMonitorConfig,
    /// How long AMBIGUOUS may persist before auto-escalating to RED.
    pub ambiguous_timeout: Duration,
    /// Lifetime of cached task context and session rules.
    pub context_ttl: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window: WindowObserverConfig::default(),
            sampler: SamplerConfig::default(),
            change: ChangeConfig::default(),
            ocr: OcrConfig::default(),
            classifier: ClassifierConfig::default(),
            detector: DetectorConfig::default(),
            session: SessionMonitorConfig::default(),
            ambiguous_timeout: Duration::from_secs(15),
            context_ttl: Duration::from_secs(5 * 60),
        }
    }
}
