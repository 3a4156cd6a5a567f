mod capture;
mod change;
mod sampler;

pub use capture::{Frame, ScreenCapture};
pub use change::{ChangeConfig, ChangeDetector, TileDelta};
pub use sampler::{SamplerConfig, ScreenSampler};
