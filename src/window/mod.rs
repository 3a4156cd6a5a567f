mod observer;
mod types;

pub use observer::{ProcessIndex, WindowObserver, WindowObserverConfig, WindowQuery};
pub use types::{WindowBounds, WindowMetadata, WindowSnapshot};
