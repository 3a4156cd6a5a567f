mod domain;
mod engine;
mod service;

pub use domain::{extract_domain, DomainMatch};
pub use engine::{OcrEngine, RecognizedText};
pub use service::{BrowserKind, OcrConfig, Region, TextRecognitionService};
