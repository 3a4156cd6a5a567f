mod backend;
mod prompt;
mod service;

pub use backend::{OllamaBackend, OllamaConfig, ReasoningBackend};
pub use prompt::{build_prompt, parse_reply, Classification};
pub use service::{ClassificationService, ClassifierConfig};
