use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;

use crate::context::TaskContext;
use crate::detect::DetectedContent;

/// Result of classifying detected content against the task context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub is_distraction: bool,
    pub confidence: f64,
    pub reason: String,
}

impl Classification {
    /// Conservative fallback when the backend is unavailable or its reply is
    /// unusable: treat the content as a distraction at half confidence.
    pub fn conservative_default(reason: &str) -> Self {
        Self {
            is_distraction: true,
            confidence: 0.5,
            reason: reason.to_string(),
        }
    }
}

const MAX_KEYWORDS: usize = 20;
const MAX_RECOGNIZED_TEXT: usize = 200;
const MAX_SUMMARY: usize = 300;

/// Builds the classification prompt: task context, reference summaries,
/// keywords, and the content currently on screen, capped at `max_len` bytes.
pub fn build_prompt(content: &DetectedContent, context: &TaskContext, max_len: usize) -> String {
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "You are a focus assistant helping a user stay on their task.\n"
    );
    let _ = writeln!(prompt, "TASK: {}", context.task_name);
    let description = if context.description.is_empty() {
        "No description"
    } else {
        &context.description
    };
    let _ = writeln!(prompt, "DESCRIPTION: {description}");

    if !context.reference_summaries.is_empty() {
        let _ = writeln!(prompt, "\nREFERENCE MATERIALS:");
        for (idx, reference) in context.reference_summaries.iter().enumerate() {
            let _ = writeln!(
                prompt,
                "{}. {}: {}",
                idx + 1,
                reference.title,
                truncate(&reference.summary, MAX_SUMMARY)
            );
        }
    }

    if !context.keywords.is_empty() {
        let keywords: Vec<&str> = context
            .keywords
            .iter()
            .take(MAX_KEYWORDS)
            .map(String::as_str)
            .collect();
        let _ = writeln!(prompt, "\nKEY CONCEPTS: {}", keywords.join(", "));
    }

    let _ = writeln!(
        prompt,
        "\nCURRENT CONTENT:\n- Domain: {}\n- URL: {}\n- Title: {}\n- Visible text: {}",
        content.domain.as_deref().unwrap_or("Unknown"),
        content.url.as_deref().unwrap_or("Unknown"),
        if content.window_title.is_empty() {
            "Unknown"
        } else {
            &content.window_title
        },
        truncate(&content.recognized_text, MAX_RECOGNIZED_TEXT)
    );

    let _ = writeln!(
        prompt,
        "\nIs this content related to the task, or a distraction?\n\
         Respond with JSON: {{\"isDistraction\": true/false, \"confidence\": 0.0-1.0, \"reason\": \"brief explanation\"}}"
    );

    if prompt.len() > max_len {
        let mut cut = max_len;
        while !prompt.is_char_boundary(cut) {
            cut -= 1;
        }
        prompt.truncate(cut);
        prompt.push_str("...");
    }

    prompt
}

/// Parses the backend's reply. A well-formed JSON payload wins; otherwise a
/// distraction verdict is inferred from keyword presence in the free text;
/// if neither works the conservative default applies.
pub fn parse_reply(text: &str, distraction_keywords: &[String]) -> Classification {
    if let Some(parsed) = parse_json_payload(text) {
        return parsed;
    }

    if !text.trim().is_empty() {
        let lower = text.to_lowercase();
        let is_distraction = distraction_keywords
            .iter()
            .any(|keyword| lower.contains(keyword.as_str()));
        return Classification {
            is_distraction,
            confidence: 0.6,
            reason: "inferred from free-text reply".to_string(),
        };
    }

    Classification::conservative_default("unparsable classifier reply")
}

fn parse_json_payload(text: &str) -> Option<Classification> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
    let is_distraction = match value.get("isDistraction")? {
        Value::Bool(flag) => *flag,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => return None,
    };

    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.7)
        .clamp(0.0, 1.0);

    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("classifier decision")
        .to_string();

    Some(Classification {
        is_distraction,
        confidence,
        reason,
    })
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}
