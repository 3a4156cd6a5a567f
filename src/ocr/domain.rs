/// Domain/URL extracted from recognized text.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainMatch {
    pub domain: Option<String>,
    pub url: Option<String>,
    pub confidence: f64,
}

impl DomainMatch {
    fn none() -> Self {
        Self {
            domain: None,
            url: None,
            confidence: 0.0,
        }
    }
}

/// Scans recognized text for the first thing that looks like a URL or bare
/// domain, normalizes the scheme, and strips a leading "www.". Confidence is
/// 0.9 for a well-formed host, 0.7 when the domain had to be guessed from an
/// unparsable match, and 0.0 when nothing matched.
pub fn extract_domain(text: &str) -> DomainMatch {
    let Some(candidate) = text
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| matches!(c, ',' | ';' | ')' | '(' | '"')))
        .find(|token| looks_like_url(token))
    else {
        return DomainMatch::none();
    };

    let normalized = if candidate.starts_with("http://") || candidate.starts_with("https://") {
        candidate.to_string()
    } else {
        format!("https://{candidate}")
    };

    let after_scheme = normalized
        .splitn(2, "//")
        .nth(1)
        .unwrap_or(&normalized);
    let host = after_scheme.split('/').next().unwrap_or("");
    let host = host.split(':').next().unwrap_or(host);

    if is_valid_host(host) {
        let host = host.to_lowercase();
        let domain = host.strip_prefix("www.").unwrap_or(&host).to_string();
        DomainMatch {
            domain: Some(domain),
            url: Some(normalized),
            confidence: 0.9,
        }
    } else {
        // The match could not be parsed as a well-formed URL; guess the
        // domain from the raw text and report lower confidence.
        let guessed = candidate
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_start_matches("www.")
            .split('/')
            .next()
            .unwrap_or("")
            .to_string();
        if guessed.is_empty() {
            return DomainMatch::none();
        }
        DomainMatch {
            domain: Some(guessed),
            url: Some(candidate.to_string()),
            confidence: 0.7,
        }
    }
}

fn looks_like_url(token: &str) -> bool {
    if token.starts_with("http://") || token.starts_with("https://") || token.starts_with("www.") {
        return true;
    }
    bare_domain_position(token).is_some()
}

/// A bare domain is letters/digits/hyphens, then a dot, then an alphabetic
/// TLD of at least two characters.
fn bare_domain_position(token: &str) -> Option<usize> {
    let stem = token.split('/').next()?;
    let dot = stem.rfind('.')?;
    let (label, tld) = stem.split_at(dot);
    let tld = &tld[1..];

    if label.is_empty() || tld.len() < 2 {
        return None;
    }
    if !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return None;
    }
    Some(dot)
}

fn is_valid_host(host: &str) -> bool {
    if host.is_empty() || !host.contains('.') {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_well_formed_urls_with_high_confidence() {
        let result = extract_domain("some text https://github.com/rust-lang/rust more text");
        assert_eq!(result.domain.as_deref(), Some("github.com"));
        assert_eq!(result.url.as_deref(), Some("https://github.com/rust-lang/rust"));
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn normalizes_scheme_and_strips_www() {
        let result = extract_domain("www.youtube.com/watch?v=abc");
        assert_eq!(result.domain.as_deref(), Some("youtube.com"));
        assert_eq!(result.url.as_deref(), Some("https://www.youtube.com/watch?v=abc"));
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn bare_domains_are_recognized() {
        let result = extract_domain("docs.rs is useful");
        assert_eq!(result.domain.as_deref(), Some("docs.rs"));
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn prefers_the_first_match() {
        let result = extract_domain("see reddit.com and also youtube.com");
        assert_eq!(result.domain.as_deref(), Some("reddit.com"));
    }

    #[test]
    fn unparsable_matches_are_guessed_at_lower_confidence() {
        let result = extract_domain("weird foo..com token");
        assert_eq!(result.domain.as_deref(), Some("foo..com"));
        assert_eq!(result.confidence, 0.7);
    }

    #[test]
    fn no_match_yields_zero_confidence() {
        let result = extract_domain("just some prose without links");
        assert_eq!(result, DomainMatch::none());
        assert_eq!(extract_domain(""), DomainMatch::none());
    }
}
