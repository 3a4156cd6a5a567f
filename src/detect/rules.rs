use serde::{Deserialize, Serialize};

/// What a session rule's target string refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    App,
    Domain,
    Process,
}

/// One session-scoped allow/block rule, resolved from external storage. The
/// rule's direction (allowed vs blocked) comes from which list it lives in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub target: String,
    pub target_kind: TargetKind,
}

impl Rule {
    pub fn new(target: impl Into<String>, target_kind: TargetKind) -> Self {
        Self {
            target: target.into(),
            target_kind,
        }
    }
}

/// Whether any rule in the list matches the observed app/process/domain.
///
/// App rules match equal-or-substring of the application name, domain rules
/// match equal, substring, or subdomain suffix, and process rules match the
/// process name exactly. All comparisons are case-insensitive.
pub fn any_rule_matches(
    rules: &[Rule],
    app_name: &str,
    process_name: Option<&str>,
    domain: Option<&str>,
) -> bool {
    let app = app_name.to_lowercase();
    let process = process_name.map(|name| name.to_lowercase());
    let domain = domain.map(|name| name.to_lowercase());

    rules.iter().any(|rule| {
        let target = rule.target.to_lowercase();
        match rule.target_kind {
            TargetKind::App => !app.is_empty() && (app == target || app.contains(&target)),
            TargetKind::Domain => domain.as_deref().is_some_and(|domain| {
                domain == target
                    || domain.contains(&target)
                    || domain.ends_with(&format!(".{target}"))
            }),
            TargetKind::Process => process.as_deref().is_some_and(|process| process == target),
        }
    })
}

/// Applications that never count as a distraction, regardless of rules or
/// classification (IDEs and terminals).
const KNOWN_SAFE_APPS: &[&str] = &[
    "Code",
    "Visual Studio Code",
    "Terminal",
    "iTerm2",
    "Alacritty",
];

pub fn is_known_safe_app(app_name: &str) -> bool {
    let lower = app_name.to_lowercase();
    KNOWN_SAFE_APPS
        .iter()
        .any(|safe| lower.contains(&safe.to_lowercase()))
}

/// Static safety net of well-known distraction domains and keywords,
/// independent of AI classification.
const SAFETY_NET_BLOCKLIST: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "instagram.com",
    "facebook.com",
    "twitter.com",
    "x.com",
    "tiktok.com",
    "reddit.com",
    "netflix.com",
    "hulu.com",
    "disneyplus.com",
    "amazon.com",
    "ebay.com",
    "shopping",
    "games",
    "gaming",
];

/// Exact or substring match against the safety-net blocklist.
pub fn in_safety_net(domain: &str) -> bool {
    if domain.is_empty() {
        return false;
    }
    let lower = domain.to_lowercase();
    SAFETY_NET_BLOCKLIST
        .iter()
        .any(|blocked| lower == *blocked || lower.contains(blocked))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_rules_match_substrings_case_insensitively() {
        let rules = vec![Rule::new("slack", TargetKind::App)];
        assert!(any_rule_matches(&rules, "Slack", None, None));
        assert!(any_rule_matches(&rules, "Slack Helper", None, None));
        assert!(!any_rule_matches(&rules, "Mail", None, None));
    }

    #[test]
    fn domain_rules_accept_subdomain_suffixes() {
        let rules = vec![Rule::new("youtube.com", TargetKind::Domain)];
        assert!(any_rule_matches(&rules, "Safari", None, Some("youtube.com")));
        assert!(any_rule_matches(&rules, "Safari", None, Some("music.youtube.com")));
        assert!(!any_rule_matches(&rules, "Safari", None, Some("youtube.org")));
        assert!(!any_rule_matches(&rules, "Safari", None, None));
    }

    #[test]
    fn process_rules_require_an_exact_name() {
        let rules = vec![Rule::new("steam", TargetKind::Process)];
        assert!(any_rule_matches(&rules, "Steam", Some("steam"), None));
        assert!(!any_rule_matches(&rules, "Steam", Some("steamwebhelper"), None));
        assert!(!any_rule_matches(&rules, "Steam", None, None));
    }

    #[test]
    fn known_safe_apps_match_substrings() {
        assert!(is_known_safe_app("Code"));
        assert!(is_known_safe_app("Visual Studio Code"));
        assert!(is_known_safe_app("iterm2"));
        assert!(!is_known_safe_app("Safari"));
    }

    #[test]
    fn safety_net_matches_exact_and_substring() {
        assert!(in_safety_net("youtube.com"));
        assert!(in_safety_net("www.youtube.com"));
        assert!(in_safety_net("gaming.example.org"));
        assert!(!in_safety_net("wikipedia.org"));
        assert!(!in_safety_net(""));
    }
}
