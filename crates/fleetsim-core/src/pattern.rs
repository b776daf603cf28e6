//! `${var}` interpolation for topics and client-id patterns.
//!
//! Patterns are resolved once at device start and cached; only
//! `${timestamp}` is re-substituted per publish, so the hot path pays a
//! single `replace` at most.

use chrono::{SecondsFormat, Utc};

/// Substitution context for a device.
#[derive(Debug, Clone, Copy)]
pub struct PatternContext<'a> {
    pub device_id: &'a str,
    pub model_id: &'a str,
    pub group_id: Option<&'a str>,
}

const TIMESTAMP_VAR: &str = "${timestamp}";

/// A pattern with every static variable substituted.
#[derive(Debug, Clone)]
pub struct ResolvedPattern {
    text: String,
    has_timestamp: bool,
}

impl ResolvedPattern {
    /// Resolves `${deviceId}`, `${modelId}`, `${groupId}` and `${env:NAME}`
    /// references; `${timestamp}` is kept for per-publish substitution.
    pub fn resolve(pattern: &str, ctx: &PatternContext<'_>) -> Self {
        let mut text = pattern
            .replace("${deviceId}", ctx.device_id)
            .replace("${modelId}", ctx.model_id)
            .replace("${groupId}", ctx.group_id.unwrap_or(""));

        while let Some(start) = text.find("${env:") {
            let Some(rel_end) = text[start..].find('}') else {
                break;
            };
            let end = start + rel_end;
            let name = text[start + 6..end].to_string();
            let value = std::env::var(&name).unwrap_or_default();
            text.replace_range(start..=end, &value);
        }

        let has_timestamp = text.contains(TIMESTAMP_VAR);
        Self { text, has_timestamp }
    }

    /// Returns the final string, stamping `${timestamp}` when present.
    pub fn render(&self) -> String {
        if self.has_timestamp {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            self.text.replace(TIMESTAMP_VAR, &now)
        } else {
            self.text.clone()
        }
    }

    /// The cached text with `${timestamp}` still unexpanded.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>() -> PatternContext<'a> {
        PatternContext {
            device_id: "t1-0",
            model_id: "t1",
            group_id: Some("g1"),
        }
    }

    #[test]
    fn test_static_substitution() {
        let p = ResolvedPattern::resolve("s/${deviceId}/t", &ctx());
        assert_eq!(p.render(), "s/t1-0/t");

        let p = ResolvedPattern::resolve("${modelId}-${deviceId}", &ctx());
        assert_eq!(p.render(), "t1-t1-0");

        let p = ResolvedPattern::resolve("g/${groupId}/x", &ctx());
        assert_eq!(p.render(), "g/g1/x");
    }

    #[test]
    fn test_missing_group_renders_empty() {
        let no_group = PatternContext {
            group_id: None,
            ..ctx()
        };
        let p = ResolvedPattern::resolve("g/${groupId}/x", &no_group);
        assert_eq!(p.render(), "g//x");
    }

    #[test]
    fn test_timestamp_is_rendered_per_call() {
        let p = ResolvedPattern::resolve("t/${timestamp}", &ctx());
        assert!(p.as_str().contains(TIMESTAMP_VAR));
        let rendered = p.render();
        assert!(rendered.starts_with("t/2"));
        assert!(!rendered.contains(TIMESTAMP_VAR));
    }

    #[test]
    fn test_env_reference() {
        std::env::set_var("FLEETSIM_TEST_SITE", "lab-3");
        let p = ResolvedPattern::resolve("site/${env:FLEETSIM_TEST_SITE}/t", &ctx());
        assert_eq!(p.render(), "site/lab-3/t");

        let p = ResolvedPattern::resolve("site/${env:FLEETSIM_TEST_UNSET}/t", &ctx());
        assert_eq!(p.render(), "site//t");
    }
}
