//! Log gating and truncation
//!
//! Per-operation diagnostics are noisy, so they are emitted only when the
//! engine-wide flag or the cache's own verbose flag asks for them.

use std::borrow::Cow;
use std::fmt::Debug;

use crate::cache::CacheDescriptor;

/// Shorten `text` to `max_len` characters, noting how much was cut
pub fn truncate_for_log(text: &str, max_len: Option<usize>) -> Cow<'_, str> {
    let Some(max_len) = max_len else {
        return Cow::Borrowed(text);
    };

    let total = text.chars().count();
    if total <= max_len {
        return Cow::Borrowed(text);
    }

    let kept: String = text.chars().take(max_len).collect();
    Cow::Owned(format!(
        "{}...({} chars truncated, original length {})",
        kept,
        total - max_len,
        total
    ))
}

/// Decides whether and how verbosely to log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPolicy {
    pub enabled: bool,
    pub max_len: Option<usize>,
}

impl LogPolicy {
    pub fn new(enabled: bool, max_len: Option<usize>) -> Self {
        Self { enabled, max_len }
    }

    /// Diagnostics on for this cache?
    pub fn enabled_for(&self, descriptor: &CacheDescriptor) -> bool {
        self.enabled || descriptor.verbose_log
    }

    /// Debug-render a value, truncated
    pub fn render<T: Debug + ?Sized>(&self, value: &T) -> String {
        let rendered = format!("{:?}", value);
        truncate_for_log(&rendered, self.max_len).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate_for_log("hello", Some(10)), "hello");
        assert_eq!(truncate_for_log("hello", None), "hello");
    }

    #[test]
    fn test_truncate_long_text() {
        let out = truncate_for_log("abcdefghij", Some(4));
        assert_eq!(out, "abcd...(6 chars truncated, original length 10)");
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let out = truncate_for_log("日本語テキスト", Some(3));
        assert!(out.starts_with("日本語..."));
        assert!(out.contains("original length 7"));
    }

    #[test]
    fn test_enabled_for_verbose_descriptor() {
        let quiet = LogPolicy::new(false, None);
        let descriptor = CacheDescriptor::default();
        assert!(!quiet.enabled_for(&descriptor));
        assert!(quiet.enabled_for(&descriptor.clone().verbose()));
        assert!(LogPolicy::new(true, None).enabled_for(&descriptor));
    }

    #[test]
    fn test_render_truncates() {
        let policy = LogPolicy::new(true, Some(5));
        let rendered = policy.render(&"a long string value");
        assert!(rendered.starts_with("\"a lo"));
        assert!(rendered.contains("truncated"));
    }
}
