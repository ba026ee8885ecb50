//! PII-redacting sanitizer for caller-supplied error text.
//!
//! Applied on every path that persists or logs a caller-supplied error
//! message, so that a producer's raw exception text never reaches storage
//! or logs verbatim.

use once_cell::sync::Lazy;
use regex::Regex;

const REDACTED: &str = "[REDACTED]";
const TRUNCATION_SUFFIX: &str = "...[truncated]";

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}\b")
        .expect("EMAIL_REGEX must compile")
});

static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+?\d{1,3}[-.\s]?\(?\d{2,4}\)?[-.\s]?\d{3,4}[-.\s]?\d{3,4}\b")
        .expect("PHONE_REGEX must compile")
});

static CARD_16_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b").expect("CARD_16_REGEX must compile")
});

static CARD_AMEX_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b3[47]\d{2}[-\s]?\d{6}[-\s]?\d{5}\b").expect("CARD_AMEX_REGEX must compile")
});

static SSN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("SSN_REGEX must compile"));

static IPV4_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("IPV4_REGEX must compile")
});

/// Redact emails/phones/card numbers/SSNs/IPv4 addresses, truncate to
/// `max_len` characters, and strip anything from the first newline onward
/// (stack traces).
///
/// Order matters: card-number patterns must run before the looser phone
/// pattern would otherwise partially match inside a digit run, and
/// truncation/newline-stripping must run last so they operate on the
/// already-redacted text.
pub fn sanitize(input: &str, max_len: usize) -> String {
    let mut s = input.to_string();

    s = EMAIL_REGEX.replace_all(&s, REDACTED).into_owned();
    s = CARD_16_REGEX.replace_all(&s, REDACTED).into_owned();
    s = CARD_AMEX_REGEX.replace_all(&s, REDACTED).into_owned();
    s = SSN_REGEX.replace_all(&s, REDACTED).into_owned();
    s = IPV4_REGEX.replace_all(&s, REDACTED).into_owned();
    s = PHONE_REGEX.replace_all(&s, REDACTED).into_owned();

    if let Some(idx) = s.find('\n') {
        s.truncate(idx);
    }

    if s.chars().count() > max_len {
        let truncated: String = s.chars().take(max_len).collect();
        s = format!("{truncated}{TRUNCATION_SUFFIX}");
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_LEN: usize = 500;

    #[test]
    fn redacts_email() {
        assert_eq!(
            sanitize("contact user@example.com now", MAX_LEN),
            "contact [REDACTED] now"
        );
    }

    #[test]
    fn redacts_ssn() {
        assert_eq!(
            sanitize("SSN 123-45-6789 on file", MAX_LEN),
            "SSN [REDACTED] on file"
        );
    }

    #[test]
    fn redacts_ipv4() {
        assert_eq!(
            sanitize("from 10.0.0.1 failed", MAX_LEN),
            "from [REDACTED] failed"
        );
    }

    #[test]
    fn redacts_16_digit_card() {
        assert_eq!(
            sanitize("card 4111 1111 1111 1111 declined", MAX_LEN),
            "card [REDACTED] declined"
        );
        assert_eq!(
            sanitize("card 4111-1111-1111-1111 declined", MAX_LEN),
            "card [REDACTED] declined"
        );
    }

    #[test]
    fn redacts_amex_card() {
        assert_eq!(
            sanitize("amex 3782 822463 10005 declined", MAX_LEN),
            "amex [REDACTED] declined"
        );
    }

    #[test]
    fn scenario_combined_redaction() {
        let input = "user@example.com failed from 10.0.0.1 SSN 123-45-6789";
        assert_eq!(
            sanitize(input, MAX_LEN),
            "[REDACTED] failed from [REDACTED] SSN [REDACTED]"
        );
    }

    #[test]
    fn truncates_long_messages() {
        let long = "e".repeat(600);
        let out = sanitize(&long, MAX_LEN);
        assert_eq!(out.len(), MAX_LEN + TRUNCATION_SUFFIX.len());
        assert!(out.ends_with(TRUNCATION_SUFFIX));
    }

    #[test]
    fn truncates_to_a_configured_limit() {
        let long = "e".repeat(50);
        let out = sanitize(&long, 10);
        assert_eq!(out, format!("{}{}", "e".repeat(10), TRUNCATION_SUFFIX));
    }

    #[test]
    fn strips_stack_trace_after_first_newline() {
        let input = "top level failure\n    at some::module::function (file.rs:42)";
        assert_eq!(sanitize(input, MAX_LEN), "top level failure");
    }

    #[test]
    fn leaves_ordinary_text_untouched() {
        assert_eq!(
            sanitize("connection refused", MAX_LEN),
            "connection refused"
        );
    }
}
