//! PHI scrubber: redacts the twelve protected-health-information categories
//! named in spec §4.4 from any string reachable inside a [`haven_types::Value`]
//! tree before that tree is allowed into an evidence bundle, a log line, or an
//! LLM prompt.
//!
//! Redaction tokens have the form `[<CATEGORY>-REDACTED-<8-hex>]`, where the
//! hex suffix is the first 4 bytes of the SHA-256 digest of the matched
//! substring — stable across re-scrubs of the same value, but not invertible.
//! Re-scrubbing already-redacted text is a no-op: the token format itself
//! never matches any category's pattern.

use crate::patterns::{category, short_digest, PatternCategory};
use haven_types::Value;
use std::sync::LazyLock;

static CATEGORIES: LazyLock<Vec<PatternCategory>> = LazyLock::new(|| {
    vec![
        category!(
            "SSN",
            [r"\b\d{3}-\d{2}-\d{4}\b", r"\bSSN[:\s#]*\d{9}\b"]
        ),
        category!(
            "MEDICARE-ID",
            [r"\b\d[A-Za-z0-9]\d[A-Za-z]-?[A-Za-z]\d[A-Za-z]-?[A-Za-z0-9]\d\d\d\b"]
        ),
        category!("MRN", [r"(?i)\bMRN[:\s#]*[A-Za-z0-9-]{5,}\b"]),
        category!(
            "PATIENT-ID",
            [r"(?i)\bpatient[_\s]?id[:\s#]*[A-Za-z0-9-]{4,}\b"]
        ),
        category!(
            "EMAIL",
            [r"\b[\w.+-]+@[\w-]+\.[A-Za-z]{2,}\b"]
        ),
        category!(
            "PHONE",
            [
                r"\(\d{3}\)\s?\d{3}-\d{4}",
                r"\b\d{3}-\d{3}-\d{4}\b",
                r"\+1-\d{3}-\d{3}-\d{4}\b"
            ]
        ),
        category!(
            "CREDIT-CARD",
            [r"\b(?:\d[ -]?){13,16}\b"]
        ),
        category!(
            "DOB",
            [
                r"(?i)\bDOB[:\s]*\d{1,2}/\d{1,2}/\d{2,4}\b",
                r"(?i)\bdate of birth[:\s]*\d{1,2}/\d{1,2}/\d{2,4}\b"
            ]
        ),
        category!(
            "ZIP-PLUS4",
            [r"\b\d{5}-\d{4}\b"]
        ),
        category!(
            "POSTAL-ADDRESS",
            [r"(?i)\b\d{1,5}\s+[A-Za-z0-9.'\s]{2,30}\s(?:St|Street|Ave|Avenue|Rd|Road|Blvd|Ln|Lane|Dr|Drive|Way|Ct|Court)\b"]
        ),
        category!(
            "ACCOUNT-NUMBER",
            [r"(?i)\bacct[:\s#]*\d{6,}\b", r"(?i)\baccount[_\s]?number[:\s#]*\d{6,}\b"]
        ),
        category!(
            "INSURANCE-ID",
            [r"(?i)\binsurance[_\s]?id[:\s#]*[A-Za-z0-9-]{5,}\b", r"\bINS-[A-Za-z0-9]{6,}\b"]
        ),
    ]
});

/// Names, in declaration/priority order, of the categories this scrubber
/// checks. Exposed so callers can report which categories are configured
/// without constructing a scrub pass.
pub fn category_labels() -> Vec<&'static str> {
    CATEGORIES.iter().map(|c| c.label).collect()
}

#[derive(Default, Clone, Debug)]
pub struct ScrubReport {
    pub categories_triggered: Vec<String>,
    pub redaction_count: usize,
}

impl ScrubReport {
    fn record(&mut self, label: &str) {
        self.redaction_count += 1;
        if !self.categories_triggered.iter().any(|c| c == label) {
            self.categories_triggered.push(label.to_string());
        }
    }
}

/// Scrubs every string reachable inside `value`, returning the scrubbed
/// value and a report of which categories fired.
pub fn scrub_value(value: &Value) -> (Value, ScrubReport) {
    let mut report = ScrubReport::default();
    let scrubbed = value.map_strings(&mut |s| scrub_str(s, &mut report));
    (scrubbed, report)
}

pub fn scrub_str(text: &str, report: &mut ScrubReport) -> String {
    // Collect every category's matches, then keep only the leftmost-longest
    // non-overlapping set so e.g. a 16-digit account number isn't partially
    // swallowed by the credit-card pattern and then re-matched by another.
    let mut spans: Vec<(usize, usize, &'static str)> = Vec::new();
    for cat in CATEGORIES.iter() {
        for m in cat.find_all(text) {
            spans.push((m.start(), m.end(), cat.label));
        }
    }
    spans.sort_by_key(|(start, end, _)| (*start, std::cmp::Reverse(*end)));

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for (start, end, label) in spans {
        if start < cursor {
            continue; // overlaps an already-accepted span
        }
        out.push_str(&text[cursor..start]);
        let token_source = &text[start..end];
        out.push_str(&format!("[{label}-REDACTED-{}]", short_digest(token_source)));
        report.record(label);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// True if `text` contains no IPv4 literal that the scrub pass altered.
/// Used by tests and by the evidence pipeline's pre-upload assertion that
/// network addressing — needed to act on the finding — survives scrubbing.
pub fn preserves_ip_addresses(before: &str, after: &str) -> bool {
    crate::patterns::IPV4_PATTERN
        .find_iter(before)
        .all(|m| after.contains(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubs_mixed_phi_while_preserving_ip_and_plain_numbers() {
        let input = "Server 192.168.88.100: patient admin@hospital.com SSN 123-45-6789, phone (555) 123-4567, fine 42";
        let mut report = ScrubReport::default();
        let out = scrub_str(input, &mut report);

        assert!(out.contains("192.168.88.100"), "IP must survive: {out}");
        assert!(out.contains("fine 42"), "unrelated number must survive: {out}");
        assert!(out.contains("[EMAIL-REDACTED-"), "{out}");
        assert!(out.contains("[SSN-REDACTED-"), "{out}");
        assert!(out.contains("[PHONE-REDACTED-"), "{out}");
        assert!(!out.contains("123-45-6789"));
        assert!(!out.contains("admin@hospital.com"));
    }

    #[test]
    fn rescrubbing_output_is_a_no_op() {
        let input = "contact admin@hospital.com about SSN 123-45-6789";
        let mut r1 = ScrubReport::default();
        let once = scrub_str(input, &mut r1);
        let mut r2 = ScrubReport::default();
        let twice = scrub_str(&once, &mut r2);
        assert_eq!(once, twice);
        assert_eq!(r2.redaction_count, 0);
    }

    #[test]
    fn ip_preservation_helper_detects_mutation() {
        let before = "host 10.0.0.5 fine";
        let after_ok = "host 10.0.0.5 fine";
        let after_bad = "host [REDACTED] fine";
        assert!(preserves_ip_addresses(before, after_ok));
        assert!(!preserves_ip_addresses(before, after_bad));
    }

    #[test]
    fn scrub_value_walks_nested_structures() {
        let value = Value::Map(
            [(
                "note".to_string(),
                Value::String("DOB: 04/12/1980".to_string()),
            )]
            .into_iter()
            .collect(),
        );
        let (scrubbed, report) = scrub_value(&value);
        assert_eq!(report.categories_triggered, vec!["DOB".to_string()]);
        match scrubbed.get_path("note") {
            Some(Value::String(s)) => assert!(s.contains("[DOB-REDACTED-")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
