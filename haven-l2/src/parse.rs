//! Parses a control-plane plan response into a [`Decision`], tolerating the
//! Markdown code fences an LLM-backed endpoint sometimes wraps its JSON in
//! (spec §4.3).

use crate::decision::Decision;
use haven_types::AgentError;

/// Strips a leading/trailing triple-backtick fence (with an optional
/// language tag, e.g. ` ```json `) if present, then parses the result as a
/// [`Decision`]. A response with no fence is parsed as-is.
pub fn parse_decision(raw: &str) -> Result<Decision, AgentError> {
    let trimmed = strip_code_fence(raw.trim());
    serde_json::from_str(trimmed).map_err(|e| AgentError::ValidationFailed {
        reason: format!("unparseable plan response: {e}"),
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Skip an optional language tag up to the first newline.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let decision = parse_decision(r#"{"action":"restart_service","confidence":0.9}"#).unwrap();
        assert_eq!(decision.action, "restart_service");
    }

    #[test]
    fn strips_json_code_fence() {
        let raw = "```json\n{\"action\":\"restart_service\",\"confidence\":0.9}\n```";
        let decision = parse_decision(raw).unwrap();
        assert_eq!(decision.action, "restart_service");
    }

    #[test]
    fn strips_bare_code_fence_without_language_tag() {
        let raw = "```\n{\"action\":\"escalate\",\"confidence\":0.1}\n```";
        let decision = parse_decision(raw).unwrap();
        assert_eq!(decision.action, "escalate");
    }

    #[test]
    fn missing_fields_default_rather_than_fail() {
        let decision = parse_decision(r#"{"action":"escalate"}"#).unwrap();
        assert_eq!(decision.confidence, 0.0);
        assert!(!decision.escalate_to_l3);
    }

    #[test]
    fn malformed_json_is_a_validation_failure() {
        assert!(matches!(
            parse_decision("not json at all"),
            Err(AgentError::ValidationFailed { .. })
        ));
    }
}
