//! Operator evaluation against an incident's field tree (spec §4.2 table).
//! Every operator except `ne`/`not_in` treats a missing field as `false`;
//! those two treat absence as a trivial match, since "not equal to X" and
//! "not in [X]" are both vacuously true when there's nothing there to
//! compare.

use haven_types::{Condition, Incident, Operator, Value};
use regex::Regex;
use std::collections::BTreeMap;

/// Builds the `Value` tree a [`Condition::field`] dotted path is evaluated
/// against: every top-level `Incident` field plus the nested `raw_data`.
pub fn incident_value(incident: &Incident) -> Value {
    let mut map = BTreeMap::new();
    map.insert("id".to_string(), Value::from(incident.id.as_str()));
    map.insert("site_id".to_string(), Value::from(incident.site_id.as_str()));
    map.insert("host_id".to_string(), Value::from(incident.host_id.as_str()));
    map.insert(
        "incident_type".to_string(),
        Value::from(incident.incident_type.as_str()),
    );
    map.insert(
        "severity".to_string(),
        Value::from(incident.severity.to_string()),
    );
    map.insert(
        "pattern_signature".to_string(),
        Value::from(incident.pattern_signature.as_str()),
    );
    map.insert("raw_data".to_string(), incident.raw_data.clone());
    Value::Map(map)
}

/// Compiles the regex a `regex`-operator condition needs, once, at rule-load
/// time. Returns `None` for every other operator. `Err` on an invalid
/// pattern or a non-string operand — both are rejected at load time rather
/// than silently evaluating to `false` forever.
pub fn compile_regex(condition: &Condition) -> Result<Option<Regex>, String> {
    if condition.operator != Operator::Regex {
        return Ok(None);
    }
    let pattern = condition.value.as_str().ok_or_else(|| {
        format!(
            "condition on '{}' uses the regex operator with a non-string operand",
            condition.field
        )
    })?;
    Regex::new(pattern)
        .map(Some)
        .map_err(|e| format!("invalid regex for field '{}': {e}", condition.field))
}

fn contains(field: &Value, operand: &Value) -> bool {
    match field {
        Value::String(s) => operand.as_str().map(|needle| s.contains(needle)).unwrap_or(false),
        Value::List(items) => items.iter().any(|item| item.deep_eq(operand)),
        _ => false,
    }
}

fn membership(operand_list: &Value, field: &Value) -> bool {
    match operand_list {
        Value::List(items) => items.iter().any(|item| item.deep_eq(field)),
        _ => false,
    }
}

/// Evaluates a single condition against `incident_value` (built by
/// [`incident_value`]). `compiled_regex` must be the result of
/// [`compile_regex`] for this exact condition when its operator is `regex`;
/// pass `None` for every other operator.
pub fn evaluate(condition: &Condition, compiled_regex: Option<&Regex>, incident_value: &Value) -> bool {
    let field = incident_value.get_path(&condition.field);

    match condition.operator {
        Operator::Eq => field.map(|v| v.deep_eq(&condition.value)).unwrap_or(false),
        Operator::Ne => field.map(|v| !v.deep_eq(&condition.value)).unwrap_or(true),
        Operator::Contains => field.map(|v| contains(v, &condition.value)).unwrap_or(false),
        Operator::Regex => match (field.and_then(|v| v.as_str()), compiled_regex) {
            (Some(s), Some(re)) => re.is_match(s),
            _ => false,
        },
        Operator::Gt => field
            .and_then(|v| v.partial_cmp_numeric(&condition.value))
            .map(|ord| ord == std::cmp::Ordering::Greater)
            .unwrap_or(false),
        Operator::Lt => field
            .and_then(|v| v.partial_cmp_numeric(&condition.value))
            .map(|ord| ord == std::cmp::Ordering::Less)
            .unwrap_or(false),
        Operator::In => field.map(|v| membership(&condition.value, v)).unwrap_or(false),
        Operator::NotIn => field.map(|v| !membership(&condition.value, v)).unwrap_or(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use haven_types::{Incident, Severity};

    fn incident() -> Incident {
        let mut raw = BTreeMap::new();
        raw.insert("check_type".to_string(), Value::from("firewall"));
        raw.insert("drift_detected".to_string(), Value::Bool(true));
        raw.insert(
            "allowed_profiles".to_string(),
            Value::List(vec![Value::from("enabled"), Value::from("strict")]),
        );
        Incident::new(
            "inc-1",
            "site-a",
            "host-1",
            "firewall",
            Severity::High,
            Utc::now(),
            Value::Map(raw),
        )
    }

    fn cond(field: &str, operator: Operator, value: Value) -> Condition {
        Condition { field: field.to_string(), operator, value }
    }

    #[test]
    fn eq_matches_the_incident_type() {
        let c = cond("incident_type", Operator::Eq, Value::from("firewall"));
        assert!(evaluate(&c, None, &incident_value(&incident())));
    }

    #[test]
    fn missing_field_is_false_for_eq_but_true_for_ne_and_not_in() {
        let v = incident_value(&incident());
        assert!(!evaluate(&cond("raw_data.nope", Operator::Eq, Value::from("x")), None, &v));
        assert!(evaluate(&cond("raw_data.nope", Operator::Ne, Value::from("x")), None, &v));
        assert!(evaluate(
            &cond("raw_data.nope", Operator::NotIn, Value::List(vec![Value::from("x")])),
            None,
            &v
        ));
        assert!(!evaluate(
            &cond("raw_data.nope", Operator::In, Value::List(vec![Value::from("x")])),
            None,
            &v
        ));
    }

    #[test]
    fn contains_checks_list_membership() {
        let c = cond("raw_data.allowed_profiles", Operator::Contains, Value::from("strict"));
        assert!(evaluate(&c, None, &incident_value(&incident())));
    }

    #[test]
    fn gt_lt_are_false_on_non_numeric_operands() {
        let v = incident_value(&incident());
        let c = cond("incident_type", Operator::Gt, Value::from("firewall"));
        assert!(!evaluate(&c, None, &v));
    }

    #[test]
    fn regex_requires_a_compiled_pattern() {
        let c = cond("incident_type", Operator::Regex, Value::from("^fire.*$"));
        let re = compile_regex(&c).unwrap();
        assert!(evaluate(&c, re.as_ref(), &incident_value(&incident())));
    }

    #[test]
    fn invalid_regex_pattern_is_rejected_at_compile_time() {
        let c = cond("incident_type", Operator::Regex, Value::from("("));
        assert!(compile_regex(&c).is_err());
    }
}
