//! Conditions for `conditional` rules.

use crate::config::{ConditionOperator, RuleCondition};
use crate::path::get_path;
use serde_json::Value as JsonValue;

/// Resolve a condition against the source record.
pub fn check_condition(source: &JsonValue, condition: &RuleCondition) -> bool {
    let actual = get_path(source, &condition.field).filter(|v| !v.is_null());
    let expected = condition.value.as_ref();

    match condition.operator {
        ConditionOperator::Exists => actual.is_some(),
        ConditionOperator::Equals => values_equal(actual, expected),
        ConditionOperator::NotEquals => !values_equal(actual, expected),
        ConditionOperator::GreaterThan => {
            compare_numbers(actual, expected).is_some_and(|(a, b)| a > b)
        }
        ConditionOperator::LessThan => {
            compare_numbers(actual, expected).is_some_and(|(a, b)| a < b)
        }
        ConditionOperator::Contains => match (actual, expected) {
            (Some(JsonValue::Array(items)), Some(needle)) => {
                items.iter().any(|item| values_equal(Some(item), Some(needle)))
            }
            (Some(JsonValue::String(s)), Some(needle)) => s.contains(&as_text(needle)),
            (Some(v), Some(needle)) => v.to_string().contains(&as_text(needle)),
            _ => false,
        },
    }
}

fn values_equal(actual: Option<&JsonValue>, expected: Option<&JsonValue>) -> bool {
    match (actual, expected) {
        (Some(JsonValue::Number(a)), Some(JsonValue::Number(b))) => a.as_f64() == b.as_f64(),
        (Some(a), Some(b)) => a == b,
        (None, None) | (None, Some(JsonValue::Null)) => true,
        _ => false,
    }
}

fn compare_numbers(actual: Option<&JsonValue>, expected: Option<&JsonValue>) -> Option<(f64, f64)> {
    Some((as_number(actual?)?, as_number(expected?)?))
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn condition(field: &str, operator: ConditionOperator, value: Option<JsonValue>) -> RuleCondition {
        RuleCondition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn test_equals() {
        let source = json!({"type": "tip", "score": 5});
        assert!(check_condition(&source, &condition("type", ConditionOperator::Equals, Some(json!("tip")))));
        assert!(check_condition(&source, &condition("score", ConditionOperator::Equals, Some(json!(5.0)))));
        assert!(!check_condition(&source, &condition("type", ConditionOperator::Equals, Some(json!("case")))));
        assert!(check_condition(&source, &condition("type", ConditionOperator::NotEquals, Some(json!("case")))));
    }

    #[test]
    fn test_ordering() {
        let source = json!({"score": 70, "age": "17"});
        assert!(check_condition(&source, &condition("score", ConditionOperator::GreaterThan, Some(json!(50)))));
        assert!(!check_condition(&source, &condition("score", ConditionOperator::LessThan, Some(json!(50)))));
        assert!(check_condition(&source, &condition("age", ConditionOperator::LessThan, Some(json!(18)))));
        assert!(!check_condition(&source, &condition("missing", ConditionOperator::GreaterThan, Some(json!(0)))));
    }

    #[test]
    fn test_contains() {
        let source = json!({"message": "An error occurred", "tags": ["urgent", "fraud"]});
        assert!(check_condition(&source, &condition("message", ConditionOperator::Contains, Some(json!("error")))));
        assert!(check_condition(&source, &condition("tags", ConditionOperator::Contains, Some(json!("fraud")))));
        assert!(!check_condition(&source, &condition("tags", ConditionOperator::Contains, Some(json!("spam")))));
    }

    #[test]
    fn test_exists() {
        let source = json!({"token": "abc", "empty": null});
        assert!(check_condition(&source, &condition("token", ConditionOperator::Exists, None)));
        assert!(!check_condition(&source, &condition("empty", ConditionOperator::Exists, None)));
        assert!(!check_condition(&source, &condition("other", ConditionOperator::Exists, None)));
    }
}
