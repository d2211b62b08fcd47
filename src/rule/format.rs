//! `format` rule coercions.

use super::RuleError;
use crate::expression::{number, truthy};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;

/// Apply a format keyword, or treat `format` as a `{value}` template.
pub fn apply_format(format: &str, value: &JsonValue) -> Result<JsonValue, RuleError> {
    let formatted = match format {
        "uppercase" => JsonValue::String(stringify(value).to_uppercase()),
        "lowercase" => JsonValue::String(stringify(value).to_lowercase()),
        "trim" => JsonValue::String(stringify(value).trim().to_string()),
        "iso_date" => JsonValue::String(
            parse_date(value)?.to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
        "iso_date_only" => {
            JsonValue::String(parse_date(value)?.format("%Y-%m-%d").to_string())
        }
        "number" => to_number(value)?,
        "boolean" => JsonValue::Bool(to_boolean(value)),
        "string" => JsonValue::String(stringify(value)),
        template => JsonValue::String(template.replace("{value}", &stringify(value))),
    };
    Ok(formatted)
}

/// Text form of a value: strings as-is, everything else as JSON text.
pub fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_number(value: &JsonValue) -> Result<JsonValue, RuleError> {
    match value {
        JsonValue::Number(_) => Ok(value.clone()),
        JsonValue::Bool(b) => Ok(JsonValue::from(u8::from(*b))),
        JsonValue::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(number)
            .ok_or_else(|| RuleError::InvalidNumber(s.clone())),
        other => Err(RuleError::InvalidNumber(other.to_string())),
    }
}

fn to_boolean(value: &JsonValue) -> bool {
    match value {
        JsonValue::String(s) if s.eq_ignore_ascii_case("true") => true,
        JsonValue::String(s) if s.eq_ignore_ascii_case("false") => false,
        other => truthy(Some(other)),
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` and epoch milliseconds.
fn parse_date(value: &JsonValue) -> Result<DateTime<Utc>, RuleError> {
    let invalid = || RuleError::InvalidDate(stringify(value));

    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(invalid),
        JsonValue::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            for pattern in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, pattern) {
                    return Ok(dt.and_utc());
                }
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return date
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc())
                    .ok_or_else(invalid);
            }
            s.parse::<i64>()
                .ok()
                .and_then(DateTime::from_timestamp_millis)
                .ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_case_and_trim() {
        assert_eq!(apply_format("uppercase", &json!("abc")).unwrap(), json!("ABC"));
        assert_eq!(apply_format("lowercase", &json!("AbC")).unwrap(), json!("abc"));
        assert_eq!(apply_format("trim", &json!("  x ")).unwrap(), json!("x"));
    }

    #[test]
    fn test_dates() {
        assert_eq!(
            apply_format("iso_date", &json!("2024-03-05")).unwrap(),
            json!("2024-03-05T00:00:00.000Z")
        );
        assert_eq!(
            apply_format("iso_date", &json!("2024-03-05T10:20:30+02:00")).unwrap(),
            json!("2024-03-05T08:20:30.000Z")
        );
        assert_eq!(
            apply_format("iso_date_only", &json!("2024-03-05 23:10:00")).unwrap(),
            json!("2024-03-05")
        );
        assert_eq!(
            apply_format("iso_date", &json!(0)).unwrap(),
            json!("1970-01-01T00:00:00.000Z")
        );
        assert!(apply_format("iso_date", &json!("not a date")).is_err());
    }

    #[test]
    fn test_number_and_boolean() {
        assert_eq!(apply_format("number", &json!("42")).unwrap(), json!(42));
        assert_eq!(apply_format("number", &json!(" 2.5 ")).unwrap(), json!(2.5));
        assert!(apply_format("number", &json!("abc")).is_err());
        assert_eq!(apply_format("boolean", &json!("FALSE")).unwrap(), json!(false));
        assert_eq!(apply_format("boolean", &json!("yes")).unwrap(), json!(true));
        assert_eq!(apply_format("boolean", &json!(0)).unwrap(), json!(false));
    }

    #[test]
    fn test_string_and_template() {
        assert_eq!(apply_format("string", &json!(12)).unwrap(), json!("12"));
        assert_eq!(
            apply_format("Case #{value}", &json!(7)).unwrap(),
            json!("Case #7")
        );
    }
}
