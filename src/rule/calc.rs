//! Arithmetic for `calculate` rules.
//!
//! The expression is first filled in from `{value}` and `{field.path}`
//! placeholders, then checked against a character whitelist, and only then
//! evaluated by a small recursive-descent parser over `f64`.

use crate::path::get_path;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;

/// Regex for placeholders like {value} or {order.total}
static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_.\[\]$]+)\}").unwrap());

/// Deepest nesting of parentheses and unary signs.
const MAX_DEPTH: usize = 64;

/// Characters allowed after substitution.
static ALLOWED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d\s+\-*/%().]+$").unwrap());

/// Replace `{value}` with the rule's value and `{path}` with fields of the
/// source record. Unresolvable placeholders are left in place.
pub fn substitute(expression: &str, value: &JsonValue, source: &JsonValue) -> String {
    PLACEHOLDER_REGEX
        .replace_all(expression, |caps: &regex::Captures| {
            let name = &caps[1];
            let resolved = if name == "value" {
                Some(value)
            } else {
                get_path(source, name)
            };
            match resolved {
                Some(JsonValue::String(s)) => s.clone(),
                Some(JsonValue::Number(n)) => n.to_string(),
                Some(JsonValue::Bool(b)) => (if *b { "1" } else { "0" }).to_string(),
                _ => caps[0].to_string(),
            }
        })
        .to_string()
}

/// Whether a substituted expression only contains arithmetic characters.
pub fn is_whitelisted(expression: &str) -> bool {
    ALLOWED_REGEX.is_match(expression)
}

/// Evaluate a whitelisted arithmetic expression.
pub fn evaluate_arithmetic(expression: &str) -> Result<f64, CalcError> {
    let tokens = lex(expression)?;
    let mut parser = Calc {
        tokens,
        pos: 0,
        depth: 0,
    };
    let result = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(CalcError::Syntax(expression.to_string()));
    }
    if !result.is_finite() {
        return Err(CalcError::NonFinite);
    }
    Ok(result)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Tok {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Open,
    Close,
}

fn lex(input: &str) -> Result<Vec<Tok>, CalcError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let tok = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => Tok::Plus,
            '-' => Tok::Minus,
            '*' => Tok::Star,
            '/' => Tok::Slash,
            '%' => Tok::Percent,
            '(' => Tok::Open,
            ')' => Tok::Close,
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num = text
                    .parse::<f64>()
                    .map_err(|_| CalcError::Syntax(text.clone()))?;
                tokens.push(Tok::Num(num));
                continue;
            }
            other => return Err(CalcError::Syntax(other.to_string())),
        };
        tokens.push(tok);
        i += 1;
    }

    Ok(tokens)
}

struct Calc {
    tokens: Vec<Tok>,
    pos: usize,
    depth: usize,
}

impl Calc {
    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).copied();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn peek(&self) -> Option<Tok> {
        self.tokens.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut acc = self.term()?;
        while let Some(op @ (Tok::Plus | Tok::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == Tok::Plus { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut acc = self.factor()?;
        while let Some(op @ (Tok::Star | Tok::Slash | Tok::Percent)) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            acc = match op {
                Tok::Star => acc * rhs,
                _ if rhs == 0.0 => return Err(CalcError::DivisionByZero),
                Tok::Slash => acc / rhs,
                _ => acc % rhs,
            };
        }
        Ok(acc)
    }

    fn factor(&mut self) -> Result<f64, CalcError> {
        if self.depth >= MAX_DEPTH {
            return Err(CalcError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let result = self.operand();
        self.depth -= 1;
        result
    }

    fn operand(&mut self) -> Result<f64, CalcError> {
        match self.next() {
            Some(Tok::Num(n)) => Ok(n),
            Some(Tok::Minus) => Ok(-self.factor()?),
            Some(Tok::Plus) => self.factor(),
            Some(Tok::Open) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Tok::Close) => Ok(inner),
                    _ => Err(CalcError::UnbalancedParens),
                }
            }
            Some(other) => Err(CalcError::Syntax(format!("{:?}", other))),
            None => Err(CalcError::UnexpectedEnd),
        }
    }
}

/// Arithmetic evaluation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalcError {
    #[error("Syntax error near '{0}'")]
    Syntax(String),

    #[error("Unbalanced parentheses")]
    UnbalancedParens,

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Result is not a finite number")]
    NonFinite,

    #[error("Expression nests deeper than {0} levels")]
    TooDeep(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_precedence() {
        assert_eq!(evaluate_arithmetic("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate_arithmetic("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate_arithmetic("10 - 4 - 3").unwrap(), 3.0);
        assert_eq!(evaluate_arithmetic("7 % 4").unwrap(), 3.0);
        assert_eq!(evaluate_arithmetic("-3 * -2").unwrap(), 6.0);
        assert_eq!(evaluate_arithmetic("1.5 / 0.5").unwrap(), 3.0);
    }

    #[test]
    fn test_errors() {
        assert_eq!(evaluate_arithmetic("1 / 0"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate_arithmetic("(1 + 2"), Err(CalcError::UnbalancedParens));
        assert_eq!(evaluate_arithmetic("1 +"), Err(CalcError::UnexpectedEnd));
        assert!(evaluate_arithmetic("1 2").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let signs = format!("{}1", "-".repeat(500_000));
        assert!(is_whitelisted(&signs));
        assert_eq!(evaluate_arithmetic(&signs), Err(CalcError::TooDeep(MAX_DEPTH)));

        let parens = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert_eq!(evaluate_arithmetic(&parens), Err(CalcError::TooDeep(MAX_DEPTH)));

        let shallow = format!("{}2{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(evaluate_arithmetic(&shallow).unwrap(), 2.0);
        assert_eq!(evaluate_arithmetic("--3").unwrap(), 3.0);
    }

    #[test]
    fn test_substitute() {
        let source = json!({"order": {"qty": 3, "note": "x"}});
        assert_eq!(substitute("{value} * {order.qty}", &json!(2.5), &source), "2.5 * 3");
        assert_eq!(substitute("{value} + 1", &json!("41"), &source), "41 + 1");
        assert_eq!(substitute("{missing} + 1", &json!(1), &source), "{missing} + 1");
    }

    #[test]
    fn test_whitelist() {
        assert!(is_whitelisted("(2.5 * 3) - 1 % 2"));
        assert!(!is_whitelisted("{missing} + 1"));
        assert!(!is_whitelisted("x * 2"));
        assert!(!is_whitelisted("process.exit()"));
    }
}
