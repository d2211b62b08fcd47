//! Recursive-descent parser producing the expression AST.

use super::lexer::{tokenize, BinaryOp, Spanned, Token};
use super::ExpressionError;
use serde_json::Value as JsonValue;

/// Parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// `$`, the evaluation context
    Root,
    /// A lambda parameter
    Var(String),
    Property {
        target: Box<Expr>,
        name: String,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        target: Box<Expr>,
        method: Method,
    },
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Value(JsonValue),
    Undefined,
}

/// Single-parameter lambda, `v => body`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub param: String,
    pub body: Box<Expr>,
}

/// Array methods.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    Map(Lambda),
    Filter(Lambda),
    Find(Lambda),
    Sort(Option<Lambda>),
    Slice {
        start: Box<Expr>,
        end: Option<Box<Expr>>,
    },
    Length,
    First,
    Last,
    Flat,
    Reverse,
}

/// Deepest AST nesting accepted, counting groups, negations and postfix links.
const MAX_DEPTH: usize = 64;

/// Parse an expression string into an AST.
pub fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExpressionError::Empty);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
        depth: 0,
    };
    let expr = parser.parse_expr()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(ExpressionError::UnexpectedToken {
            found: format!("{:?}", extra.token),
            pos: extra.pos,
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|s| s.pos).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self) -> ExpressionError {
        match self.tokens.get(self.pos) {
            Some(s) => ExpressionError::UnexpectedToken {
                found: format!("{:?}", s.token),
                pos: s.pos,
            },
            None => ExpressionError::UnexpectedEnd,
        }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExpressionError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        Ok(())
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ExpressionError> {
        self.enter()?;
        let expr = self.parse_or()?;
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.depth;
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Op(BinaryOp::Or)) {
            self.pos += 1;
            self.enter()?;
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.depth;
        let mut lhs = self.parse_comparison()?;
        while self.peek() == Some(&Token::Op(BinaryOp::And)) {
            self.pos += 1;
            self.enter()?;
            let rhs = self.parse_comparison()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        let lhs = self.parse_unary()?;
        match self.peek() {
            Some(Token::Op(op)) if !matches!(op, BinaryOp::And | BinaryOp::Or) => {
                let op = *op;
                self.pos += 1;
                let rhs = self.parse_unary()?;
                Ok(binary(op, lhs, rhs))
            }
            _ => Ok(lhs),
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.enter()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.depth;
        let mut expr = self.parse_primary()?;

        loop {
            if matches!(self.peek(), Some(Token::Dot | Token::LBracket)) {
                self.enter()?;
            }
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let name = match self.advance() {
                        Some(Token::Ident(name)) => name,
                        Some(_) => {
                            self.pos -= 1;
                            return Err(self.unexpected());
                        }
                        None => return Err(ExpressionError::UnexpectedEnd),
                    };
                    if self.peek() == Some(&Token::LParen) {
                        let method = self.parse_call(&name)?;
                        expr = Expr::Call {
                            target: Box::new(expr),
                            method,
                        };
                    } else {
                        expr = Expr::Property {
                            target: Box::new(expr),
                            name,
                        };
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.parse_expr()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => {
                    self.depth = base;
                    return Ok(expr);
                }
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let pos = self.offset();
        match self.advance() {
            Some(Token::Dollar) => Ok(Expr::Root),
            Some(Token::Num(n)) => Ok(Expr::Literal(Literal::Value(number(n)))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Literal::Value(JsonValue::String(s)))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::Literal(Literal::Value(JsonValue::Bool(true))),
                "false" => Expr::Literal(Literal::Value(JsonValue::Bool(false))),
                "null" => Expr::Literal(Literal::Value(JsonValue::Null)),
                "undefined" => Expr::Literal(Literal::Undefined),
                _ => Expr::Var(name),
            }),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBrace) => self.parse_object(),
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                while self.peek() != Some(&Token::RBracket) {
                    items.push(self.parse_expr()?);
                    if self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                self.expect(Token::RBracket)?;
                Ok(Expr::Array(items))
            }
            Some(other) => Err(ExpressionError::UnexpectedToken {
                found: format!("{:?}", other),
                pos,
            }),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn parse_object(&mut self) -> Result<Expr, ExpressionError> {
        let mut fields = Vec::new();
        while self.peek() != Some(&Token::RBrace) {
            let key = match self.advance() {
                Some(Token::Str(key)) | Some(Token::Ident(key)) => key,
                Some(_) => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
                None => return Err(ExpressionError::UnexpectedEnd),
            };
            self.expect(Token::Colon)?;
            let value = self.parse_expr()?;
            fields.push((key, value));
            if self.peek() == Some(&Token::Comma) {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.expect(Token::RBrace)?;
        Ok(Expr::Object(fields))
    }

    fn parse_call(&mut self, name: &str) -> Result<Method, ExpressionError> {
        let pos = self.offset();
        self.expect(Token::LParen)?;

        let method = match name {
            "map" => Method::Map(self.parse_lambda()?),
            "filter" => Method::Filter(self.parse_lambda()?),
            "find" => Method::Find(self.parse_lambda()?),
            "sort" => {
                if self.peek() == Some(&Token::RParen) {
                    Method::Sort(None)
                } else {
                    Method::Sort(Some(self.parse_lambda()?))
                }
            }
            "slice" => {
                let start = Box::new(self.parse_expr()?);
                let end = if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    Some(Box::new(self.parse_expr()?))
                } else {
                    None
                };
                Method::Slice { start, end }
            }
            "length" => Method::Length,
            "first" => Method::First,
            "last" => Method::Last,
            "flat" => Method::Flat,
            "reverse" => Method::Reverse,
            other => {
                return Err(ExpressionError::UnknownMethod {
                    name: other.to_string(),
                    pos,
                })
            }
        };

        self.expect(Token::RParen)?;
        Ok(method)
    }

    /// `v => body` or `(v) => body`.
    fn parse_lambda(&mut self) -> Result<Lambda, ExpressionError> {
        let param = match (self.peek(), self.peek_at(1), self.peek_at(2)) {
            (Some(Token::Ident(name)), Some(Token::Arrow), _) => {
                let name = name.clone();
                self.pos += 2;
                name
            }
            (Some(Token::LParen), Some(Token::Ident(name)), Some(Token::RParen)) => {
                let name = name.clone();
                self.pos += 3;
                self.expect(Token::Arrow)?;
                name
            }
            _ => {
                return Err(ExpressionError::ExpectedLambda { pos: self.offset() });
            }
        };
        let body = self.parse_expr()?;
        Ok(Lambda {
            param,
            body: Box::new(body),
        })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

/// Integral values become JSON integers so they compare equal to parsed input.
pub(crate) fn number(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_path() {
        let expr = parse("$.a.b").unwrap();
        assert_eq!(
            expr,
            Expr::Property {
                target: Box::new(Expr::Property {
                    target: Box::new(Expr::Root),
                    name: "a".into()
                }),
                name: "b".into()
            }
        );
    }

    #[test]
    fn test_parse_map_with_template() {
        let expr = parse(r#"$.items.map(v => { "id": v.id, name: v.fullName })"#).unwrap();
        match expr {
            Expr::Call {
                method: Method::Map(lambda),
                ..
            } => {
                assert_eq!(lambda.param, "v");
                assert!(matches!(*lambda.body, Expr::Object(ref f) if f.len() == 2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_filter_predicate() {
        let expr = parse("$.items.filter((x) => x.score >= 5 && x.active == true)").unwrap();
        assert!(matches!(
            expr,
            Expr::Call {
                method: Method::Filter(_),
                ..
            }
        ));
    }

    #[test]
    fn test_bare_length_is_property() {
        assert!(matches!(parse("$.items.length").unwrap(), Expr::Property { .. }));
        assert!(matches!(
            parse("$.items.length()").unwrap(),
            Expr::Call {
                method: Method::Length,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_method() {
        assert!(matches!(
            parse("$.items.reduce(v => v)"),
            Err(ExpressionError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn test_map_requires_lambda() {
        assert!(matches!(
            parse("$.items.map($.x)"),
            Err(ExpressionError::ExpectedLambda { .. })
        ));
    }

    #[test]
    fn test_trailing_tokens() {
        assert!(parse("$.a $.b").is_err());
        assert!(matches!(parse("   "), Err(ExpressionError::Empty)));
        assert!(matches!(parse("$.a.map("), Err(_)));
    }

    #[test]
    fn test_nesting_limit() {
        let too_deep = [
            format!("{}$", "!".repeat(200_000)),
            format!("{}${}", "(".repeat(10_000), ")".repeat(10_000)),
            format!("$.{}", vec!["a"; 10_000].join(".")),
            vec!["$.a"; 10_000].join(" || "),
            format!("{}1{}", "[".repeat(10_000), "]".repeat(10_000)),
        ];
        for input in &too_deep {
            assert!(matches!(parse(input), Err(ExpressionError::TooDeep(MAX_DEPTH))));
        }

        assert!(parse(&format!("{}$.ok", "!".repeat(10))).is_ok());
        assert!(parse(&format!("$.{}", vec!["a"; 20].join("."))).is_ok());
        assert!(parse("$.a || $.b || $.c && !($.d == 1)").is_ok());
    }
}
