//! Tokenizer for the expression language.

use super::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Dollar,
    Dot,
    Comma,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Arrow,
    Ident(String),
    Str(String),
    Num(f64),
    Op(BinaryOp),
    Not,
}

/// Binary operators usable in predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
}

/// A token with the byte offset it started at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let peek = |i: usize| chars.get(i).map(|(_, c)| *c);

    while i < chars.len() {
        let (pos, c) = chars[i];
        let single = |token: Token| Spanned { token, pos };

        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '$' => {
                tokens.push(single(Token::Dollar));
                i += 1;
            }
            '.' => {
                tokens.push(single(Token::Dot));
                i += 1;
            }
            ',' => {
                tokens.push(single(Token::Comma));
                i += 1;
            }
            ':' => {
                tokens.push(single(Token::Colon));
                i += 1;
            }
            '(' => {
                tokens.push(single(Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push(single(Token::RParen));
                i += 1;
            }
            '[' => {
                tokens.push(single(Token::LBracket));
                i += 1;
            }
            ']' => {
                tokens.push(single(Token::RBracket));
                i += 1;
            }
            '{' => {
                tokens.push(single(Token::LBrace));
                i += 1;
            }
            '}' => {
                tokens.push(single(Token::RBrace));
                i += 1;
            }
            '=' => match (peek(i + 1), peek(i + 2)) {
                (Some('>'), _) => {
                    tokens.push(single(Token::Arrow));
                    i += 2;
                }
                (Some('='), Some('=')) => {
                    tokens.push(single(Token::Op(BinaryOp::StrictEq)));
                    i += 3;
                }
                (Some('='), _) => {
                    tokens.push(single(Token::Op(BinaryOp::Eq)));
                    i += 2;
                }
                _ => return Err(ExpressionError::UnexpectedChar { ch: c, pos }),
            },
            '!' => match (peek(i + 1), peek(i + 2)) {
                (Some('='), Some('=')) => {
                    tokens.push(single(Token::Op(BinaryOp::StrictNotEq)));
                    i += 3;
                }
                (Some('='), _) => {
                    tokens.push(single(Token::Op(BinaryOp::NotEq)));
                    i += 2;
                }
                _ => {
                    tokens.push(single(Token::Not));
                    i += 1;
                }
            },
            '>' | '<' => {
                let or_equal = peek(i + 1) == Some('=');
                let op = match (c, or_equal) {
                    ('>', true) => BinaryOp::Gte,
                    ('>', false) => BinaryOp::Gt,
                    ('<', true) => BinaryOp::Lte,
                    _ => BinaryOp::Lt,
                };
                tokens.push(single(Token::Op(op)));
                i += if or_equal { 2 } else { 1 };
            }
            '&' | '|' => {
                if peek(i + 1) != Some(c) {
                    return Err(ExpressionError::UnexpectedChar { ch: c, pos });
                }
                let op = if c == '&' { BinaryOp::And } else { BinaryOp::Or };
                tokens.push(single(Token::Op(op)));
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match peek(i) {
                        None => return Err(ExpressionError::UnterminatedString { pos }),
                        Some(ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = peek(i + 1)
                                .ok_or(ExpressionError::UnterminatedString { pos })?;
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                            i += 2;
                        }
                        Some(ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(single(Token::Str(value)));
            }
            '-' | '0'..='9' => {
                let start = i;
                i += 1;
                while let Some(ch) = peek(i) {
                    if ch.is_ascii_digit() || ch == '.' {
                        // `1.map` is not a number; stop before a dot not followed by a digit
                        if ch == '.' && !peek(i + 1).is_some_and(|n| n.is_ascii_digit()) {
                            break;
                        }
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                let num = text
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::InvalidNumber { text, pos })?;
                tokens.push(single(Token::Num(num)));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while let Some(ch) = peek(i) {
                    if ch.is_alphanumeric() || ch == '_' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                tokens.push(single(Token::Ident(text)));
            }
            _ => return Err(ExpressionError::UnexpectedChar { ch: c, pos }),
        }
    }

    Ok(tokens)
}
