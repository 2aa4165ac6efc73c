//! Tokenizer for status expressions.

use crate::expr::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    /// `'text'`
    Str(String),
    /// `"column"`
    Column(String),
    Ident(String),
    Concat, // ||
    Eq,     // =
    NotEq,  // !=
    Lt,     // <
    Le,     // <=
    Gt,     // >
    Ge,     // >=
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token start in the source text.
    pub position: usize,
}

/// Splits `source` into tokens, ending with `Eof`.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if c.is_whitespace() {
            continue;
        }

        let kind = match c {
            '\'' | '"' => {
                let mut text = String::new();
                let mut closed = false;
                for (_, next) in chars.by_ref() {
                    if next == c {
                        closed = true;
                        break;
                    }
                    text.push(next);
                }
                if !closed {
                    let what = if c == '"' { "column reference" } else { "string literal" };
                    return Err(ExprError::parse(start, format!("unterminated {what}")));
                }
                if c == '"' {
                    TokenKind::Column(text)
                } else {
                    TokenKind::Str(text)
                }
            }
            '0'..='9' | '.' => {
                let mut end = start + c.len_utf8();
                while let Some((index, next)) = chars.peek().copied() {
                    if next.is_ascii_digit() || next == '.' {
                        end = index + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &source[start..end];
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ExprError::parse(start, format!("invalid number `{literal}`")))?;
                TokenKind::Number(value)
            }
            '|' if bytes.get(start + 1) == Some(&b'|') => {
                chars.next();
                TokenKind::Concat
            }
            '!' if bytes.get(start + 1) == Some(&b'=') => {
                chars.next();
                TokenKind::NotEq
            }
            '<' if bytes.get(start + 1) == Some(&b'=') => {
                chars.next();
                TokenKind::Le
            }
            '>' if bytes.get(start + 1) == Some(&b'=') => {
                chars.next();
                TokenKind::Ge
            }
            '=' => TokenKind::Eq,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            c if c.is_alphabetic() || c == '_' => {
                let mut end = start + c.len_utf8();
                while let Some((index, next)) = chars.peek().copied() {
                    if next.is_alphanumeric() || next == '_' {
                        end = index + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                TokenKind::Ident(source[start..end].to_string())
            }
            other => {
                return Err(ExprError::parse(
                    start,
                    format!("unexpected character `{other}`"),
                ));
            }
        };
        tokens.push(Token {
            kind,
            position: start,
        });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        position: source.len(),
    });
    Ok(tokens)
}
