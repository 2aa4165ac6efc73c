//! Recursive-descent parser for status expressions.
//!
//! Precedence, lowest first: `||`, comparison (single, non-chaining),
//! `+ -`, `* /`, unary minus, atoms.

use crate::expr::ast::{BinaryOp, Expr};
use crate::expr::lexer::{tokenize, Token, TokenKind};
use crate::expr::ExprError;
use crate::model::value::Value;

/// Deepest syntax tree the parser builds. Every operator and every nested
/// `(`, call or unary minus counts one level.
const MAX_DEPTH: usize = 200;

/// Parses `source` into a syntax tree. Returns `None` for blank input.
pub fn parse(source: &str) -> Result<Option<Expr>, ExprError> {
    let tokens = tokenize(source)?;
    if matches!(tokens.first().map(|t| &t.kind), Some(TokenKind::Eof)) {
        return Ok(None);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_concat()?;
    parser.expect_eof()?;
    Ok(Some(expr))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        // The token list always ends with Eof and `advance` never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect_eof(&self) -> Result<(), ExprError> {
        let token = self.current();
        match token.kind {
            TokenKind::Eof => Ok(()),
            _ => Err(ExprError::parse(
                token.position,
                format!("unexpected {} after end of expression", describe(&token.kind)),
            )),
        }
    }

    /// Enters one tree level; fails once the tree would exceed `MAX_DEPTH`.
    fn descend(&mut self) -> Result<(), ExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(ExprError::parse(
                self.current().position,
                format!("expression nests deeper than {MAX_DEPTH} levels"),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn parse_concat(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_comparison()?;
        let entered = self.depth;
        while self.current().kind == TokenKind::Concat {
            self.descend()?;
            self.advance();
            let right = self.parse_comparison()?;
            left = binary(BinaryOp::Concat, left, right);
        }
        self.depth = entered;
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_additive()?;
        let Some(op) = comparison_op(&self.current().kind) else {
            return Ok(left);
        };
        self.descend()?;
        self.advance();
        let right = self.parse_additive()?;
        self.depth -= 1;

        let next = self.current();
        if comparison_op(&next.kind).is_some() {
            return Err(ExprError::parse(
                next.position,
                "comparison operators cannot be chained; use parentheses",
            ));
        }
        Ok(binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_multiplicative()?;
        let entered = self.depth;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => {
                    self.depth = entered;
                    return Ok(left);
                }
            };
            self.descend()?;
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        let entered = self.depth;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => {
                    self.depth = entered;
                    return Ok(left);
                }
            };
            self.descend()?;
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.current().kind == TokenKind::Minus {
            self.descend()?;
            self.advance();
            let operand = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Negate(Box::new(operand)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, ExprError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Number(value) => Ok(Expr::Literal(Value::Number(value))),
            TokenKind::Str(text) => Ok(Expr::Literal(Value::Text(text))),
            TokenKind::Column(name) => Ok(Expr::Column(name)),
            TokenKind::Ident(name) => {
                let open = self.advance();
                if open.kind != TokenKind::LParen {
                    return Err(ExprError::parse(
                        open.position,
                        format!("expected `(` after function name `{name}`"),
                    ));
                }
                self.descend()?;
                let args = self.parse_arguments()?;
                self.depth -= 1;
                Ok(Expr::Call {
                    name: name.to_lowercase(),
                    args,
                    position: token.position,
                })
            }
            TokenKind::LParen => {
                self.descend()?;
                let inner = self.parse_concat()?;
                self.depth -= 1;
                self.expect_close()?;
                Ok(inner)
            }
            other => Err(ExprError::parse(
                token.position,
                format!("expected a value, found {}", describe(&other)),
            )),
        }
    }

    /// Parses call arguments after the opening parenthesis.
    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.current().kind == TokenKind::RParen {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_concat()?);
            match self.current().kind {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RParen => {
                    self.advance();
                    return Ok(args);
                }
                _ => {
                    let token = self.current();
                    return Err(ExprError::parse(
                        token.position,
                        format!("expected `,` or `)`, found {}", describe(&token.kind)),
                    ));
                }
            }
        }
    }

    fn expect_close(&mut self) -> Result<(), ExprError> {
        let token = self.advance();
        if token.kind == TokenKind::RParen {
            Ok(())
        } else {
            Err(ExprError::parse(
                token.position,
                format!("expected `)`, found {}", describe(&token.kind)),
            ))
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn comparison_op(kind: &TokenKind) -> Option<BinaryOp> {
    match kind {
        TokenKind::Eq => Some(BinaryOp::Eq),
        TokenKind::NotEq => Some(BinaryOp::NotEq),
        TokenKind::Lt => Some(BinaryOp::Lt),
        TokenKind::Le => Some(BinaryOp::Le),
        TokenKind::Gt => Some(BinaryOp::Gt),
        TokenKind::Ge => Some(BinaryOp::Ge),
        _ => None,
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Number(value) => format!("number {value}"),
        TokenKind::Str(_) => "string literal".to_string(),
        TokenKind::Column(name) => format!("column \"{name}\""),
        TokenKind::Ident(name) => format!("identifier `{name}`"),
        TokenKind::Eof => "end of expression".to_string(),
        TokenKind::Concat => "`||`".to_string(),
        TokenKind::Eq => "`=`".to_string(),
        TokenKind::NotEq => "`!=`".to_string(),
        TokenKind::Lt => "`<`".to_string(),
        TokenKind::Le => "`<=`".to_string(),
        TokenKind::Gt => "`>`".to_string(),
        TokenKind::Ge => "`>=`".to_string(),
        TokenKind::Plus => "`+`".to_string(),
        TokenKind::Minus => "`-`".to_string(),
        TokenKind::Star => "`*`".to_string(),
        TokenKind::Slash => "`/`".to_string(),
        TokenKind::LParen => "`(`".to_string(),
        TokenKind::RParen => "`)`".to_string(),
        TokenKind::Comma => "`,`".to_string(),
    }
}
