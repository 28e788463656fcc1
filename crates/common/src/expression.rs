// HDB - Hardware Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Compiled breakpoint guard expressions.
//!
//! Guards are integer expressions over scoped symbol names, compiled once
//! when a breakpoint is armed and evaluated against a symbol environment on
//! every simulation tick. The evaluation engine only relies on two
//! operations: [`DebugExpression::symbols`] to learn which values it must
//! bind, and [`DebugExpression::eval`] to compute the guard. Truth is
//! non-zero.
//!
//! The language is C-flavored: `|| && | ^ & == != < <= > >= << >> + - * / %`
//! plus unary `! ~ -`, parentheses, decimal/`0x`/`0b` literals, and the word
//! forms `and`/`or`/`not` (guard composition joins the DB condition and the
//! user condition with `and`). Symbol names may contain `.` separators and
//! `[index]` selects, matching scoped RTL names.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while compiling a guard expression.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExpressionError {
    /// A character that cannot start any token.
    #[error("unexpected character `{0}` at offset {1}")]
    UnexpectedChar(char, usize),
    /// A malformed numeric literal.
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    /// The expression ended where a value or operator was required.
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    /// A token that does not fit the grammar at its position.
    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),
}

/// Normalize an expression by replacing any contiguous whitespace with a
/// single space.
pub fn normalize_expression(expr: &str) -> String {
    expr.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    /// Binding power; higher binds tighter. Mirrors C precedence.
    fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::BitOr => 3,
            Self::BitXor => 4,
            Self::BitAnd => 5,
            Self::Eq | Self::Ne => 6,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 7,
            Self::Shl | Self::Shr => 8,
            Self::Add | Self::Sub => 9,
            Self::Mul | Self::Div | Self::Rem => 10,
        }
    }

    fn apply(self, lhs: i64, rhs: i64) -> Option<i64> {
        let v = match self {
            Self::Or => i64::from(lhs != 0 || rhs != 0),
            Self::And => i64::from(lhs != 0 && rhs != 0),
            Self::BitOr => lhs | rhs,
            Self::BitXor => lhs ^ rhs,
            Self::BitAnd => lhs & rhs,
            Self::Eq => i64::from(lhs == rhs),
            Self::Ne => i64::from(lhs != rhs),
            Self::Lt => i64::from(lhs < rhs),
            Self::Le => i64::from(lhs <= rhs),
            Self::Gt => i64::from(lhs > rhs),
            Self::Ge => i64::from(lhs >= rhs),
            Self::Shl => lhs.wrapping_shl(rhs as u32),
            Self::Shr => lhs.wrapping_shr(rhs as u32),
            Self::Add => lhs.wrapping_add(rhs),
            Self::Sub => lhs.wrapping_sub(rhs),
            Self::Mul => lhs.wrapping_mul(rhs),
            Self::Div => return lhs.checked_div(rhs),
            Self::Rem => return lhs.checked_rem(rhs),
        };
        Some(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Not,
    BitNot,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(i64),
    Symbol(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, values: &HashMap<String, i64>) -> Option<i64> {
        match self {
            Self::Literal(v) => Some(*v),
            Self::Symbol(name) => values.get(name).copied(),
            Self::Unary(op, inner) => {
                let v = inner.eval(values)?;
                Some(match op {
                    UnaryOp::Not => i64::from(v == 0),
                    UnaryOp::BitNot => !v,
                    UnaryOp::Neg => v.wrapping_neg(),
                })
            }
            Self::Binary(op, lhs, rhs) => op.apply(lhs.eval(values)?, rhs.eval(values)?),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(i64),
    Ident(String),
    Op(BinaryOp),
    Bang,
    Tilde,
    Minus,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Ident(s) => write!(f, "{s}"),
            Self::Op(_) => write!(f, "<op>"),
            Self::Bang => write!(f, "!"),
            Self::Tilde => write!(f, "~"),
            Self::Minus => write!(f, "-"),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Op(BinaryOp::Add));
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Op(BinaryOp::Mul));
                i += 1;
            }
            '/' => {
                tokens.push(Token::Op(BinaryOp::Div));
                i += 1;
            }
            '%' => {
                tokens.push(Token::Op(BinaryOp::Rem));
                i += 1;
            }
            '^' => {
                tokens.push(Token::Op(BinaryOp::BitXor));
                i += 1;
            }
            '~' => {
                tokens.push(Token::Tilde);
                i += 1;
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Token::Op(BinaryOp::And));
                    i += 2;
                } else {
                    tokens.push(Token::Op(BinaryOp::BitAnd));
                    i += 1;
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Token::Op(BinaryOp::Or));
                    i += 2;
                } else {
                    tokens.push(Token::Op(BinaryOp::BitOr));
                    i += 1;
                }
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Op(BinaryOp::Eq));
                    i += 2;
                } else {
                    return Err(ExpressionError::UnexpectedChar('=', i));
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Op(BinaryOp::Ne));
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '<' => match bytes.get(i + 1) {
                Some(b'=') => {
                    tokens.push(Token::Op(BinaryOp::Le));
                    i += 2;
                }
                Some(b'<') => {
                    tokens.push(Token::Op(BinaryOp::Shl));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Op(BinaryOp::Lt));
                    i += 1;
                }
            },
            '>' => match bytes.get(i + 1) {
                Some(b'=') => {
                    tokens.push(Token::Op(BinaryOp::Ge));
                    i += 2;
                }
                Some(b'>') => {
                    tokens.push(Token::Op(BinaryOp::Shr));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Op(BinaryOp::Gt));
                    i += 1;
                }
            },
            '0'..='9' => {
                let start = i;
                while i < bytes.len() && (bytes[i] as char).is_ascii_alphanumeric() {
                    i += 1;
                }
                let text = &source[start..i];
                let value = if let Some(hex) = text.strip_prefix("0x").or(text.strip_prefix("0X")) {
                    i64::from_str_radix(hex, 16)
                } else if let Some(bin) = text.strip_prefix("0b").or(text.strip_prefix("0B")) {
                    i64::from_str_radix(bin, 2)
                } else {
                    text.parse()
                };
                let value =
                    value.map_err(|_| ExpressionError::InvalidNumber(text.to_string()))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                // scoped names: segments joined by `.`, optional `[index]`
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.' {
                        i += 1;
                    } else if c == '[' {
                        let close = bytes[i..].iter().position(|&b| b == b']');
                        match close {
                            Some(off)
                                if off > 1
                                    && bytes[i + 1..i + off].iter().all(u8::is_ascii_digit) =>
                            {
                                i += off + 1;
                            }
                            _ => break,
                        }
                    } else {
                        break;
                    }
                }
                let text = &source[start..i];
                match text {
                    "and" => tokens.push(Token::Op(BinaryOp::And)),
                    "or" => tokens.push(Token::Op(BinaryOp::Or)),
                    "not" => tokens.push(Token::Bang),
                    _ => tokens.push(Token::Ident(text.to_string())),
                }
            }
            other => return Err(ExpressionError::UnexpectedChar(other, i)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_expr(&mut self, min_prec: u8) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.peek_binary_op() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            // left-associative: the right side must bind strictly tighter
            let rhs = self.parse_expr(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        match self.peek() {
            Some(Token::Op(op)) => Some(*op),
            Some(Token::Minus) => Some(BinaryOp::Sub),
            _ => None,
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek() {
            Some(Token::Bang) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            Some(Token::Tilde) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::BitNot, Box::new(self.parse_unary()?)))
            }
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.next() {
            Some(Token::Number(v)) => Ok(Expr::Literal(v)),
            Some(Token::Ident(name)) => Ok(Expr::Symbol(name)),
            Some(Token::LParen) => {
                let inner = self.parse_expr(0)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(token) => Err(ExpressionError::UnexpectedToken(token.to_string())),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            Some(token) => Err(ExpressionError::UnexpectedToken(token.to_string())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

/// A guard expression compiled from its textual form.
///
/// Compilation collects the set of referenced symbol names so the evaluation
/// engine knows which values to bind before calling [`eval`](Self::eval).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DebugExpression {
    source: String,
    root: Expr,
    symbols: HashSet<String>,
}

impl DebugExpression {
    /// Compile an expression. An empty (or all-whitespace) source compiles to
    /// the constant `1`, i.e. an always-true guard.
    pub fn new(source: impl Into<String>) -> Result<Self, ExpressionError> {
        let source = normalize_expression(&source.into());
        let root = if source.is_empty() {
            Expr::Literal(1)
        } else {
            let tokens = tokenize(&source)?;
            let mut parser = Parser { tokens, pos: 0 };
            let root = parser.parse_expr(0)?;
            if let Some(trailing) = parser.next() {
                return Err(ExpressionError::UnexpectedToken(trailing.to_string()));
            }
            root
        };
        let mut symbols = HashSet::new();
        collect_symbols(&root, &mut symbols);
        Ok(Self { source, root, symbols })
    }

    /// The normalized textual form this expression was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Symbol names the environment must bind for evaluation to succeed.
    pub fn symbols(&self) -> &HashSet<String> {
        &self.symbols
    }

    /// Evaluate against a symbol environment. Returns `None` when a
    /// referenced symbol is unbound or the arithmetic is undefined
    /// (division by zero).
    pub fn eval(&self, values: &HashMap<String, i64>) -> Option<i64> {
        self.root.eval(values)
    }

    /// Evaluate as a guard: non-zero is true.
    pub fn eval_bool(&self, values: &HashMap<String, i64>) -> Option<bool> {
        self.eval(values).map(|v| v != 0)
    }
}

impl TryFrom<String> for DebugExpression {
    type Error = ExpressionError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        Self::new(source)
    }
}

impl From<DebugExpression> for String {
    fn from(expr: DebugExpression) -> Self {
        expr.source
    }
}

fn collect_symbols(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Symbol(name) => {
            out.insert(name.clone());
        }
        Expr::Unary(_, inner) => collect_symbols(inner, out),
        Expr::Binary(_, lhs, rhs) => {
            collect_symbols(lhs, out);
            collect_symbols(rhs, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str, values: &[(&str, i64)]) -> Option<i64> {
        let expr = DebugExpression::new(source).unwrap();
        let env: HashMap<_, _> =
            values.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        expr.eval(&env)
    }

    #[test]
    fn test_constants() {
        assert_eq!(eval("1", &[]), Some(1));
        assert_eq!(eval("0x10", &[]), Some(16));
        assert_eq!(eval("0b101", &[]), Some(5));
        assert_eq!(eval("", &[]), Some(1));
        assert_eq!(eval("   ", &[]), Some(1));
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1 + 2 * 3", &[]), Some(7));
        assert_eq!(eval("(1 + 2) * 3", &[]), Some(9));
        assert_eq!(eval("2 < 3 == 1", &[]), Some(1));
        assert_eq!(eval("1 | 2 & 3", &[]), Some(3));
        assert_eq!(eval("1 << 2 + 1", &[]), Some(8));
    }

    #[test]
    fn test_left_associativity() {
        assert_eq!(eval("10 - 3 - 2", &[]), Some(5));
        assert_eq!(eval("16 / 4 / 2", &[]), Some(2));
    }

    #[test]
    fn test_unary() {
        assert_eq!(eval("!0", &[]), Some(1));
        assert_eq!(eval("!5", &[]), Some(0));
        assert_eq!(eval("~0", &[]), Some(-1));
        assert_eq!(eval("-3 + 5", &[]), Some(2));
        assert_eq!(eval("not 0", &[]), Some(1));
    }

    #[test]
    fn test_word_operators() {
        assert_eq!(eval("1 and 1", &[]), Some(1));
        assert_eq!(eval("1 and 0", &[]), Some(0));
        assert_eq!(eval("0 or 1", &[]), Some(1));
        // guard composition shape: (db condition) and (user condition)
        assert_eq!(eval("a > 0 and b < 3", &[("a", 1), ("b", 2)]), Some(1));
        assert_eq!(eval("a > 0 and b < 3", &[("a", 1), ("b", 3)]), Some(0));
    }

    #[test]
    fn test_symbols_collected() {
        let expr = DebugExpression::new("a + b.c * data[2]").unwrap();
        let mut names: Vec<_> = expr.symbols().iter().cloned().collect();
        names.sort();
        assert_eq!(names, ["a", "b.c", "data[2]"]);
    }

    #[test]
    fn test_scoped_symbol_eval() {
        assert_eq!(eval("cpu.alu.busy == 0", &[("cpu.alu.busy", 0)]), Some(1));
        assert_eq!(eval("data[3] != 0", &[("data[3]", 4)]), Some(1));
    }

    #[test]
    fn test_unbound_symbol() {
        assert_eq!(eval("a + 1", &[]), None);
        assert_eq!(eval("a && b", &[("a", 1)]), None);
    }

    #[test]
    fn test_division() {
        assert_eq!(eval("7 / 2", &[]), Some(3));
        assert_eq!(eval("7 % 2", &[]), Some(1));
        assert_eq!(eval("1 / 0", &[]), None);
        assert_eq!(eval("1 % 0", &[]), None);
    }

    #[test]
    fn test_compile_errors() {
        assert!(DebugExpression::new("1 +").is_err());
        assert!(DebugExpression::new("(1").is_err());
        assert!(DebugExpression::new("1 2").is_err());
        assert!(DebugExpression::new("a = b").is_err());
        assert!(DebugExpression::new("#").is_err());
    }

    #[test]
    fn test_normalize_expression() {
        assert_eq!(normalize_expression("a  >\t0"), "a > 0");
        assert_eq!(normalize_expression("  a > 0  "), "a > 0");
        assert_eq!(normalize_expression(""), "");
    }

    #[test]
    fn test_serde_round_trip() {
        let expr = DebugExpression::new("a > 0").unwrap();
        let json = serde_json::to_string(&expr).unwrap();
        assert_eq!(json, "\"a > 0\"");
        let back: DebugExpression = serde_json::from_str(&json).unwrap();
        assert_eq!(back.symbols(), expr.symbols());
    }
}
