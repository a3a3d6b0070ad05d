//! Expression parser
//!
//! Precedence climbing over the tokens of one statement line.

use crate::api::ApiSurface;
use crate::error::CompileError;
use crate::lsl::ast::{BinaryOp, Expr, Type, UnaryOp};
use crate::lsl::directives::FeatureFlags;
use crate::lsl::lexer::{Token, TokenKind};
use std::collections::HashMap;

/// Precedence at which vector and rotation components are parsed, one
/// above the relational operators so the closing `>` ends the component
const COMPONENT_PRECEDENCE: u8 = 8;

/// Type names visible to a compilation
pub struct TypeNames<'a> {
    api: &'a ApiSurface,
    flags: &'a FeatureFlags,
    structs: HashMap<String, u16>,
}

impl<'a> TypeNames<'a> {
    pub fn new(api: &'a ApiSurface, flags: &'a FeatureFlags) -> Self {
        Self {
            api,
            flags,
            structs: HashMap::new(),
        }
    }

    pub fn add_struct(&mut self, name: &str) -> u16 {
        let next = self.structs.len() as u16;
        *self.structs.entry(name.to_string()).or_insert(next)
    }

    pub fn lookup(&self, name: &str) -> Option<Type> {
        if let Some(def) = self.api.type_named(name, self.flags) {
            return Some(def.ty);
        }
        self.structs.get(name).map(|&id| Type::Struct(id))
    }

    pub fn is_type_token(&self, token: &Token) -> Option<Type> {
        if token.kind == TokenKind::Identifier {
            self.lookup(&token.text)
        } else {
            None
        }
    }

    /// Whether integer literals beyond 32 bits become `long`
    fn has_long(&self) -> bool {
        self.api.type_admitted(Type::Long, self.flags)
    }
}

/// Parse a complete expression from `tokens`
pub fn parse_expression(tokens: &[Token], types: &TypeNames<'_>, line: usize) -> Result<Expr, CompileError> {
    if tokens.is_empty() {
        return Err(CompileError::syntax(line, "expected an expression"));
    }
    let mut parser = ExprParser {
        tokens,
        pos: 0,
        types,
        line,
    };
    let expr = parser.assignment()?;
    if let Some(extra) = parser.peek() {
        return Err(CompileError::syntax(extra.line, format!("unexpected '{}'", extra.text)));
    }
    Ok(expr)
}

/// Split at top-level occurrences of `separator` (outside brackets)
pub fn split_top_level<'t>(tokens: &'t [Token], separator: &str) -> Vec<&'t [Token]> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        if token.is("(") || token.is("[") {
            depth += 1;
        } else if token.is(")") || token.is("]") {
            depth -= 1;
        } else if depth == 0 && token.is(separator) {
            parts.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    parts.push(&tokens[start..]);
    parts
}

/// Index of the bracket closing the one at `open`
pub fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let (opener, closer) = match tokens.get(open)?.text.as_str() {
        "(" => ("(", ")"),
        "[" => ("[", "]"),
        _ => return None,
    };
    let mut depth = 0;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is(opener) {
            depth += 1;
        } else if token.is(closer) {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

fn binary_op(token: &Token) -> Option<(BinaryOp, u8)> {
    if token.kind != TokenKind::Operator {
        return None;
    }
    let op = match token.text.as_str() {
        "||" => (BinaryOp::Or, 1),
        "&&" => (BinaryOp::And, 2),
        "|" => (BinaryOp::BitOr, 3),
        "^" => (BinaryOp::BitXor, 4),
        "&" => (BinaryOp::BitAnd, 5),
        "==" => (BinaryOp::Equal, 6),
        "!=" => (BinaryOp::NotEqual, 6),
        "<" => (BinaryOp::Less, 7),
        ">" => (BinaryOp::Greater, 7),
        "<=" => (BinaryOp::LessEqual, 7),
        ">=" => (BinaryOp::GreaterEqual, 7),
        "<<" => (BinaryOp::LeftShift, 8),
        ">>" => (BinaryOp::RightShift, 8),
        "+" => (BinaryOp::Add, 9),
        "-" => (BinaryOp::Sub, 9),
        "*" => (BinaryOp::Mul, 10),
        "/" => (BinaryOp::Div, 10),
        "%" => (BinaryOp::Mod, 10),
        _ => return None,
    };
    Some(op)
}

struct ExprParser<'t, 'n> {
    tokens: &'t [Token],
    pos: usize,
    types: &'t TypeNames<'n>,
    line: usize,
}

impl<'t, 'n> ExprParser<'t, 'n> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn check(&self, text: &str) -> bool {
        self.peek().map_or(false, |t| t.is(text))
    }

    fn consume(&mut self, text: &str) -> Result<(), CompileError> {
        if self.check(text) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", text)))
        }
    }

    fn error(&self, message: String) -> CompileError {
        let line = self.peek().map(|t| t.line).unwrap_or(self.line);
        match self.peek() {
            Some(token) => CompileError::syntax(line, format!("{} near '{}'", message, token.text)),
            None => CompileError::syntax(line, format!("{} at end of statement", message)),
        }
    }

    fn assignment(&mut self) -> Result<Expr, CompileError> {
        let target = self.binary(1)?;

        if let Some(token) = self.peek() {
            if token.kind == TokenKind::Operator {
                let op = if token.text == "=" {
                    Some(None)
                } else {
                    BinaryOp::from_compound(&token.text).map(Some)
                };
                if let Some(op) = op {
                    self.advance();
                    let value = self.assignment()?;
                    return Ok(Expr::Assign {
                        target: Box::new(target),
                        op,
                        value: Box::new(value),
                    });
                }
            }
        }

        Ok(target)
    }

    fn binary(&mut self, min_precedence: u8) -> Result<Expr, CompileError> {
        let mut left = self.unary()?;

        while let Some((op, precedence)) = self.peek().and_then(binary_op) {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.binary(precedence + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, CompileError> {
        let Some(token) = self.peek() else {
            return Err(self.error("expected an expression".into()));
        };

        if token.kind == TokenKind::Operator {
            match token.text.as_str() {
                "-" => {
                    self.advance();
                    let operand = self.unary()?;
                    return Ok(match operand {
                        Expr::Integer(i) => Expr::Integer(i.wrapping_neg()),
                        Expr::Long(l) => Expr::Long(l.wrapping_neg()),
                        Expr::Float(f) => Expr::Float(-f),
                        other => Expr::Unary {
                            op: UnaryOp::Neg,
                            operand: Box::new(other),
                        },
                    });
                }
                "!" | "~" => {
                    self.advance();
                    let op = if token.text == "!" { UnaryOp::Not } else { UnaryOp::BitNot };
                    let operand = self.unary()?;
                    return Ok(Expr::Unary {
                        op,
                        operand: Box::new(operand),
                    });
                }
                "++" | "--" => {
                    self.advance();
                    let target = self.unary()?;
                    return Ok(Expr::IncDec {
                        target: Box::new(target),
                        increment: token.text == "++",
                        prefix: true,
                    });
                }
                _ => {}
            }
        }

        // Cast: (type) operand
        if token.is("(") {
            if let (Some(ty_token), Some(close)) = (self.peek_at(1), self.peek_at(2)) {
                if close.is(")") {
                    if let Some(ty) = self.types.is_type_token(ty_token) {
                        self.pos += 3;
                        let operand = self.unary()?;
                        return Ok(Expr::Cast {
                            ty,
                            operand: Box::new(operand),
                        });
                    }
                }
            }
        }

        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.primary()?;

        loop {
            if self.check(".") {
                self.advance();
                let name = match self.advance() {
                    Some(t) if t.kind == TokenKind::Identifier => t.text.clone(),
                    _ => return Err(self.error("expected a member name after '.'".into())),
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    name,
                };
            } else if self.check("[") {
                self.advance();
                let index = self.assignment()?;
                self.consume("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.check("++") || self.check("--") {
                let increment = self.check("++");
                self.advance();
                expr = Expr::IncDec {
                    target: Box::new(expr),
                    increment,
                    prefix: false,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, CompileError> {
        let Some(token) = self.peek() else {
            return Err(self.error("expected an expression".into()));
        };

        match token.kind {
            TokenKind::Integer => {
                self.advance();
                self.integer_literal(token)
            }
            TokenKind::Float => {
                self.advance();
                token
                    .text
                    .parse::<f64>()
                    .map(Expr::Float)
                    .map_err(|_| CompileError::lex(token.line, format!("malformed float '{}'", token.text)))
            }
            TokenKind::String => {
                self.advance();
                Ok(Expr::String(token.text.clone()))
            }
            TokenKind::Identifier => {
                self.advance();
                if self.check("(") {
                    self.advance();
                    let args = self.arguments(")")?;
                    Ok(Expr::Call {
                        name: token.text.clone(),
                        args,
                    })
                } else {
                    Ok(Expr::Variable(token.text.clone()))
                }
            }
            _ if token.is("(") => {
                self.advance();
                let inner = self.assignment()?;
                self.consume(")")?;
                Ok(inner)
            }
            _ if token.is("[") => {
                self.advance();
                Ok(Expr::List(self.arguments("]")?))
            }
            _ if token.is("<") => {
                self.advance();
                self.vector_literal()
            }
            _ => Err(self.error("unexpected token".into())),
        }
    }

    /// Comma-separated expressions up to `close`, which is consumed
    fn arguments(&mut self, close: &str) -> Result<Vec<Expr>, CompileError> {
        let mut args = Vec::new();
        if self.check(close) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.assignment()?);
            if self.check(",") {
                self.advance();
                continue;
            }
            self.consume(close)?;
            return Ok(args);
        }
    }

    fn vector_literal(&mut self) -> Result<Expr, CompileError> {
        let mut components = vec![self.binary(COMPONENT_PRECEDENCE)?];
        while self.check(",") {
            self.advance();
            components.push(self.binary(COMPONENT_PRECEDENCE)?);
        }
        self.consume(">")?;

        match components.len() {
            3 => Ok(Expr::Vector(components)),
            4 => Ok(Expr::Rotation(components)),
            n => Err(CompileError::syntax(
                self.line,
                format!("vector or rotation literal needs 3 or 4 components, found {}", n),
            )),
        }
    }

    fn integer_literal(&self, token: &Token) -> Result<Expr, CompileError> {
        let text = token.text.as_str();
        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };

        let out_of_range = || CompileError::lex(token.line, format!("integer literal '{}' out of range", text));

        if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
            let magnitude = u64::from_str_radix(hex, 16).map_err(|_| out_of_range())?;
            if magnitude <= u32::MAX as u64 {
                let value = magnitude as u32 as i32;
                return Ok(Expr::Integer(if negative { value.wrapping_neg() } else { value }));
            }
            let value = i64::try_from(magnitude).map_err(|_| out_of_range())?;
            return self.wide_literal(if negative { -value } else { value });
        }

        let magnitude: i128 = digits.parse().map_err(|_| out_of_range())?;
        let value = if negative { -magnitude } else { magnitude };
        if let Ok(small) = i32::try_from(value) {
            return Ok(Expr::Integer(small));
        }
        let wide = i64::try_from(value).map_err(|_| out_of_range())?;
        self.wide_literal(wide)
    }

    /// Literals past 32 bits are `long` where that type exists and `-1`
    /// otherwise
    fn wide_literal(&self, value: i64) -> Result<Expr, CompileError> {
        if self.types.has_long() {
            Ok(Expr::Long(value))
        } else {
            Ok(Expr::Integer(-1))
        }
    }
}
