//! Condition expression tree and parser.
//!
//! Grammar (whitespace allowed between tokens):
//!
//! ```text
//! expr  := '!'* ( op '(' list ')' | name )
//! op    := '+' | '|' | '^'
//! list  := [ expr ( (',' | ws)+ expr )* ]
//! name  := [A-Za-z0-9_.-]+
//! ```

use super::BoolId;
use crate::{Error, Result};

/// Nesting depth accepted before a parse is rejected.
const MAX_DEPTH: usize = 64;

/// Node type of a condition expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    /// A named boolean.
    Var(BoolId),
    /// True when every operand is true.
    And(Vec<Expr>),
    /// True when any operand is true.
    Or(Vec<Expr>),
    /// True when exactly one operand is true.
    Xor(Vec<Expr>),
}

/// A condition expression node with its negation flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    /// Node type and operands.
    pub kind: ExprKind,
    /// Whether the node's result is inverted.
    pub negated: bool,
}

impl Expr {
    /// Evaluates the expression, looking up variables with `value`.
    ///
    /// AND stops at the first false operand and OR at the first true one.
    /// XOR evaluates every operand and is true only when exactly one of
    /// them is true, so `^(a,b,c)` with two true operands is false.
    pub fn eval_with(&self, value: &mut dyn FnMut(BoolId) -> bool) -> bool {
        let result = match &self.kind {
            ExprKind::Var(id) => value(*id),
            ExprKind::And(operands) => operands.iter().all(|e| e.eval_with(value)),
            ExprKind::Or(operands) => operands.iter().any(|e| e.eval_with(value)),
            ExprKind::Xor(operands) => {
                operands.iter().filter(|e| e.eval_with(value)).count() == 1
            }
        };
        result != self.negated
    }
}

/// Parses `input`, binding each name through `resolve`.
pub(crate) fn parse(input: &str, resolve: &mut dyn FnMut(&str) -> BoolId) -> Result<Expr> {
    let mut parser = Parser {
        input,
        bytes: input.as_bytes(),
        pos: 0,
        resolve,
    };
    parser.skip_ws();
    let expr = parser.expr(0)?;
    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err(parser.error("unexpected trailing characters"));
    }
    Ok(expr)
}

struct Parser<'a, 'r> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
    resolve: &'r mut dyn FnMut(&str) -> BoolId,
}

impl Parser<'_, '_> {
    fn error(&self, reason: &str) -> Error {
        Error::Condition {
            expr: self.input.to_string(),
            reason: format!("{} at offset {}", reason, self.pos),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expr(&mut self, depth: usize) -> Result<Expr> {
        if depth > MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }

        let mut negated = false;
        while self.peek() == Some(b'!') {
            negated = !negated;
            self.pos += 1;
            self.skip_ws();
        }

        let kind = match self.peek() {
            Some(op @ (b'+' | b'|' | b'^')) => {
                self.pos += 1;
                let operands = self.list(depth)?;
                match op {
                    b'+' => ExprKind::And(operands),
                    b'|' => ExprKind::Or(operands),
                    _ => ExprKind::Xor(operands),
                }
            }
            Some(b) if is_name_byte(b) => {
                let start = self.pos;
                while self.peek().is_some_and(is_name_byte) {
                    self.pos += 1;
                }
                let name = &self.input[start..self.pos];
                ExprKind::Var((self.resolve)(name))
            }
            Some(_) => return Err(self.error("expected a name or an operator")),
            None => return Err(self.error("unexpected end of expression")),
        };

        Ok(Expr { kind, negated })
    }

    fn list(&mut self, depth: usize) -> Result<Vec<Expr>> {
        self.skip_ws();
        if self.peek() != Some(b'(') {
            return Err(self.error("expected '(' after operator"));
        }
        self.pos += 1;

        let mut operands = Vec::new();
        loop {
            while self
                .peek()
                .is_some_and(|b| b == b',' || b.is_ascii_whitespace())
            {
                self.pos += 1;
            }
            match self.peek() {
                Some(b')') => {
                    self.pos += 1;
                    return Ok(operands);
                }
                None => return Err(self.error("missing ')'")),
                Some(_) => operands.push(self.expr(depth + 1)?),
            }
        }
    }
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.')
}
