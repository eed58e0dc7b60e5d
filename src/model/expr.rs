//! Integer-valued expression trees and their evaluation.
//!
//! Expressions appear in buffer sizes, region bounds, loop ranges and
//! operator attributes. Floating literals are part of the tree but only
//! legal in operator-attribute position; evaluating one in an integer
//! context is an error.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::diag::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "mod")]
    Mod,
}

impl BinOp {
    /// Binding strength; multiplicative binds tighter than additive.
    pub const fn precedence(&self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div | Self::Mod => 2,
        }
    }
}

/// Immutable expression node. Parenthesization is not represented; the
/// renderer re-inserts parentheses from precedence.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int {
        value: i64,
        span: Span,
    },
    /// Restricted to operator-attribute positions.
    Float {
        value: f64,
        span: Span,
    },
    Ident {
        name: String,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
}

/// Evaluation failure. Division by zero is fatal at evaluation time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero(Span),
    #[error("unbound identifier `{0}`")]
    Unbound(String, Span),
    #[error("floating literal in integer context")]
    NonInteger(Span),
    #[error("arithmetic overflow")]
    Overflow(Span),
}

impl EvalError {
    pub const fn span(&self) -> Span {
        match self {
            Self::DivisionByZero(s)
            | Self::Unbound(_, s)
            | Self::NonInteger(s)
            | Self::Overflow(s) => *s,
        }
    }
}

/// Environment mapping identifiers to integer values.
#[derive(Debug, Default, Clone)]
pub struct Env {
    bindings: HashMap<String, i64>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: i64) {
        self.bindings.insert(name.into(), value);
    }

    pub fn unbind(&mut self, name: &str) {
        self.bindings.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.bindings.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }
}

impl Expr {
    pub const fn span(&self) -> Span {
        match self {
            Self::Int { span, .. }
            | Self::Float { span, .. }
            | Self::Ident { span, .. }
            | Self::Unary { span, .. }
            | Self::Binary { span, .. } => *span,
        }
    }

    /// Evaluate to an integer. Truncating division; checked arithmetic.
    pub fn eval(&self, env: &Env) -> Result<i64, EvalError> {
        match self {
            Self::Int { value, .. } => Ok(*value),
            Self::Float { span, .. } => Err(EvalError::NonInteger(*span)),
            Self::Ident { name, span } => env
                .get(name)
                .ok_or_else(|| EvalError::Unbound(name.clone(), *span)),
            Self::Unary { op, operand, span } => {
                let v = operand.eval(env)?;
                match op {
                    UnaryOp::Neg => v.checked_neg().ok_or(EvalError::Overflow(*span)),
                }
            }
            Self::Binary { op, lhs, rhs, span } => {
                let l = lhs.eval(env)?;
                let r = rhs.eval(env)?;
                let out = match op {
                    BinOp::Add => l.checked_add(r),
                    BinOp::Sub => l.checked_sub(r),
                    BinOp::Mul => l.checked_mul(r),
                    BinOp::Div => {
                        if r == 0 {
                            return Err(EvalError::DivisionByZero(*span));
                        }
                        l.checked_div(r)
                    }
                    BinOp::Mod => {
                        if r == 0 {
                            return Err(EvalError::DivisionByZero(*span));
                        }
                        l.checked_rem(r)
                    }
                };
                out.ok_or(EvalError::Overflow(*span))
            }
        }
    }

    /// Free identifiers referenced anywhere in the tree.
    pub fn idents<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Int { .. } | Self::Float { .. } => {}
            Self::Ident { name, .. } => out.push(name),
            Self::Unary { operand, .. } => operand.idents(out),
            Self::Binary { lhs, rhs, .. } => {
                lhs.idents(out);
                rhs.idents(out);
            }
        }
    }

    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        match self {
            Self::Int { value, .. } => write!(f, "{value}"),
            Self::Float { value, .. } => {
                if value.fract() == 0.0 && value.is_finite() {
                    write!(f, "{value:.1}")
                } else {
                    write!(f, "{value}")
                }
            }
            Self::Ident { name, .. } => write!(f, "{name}"),
            Self::Unary { operand, .. } => {
                write!(f, "-")?;
                operand.fmt_prec(f, 3)
            }
            Self::Binary { op, lhs, rhs, .. } => {
                let prec = op.precedence();
                if prec < min {
                    write!(f, "(")?;
                }
                lhs.fmt_prec(f, prec)?;
                write!(f, " {op} ")?;
                // Left-associative: the right operand needs one level more.
                rhs.fmt_prec(f, prec + 1)?;
                if prec < min {
                    write!(f, ")")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_prec(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::{LineCol, SourceId, Span};

    fn sp() -> Span {
        Span::point(SourceId(0), LineCol::new(1, 1))
    }

    fn int(v: i64) -> Expr {
        Expr::Int { value: v, span: sp() }
    }

    fn bin(op: BinOp, l: Expr, r: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(l),
            rhs: Box::new(r),
            span: sp(),
        }
    }

    #[test]
    fn division_truncates_toward_zero() {
        let env = Env::new();
        assert_eq!(bin(BinOp::Div, int(-7), int(2)).eval(&env), Ok(-3));
        assert_eq!(bin(BinOp::Div, int(7), int(2)).eval(&env), Ok(3));
    }

    #[test]
    fn division_by_zero_is_fatal() {
        let env = Env::new();
        assert!(matches!(
            bin(BinOp::Div, int(1), int(0)).eval(&env),
            Err(EvalError::DivisionByZero(_))
        ));
        assert!(matches!(
            bin(BinOp::Mod, int(1), int(0)).eval(&env),
            Err(EvalError::DivisionByZero(_))
        ));
    }

    #[test]
    fn identifiers_read_the_environment() {
        let mut env = Env::new();
        env.bind("i", 5);
        let e = bin(
            BinOp::Mod,
            Expr::Ident {
                name: "i".into(),
                span: sp(),
            },
            int(2),
        );
        assert_eq!(e.eval(&env), Ok(1));
    }

    #[test]
    fn render_restores_precedence_parens() {
        // (1 + 2) * 3
        let e = bin(BinOp::Mul, bin(BinOp::Add, int(1), int(2)), int(3));
        assert_eq!(e.to_string(), "(1 + 2) * 3");

        // 1 + 2 * 3 needs no parens
        let e = bin(BinOp::Add, int(1), bin(BinOp::Mul, int(2), int(3)));
        assert_eq!(e.to_string(), "1 + 2 * 3");

        // left-assoc subtraction: 1 - (2 - 3)
        let e = bin(BinOp::Sub, int(1), bin(BinOp::Sub, int(2), int(3)));
        assert_eq!(e.to_string(), "1 - (2 - 3)");
    }
}
