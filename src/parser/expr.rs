//! Expression parsing: precedence climbing over `+ - * / mod`.

use super::{Parsed, Parser, Recovery};
use crate::lexer::TokenKind;
use crate::model::{BinOp, Expr, UnaryOp};

impl<'a> Parser<'a> {
    pub(crate) fn expr(&mut self) -> Parsed<Expr> {
        self.additive()
    }

    fn additive(&mut self) -> Parsed<Expr> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.multiplicative()?;
            let span = lhs.span().merge(rhs.span());
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
    }

    fn multiplicative(&mut self) -> Parsed<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Mod => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.unary()?;
            let span = lhs.span().merge(rhs.span());
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
    }

    fn unary(&mut self) -> Parsed<Expr> {
        if self.at(TokenKind::Minus) {
            let minus = self.bump();
            let operand = self.unary()?;
            let span = minus.span.merge(operand.span());
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
                span,
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Parsed<Expr> {
        match self.peek_kind() {
            TokenKind::Int => {
                let token = self.bump();
                let value = match token.lexeme.parse::<i64>() {
                    Ok(v) => v,
                    Err(_) => {
                        self.error_at(token.span, "integer literal out of range");
                        0
                    }
                };
                Ok(Expr::Int {
                    value,
                    span: token.span,
                })
            }
            TokenKind::Float => {
                let token = self.bump();
                let value = token.lexeme.parse::<f64>().unwrap_or_default();
                Ok(Expr::Float {
                    value,
                    span: token.span,
                })
            }
            TokenKind::Ident => {
                let token = self.bump();
                Ok(Expr::Ident {
                    name: token.lexeme,
                    span: token.span,
                })
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            other => {
                self.error_here(format!("expected expression, found {}", other.describe()));
                Err(Recovery)
            }
        }
    }

    /// `[ expr, expr, ... ]`
    pub(crate) fn expr_list(&mut self) -> Parsed<Vec<Expr>> {
        self.expect(TokenKind::LBracket)?;
        let mut items = Vec::new();
        if !self.at(TokenKind::RBracket) {
            loop {
                items.push(self.expr()?);
                if self.eat(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBracket)?;
        Ok(items)
    }
}
