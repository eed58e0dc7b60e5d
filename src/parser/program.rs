//! Program-document productions: declarations, tasks and loops.

use std::str::FromStr;

use super::{Parsed, Parser, Recovery};
use crate::ast::{
    AttrAssign, AttrValueNode, BufferDecl, ConstDecl, Decorator, DecoratorArg, DeviceDecl,
    DeviceDirective, ElemAttr, Form, Ident, LayoutSpec, LevelSpec, LoopStmt, Operand, Program,
    QuantSpec, RegionDecl, RegionExpr, Stmt, TaskCall, TaskStmt, TypeAttrs,
};
use crate::lexer::TokenKind;
use crate::model::{ElemType, MemLevelKind};

impl<'a> Parser<'a> {
    pub(super) fn program_doc(&mut self, inline_device: Option<DeviceDecl>) -> Program {
        let mut device = inline_device.map(DeviceDirective::Inline);
        let mut name = None;

        if device.is_none() {
            if self.eat(TokenKind::Program).is_some() {
                name = self.expect_ident().ok();
            }
            if self.at(TokenKind::Device) {
                device = self.device_directive();
            }
        }

        Program {
            name,
            device,
            stmts: self.stmt_list(None),
        }
    }

    fn device_directive(&mut self) -> Option<DeviceDirective> {
        let has_body = {
            let mut ahead = 2;
            if self.kind_at(1) == TokenKind::Ident && self.kind_at(2) == TokenKind::Extends {
                ahead = 4;
            }
            self.kind_at(ahead) == TokenKind::LBrace
        };
        if has_body {
            match self.device_decl() {
                Ok(decl) => Some(DeviceDirective::Inline(decl)),
                Err(Recovery) => {
                    self.synchronize();
                    None
                }
            }
        } else {
            self.bump(); // device
            match self.expect_ident() {
                Ok(name) => Some(DeviceDirective::Named(name)),
                Err(Recovery) => {
                    self.synchronize();
                    None
                }
            }
        }
    }

    /// Statements until EOF or the given terminator (used for loop
    /// bodies).
    pub(super) fn stmt_list(&mut self, terminator: Option<TokenKind>) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        loop {
            if self.at(TokenKind::Eof) {
                break;
            }
            if let Some(term) = terminator {
                if self.at(term) {
                    break;
                }
            } else if self.at(TokenKind::RBrace) {
                // Stray brace at top level.
                self.error_here("unmatched `}`");
                self.bump();
                continue;
            }
            match self.stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(Recovery) => {
                    let before = self.pos;
                    self.synchronize();
                    if self.pos == before && !self.at(TokenKind::Eof) {
                        // The offending token is itself a sync point;
                        // skip it so recovery always makes progress.
                        self.bump();
                    }
                }
            }
        }
        stmts
    }

    fn stmt(&mut self) -> Parsed<Stmt> {
        match self.peek_kind() {
            TokenKind::Const => self.const_decl().map(Stmt::Const),
            TokenKind::Buffer => self.buffer_decl().map(Stmt::Buffer),
            TokenKind::Let => self.region_decl().map(Stmt::Region),
            TokenKind::Loop => self.loop_stmt().map(Stmt::Loop),
            TokenKind::Wait
            | TokenKind::TransferAsync
            | TokenKind::TransferSync
            | TokenKind::StoreAsync
            | TokenKind::StoreSync => self.task_stmt(None).map(Stmt::Task),
            TokenKind::Ident => {
                if self.kind_at(1) == TokenKind::Eq {
                    let token = self.expect_ident()?;
                    self.bump(); // =
                    self.task_stmt(Some(token)).map(Stmt::Task)
                } else if self.kind_at(1) == TokenKind::Dot {
                    self.task_stmt(None).map(Stmt::Task)
                } else {
                    self.error_here("expected statement");
                    Err(Recovery)
                }
            }
            other => {
                self.error_here(format!("expected statement, found {}", other.describe()));
                Err(Recovery)
            }
        }
    }

    fn const_decl(&mut self) -> Parsed<ConstDecl> {
        let kw = self.expect(TokenKind::Const)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::Eq)?;
        let value = self.expr()?;
        let span = kw.span.merge(value.span());
        Ok(ConstDecl {
            id: self.node_id(),
            name,
            value,
            span,
        })
    }

    fn buffer_decl(&mut self) -> Parsed<BufferDecl> {
        let kw = self.expect(TokenKind::Buffer)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::Colon)?;
        let level = self.level_spec()?;
        self.expect_ctx("size")?;
        self.expect(TokenKind::Eq)?;
        let size = self.expr()?;
        self.expect_ctx("align")?;
        self.expect(TokenKind::Eq)?;
        let align = self.expr()?;
        let decorators = self.decorators()?;
        let span = kw.span.merge(self.prev_span());
        Ok(BufferDecl {
            id: self.node_id(),
            name,
            level,
            size,
            align,
            decorators,
            span,
        })
    }

    fn level_spec(&mut self) -> Parsed<LevelSpec> {
        let token = self.expect(TokenKind::Ident)?;
        let kind = match MemLevelKind::from_str(&token.lexeme) {
            Ok(kind) => kind,
            Err(_) => {
                self.error_at(
                    token.span,
                    format!("unknown memory level `{}`", token.lexeme),
                );
                return Err(Recovery);
            }
        };
        let mut engine = None;
        let mut span = token.span;
        if kind == MemLevelKind::L1 {
            self.expect(TokenKind::LBracket)?;
            engine = Some(self.expr()?);
            let close = self.expect(TokenKind::RBracket)?;
            span = span.merge(close.span);
        } else if self.at(TokenKind::LBracket) {
            self.error_here(format!("memory level `{kind}` takes no engine index"));
            return Err(Recovery);
        }
        Ok(LevelSpec { kind, engine, span })
    }

    fn region_decl(&mut self) -> Parsed<RegionDecl> {
        let kw = self.expect(TokenKind::Let)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::Eq)?;
        let region = self.region_expr()?;
        let span = kw.span.merge(region.span);
        Ok(RegionDecl {
            id: self.node_id(),
            name,
            region,
            span,
        })
    }

    pub(super) fn region_expr(&mut self) -> Parsed<RegionExpr> {
        let kw = self.expect(TokenKind::Region)?;
        self.expect(TokenKind::LParen)?;
        let buffer = self.expect_ident()?;
        self.expect(TokenKind::Comma)?;
        let offset = self.expr()?;
        self.expect(TokenKind::Comma)?;
        let extent = self.expr()?;
        let mut attrs = TypeAttrs::default();
        while self.eat(TokenKind::Comma).is_some() {
            self.type_attr(&mut attrs)?;
        }
        let close = self.expect(TokenKind::RParen)?;
        Ok(RegionExpr {
            id: self.node_id(),
            buffer,
            offset,
            extent,
            attrs,
            span: kw.span.merge(close.span),
        })
    }

    fn type_attr(&mut self, attrs: &mut TypeAttrs) -> Parsed<()> {
        let key = self.expect(TokenKind::Ident)?;
        match key.lexeme.as_str() {
            "elem" => {
                self.expect(TokenKind::Eq)?;
                let token = self.expect(TokenKind::Ident)?;
                match ElemType::from_str(&token.lexeme) {
                    Ok(ty) => {
                        attrs.elem = Some(ElemAttr {
                            ty,
                            span: token.span,
                        })
                    }
                    Err(_) => {
                        self.error_at(
                            token.span,
                            format!("unknown element type `{}`", token.lexeme),
                        );
                        return Err(Recovery);
                    }
                }
            }
            "shape" => {
                self.expect(TokenKind::Eq)?;
                attrs.shape = Some(self.expr_list()?);
            }
            "layout" => {
                self.expect(TokenKind::Eq)?;
                let token = self.expect(TokenKind::Ident)?;
                attrs.layout = Some(LayoutSpec::Named {
                    name: token.lexeme,
                    span: token.span,
                });
            }
            "strides" => {
                self.expect(TokenKind::Eq)?;
                attrs.layout = Some(LayoutSpec::Strides(self.expr_list()?));
            }
            "quant" => {
                self.expect(TokenKind::Eq)?;
                attrs.quant = Some(self.quant_spec()?);
            }
            other => {
                self.error_at(key.span, format!("unknown region attribute `{other}`"));
                return Err(Recovery);
            }
        }
        Ok(())
    }

    fn quant_spec(&mut self) -> Parsed<QuantSpec> {
        let token = self.expect(TokenKind::Ident)?;
        match token.lexeme.as_str() {
            "per_tensor" => Ok(QuantSpec::PerTensor { span: token.span }),
            "per_channel" => {
                self.expect(TokenKind::LParen)?;
                let axis = self.expr()?;
                let close = self.expect(TokenKind::RParen)?;
                Ok(QuantSpec::PerChannel {
                    axis,
                    span: token.span.merge(close.span),
                })
            }
            "per_group" => {
                self.expect(TokenKind::LParen)?;
                let axis = self.expr()?;
                self.expect(TokenKind::Comma)?;
                let group = self.expr()?;
                let close = self.expect(TokenKind::RParen)?;
                Ok(QuantSpec::PerGroup {
                    axis,
                    group,
                    span: token.span.merge(close.span),
                })
            }
            other => {
                self.error_at(
                    token.span,
                    format!("unknown quantization descriptor `{other}`"),
                );
                Err(Recovery)
            }
        }
    }

    fn loop_stmt(&mut self) -> Parsed<LoopStmt> {
        let kw = self.expect(TokenKind::Loop)?;
        let var = self.expect_ident()?;
        self.expect(TokenKind::Eq)?;
        let start = self.expr()?;
        self.expect(TokenKind::DotDot)?;
        let end = self.expr()?;
        let decorators = self.decorators()?;
        self.expect(TokenKind::LBrace)?;
        let body = self.stmt_list(Some(TokenKind::RBrace));
        let close = self.expect(TokenKind::RBrace)?;
        Ok(LoopStmt {
            id: self.node_id(),
            var,
            start,
            end,
            decorators,
            body,
            span: kw.span.merge(close.span),
        })
    }

    fn task_stmt(&mut self, token: Option<Ident>) -> Parsed<TaskStmt> {
        let start_span = token
            .as_ref()
            .map(|t| t.span)
            .unwrap_or_else(|| self.peek().span);

        let call = match self.peek_kind() {
            TokenKind::TransferAsync | TokenKind::TransferSync => {
                let form = if self.bump().kind == TokenKind::TransferAsync {
                    Form::Async
                } else {
                    Form::Sync
                };
                let (src, dst) = self.in_out_operands()?;
                TaskCall::Transfer { form, src, dst }
            }
            TokenKind::StoreAsync | TokenKind::StoreSync => {
                let form = if self.bump().kind == TokenKind::StoreAsync {
                    Form::Async
                } else {
                    Form::Sync
                };
                let (src, dst) = self.in_out_operands()?;
                TaskCall::Store { form, src, dst }
            }
            TokenKind::Wait => {
                self.bump();
                self.expect(TokenKind::LBracket)?;
                let mut tokens = Vec::new();
                if !self.at(TokenKind::RBracket) {
                    loop {
                        tokens.push(self.expect_ident()?);
                        if self.eat(TokenKind::Comma).is_none() {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBracket)?;
                TaskCall::Wait { tokens }
            }
            TokenKind::Ident => self.compute_call()?,
            other => {
                self.error_here(format!("expected task call, found {}", other.describe()));
                return Err(Recovery);
            }
        };

        let deps = if self.at(TokenKind::Deps) {
            self.bump();
            self.expect(TokenKind::Eq)?;
            self.expect(TokenKind::LBracket)?;
            let mut deps = Vec::new();
            if !self.at(TokenKind::RBracket) {
                loop {
                    deps.push(self.expect_ident()?);
                    if self.eat(TokenKind::Comma).is_none() {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RBracket)?;
            deps
        } else {
            Vec::new()
        };

        let decorators = self.decorators()?;
        let span = start_span.merge(self.prev_span());

        if matches!(call, TaskCall::Wait { .. }) {
            if let Some(name) = &token {
                self.error_at(name.span, "`wait` produces no token to assign");
            }
        }

        Ok(TaskStmt {
            id: self.node_id(),
            token,
            call,
            deps,
            decorators,
            span,
        })
    }

    fn compute_call(&mut self) -> Parsed<TaskCall> {
        let op = self.expect_ident()?;
        self.expect(TokenKind::Dot)?;
        let form = match self.peek_kind() {
            TokenKind::Async => {
                self.bump();
                Form::Async
            }
            TokenKind::Sync => {
                self.bump();
                Form::Sync
            }
            other => {
                self.error_here(format!(
                    "expected `async` or `sync` after operator name, found {}",
                    other.describe()
                ));
                return Err(Recovery);
            }
        };

        self.expect(TokenKind::In)?;
        self.expect(TokenKind::Eq)?;
        let ins = self.operand_list()?;
        self.expect(TokenKind::Out)?;
        self.expect(TokenKind::Eq)?;
        let outs = self.operand_list()?;

        let mut attrs = Vec::new();
        while self.at_attr_assign() {
            let name = self.expect_ident()?;
            self.expect(TokenKind::Eq)?;
            let value = self.attr_value()?;
            let span = name.span.merge(value.span());
            attrs.push(AttrAssign { name, value, span });
        }

        Ok(TaskCall::Compute {
            op,
            form,
            ins,
            outs,
            attrs,
        })
    }

    /// Distinguish a trailing `name = value` attribute from the next
    /// statement's `token = call` prefix.
    fn at_attr_assign(&self) -> bool {
        if !(self.at(TokenKind::Ident) && self.kind_at(1) == TokenKind::Eq) {
            return false;
        }
        match self.kind_at(2) {
            TokenKind::TransferAsync
            | TokenKind::TransferSync
            | TokenKind::StoreAsync
            | TokenKind::StoreSync => false,
            TokenKind::Ident => {
                // `x = gemm.async ...` starts a new task statement.
                !(self.kind_at(3) == TokenKind::Dot
                    && matches!(self.kind_at(4), TokenKind::Async | TokenKind::Sync))
            }
            _ => true,
        }
    }

    fn in_out_operands(&mut self) -> Parsed<(Operand, Operand)> {
        self.expect(TokenKind::In)?;
        self.expect(TokenKind::Eq)?;
        let src = self.operand()?;
        self.expect(TokenKind::Out)?;
        self.expect(TokenKind::Eq)?;
        let dst = self.operand()?;
        Ok((src, dst))
    }

    fn operand_list(&mut self) -> Parsed<Vec<Operand>> {
        self.expect(TokenKind::LBracket)?;
        let mut operands = Vec::new();
        if !self.at(TokenKind::RBracket) {
            loop {
                operands.push(self.operand()?);
                if self.eat(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBracket)?;
        Ok(operands)
    }

    fn operand(&mut self) -> Parsed<Operand> {
        if self.at(TokenKind::Region) {
            let region = self.region_expr()?;
            let decorators = self.decorators()?;
            return Ok(Operand::Inline { region, decorators });
        }
        let name = self.expect_ident()?;
        let decorators = self.decorators()?;
        Ok(Operand::Named { name, decorators })
    }

    pub(super) fn attr_value(&mut self) -> Parsed<AttrValueNode> {
        match self.peek_kind() {
            TokenKind::Str => {
                let token = self.bump();
                Ok(AttrValueNode::Str {
                    value: token.text.unwrap_or_default(),
                    span: token.span,
                })
            }
            TokenKind::True | TokenKind::False => {
                let token = self.bump();
                Ok(AttrValueNode::Bool {
                    value: token.kind == TokenKind::True,
                    span: token.span,
                })
            }
            TokenKind::LBracket => {
                let open = self.peek().span;
                let items = self.expr_list()?;
                Ok(AttrValueNode::List {
                    items,
                    span: open.merge(self.prev_span()),
                })
            }
            TokenKind::Ident => {
                // A bare element-type name denotes the type itself unless
                // it continues as an arithmetic expression.
                if let Ok(ty) = ElemType::from_str(&self.peek().lexeme) {
                    let continues = matches!(
                        self.kind_at(1),
                        TokenKind::Plus
                            | TokenKind::Minus
                            | TokenKind::Star
                            | TokenKind::Slash
                            | TokenKind::Mod
                    );
                    if !continues {
                        let token = self.bump();
                        return Ok(AttrValueNode::Elem {
                            ty,
                            span: token.span,
                        });
                    }
                }
                self.expr().map(AttrValueNode::Expr)
            }
            _ => self.expr().map(AttrValueNode::Expr),
        }
    }

    pub(super) fn decorators(&mut self) -> Parsed<Vec<Decorator>> {
        let mut decorators = Vec::new();
        while self.at(TokenKind::At) {
            let at = self.bump();
            let name = self.expect_ident()?;
            let mut args = Vec::new();
            if self.eat(TokenKind::LParen).is_some() {
                if !self.at(TokenKind::RParen) {
                    loop {
                        args.push(self.decorator_arg()?);
                        if self.eat(TokenKind::Comma).is_none() {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RParen)?;
            }
            let span = at.span.merge(self.prev_span());
            decorators.push(Decorator { name, args, span });
        }
        Ok(decorators)
    }

    fn decorator_arg(&mut self) -> Parsed<DecoratorArg> {
        if self.at(TokenKind::Str) {
            let token = self.bump();
            return Ok(DecoratorArg::Str {
                value: token.text.unwrap_or_default(),
                span: token.span,
            });
        }
        // `unit_type[index]` resource form.
        if self.at(TokenKind::Ident) && self.kind_at(1) == TokenKind::LBracket {
            let unit = self.expect_ident()?;
            self.expect(TokenKind::LBracket)?;
            let index = self.expr()?;
            let close = self.expect(TokenKind::RBracket)?;
            let span = unit.span.merge(close.span);
            return Ok(DecoratorArg::Unit { unit, index, span });
        }
        self.expr().map(DecoratorArg::Expr)
    }
}
