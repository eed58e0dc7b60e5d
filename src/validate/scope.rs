//! Pass 1: name resolution.
//!
//! Builds nested scopes (program, then one per loop), classifies every
//! identifier occurrence, and records resolved targets in the side
//! tables. Duplicate declarations and unknown or wrongly-kinded
//! references are errors.

use std::collections::{HashMap, HashSet};

use super::{ProgramIndex, SideTables, TaskResolution};
use crate::ast::{
    Decorator, DecoratorArg, Ident, LoopStmt, NodeId, Operand, Program, RegionExpr, Stmt,
    TaskCall, TaskStmt,
};
use crate::diag::{Collector, Diagnostic, Span};
use crate::model::Expr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum SymbolKind {
    Const,
    Buffer,
    Region,
    Token,
    #[strum(serialize = "loop variable")]
    LoopVar,
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    kind: SymbolKind,
    span: Span,
    node: NodeId,
}

struct Scopes {
    stack: Vec<HashMap<String, Binding>>,
}

impl Scopes {
    fn lookup(&self, name: &str) -> Option<Binding> {
        self.stack
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn declare(&mut self, name: &Ident, binding: Binding, collector: &mut Collector) {
        let top = self.stack.last_mut().expect("scope stack is never empty");
        if let Some(existing) = top.get(&name.name) {
            collector.emit(
                Diagnostic::error(format!(
                    "duplicate declaration of `{}` in the same scope",
                    name.name
                ))
                .with_span(name.span)
                .with_note("previous declaration here", Some(existing.span)),
            );
            return;
        }
        top.insert(name.name.clone(), binding);
    }
}

pub(super) fn run(
    program: &Program,
    _index: &ProgramIndex<'_>,
    tables: &mut SideTables,
    collector: &mut Collector,
) {
    let mut all_consts = HashSet::new();
    collect_const_names(&program.stmts, &mut all_consts);

    let mut resolver = Resolver {
        scopes: Scopes {
            stack: vec![HashMap::new()],
        },
        all_consts,
        tables,
        collector,
    };
    resolver.block(&program.stmts);
}

fn collect_const_names(stmts: &[Stmt], out: &mut HashSet<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Const(decl) => {
                out.insert(decl.name.name.clone());
            }
            Stmt::Loop(stmt) => collect_const_names(&stmt.body, out),
            _ => {}
        }
    }
}

struct Resolver<'a> {
    scopes: Scopes,
    /// Every constant name anywhere in the document, for forward-reference
    /// wording and the no-shadowing invariant.
    all_consts: HashSet<String>,
    tables: &'a mut SideTables,
    collector: &'a mut Collector,
}

impl Resolver<'_> {
    fn block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            match stmt {
                Stmt::Const(decl) => {
                    self.check_value_expr(&decl.value, false);
                    self.declare_checked(
                        &decl.name,
                        Binding {
                            kind: SymbolKind::Const,
                            span: decl.name.span,
                            node: decl.id,
                        },
                    );
                }
                Stmt::Buffer(decl) => {
                    self.check_value_expr(&decl.size, true);
                    self.check_value_expr(&decl.align, true);
                    if let Some(engine) = &decl.level.engine {
                        self.check_value_expr(engine, true);
                    }
                    self.decorator_args(&decl.decorators);
                    self.declare_checked(
                        &decl.name,
                        Binding {
                            kind: SymbolKind::Buffer,
                            span: decl.name.span,
                            node: decl.id,
                        },
                    );
                }
                Stmt::Region(decl) => {
                    self.region_expr(&decl.region);
                    self.declare_checked(
                        &decl.name,
                        Binding {
                            kind: SymbolKind::Region,
                            span: decl.name.span,
                            node: decl.region.id,
                        },
                    );
                }
                Stmt::Task(task) => self.task(task),
                Stmt::Loop(stmt) => self.loop_stmt(stmt),
            }
        }
    }

    fn loop_stmt(&mut self, stmt: &LoopStmt) {
        self.check_value_expr(&stmt.start, true);
        self.check_value_expr(&stmt.end, true);
        self.decorator_args(&stmt.decorators);
        if let Some(existing) = self.scopes.lookup(&stmt.var.name) {
            self.collector.emit(
                Diagnostic::error(format!(
                    "loop variable `{}` shadows an existing {}",
                    stmt.var.name, existing.kind
                ))
                .with_span(stmt.var.span)
                .with_note("shadowed declaration here", Some(existing.span)),
            );
        }
        self.scopes.stack.push(HashMap::new());
        self.scopes.declare(
            &stmt.var,
            Binding {
                kind: SymbolKind::LoopVar,
                span: stmt.var.span,
                node: stmt.id,
            },
            self.collector,
        );
        self.block(&stmt.body);
        self.scopes.stack.pop();
    }

    fn task(&mut self, task: &TaskStmt) {
        let mut res = TaskResolution::default();

        match &task.call {
            TaskCall::Transfer { src, dst, .. } | TaskCall::Store { src, dst, .. } => {
                if let Some(node) = self.operand(src) {
                    res.inputs.push(node);
                }
                if let Some(node) = self.operand(dst) {
                    res.outputs.push(node);
                }
            }
            TaskCall::Wait { tokens } => {
                for name in tokens {
                    if let Some(node) = self.token_ref(name) {
                        res.wait_producers.push(node);
                    }
                }
            }
            TaskCall::Compute {
                ins, outs, attrs, ..
            } => {
                for operand in ins {
                    if let Some(node) = self.operand(operand) {
                        res.inputs.push(node);
                    }
                }
                for operand in outs {
                    if let Some(node) = self.operand(operand) {
                        res.outputs.push(node);
                    }
                }
                for attr in attrs {
                    self.attr_value(&attr.value);
                }
            }
        }

        for dep in &task.deps {
            if let Some(node) = self.token_ref(dep) {
                res.dep_producers.push(node);
            }
        }
        self.decorator_args(&task.decorators);

        self.tables.task_res.insert(task.id, res);

        // The token becomes visible only after its producing task, so a
        // task can never depend on itself.
        if let Some(token) = &task.token {
            self.declare_checked(
                token,
                Binding {
                    kind: SymbolKind::Token,
                    span: token.span,
                    node: task.id,
                },
            );
        }
    }

    fn operand(&mut self, operand: &Operand) -> Option<NodeId> {
        match operand {
            Operand::Named { name, decorators } => {
                self.decorator_args(decorators);
                let binding = self.lookup_kinded(name, SymbolKind::Region)?;
                Some(binding.node)
            }
            Operand::Inline { region, decorators } => {
                self.decorator_args(decorators);
                self.region_expr(region);
                Some(region.id)
            }
        }
    }

    fn region_expr(&mut self, region: &RegionExpr) {
        if let Some(binding) = self.lookup_kinded(&region.buffer, SymbolKind::Buffer) {
            self.tables.region_buffer.insert(region.id, binding.node);
        }
        self.check_value_expr(&region.offset, true);
        self.check_value_expr(&region.extent, true);
        if let Some(shape) = &region.attrs.shape {
            for dim in shape {
                self.check_value_expr(dim, true);
            }
        }
        match &region.attrs.layout {
            Some(crate::ast::LayoutSpec::Strides(strides)) => {
                for stride in strides {
                    self.check_value_expr(stride, true);
                }
            }
            Some(crate::ast::LayoutSpec::Named { .. }) | None => {}
        }
        match &region.attrs.quant {
            Some(crate::ast::QuantSpec::PerChannel { axis, .. }) => {
                self.check_value_expr(axis, true)
            }
            Some(crate::ast::QuantSpec::PerGroup { axis, group, .. }) => {
                self.check_value_expr(axis, true);
                self.check_value_expr(group, true);
            }
            _ => {}
        }
    }

    fn token_ref(&mut self, name: &Ident) -> Option<NodeId> {
        let binding = self.lookup_kinded(name, SymbolKind::Token)?;
        Some(binding.node)
    }

    fn attr_value(&mut self, value: &crate::ast::AttrValueNode) {
        match value {
            crate::ast::AttrValueNode::Expr(expr) => self.check_value_expr(expr, false),
            crate::ast::AttrValueNode::List { items, .. } => {
                for item in items {
                    self.check_value_expr(item, false);
                }
            }
            _ => {}
        }
    }

    fn decorator_args(&mut self, decorators: &[Decorator]) {
        for decorator in decorators {
            for arg in &decorator.args {
                match arg {
                    DecoratorArg::Expr(expr) => {
                        // `@debug(name)` takes a free-form label, not a
                        // value reference.
                        if decorator.name.name == "debug" {
                            continue;
                        }
                        self.check_value_expr(expr, true);
                    }
                    DecoratorArg::Unit { index, .. } => self.check_value_expr(index, true),
                    DecoratorArg::Str { .. } => {}
                }
            }
        }
    }

    fn lookup_kinded(&mut self, name: &Ident, expected: SymbolKind) -> Option<Binding> {
        match self.scopes.lookup(&name.name) {
            Some(binding) if binding.kind == expected => Some(binding),
            Some(binding) => {
                self.collector.emit(
                    Diagnostic::error(format!(
                        "`{}` is a {}, but a {} is expected here",
                        name.name, binding.kind, expected
                    ))
                    .with_span(name.span),
                );
                None
            }
            None => {
                self.collector.emit(
                    Diagnostic::error(format!("unknown {expected} `{}`", name.name))
                        .with_span(name.span),
                );
                None
            }
        }
    }

    /// Declare, enforcing that constants never collide with or are
    /// shadowed by other names anywhere in the document.
    fn declare_checked(&mut self, name: &Ident, binding: Binding) {
        if binding.kind != SymbolKind::Const && self.all_consts.contains(&name.name) {
            self.collector.emit(
                Diagnostic::error(format!(
                    "`{}` shadows a constant of the same name",
                    name.name
                ))
                .with_span(name.span),
            );
            return;
        }
        if binding.kind == SymbolKind::Const {
            if let Some(existing) = self.scopes.lookup(&name.name) {
                if existing.kind != SymbolKind::Const {
                    self.collector.emit(
                        Diagnostic::error(format!(
                            "constant `{}` collides with a {} of the same name",
                            name.name, existing.kind
                        ))
                        .with_span(name.span),
                    );
                    return;
                }
            }
        }
        self.scopes.declare(name, binding, self.collector);
    }

    /// Check identifiers inside an integer-valued expression. Loop
    /// variables are legal except in operator-attribute position.
    fn check_value_expr(&mut self, expr: &Expr, allow_loop_vars: bool) {
        let mut idents = Vec::new();
        expr.idents(&mut idents);
        for name in idents {
            match self.scopes.lookup(name) {
                Some(binding) if binding.kind == SymbolKind::Const => {}
                Some(binding) if binding.kind == SymbolKind::LoopVar => {
                    if !allow_loop_vars {
                        self.collector.emit(
                            Diagnostic::error(format!(
                                "loop variable `{name}` cannot appear in an operator attribute"
                            ))
                            .with_span(expr.span()),
                        );
                    }
                }
                Some(binding) => {
                    self.collector.emit(
                        Diagnostic::error(format!(
                            "`{name}` is a {}, but a value is expected here",
                            binding.kind
                        ))
                        .with_span(expr.span()),
                    );
                }
                None if self.all_consts.contains(name) => {
                    self.collector.emit(
                        Diagnostic::error(format!(
                            "forward reference to constant `{name}`"
                        ))
                        .with_span(expr.span()),
                    );
                }
                None => {
                    self.collector.emit(
                        Diagnostic::error(format!("unknown identifier `{name}`"))
                            .with_span(expr.span()),
                    );
                }
            }
        }
    }
}
