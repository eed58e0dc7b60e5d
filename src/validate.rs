//! The ten-pass semantic validator.
//!
//! Passes run in a fixed order. Name resolution and constant evaluation
//! gate the rest: when either reports an error, later passes would mostly
//! produce noise and are skipped. Every pass after the gate runs
//! unconditionally so one invocation reports as many independent problems
//! as it can.
//!
//! The syntax tree is never annotated in place; every result lands in
//! [`SideTables`] keyed by node identity.

mod buffers;
mod consts;
mod decorators;
mod deps;
mod hazards;
mod loops;
mod placement;
mod regions;
mod scope;
mod typecheck;

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::ast::{LoopStmt, NodeId, Program, RegionExpr, Stmt, TaskStmt};
use crate::device::{Catalog, ResolvedDevice};
use crate::diag::{Collector, Diagnostic};
use crate::family::{Conformance, VariantRef};
use crate::model::{AttrVal, Env, Expr};
use crate::registry::Registry;

pub use regions::{QuantDesc, RegionError, RegionShape};
pub(crate) use regions::elaborate as elaborate_region;

/// The matched family variant of one compute task.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedVariant {
    pub variant: VariantRef,
    pub conformance: Conformance,
}

/// Resolution of one task's names, recorded by name resolution.
#[derive(Debug, Clone, Default)]
pub struct TaskResolution {
    /// Region-expression nodes read by the task, in operand order.
    pub inputs: Vec<NodeId>,
    /// Region-expression nodes written by the task, in operand order.
    pub outputs: Vec<NodeId>,
    /// Producing task of each `deps` entry, in order.
    pub dep_producers: Vec<NodeId>,
    /// Producing task of each `wait` token, in order.
    pub wait_producers: Vec<NodeId>,
}

/// Analysis results, keyed by stable node identity.
#[derive(Debug, Clone, Default)]
pub struct SideTables {
    /// Evaluated constants, in declaration order of their names.
    pub consts: BTreeMap<String, i64>,
    /// Compute task node to matched variant.
    pub matched: HashMap<NodeId, MatchedVariant>,
    /// Compute task node to fully resolved attributes (defaults applied).
    pub attrs: HashMap<NodeId, BTreeMap<String, AttrVal>>,
    /// Region-expression node to the buffer declaration it views.
    pub region_buffer: HashMap<NodeId, NodeId>,
    /// Task node to its resolved operands and dependencies.
    pub task_res: HashMap<NodeId, TaskResolution>,
}

impl SideTables {
    /// Environment with every constant bound.
    pub fn const_env(&self) -> Env {
        let mut env = Env::new();
        for (name, value) in &self.consts {
            env.bind(name, *value);
        }
        env
    }
}

/// Run all passes over a program against a device (or none, for
/// device-independent checking). Consumers query the collector for error
/// presence; the tables are meaningful only when it reports none.
pub fn validate(
    program: &Program,
    catalog: &Catalog,
    device: Option<&ResolvedDevice>,
    registry: &Registry,
    collector: &mut Collector,
) -> SideTables {
    let index = ProgramIndex::build(program);
    let mut tables = SideTables::default();

    let before = collector.error_count();
    scope::run(program, &index, &mut tables, collector);
    consts::run(program, &mut tables, collector);
    if collector.error_count() > before {
        debug!("name resolution or constant evaluation failed; later passes skipped");
        return tables;
    }

    buffers::run(&index, device, &tables, collector);
    regions::run(&index, &tables, collector);
    typecheck::run(&index, catalog, device, registry, &mut tables, collector);
    deps::run(&index, &tables, collector);
    hazards::run(&index, &tables, collector);
    placement::run(&index, &tables, collector);
    decorators::run(&index, device, &tables, collector);
    loops::run(&index, &tables, collector);

    tables
}

/// One task with its lexical loop context.
pub(crate) struct TaskCtx<'a> {
    pub stmt: &'a TaskStmt,
    /// Indices into `ProgramIndex::loops`, outermost first.
    pub loops: Vec<usize>,
    /// Source order among all tasks.
    pub order: usize,
}

pub(crate) struct BufferCtx<'a> {
    pub decl: &'a crate::ast::BufferDecl,
    pub loops: Vec<usize>,
}

pub(crate) struct RegionCtx<'a> {
    pub expr: &'a RegionExpr,
    pub loops: Vec<usize>,
}

pub(crate) struct LoopCtx<'a> {
    pub stmt: &'a LoopStmt,
    /// Enclosing loops, outermost first (excluding this one).
    pub loops: Vec<usize>,
}

/// Flattened view of the statement tree shared by the passes.
pub(crate) struct ProgramIndex<'a> {
    pub program: &'a Program,
    pub loops: Vec<LoopCtx<'a>>,
    pub tasks: Vec<TaskCtx<'a>>,
    pub buffers: Vec<BufferCtx<'a>>,
    pub regions: Vec<RegionCtx<'a>>,
    pub buffer_by_id: HashMap<NodeId, &'a crate::ast::BufferDecl>,
    pub region_by_id: HashMap<NodeId, &'a RegionExpr>,
    pub task_by_id: HashMap<NodeId, usize>,
}

impl<'a> ProgramIndex<'a> {
    pub fn build(program: &'a Program) -> Self {
        let mut index = ProgramIndex {
            program,
            loops: Vec::new(),
            tasks: Vec::new(),
            buffers: Vec::new(),
            regions: Vec::new(),
            buffer_by_id: HashMap::new(),
            region_by_id: HashMap::new(),
            task_by_id: HashMap::new(),
        };
        let mut chain = Vec::new();
        index.walk(&program.stmts, &mut chain);
        index
    }

    fn walk(&mut self, stmts: &'a [Stmt], chain: &mut Vec<usize>) {
        for stmt in stmts {
            match stmt {
                Stmt::Const(_) => {}
                Stmt::Buffer(decl) => {
                    self.buffer_by_id.insert(decl.id, decl);
                    self.buffers.push(BufferCtx {
                        decl,
                        loops: chain.clone(),
                    });
                }
                Stmt::Region(decl) => {
                    self.add_region(&decl.region, chain);
                }
                Stmt::Task(task) => {
                    for operand in task_operands(task) {
                        if let crate::ast::Operand::Inline { region, .. } = operand {
                            self.add_region(region, chain);
                        }
                    }
                    let order = self.tasks.len();
                    self.task_by_id.insert(task.id, order);
                    self.tasks.push(TaskCtx {
                        stmt: task,
                        loops: chain.clone(),
                        order,
                    });
                }
                Stmt::Loop(stmt) => {
                    let idx = self.loops.len();
                    self.loops.push(LoopCtx {
                        stmt,
                        loops: chain.clone(),
                    });
                    chain.push(idx);
                    self.walk(&stmt.body, chain);
                    chain.pop();
                }
            }
        }
    }

    fn add_region(&mut self, region: &'a RegionExpr, chain: &[usize]) {
        self.region_by_id.insert(region.id, region);
        self.regions.push(RegionCtx {
            expr: region,
            loops: chain.to_vec(),
        });
    }

    /// Loop statements for a context chain.
    pub fn loop_chain(&self, chain: &[usize]) -> Vec<&'a LoopStmt> {
        chain.iter().map(|&i| self.loops[i].stmt).collect()
    }
}

/// All operands of a task, inputs before outputs.
pub(crate) fn task_operands(task: &TaskStmt) -> Vec<&crate::ast::Operand> {
    match &task.call {
        crate::ast::TaskCall::Transfer { src, dst, .. }
        | crate::ast::TaskCall::Store { src, dst, .. } => vec![src, dst],
        crate::ast::TaskCall::Wait { .. } => Vec::new(),
        crate::ast::TaskCall::Compute { ins, outs, .. } => {
            ins.iter().chain(outs.iter()).collect()
        }
    }
}

/// Elaborate two regions under one environment, quietly: failures are
/// region validation's to report.
pub(crate) fn elaborate_shapes(
    index: &ProgramIndex<'_>,
    a: NodeId,
    b: NodeId,
    env: &Env,
) -> Option<(regions::RegionShape, regions::RegionShape)> {
    let a = regions::elaborate(index.region_by_id[&a], env).ok()?;
    let b = regions::elaborate(index.region_by_id[&b], env).ok()?;
    Some((a, b))
}

/// Evaluate an expression, reporting failures through the collector.
pub(crate) fn eval_report(expr: &Expr, env: &Env, collector: &mut Collector) -> Option<i64> {
    match expr.eval(env) {
        Ok(v) => Some(v),
        Err(e) => {
            collector.emit(Diagnostic::error(e.to_string()).with_span(e.span()));
            None
        }
    }
}

/// Environments covering the iteration space of a loop chain.
///
/// Exhaustive while the combination count stays under
/// [`crate::consts::MAX_STATIC_ITERATIONS`]; beyond that, each remaining
/// range contributes only its endpoints and a warning is emitted once.
pub(crate) fn iter_combos(
    loops: &[&LoopStmt],
    base: &Env,
    collector: &mut Collector,
) -> Vec<Env> {
    let mut out = Vec::new();
    let mut warned = false;
    expand_combo(loops, base.clone(), &mut out, &mut warned, collector);
    out
}

fn expand_combo(
    loops: &[&LoopStmt],
    env: Env,
    out: &mut Vec<Env>,
    warned: &mut bool,
    collector: &mut Collector,
) {
    let Some((head, rest)) = loops.split_first() else {
        out.push(env);
        return;
    };
    let (Some(start), Some(end)) = (
        eval_report(&head.start, &env, collector),
        eval_report(&head.end, &env, collector),
    ) else {
        return;
    };
    if start > end {
        // Reported by loop validation; nothing to enumerate.
        return;
    }
    let full = (end - start + 1) as usize;
    let sample_endpoints =
        out.len().saturating_add(full) > crate::consts::MAX_STATIC_ITERATIONS;
    if sample_endpoints && !*warned {
        *warned = true;
        collector.emit(Diagnostic::warning(format!(
            "loop `{}` iteration space is too large to check exhaustively; sampling range endpoints",
            head.var.name
        )));
    }
    let values: Vec<i64> = if sample_endpoints {
        if start == end {
            vec![start]
        } else {
            vec![start, end]
        }
    } else {
        (start..=end).collect()
    };
    for value in values {
        let mut child = env.clone();
        child.bind(&head.var.name, value);
        expand_combo(rest, child, out, warned, collector);
    }
}
