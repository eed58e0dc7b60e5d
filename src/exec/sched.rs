//! Lazy task-graph expansion and the cooperative scheduler.
//!
//! The expander is a frame stack: block frames instantiate statements in
//! source order, loop frames admit iterations while the active count
//! stays under `max_in_flight`. Expansion never executes anything; the
//! scheduler interleaves it with dispatching ready tasks, each of which
//! runs atomically from dispatch to completion.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use super::backend::Backend;
use super::memory::MemoryImage;
use super::receipt::{Receipt, TaskKind};
use super::token::{TokenId, TokenSet};
use super::view;
use super::{ExecError, Execution, RunState, SchedPolicy};
use crate::ast::{
    find_decorator, BufferDecl, Decorator, DecoratorArg, Form, LoopStmt, Operand, RegionExpr,
    Stmt, TaskCall, TaskStmt,
};
use crate::device::Topology;
use crate::model::{AttrVal, Env, Expr, MemLevelKind, MemSpace};
use crate::registry::Registry;
use crate::validate::{self, RegionShape, SideTables};

/// Identity of one instantiated task, in instantiation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

/// A region bound to concrete bytes.
#[derive(Debug, Clone)]
struct BoundRegion {
    buffer: String,
    space: MemSpace,
    /// Buffer base address within the space.
    base: u64,
    buffer_size: u64,
    shape: RegionShape,
    readonly: bool,
    writeonly: bool,
}

impl BoundRegion {
    fn abs_start(&self) -> u64 {
        self.base + self.shape.offset
    }

    fn abs_end(&self) -> u64 {
        self.abs_start() + self.shape.extent
    }
}

#[derive(Debug, Clone)]
enum TaskOp {
    Move {
        src: BoundRegion,
        dst: BoundRegion,
        store: bool,
        overlap_ok: bool,
    },
    Compute {
        op: String,
        ins: Vec<BoundRegion>,
        outs: Vec<BoundRegion>,
        attrs: BTreeMap<String, AttrVal>,
    },
    Wait,
}

#[derive(Debug, Clone)]
struct Task {
    op: TaskOp,
    deps: Vec<TokenId>,
    token: Option<TokenId>,
    engine: Option<u32>,
    iters: Vec<usize>,
    label: Option<String>,
    profile: Option<String>,
    unsatisfied: usize,
    done: bool,
}

#[derive(Debug, Clone)]
struct BufferBinding {
    space: MemSpace,
    base: u64,
    size: u64,
    readonly: bool,
    writeonly: bool,
}

#[derive(Debug, Default)]
struct ScopeBindings {
    buffers: HashMap<String, BufferBinding>,
    regions: HashMap<String, BoundRegion>,
    tokens: HashMap<String, TokenId>,
    var: Option<(String, i64)>,
}

enum Frame<'a> {
    Block {
        stmts: &'a [Stmt],
        idx: usize,
        scope: ScopeBindings,
        iter: Option<usize>,
    },
    Loop {
        stmt: &'a LoopStmt,
        next: i64,
        end: i64,
        bound: u64,
        active: Vec<usize>,
    },
}

struct IterState {
    outstanding: usize,
    instantiated: bool,
}

pub(super) struct Machine<'a, B> {
    tables: &'a SideTables,
    registry: &'a Registry,
    backend: &'a mut B,
    inputs: &'a HashMap<String, Vec<u8>>,
    base_env: Env,
    memory: MemoryImage,
    tokens: TokenSet,
    tasks: Vec<Task>,
    ready: BTreeSet<usize>,
    waiting: HashMap<TokenId, Vec<usize>>,
    frames: Vec<Frame<'a>>,
    iterations: Vec<IterState>,
    receipts: Vec<Receipt>,
    profile: BTreeMap<String, u64>,
    pending: usize,
    rng: Option<StdRng>,
}

impl<'a, B: Backend> Machine<'a, B> {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        program: &'a crate::ast::Program,
        tables: &'a SideTables,
        topology: &Topology,
        registry: &'a Registry,
        backend: &'a mut B,
        policy: SchedPolicy,
        inputs: &'a HashMap<String, Vec<u8>>,
    ) -> Result<Self, ExecError> {
        let rng = match policy {
            SchedPolicy::SourceOrder => None,
            SchedPolicy::Randomized { seed } => Some(StdRng::seed_from_u64(seed)),
        };
        let mut machine = Self {
            tables,
            registry,
            backend,
            inputs,
            base_env: tables.const_env(),
            memory: MemoryImage::new(topology),
            tokens: TokenSet::new(),
            tasks: Vec::new(),
            ready: BTreeSet::new(),
            waiting: HashMap::new(),
            frames: Vec::new(),
            iterations: Vec::new(),
            receipts: Vec::new(),
            profile: BTreeMap::new(),
            pending: 0,
            rng,
        };
        machine.frames.push(Frame::Block {
            stmts: &program.stmts,
            idx: 0,
            scope: ScopeBindings::default(),
            iter: None,
        });
        Ok(machine)
    }

    pub(super) fn run(mut self, max_steps: Option<u64>) -> Result<Execution, ExecError> {
        let mut steps = 0u64;
        let state = loop {
            self.pump()?;
            if self.frames.is_empty() && self.pending == 0 {
                break RunState::Completed;
            }
            if let Some(max) = max_steps {
                if steps >= max {
                    break RunState::Suspended;
                }
            }
            let Some(next) = self.pick_ready() else {
                return Err(ExecError::SchedulerInvariant {
                    message: format!(
                        "no task is ready with {} task(s) outstanding",
                        self.pending
                    ),
                });
            };
            self.dispatch(next)?;
            steps += 1;
        };
        Ok(Execution::new(state, self.memory, self.receipts, self.profile))
    }

    // ------------------------------------------------------- expansion

    /// Advance the frame stack as far as instantiation alone allows.
    fn pump(&mut self) -> Result<(), ExecError> {
        loop {
            let top_is_block = match self.frames.last() {
                None => return Ok(()),
                Some(Frame::Block { .. }) => true,
                Some(Frame::Loop { .. }) => false,
            };
            if top_is_block {
                let (stmt, iter) = {
                    let Some(Frame::Block { stmts, idx, iter, .. }) = self.frames.last_mut()
                    else {
                        unreachable!("checked above");
                    };
                    // Copy the program-lifetime slice out so the
                    // statement reference outlives this frame borrow.
                    let body: &'a [Stmt] = *stmts;
                    if *idx < body.len() {
                        let stmt = &body[*idx];
                        *idx += 1;
                        (Some(stmt), None)
                    } else {
                        (None, *iter)
                    }
                };
                match stmt {
                    Some(stmt) => self.exec_stmt(stmt)?,
                    None => {
                        self.frames.pop();
                        if let Some(it) = iter {
                            self.iterations[it].instantiated = true;
                        }
                    }
                }
            } else {
                // Retire iterations that are fully instantiated with
                // no task left incomplete.
                {
                    let iterations = &self.iterations;
                    let Some(Frame::Loop { active, .. }) = self.frames.last_mut() else {
                        unreachable!("checked above");
                    };
                    active.retain(|&it| {
                        let state = &iterations[it];
                        !(state.instantiated && state.outstanding == 0)
                    });
                }
                enum Step<'s> {
                    Start(&'s LoopStmt, i64),
                    Pop,
                    Blocked,
                }
                let step = {
                    let Some(Frame::Loop {
                        stmt,
                        next,
                        end,
                        bound,
                        active,
                    }) = self.frames.last()
                    else {
                        unreachable!("checked above");
                    };
                    if (active.len() as u64) < *bound && *next <= *end {
                        Step::Start(*stmt, *next)
                    } else if *next > *end && active.is_empty() {
                        Step::Pop
                    } else {
                        Step::Blocked
                    }
                };
                match step {
                    Step::Start(stmt, i) => {
                        let it = self.iterations.len();
                        self.iterations.push(IterState {
                            outstanding: 0,
                            instantiated: false,
                        });
                        if let Some(Frame::Loop { next, active, .. }) = self.frames.last_mut()
                        {
                            *next += 1;
                            active.push(it);
                        }
                        trace!(var = %stmt.var.name, iteration = i, "starting loop iteration");
                        let scope = ScopeBindings {
                            var: Some((stmt.var.name.clone(), i)),
                            ..ScopeBindings::default()
                        };
                        self.frames.push(Frame::Block {
                            stmts: &stmt.body,
                            idx: 0,
                            scope,
                            iter: Some(it),
                        });
                    }
                    Step::Pop => {
                        self.frames.pop();
                    }
                    Step::Blocked => return Ok(()),
                }
            }
        }
    }

    fn exec_stmt(&mut self, stmt: &'a Stmt) -> Result<(), ExecError> {
        match stmt {
            Stmt::Const(_) => Ok(()),
            Stmt::Buffer(decl) => self.alloc_buffer(decl),
            Stmt::Region(decl) => {
                let region = self.bind_region(&decl.region)?;
                self.top_scope().regions.insert(decl.name.name.clone(), region);
                Ok(())
            }
            Stmt::Task(task) => self.instantiate_task(task),
            Stmt::Loop(stmt) => {
                let env = self.env();
                let start = self.eval(&stmt.start, &env)?;
                let end = self.eval(&stmt.end, &env)?;
                let bound = match find_decorator(&stmt.decorators, "max_in_flight") {
                    Some(dec) => match dec.args.first() {
                        Some(DecoratorArg::Expr(expr)) => self.eval(expr, &env)?.max(1) as u64,
                        _ => 1,
                    },
                    None => 1,
                };
                self.frames.push(Frame::Loop {
                    stmt,
                    next: start,
                    end,
                    bound,
                    active: Vec::new(),
                });
                Ok(())
            }
        }
    }

    fn alloc_buffer(&mut self, decl: &BufferDecl) -> Result<(), ExecError> {
        let env = self.env();
        let size = self.eval(&decl.size, &env)? as u64;
        let align = self.eval(&decl.align, &env)? as u64;
        let space = match decl.level.kind {
            MemLevelKind::Ddr => MemSpace::Ddr,
            MemLevelKind::L2 => MemSpace::L2,
            MemLevelKind::L1 => {
                let expr = decl.level.engine.as_ref().expect("parser enforces index");
                MemSpace::L1(self.eval(expr, &env)? as u32)
            }
        };
        let base = self.memory.alloc(space, &decl.name.name, size, align)?;
        if let Some(bytes) = self.inputs.get(&decl.name.name) {
            if bytes.len() as u64 != size {
                return Err(ExecError::InputSize {
                    buffer: decl.name.name.clone(),
                    expected: size,
                    given: bytes.len() as u64,
                });
            }
            self.memory.write(space, base, bytes)?;
        }
        let binding = BufferBinding {
            space,
            base,
            size,
            readonly: find_decorator(&decl.decorators, "readonly").is_some(),
            writeonly: find_decorator(&decl.decorators, "writeonly").is_some(),
        };
        self.top_scope().buffers.insert(decl.name.name.clone(), binding);
        Ok(())
    }

    fn bind_region(&self, region: &RegionExpr) -> Result<BoundRegion, ExecError> {
        let env = self.env();
        let buffer = self.find_buffer(&region.buffer.name)?;
        let shape = validate::elaborate_region(region, &env)
            .map_err(|e| ExecError::Region { message: e.message })?;
        if shape.offset + shape.extent > buffer.size {
            return Err(ExecError::Region {
                message: format!(
                    "region [{}, {}) exceeds buffer `{}` of {} bytes",
                    shape.offset,
                    shape.offset + shape.extent,
                    region.buffer.name,
                    buffer.size
                ),
            });
        }
        Ok(BoundRegion {
            buffer: region.buffer.name.clone(),
            space: buffer.space,
            base: buffer.base,
            buffer_size: buffer.size,
            shape,
            readonly: buffer.readonly,
            writeonly: buffer.writeonly,
        })
    }

    fn operand_region(&self, operand: &Operand) -> Result<BoundRegion, ExecError> {
        let (mut region, decorators) = match operand {
            Operand::Named { name, decorators } => {
                let region = self.find_region(&name.name)?;
                (region, decorators)
            }
            Operand::Inline { region, decorators } => (self.bind_region(region)?, decorators),
        };
        if find_decorator(decorators, "readonly").is_some() {
            region.readonly = true;
        }
        if find_decorator(decorators, "writeonly").is_some() {
            region.writeonly = true;
        }
        Ok(region)
    }

    fn instantiate_task(&mut self, task: &'a TaskStmt) -> Result<(), ExecError> {
        let mut deps = Vec::new();
        for dep in &task.deps {
            deps.push(self.find_token(&dep.name)?);
        }

        let (op, is_sync) = match &task.call {
            TaskCall::Transfer { form, src, dst } | TaskCall::Store { form, src, dst } => {
                let store = matches!(task.call, TaskCall::Store { .. });
                let op = TaskOp::Move {
                    src: self.operand_region(src)?,
                    dst: self.operand_region(dst)?,
                    store,
                    overlap_ok: find_decorator(&task.decorators, "memmove").is_some(),
                };
                (op, *form == Form::Sync)
            }
            TaskCall::Wait { tokens } => {
                for name in tokens {
                    deps.push(self.find_token(&name.name)?);
                }
                (TaskOp::Wait, false)
            }
            TaskCall::Compute { op, form, ins, outs, .. } => {
                let ins = ins
                    .iter()
                    .map(|o| self.operand_region(o))
                    .collect::<Result<Vec<_>, _>>()?;
                let outs = outs
                    .iter()
                    .map(|o| self.operand_region(o))
                    .collect::<Result<Vec<_>, _>>()?;
                let attrs = self
                    .tables
                    .attrs
                    .get(&task.id)
                    .cloned()
                    .unwrap_or_default();
                (
                    TaskOp::Compute {
                        op: op.name.clone(),
                        ins,
                        outs,
                        attrs,
                    },
                    *form == Form::Sync,
                )
            }
        };

        let engine = task_engine(&op);
        let produces = task.token.is_some() || is_sync;
        let token = produces.then(|| self.tokens.fresh());
        let iters = self.iter_chain();
        let (label, profile) = annotations(&task.decorators);

        let id = self.push_task(Task {
            op,
            deps,
            token,
            engine,
            iters: iters.clone(),
            label,
            profile,
            unsatisfied: 0,
            done: false,
        });
        trace!(task = id, "instantiated task");

        if let (Some(name), Some(token)) = (&task.token, token) {
            self.top_scope().tokens.insert(name.name.clone(), token);
        }

        // The synchronous form is the asynchronous form followed by a
        // wait on its own token.
        if is_sync {
            let token = token.expect("sync tasks always produce a token");
            self.push_task(Task {
                op: TaskOp::Wait,
                deps: vec![token],
                token: None,
                engine: None,
                iters,
                label: None,
                profile: None,
                unsatisfied: 0,
                done: false,
            });
        }
        Ok(())
    }

    fn push_task(&mut self, mut task: Task) -> usize {
        let id = self.tasks.len();
        for &it in &task.iters {
            self.iterations[it].outstanding += 1;
        }
        task.unsatisfied = task
            .deps
            .iter()
            .filter(|t| !self.tokens.is_satisfied(**t))
            .count();
        for dep in &task.deps {
            if !self.tokens.is_satisfied(*dep) {
                self.waiting.entry(*dep).or_default().push(id);
            }
        }
        if task.unsatisfied == 0 {
            self.ready.insert(id);
        }
        self.pending += 1;
        self.tasks.push(task);
        id
    }

    // ------------------------------------------------------- dispatch

    fn pick_ready(&mut self) -> Option<usize> {
        if self.ready.is_empty() {
            return None;
        }
        let picked = match &mut self.rng {
            None => *self.ready.iter().next().expect("non-empty"),
            Some(rng) => {
                let nth = rng.gen_range(0..self.ready.len());
                *self.ready.iter().nth(nth).expect("in range")
            }
        };
        self.ready.remove(&picked);
        Some(picked)
    }

    fn dispatch(&mut self, id: usize) -> Result<(), ExecError> {
        let task = self.tasks[id].clone();
        trace!(task = id, "dispatching");

        let (kind, op_name, bytes_moved) = match &task.op {
            TaskOp::Move {
                src,
                dst,
                store,
                overlap_ok,
            } => {
                self.check_read(src)?;
                self.check_write(dst)?;
                let overlapping = src.space == dst.space
                    && src.abs_start() < dst.abs_end()
                    && dst.abs_start() < src.abs_end();
                if overlapping && !overlap_ok {
                    return Err(ExecError::TransferOverlap {
                        buffer: dst.buffer.clone(),
                    });
                }
                let data = self
                    .memory
                    .read(src.space, src.abs_start(), src.shape.extent)?
                    .to_vec();
                self.memory.write(dst.space, dst.abs_start(), &data)?;
                let kind = if *store { TaskKind::Store } else { TaskKind::Transfer };
                (kind, None, src.shape.extent)
            }
            TaskOp::Compute { op, ins, outs, attrs } => {
                let moved = self.dispatch_compute(op, ins, outs, attrs)?;
                (TaskKind::Compute, Some(op.clone()), moved)
            }
            TaskOp::Wait => {
                for dep in &task.deps {
                    if !self.tokens.is_satisfied(*dep) {
                        return Err(ExecError::SchedulerInvariant {
                            message: format!("wait dispatched with {dep} unsatisfied"),
                        });
                    }
                }
                (TaskKind::Wait, None, 0)
            }
        };

        self.tasks[id].done = true;
        self.pending -= 1;
        for &it in &task.iters {
            self.iterations[it].outstanding -= 1;
        }

        if let Some(token) = task.token {
            if !self.tokens.satisfy(token) {
                return Err(ExecError::SchedulerInvariant {
                    message: format!("{token} satisfied twice"),
                });
            }
            for consumer in self.waiting.remove(&token).unwrap_or_default() {
                let entry = &mut self.tasks[consumer];
                entry.unsatisfied -= 1;
                if entry.unsatisfied == 0 && !entry.done {
                    self.ready.insert(consumer);
                }
            }
        }

        if let Some(tag) = &task.profile {
            *self.profile.entry(tag.clone()).or_default() += 1;
        }
        self.receipts.push(Receipt {
            task: TaskId(id as u32),
            kind,
            op: op_name,
            engine: task.engine,
            bytes_moved,
            token: task.token,
            label: task.label.clone(),
            profile: task.profile.clone(),
        });
        Ok(())
    }

    fn dispatch_compute(
        &mut self,
        op: &str,
        ins: &[BoundRegion],
        outs: &[BoundRegion],
        attrs: &BTreeMap<String, AttrVal>,
    ) -> Result<u64, ExecError> {
        if self.registry.get(op).is_none() {
            return Err(ExecError::SchedulerInvariant {
                message: format!("operator `{op}` reached dispatch without a registry entry"),
            });
        }
        if !self.backend.supports(op) {
            return Err(ExecError::UnsupportedOperator(op.to_string()));
        }

        let mut in_tensors = Vec::with_capacity(ins.len());
        for region in ins {
            self.check_read(region)?;
            let bytes = self
                .memory
                .read(region.space, region.abs_start(), region.shape.extent)?;
            in_tensors.push(view::read_tensor(bytes, &region.shape)?);
        }
        let mut out_tensors = Vec::with_capacity(outs.len());
        for region in outs {
            self.check_write(region)?;
            let elem = region.shape.elem.ok_or(ExecError::Region {
                message: "compute output region has no element type".to_string(),
            })?;
            let dims = region.shape.shape.iter().map(|&d| d as usize).collect();
            out_tensors.push(view::Tensor::zeros(elem, dims));
        }

        self.backend
            .execute(op, &in_tensors, &mut out_tensors, attrs)
            .map_err(|e| ExecError::Backend {
                op: op.to_string(),
                message: e.message,
            })?;

        let mut moved = 0;
        for (region, tensor) in outs.iter().zip(&out_tensors) {
            // Read-modify-write keeps untouched bytes (and the other
            // nibble of packed elements) intact.
            let mut window = self
                .memory
                .read(region.space, region.abs_start(), region.shape.extent)?
                .to_vec();
            view::write_tensor(&mut window, &region.shape, tensor)?;
            self.memory.write(region.space, region.abs_start(), &window)?;
            moved += region.shape.extent;
        }
        Ok(moved)
    }

    fn check_read(&self, region: &BoundRegion) -> Result<(), ExecError> {
        if region.writeonly {
            return Err(ExecError::WriteOnlyViolation {
                buffer: region.buffer.clone(),
            });
        }
        self.check_bounds(region)
    }

    fn check_write(&self, region: &BoundRegion) -> Result<(), ExecError> {
        if region.readonly {
            return Err(ExecError::ReadOnlyViolation {
                buffer: region.buffer.clone(),
            });
        }
        self.check_bounds(region)
    }

    fn check_bounds(&self, region: &BoundRegion) -> Result<(), ExecError> {
        if region.shape.offset + region.shape.extent > region.buffer_size {
            return Err(ExecError::Region {
                message: format!(
                    "region [{}, {}) exceeds buffer `{}` of {} bytes",
                    region.shape.offset,
                    region.shape.offset + region.shape.extent,
                    region.buffer,
                    region.buffer_size
                ),
            });
        }
        Ok(())
    }

    // -------------------------------------------------------- lookups

    fn top_scope(&mut self) -> &mut ScopeBindings {
        for frame in self.frames.iter_mut().rev() {
            if let Frame::Block { scope, .. } = frame {
                return scope;
            }
        }
        unreachable!("a block frame is always on the stack during expansion")
    }

    fn env(&self) -> Env {
        let mut env = self.base_env.clone();
        for frame in &self.frames {
            if let Frame::Block {
                scope: ScopeBindings {
                    var: Some((name, value)),
                    ..
                },
                ..
            } = frame
            {
                env.bind(name, *value);
            }
        }
        env
    }

    fn eval(&self, expr: &Expr, env: &Env) -> Result<i64, ExecError> {
        expr.eval(env).map_err(|e| ExecError::Eval {
            message: e.to_string(),
        })
    }

    fn iter_chain(&self) -> Vec<usize> {
        self.frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Block { iter, .. } => *iter,
                Frame::Loop { .. } => None,
            })
            .collect()
    }

    fn find_buffer(&self, name: &str) -> Result<BufferBinding, ExecError> {
        for frame in self.frames.iter().rev() {
            if let Frame::Block { scope, .. } = frame {
                if let Some(binding) = scope.buffers.get(name) {
                    return Ok(binding.clone());
                }
            }
        }
        Err(ExecError::SchedulerInvariant {
            message: format!("unbound buffer `{name}` at expansion"),
        })
    }

    fn find_region(&self, name: &str) -> Result<BoundRegion, ExecError> {
        for frame in self.frames.iter().rev() {
            if let Frame::Block { scope, .. } = frame {
                if let Some(region) = scope.regions.get(name) {
                    return Ok(region.clone());
                }
            }
        }
        Err(ExecError::SchedulerInvariant {
            message: format!("unbound region `{name}` at expansion"),
        })
    }

    fn find_token(&self, name: &str) -> Result<TokenId, ExecError> {
        for frame in self.frames.iter().rev() {
            if let Frame::Block { scope, .. } = frame {
                if let Some(token) = scope.tokens.get(name) {
                    return Ok(*token);
                }
            }
        }
        Err(ExecError::SchedulerInvariant {
            message: format!("unbound token `{name}` at expansion"),
        })
    }
}

fn task_engine(op: &TaskOp) -> Option<u32> {
    let regions: Vec<&BoundRegion> = match op {
        TaskOp::Move { src, dst, .. } => vec![src, dst],
        TaskOp::Compute { ins, outs, .. } => ins.iter().chain(outs).collect(),
        TaskOp::Wait => Vec::new(),
    };
    regions.into_iter().find_map(|r| r.space.engine())
}

fn annotations(decorators: &[Decorator]) -> (Option<String>, Option<String>) {
    let label = find_decorator(decorators, "debug").and_then(|d| match d.args.first() {
        Some(DecoratorArg::Str { value, .. }) => Some(value.clone()),
        Some(DecoratorArg::Expr(Expr::Ident { name, .. })) => Some(name.clone()),
        _ => None,
    });
    let profile = find_decorator(decorators, "profile").and_then(|d| match d.args.first() {
        Some(DecoratorArg::Str { value, .. }) => Some(value.clone()),
        _ => None,
    });
    (label, profile)
}
