//! Pass 9: decorator validation.
//!
//! Every decorator name must belong to the closed kind set, carry the
//! right argument shape, and sit on an element that supports it.
//! `@resource` targets must name a per-engine unit of the device.

use std::str::FromStr;

use super::{iter_combos, ProgramIndex, SideTables, TaskCtx};
use crate::ast::{Decorator, DecoratorArg, Operand, TaskCall};
use crate::consts::SEQUENCER_UNIT;
use crate::device::ResolvedDevice;
use crate::diag::{Collector, Diagnostic};
use crate::model::{DecoratorKind, Env, Expr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
enum Attach {
    Buffer,
    Operand,
    Task,
    Loop,
}

pub(super) fn run(
    index: &ProgramIndex<'_>,
    device: Option<&ResolvedDevice>,
    tables: &SideTables,
    collector: &mut Collector,
) {
    let checker = Checker {
        index,
        device,
        base: tables.const_env(),
    };

    for ctx in &index.buffers {
        for decorator in &ctx.decl.decorators {
            checker.check(decorator, Attach::Buffer, None, collector);
        }
    }

    for ctx in &index.tasks {
        for decorator in &ctx.stmt.decorators {
            checker.check(decorator, Attach::Task, Some(ctx), collector);
        }
        for operand in super::task_operands(ctx.stmt) {
            let decorators = match operand {
                Operand::Named { decorators, .. } | Operand::Inline { decorators, .. } => {
                    decorators
                }
            };
            for decorator in decorators {
                checker.check(decorator, Attach::Operand, Some(ctx), collector);
            }
        }
    }

    for ctx in &index.loops {
        for decorator in &ctx.stmt.decorators {
            checker.check(decorator, Attach::Loop, None, collector);
        }
    }
}

struct Checker<'a> {
    index: &'a ProgramIndex<'a>,
    device: Option<&'a ResolvedDevice>,
    base: Env,
}

impl Checker<'_> {
    fn check(
        &self,
        decorator: &Decorator,
        attach: Attach,
        task: Option<&TaskCtx<'_>>,
        collector: &mut Collector,
    ) {
        let Ok(kind) = DecoratorKind::from_str(&decorator.name.name) else {
            collector.emit(
                Diagnostic::error(format!("unknown decorator `@{}`", decorator.name.name))
                    .with_span(decorator.span),
            );
            return;
        };

        if decorator.args.len() != kind.arity() {
            collector.emit(
                Diagnostic::error(format!(
                    "`@{kind}` takes {} argument(s), {} given",
                    kind.arity(),
                    decorator.args.len()
                ))
                .with_span(decorator.span),
            );
            return;
        }

        let allowed: &[Attach] = match kind {
            DecoratorKind::Materialized => &[Attach::Task, Attach::Operand],
            DecoratorKind::Deterministic => &[Attach::Task],
            DecoratorKind::Memmove => &[Attach::Task],
            DecoratorKind::Readonly | DecoratorKind::Writeonly => {
                &[Attach::Buffer, Attach::Operand]
            }
            DecoratorKind::MaxInFlight => &[Attach::Loop],
            DecoratorKind::Resource | DecoratorKind::Debug | DecoratorKind::Profile => {
                &[Attach::Task]
            }
        };
        if !allowed.contains(&attach) {
            collector.emit(
                Diagnostic::error(format!("`@{kind}` cannot be attached to a {attach}"))
                    .with_span(decorator.span),
            );
            return;
        }

        match kind {
            DecoratorKind::Memmove => {
                if let Some(ctx) = task {
                    if !matches!(
                        ctx.stmt.call,
                        TaskCall::Transfer { .. } | TaskCall::Store { .. }
                    ) {
                        collector.emit(
                            Diagnostic::error(
                                "`@memmove` applies only to transfer and store tasks".to_string(),
                            )
                            .with_span(decorator.span),
                        );
                    }
                }
            }
            DecoratorKind::MaxInFlight => {
                if !matches!(decorator.args.first(), Some(DecoratorArg::Expr(_))) {
                    collector.emit(
                        Diagnostic::error("`@max_in_flight` expects an integer bound".to_string())
                            .with_span(decorator.span),
                    );
                }
            }
            DecoratorKind::Debug => {
                let ok = matches!(
                    decorator.args.first(),
                    Some(DecoratorArg::Str { .. }) | Some(DecoratorArg::Expr(Expr::Ident { .. }))
                );
                if !ok {
                    collector.emit(
                        Diagnostic::error("`@debug` expects a name".to_string())
                            .with_span(decorator.span),
                    );
                }
            }
            DecoratorKind::Profile => {
                if !matches!(decorator.args.first(), Some(DecoratorArg::Str { .. })) {
                    collector.emit(
                        Diagnostic::error("`@profile` expects a string tag".to_string())
                            .with_span(decorator.span),
                    );
                }
            }
            DecoratorKind::Resource => self.check_resource(decorator, task, collector),
            _ => {}
        }
    }

    /// `@resource(unit_type[index])`: the unit must be a per-engine unit
    /// type of the device, never a device-level unit and never the
    /// sequencer; every reachable index must fall inside the per-engine
    /// count.
    fn check_resource(
        &self,
        decorator: &Decorator,
        task: Option<&TaskCtx<'_>>,
        collector: &mut Collector,
    ) {
        let Some(DecoratorArg::Unit { unit, index, .. }) = decorator.args.first() else {
            collector.emit(
                Diagnostic::error("`@resource` expects a `unit_type[index]` target".to_string())
                    .with_span(decorator.span),
            );
            return;
        };
        if unit.name == SEQUENCER_UNIT {
            collector.emit(
                Diagnostic::error("tasks cannot be pinned to the sequencer".to_string())
                    .with_span(decorator.span),
            );
            return;
        }
        let Some(topology) = self.device.and_then(|d| d.topology.as_ref()) else {
            return;
        };
        if topology.device_units.contains_key(&unit.name) {
            collector.emit(
                Diagnostic::error(format!(
                    "`{}` is a device-level unit type; `@resource` targets per-engine units",
                    unit.name
                ))
                .with_span(decorator.span),
            );
            return;
        }
        let Some(&count) = topology.per_engine_units.get(&unit.name) else {
            collector.emit(
                Diagnostic::error(format!("unknown per-engine unit type `{}`", unit.name))
                    .with_span(decorator.span),
            );
            return;
        };

        // The index may use loop variables; enumerate the task's
        // iteration space without re-emitting sampling warnings.
        let loops = task
            .map(|ctx| self.index.loop_chain(&ctx.loops))
            .unwrap_or_default();
        let mut scratch = Collector::new();
        for env in iter_combos(&loops, &self.base, &mut scratch) {
            let Ok(value) = index.eval(&env) else {
                continue;
            };
            if value < 0 || value as u64 >= count as u64 {
                collector.emit(
                    Diagnostic::error(format!(
                        "`{}[{value}]` is outside the {count} per-engine instance(s)",
                        unit.name
                    ))
                    .with_span(decorator.span),
                );
                return;
            }
        }
    }
}
