//! Pass 7: region aliasing hazards.
//!
//! Two accesses to overlapping byte ranges of one buffer, at least one a
//! write, must be ordered. Ordering comes from three sources: an explicit
//! token dependency path, loop drain (statements after a loop expand only
//! once it finishes), and bounded pipelining (iterations at distance of
//! at least the loop's `max_in_flight` never overlap in time). Within the
//! pipelining window, iteration pairs are checked explicitly. A write may
//! opt out through the overlap-permitting `@memmove` decorator on a
//! transfer.

use super::{iter_combos, ProgramIndex, SideTables, TaskCtx};
use crate::ast::{find_decorator, DecoratorArg, NodeId, TaskCall};
use crate::diag::{Collector, Diagnostic};
use crate::model::Env;
use crate::validate::regions::elaborate;

/// Evaluated byte range of one access.
struct Interval {
    buffer: NodeId,
    start: u64,
    end: u64,
    write: bool,
    /// Write permitted to overlap via `@memmove`.
    overlap_ok: bool,
}

/// Number of leading iteration values sampled from each end of a long
/// pipelined range.
const ITER_SAMPLE: i64 = 16;

pub(super) fn run(index: &ProgramIndex<'_>, tables: &SideTables, collector: &mut Collector) {
    let base = tables.const_env();
    let n = index.tasks.len();
    if n == 0 {
        return;
    }

    // Transitive dependency reachability between same-iteration task
    // instances.
    let mut reach: Vec<Vec<bool>> = vec![vec![false; n]; n];
    for ctx in &index.tasks {
        let consumer = ctx.order;
        let res = &tables.task_res[&ctx.stmt.id];
        for producer in res.dep_producers.iter().chain(&res.wait_producers) {
            let p = index.task_by_id[producer];
            if p < consumer {
                let row = reach[p].clone();
                reach[consumer][p] = true;
                for (i, reachable) in row.into_iter().enumerate() {
                    if reachable {
                        reach[consumer][i] = true;
                    }
                }
            }
        }
    }

    for a in 0..n {
        for b in a..n {
            check_pair(index, tables, &base, &reach, a, b, collector);
        }
    }
}

fn check_pair(
    index: &ProgramIndex<'_>,
    tables: &SideTables,
    base: &Env,
    reach: &[Vec<bool>],
    a: usize,
    b: usize,
    collector: &mut Collector,
) {
    let ta = &index.tasks[a];
    let tb = &index.tasks[b];
    if is_wait(ta) || is_wait(tb) {
        return;
    }

    let common = ta
        .loops
        .iter()
        .zip(&tb.loops)
        .take_while(|(x, y)| x == y)
        .count();

    // Same-iteration instances. If `a` sits in loops `b` is outside of,
    // those loops drain before `b` expands; a dependency path orders the
    // pair outright. A task never conflicts with itself in one instance.
    if a < b && ta.loops.len() == common && !reach[b][a] {
        let chain = index.loop_chain(&tb.loops);
        let mut scratch = Collector::new();
        for env in iter_combos(&chain, base, &mut scratch) {
            if report_conflict(index, tables, ta, tb, env.clone(), env, &[], &[], collector) {
                return;
            }
        }
    }

    // Cross-iteration instances of the innermost common loop, inside the
    // pipelining window. No token can cross iterations, so any overlap at
    // distance below the bound is a hazard.
    if common == 0 {
        return;
    }
    let loop_idx = ta.loops[common - 1];
    let pipelined = index.loops[loop_idx].stmt;
    let outer_chain = index.loop_chain(&ta.loops[..common - 1]);
    let extras_a = index.loop_chain(&ta.loops[common..]);
    let extras_b = index.loop_chain(&tb.loops[common..]);

    let mut scratch = Collector::new();
    for env0 in iter_combos(&outer_chain, base, &mut scratch) {
        let bound = match find_decorator(&pipelined.decorators, "max_in_flight")
            .and_then(|d| match d.args.first() {
                Some(DecoratorArg::Expr(expr)) => expr.eval(&env0).ok(),
                _ => None,
            }) {
            Some(bound) => bound,
            None => 1,
        };
        if bound <= 1 {
            continue;
        }
        let (Ok(start), Ok(end)) = (pipelined.start.eval(&env0), pipelined.end.eval(&env0))
        else {
            continue;
        };
        let d_max = (bound - 1).min(end - start);
        for d in 1..=d_max {
            for i in sample_range(start, end - d) {
                let mut env_early = env0.clone();
                env_early.bind(&pipelined.var.name, i);
                let mut env_late = env0.clone();
                env_late.bind(&pipelined.var.name, i + d);
                // Earlier task at the later iteration and vice versa are
                // both live inside the window.
                let hit = report_conflict(
                    index, tables, ta, tb, env_early.clone(), env_late.clone(),
                    &extras_a, &extras_b, collector,
                ) || (a != b
                    && report_conflict(
                        index, tables, ta, tb, env_late, env_early,
                        &extras_a, &extras_b, collector,
                    ));
                if hit {
                    return;
                }
            }
        }
    }
}

fn is_wait(ctx: &TaskCtx<'_>) -> bool {
    matches!(ctx.stmt.call, TaskCall::Wait { .. })
}

fn sample_range(start: i64, end: i64) -> Vec<i64> {
    if start > end {
        return Vec::new();
    }
    if end - start < 2 * ITER_SAMPLE {
        (start..=end).collect()
    } else {
        (start..start + ITER_SAMPLE)
            .chain(end - ITER_SAMPLE + 1..=end)
            .collect()
    }
}

/// Evaluate both tasks' accesses and report the first illegal overlap.
/// Returns true when a diagnostic was emitted for this pair.
#[allow(clippy::too_many_arguments)]
fn report_conflict(
    index: &ProgramIndex<'_>,
    tables: &SideTables,
    ta: &TaskCtx<'_>,
    tb: &TaskCtx<'_>,
    env_a: Env,
    env_b: Env,
    extras_a: &[&crate::ast::LoopStmt],
    extras_b: &[&crate::ast::LoopStmt],
    collector: &mut Collector,
) -> bool {
    let ivs_a = intervals(index, tables, ta, env_a, extras_a);
    let ivs_b = intervals(index, tables, tb, env_b, extras_b);

    for x in &ivs_a {
        for y in &ivs_b {
            if x.buffer != y.buffer || x.start >= y.end || y.start >= x.end {
                continue;
            }
            if !(x.write || y.write) {
                continue;
            }
            let legal = (!x.write || x.overlap_ok) && (!y.write || y.overlap_ok);
            if legal {
                continue;
            }
            let buffer = index.buffer_by_id[&x.buffer];
            collector.emit(
                Diagnostic::error(format!(
                    "overlapping accesses to buffer `{}` with no ordering dependency",
                    buffer.name.name
                ))
                .with_span(tb.stmt.span)
                .with_note("conflicting task here", Some(ta.stmt.span))
                .with_note(
                    "order the tasks with a token dependency, or mark an overlapping \
                     transfer `@memmove`",
                    None,
                ),
            );
            return true;
        }
    }
    false
}

fn intervals(
    index: &ProgramIndex<'_>,
    tables: &SideTables,
    task: &TaskCtx<'_>,
    env: Env,
    extras: &[&crate::ast::LoopStmt],
) -> Vec<Interval> {
    let mut scratch = Collector::new();
    let res = &tables.task_res[&task.stmt.id];
    let overlap_ok = matches!(
        task.stmt.call,
        TaskCall::Transfer { .. } | TaskCall::Store { .. }
    ) && find_decorator(&task.stmt.decorators, "memmove").is_some();

    let mut out = Vec::new();
    for env in iter_combos(extras, &env, &mut scratch) {
        for (node, write) in res
            .inputs
            .iter()
            .map(|n| (n, false))
            .chain(res.outputs.iter().map(|n| (n, true)))
        {
            let region = index.region_by_id[node];
            let Some(buffer) = tables.region_buffer.get(&region.id) else {
                continue;
            };
            let Ok(shape) = elaborate(region, &env) else {
                continue;
            };
            out.push(Interval {
                buffer: *buffer,
                start: shape.offset,
                end: shape.offset + shape.extent,
                write,
                overlap_ok: write && overlap_ok,
            });
        }
    }
    out
}
