//! Pass 10: loop validation.
//!
//! Range sanity and the pipelining bound. Variable freshness is enforced
//! by name resolution and constant placement by constant evaluation.

use super::{eval_report, iter_combos, ProgramIndex, SideTables};
use crate::ast::{find_decorator, DecoratorArg};
use crate::diag::{Collector, Diagnostic};

pub(super) fn run(index: &ProgramIndex<'_>, tables: &SideTables, collector: &mut Collector) {
    let base = tables.const_env();

    for ctx in &index.loops {
        let stmt = ctx.stmt;
        let outer = index.loop_chain(&ctx.loops);
        let combos = iter_combos(&outer, &base, collector);

        for env in &combos {
            let (Some(start), Some(end)) = (
                eval_report(&stmt.start, env, collector),
                eval_report(&stmt.end, env, collector),
            ) else {
                break;
            };
            if start > end {
                collector.emit(
                    Diagnostic::error(format!(
                        "loop range {start} .. {end} runs backwards"
                    ))
                    .with_span(stmt.span),
                );
                break;
            }
        }

        let Some(decorator) = find_decorator(&stmt.decorators, "max_in_flight") else {
            continue;
        };
        let Some(DecoratorArg::Expr(arg)) = decorator.args.first() else {
            // Malformed arguments are decorator validation's to report.
            continue;
        };
        for env in &combos {
            let Some(bound) = eval_report(arg, env, collector) else {
                break;
            };
            if bound < 1 {
                collector.emit(
                    Diagnostic::error(format!(
                        "max_in_flight({bound}) must allow at least one active iteration"
                    ))
                    .with_span(decorator.span),
                );
                break;
            }
        }
    }
}
