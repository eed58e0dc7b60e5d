//! Pass 8: engine placement.
//!
//! A task executes on the engine owning any scratchpad it touches; a
//! single task must never straddle two engines' scratchpads. Loop-indexed
//! scratchpads are checked abstractly by enumerating the iteration space.

use std::collections::BTreeSet;

use super::{iter_combos, ProgramIndex, SideTables};
use crate::diag::{Collector, Diagnostic};
use crate::model::MemLevelKind;

pub(super) fn run(index: &ProgramIndex<'_>, tables: &SideTables, collector: &mut Collector) {
    let base = tables.const_env();

    for ctx in &index.tasks {
        let res = &tables.task_res[&ctx.stmt.id];
        let regions: Vec<_> = res.inputs.iter().chain(&res.outputs).collect();
        if regions.is_empty() {
            continue;
        }

        let loops = index.loop_chain(&ctx.loops);
        // Warnings about oversized iteration spaces were already emitted
        // by earlier passes; keep this pass quiet about enumeration.
        let mut scratch = Collector::new();
        let combos = iter_combos(&loops, &base, &mut scratch);

        'combos: for env in &combos {
            let mut engines = BTreeSet::new();
            for region_id in &regions {
                let region = index.region_by_id[region_id];
                let Some(buffer_id) = tables.region_buffer.get(&region.id) else {
                    continue;
                };
                let buffer = index.buffer_by_id[buffer_id];
                if buffer.level.kind != MemLevelKind::L1 {
                    continue;
                }
                let engine_expr = buffer.level.engine.as_ref().expect("parser enforces index");
                let Ok(engine) = engine_expr.eval(env) else {
                    continue 'combos;
                };
                engines.insert(engine);
            }
            if engines.len() > 1 {
                let listed = engines
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                collector.emit(
                    Diagnostic::error(format!(
                        "task references scratchpads of engines {listed}; a task must not straddle engines"
                    ))
                    .with_span(ctx.stmt.span),
                );
                break;
            }
        }
    }
}
