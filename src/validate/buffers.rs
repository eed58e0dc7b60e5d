//! Pass 3: buffer validation.
//!
//! Sizes, alignments, level validity against the device, and static
//! capacity accounting per memory space. Buffers declared inside loops
//! contribute once per iteration, matching the engine's linear allocator.

use std::collections::BTreeMap;

use super::{eval_report, iter_combos, ProgramIndex, SideTables};
use crate::consts::DDR_CAPACITY;
use crate::device::{DeviceError, ResolvedDevice};
use crate::diag::{Collector, Diagnostic};
use crate::model::{MemLevelKind, MemSpace};

pub(super) fn run(
    index: &ProgramIndex<'_>,
    device: Option<&ResolvedDevice>,
    tables: &SideTables,
    collector: &mut Collector,
) {
    let topology = match device {
        Some(device) => match &device.topology {
            Some(topology) => Some(topology),
            None => {
                collector.emit(Diagnostic::error(
                    DeviceError::MissingTopology {
                        device: device.name.clone(),
                    }
                    .to_string(),
                ));
                None
            }
        },
        None => None,
    };

    let base = tables.const_env();
    let mut usage: BTreeMap<MemSpace, u64> = BTreeMap::new();

    for ctx in &index.buffers {
        let decl = ctx.decl;
        let loops = index.loop_chain(&ctx.loops);
        let combos = iter_combos(&loops, &base, collector);

        for env in &combos {
            let (Some(size), Some(align)) = (
                eval_report(&decl.size, env, collector),
                eval_report(&decl.align, env, collector),
            ) else {
                break;
            };
            if size <= 0 {
                collector.emit(
                    Diagnostic::error(format!(
                        "buffer `{}` has non-positive size {size}",
                        decl.name.name
                    ))
                    .with_span(decl.size.span()),
                );
                break;
            }
            if align <= 0 || !(align as u64).is_power_of_two() {
                collector.emit(
                    Diagnostic::error(format!(
                        "buffer `{}` alignment {align} is not a positive power of two",
                        decl.name.name
                    ))
                    .with_span(decl.align.span()),
                );
                break;
            }

            let space = match decl.level.kind {
                MemLevelKind::Ddr => MemSpace::Ddr,
                MemLevelKind::L2 => MemSpace::L2,
                MemLevelKind::L1 => {
                    let engine_expr = decl.level.engine.as_ref().expect("parser enforces index");
                    let Some(engine) = eval_report(engine_expr, env, collector) else {
                        break;
                    };
                    let engines = topology.map(|t| t.engines).unwrap_or(u32::MAX);
                    if engine < 0 || engine as u64 >= engines as u64 {
                        collector.emit(
                            Diagnostic::error(format!(
                                "scratchpad index {engine} is outside the device's {engines} engine(s)"
                            ))
                            .with_span(engine_expr.span()),
                        );
                        break;
                    }
                    MemSpace::L1(engine as u32)
                }
            };
            *usage.entry(space).or_default() += size as u64;
        }
    }

    let Some(topology) = topology else {
        return;
    };
    for (space, used) in usage {
        let capacity = match space {
            MemSpace::Ddr => DDR_CAPACITY,
            MemSpace::L2 => topology.l2_size,
            MemSpace::L1(_) => topology.l1_size,
        };
        if used > capacity {
            collector.emit(Diagnostic::error(format!(
                "buffers declared in {space} need {used} bytes, exceeding its {capacity}-byte capacity"
            )));
        }
    }
}
