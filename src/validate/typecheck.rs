//! Pass 5: operator type checking.
//!
//! Resolves each compute task against the opcode registry (signature,
//! forms, attributes with defaults) and then against the device's
//! effective variant set through the type-family matcher. Transfer and
//! store tasks are checked for matching byte extents.

use std::collections::{BTreeMap, BTreeSet};

use super::{elaborate_shapes, iter_combos, MatchedVariant, ProgramIndex, SideTables, TaskCtx};
use crate::ast::{AttrValueNode, Form, TaskCall};
use crate::device::{Catalog, ResolvedDevice};
use crate::diag::{Collector, Diagnostic};
use crate::family::{match_operator, MatchOutcome, MatchRequest};
use crate::model::{AttrVal, ElemType, Env};
use crate::registry::{OpForm, OpSpec, Registry, ValueKind};

pub(super) fn run(
    index: &ProgramIndex<'_>,
    catalog: &Catalog,
    device: Option<&ResolvedDevice>,
    registry: &Registry,
    tables: &mut SideTables,
    collector: &mut Collector,
) {
    let base = tables.const_env();
    let mut updates = Vec::new();

    for ctx in &index.tasks {
        match &ctx.stmt.call {
            TaskCall::Compute { op, form, .. } => {
                if let Some(update) =
                    check_compute(index, ctx, op, *form, catalog, device, registry, tables, collector)
                {
                    updates.push((ctx.stmt.id, update));
                }
            }
            TaskCall::Transfer { .. } | TaskCall::Store { .. } => {
                check_move_extents(index, ctx, tables, &base, collector);
            }
            TaskCall::Wait { .. } => {}
        }
    }

    for (id, (matched, attrs)) in updates {
        if let Some(matched) = matched {
            tables.matched.insert(id, matched);
        }
        tables.attrs.insert(id, attrs);
    }
}

type ComputeUpdate = (Option<MatchedVariant>, BTreeMap<String, AttrVal>);

#[allow(clippy::too_many_arguments)]
fn check_compute(
    index: &ProgramIndex<'_>,
    ctx: &TaskCtx<'_>,
    op: &crate::ast::Ident,
    form: Form,
    catalog: &Catalog,
    device: Option<&ResolvedDevice>,
    registry: &Registry,
    tables: &SideTables,
    collector: &mut Collector,
) -> Option<ComputeUpdate> {
    let Some(spec) = registry.get(&op.name) else {
        collector.emit(
            Diagnostic::error(format!("unknown operator `{}`", op.name)).with_span(op.span),
        );
        return None;
    };

    let op_form = match form {
        Form::Async => OpForm::Async,
        Form::Sync => OpForm::Sync,
    };
    if !spec.supports_form(op_form) {
        collector.emit(
            Diagnostic::error(format!(
                "operator `{}` does not permit the `{op_form}` form",
                spec.name
            ))
            .with_span(op.span),
        );
    }

    let res = &tables.task_res[&ctx.stmt.id];
    let in_specs: Vec<_> = spec.inputs().collect();
    let out_specs: Vec<_> = spec.outputs().collect();

    let mut operand_types = BTreeMap::new();
    let mut operand_quant = BTreeSet::new();
    let mut bind = |nodes: &[crate::ast::NodeId],
                    specs: &[&crate::registry::OperandSpec],
                    variadic: bool,
                    dir: &str,
                    collector: &mut Collector|
     -> bool {
        if nodes.len() > specs.len() && !variadic {
            collector.emit(
                Diagnostic::error(format!(
                    "operator `{}` takes at most {} {dir} operand(s), {} given",
                    spec.name,
                    specs.len(),
                    nodes.len()
                ))
                .with_span(ctx.stmt.span),
            );
            return false;
        }
        let required = specs.iter().filter(|s| s.required).count();
        if nodes.len() < required {
            collector.emit(
                Diagnostic::error(format!(
                    "operator `{}` requires {required} {dir} operand(s), {} given",
                    spec.name,
                    nodes.len()
                ))
                .with_span(ctx.stmt.span),
            );
            return false;
        }
        for (i, node) in nodes.iter().enumerate() {
            // Variadic operators bind surplus operands to the final slot.
            let operand_spec = specs[i.min(specs.len() - 1)];
            let region = index.region_by_id[node];
            let Some(elem) = region.attrs.elem.as_ref().map(|e| e.ty) else {
                collector.emit(
                    Diagnostic::error(format!(
                        "operand `{}` of `{}` needs an element type for compute use",
                        operand_spec.name, spec.name
                    ))
                    .with_span(region.span),
                );
                return false;
            };
            if region.attrs.shape.is_none() {
                collector.emit(
                    Diagnostic::error(format!(
                        "operand `{}` of `{}` needs a shape for compute use",
                        operand_spec.name, spec.name
                    ))
                    .with_span(region.span),
                );
                return false;
            }
            operand_types.insert(operand_spec.name.clone(), elem);
            if region.attrs.quant.is_some() {
                operand_quant.insert(operand_spec.name.clone());
            }
        }
        true
    };

    let ok_in = bind(&res.inputs, &in_specs, spec.variadic_in, "input", collector);
    let ok_out = bind(&res.outputs, &out_specs, spec.variadic_out, "output", collector);

    let attrs = resolve_attrs(ctx, spec, tables, collector)?;
    if !(ok_in && ok_out) {
        return Some((None, attrs));
    }

    let matched = match device {
        None => None,
        Some(device) => {
            let effective = device.effective(&spec.families);
            let request = MatchRequest {
                families: &spec.families,
                operand_types: &operand_types,
                operand_quant: &operand_quant,
                attrs: &attrs,
            };
            match match_operator(&catalog.families, &effective, &request) {
                MatchOutcome::Matched {
                    variant,
                    conformance,
                } => Some(MatchedVariant {
                    variant,
                    conformance,
                }),
                MatchOutcome::Failed { nearest } => {
                    let types = operand_types
                        .iter()
                        .map(|(name, ty)| format!("{name}: {ty}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let mut diag = Diagnostic::error(format!(
                        "no variant supported by device `{}` matches `{}` with operand types ({types})",
                        device.name, spec.name
                    ))
                    .with_span(ctx.stmt.span);
                    if let Some(near) = nearest {
                        diag = diag.with_note(
                            format!(
                                "nearest variant is `{}` ({} operand type mismatch(es))",
                                near.variant, near.mismatches
                            ),
                            None,
                        );
                    }
                    collector.emit(diag);
                    None
                }
            }
        }
    };

    Some((matched, attrs))
}

/// Lower written attributes to values, check kinds against the registry,
/// and fill defaults.
fn resolve_attrs(
    ctx: &TaskCtx<'_>,
    spec: &OpSpec,
    tables: &SideTables,
    collector: &mut Collector,
) -> Option<BTreeMap<String, AttrVal>> {
    let TaskCall::Compute { attrs, .. } = &ctx.stmt.call else {
        return None;
    };
    let env = tables.const_env();
    let mut resolved = BTreeMap::new();
    let mut failed = false;

    for assign in attrs {
        let Some(attr_spec) = spec.attribute(&assign.name.name) else {
            collector.emit(
                Diagnostic::error(format!(
                    "operator `{}` has no attribute `{}`",
                    spec.name, assign.name.name
                ))
                .with_span(assign.name.span),
            );
            failed = true;
            continue;
        };
        if resolved.contains_key(&assign.name.name) {
            collector.emit(
                Diagnostic::error(format!("attribute `{}` given twice", assign.name.name))
                    .with_span(assign.name.span),
            );
            failed = true;
            continue;
        }
        match lower_attr(&assign.value, attr_spec.kind, &env) {
            Some(value) => {
                resolved.insert(assign.name.name.clone(), value);
            }
            None => {
                collector.emit(
                    Diagnostic::error(format!(
                        "attribute `{}` expects a {} value",
                        assign.name.name, attr_spec.kind
                    ))
                    .with_span(assign.value.span()),
                );
                failed = true;
            }
        }
    }

    for attr_spec in &spec.attributes {
        if resolved.contains_key(&attr_spec.name) {
            continue;
        }
        if let Some(default) = &attr_spec.default {
            resolved.insert(attr_spec.name.clone(), default.clone());
        } else if attr_spec.required {
            collector.emit(
                Diagnostic::error(format!(
                    "operator `{}` requires attribute `{}`",
                    spec.name, attr_spec.name
                ))
                .with_span(ctx.stmt.span),
            );
            failed = true;
        }
    }

    if failed {
        None
    } else {
        Some(resolved)
    }
}

fn lower_attr(value: &AttrValueNode, kind: ValueKind, env: &Env) -> Option<AttrVal> {
    match (kind, value) {
        (ValueKind::Bool, AttrValueNode::Bool { value, .. }) => Some(AttrVal::Bool(*value)),
        (ValueKind::Str, AttrValueNode::Str { value, .. }) => Some(AttrVal::Str(value.clone())),
        (ValueKind::ElemType, AttrValueNode::Elem { ty, .. }) => Some(AttrVal::Elem(*ty)),
        (ValueKind::ElemType, AttrValueNode::Expr(crate::model::Expr::Ident { name, .. })) => {
            name.parse::<ElemType>().ok().map(AttrVal::Elem)
        }
        (ValueKind::Ident, AttrValueNode::Expr(crate::model::Expr::Ident { name, .. })) => {
            Some(AttrVal::Str(name.clone()))
        }
        (ValueKind::IntList, AttrValueNode::List { items, .. }) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(item.eval(env).ok()?);
            }
            Some(AttrVal::IntList(out))
        }
        (ValueKind::Float, AttrValueNode::Expr(expr)) => match expr {
            crate::model::Expr::Float { value, .. } => Some(AttrVal::Float(*value)),
            _ => expr.eval(env).ok().map(|v| AttrVal::Float(v as f64)),
        },
        (ValueKind::Int, AttrValueNode::Expr(expr)) => expr.eval(env).ok().map(AttrVal::Int),
        _ => None,
    }
}

/// Transfer and store tasks must name source and destination regions of
/// equal byte extent.
fn check_move_extents(
    index: &ProgramIndex<'_>,
    ctx: &TaskCtx<'_>,
    tables: &SideTables,
    base: &Env,
    collector: &mut Collector,
) {
    let res = &tables.task_res[&ctx.stmt.id];
    let (Some(src_id), Some(dst_id)) = (res.inputs.first(), res.outputs.first()) else {
        return;
    };
    let loops = index.loop_chain(&ctx.loops);
    let combos = iter_combos(&loops, base, collector);
    for env in &combos {
        let Some((src, dst)) = elaborate_shapes(index, *src_id, *dst_id, env) else {
            // Elaboration problems are region validation's to report.
            return;
        };
        if src.extent != dst.extent {
            collector.emit(
                Diagnostic::error(format!(
                    "transfer copies {} bytes into a {}-byte destination region",
                    src.extent, dst.extent
                ))
                .with_span(ctx.stmt.span),
            );
            return;
        }
    }
}
