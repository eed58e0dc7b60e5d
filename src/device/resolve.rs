//! Inheritance resolution and post-resolution validation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use itertools::Itertools;
use tracing::debug;

use super::{Catalog, DeviceError, ResolvedDevice, Topology};
use crate::ast::{CatalogItem, DeviceDecl, Document, VariantRefNode};
use crate::diag::{Collector, Diagnostic, Span};
use crate::family::{FamilyDef, VariantRef};
use crate::model::{Env, Expr};

/// Resolve every device and family declared across `docs`. Inline device
/// declarations from program documents participate like any other.
///
/// Problems surface as error diagnostics; offending devices are dropped
/// from the result so downstream layers never see a half-merged config.
pub fn resolve(docs: &[Document], collector: &mut Collector) -> Catalog {
    let mut families: BTreeMap<String, FamilyDef> = BTreeMap::new();
    let mut decls: Vec<&DeviceDecl> = Vec::new();

    for doc in docs {
        let items: Box<dyn Iterator<Item = &CatalogItem>> = match &doc.body {
            crate::ast::DocBody::Catalog(catalog) => Box::new(catalog.items.iter()),
            crate::ast::DocBody::Program(_) => Box::new(std::iter::empty()),
        };
        for item in items {
            match item {
                CatalogItem::Family(decl) => {
                    let lowered = FamilyDef::from_decl(decl, collector);
                    if families.contains_key(&lowered.name) {
                        emit(
                            collector,
                            DeviceError::DuplicateFamily {
                                name: lowered.name.clone(),
                            },
                            Some(decl.span),
                        );
                    } else {
                        families.insert(lowered.name.clone(), lowered);
                    }
                }
                CatalogItem::Device(decl) => decls.push(decl),
            }
        }
    }
    for doc in docs {
        if let Some(program) = doc.program() {
            if let Some(crate::ast::DeviceDirective::Inline(decl)) = &program.device {
                decls.push(decl);
            }
        }
    }

    let mut by_name: HashMap<&str, &DeviceDecl> = HashMap::new();
    for decl in &decls {
        if by_name.insert(decl.name.name.as_str(), decl).is_some() {
            emit(
                collector,
                DeviceError::DuplicateDevice {
                    name: decl.name.name.clone(),
                },
                Some(decl.name.span),
            );
        }
    }

    let order = inheritance_order(&by_name, collector);

    let mut devices: BTreeMap<String, ResolvedDevice> = BTreeMap::new();
    for name in order {
        let decl = by_name[name.as_str()];
        let parent = match &decl.parent {
            Some(parent) => match devices.get(parent.name.as_str()) {
                Some(resolved) => Some(resolved.clone()),
                // Missing or cyclic parent was already reported; skip the
                // child rather than resolving against garbage.
                None => continue,
            },
            None => None,
        };
        if let Some(device) = lower_device(decl, parent.as_ref(), &families, collector) {
            validate_device(&device, &families, collector);
            devices.insert(device.name.clone(), device);
        }
    }

    Catalog { families, devices }
}

fn emit(collector: &mut Collector, err: DeviceError, span: Option<Span>) {
    let mut diag = Diagnostic::error(err.to_string());
    if let Some(span) = span {
        diag = diag.with_span(span);
    }
    collector.emit(diag);
}

/// Parents-before-children order over the single-parent forest. Cycles
/// and dangling parents are reported and their members dropped.
fn inheritance_order(
    by_name: &HashMap<&str, &DeviceDecl>,
    collector: &mut Collector,
) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
        Dropped,
    }

    let mut marks: HashMap<String, Mark> = HashMap::new();
    let mut order = Vec::new();
    // Deterministic iteration: declaration names sorted.
    let names: Vec<&str> = by_name.keys().copied().sorted().collect();

    fn visit(
        name: &str,
        by_name: &HashMap<&str, &DeviceDecl>,
        marks: &mut HashMap<String, Mark>,
        order: &mut Vec<String>,
        chain: &mut Vec<String>,
        collector: &mut Collector,
    ) -> Mark {
        if let Some(mark) = marks.get(name) {
            if *mark == Mark::Visiting {
                let mut cycle: Vec<String> = chain
                    .iter()
                    .skip_while(|n| n.as_str() != name)
                    .cloned()
                    .collect();
                cycle.push(name.to_string());
                emit(
                    collector,
                    DeviceError::DeviceCycle { chain: cycle },
                    by_name.get(name).map(|d| d.name.span),
                );
                return Mark::Dropped;
            }
            return *mark;
        }
        let decl = by_name[name];
        marks.insert(name.to_string(), Mark::Visiting);
        chain.push(name.to_string());
        let mark = match &decl.parent {
            Some(parent) => match by_name.get(parent.name.as_str()) {
                Some(_) => visit(&parent.name, by_name, marks, order, chain, collector),
                None => {
                    emit(
                        collector,
                        DeviceError::MissingParent {
                            child: name.to_string(),
                            parent: parent.name.clone(),
                        },
                        Some(parent.span),
                    );
                    Mark::Dropped
                }
            },
            None => Mark::Done,
        };
        chain.pop();
        if mark == Mark::Done {
            order.push(name.to_string());
        }
        marks.insert(name.to_string(), mark);
        mark
    }

    for name in names {
        let mut chain = Vec::new();
        visit(name, by_name, &mut marks, &mut order, &mut chain, collector);
    }
    order
}

fn lower_device(
    decl: &DeviceDecl,
    parent: Option<&ResolvedDevice>,
    families: &BTreeMap<String, FamilyDef>,
    collector: &mut Collector,
) -> Option<ResolvedDevice> {
    debug!(device = %decl.name.name, "resolving device");

    let spec_version = match (&decl.spec_version, parent) {
        (Some(v), None) => v.version.clone(),
        (None, Some(parent)) => parent.spec_version.clone(),
        (Some(v), Some(_)) => {
            collector.emit(
                Diagnostic::error(format!(
                    "device `{}` inherits its specification version and must not redeclare it",
                    decl.name.name
                ))
                .with_span(v.span),
            );
            return None;
        }
        (None, None) => {
            collector.emit(
                Diagnostic::error(format!(
                    "base device `{}` must declare `spec_version`",
                    decl.name.name
                ))
                .with_span(decl.name.span),
            );
            return None;
        }
    };

    // A child topology replaces the parent's wholesale.
    let topology = match &decl.topology {
        Some(topo) => lower_topology(topo, collector),
        None => parent.and_then(|p| p.topology.clone()),
    };

    let mut characteristics = parent
        .map(|p| p.characteristics.clone())
        .unwrap_or_default();
    for chars in &decl.characteristics {
        let group = characteristics
            .entry(chars.unit.name.clone())
            .or_default();
        for (key, value) in &chars.keys {
            match eval_const(value, collector) {
                Some(v) => {
                    group.insert(key.name.clone(), v);
                }
                None => return None,
            }
        }
    }

    let mut mandatory = parent.map(|p| p.mandatory.clone()).unwrap_or_default();
    let mut extended = parent.map(|p| p.extended.clone()).unwrap_or_default();
    for node in &decl.mandatory {
        if let Some(vref) = lower_variant_ref(node, families, collector) {
            mandatory.insert(vref);
        }
    }
    for node in &decl.extended {
        if let Some(vref) = lower_variant_ref(node, families, collector) {
            extended.insert(vref);
        }
    }

    Some(ResolvedDevice {
        name: decl.name.name.clone(),
        spec_version,
        topology,
        characteristics,
        mandatory,
        extended,
    })
}

fn lower_topology(
    topo: &crate::ast::TopologyDecl,
    collector: &mut Collector,
) -> Option<Topology> {
    let engines = require_field(topo.engines.as_ref(), "engines", topo.span, collector)?;
    let l2_size = require_field(topo.l2_size.as_ref(), "l2_size_bytes", topo.span, collector)?;
    let l1_size = require_field(topo.l1_size.as_ref(), "l1_size_bytes", topo.span, collector)?;

    let mut device_units = BTreeMap::new();
    for uc in &topo.device_units {
        let count = eval_const(&uc.count, collector)?;
        device_units.insert(uc.unit.name.clone(), count.max(0) as u32);
        if count < 0 {
            collector.emit(
                Diagnostic::error(format!(
                    "device-level unit count for `{}` must be non-negative",
                    uc.unit.name
                ))
                .with_span(uc.count.span()),
            );
        }
    }
    let mut per_engine_units = BTreeMap::new();
    for uc in &topo.per_engine_units {
        let count = eval_const(&uc.count, collector)?;
        if count < 1 {
            collector.emit(
                Diagnostic::error(format!(
                    "per-engine unit count for `{}` must be at least 1",
                    uc.unit.name
                ))
                .with_span(uc.count.span()),
            );
        }
        per_engine_units.insert(uc.unit.name.clone(), count.max(1) as u32);
    }

    if engines < 1 {
        collector.emit(
            Diagnostic::error("topology must declare at least one engine").with_span(topo.span),
        );
        return None;
    }
    if l2_size <= 0 || l1_size <= 0 {
        collector.emit(
            Diagnostic::error("topology memory capacities must be positive").with_span(topo.span),
        );
        return None;
    }

    Some(Topology {
        engines: engines as u32,
        l2_size: l2_size as u64,
        device_units,
        per_engine_units,
        l1_size: l1_size as u64,
    })
}

fn require_field(
    field: Option<&Expr>,
    name: &str,
    span: Span,
    collector: &mut Collector,
) -> Option<i64> {
    match field {
        Some(expr) => eval_const(expr, collector),
        None => {
            collector.emit(
                Diagnostic::error(format!("topology is missing `{name}`")).with_span(span),
            );
            None
        }
    }
}

fn eval_const(expr: &Expr, collector: &mut Collector) -> Option<i64> {
    match expr.eval(&Env::new()) {
        Ok(v) => Some(v),
        Err(e) => {
            collector.emit(
                Diagnostic::error(format!("configuration value must be constant: {e}"))
                    .with_span(e.span()),
            );
            None
        }
    }
}

/// Check a written variant reference against the known families and turn
/// it into its canonical form.
fn lower_variant_ref(
    node: &VariantRefNode,
    families: &BTreeMap<String, FamilyDef>,
    collector: &mut Collector,
) -> Option<VariantRef> {
    let family_name = node.family.joined();
    let Some(family) = families.get(&family_name) else {
        collector.emit(
            Diagnostic::error(format!("reference to unknown type family `{family_name}`"))
                .with_span(node.span),
        );
        return None;
    };
    let Some(variant) = family.variant(&node.variant.name) else {
        collector.emit(
            Diagnostic::error(format!(
                "family `{family_name}` has no variant `{}`",
                node.variant.name
            ))
            .with_span(node.span),
        );
        return None;
    };
    let permitted = variant.must.contains(&node.type_args) || variant.may.contains(&node.type_args);
    if !permitted {
        let vref = VariantRef::new(family_name, node.type_args.clone(), &node.variant.name);
        collector.emit(
            Diagnostic::error(format!(
                "`{vref}` is not a permitted instantiation of variant `{}`",
                node.variant.name
            ))
            .with_span(node.span),
        );
        return None;
    }
    Some(VariantRef::new(
        family_name,
        node.type_args.clone(),
        &node.variant.name,
    ))
}

/// Post-resolution checks: set disjointness and MUST coverage. Topology
/// checks already ran during lowering; abstract devices are validated
/// lazily when selected for execution.
fn validate_device(
    device: &ResolvedDevice,
    families: &BTreeMap<String, FamilyDef>,
    collector: &mut Collector,
) {
    for vref in device.mandatory.intersection(&device.extended) {
        emit(
            collector,
            DeviceError::SetDisjointness {
                device: device.name.clone(),
                variant: vref.to_string(),
            },
            None,
        );
    }

    if device.is_abstract() {
        return;
    }
    let mut must = BTreeSet::new();
    for family in families.values() {
        for variant in &family.variants {
            for inst in &variant.must {
                must.insert(VariantRef::new(&family.name, inst.clone(), &variant.name));
            }
        }
    }
    for vref in must.difference(&device.mandatory) {
        emit(
            collector,
            DeviceError::MissingMustVariant {
                device: device.name.clone(),
                variant: vref.to_string(),
            },
            None,
        );
    }
}
