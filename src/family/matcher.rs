//! The pure type-family matcher.
//!
//! Given an operator instance and a device's effective variant set, decide
//! whether one of the device-supported parameterized variants accepts the
//! instance. The matcher never mutates anything; same inputs, same answer.

use std::collections::{BTreeMap, BTreeSet};

use super::{AttrConstraint, Conformance, FamilyDef, VariantRef};
use crate::ast::Presence;
use crate::model::{AttrVal, ElemType};

/// One operator instance to check.
#[derive(Debug)]
pub struct MatchRequest<'a> {
    /// Families the registry associates with the operator, in declaration
    /// order.
    pub families: &'a [String],
    /// Supplied operands by role name and their element types.
    pub operand_types: &'a BTreeMap<String, ElemType>,
    /// Roles whose regions carry a quantization descriptor.
    pub operand_quant: &'a BTreeSet<String>,
    /// Resolved attributes, registry defaults already applied.
    pub attrs: &'a BTreeMap<String, AttrVal>,
}

/// The nearest failed candidate, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearMiss {
    pub variant: VariantRef,
    /// Operand element-type mismatches against that candidate.
    pub mismatches: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched {
        variant: VariantRef,
        conformance: Conformance,
    },
    Failed {
        nearest: Option<NearMiss>,
    },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

/// Check an operator instance against the effective set. Returns the first
/// matching variant in family/variant/instantiation order, or the nearest
/// miss by operand-type distance.
pub fn match_operator(
    families: &BTreeMap<String, FamilyDef>,
    effective: &BTreeSet<VariantRef>,
    request: &MatchRequest<'_>,
) -> MatchOutcome {
    let mut nearest: Option<NearMiss> = None;

    for family_name in request.families {
        let Some(family) = families.get(family_name) else {
            continue;
        };
        for variant in &family.variants {
            for (inst, conformance) in variant.instantiations() {
                let vref = VariantRef::new(&family.name, inst.clone(), &variant.name);
                if !effective.contains(&vref) {
                    continue;
                }
                match candidate_distance(family, variant, inst, request) {
                    Some(0) => {
                        return MatchOutcome::Matched {
                            variant: vref,
                            conformance,
                        }
                    }
                    Some(mismatches) => {
                        let closer = nearest
                            .as_ref()
                            .map(|n| mismatches < n.mismatches)
                            .unwrap_or(true);
                        if closer {
                            nearest = Some(NearMiss {
                                variant: vref,
                                mismatches,
                            });
                        }
                    }
                    None => {}
                }
            }
        }
    }

    MatchOutcome::Failed { nearest }
}

/// Distance of the request from one candidate: `Some(0)` on a full match,
/// `Some(n)` when only `n` operand element types differ, `None` when a
/// structural rule (presence, attribute, quantization) rules it out.
fn candidate_distance(
    family: &FamilyDef,
    variant: &super::VariantDef,
    inst: &[ElemType],
    request: &MatchRequest<'_>,
) -> Option<usize> {
    let mut mismatches = 0usize;

    for operand in &family.operands {
        let presence = variant
            .operand_presence
            .get(&operand.name)
            .copied()
            .unwrap_or(Presence::Required);
        let supplied = request.operand_types.get(&operand.name);
        match (presence, supplied) {
            (Presence::Absent, Some(_)) => return None,
            (Presence::Absent, None) => {}
            (Presence::Required, None) => return None,
            (Presence::Required, Some(actual)) => {
                if let Some(expected) = family.bound_type(operand, inst) {
                    if *actual != expected {
                        mismatches += 1;
                    }
                }
            }
        }
    }

    // A supplied operand the family does not know is a structural reject.
    for name in request.operand_types.keys() {
        if !family.operands.iter().any(|op| &op.name == name) {
            return None;
        }
    }

    // Variant rules override family-level rules of the same name.
    let mut rules: Vec<&super::AttrRule> = Vec::new();
    for rule in family.attrs.iter().chain(&variant.attr_rules) {
        rules.retain(|r| r.name != rule.name);
        rules.push(rule);
    }
    for rule in rules {
        let supplied = request.attrs.get(&rule.name);
        match (&rule.constraint, supplied) {
            (AttrConstraint::Absent, Some(_)) => return None,
            (AttrConstraint::Absent, None) => {}
            (AttrConstraint::Required, None) => return None,
            (AttrConstraint::Required, Some(_)) => {}
            (AttrConstraint::Value(_), None) => return None,
            (AttrConstraint::Value(expected), Some(actual)) => {
                if expected != actual {
                    return None;
                }
            }
        }
    }

    for operand in &variant.quant_required {
        if !request.operand_quant.contains(operand) {
            return None;
        }
    }

    Some(mismatches)
}
