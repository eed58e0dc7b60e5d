//! Parameterized operator type families and conformance classes.

mod matcher;

pub use matcher::{match_operator, MatchOutcome, MatchRequest, NearMiss};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::ast::{
    AttrConstraintNode, AttrValueNode, Direction, FamilyDecl, Presence, TypeBinding,
};
use crate::diag::{Collector, Diagnostic};
use crate::model::{AttrVal, ElemType, Env};

/// Conformance class of a family variant at one type-parameter
/// instantiation. Devices MUST support `Must` variants of their declared
/// specification version; `May` variants are optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Conformance {
    Must,
    May,
}

/// Canonical reference to a family variant at a concrete instantiation,
/// e.g. `gemm.float<f16>.no_bias` or `cast.default`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VariantRef {
    pub family: String,
    pub type_args: Vec<ElemType>,
    pub variant: String,
}

impl VariantRef {
    pub fn new(family: impl Into<String>, type_args: Vec<ElemType>, variant: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            type_args,
            variant: variant.into(),
        }
    }
}

impl fmt::Display for VariantRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.family)?;
        if !self.type_args.is_empty() {
            write!(f, "<")?;
            for (i, ty) in self.type_args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{ty}")?;
            }
            write!(f, ">")?;
        }
        write!(f, ".{}", self.variant)
    }
}

/// Failure to parse a textual variant reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed variant reference `{0}`")]
pub struct VariantRefParseError(String);

impl FromStr for VariantRef {
    type Err = VariantRefParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || VariantRefParseError(s.to_string());
        if let Some(open) = s.find('<') {
            let family = &s[..open];
            let close = s.find('>').ok_or_else(err)?;
            if close < open || family.is_empty() {
                return Err(err());
            }
            let mut type_args = Vec::new();
            for part in s[open + 1..close].split(',') {
                let ty = ElemType::from_str(part.trim()).map_err(|_| err())?;
                type_args.push(ty);
            }
            let rest = &s[close + 1..];
            let variant = rest.strip_prefix('.').ok_or_else(err)?;
            if variant.is_empty() || variant.contains('.') {
                return Err(err());
            }
            Ok(Self::new(family, type_args, variant))
        } else {
            let (family, variant) = s.rsplit_once('.').ok_or_else(err)?;
            if family.is_empty() || variant.is_empty() {
                return Err(err());
            }
            Ok(Self::new(family, Vec::new(), variant))
        }
    }
}

/// One type parameter and its allowed instantiations.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeParamDef {
    pub name: String,
    pub allowed: Vec<ElemType>,
}

/// Operand-to-type binding within a family.
#[derive(Debug, Clone, PartialEq)]
pub struct OperandDef {
    pub name: String,
    pub dir: Direction,
    pub ty: TypeBinding,
}

/// Attribute constraint: a fixed value, mere presence, or forbidden.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrConstraint {
    Value(AttrVal),
    Required,
    Absent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttrRule {
    pub name: String,
    pub constraint: AttrConstraint,
}

/// One named variant of a family.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantDef {
    pub name: String,
    /// Presence overrides; operands not listed are required.
    pub operand_presence: BTreeMap<String, Presence>,
    pub attr_rules: Vec<AttrRule>,
    /// Operands whose quantization descriptor must be present.
    pub quant_required: BTreeSet<String>,
    pub must: BTreeSet<Vec<ElemType>>,
    pub may: BTreeSet<Vec<ElemType>>,
}

impl VariantDef {
    /// Every permitted instantiation with its conformance class, MUST
    /// entries first within the canonical element-type order.
    pub fn instantiations(&self) -> impl Iterator<Item = (&Vec<ElemType>, Conformance)> {
        self.must
            .iter()
            .map(|i| (i, Conformance::Must))
            .chain(
                self.may
                    .iter()
                    .filter(|i| !self.must.contains(*i))
                    .map(|i| (i, Conformance::May)),
            )
    }
}

/// A fully lowered type family.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyDef {
    pub name: String,
    pub params: Vec<TypeParamDef>,
    pub operands: Vec<OperandDef>,
    pub attrs: Vec<AttrRule>,
    pub variants: Vec<VariantDef>,
}

impl FamilyDef {
    /// Substitute an instantiation into an operand's type binding. `None`
    /// means the operand is unconstrained (`any`).
    pub fn bound_type(&self, operand: &OperandDef, inst: &[ElemType]) -> Option<ElemType> {
        match &operand.ty {
            TypeBinding::Concrete(ty) => Some(*ty),
            TypeBinding::Param(name) => {
                let idx = self.params.iter().position(|p| &p.name == name)?;
                inst.get(idx).copied()
            }
            TypeBinding::Any => None,
        }
    }

    pub fn variant(&self, name: &str) -> Option<&VariantDef> {
        self.variants.iter().find(|v| v.name == name)
    }

    /// Lower a parsed declaration, reporting inconsistencies through the
    /// collector.
    pub fn from_decl(decl: &FamilyDecl, collector: &mut Collector) -> Self {
        let name = decl.name.joined();
        let params: Vec<_> = decl
            .params
            .iter()
            .map(|p| TypeParamDef {
                name: p.name.name.clone(),
                allowed: p.allowed.clone(),
            })
            .collect();

        let operands: Vec<_> = decl
            .operands
            .iter()
            .map(|op| {
                if let TypeBinding::Param(param) = &op.ty {
                    if !params.iter().any(|p| &p.name == param) {
                        collector.emit(
                            Diagnostic::error(format!(
                                "operand `{}` references unknown type parameter `{param}`",
                                op.name.name
                            ))
                            .with_span(op.span),
                        );
                    }
                }
                OperandDef {
                    name: op.name.name.clone(),
                    dir: op.dir,
                    ty: op.ty.clone(),
                }
            })
            .collect();

        let attrs = lower_attr_rules(&decl.attrs, collector);

        let variants: Vec<_> = decl
            .variants
            .iter()
            .map(|v| {
                let mut presence = BTreeMap::new();
                for rule in &v.operand_rules {
                    if !operands.iter().any(|op| op.name == rule.operand.name) {
                        collector.emit(
                            Diagnostic::error(format!(
                                "variant `{}` constrains unknown operand `{}`",
                                v.name.name, rule.operand.name
                            ))
                            .with_span(rule.span),
                        );
                    }
                    if presence.insert(rule.operand.name.clone(), rule.presence).is_some() {
                        collector.emit(
                            Diagnostic::error(format!(
                                "duplicate presence rule for operand `{}`",
                                rule.operand.name
                            ))
                            .with_span(rule.span),
                        );
                    }
                }
                let check_arity = |insts: &[crate::ast::Instantiation],
                                   collector: &mut Collector| {
                    let mut out = BTreeSet::new();
                    for inst in insts {
                        if inst.args.len() != params.len() {
                            collector.emit(
                                Diagnostic::error(format!(
                                    "instantiation arity mismatch: family `{name}` has {} type parameter(s)",
                                    params.len()
                                ))
                                .with_span(inst.span),
                            );
                            continue;
                        }
                        for (arg, param) in inst.args.iter().zip(&params) {
                            if !param.allowed.is_empty() && !param.allowed.contains(arg) {
                                collector.emit(
                                    Diagnostic::error(format!(
                                        "`{arg}` is not an allowed instantiation of parameter `{}`",
                                        param.name
                                    ))
                                    .with_span(inst.span),
                                );
                            }
                        }
                        out.insert(inst.args.clone());
                    }
                    out
                };
                let must = check_arity(&v.must, collector);
                let may = check_arity(&v.may, collector);
                VariantDef {
                    name: v.name.name.clone(),
                    operand_presence: presence,
                    attr_rules: lower_attr_rules(&v.attr_rules, collector),
                    quant_required: v
                        .quant_required
                        .iter()
                        .map(|i| i.name.clone())
                        .collect(),
                    must,
                    may,
                }
            })
            .collect();

        Self {
            name,
            params,
            operands,
            attrs,
            variants,
        }
    }
}

fn lower_attr_rules(binds: &[crate::ast::AttrBind], collector: &mut Collector) -> Vec<AttrRule> {
    binds
        .iter()
        .filter_map(|bind| {
            let constraint = match &bind.constraint {
                AttrConstraintNode::Required { .. } => AttrConstraint::Required,
                AttrConstraintNode::Absent { .. } => AttrConstraint::Absent,
                AttrConstraintNode::Value(value) => {
                    AttrConstraint::Value(lower_attr_value(value, collector)?)
                }
            };
            Some(AttrRule {
                name: bind.name.name.clone(),
                constraint,
            })
        })
        .collect()
}

/// Catalog attribute values must be literal; there is no environment to
/// consult.
fn lower_attr_value(value: &AttrValueNode, collector: &mut Collector) -> Option<AttrVal> {
    let env = Env::new();
    let lowered = match value {
        AttrValueNode::Str { value, .. } => AttrVal::Str(value.clone()),
        AttrValueNode::Bool { value, .. } => AttrVal::Bool(*value),
        AttrValueNode::Elem { ty, .. } => AttrVal::Elem(*ty),
        AttrValueNode::Expr(expr) => {
            if let crate::model::Expr::Float { value, .. } = expr {
                AttrVal::Float(*value)
            } else {
                match expr.eval(&env) {
                    Ok(v) => AttrVal::Int(v),
                    Err(e) => {
                        collector.emit(
                            Diagnostic::error(format!(
                                "attribute value must be a literal: {e}"
                            ))
                            .with_span(expr.span()),
                        );
                        return None;
                    }
                }
            }
        }
        AttrValueNode::List { items, span } => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item.eval(&env) {
                    Ok(v) => out.push(v),
                    Err(e) => {
                        collector.emit(
                            Diagnostic::error(format!(
                                "attribute list entries must be literal: {e}"
                            ))
                            .with_span(*span),
                        );
                        return None;
                    }
                }
            }
            AttrVal::IntList(out)
        }
    };
    Some(lowered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_ref_display_round_trips() {
        for text in [
            "gemm.float<f16>.no_bias",
            "conv2d.int4.with_bias",
            "eltwise<i8>.default",
            "cast.default",
            "gemm.int8<i8, i8>.with_bias",
        ] {
            let parsed: VariantRef = text.parse().expect(text);
            assert_eq!(parsed.to_string(), text);
        }
    }

    #[test]
    fn malformed_variant_refs_are_rejected() {
        for text in ["gemm", "<f16>.x", "gemm.float<f64>.x", "gemm.float<f16>", ".x"] {
            assert!(text.parse::<VariantRef>().is_err(), "{text}");
        }
    }
}
