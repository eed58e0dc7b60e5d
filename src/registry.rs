//! Data-driven operator catalog.
//!
//! The catalog ships as an embedded JSON document validated on load: the
//! serde definitions act as the schema, and post-deserialization checks
//! reject entries the schema alone cannot (duplicate names, dangling
//! defaults, optional operands preceding required ones). Family
//! references are verified separately against a resolved device catalog.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::device::Catalog;
use crate::model::{AttrVal, ElemType};

/// Embedded catalog of the stable operator set.
const DEFAULT_OPCODES: &str = include_str!("registry/opcodes.json");

const SCHEMA_VERSION: u32 = 1;

/// Registry load and lookup failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry schema error: {0}")]
    Schema(String),
    #[error("operator `{operator}` references undefined type family `{family}`")]
    Reference { operator: String, family: String },
    #[error("unknown operator `{0}`")]
    UnknownOperator(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OpCategory {
    Matmul,
    Convolution,
    Elementwise,
    Normalization,
    Quantization,
    Conversion,
    DataMovement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OpStatus {
    Stable,
    Experimental,
    Deprecated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HwStatus {
    Native,
    Emulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OpForm {
    Async,
    Sync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OperandDir {
    In,
    Out,
}

/// Kind of value an attribute accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValueKind {
    Int,
    Float,
    Bool,
    ElemType,
    IntList,
    Str,
    Ident,
}

/// One operand slot of an operator signature.
#[derive(Debug, Clone, PartialEq)]
pub struct OperandSpec {
    pub name: String,
    pub dir: OperandDir,
    pub required: bool,
    /// Human role, used in diagnostics.
    pub role: String,
}

/// One named attribute of an operator signature.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrSpec {
    pub name: String,
    pub kind: ValueKind,
    pub required: bool,
    pub default: Option<AttrVal>,
}

/// Full signature of one operator.
#[derive(Debug, Clone, PartialEq)]
pub struct OpSpec {
    pub name: String,
    pub category: OpCategory,
    pub status: OpStatus,
    pub forms: Vec<OpForm>,
    pub operands: Vec<OperandSpec>,
    pub attributes: Vec<AttrSpec>,
    pub families: Vec<String>,
    /// Primary execution-unit classification.
    pub unit: String,
    pub hw_status: HwStatus,
    pub variadic_in: bool,
    pub variadic_out: bool,
}

impl OpSpec {
    pub fn inputs(&self) -> impl Iterator<Item = &OperandSpec> {
        self.operands.iter().filter(|op| op.dir == OperandDir::In)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &OperandSpec> {
        self.operands.iter().filter(|op| op.dir == OperandDir::Out)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttrSpec> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn supports_form(&self, form: OpForm) -> bool {
        self.forms.contains(&form)
    }
}

/// Loaded, checked operator catalog.
#[derive(Debug, Clone)]
pub struct Registry {
    ops: BTreeMap<String, OpSpec>,
}

impl Registry {
    /// Load the embedded catalog. The embedded file is part of the crate;
    /// failure to load it is a packaging defect surfaced as an error.
    pub fn load_default() -> Result<Self, RegistryError> {
        Self::from_json(DEFAULT_OPCODES)
    }

    /// Load and check a catalog from JSON text.
    pub fn from_json(text: &str) -> Result<Self, RegistryError> {
        let raw: RawRegistry =
            serde_json::from_str(text).map_err(|e| RegistryError::Schema(e.to_string()))?;
        if raw.schema_version != SCHEMA_VERSION {
            return Err(RegistryError::Schema(format!(
                "unsupported schema version {} (expected {SCHEMA_VERSION})",
                raw.schema_version
            )));
        }

        let mut ops = BTreeMap::new();
        for entry in raw.operators {
            let spec = entry.lower()?;
            let name = spec.name.clone();
            if ops.insert(name.clone(), spec).is_some() {
                return Err(RegistryError::Schema(format!(
                    "duplicate operator entry for `{name}`"
                )));
            }
        }
        Ok(Self { ops })
    }

    pub fn get(&self, name: &str) -> Option<&OpSpec> {
        self.ops.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&OpSpec, RegistryError> {
        self.get(name)
            .ok_or_else(|| RegistryError::UnknownOperator(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OpSpec> {
        self.ops.values()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Check that every family reference resolves in `catalog`.
    pub fn verify_against(&self, catalog: &Catalog) -> Result<(), RegistryError> {
        for op in self.ops.values() {
            for family in &op.families {
                if catalog.family(family).is_none() {
                    return Err(RegistryError::Reference {
                        operator: op.name.clone(),
                        family: family.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

// Raw serde shapes; lowered into the public types after validation.

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRegistry {
    schema_version: u32,
    operators: Vec<RawOp>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOp {
    name: String,
    category: OpCategory,
    status: OpStatus,
    forms: Vec<OpForm>,
    operands: Vec<RawOperand>,
    #[serde(default)]
    attributes: Vec<RawAttr>,
    families: Vec<String>,
    unit: String,
    hw_status: HwStatus,
    #[serde(default)]
    variadic_in: bool,
    #[serde(default)]
    variadic_out: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOperand {
    name: String,
    dir: OperandDir,
    #[serde(default = "default_true")]
    required: bool,
    role: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAttr {
    name: String,
    kind: ValueKind,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    default: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl RawOp {
    fn lower(self) -> Result<OpSpec, RegistryError> {
        let schema = |message: String| RegistryError::Schema(message);

        if self.name.is_empty() {
            return Err(schema("operator with empty name".into()));
        }
        if self.forms.is_empty() {
            return Err(schema(format!("operator `{}` permits no forms", self.name)));
        }
        if self.unit.is_empty() {
            return Err(schema(format!(
                "operator `{}` has no execution-unit classification",
                self.name
            )));
        }

        let mut operands = Vec::with_capacity(self.operands.len());
        let mut seen_optional_in = false;
        let mut seen_optional_out = false;
        for raw in self.operands {
            if operands.iter().any(|o: &OperandSpec| o.name == raw.name) {
                return Err(schema(format!(
                    "operator `{}` declares operand `{}` twice",
                    self.name, raw.name
                )));
            }
            // Operand binding is positional per direction; optional slots
            // must trail required ones.
            let seen_optional = match raw.dir {
                OperandDir::In => &mut seen_optional_in,
                OperandDir::Out => &mut seen_optional_out,
            };
            if raw.required && *seen_optional {
                return Err(schema(format!(
                    "operator `{}`: required operand `{}` follows an optional one",
                    self.name, raw.name
                )));
            }
            if !raw.required {
                *seen_optional = true;
            }
            operands.push(OperandSpec {
                name: raw.name,
                dir: raw.dir,
                required: raw.required,
                role: raw.role,
            });
        }
        if !operands.iter().any(|o| o.dir == OperandDir::Out) {
            return Err(schema(format!(
                "operator `{}` declares no output operand",
                self.name
            )));
        }

        let mut attributes = Vec::with_capacity(self.attributes.len());
        for raw in self.attributes {
            if attributes.iter().any(|a: &AttrSpec| a.name == raw.name) {
                return Err(schema(format!(
                    "operator `{}` declares attribute `{}` twice",
                    self.name, raw.name
                )));
            }
            let default = match raw.default {
                Some(value) => Some(lower_default(&self.name, &raw.name, raw.kind, value)?),
                None => None,
            };
            if raw.required && default.is_some() {
                return Err(schema(format!(
                    "operator `{}`: attribute `{}` is required yet has a default",
                    self.name, raw.name
                )));
            }
            attributes.push(AttrSpec {
                name: raw.name,
                kind: raw.kind,
                required: raw.required,
                default,
            });
        }

        if self.families.is_empty() {
            return Err(schema(format!(
                "operator `{}` is bound to no type family",
                self.name
            )));
        }

        Ok(OpSpec {
            name: self.name,
            category: self.category,
            status: self.status,
            forms: self.forms,
            operands,
            attributes,
            families: self.families,
            unit: self.unit,
            hw_status: self.hw_status,
            variadic_in: self.variadic_in,
            variadic_out: self.variadic_out,
        })
    }
}

fn lower_default(
    op: &str,
    attr: &str,
    kind: ValueKind,
    value: serde_json::Value,
) -> Result<AttrVal, RegistryError> {
    use serde_json::Value;

    let mismatch = || {
        RegistryError::Schema(format!(
            "operator `{op}`: default for attribute `{attr}` does not have kind `{kind}`"
        ))
    };
    match (kind, value) {
        (ValueKind::Int, Value::Number(n)) => n.as_i64().map(AttrVal::Int).ok_or_else(mismatch),
        (ValueKind::Float, Value::Number(n)) => {
            n.as_f64().map(AttrVal::Float).ok_or_else(mismatch)
        }
        (ValueKind::Bool, Value::Bool(b)) => Ok(AttrVal::Bool(b)),
        (ValueKind::ElemType, Value::String(s)) => ElemType::from_str(&s)
            .map(AttrVal::Elem)
            .map_err(|_| mismatch()),
        (ValueKind::Str, Value::String(s)) => Ok(AttrVal::Str(s)),
        (ValueKind::Ident, Value::String(s)) => Ok(AttrVal::Str(s)),
        (ValueKind::IntList, Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Number(n) => out.push(n.as_i64().ok_or_else(mismatch)?),
                    _ => return Err(mismatch()),
                }
            }
            Ok(AttrVal::IntList(out))
        }
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_loads() {
        let registry = Registry::load_default().expect("embedded catalog is well-formed");
        assert!(registry.contains("gemm"));
        assert!(registry.contains("conv2d"));
        assert!(registry.contains("cast"));

        let gemm = registry.get("gemm").unwrap();
        assert_eq!(gemm.category, OpCategory::Matmul);
        assert!(gemm.supports_form(OpForm::Async));
        assert_eq!(gemm.outputs().count(), 1);
        assert_eq!(
            gemm.attribute("accum").and_then(|a| a.default.clone()),
            Some(AttrVal::Elem(ElemType::F32))
        );
    }

    #[test]
    fn schema_violations_are_rejected() {
        // Unknown field.
        let err = Registry::from_json(
            r#"{"schema_version": 1, "operators": [], "extra": true}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::Schema(_)));

        // Wrong schema version.
        let err = Registry::from_json(r#"{"schema_version": 99, "operators": []}"#).unwrap_err();
        assert!(matches!(err, RegistryError::Schema(_)));

        // No output operand.
        let err = Registry::from_json(
            r#"{
                "schema_version": 1,
                "operators": [{
                    "name": "nop",
                    "category": "elementwise",
                    "status": "stable",
                    "forms": ["async"],
                    "operands": [
                        {"name": "x", "dir": "in", "role": "input"}
                    ],
                    "families": ["eltwise"],
                    "unit": "vec",
                    "hw_status": "native"
                }]
            }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no output operand"));
    }

    #[test]
    fn optional_operands_must_trail() {
        let err = Registry::from_json(
            r#"{
                "schema_version": 1,
                "operators": [{
                    "name": "bad",
                    "category": "matmul",
                    "status": "stable",
                    "forms": ["async"],
                    "operands": [
                        {"name": "bias", "dir": "in", "required": false, "role": "bias"},
                        {"name": "a", "dir": "in", "role": "lhs"},
                        {"name": "c", "dir": "out", "role": "result"}
                    ],
                    "families": ["gemm.float"],
                    "unit": "cstl",
                    "hw_status": "native"
                }]
            }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("follows an optional one"));
    }
}
