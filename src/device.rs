//! Device configurations: include graphs, inheritance, effective sets.

mod include;
mod loader;
mod resolve;

pub use include::{load_root_file, load_root_text};
pub use loader::{FsLoader, MapLoader, SourceLoader};
pub use resolve::resolve;

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::family::{FamilyDef, VariantRef};

/// Resolution failures. Every variant is rendered into an error
/// diagnostic; resolution itself keeps going to report as much as
/// possible.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    #[error("include cycle: {}", .chain.join(" -> "))]
    IncludeCycle { chain: Vec<String> },
    #[error("cannot read `{path}`: {message}")]
    Io { path: String, message: String },
    #[error("include nesting exceeds {max} levels at `{path}`")]
    IncludeDepth { path: String, max: usize },
    #[error("device inheritance cycle: {}", .chain.join(" -> "))]
    DeviceCycle { chain: Vec<String> },
    #[error("duplicate device `{name}`")]
    DuplicateDevice { name: String },
    #[error("duplicate type family `{name}`")]
    DuplicateFamily { name: String },
    #[error("device `{child}` extends unknown device `{parent}`")]
    MissingParent { child: String, parent: String },
    #[error("device `{device}` has no topology and cannot execute programs")]
    MissingTopology { device: String },
    #[error("device `{device}` lists `{variant}` as both mandatory and extended")]
    SetDisjointness { device: String, variant: String },
    #[error("device `{device}` is missing MUST variant `{variant}` from its mandatory set")]
    MissingMustVariant { device: String, variant: String },
}

/// Hardware shape of a concrete device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub engines: u32,
    pub l2_size: u64,
    /// Device-level unit counts (e.g. shared DMA movers).
    pub device_units: BTreeMap<String, u32>,
    /// Unit counts replicated per engine.
    pub per_engine_units: BTreeMap<String, u32>,
    pub l1_size: u64,
}

/// A frozen, fully resolved device configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDevice {
    pub name: String,
    pub spec_version: String,
    /// `None` leaves the device abstract: usable as an inheritance base,
    /// not as an execution target.
    pub topology: Option<Topology>,
    /// Per unit type, per key, integer characteristics. Unknown keys are
    /// preserved verbatim.
    pub characteristics: BTreeMap<String, BTreeMap<String, i64>>,
    pub mandatory: BTreeSet<VariantRef>,
    pub extended: BTreeSet<VariantRef>,
}

impl ResolvedDevice {
    pub fn is_abstract(&self) -> bool {
        self.topology.is_none()
    }

    /// Union of mandatory and extended, restricted to the given families.
    pub fn effective(&self, families: &[String]) -> BTreeSet<VariantRef> {
        self.effective_all()
            .into_iter()
            .filter(|vref| families.iter().any(|f| f == &vref.family))
            .collect()
    }

    /// Union of mandatory and extended over every family.
    pub fn effective_all(&self) -> BTreeSet<VariantRef> {
        self.mandatory.union(&self.extended).cloned().collect()
    }
}

/// Resolved output of a configuration root: every named device plus the
/// union of type-family declarations across all included documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    pub families: BTreeMap<String, FamilyDef>,
    pub devices: BTreeMap<String, ResolvedDevice>,
}

impl Catalog {
    pub fn device(&self, name: &str) -> Option<&ResolvedDevice> {
        self.devices.get(name)
    }

    pub fn family(&self, name: &str) -> Option<&FamilyDef> {
        self.families.get(name)
    }

    /// Every MUST-conformance variant reference declared by the catalog's
    /// families.
    pub fn must_variants(&self) -> BTreeSet<VariantRef> {
        let mut out = BTreeSet::new();
        for family in self.families.values() {
            for variant in &family.variants {
                for inst in &variant.must {
                    out.insert(VariantRef::new(
                        &family.name,
                        inst.clone(),
                        &variant.name,
                    ));
                }
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty() && self.devices.is_empty()
    }
}
