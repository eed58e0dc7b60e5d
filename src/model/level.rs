//! Memory hierarchy levels.

use std::fmt;

/// Syntactic level of the memory hierarchy, before any engine index is
/// resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MemLevelKind {
    /// Off-chip, device-global.
    Ddr,
    /// On-chip shared, device-global.
    L2,
    /// On-chip scratchpad, engine-indexed.
    L1,
}

/// A fully resolved memory space: the two global spaces, or one engine's
/// scratchpad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemSpace {
    Ddr,
    L2,
    L1(u32),
}

impl MemSpace {
    pub const fn kind(&self) -> MemLevelKind {
        match self {
            Self::Ddr => MemLevelKind::Ddr,
            Self::L2 => MemLevelKind::L2,
            Self::L1(_) => MemLevelKind::L1,
        }
    }

    /// Engine owning this space, when it is a scratchpad.
    pub const fn engine(&self) -> Option<u32> {
        match self {
            Self::L1(e) => Some(*e),
            _ => None,
        }
    }
}

impl fmt::Display for MemSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ddr => write!(f, "ddr"),
            Self::L2 => write!(f, "l2"),
            Self::L1(e) => write!(f, "l1[{e}]"),
        }
    }
}
