//! Shared limits and defaults for the reference toolkit.

/// Modeled capacity of the off-chip space. The device topology declares
/// on-chip capacities only; off-chip is bounded solely to keep the byte
/// model finite.
pub const DDR_CAPACITY: u64 = 1024 * 1024 * 1024;

/// Default buffer alignment when a program asks for the minimum.
pub const MIN_ALIGN: u64 = 1;

/// Maximum include nesting the resolver will follow before assuming the
/// include graph is degenerate.
pub const MAX_INCLUDE_DEPTH: usize = 64;

/// Ceiling on the number of loop-iteration combinations the static passes
/// enumerate exhaustively. Beyond it, only range endpoints are sampled and
/// a warning is emitted.
pub const MAX_STATIC_ITERATIONS: usize = 65_536;

/// Unit type name reserved for the per-engine sequencer. Never a valid
/// `@resource` target.
pub const SEQUENCER_UNIT: &str = "sequencer";
