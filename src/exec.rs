//! The reference execution engine.
//!
//! Single-threaded, cooperative and event-driven: the task graph expands
//! lazily in source order, loop iterations are admitted under their
//! `max_in_flight` bound, and among ready tasks a scheduling policy picks
//! the next one to run atomically. Operator semantics live behind the
//! [`Backend`] seam; the engine owns memory, tokens and ordering only.

pub mod backend;
mod memory;
mod receipt;
mod sched;
mod token;
mod view;

pub use backend::{Backend, BackendError, ReferenceBackend};
pub use memory::{AllocRecord, MemoryImage};
pub use receipt::{Receipt, TaskKind};
pub use sched::TaskId;
pub use token::TokenId;
pub use view::{
    bf16_to_f32, f16_to_f32, f32_to_bf16, f32_to_f16, read_tensor, write_tensor, Tensor,
    TensorData,
};

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::ast::Program;
use crate::device::{DeviceError, ResolvedDevice};
use crate::diag::{Collector, Diagnostic};
use crate::model::MemSpace;
use crate::registry::Registry;
use crate::validate::SideTables;

/// Fatal execution failures. Every variant aborts the run; no partial
/// output is exposed except on explicit request through the returned
/// [`Execution`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    #[error("the validator reported {errors} error(s); execution refused")]
    ValidationFailed { errors: usize },
    #[error("{0}")]
    Device(DeviceError),
    #[error("allocating {requested} bytes in {space} exceeds its {capacity}-byte capacity")]
    AllocationOverflow {
        space: MemSpace,
        requested: u64,
        capacity: u64,
    },
    #[error("input for buffer `{buffer}` is {given} bytes, but the buffer holds {expected}")]
    InputSize {
        buffer: String,
        expected: u64,
        given: u64,
    },
    #[error("region access error: {message}")]
    Region { message: String },
    #[error("transfer source and destination overlap in buffer `{buffer}` without `@memmove`")]
    TransferOverlap { buffer: String },
    #[error("sub-byte view error: {message}")]
    SubByte { message: String },
    #[error("write to read-only region of buffer `{buffer}`")]
    ReadOnlyViolation { buffer: String },
    #[error("read from write-only region of buffer `{buffer}`")]
    WriteOnlyViolation { buffer: String },
    #[error("backend does not support operator `{0}`")]
    UnsupportedOperator(String),
    #[error("backend failed executing `{op}`: {message}")]
    Backend { op: String, message: String },
    #[error("scheduler invariant violated: {message}")]
    SchedulerInvariant { message: String },
    #[error("expression evaluation failed at run time: {message}")]
    Eval { message: String },
}

/// Ready-task selection policy.
///
/// The default is stable source order. The randomized policy picks
/// uniformly among ready tasks from a seeded generator, exposing hidden
/// ordering assumptions; a validated program must produce identical bytes
/// under every seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedPolicy {
    #[default]
    SourceOrder,
    Randomized {
        seed: u64,
    },
}

/// Terminal state of a (possibly bounded) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Completed,
    /// The step bound was reached with tasks still outstanding.
    Suspended,
}

/// Reference engine bound to one device, registry and backend.
#[derive(Debug)]
pub struct Engine<B> {
    device: ResolvedDevice,
    registry: Registry,
    backend: B,
    policy: SchedPolicy,
    inputs: HashMap<String, Vec<u8>>,
}

impl<B: Backend> Engine<B> {
    pub fn new(device: ResolvedDevice, registry: Registry, backend: B) -> Self {
        Self {
            device,
            registry,
            backend,
            policy: SchedPolicy::default(),
            inputs: HashMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: SchedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Preload a top-level buffer's content at allocation time. The byte
    /// length must equal the buffer's size.
    pub fn with_input(mut self, buffer: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.inputs.insert(buffer.into(), bytes);
        self
    }

    pub const fn policy(&self) -> SchedPolicy {
        self.policy
    }

    pub const fn device(&self) -> &ResolvedDevice {
        &self.device
    }

    /// Execute a validated program to completion.
    pub fn run(
        &mut self,
        program: &Program,
        tables: &SideTables,
        collector: &mut Collector,
    ) -> Result<Execution, ExecError> {
        self.run_steps(program, tables, collector, None)
    }

    /// Execute at most `max_steps` tasks when a bound is given. A
    /// suspended execution exposes its partial state for inspection; it
    /// cannot be resumed.
    pub fn run_steps(
        &mut self,
        program: &Program,
        tables: &SideTables,
        collector: &mut Collector,
        max_steps: Option<u64>,
    ) -> Result<Execution, ExecError> {
        if collector.has_errors() {
            return Err(ExecError::ValidationFailed {
                errors: collector.error_count(),
            });
        }
        let Some(topology) = self.device.topology.clone() else {
            let err = ExecError::Device(DeviceError::MissingTopology {
                device: self.device.name.clone(),
            });
            collector.emit(Diagnostic::error(err.to_string()));
            return Err(err);
        };

        let result = sched::Machine::new(
            program,
            tables,
            &topology,
            &self.registry,
            &mut self.backend,
            self.policy,
            &self.inputs,
        )
        .and_then(|machine| machine.run(max_steps));

        match result {
            Ok(execution) => Ok(execution),
            Err(err) => {
                collector.emit(Diagnostic::error(err.to_string()));
                Err(err)
            }
        }
    }
}

/// Observable outcome of a run: final memory image, receipts, and
/// profiling counters.
#[derive(Debug)]
pub struct Execution {
    state: RunState,
    memory: MemoryImage,
    receipts: Vec<Receipt>,
    profile: BTreeMap<String, u64>,
}

impl Execution {
    pub(crate) fn new(
        state: RunState,
        memory: MemoryImage,
        receipts: Vec<Receipt>,
        profile: BTreeMap<String, u64>,
    ) -> Self {
        Self {
            state,
            memory,
            receipts,
            profile,
        }
    }

    pub const fn state(&self) -> RunState {
        self.state
    }

    pub fn receipts(&self) -> &[Receipt] {
        self.receipts.as_slice()
    }

    /// Tasks completed per `@profile` tag.
    pub const fn profile(&self) -> &BTreeMap<String, u64> {
        &self.profile
    }

    pub const fn memory(&self) -> &MemoryImage {
        &self.memory
    }

    /// Content of a named buffer. For buffers declared inside loops the
    /// earliest allocation wins; top-level buffers are unambiguous.
    pub fn read_buffer(&self, buffer: &str) -> Option<&[u8]> {
        let record = self
            .memory
            .ledger()
            .iter()
            .find(|r| r.buffer == buffer)?;
        self.memory
            .read(record.space, record.offset, record.size)
            .ok()
    }
}
