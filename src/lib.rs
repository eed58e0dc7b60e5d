//! NEM reference toolkit core.
//!
//! NEM is an execution-level contract for neural-network accelerators
//! with software-managed memory hierarchies. This crate implements the
//! reference toolkit: a lexer and recursive-descent parser for program
//! and device-configuration documents, a configuration resolver with
//! include and inheritance semantics, a type-family matcher, a ten-pass
//! semantic validator, and a deterministic single-threaded execution
//! engine over a byte-addressable model of the memory hierarchy.
//!
//! Layers depend strictly downward; no layer holds global state. The
//! usual entry point is [`client::Session`], which wires a source
//! loader, the opcode registry, a numeric backend and a diagnostic
//! collector into one pipeline.

pub mod ast;
pub mod client;
pub mod consts;
pub mod device;
pub mod diag;
pub mod error;
pub mod exec;
pub mod family;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod registry;
pub mod validate;

pub mod prelude {
    pub use crate::ast::Document;
    pub use crate::client::Session;
    pub use crate::device::{
        resolve, Catalog, DeviceError, FsLoader, MapLoader, ResolvedDevice, SourceLoader,
        Topology,
    };
    pub use crate::diag::{Collector, Diagnostic, Severity, SourceMap, Span};
    pub use crate::error::NemError;
    pub use crate::exec::{
        Backend, BackendError, Engine, ExecError, Execution, ReferenceBackend, Receipt,
        RunState, SchedPolicy, Tensor, TensorData,
    };
    pub use crate::family::{Conformance, VariantRef};
    pub use crate::model::{AttrVal, ElemType, MemSpace};
    pub use crate::parser::parse_document;
    pub use crate::registry::{Registry, RegistryError};
    pub use crate::validate::{validate, SideTables};
}
