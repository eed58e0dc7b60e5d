//! Receipts generated by task execution.

use super::sched::TaskId;
use super::token::TokenId;

/// Kind tag of an executed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TaskKind {
    Transfer,
    Store,
    Compute,
    Wait,
}

/// One completed task, in completion order.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub task: TaskId,
    pub kind: TaskKind,
    /// Operator name for compute tasks.
    pub op: Option<String>,
    /// Engine the task executed on, when it touched a scratchpad.
    pub engine: Option<u32>,
    /// Bytes written by the task.
    pub bytes_moved: u64,
    /// Token satisfied by the task's completion.
    pub token: Option<TokenId>,
    /// `@debug` name, when given.
    pub label: Option<String>,
    /// `@profile` tag, when given.
    pub profile: Option<String>,
}
