//! Source locations and the severity-tagged diagnostic stream.
//!
//! Every layer of the toolkit reports problems by appending to a
//! [`Collector`] that the caller threads downward. Layers never print and
//! never abort on the first problem; consumers inspect the collector once
//! a stage has finished.

use std::fmt;

/// Identifier of a registered source file. Stable for the lifetime of the
/// [`SourceMap`] that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u32);

/// Registry of source file names, interning each path once.
#[derive(Debug, Default, Clone)]
pub struct SourceMap {
    files: Vec<String>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file name, returning its id. Re-registering the same
    /// name yields the existing id.
    pub fn intern(&mut self, name: &str) -> SourceId {
        if let Some(pos) = self.files.iter().position(|f| f == name) {
            return SourceId(pos as u32);
        }
        self.files.push(name.to_string());
        SourceId((self.files.len() - 1) as u32)
    }

    pub fn name(&self, id: SourceId) -> &str {
        self.files
            .get(id.0 as usize)
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }
}

/// One-based line/column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineCol {
    pub line: u32,
    pub col: u32,
}

impl LineCol {
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for LineCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Half-open source range `[start, end)` within a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub source: SourceId,
    pub start: LineCol,
    pub end: LineCol,
}

impl Span {
    pub const fn new(source: SourceId, start: LineCol, end: LineCol) -> Self {
        Self { source, start, end }
    }

    /// Point span at a single position.
    pub const fn point(source: SourceId, at: LineCol) -> Self {
        Self {
            source,
            start: at,
            end: at,
        }
    }

    /// Smallest span covering both operands. Falls back to `self` when the
    /// spans come from different files.
    pub fn merge(self, other: Span) -> Span {
        if self.source != other.source {
            return self;
        }
        Span {
            source: self.source,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Severity class of a diagnostic. Only `Error` blocks execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Supplementary note attached to a primary diagnostic, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub message: String,
    pub span: Option<Span>,
}

/// A single structured diagnostic record.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    severity: Severity,
    message: String,
    span: Option<Span>,
    notes: Vec<Note>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_note(mut self, message: impl Into<String>, span: Option<Span>) -> Self {
        self.notes.push(Note {
            message: message.into(),
            span,
        });
        self
    }

    pub const fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn span(&self) -> Option<Span> {
        self.span
    }

    pub fn notes(&self) -> &[Note] {
        self.notes.as_slice()
    }
}

/// Append-only, order-preserving accumulator of diagnostics.
#[derive(Debug, Default, Clone)]
pub struct Collector {
    diags: Vec<Diagnostic>,
    errors: usize,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, diag: Diagnostic) {
        if diag.severity() == Severity::Error {
            self.errors += 1;
        }
        self.diags.push(diag);
    }

    pub const fn error_count(&self) -> usize {
        self.errors
    }

    pub const fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn len(&self) -> usize {
        self.diags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diags.iter()
    }

    /// Diagnostics with `Error` severity, in emission order.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diags
            .iter()
            .filter(|d| d.severity() == Severity::Error)
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diags
    }
}
