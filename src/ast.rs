//! Immutable syntax tree for program and catalog documents.
//!
//! Nodes are built once by the parser and never mutated. Downstream passes
//! attach their results to side tables keyed by [`NodeId`], which the
//! parser assigns in creation order within a document.

mod render;

use crate::diag::{SourceId, Span};
use crate::model::{ElemType, Expr, MemLevelKind};

/// Stable identity of a syntax-tree node within one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// An identifier occurrence with its location.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// A parsed document: includes followed by a program or a catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub source: SourceId,
    pub includes: Vec<Include>,
    pub body: DocBody,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Include {
    pub path: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocBody {
    Program(Program),
    Catalog(CatalogDoc),
}

impl Document {
    pub fn program(&self) -> Option<&Program> {
        match &self.body {
            DocBody::Program(p) => Some(p),
            DocBody::Catalog(_) => None,
        }
    }

    pub fn catalog(&self) -> Option<&CatalogDoc> {
        match &self.body {
            DocBody::Catalog(c) => Some(c),
            DocBody::Program(_) => None,
        }
    }
}

// ---------------------------------------------------------------- program

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub name: Option<Ident>,
    pub device: Option<DeviceDirective>,
    pub stmts: Vec<Stmt>,
}

/// `device NAME` references a catalog device; `device NAME { ... }`
/// declares one inline.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceDirective {
    Named(Ident),
    Inline(DeviceDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Const(ConstDecl),
    Buffer(BufferDecl),
    Region(RegionDecl),
    Task(TaskStmt),
    Loop(LoopStmt),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Self::Const(s) => s.span,
            Self::Buffer(s) => s.span,
            Self::Region(s) => s.span,
            Self::Task(s) => s.span,
            Self::Loop(s) => s.span,
        }
    }

    pub fn node_id(&self) -> NodeId {
        match self {
            Self::Const(s) => s.id,
            Self::Buffer(s) => s.id,
            Self::Region(s) => s.id,
            Self::Task(s) => s.id,
            Self::Loop(s) => s.id,
        }
    }
}

/// `const NAME = expr`
#[derive(Debug, Clone, PartialEq)]
pub struct ConstDecl {
    pub id: NodeId,
    pub name: Ident,
    pub value: Expr,
    pub span: Span,
}

/// `buffer NAME : level size = expr align = expr [decorators]`
#[derive(Debug, Clone, PartialEq)]
pub struct BufferDecl {
    pub id: NodeId,
    pub name: Ident,
    pub level: LevelSpec,
    pub size: Expr,
    pub align: Expr,
    pub decorators: Vec<Decorator>,
    pub span: Span,
}

/// Syntactic memory level; `engine` is present exactly for `l1[expr]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSpec {
    pub kind: MemLevelKind,
    pub engine: Option<Expr>,
    pub span: Span,
}

/// `let NAME = region(...)`
#[derive(Debug, Clone, PartialEq)]
pub struct RegionDecl {
    pub id: NodeId,
    pub name: Ident,
    pub region: RegionExpr,
    pub span: Span,
}

/// `region(buffer, offset, extent[, type attrs])`
#[derive(Debug, Clone, PartialEq)]
pub struct RegionExpr {
    pub id: NodeId,
    pub buffer: Ident,
    pub offset: Expr,
    pub extent: Expr,
    pub attrs: TypeAttrs,
    pub span: Span,
}

/// Intrinsic region attributes; all optional at parse time, requirements
/// enforced by validation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeAttrs {
    pub elem: Option<ElemAttr>,
    pub shape: Option<Vec<Expr>>,
    pub layout: Option<LayoutSpec>,
    pub quant: Option<QuantSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElemAttr {
    pub ty: ElemType,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutSpec {
    /// `layout = row_major` and friends.
    Named { name: String, span: Span },
    /// `strides = [..]`, in elements.
    Strides(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuantSpec {
    PerTensor { span: Span },
    PerChannel { axis: Expr, span: Span },
    PerGroup { axis: Expr, group: Expr, span: Span },
}

impl QuantSpec {
    pub fn span(&self) -> Span {
        match self {
            Self::PerTensor { span }
            | Self::PerChannel { span, .. }
            | Self::PerGroup { span, .. } => *span,
        }
    }
}

/// `[token =] call [deps = [..]] [decorators]`
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStmt {
    pub id: NodeId,
    pub token: Option<Ident>,
    pub call: TaskCall,
    pub deps: Vec<Ident>,
    pub decorators: Vec<Decorator>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Form {
    Async,
    Sync,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskCall {
    Transfer {
        form: Form,
        src: Operand,
        dst: Operand,
    },
    Store {
        form: Form,
        src: Operand,
        dst: Operand,
    },
    Wait {
        tokens: Vec<Ident>,
    },
    Compute {
        op: Ident,
        form: Form,
        ins: Vec<Operand>,
        outs: Vec<Operand>,
        attrs: Vec<AttrAssign>,
    },
}

/// Operand of a task: a region name or an inline region expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Named {
        name: Ident,
        decorators: Vec<Decorator>,
    },
    Inline {
        region: RegionExpr,
        decorators: Vec<Decorator>,
    },
}

impl Operand {
    pub fn span(&self) -> Span {
        match self {
            Self::Named { name, .. } => name.span,
            Self::Inline { region, .. } => region.span,
        }
    }

    pub fn decorators(&self) -> &[Decorator] {
        match self {
            Self::Named { decorators, .. } | Self::Inline { decorators, .. } => decorators,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttrAssign {
    pub name: Ident,
    pub value: AttrValueNode,
    pub span: Span,
}

/// Attribute value as written. Elements and booleans are recognized by the
/// parser; everything integer-shaped stays an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValueNode {
    Expr(Expr),
    Str { value: String, span: Span },
    Bool { value: bool, span: Span },
    Elem { ty: ElemType, span: Span },
    List { items: Vec<Expr>, span: Span },
}

impl AttrValueNode {
    pub fn span(&self) -> Span {
        match self {
            Self::Expr(e) => e.span(),
            Self::Str { span, .. }
            | Self::Bool { span, .. }
            | Self::Elem { span, .. }
            | Self::List { span, .. } => *span,
        }
    }
}

/// `loop VAR = start .. end [decorators] { body }`
#[derive(Debug, Clone, PartialEq)]
pub struct LoopStmt {
    pub id: NodeId,
    pub var: Ident,
    pub start: Expr,
    pub end: Expr,
    pub decorators: Vec<Decorator>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// `@name` or `@name(args)`. The name is kept raw; kind resolution happens
/// in decorator validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Decorator {
    pub name: Ident,
    pub args: Vec<DecoratorArg>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecoratorArg {
    Expr(Expr),
    /// `unit_type[index]`, as in `@resource(cstl[0])`.
    Unit {
        unit: Ident,
        index: Expr,
        span: Span,
    },
    Str {
        value: String,
        span: Span,
    },
}

impl DecoratorArg {
    pub fn span(&self) -> Span {
        match self {
            Self::Expr(e) => e.span(),
            Self::Unit { span, .. } | Self::Str { span, .. } => *span,
        }
    }
}

/// First decorator with the given name, if present.
pub fn find_decorator<'a>(decorators: &'a [Decorator], name: &str) -> Option<&'a Decorator> {
    decorators.iter().find(|d| d.name.name == name)
}

// ---------------------------------------------------------------- catalog

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogDoc {
    pub items: Vec<CatalogItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CatalogItem {
    Family(FamilyDecl),
    Device(DeviceDecl),
}

/// Dotted family identifier, e.g. `gemm.float`.
#[derive(Debug, Clone, PartialEq)]
pub struct DottedName {
    pub segments: Vec<String>,
    pub span: Span,
}

impl DottedName {
    pub fn joined(&self) -> String {
        self.segments.join(".")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FamilyDecl {
    pub id: NodeId,
    pub name: DottedName,
    pub params: Vec<TypeParam>,
    pub operands: Vec<OperandBind>,
    pub attrs: Vec<AttrBind>,
    pub variants: Vec<VariantDecl>,
    pub span: Span,
}

/// `<T : f16 | bf16 | f32>`
#[derive(Debug, Clone, PartialEq)]
pub struct TypeParam {
    pub name: Ident,
    pub allowed: Vec<ElemType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// `operand NAME : in|out TYPE`
#[derive(Debug, Clone, PartialEq)]
pub struct OperandBind {
    pub name: Ident,
    pub dir: Direction,
    pub ty: TypeBinding,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeBinding {
    Concrete(ElemType),
    Param(String),
    /// `any`: the operand accepts every element type.
    Any,
}

/// `attr NAME = value` inside a family body constrains the attribute for
/// every variant.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrBind {
    pub name: Ident,
    pub constraint: AttrConstraintNode,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrConstraintNode {
    Value(AttrValueNode),
    Required { span: Span },
    Absent { span: Span },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantDecl {
    pub id: NodeId,
    pub name: Ident,
    pub operand_rules: Vec<OperandRule>,
    pub attr_rules: Vec<AttrBind>,
    pub quant_required: Vec<Ident>,
    pub must: Vec<Instantiation>,
    pub may: Vec<Instantiation>,
    pub span: Span,
}

/// `NAME = absent|required` inside a variant body.
#[derive(Debug, Clone, PartialEq)]
pub struct OperandRule {
    pub operand: Ident,
    pub presence: Presence,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Presence {
    Required,
    Absent,
}

/// One type-argument tuple, empty for non-parameterized families.
#[derive(Debug, Clone, PartialEq)]
pub struct Instantiation {
    pub args: Vec<ElemType>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDecl {
    pub id: NodeId,
    pub name: Ident,
    pub parent: Option<Ident>,
    pub spec_version: Option<SpecVersion>,
    pub topology: Option<TopologyDecl>,
    pub characteristics: Vec<UnitChars>,
    pub mandatory: Vec<VariantRefNode>,
    pub extended: Vec<VariantRefNode>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpecVersion {
    pub version: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopologyDecl {
    pub engines: Option<Expr>,
    pub l2_size: Option<Expr>,
    pub device_units: Vec<UnitCount>,
    pub per_engine_units: Vec<UnitCount>,
    pub l1_size: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitCount {
    pub unit: Ident,
    pub count: Expr,
}

/// `unit_characteristics { cstl { macs_per_cycle = 256 } }` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitChars {
    pub unit: Ident,
    pub keys: Vec<(Ident, Expr)>,
    pub span: Span,
}

/// `family[<args>].variant` reference as written in an opcode set.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRefNode {
    pub family: DottedName,
    pub type_args: Vec<ElemType>,
    pub variant: Ident,
    pub span: Span,
}
