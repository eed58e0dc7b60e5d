//! Structural rendering of syntax trees back to source text.
//!
//! The rendering is canonical rather than lossless: spacing and line
//! breaks are normalized, parentheses are re-derived from precedence.
//! Re-parsing a rendering yields a tree equal to the original modulo
//! spans, which is the property the conformance suite checks.

use std::fmt::{self, Write as _};

use super::*;
use crate::model::{Expr, MemLevelKind};

struct Renderer<'a, 'b> {
    f: &'a mut fmt::Formatter<'b>,
    indent: usize,
}

impl Renderer<'_, '_> {
    fn line(&mut self, text: impl fmt::Display) -> fmt::Result {
        for _ in 0..self.indent {
            self.f.write_str("    ")?;
        }
        writeln!(self.f, "{text}")
    }

    fn open(&mut self, head: impl fmt::Display) -> fmt::Result {
        self.line(format_args!("{head} {{"))?;
        self.indent += 1;
        Ok(())
    }

    fn close(&mut self) -> fmt::Result {
        self.indent -= 1;
        self.line("}")
    }

    fn document(&mut self, doc: &Document) -> fmt::Result {
        for inc in &doc.includes {
            self.line(format_args!("include {:?}", inc.path))?;
        }
        match &doc.body {
            DocBody::Program(p) => self.program(p),
            DocBody::Catalog(c) => self.catalog(c),
        }
    }

    fn program(&mut self, p: &Program) -> fmt::Result {
        if let Some(name) = &p.name {
            self.line(format_args!("program {}", name.name))?;
        }
        match &p.device {
            Some(DeviceDirective::Named(name)) => {
                self.line(format_args!("device {}", name.name))?
            }
            Some(DeviceDirective::Inline(decl)) => self.device(decl)?,
            None => {}
        }
        for stmt in &p.stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> fmt::Result {
        match stmt {
            Stmt::Const(c) => self.line(format_args!("const {} = {}", c.name.name, c.value)),
            Stmt::Buffer(b) => {
                let mut s = format!(
                    "buffer {} : {} size = {} align = {}",
                    b.name.name,
                    level(&b.level),
                    b.size,
                    b.align
                );
                decorators(&mut s, &b.decorators);
                self.line(s)
            }
            Stmt::Region(r) => self.line(format_args!(
                "let {} = {}",
                r.name.name,
                region(&r.region)
            )),
            Stmt::Task(t) => self.line(task(t)),
            Stmt::Loop(l) => {
                let mut head = format!("loop {} = {} .. {}", l.var.name, l.start, l.end);
                decorators(&mut head, &l.decorators);
                self.open(head)?;
                for stmt in &l.body {
                    self.stmt(stmt)?;
                }
                self.close()
            }
        }
    }

    fn catalog(&mut self, c: &CatalogDoc) -> fmt::Result {
        for item in &c.items {
            match item {
                CatalogItem::Family(f) => self.family(f)?,
                CatalogItem::Device(d) => self.device(d)?,
            }
        }
        Ok(())
    }

    fn family(&mut self, decl: &FamilyDecl) -> fmt::Result {
        let mut head = format!("family {}", decl.name.joined());
        if !decl.params.is_empty() {
            head.push('<');
            for (i, p) in decl.params.iter().enumerate() {
                if i > 0 {
                    head.push_str(", ");
                }
                let _ = write!(head, "{}", p.name.name);
                if !p.allowed.is_empty() {
                    head.push_str(" : ");
                    for (j, ty) in p.allowed.iter().enumerate() {
                        if j > 0 {
                            head.push_str(" | ");
                        }
                        let _ = write!(head, "{ty}");
                    }
                }
            }
            head.push('>');
        }
        self.open(head)?;
        for op in &decl.operands {
            let ty = match &op.ty {
                TypeBinding::Concrete(t) => t.to_string(),
                TypeBinding::Param(p) => p.clone(),
                TypeBinding::Any => "any".to_string(),
            };
            self.line(format_args!("operand {} : {} {}", op.name.name, op.dir, ty))?;
        }
        for attr in &decl.attrs {
            self.line(attr_bind(attr))?;
        }
        for variant in &decl.variants {
            self.open(format_args!("variant {}", variant.name.name))?;
            for rule in &variant.operand_rules {
                self.line(format_args!("{} = {}", rule.operand.name, rule.presence))?;
            }
            for attr in &variant.attr_rules {
                self.line(attr_bind(attr))?;
            }
            if !variant.quant_required.is_empty() {
                let names: Vec<_> = variant
                    .quant_required
                    .iter()
                    .map(|i| i.name.as_str())
                    .collect();
                self.line(format_args!("quant({})", names.join(", ")))?;
            }
            for inst in &variant.must {
                self.line(format_args!("must({})", inst_args(inst)))?;
            }
            for inst in &variant.may {
                self.line(format_args!("may({})", inst_args(inst)))?;
            }
            self.close()?;
        }
        self.close()
    }

    fn device(&mut self, decl: &DeviceDecl) -> fmt::Result {
        let head = match &decl.parent {
            Some(parent) => format!("device {} extends {}", decl.name.name, parent.name),
            None => format!("device {}", decl.name.name),
        };
        self.open(head)?;
        if let Some(v) = &decl.spec_version {
            self.line(format_args!("spec_version = {:?}", v.version))?;
        }
        if let Some(topo) = &decl.topology {
            self.open("topology")?;
            if let Some(engines) = &topo.engines {
                self.line(format_args!("engines = {engines}"))?;
            }
            if let Some(size) = &topo.l2_size {
                self.line(format_args!("l2_size_bytes = {size}"))?;
            }
            if !topo.device_units.is_empty() {
                self.open("device_units")?;
                for uc in &topo.device_units {
                    self.line(format_args!("{} = {}", uc.unit.name, uc.count))?;
                }
                self.close()?;
            }
            if !topo.per_engine_units.is_empty() || topo.l1_size.is_some() {
                self.open("per_engine")?;
                for uc in &topo.per_engine_units {
                    self.line(format_args!("{} = {}", uc.unit.name, uc.count))?;
                }
                if let Some(size) = &topo.l1_size {
                    self.line(format_args!("l1_size_bytes = {size}"))?;
                }
                self.close()?;
            }
            self.close()?;
        }
        if !decl.characteristics.is_empty() {
            self.open("unit_characteristics")?;
            for chars in &decl.characteristics {
                self.open(&chars.unit.name)?;
                for (key, value) in &chars.keys {
                    self.line(format_args!("{} = {}", key.name, value))?;
                }
                self.close()?;
            }
            self.close()?;
        }
        for (label, refs) in [
            ("opcode.mandatory", &decl.mandatory),
            ("opcode.extended", &decl.extended),
        ] {
            if refs.is_empty() {
                continue;
            }
            self.open(label)?;
            for vref in refs {
                self.line(variant_ref(vref))?;
            }
            self.close()?;
        }
        self.close()
    }
}

fn level(spec: &LevelSpec) -> String {
    match (&spec.kind, &spec.engine) {
        (MemLevelKind::L1, Some(engine)) => format!("l1[{engine}]"),
        (kind, _) => kind.to_string(),
    }
}

fn region(r: &RegionExpr) -> String {
    let mut s = format!("region({}, {}, {}", r.buffer.name, r.offset, r.extent);
    if let Some(elem) = &r.attrs.elem {
        let _ = write!(s, ", elem = {}", elem.ty);
    }
    if let Some(shape) = &r.attrs.shape {
        let _ = write!(s, ", shape = {}", expr_list(shape));
    }
    match &r.attrs.layout {
        Some(LayoutSpec::Named { name, .. }) => {
            let _ = write!(s, ", layout = {name}");
        }
        Some(LayoutSpec::Strides(strides)) => {
            let _ = write!(s, ", strides = {}", expr_list(strides));
        }
        None => {}
    }
    match &r.attrs.quant {
        Some(QuantSpec::PerTensor { .. }) => s.push_str(", quant = per_tensor"),
        Some(QuantSpec::PerChannel { axis, .. }) => {
            let _ = write!(s, ", quant = per_channel({axis})");
        }
        Some(QuantSpec::PerGroup { axis, group, .. }) => {
            let _ = write!(s, ", quant = per_group({axis}, {group})");
        }
        None => {}
    }
    s.push(')');
    s
}

fn expr_list(items: &[Expr]) -> String {
    let mut s = String::from("[");
    for (i, e) in items.iter().enumerate() {
        if i > 0 {
            s.push_str(", ");
        }
        let _ = write!(s, "{e}");
    }
    s.push(']');
    s
}

fn operand(op: &Operand) -> String {
    let mut s = match op {
        Operand::Named { name, .. } => name.name.clone(),
        Operand::Inline { region: r, .. } => region(r),
    };
    decorators(&mut s, op.decorators());
    s
}

fn task(t: &TaskStmt) -> String {
    let mut s = String::new();
    if let Some(token) = &t.token {
        let _ = write!(s, "{} = ", token.name);
    }
    match &t.call {
        TaskCall::Transfer { form, src, dst } => {
            let _ = write!(s, "transfer.{form} in = {} out = {}", operand(src), operand(dst));
        }
        TaskCall::Store { form, src, dst } => {
            let _ = write!(s, "store.{form} in = {} out = {}", operand(src), operand(dst));
        }
        TaskCall::Wait { tokens } => {
            let names: Vec<_> = tokens.iter().map(|t| t.name.as_str()).collect();
            let _ = write!(s, "wait [{}]", names.join(", "));
        }
        TaskCall::Compute {
            op,
            form,
            ins,
            outs,
            attrs,
        } => {
            let ins: Vec<_> = ins.iter().map(operand).collect();
            let outs: Vec<_> = outs.iter().map(operand).collect();
            let _ = write!(
                s,
                "{}.{form} in = [{}] out = [{}]",
                op.name,
                ins.join(", "),
                outs.join(", ")
            );
            for attr in attrs {
                let _ = write!(s, " {} = {}", attr.name.name, attr_value(&attr.value));
            }
        }
    }
    if !t.deps.is_empty() {
        let names: Vec<_> = t.deps.iter().map(|d| d.name.as_str()).collect();
        let _ = write!(s, " deps = [{}]", names.join(", "));
    }
    decorators(&mut s, &t.decorators);
    s
}

fn attr_value(value: &AttrValueNode) -> String {
    match value {
        AttrValueNode::Expr(e) => e.to_string(),
        AttrValueNode::Str { value, .. } => format!("{value:?}"),
        AttrValueNode::Bool { value, .. } => value.to_string(),
        AttrValueNode::Elem { ty, .. } => ty.to_string(),
        AttrValueNode::List { items, .. } => expr_list(items),
    }
}

fn attr_bind(attr: &AttrBind) -> String {
    let rhs = match &attr.constraint {
        AttrConstraintNode::Value(v) => attr_value(v),
        AttrConstraintNode::Required { .. } => "required".into(),
        AttrConstraintNode::Absent { .. } => "absent".into(),
    };
    format!("attr {} = {}", attr.name.name, rhs)
}

fn inst_args(inst: &Instantiation) -> String {
    inst.args
        .iter()
        .map(|ty| ty.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn variant_ref(vref: &VariantRefNode) -> String {
    let mut s = vref.family.joined();
    if !vref.type_args.is_empty() {
        s.push('<');
        let _ = write!(
            s,
            "{}",
            vref.type_args
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        s.push('>');
    }
    let _ = write!(s, ".{}", vref.variant.name);
    s
}

fn decorators(s: &mut String, decs: &[Decorator]) {
    for dec in decs {
        let _ = write!(s, " @{}", dec.name.name);
        if dec.args.is_empty() {
            continue;
        }
        s.push('(');
        for (i, arg) in dec.args.iter().enumerate() {
            if i > 0 {
                s.push_str(", ");
            }
            match arg {
                DecoratorArg::Expr(e) => {
                    let _ = write!(s, "{e}");
                }
                DecoratorArg::Unit { unit, index, .. } => {
                    let _ = write!(s, "{}[{index}]", unit.name);
                }
                DecoratorArg::Str { value, .. } => {
                    let _ = write!(s, "{value:?}");
                }
            }
        }
        s.push(')');
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Renderer { f, indent: 0 }.document(self)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Renderer { f, indent: 0 }.program(self)
    }
}

impl fmt::Display for CatalogDoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Renderer { f, indent: 0 }.catalog(self)
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Renderer { f, indent: 0 }.stmt(self)
    }
}
