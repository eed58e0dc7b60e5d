//! Catalog-document productions: type families and device declarations.

use std::str::FromStr;

use super::{Parsed, Parser, Recovery};
use crate::ast::{
    AttrBind, AttrConstraintNode, CatalogDoc, CatalogItem, DeviceDecl, Direction, DottedName,
    FamilyDecl, Ident, Instantiation, OperandBind, OperandRule, Presence, SpecVersion,
    TopologyDecl, TypeBinding, TypeParam, UnitChars, UnitCount, VariantDecl, VariantRefNode,
};
use crate::lexer::TokenKind;
use crate::model::ElemType;

impl<'a> Parser<'a> {
    pub(super) fn catalog_doc(&mut self, first: Option<CatalogItem>) -> CatalogDoc {
        let mut items: Vec<CatalogItem> = first.into_iter().collect();
        loop {
            match self.peek_kind() {
                TokenKind::Eof => break,
                TokenKind::Family => match self.family_decl() {
                    Ok(decl) => items.push(CatalogItem::Family(decl)),
                    Err(Recovery) => self.recover_catalog(),
                },
                TokenKind::Device => match self.device_decl() {
                    Ok(decl) => items.push(CatalogItem::Device(decl)),
                    Err(Recovery) => self.recover_catalog(),
                },
                other => {
                    self.error_here(format!(
                        "expected `family` or `device` declaration, found {}",
                        other.describe()
                    ));
                    self.recover_catalog();
                }
            }
        }
        CatalogDoc { items }
    }

    fn recover_catalog(&mut self) {
        let before = self.pos;
        self.synchronize();
        if self.pos == before && !self.at(TokenKind::Eof) {
            self.bump();
        }
    }

    fn dotted_name(&mut self) -> Parsed<DottedName> {
        let first = self.expect_ident()?;
        let mut span = first.span;
        let mut segments = vec![first.name];
        while self.at(TokenKind::Dot) && self.kind_at(1) == TokenKind::Ident {
            self.bump();
            let seg = self.expect_ident()?;
            span = span.merge(seg.span);
            segments.push(seg.name);
        }
        Ok(DottedName { segments, span })
    }

    fn elem_type(&mut self) -> Parsed<ElemType> {
        let token = self.expect(TokenKind::Ident)?;
        match ElemType::from_str(&token.lexeme) {
            Ok(ty) => Ok(ty),
            Err(_) => {
                self.error_at(
                    token.span,
                    format!("unknown element type `{}`", token.lexeme),
                );
                Err(Recovery)
            }
        }
    }

    // ------------------------------------------------------------ family

    fn family_decl(&mut self) -> Parsed<FamilyDecl> {
        let kw = self.expect(TokenKind::Family)?;
        let name = self.dotted_name()?;

        let mut params = Vec::new();
        if self.eat(TokenKind::Lt).is_some() {
            loop {
                let pname = self.expect_ident()?;
                let mut allowed = Vec::new();
                if self.eat(TokenKind::Colon).is_some() {
                    loop {
                        allowed.push(self.elem_type()?);
                        if self.eat(TokenKind::Pipe).is_none() {
                            break;
                        }
                    }
                }
                params.push(TypeParam {
                    name: pname,
                    allowed,
                });
                if self.eat(TokenKind::Comma).is_none() {
                    break;
                }
            }
            self.expect(TokenKind::Gt)?;
        }

        self.expect(TokenKind::LBrace)?;
        let mut operands = Vec::new();
        let mut attrs = Vec::new();
        let mut variants = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::RBrace | TokenKind::Eof => break,
                TokenKind::Operand => {
                    let kw = self.bump();
                    let oname = self.expect_ident()?;
                    self.expect(TokenKind::Colon)?;
                    let dir = match self.peek_kind() {
                        TokenKind::In => {
                            self.bump();
                            Direction::In
                        }
                        TokenKind::Out => {
                            self.bump();
                            Direction::Out
                        }
                        other => {
                            self.error_here(format!(
                                "expected `in` or `out`, found {}",
                                other.describe()
                            ));
                            return Err(Recovery);
                        }
                    };
                    let ty_token = self.expect(TokenKind::Ident)?;
                    let ty = if ty_token.lexeme == "any" {
                        TypeBinding::Any
                    } else {
                        match ElemType::from_str(&ty_token.lexeme) {
                            Ok(concrete) => TypeBinding::Concrete(concrete),
                            Err(_) => TypeBinding::Param(ty_token.lexeme),
                        }
                    };
                    let span = kw.span.merge(ty_token.span);
                    operands.push(OperandBind {
                        name: oname,
                        dir,
                        ty,
                        span,
                    });
                }
                TokenKind::Attr => attrs.push(self.attr_bind()?),
                TokenKind::Variant => variants.push(self.variant_decl()?),
                other => {
                    self.error_here(format!(
                        "expected `operand`, `attr` or `variant`, found {}",
                        other.describe()
                    ));
                    return Err(Recovery);
                }
            }
            self.eat(TokenKind::Comma);
        }
        let close = self.expect(TokenKind::RBrace)?;

        Ok(FamilyDecl {
            id: self.node_id(),
            name,
            params,
            operands,
            attrs,
            variants,
            span: kw.span.merge(close.span),
        })
    }

    fn attr_bind(&mut self) -> Parsed<AttrBind> {
        let kw = self.expect(TokenKind::Attr)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::Eq)?;
        let constraint = match self.peek_kind() {
            TokenKind::Required => {
                let token = self.bump();
                AttrConstraintNode::Required { span: token.span }
            }
            TokenKind::Absent => {
                let token = self.bump();
                AttrConstraintNode::Absent { span: token.span }
            }
            _ => AttrConstraintNode::Value(self.attr_value()?),
        };
        let span = kw.span.merge(self.prev_span());
        Ok(AttrBind {
            name,
            constraint,
            span,
        })
    }

    fn variant_decl(&mut self) -> Parsed<VariantDecl> {
        let kw = self.expect(TokenKind::Variant)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LBrace)?;

        let mut operand_rules = Vec::new();
        let mut attr_rules = Vec::new();
        let mut quant_required = Vec::new();
        let mut must = Vec::new();
        let mut may = Vec::new();

        loop {
            match self.peek_kind() {
                TokenKind::RBrace | TokenKind::Eof => break,
                TokenKind::Attr => attr_rules.push(self.attr_bind()?),
                TokenKind::Must | TokenKind::May => {
                    let is_must = self.bump().kind == TokenKind::Must;
                    let inst = self.instantiation()?;
                    if is_must {
                        must.push(inst);
                    } else {
                        may.push(inst);
                    }
                }
                TokenKind::Ident if self.at_ctx("quant") && self.kind_at(1) == TokenKind::LParen => {
                    self.bump();
                    self.bump();
                    if !self.at(TokenKind::RParen) {
                        loop {
                            quant_required.push(self.expect_ident()?);
                            if self.eat(TokenKind::Comma).is_none() {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                }
                TokenKind::Ident => {
                    let operand = self.expect_ident()?;
                    self.expect(TokenKind::Eq)?;
                    let presence = match self.peek_kind() {
                        TokenKind::Absent => {
                            self.bump();
                            Presence::Absent
                        }
                        TokenKind::Required => {
                            self.bump();
                            Presence::Required
                        }
                        other => {
                            self.error_here(format!(
                                "expected `absent` or `required`, found {}",
                                other.describe()
                            ));
                            return Err(Recovery);
                        }
                    };
                    let span = operand.span.merge(self.prev_span());
                    operand_rules.push(OperandRule {
                        operand,
                        presence,
                        span,
                    });
                }
                other => {
                    self.error_here(format!(
                        "unexpected {} in variant body",
                        other.describe()
                    ));
                    return Err(Recovery);
                }
            }
            self.eat(TokenKind::Comma);
        }
        let close = self.expect(TokenKind::RBrace)?;

        Ok(VariantDecl {
            id: self.node_id(),
            name,
            operand_rules,
            attr_rules,
            quant_required,
            must,
            may,
            span: kw.span.merge(close.span),
        })
    }

    /// `( [elem, ...] )` after `must`/`may`.
    fn instantiation(&mut self) -> Parsed<Instantiation> {
        let open = self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.at(TokenKind::RParen) {
            loop {
                args.push(self.elem_type()?);
                if self.eat(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        let close = self.expect(TokenKind::RParen)?;
        Ok(Instantiation {
            args,
            span: open.span.merge(close.span),
        })
    }

    // ------------------------------------------------------------ device

    pub(super) fn device_decl(&mut self) -> Parsed<DeviceDecl> {
        let kw = self.expect(TokenKind::Device)?;
        let name = self.expect_ident()?;
        let parent = if self.eat(TokenKind::Extends).is_some() {
            Some(self.expect_ident()?)
        } else {
            None
        };
        self.expect(TokenKind::LBrace)?;

        let mut spec_version = None;
        let mut topology = None;
        let mut characteristics = Vec::new();
        let mut mandatory = Vec::new();
        let mut extended = Vec::new();

        loop {
            match self.peek_kind() {
                TokenKind::RBrace | TokenKind::Eof => break,
                TokenKind::Topology => {
                    let topo = self.topology_decl()?;
                    if topology.replace(topo).is_some() {
                        let span = self.prev_span();
                        self.error_at(span, "duplicate `topology` block");
                    }
                }
                TokenKind::OpcodeMandatory => {
                    self.bump();
                    self.variant_ref_block(&mut mandatory)?;
                }
                TokenKind::OpcodeExtended => {
                    self.bump();
                    self.variant_ref_block(&mut extended)?;
                }
                TokenKind::Ident if self.at_ctx("spec_version") => {
                    self.bump();
                    self.expect(TokenKind::Eq)?;
                    let token = self.expect(TokenKind::Str)?;
                    let version = SpecVersion {
                        version: token.text.clone().unwrap_or_default(),
                        span: token.span,
                    };
                    if spec_version.replace(version).is_some() {
                        self.error_at(token.span, "duplicate `spec_version`");
                    }
                }
                TokenKind::Ident if self.at_ctx("unit_characteristics") => {
                    self.bump();
                    self.expect(TokenKind::LBrace)?;
                    while self.at(TokenKind::Ident) {
                        let unit = self.expect_ident()?;
                        self.expect(TokenKind::LBrace)?;
                        let mut keys = Vec::new();
                        while self.at(TokenKind::Ident) {
                            let key = self.expect_ident()?;
                            self.expect(TokenKind::Eq)?;
                            keys.push((key, self.expr()?));
                            self.eat(TokenKind::Comma);
                        }
                        let close = self.expect(TokenKind::RBrace)?;
                        let span = unit.span.merge(close.span);
                        characteristics.push(UnitChars { unit, keys, span });
                        self.eat(TokenKind::Comma);
                    }
                    self.expect(TokenKind::RBrace)?;
                }
                other => {
                    self.error_here(format!(
                        "unexpected {} in device body",
                        other.describe()
                    ));
                    return Err(Recovery);
                }
            }
        }
        let close = self.expect(TokenKind::RBrace)?;

        Ok(DeviceDecl {
            id: self.node_id(),
            name,
            parent,
            spec_version,
            topology,
            characteristics,
            mandatory,
            extended,
            span: kw.span.merge(close.span),
        })
    }

    fn topology_decl(&mut self) -> Parsed<TopologyDecl> {
        let kw = self.expect(TokenKind::Topology)?;
        self.expect(TokenKind::LBrace)?;

        let mut engines = None;
        let mut l2_size = None;
        let mut device_units = Vec::new();
        let mut per_engine_units = Vec::new();
        let mut l1_size = None;

        loop {
            if self.at(TokenKind::RBrace) || self.at(TokenKind::Eof) {
                break;
            }
            if self.at_ctx("engines") {
                self.bump();
                self.expect(TokenKind::Eq)?;
                engines = Some(self.expr()?);
            } else if self.at_ctx("l2_size_bytes") {
                self.bump();
                self.expect(TokenKind::Eq)?;
                l2_size = Some(self.expr()?);
            } else if self.at_ctx("device_units") {
                self.bump();
                self.unit_count_block(&mut device_units, None)?;
            } else if self.at_ctx("per_engine") {
                self.bump();
                self.unit_count_block(&mut per_engine_units, Some(&mut l1_size))?;
            } else {
                self.error_here(format!(
                    "unexpected {} in topology block",
                    self.peek_kind().describe()
                ));
                return Err(Recovery);
            }
            self.eat(TokenKind::Comma);
        }
        let close = self.expect(TokenKind::RBrace)?;

        Ok(TopologyDecl {
            engines,
            l2_size,
            device_units,
            per_engine_units,
            l1_size,
            span: kw.span.merge(close.span),
        })
    }

    /// `{ unit = count, ... }`, optionally admitting `l1_size_bytes`.
    fn unit_count_block(
        &mut self,
        counts: &mut Vec<UnitCount>,
        mut l1_size: Option<&mut Option<crate::model::Expr>>,
    ) -> Parsed<()> {
        self.expect(TokenKind::LBrace)?;
        while self.at(TokenKind::Ident) {
            if self.at_ctx("l1_size_bytes") {
                match l1_size.as_deref_mut() {
                    Some(slot) => {
                        self.bump();
                        self.expect(TokenKind::Eq)?;
                        *slot = Some(self.expr()?);
                        self.eat(TokenKind::Comma);
                        continue;
                    }
                    None => {
                        self.error_here("`l1_size_bytes` belongs in the `per_engine` block");
                        return Err(Recovery);
                    }
                }
            }
            let unit = self.expect_ident()?;
            self.expect(TokenKind::Eq)?;
            counts.push(UnitCount {
                unit,
                count: self.expr()?,
            });
            self.eat(TokenKind::Comma);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(())
    }

    fn variant_ref_block(&mut self, refs: &mut Vec<VariantRefNode>) -> Parsed<()> {
        self.expect(TokenKind::LBrace)?;
        loop {
            if self.at(TokenKind::RBrace) || self.at(TokenKind::Eof) {
                break;
            }
            refs.push(self.variant_ref()?);
            self.eat(TokenKind::Comma);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(())
    }

    /// `family[.sub]*[<elem, ...>].variant`. The final segment is always
    /// the variant name; type arguments, when present, attach to the
    /// family id.
    pub(super) fn variant_ref(&mut self) -> Parsed<VariantRefNode> {
        let first = self.expect_ident()?;
        let mut span = first.span;
        let mut segments = vec![first.name];
        let mut type_args = Vec::new();

        loop {
            if self.at(TokenKind::Lt) {
                self.bump();
                loop {
                    type_args.push(self.elem_type()?);
                    if self.eat(TokenKind::Comma).is_none() {
                        break;
                    }
                }
                self.expect(TokenKind::Gt)?;
                self.expect(TokenKind::Dot)?;
                let variant = self.expect_ident()?;
                span = span.merge(variant.span);
                return Ok(VariantRefNode {
                    family: DottedName {
                        segments,
                        span: first.span,
                    },
                    type_args,
                    variant,
                    span,
                });
            }
            if self.at(TokenKind::Dot) && self.kind_at(1) == TokenKind::Ident {
                self.bump();
                let seg = self.expect_ident()?;
                span = span.merge(seg.span);
                segments.push(seg.name);
                continue;
            }
            break;
        }

        if segments.len() < 2 {
            self.error_at(span, "variant reference needs `family.variant`");
            return Err(Recovery);
        }
        let variant_name = segments.pop().expect("checked length");
        Ok(VariantRefNode {
            family: DottedName {
                segments,
                span: first.span,
            },
            type_args,
            variant: Ident {
                name: variant_name,
                span,
            },
            span,
        })
    }
}
