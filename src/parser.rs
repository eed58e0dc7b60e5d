//! Hand-written recursive-descent parser.
//!
//! One parser serves both document shapes: program documents and catalog
//! (device-configuration) documents, which share a grammar. On an
//! unexpected token the parser emits a diagnostic, synchronizes to the
//! next statement-starting keyword and keeps going, so a single pass
//! reports every detected error.

mod config;
mod expr;
mod program;

use crate::ast::{CatalogItem, DocBody, Document, Ident, Include, NodeId, Program};
use crate::diag::{Collector, Diagnostic, SourceId, Span};
use crate::lexer::{lex, Token, TokenKind};

/// Marker returned when a production gave up and the caller should
/// resynchronize.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Recovery;

pub(crate) type Parsed<T> = Result<T, Recovery>;

/// Parse one document, reporting problems through `collector`.
pub fn parse_document(text: &str, source: SourceId, collector: &mut Collector) -> Document {
    let tokens = lex(text, source, collector);
    let mut parser = Parser {
        tokens,
        pos: 0,
        source,
        collector,
        next_node: 0,
    };
    parser.document()
}

pub(crate) struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: SourceId,
    collector: &'a mut Collector,
    next_node: u32,
}

impl<'a> Parser<'a> {
    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub(crate) fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    pub(crate) fn kind_at(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    pub(crate) fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    /// True when the upcoming identifier has the given contextual meaning.
    pub(crate) fn at_ctx(&self, word: &str) -> bool {
        self.at(TokenKind::Ident) && self.peek().lexeme == word
    }

    pub(crate) fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        if self.at(kind) {
            Some(self.bump())
        } else {
            None
        }
    }

    pub(crate) fn expect(&mut self, kind: TokenKind) -> Parsed<Token> {
        if self.at(kind) {
            return Ok(self.bump());
        }
        self.error_here(format!(
            "expected {}, found {}",
            kind.describe(),
            self.peek_kind().describe()
        ));
        Err(Recovery)
    }

    pub(crate) fn expect_ident(&mut self) -> Parsed<Ident> {
        let token = self.expect(TokenKind::Ident)?;
        Ok(Ident {
            name: token.lexeme,
            span: token.span,
        })
    }

    /// Expect a contextual keyword spelled as an identifier.
    pub(crate) fn expect_ctx(&mut self, word: &str) -> Parsed<Token> {
        if self.at_ctx(word) {
            return Ok(self.bump());
        }
        self.error_here(format!(
            "expected `{word}`, found {}",
            self.peek_kind().describe()
        ));
        Err(Recovery)
    }

    pub(crate) fn error_here(&mut self, message: impl Into<String>) {
        let span = self.peek().span;
        self.collector.emit(Diagnostic::error(message).with_span(span));
    }

    pub(crate) fn error_at(&mut self, span: Span, message: impl Into<String>) {
        self.collector.emit(Diagnostic::error(message).with_span(span));
    }

    pub(crate) fn node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    pub(crate) fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    /// Advance to the next token that can start a statement or top-level
    /// declaration. Closing braces stop recovery so block parsers can
    /// terminate.
    pub(crate) fn synchronize(&mut self) {
        loop {
            match self.peek_kind() {
                TokenKind::Eof
                | TokenKind::Const
                | TokenKind::Buffer
                | TokenKind::Let
                | TokenKind::Loop
                | TokenKind::Wait
                | TokenKind::TransferAsync
                | TokenKind::TransferSync
                | TokenKind::StoreAsync
                | TokenKind::StoreSync
                | TokenKind::Device
                | TokenKind::Family
                | TokenKind::Program
                | TokenKind::Include
                | TokenKind::RBrace => return,
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn document(&mut self) -> Document {
        let mut includes = Vec::new();
        while self.at(TokenKind::Include) {
            let kw = self.bump();
            match self.expect(TokenKind::Str) {
                Ok(token) => includes.push(Include {
                    path: token.text.clone().unwrap_or_default(),
                    span: kw.span.merge(token.span),
                }),
                Err(Recovery) => self.synchronize(),
            }
        }

        let body = match self.peek_kind() {
            TokenKind::Family => DocBody::Catalog(self.catalog_doc(None)),
            TokenKind::Device => self.device_led_document(),
            _ => DocBody::Program(self.program_doc(None)),
        };

        Document {
            source: self.source,
            includes,
            body,
        }
    }

    /// A document whose first form is `device ...` is a catalog when the
    /// device has a body and only catalog items follow; otherwise it is a
    /// program led by a device directive.
    fn device_led_document(&mut self) -> DocBody {
        let has_body = {
            let mut ahead = 2; // device IDENT
            if self.kind_at(1) == TokenKind::Ident && self.kind_at(2) == TokenKind::Extends {
                ahead = 4; // device IDENT extends IDENT
            }
            self.kind_at(ahead) == TokenKind::LBrace
        };

        if !has_body {
            return DocBody::Program(self.program_doc(None));
        }

        match self.device_decl() {
            Ok(decl) => match self.peek_kind() {
                TokenKind::Device | TokenKind::Family | TokenKind::Eof => {
                    DocBody::Catalog(self.catalog_doc(Some(CatalogItem::Device(decl))))
                }
                _ => DocBody::Program(self.program_doc(Some(decl))),
            },
            Err(Recovery) => {
                self.synchronize();
                DocBody::Program(Program {
                    name: None,
                    device: None,
                    stmts: self.stmt_list(None),
                })
            }
        }
    }
}
