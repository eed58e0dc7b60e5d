//! Tokenizer for NEM source text.
//!
//! Produces a finite token sequence terminated by [`TokenKind::Eof`]. Lexer
//! errors (unterminated string, illegal character) are reported through the
//! collector and lexing continues from the next plausible character, so a
//! single pass surfaces every lexical problem.

use crate::diag::{Collector, Diagnostic, LineCol, SourceId, Span};

/// Kind of a lexed token. Literal payloads stay in the token's lexeme;
/// the parser converts them on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Int,
    Float,
    Str,
    Ident,

    // Keywords.
    Include,
    Program,
    Device,
    Const,
    Buffer,
    Let,
    Region,
    Loop,
    Wait,
    In,
    Out,
    Deps,
    Mod,
    Extends,
    Family,
    Variant,
    Operand,
    Attr,
    Topology,
    Must,
    May,
    Absent,
    Required,
    Async,
    Sync,
    True,
    False,

    // Compound keywords, recognized as single tokens.
    TransferAsync,
    TransferSync,
    StoreAsync,
    StoreSync,
    OpcodeMandatory,
    OpcodeExtended,

    // Operators and delimiters.
    Plus,
    Minus,
    Star,
    Slash,
    DotDot,
    Dot,
    Eq,
    At,
    Colon,
    Comma,
    Pipe,
    Lt,
    Gt,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    Eof,
}

impl TokenKind {
    /// Human-facing description used in parse diagnostics.
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::Int => "integer literal",
            Self::Float => "floating literal",
            Self::Str => "string literal",
            Self::Ident => "identifier",
            Self::Include => "`include`",
            Self::Program => "`program`",
            Self::Device => "`device`",
            Self::Const => "`const`",
            Self::Buffer => "`buffer`",
            Self::Let => "`let`",
            Self::Region => "`region`",
            Self::Loop => "`loop`",
            Self::Wait => "`wait`",
            Self::In => "`in`",
            Self::Out => "`out`",
            Self::Deps => "`deps`",
            Self::Mod => "`mod`",
            Self::Extends => "`extends`",
            Self::Family => "`family`",
            Self::Variant => "`variant`",
            Self::Operand => "`operand`",
            Self::Attr => "`attr`",
            Self::Topology => "`topology`",
            Self::Must => "`must`",
            Self::May => "`may`",
            Self::Absent => "`absent`",
            Self::Required => "`required`",
            Self::Async => "`async`",
            Self::Sync => "`sync`",
            Self::True => "`true`",
            Self::False => "`false`",
            Self::TransferAsync => "`transfer.async`",
            Self::TransferSync => "`transfer.sync`",
            Self::StoreAsync => "`store.async`",
            Self::StoreSync => "`store.sync`",
            Self::OpcodeMandatory => "`opcode.mandatory`",
            Self::OpcodeExtended => "`opcode.extended`",
            Self::Plus => "`+`",
            Self::Minus => "`-`",
            Self::Star => "`*`",
            Self::Slash => "`/`",
            Self::DotDot => "`..`",
            Self::Dot => "`.`",
            Self::Eq => "`=`",
            Self::At => "`@`",
            Self::Colon => "`:`",
            Self::Comma => "`,`",
            Self::Pipe => "`|`",
            Self::Lt => "`<`",
            Self::Gt => "`>`",
            Self::LParen => "`(`",
            Self::RParen => "`)`",
            Self::LBracket => "`[`",
            Self::RBracket => "`]`",
            Self::LBrace => "`{`",
            Self::RBrace => "`}`",
            Self::Eof => "end of input",
        }
    }
}

fn keyword(ident: &str) -> Option<TokenKind> {
    let kind = match ident {
        "include" => TokenKind::Include,
        "program" => TokenKind::Program,
        "device" => TokenKind::Device,
        "const" => TokenKind::Const,
        "buffer" => TokenKind::Buffer,
        "let" => TokenKind::Let,
        "region" => TokenKind::Region,
        "loop" => TokenKind::Loop,
        "wait" => TokenKind::Wait,
        "in" => TokenKind::In,
        "out" => TokenKind::Out,
        "deps" => TokenKind::Deps,
        "mod" => TokenKind::Mod,
        "extends" => TokenKind::Extends,
        "family" => TokenKind::Family,
        "variant" => TokenKind::Variant,
        "operand" => TokenKind::Operand,
        "attr" => TokenKind::Attr,
        "topology" => TokenKind::Topology,
        "must" => TokenKind::Must,
        "may" => TokenKind::May,
        "absent" => TokenKind::Absent,
        "required" => TokenKind::Required,
        "async" => TokenKind::Async,
        "sync" => TokenKind::Sync,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        _ => return None,
    };
    Some(kind)
}

/// `(prefix, suffix) -> compound` table for dotted keyword pairs.
fn compound(prefix: &str, suffix: &str) -> Option<TokenKind> {
    let kind = match (prefix, suffix) {
        ("transfer", "async") => TokenKind::TransferAsync,
        ("transfer", "sync") => TokenKind::TransferSync,
        ("store", "async") => TokenKind::StoreAsync,
        ("store", "sync") => TokenKind::StoreSync,
        ("opcode", "mandatory") => TokenKind::OpcodeMandatory,
        ("opcode", "extended") => TokenKind::OpcodeExtended,
        _ => return None,
    };
    Some(kind)
}

/// A token with its exact lexeme and source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
    /// Unescaped content for string literals.
    pub text: Option<String>,
}

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    source: SourceId,
    collector: &'a mut Collector,
    tokens: Vec<Token>,
}

/// Tokenize `text`, reporting lexical errors through `collector`.
pub fn lex(text: &str, source: SourceId, collector: &mut Collector) -> Vec<Token> {
    let mut lexer = Lexer {
        chars: text.chars().collect(),
        pos: 0,
        line: 1,
        col: 1,
        source,
        collector,
        tokens: Vec::new(),
    };
    lexer.run();
    lexer.tokens
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn here(&self) -> LineCol {
        LineCol::new(self.line, self.col)
    }

    fn push(&mut self, kind: TokenKind, lexeme: String, start: LineCol) {
        let span = Span::new(self.source, start, self.here());
        self.tokens.push(Token {
            kind,
            lexeme,
            span,
            text: None,
        });
    }

    fn run(&mut self) {
        while let Some(c) = self.peek() {
            let start = self.here();
            match c {
                ' ' | '\t' | '\r' | '\n' => {
                    self.bump();
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                '0'..='9' => self.number(start),
                '"' => self.string(start),
                c if c.is_ascii_alphabetic() || c == '_' => self.ident(start),
                _ => self.punct(start),
            }
        }
        let at = self.here();
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            lexeme: String::new(),
            span: Span::point(self.source, at),
            text: None,
        });
    }

    fn number(&mut self, start: LineCol) {
        let mut lexeme = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                lexeme.push(c);
                self.bump();
            } else {
                break;
            }
        }
        // A fractional part requires a digit after the dot; `0..7` stays an
        // integer followed by a range operator.
        let is_float = self.peek() == Some('.')
            && self.peek_at(1).is_some_and(|c| c.is_ascii_digit());
        if !is_float {
            self.push(TokenKind::Int, lexeme, start);
            return;
        }
        lexeme.push('.');
        self.bump();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                lexeme.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if self.peek() == Some('e') || self.peek() == Some('E') {
            let mut ahead = 1;
            if matches!(self.peek_at(1), Some('+') | Some('-')) {
                ahead = 2;
            }
            if self.peek_at(ahead).is_some_and(|c| c.is_ascii_digit()) {
                for _ in 0..ahead {
                    lexeme.push(self.bump().unwrap());
                }
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        lexeme.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }
        self.push(TokenKind::Float, lexeme, start);
    }

    fn string(&mut self, start: LineCol) {
        let mut lexeme = String::from("\"");
        let mut value = String::new();
        self.bump();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    self.collector.emit(
                        Diagnostic::error("unterminated string literal")
                            .with_span(Span::new(self.source, start, self.here())),
                    );
                    return;
                }
                Some('"') => {
                    lexeme.push('"');
                    self.bump();
                    break;
                }
                Some('\\') => {
                    lexeme.push('\\');
                    self.bump();
                    let esc = self.peek();
                    match esc {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('\\') => value.push('\\'),
                        Some('"') => value.push('"'),
                        other => {
                            self.collector.emit(
                                Diagnostic::error(format!(
                                    "unknown escape sequence `\\{}`",
                                    other.map(String::from).unwrap_or_default()
                                ))
                                .with_span(Span::new(self.source, start, self.here())),
                            );
                        }
                    }
                    if let Some(c) = esc {
                        lexeme.push(c);
                        self.bump();
                    }
                }
                Some(c) => {
                    lexeme.push(c);
                    value.push(c);
                    self.bump();
                }
            }
        }
        let span = Span::new(self.source, start, self.here());
        self.tokens.push(Token {
            kind: TokenKind::Str,
            lexeme,
            span,
            text: Some(value),
        });
    }

    fn ident(&mut self, start: LineCol) {
        let mut lexeme = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                lexeme.push(c);
                self.bump();
            } else {
                break;
            }
        }

        // Dotted compound keywords are single tokens: `transfer.async`,
        // `opcode.mandatory`, ...
        if matches!(lexeme.as_str(), "transfer" | "store" | "opcode") && self.peek() == Some('.') {
            let mut suffix = String::new();
            let mut ahead = 1;
            while let Some(c) = self.peek_at(ahead) {
                if c.is_ascii_alphanumeric() || c == '_' {
                    suffix.push(c);
                    ahead += 1;
                } else {
                    break;
                }
            }
            if let Some(kind) = compound(&lexeme, &suffix) {
                for _ in 0..ahead {
                    self.bump();
                }
                lexeme.push('.');
                lexeme.push_str(&suffix);
                self.push(kind, lexeme, start);
                return;
            }
        }

        let kind = keyword(&lexeme).unwrap_or(TokenKind::Ident);
        self.push(kind, lexeme, start);
    }

    fn punct(&mut self, start: LineCol) {
        let c = self.bump().expect("caller checked peek");
        let kind = match c {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '.' => {
                if self.peek() == Some('.') {
                    self.bump();
                    self.push(TokenKind::DotDot, "..".into(), start);
                    return;
                }
                TokenKind::Dot
            }
            '=' => TokenKind::Eq,
            '@' => TokenKind::At,
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            '|' => TokenKind::Pipe,
            '<' => TokenKind::Lt,
            '>' => TokenKind::Gt,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            other => {
                self.collector.emit(
                    Diagnostic::error(format!("illegal character `{other}`"))
                        .with_span(Span::new(self.source, start, self.here())),
                );
                return;
            }
        };
        self.push(kind, c.to_string(), start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        let mut collector = Collector::new();
        let tokens = lex(text, SourceId(0), &mut collector);
        assert!(!collector.has_errors(), "unexpected lex errors");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn range_is_not_a_float() {
        assert_eq!(
            kinds("0 .. 7"),
            vec![TokenKind::Int, TokenKind::DotDot, TokenKind::Int, TokenKind::Eof]
        );
        assert_eq!(
            kinds("0..7"),
            vec![TokenKind::Int, TokenKind::DotDot, TokenKind::Int, TokenKind::Eof]
        );
    }

    #[test]
    fn floats_require_fractional_digits() {
        assert_eq!(kinds("1.5"), vec![TokenKind::Float, TokenKind::Eof]);
        assert_eq!(kinds("1.5e-3"), vec![TokenKind::Float, TokenKind::Eof]);
        assert_eq!(
            kinds("1.5.x"),
            vec![TokenKind::Float, TokenKind::Dot, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn compound_keywords_are_single_tokens() {
        assert_eq!(
            kinds("transfer.async store.sync opcode.mandatory"),
            vec![
                TokenKind::TransferAsync,
                TokenKind::StoreSync,
                TokenKind::OpcodeMandatory,
                TokenKind::Eof
            ]
        );
        // `gemm.async` is not compound; the parser assembles it.
        assert_eq!(
            kinds("gemm.async"),
            vec![TokenKind::Ident, TokenKind::Dot, TokenKind::Async, TokenKind::Eof]
        );
        // `transfer.foo` falls back to an identifier and a dot.
        assert_eq!(
            kinds("transfer.foo"),
            vec![TokenKind::Ident, TokenKind::Dot, TokenKind::Ident, TokenKind::Eof]
        );
    }

    #[test]
    fn comments_are_stripped_and_locations_survive_newlines() {
        let mut collector = Collector::new();
        let tokens = lex("a # trailing\n  b", SourceId(0), &mut collector);
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1].lexeme, "b");
        assert_eq!(tokens[1].span.start, LineCol::new(2, 3));
    }

    #[test]
    fn unterminated_string_reports_and_continues() {
        let mut collector = Collector::new();
        let tokens = lex("\"abc\nconst", SourceId(0), &mut collector);
        assert_eq!(collector.error_count(), 1);
        assert_eq!(tokens.first().map(|t| t.kind), Some(TokenKind::Const));
    }

    #[test]
    fn string_escapes_are_decoded() {
        let mut collector = Collector::new();
        let tokens = lex(r#""a\n\"b\"""#, SourceId(0), &mut collector);
        assert!(!collector.has_errors());
        assert_eq!(tokens[0].text.as_deref(), Some("a\n\"b\""));
    }

    #[test]
    fn illegal_character_reports_and_skips() {
        let mut collector = Collector::new();
        let tokens = lex("a $ b", SourceId(0), &mut collector);
        assert_eq!(collector.error_count(), 1);
        assert_eq!(tokens.len(), 3); // a, b, eof
    }
}
