//! Include-graph walking: relative resolution, memoized parsing, cycle
//! detection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::loader::{normalize, SourceLoader};
use super::DeviceError;
use crate::ast::Document;
use crate::consts::MAX_INCLUDE_DEPTH;
use crate::diag::{Collector, Diagnostic, SourceMap, Span};
use crate::parser::parse_document;

/// Load a document tree rooted at a file. Included documents appear
/// before their includer; the root document is last.
pub fn load_root_file(
    path: &Path,
    loader: &dyn SourceLoader,
    sources: &mut SourceMap,
    collector: &mut Collector,
) -> Vec<Document> {
    let mut walker = Walker {
        loader,
        sources,
        collector,
        state: HashMap::new(),
        stack: Vec::new(),
        docs: Vec::new(),
    };
    walker.visit_file(normalize(path), None);
    walker.docs
}

/// Load a document tree whose root text is already in hand. `label` names
/// the root in diagnostics and anchors relative include paths.
pub fn load_root_text(
    label: &str,
    text: &str,
    loader: &dyn SourceLoader,
    sources: &mut SourceMap,
    collector: &mut Collector,
) -> Vec<Document> {
    let mut walker = Walker {
        loader,
        sources,
        collector,
        state: HashMap::new(),
        stack: Vec::new(),
        docs: Vec::new(),
    };
    let root = normalize(Path::new(label));
    walker.visit_text(root, text, None);
    walker.docs
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    OnStack,
    Done,
}

struct Walker<'a> {
    loader: &'a dyn SourceLoader,
    sources: &'a mut SourceMap,
    collector: &'a mut Collector,
    state: HashMap<PathBuf, VisitState>,
    stack: Vec<PathBuf>,
    docs: Vec<Document>,
}

impl Walker<'_> {
    fn visit_file(&mut self, path: PathBuf, at: Option<Span>) {
        match self.state.get(&path) {
            Some(VisitState::Done) => return,
            Some(VisitState::OnStack) => {
                let mut chain: Vec<String> = self
                    .stack
                    .iter()
                    .skip_while(|p| **p != path)
                    .map(|p| p.display().to_string())
                    .collect();
                chain.push(path.display().to_string());
                let err = DeviceError::IncludeCycle { chain };
                let mut diag = Diagnostic::error(err.to_string());
                if let Some(span) = at {
                    diag = diag.with_span(span);
                }
                self.collector.emit(diag);
                return;
            }
            None => {}
        }
        if self.stack.len() >= MAX_INCLUDE_DEPTH {
            let err = DeviceError::IncludeDepth {
                path: path.display().to_string(),
                max: MAX_INCLUDE_DEPTH,
            };
            self.collector.emit(Diagnostic::error(err.to_string()));
            return;
        }
        let text = match self.loader.load(&path) {
            Ok(text) => text,
            Err(e) => {
                let err = DeviceError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                };
                let mut diag = Diagnostic::error(err.to_string());
                if let Some(span) = at {
                    diag = diag.with_span(span);
                }
                self.collector.emit(diag);
                return;
            }
        };
        self.visit_text(path, &text, at);
    }

    fn visit_text(&mut self, path: PathBuf, text: &str, _at: Option<Span>) {
        debug!(path = %path.display(), "parsing document");
        self.state.insert(path.clone(), VisitState::OnStack);
        self.stack.push(path.clone());

        let source = self.sources.intern(&path.display().to_string());
        let doc = parse_document(text, source, self.collector);

        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        for include in &doc.includes {
            let target = normalize(&base.join(&include.path));
            self.visit_file(target, Some(include.span));
        }

        self.stack.pop();
        self.state.insert(path, VisitState::Done);
        self.docs.push(doc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MapLoader;

    #[test]
    fn includes_resolve_relative_to_including_file() {
        let loader = MapLoader::new()
            .with("configs/root.nemc", "include \"sub/a.nemc\"\ndevice d { }")
            .with("configs/sub/a.nemc", "family cast { variant default { may() } }");
        let mut sources = SourceMap::new();
        let mut collector = Collector::new();
        let docs = load_root_file(
            Path::new("configs/root.nemc"),
            &loader,
            &mut sources,
            &mut collector,
        );
        assert!(!collector.has_errors(), "{:?}", collector.into_vec());
        assert_eq!(docs.len(), 2);
        // Included document precedes the root.
        assert!(docs[0].catalog().is_some_and(|c| !c.items.is_empty()));
    }

    #[test]
    fn include_cycles_are_reported_once() {
        let loader = MapLoader::new()
            .with("a.nemc", "include \"b.nemc\"\nfamily cast { variant default { may() } }")
            .with("b.nemc", "include \"a.nemc\"\nfamily gemm { variant default { may() } }");
        let mut sources = SourceMap::new();
        let mut collector = Collector::new();
        let docs = load_root_file(Path::new("a.nemc"), &loader, &mut sources, &mut collector);
        assert_eq!(collector.error_count(), 1);
        assert!(collector
            .errors()
            .next()
            .unwrap()
            .message()
            .contains("include cycle"));
        // Both documents still parse.
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn duplicate_includes_parse_once() {
        let loader = MapLoader::new()
            .with("root.nemc", "include \"x.nemc\"\ninclude \"x.nemc\"\ndevice d { }")
            .with("x.nemc", "family cast { variant default { may() } }");
        let mut sources = SourceMap::new();
        let mut collector = Collector::new();
        let docs = load_root_file(Path::new("root.nemc"), &loader, &mut sources, &mut collector);
        assert!(!collector.has_errors());
        assert_eq!(docs.len(), 2);
    }
}
