//! Shared fixtures for the conformance suites.

#![allow(dead_code)]

use nem_vm::prelude::*;

pub const STD_CATALOG: &str = include_str!("../fixtures/std.nemc");

/// Session over an in-memory loader with the standard catalog loaded.
pub fn session() -> Session<MapLoader> {
    let mut session = Session::new()
        .expect("embedded registry is well-formed")
        .with_loader(MapLoader::new());
    session
        .load_catalog_text("catalog/std.nemc", STD_CATALOG)
        .expect("standard catalog is clean");
    session
}

/// Run every validator pass over `text` against `sky140` and the
/// standard catalog, returning the diagnostics.
pub fn diagnose(text: &str) -> Collector {
    diagnose_with(STD_CATALOG, "sky140", text)
}

/// Same, with a custom catalog and device.
pub fn diagnose_with(catalog_text: &str, device: &str, text: &str) -> Collector {
    let mut collector = Collector::new();
    let mut sources = SourceMap::new();
    let catalog_doc = parse_document(
        catalog_text,
        sources.intern("catalog.nemc"),
        &mut collector,
    );
    let program_doc = parse_document(text, sources.intern("test.nem"), &mut collector);
    let docs = vec![catalog_doc, program_doc.clone()];
    let catalog = resolve(&docs, &mut collector);
    let registry = Registry::load_default().expect("embedded registry is well-formed");
    let device = catalog.device(device).cloned();
    if let Some(program) = program_doc.program() {
        validate(
            program,
            &catalog,
            device.as_ref(),
            &registry,
            &mut collector,
        );
    }
    collector
}

/// Error messages of a collector, for containment asserts.
pub fn error_messages(collector: &Collector) -> Vec<String> {
    collector
        .errors()
        .map(|d| d.message().to_string())
        .collect()
}

pub fn assert_one_error_containing(collector: &Collector, needle: &str) {
    let errors = error_messages(collector);
    assert_eq!(errors.len(), 1, "expected one error, got {errors:?}");
    assert!(
        errors[0].contains(needle),
        "error `{}` does not mention `{needle}`",
        errors[0]
    );
}
