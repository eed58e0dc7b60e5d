mod common;

use nem_vm::ast::{DocBody, Stmt, TaskCall};
use nem_vm::prelude::*;

fn parse(text: &str) -> (Document, Collector) {
    let mut sources = SourceMap::new();
    let mut collector = Collector::new();
    let doc = parse_document(text, sources.intern("test.nem"), &mut collector);
    (doc, collector)
}

const PROGRAM: &str = r#"
include "catalog/std.nemc"

program tiled_copy
device sky140

const TILE = 64

buffer weights : ddr size = TILE * TILE * 2 align = 64
buffer acts : l2 size = 8192 align = 64 @readonly
buffer stage : l1[0] size = 4096 align = 16

let w0 = region(weights, 0, 2048, elem = f16, shape = [32, 32], layout = row_major)
let q0 = region(acts, 0, 1024, elem = i8, shape = [32, 32], strides = [32, 1], quant = per_channel(0))

t0 = transfer.async in = w0 out = q0
t1 = gemm.async in = [w0, w0] out = [q0] accum = f32 deps = [t0] @resource(cstl[0])
wait [t0, t1]

loop i = 0 .. 7 @max_in_flight(2) {
    let s = region(stage, (i mod 2) * 128, 128, elem = i8, shape = [128])
    u0 = transfer.sync in = region(weights, i * 128, 128, elem = i8, shape = [128]) out = s
}
"#;

#[test]
fn parses_program_structure() {
    let (doc, collector) = parse(PROGRAM);
    assert!(!collector.has_errors(), "{:?}", collector.into_vec());
    assert_eq!(doc.includes.len(), 1);
    assert_eq!(doc.includes[0].path, "catalog/std.nemc");

    let program = doc.program().expect("program document");
    assert_eq!(program.name.as_ref().unwrap().name, "tiled_copy");
    assert!(program.device.is_some());
    assert_eq!(program.stmts.len(), 10);

    let kinds: Vec<&str> = program
        .stmts
        .iter()
        .map(|s| match s {
            Stmt::Const(_) => "const",
            Stmt::Buffer(_) => "buffer",
            Stmt::Region(_) => "region",
            Stmt::Task(_) => "task",
            Stmt::Loop(_) => "loop",
        })
        .collect();
    assert_eq!(
        kinds,
        [
            "const", "buffer", "buffer", "buffer", "region", "region", "task", "task", "task",
            "loop"
        ]
    );
}

#[test]
fn compute_calls_carry_operands_and_attributes() {
    let (doc, _) = parse(PROGRAM);
    let program = doc.program().unwrap();
    let Stmt::Task(task) = &program.stmts[7] else {
        panic!("expected the gemm task");
    };
    let TaskCall::Compute { op, ins, outs, attrs, .. } = &task.call else {
        panic!("expected a compute call");
    };
    assert_eq!(op.name, "gemm");
    assert_eq!(ins.len(), 2);
    assert_eq!(outs.len(), 1);
    assert_eq!(attrs.len(), 1);
    assert_eq!(attrs[0].name.name, "accum");
    assert_eq!(task.deps.len(), 1);
    assert_eq!(task.decorators.len(), 1);
    assert_eq!(task.decorators[0].name.name, "resource");
}

#[test]
fn parses_catalog_structure() {
    let (doc, collector) = parse(common::STD_CATALOG);
    assert!(!collector.has_errors(), "{:?}", collector.into_vec());
    let catalog = doc.catalog().expect("catalog document");
    let families = catalog
        .items
        .iter()
        .filter(|i| matches!(i, nem_vm::ast::CatalogItem::Family(_)))
        .count();
    let devices = catalog
        .items
        .iter()
        .filter(|i| matches!(i, nem_vm::ast::CatalogItem::Device(_)))
        .count();
    assert_eq!(families, 13);
    assert_eq!(devices, 2);
}

#[test]
fn structural_round_trip_is_stable() {
    for text in [PROGRAM, common::STD_CATALOG] {
        let (doc, collector) = parse(text);
        assert!(!collector.has_errors());
        let rendered = doc.to_string();
        let (reparsed, collector) = parse(&rendered);
        assert!(
            !collector.has_errors(),
            "rendering failed to reparse:\n{rendered}"
        );
        assert_eq!(
            reparsed.to_string(),
            rendered,
            "rendering is not a fixed point"
        );
    }
}

#[test]
fn recovery_reports_every_error_in_one_pass() {
    let text = r#"
const A = 2
buffer b : ddr size = align = 64
const B = 3
let r = region(b, 0, )
const C = 4
"#;
    let (doc, collector) = parse(text);
    assert!(collector.error_count() >= 2, "{:?}", collector.into_vec());
    // Statements after each error were still parsed.
    let program = doc.program().unwrap();
    let consts = program
        .stmts
        .iter()
        .filter(|s| matches!(s, Stmt::Const(_)))
        .count();
    assert_eq!(consts, 3);
}

#[test]
fn wait_cannot_be_assigned_a_token() {
    let (_, collector) = parse("t = wait [x]");
    assert!(collector
        .errors()
        .any(|d| d.message().contains("produces no token")));
}

#[test]
fn expression_precedence_binds_multiplicative_first() {
    let (doc, collector) = parse("const X = 1 + 2 * 3 - -4 mod 3");
    assert!(!collector.has_errors());
    let program = doc.program().unwrap();
    let Stmt::Const(decl) = &program.stmts[0] else {
        panic!("expected const");
    };
    // (1 + (2 * 3)) - ((-4) mod 3)
    assert_eq!(decl.value.to_string(), "1 + 2 * 3 - -4 mod 3");
    let env = nem_vm::model::Env::new();
    assert_eq!(decl.value.eval(&env).unwrap(), 1 + 2 * 3 - (-4 % 3));
}

#[test]
fn inline_device_program_is_recognized() {
    let text = r#"
device inline_dev {
    spec_version = "nem-1.0"
    topology {
        engines = 1
        l2_size_bytes = 65536
        per_engine { cstl = 1, l1_size_bytes = 4096 }
    }
}
buffer a : ddr size = 16 align = 16
"#;
    let (doc, collector) = parse(text);
    assert!(!collector.has_errors(), "{:?}", collector.into_vec());
    let program = doc.program().expect("program with inline device");
    assert!(matches!(
        program.device,
        Some(nem_vm::ast::DeviceDirective::Inline(_))
    ));
    assert_eq!(program.stmts.len(), 1);
}

#[test]
fn pure_device_document_is_a_catalog() {
    let text = r#"
device only_dev {
    spec_version = "nem-1.0"
}
"#;
    let (doc, collector) = parse(text);
    assert!(!collector.has_errors());
    assert!(matches!(doc.body, DocBody::Catalog(_)));
}
