mod common;

use common::{assert_one_error_containing, diagnose, diagnose_with, error_messages};
use nem_vm::prelude::*;

// ------------------------------------------------------------ constants

#[test]
fn constants_evaluate_in_declaration_order() {
    let text = r#"
device sky140
const A = 2
const B = A * 3
const C = (B + 1) mod 4
"#;
    let mut collector = Collector::new();
    let mut sources = SourceMap::new();
    let catalog_doc = parse_document(
        common::STD_CATALOG,
        sources.intern("catalog.nemc"),
        &mut collector,
    );
    let program_doc = parse_document(text, sources.intern("test.nem"), &mut collector);
    let catalog = resolve(
        &[catalog_doc, program_doc.clone()],
        &mut collector,
    );
    let registry = Registry::load_default().unwrap();
    let device = catalog.device("sky140").cloned();
    let tables = validate(
        program_doc.program().unwrap(),
        &catalog,
        device.as_ref(),
        &registry,
        &mut collector,
    );
    assert!(!collector.has_errors(), "{:?}", collector.into_vec());
    assert_eq!(tables.consts["A"], 2);
    assert_eq!(tables.consts["B"], 6);
    assert_eq!(tables.consts["C"], 3);
}

#[test]
fn forward_references_are_one_error() {
    let collector = diagnose("device sky140\nconst A = B + 1\nconst B = 2");
    assert_one_error_containing(&collector, "forward reference to constant `B`");
}

#[test]
fn division_by_zero_in_constants_is_fatal() {
    let collector = diagnose("device sky140\nconst Z = 0\nconst A = 4 / Z");
    // Constant values fold in declaration order, so the division by zero
    // is detected statically.
    assert!(error_messages(&collector)
        .iter()
        .any(|m| m.contains("division by zero")));
}

#[test]
fn constants_inside_loops_are_rejected() {
    let collector = diagnose(
        r#"
device sky140
loop i = 0 .. 3 {
    const K = 5
}
"#,
    );
    assert!(error_messages(&collector)
        .iter()
        .any(|m| m.contains("inside a loop body")));
}

#[test]
fn floats_are_confined_to_attribute_position() {
    let collector = diagnose("device sky140\nconst A = 1.5");
    assert!(error_messages(&collector)
        .iter()
        .any(|m| m.contains("floating literal")));
}

// ------------------------------------------------------- names & scopes

#[test]
fn duplicate_declarations_collide() {
    let collector = diagnose(
        r#"
device sky140
buffer a : ddr size = 64 align = 16
buffer a : l2 size = 64 align = 16
"#,
    );
    assert_one_error_containing(&collector, "duplicate declaration of `a`");
}

#[test]
fn constants_are_never_shadowed() {
    let collector = diagnose(
        r#"
device sky140
const N = 4
buffer N : ddr size = 64 align = 16
"#,
    );
    assert_one_error_containing(&collector, "shadows a constant");
}

#[test]
fn loop_variables_must_be_fresh() {
    let collector = diagnose(
        r#"
device sky140
const i = 1
loop i = 0 .. 3 {
}
"#,
    );
    assert!(error_messages(&collector)
        .iter()
        .any(|m| m.contains("shadows an existing")));
}

#[test]
fn unknown_names_are_classified() {
    let collector = diagnose(
        r#"
device sky140
buffer a : ddr size = 64 align = 16
transfer.async in = ghost out = region(a, 0, 32, elem = i8, shape = [32])
"#,
    );
    assert_one_error_containing(&collector, "unknown region `ghost`");
}

#[test]
fn tokens_resolve_only_backwards_and_in_scope() {
    let collector = diagnose(
        r#"
device sky140
buffer a : ddr size = 64 align = 16
buffer b : l2 size = 64 align = 16
let ra = region(a, 0, 32, elem = i8, shape = [32])
let rb = region(b, 0, 32, elem = i8, shape = [32])
t0 = transfer.async in = ra out = rb deps = [t1]
t1 = transfer.async in = ra out = region(b, 32, 32, elem = i8, shape = [32])
"#,
    );
    assert_one_error_containing(&collector, "unknown token `t1`");
}

#[test]
fn loop_scoped_tokens_do_not_escape() {
    let collector = diagnose(
        r#"
device sky140
buffer a : ddr size = 1024 align = 16
buffer b : l2 size = 1024 align = 16
loop i = 0 .. 3 {
    u = transfer.async in = region(a, i * 64, 64, elem = i8, shape = [64]) out = region(b, i * 64, 64, elem = i8, shape = [64])
}
wait [u]
"#,
    );
    assert_one_error_containing(&collector, "unknown token `u`");
}

// -------------------------------------------------- buffers and regions

#[test]
fn buffer_alignment_must_be_a_power_of_two() {
    let collector = diagnose("device sky140\nbuffer a : ddr size = 64 align = 3");
    assert_one_error_containing(&collector, "power of two");
}

#[test]
fn scratchpad_capacity_is_enforced() {
    let collector = diagnose(
        r#"
device sky140
buffer big : l1[0] size = 1048577 align = 16
"#,
    );
    assert!(error_messages(&collector)
        .iter()
        .any(|m| m.contains("exceeding")));
}

#[test]
fn scratchpad_index_must_name_an_engine() {
    let collector = diagnose("device sky140\nbuffer a : l1[2] size = 64 align = 16");
    assert_one_error_containing(&collector, "outside the device's 2 engine(s)");
}

#[test]
fn regions_stay_inside_their_buffer() {
    let collector = diagnose(
        r#"
device sky140
buffer a : ddr size = 64 align = 16
let r = region(a, 32, 64, elem = i8, shape = [64])
"#,
    );
    assert_one_error_containing(&collector, "extends beyond buffer");
}

#[test]
fn byte_extent_covers_packed_elements() {
    let collector = diagnose(
        r#"
device sky140
buffer a : ddr size = 64 align = 16
let r = region(a, 0, 16, elem = i8, shape = [32])
"#,
    );
    assert_one_error_containing(&collector, "smaller than the 32 bytes");
}

#[test]
fn sub_byte_extents_round_up() {
    // 7 i4 elements need ceil(7 * 4 / 8) = 4 bytes.
    let ok = diagnose(
        r#"
device sky140
buffer a : ddr size = 64 align = 16
let r = region(a, 0, 4, elem = i4, shape = [7])
"#,
    );
    assert!(!ok.has_errors(), "{:?}", ok.into_vec());

    let bad = diagnose(
        r#"
device sky140
buffer a : ddr size = 64 align = 16
let r = region(a, 0, 3, elem = i4, shape = [7])
"#,
    );
    assert!(bad.has_errors());
}

#[test]
fn strides_must_stay_reachable_within_the_extent() {
    let collector = diagnose(
        r#"
device sky140
buffer a : ddr size = 4096 align = 16
let r = region(a, 0, 64, elem = i8, shape = [4, 4], strides = [32, 1])
"#,
    );
    assert_one_error_containing(&collector, "beyond the region's 64-byte extent");
}

#[test]
fn quantization_axes_are_checked() {
    let collector = diagnose(
        r#"
device sky140
buffer a : ddr size = 4096 align = 16
let r = region(a, 0, 1024, elem = i8, shape = [32, 32], quant = per_group(1, 5))
"#,
    );
    assert_one_error_containing(&collector, "does not divide axis extent 32");
}

// ------------------------------------------------------- type checking

#[test]
fn mismatch_suggests_the_nearest_variant() {
    let catalog = r#"
family gemm.float<T : f16 | bf16 | f32> {
    operand a : in T
    operand b : in T
    operand bias : in T
    operand c : out T
    variant no_bias {
        bias = absent
        must(f16)
    }
}

device narrow {
    spec_version = "nem-1.0"
    topology {
        engines = 1
        l2_size_bytes = 1048576
        per_engine { cstl = 1, l1_size_bytes = 65536 }
    }
    opcode.mandatory {
        gemm.float<f16>.no_bias
    }
}
"#;
    let program = r#"
device narrow
buffer ab : ddr size = 64 align = 16
buffer bb : ddr size = 64 align = 16
buffer cb : ddr size = 64 align = 16
let a = region(ab, 0, 16, elem = f32, shape = [2, 2])
let b = region(bb, 0, 16, elem = f32, shape = [2, 2])
let c = region(cb, 0, 16, elem = f32, shape = [2, 2])
gemm.sync in = [a, b] out = [c]
"#;
    let collector = diagnose_with(catalog, "narrow", program);
    let errors: Vec<_> = collector.errors().collect();
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].message().contains("no variant supported"));
    assert!(errors[0]
        .notes()
        .iter()
        .any(|n| n.message.contains("gemm.float<f16>.no_bias")));
}

#[test]
fn matching_records_conformance() {
    let text = r#"
device sky140
buffer ab : ddr size = 64 align = 16
buffer bb : ddr size = 64 align = 16
buffer cb : ddr size = 64 align = 16
let a = region(ab, 0, 8, elem = f16, shape = [2, 2])
let b = region(bb, 0, 8, elem = f16, shape = [2, 2])
let c = region(cb, 0, 8, elem = f16, shape = [2, 2])
gemm.sync in = [a, b] out = [c]
"#;
    let mut collector = Collector::new();
    let mut sources = SourceMap::new();
    let catalog_doc = parse_document(
        common::STD_CATALOG,
        sources.intern("catalog.nemc"),
        &mut collector,
    );
    let program_doc = parse_document(text, sources.intern("test.nem"), &mut collector);
    let catalog = resolve(&[catalog_doc, program_doc.clone()], &mut collector);
    let registry = Registry::load_default().unwrap();
    let device = catalog.device("sky140").cloned();
    let tables = validate(
        program_doc.program().unwrap(),
        &catalog,
        device.as_ref(),
        &registry,
        &mut collector,
    );
    assert!(!collector.has_errors(), "{:?}", collector.into_vec());
    let matched = tables.matched.values().next().expect("gemm matched");
    assert_eq!(matched.variant.to_string(), "gemm.float<f16>.no_bias");
    assert_eq!(matched.conformance, Conformance::Must);
}

#[test]
fn unknown_operators_are_rejected_in_compute_position() {
    let collector = diagnose(
        r#"
device sky140
buffer a : ddr size = 64 align = 16
let r = region(a, 0, 16, elem = f32, shape = [4])
fft.async in = [r] out = [r]
"#,
    );
    assert!(error_messages(&collector)
        .iter()
        .any(|m| m.contains("unknown operator `fft`")));
}

#[test]
fn compute_operands_need_element_types() {
    let collector = diagnose(
        r#"
device sky140
buffer a : ddr size = 64 align = 16
buffer b : ddr size = 64 align = 16
relu.sync in = [region(a, 0, 16)] out = [region(b, 0, 16, elem = f32, shape = [4])]
"#,
    );
    assert!(error_messages(&collector)
        .iter()
        .any(|m| m.contains("needs an element type")));
}

#[test]
fn transfers_demand_equal_extents() {
    let collector = diagnose(
        r#"
device sky140
buffer a : ddr size = 64 align = 16
buffer b : l2 size = 64 align = 16
transfer.async in = region(a, 0, 32, elem = i8, shape = [32]) out = region(b, 0, 16, elem = i8, shape = [16])
"#,
    );
    assert_one_error_containing(&collector, "32 bytes into a 16-byte destination");
}

#[test]
fn required_attributes_must_be_supplied() {
    let collector = diagnose(
        r#"
device sky140
buffer a : ddr size = 64 align = 16
buffer b : ddr size = 64 align = 16
let x = region(a, 0, 16, elem = f32, shape = [4])
let y = region(b, 0, 4, elem = i8, shape = [4])
quantize.sync in = [x] out = [y]
"#,
    );
    assert!(error_messages(&collector)
        .iter()
        .any(|m| m.contains("requires attribute `scale`")));
}

// --------------------------------------------------- hazards & engines

#[test]
fn unordered_overlapping_writes_are_a_hazard() {
    let collector = diagnose(
        r#"
device sky140
buffer src : ddr size = 256 align = 64
buffer shared : l2 size = 256 align = 64
t0 = transfer.async in = region(src, 0, 128, elem = i8, shape = [128]) out = region(shared, 0, 128, elem = i8, shape = [128])
t1 = transfer.async in = region(src, 128, 128, elem = i8, shape = [128]) out = region(shared, 64, 128, elem = i8, shape = [128])
"#,
    );
    let errors: Vec<_> = collector.errors().collect();
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].message().contains("overlapping accesses"));
    assert!(errors[0].span().is_some());
    assert!(errors[0]
        .notes()
        .iter()
        .any(|n| n.message.contains("conflicting task") && n.span.is_some()));
}

#[test]
fn a_dependency_path_legalizes_the_overlap() {
    let collector = diagnose(
        r#"
device sky140
buffer src : ddr size = 256 align = 64
buffer shared : l2 size = 256 align = 64
t0 = transfer.async in = region(src, 0, 128, elem = i8, shape = [128]) out = region(shared, 0, 128, elem = i8, shape = [128])
t1 = transfer.async in = region(src, 128, 128, elem = i8, shape = [128]) out = region(shared, 64, 128, elem = i8, shape = [128]) deps = [t0]
"#,
    );
    assert!(!collector.has_errors(), "{:?}", collector.into_vec());
}

#[test]
fn memmove_permits_the_overlap() {
    let collector = diagnose(
        r#"
device sky140
buffer shared : l2 size = 256 align = 64
t0 = transfer.async in = region(shared, 0, 128, elem = i8, shape = [128]) out = region(shared, 64, 128, elem = i8, shape = [128]) @memmove
"#,
    );
    assert!(!collector.has_errors(), "{:?}", collector.into_vec());
}

#[test]
fn pipelined_iterations_inside_the_window_conflict() {
    // Iterations i and i+1 are both live under max_in_flight(2) and
    // write the same scratchpad bytes.
    let collector = diagnose(
        r#"
device sky140
buffer src : ddr size = 1024 align = 64
buffer stage : l1[0] size = 256 align = 16
loop i = 0 .. 7 @max_in_flight(2) {
    u0 = transfer.async in = region(src, i * 128, 128, elem = i8, shape = [128]) out = region(stage, 0, 128, elem = i8, shape = [128])
}
"#,
    );
    assert!(error_messages(&collector)
        .iter()
        .any(|m| m.contains("overlapping accesses")));
}

#[test]
fn modular_staging_outside_the_window_is_safe() {
    let collector = diagnose(
        r#"
device sky140
buffer src : ddr size = 1024 align = 64
buffer dst : ddr size = 1024 align = 64
buffer stage : l1[0] size = 256 align = 16
loop i = 0 .. 7 @max_in_flight(2) {
    let s = region(stage, (i mod 2) * 128, 128, elem = i8, shape = [128])
    u0 = transfer.async in = region(src, i * 128, 128, elem = i8, shape = [128]) out = s
    u1 = transfer.async in = s out = region(dst, i * 128, 128, elem = i8, shape = [128]) deps = [u0]
}
"#,
    );
    assert!(!collector.has_errors(), "{:?}", collector.into_vec());
}

#[test]
fn tasks_cannot_straddle_engines() {
    let collector = diagnose(
        r#"
device sky140
buffer a : l1[0] size = 256 align = 16
buffer b : l1[1] size = 256 align = 16
transfer.async in = region(a, 0, 64, elem = i8, shape = [64]) out = region(b, 0, 64, elem = i8, shape = [64])
"#,
    );
    assert_one_error_containing(&collector, "straddle");
}

#[test]
fn loop_indexed_scratchpads_resolve_per_iteration() {
    let collector = diagnose(
        r#"
device sky140
buffer dst : ddr size = 1024 align = 64
loop i = 0 .. 1 {
    buffer s : l1[i] size = 128 align = 16
    u = transfer.async in = region(s, 0, 128, elem = i8, shape = [128]) out = region(dst, i * 128, 128, elem = i8, shape = [128])
}
"#,
    );
    assert!(!collector.has_errors(), "{:?}", collector.into_vec());
}

// ---------------------------------------------------------- decorators

#[test]
fn unknown_decorators_are_rejected() {
    let collector = diagnose("device sky140\nbuffer a : ddr size = 64 align = 16 @inline");
    assert_one_error_containing(&collector, "unknown decorator `@inline`");
}

#[test]
fn resource_targets_per_engine_units_only() {
    let base = r#"
device sky140
buffer a : ddr size = 64 align = 16
buffer b : l2 size = 64 align = 16
let ra = region(a, 0, 32, elem = i8, shape = [32])
let rb = region(b, 0, 32, elem = i8, shape = [32])
"#;
    let on_dma = diagnose(&format!(
        "{base}transfer.async in = ra out = rb @resource(dma[0])"
    ));
    assert_one_error_containing(&on_dma, "device-level unit");

    let on_sequencer = diagnose(&format!(
        "{base}transfer.async in = ra out = rb @resource(sequencer[0])"
    ));
    assert_one_error_containing(&on_sequencer, "sequencer");

    let out_of_range = diagnose(&format!(
        "{base}transfer.async in = ra out = rb @resource(cstl[2])"
    ));
    assert_one_error_containing(&out_of_range, "outside the 2 per-engine instance(s)");

    let ok = diagnose(&format!(
        "{base}transfer.async in = ra out = rb @resource(cstl[1])"
    ));
    assert!(!ok.has_errors(), "{:?}", ok.into_vec());
}

#[test]
fn decorator_placement_is_checked() {
    let collector = diagnose(
        r#"
device sky140
buffer a : ddr size = 64 align = 16 @max_in_flight(2)
"#,
    );
    assert_one_error_containing(&collector, "cannot be attached to a buffer");
}

// --------------------------------------------------------------- loops

#[test]
fn loop_bounds_are_validated() {
    let backwards = diagnose("device sky140\nloop i = 4 .. 1 { }");
    assert_one_error_containing(&backwards, "runs backwards");

    let zero = diagnose("device sky140\nloop i = 0 .. 3 @max_in_flight(0) { }");
    assert_one_error_containing(&zero, "at least one active iteration");
}
