mod common;

use std::collections::BTreeMap;

use nem_vm::exec::TaskKind;
use nem_vm::prelude::*;

// ---------------------------------------------------------- data movement

const COPY_PROGRAM: &str = r#"
program byte_fidelity
device sky140

buffer src : ddr size = 256 align = 64
buffer dst : l2 size = 256 align = 64

let a = region(src, 0, 256, elem = i8, shape = [256])
let b = region(dst, 0, 256, elem = i8, shape = [256])

transfer.sync in = a out = b
"#;

#[test]
fn transfer_preserves_bytes_exactly() {
    let fixture: Vec<u8> = (0..=255).collect();
    let mut session = common::session().with_input("src", fixture.clone());
    let execution = session
        .run_source("copy.nem", COPY_PROGRAM)
        .expect("clean run");
    assert_eq!(execution.state(), RunState::Completed);
    assert_eq!(execution.read_buffer("dst").unwrap(), &fixture[..]);
}

#[test]
fn default_policy_is_deterministic_across_runs() {
    let fixture: Vec<u8> = (0..=255).rev().collect();
    let mut session = common::session().with_input("src", fixture);
    let first = session.run_source("copy.nem", COPY_PROGRAM).unwrap();
    let second = session.run_source("copy.nem", COPY_PROGRAM).unwrap();
    assert_eq!(
        first.read_buffer("dst").unwrap(),
        second.read_buffer("dst").unwrap()
    );
    assert_eq!(first.receipts().len(), second.receipts().len());
}

#[test]
fn store_commits_like_a_transfer() {
    let program = COPY_PROGRAM.replace("transfer.sync", "store.sync");
    let fixture: Vec<u8> = (0..=255).collect();
    let mut session = common::session().with_input("src", fixture.clone());
    let execution = session.run_source("store.nem", &program).unwrap();
    assert_eq!(execution.read_buffer("dst").unwrap(), &fixture[..]);
    assert_eq!(execution.receipts()[0].kind, TaskKind::Store);
}

// --------------------------------------------------------------- compute

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[test]
fn gemm_runs_end_to_end() {
    let program = r#"
program tiny_gemm
device sky140

buffer ab : ddr size = 16 align = 16
buffer bb : ddr size = 16 align = 16
buffer cb : ddr size = 16 align = 16

let a = region(ab, 0, 16, elem = f32, shape = [2, 2])
let b = region(bb, 0, 16, elem = f32, shape = [2, 2])
let c = region(cb, 0, 16, elem = f32, shape = [2, 2])

gemm.sync in = [a, b] out = [c]
"#;
    let mut session = common::session()
        .with_input("ab", f32_bytes(&[1.0, 2.0, 3.0, 4.0]))
        .with_input("bb", f32_bytes(&[5.0, 6.0, 7.0, 8.0]));
    let execution = session.run_source("gemm.nem", program).expect("clean run");
    assert_eq!(
        bytes_f32(execution.read_buffer("cb").unwrap()),
        vec![19.0, 22.0, 43.0, 50.0]
    );
}

#[test]
fn staged_compute_moves_through_the_hierarchy() {
    // DDR -> L1 staging, elementwise add on the engine, result back out.
    let program = r#"
program staged_add
device sky140

buffer xa : ddr size = 64 align = 16
buffer xb : ddr size = 64 align = 16
buffer out : ddr size = 64 align = 16
buffer sp : l1[0] size = 256 align = 16

let ga = region(xa, 0, 64, elem = i8, shape = [64])
let gb = region(xb, 0, 64, elem = i8, shape = [64])
let la = region(sp, 0, 64, elem = i8, shape = [64])
let lb = region(sp, 64, 64, elem = i8, shape = [64])
let lc = region(sp, 128, 64, elem = i8, shape = [64])
let go = region(out, 0, 64, elem = i8, shape = [64])

t0 = transfer.async in = ga out = la
t1 = transfer.async in = gb out = lb
t2 = eltwise_add.async in = [la, lb] out = [lc] deps = [t0, t1]
transfer.sync in = lc out = go deps = [t2]
"#;
    let xa: Vec<u8> = (0..64).collect();
    let xb: Vec<u8> = (0..64).map(|v| v * 2).collect();
    let expected: Vec<u8> = (0..64).map(|v| v * 3).collect();
    let mut session = common::session()
        .with_input("xa", xa)
        .with_input("xb", xb);
    let execution = session.run_source("staged.nem", program).unwrap();
    assert_eq!(execution.read_buffer("out").unwrap(), &expected[..]);

    // Every task on the engine reports its scratchpad placement.
    let compute = execution
        .receipts()
        .iter()
        .find(|r| r.kind == TaskKind::Compute)
        .unwrap();
    assert_eq!(compute.engine, Some(0));
    assert_eq!(compute.op.as_deref(), Some("eltwise_add"));
}

#[test]
fn quantize_then_dequantize_preserves_grid_values() {
    let program = r#"
program quant_chain
device sky140

buffer fin : ddr size = 16 align = 16
buffer q : ddr size = 4 align = 16
buffer fout : ddr size = 16 align = 16

let x = region(fin, 0, 16, elem = f32, shape = [4])
let y = region(q, 0, 4, elem = i8, shape = [4])
let z = region(fout, 0, 16, elem = f32, shape = [4])

t0 = quantize.async in = [x] out = [y] scale = 0.5
dequantize.sync in = [y] out = [z] scale = 0.5 deps = [t0]
"#;
    let mut session = common::session().with_input("fin", f32_bytes(&[1.0, -2.0, 3.5, 0.0]));
    let execution = session.run_source("quant.nem", program).unwrap();
    // Multiples of the scale survive the round trip exactly.
    assert_eq!(
        bytes_f32(execution.read_buffer("fout").unwrap()),
        vec![1.0, -2.0, 3.5, 0.0]
    );
    assert_eq!(
        execution.read_buffer("q").unwrap(),
        &[2u8, 0xfc, 7, 0] // 2, -4, 7, 0 as i8
    );
}

#[test]
fn sub_byte_values_pack_into_nibbles() {
    let program = r#"
program nibble_pack
device sky140

buffer wide : ddr size = 4 align = 16
buffer packed : ddr size = 2 align = 16
buffer back : ddr size = 4 align = 16

let x = region(wide, 0, 4, elem = i8, shape = [4])
let y = region(packed, 0, 2, elem = i4, shape = [4])
let z = region(back, 0, 4, elem = i8, shape = [4])

t0 = pack4.async in = [x] out = [y]
unpack4.sync in = [y] out = [z] deps = [t0]
"#;
    let mut session = common::session().with_input("wide", vec![1, 0xff, 7, 0xf8]);
    let execution = session.run_source("pack.nem", program).unwrap();
    // 1, -1, 7, -8: low nibble first within each byte.
    assert_eq!(execution.read_buffer("packed").unwrap(), &[0xf1, 0x87]);
    assert_eq!(execution.read_buffer("back").unwrap(), &[1, 0xff, 7, 0xf8]);
}

#[test]
fn softmax_normalizes_in_place_buffers() {
    let program = r#"
program softmax_row
device sky140

buffer fin : ddr size = 16 align = 16
buffer fout : ddr size = 16 align = 16

let x = region(fin, 0, 16, elem = f32, shape = [4])
let y = region(fout, 0, 16, elem = f32, shape = [4])

softmax.sync in = [x] out = [y]
"#;
    let mut session = common::session().with_input("fin", f32_bytes(&[0.0, 0.0, 0.0, 0.0]));
    let execution = session.run_source("softmax.nem", program).unwrap();
    assert_eq!(
        bytes_f32(execution.read_buffer("fout").unwrap()),
        vec![0.25; 4]
    );
}

// --------------------------------------------------- failure semantics

#[test]
fn validation_errors_refuse_execution() {
    let mut session = common::session();
    let err = session
        .run_source("bad.nem", "device sky140\nbuffer a : ddr size = 64 align = 3")
        .unwrap_err();
    assert!(matches!(err, NemError::Validation { .. }));
    assert!(session.diagnostics().has_errors());
}

#[test]
fn readonly_regions_reject_writes_at_dispatch() {
    let program = r#"
program frozen
device sky140

buffer src : ddr size = 64 align = 16
buffer dst : l2 size = 64 align = 16 @readonly

transfer.sync in = region(src, 0, 64, elem = i8, shape = [64]) out = region(dst, 0, 64, elem = i8, shape = [64])
"#;
    let mut session = common::session();
    let err = session.run_source("frozen.nem", program).unwrap_err();
    match err {
        NemError::Exec(ExecError::ReadOnlyViolation { buffer }) => assert_eq!(buffer, "dst"),
        other => panic!("expected a read-only violation, got {other}"),
    }
    // The abort surfaced as a fatal diagnostic too.
    assert!(session.diagnostics().has_errors());
}

#[test]
fn alignment_padding_can_overflow_at_run_time() {
    // The static sum fits exactly, but linear allocation rounds the
    // second buffer's base up and runs out.
    let program = r#"
program tight
device sky140

buffer a : l1[0] size = 1048575 align = 1
buffer b : l1[0] size = 1 align = 16
"#;
    let mut session = common::session();
    let err = session.run_source("tight.nem", program).unwrap_err();
    assert!(matches!(
        err,
        NemError::Exec(ExecError::AllocationOverflow { .. })
    ));
}

#[test]
fn unsupported_operators_abort() {
    struct NullBackend;
    impl Backend for NullBackend {
        fn supports(&self, _: &str) -> bool {
            false
        }
        fn execute(
            &mut self,
            _: &str,
            _: &[Tensor],
            _: &mut [Tensor],
            _: &BTreeMap<String, AttrVal>,
        ) -> Result<(), BackendError> {
            unreachable!("supports() is always consulted first")
        }
    }

    let program = r#"
program unrunnable
device sky140
buffer a : ddr size = 16 align = 16
buffer b : ddr size = 16 align = 16
let x = region(a, 0, 16, elem = f32, shape = [4])
let y = region(b, 0, 16, elem = f32, shape = [4])
relu.sync in = [x] out = [y]
"#;
    let mut session = common::session().with_backend(NullBackend);
    let err = session.run_source("unrunnable.nem", program).unwrap_err();
    assert!(matches!(
        err,
        NemError::Exec(ExecError::UnsupportedOperator(op)) if op == "relu"
    ));
}

#[test]
fn backend_failures_carry_the_message() {
    struct FaultyBackend;
    impl Backend for FaultyBackend {
        fn supports(&self, _: &str) -> bool {
            true
        }
        fn execute(
            &mut self,
            _: &str,
            _: &[Tensor],
            _: &mut [Tensor],
            _: &BTreeMap<String, AttrVal>,
        ) -> Result<(), BackendError> {
            Err(BackendError::new("accumulator saturated"))
        }
    }

    let program = r#"
program faulty
device sky140
buffer a : ddr size = 16 align = 16
buffer b : ddr size = 16 align = 16
let x = region(a, 0, 16, elem = f32, shape = [4])
let y = region(b, 0, 16, elem = f32, shape = [4])
relu.sync in = [x] out = [y]
"#;
    let mut session = common::session().with_backend(FaultyBackend);
    let err = session.run_source("faulty.nem", program).unwrap_err();
    match err {
        NemError::Exec(ExecError::Backend { op, message }) => {
            assert_eq!(op, "relu");
            assert_eq!(message, "accumulator saturated");
        }
        other => panic!("expected a backend failure, got {other}"),
    }
}

// ------------------------------------------------- receipts & stepping

#[test]
fn receipts_trace_the_run_in_completion_order() {
    let program = r#"
program traced
device sky140

buffer src : ddr size = 64 align = 16
buffer dst : l2 size = 64 align = 16

let a = region(src, 0, 64, elem = i8, shape = [64])
let b = region(dst, 0, 64, elem = i8, shape = [64])

transfer.sync in = a out = b @debug(fill) @profile("dma")
"#;
    let mut session = common::session();
    let execution = session.run_source("traced.nem", program).unwrap();

    // A sync transfer is the async form plus a wait on its own token.
    let kinds: Vec<TaskKind> = execution.receipts().iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![TaskKind::Transfer, TaskKind::Wait]);

    let transfer = &execution.receipts()[0];
    assert_eq!(transfer.bytes_moved, 64);
    assert_eq!(transfer.label.as_deref(), Some("fill"));
    assert!(transfer.token.is_some());
    assert_eq!(execution.profile()["dma"], 1);
}

#[test]
fn bounded_stepping_suspends_without_partial_loss() {
    let fixture: Vec<u8> = (0..=255).collect();
    let mut sources = SourceMap::new();
    let mut collector = Collector::new();
    let catalog_doc = parse_document(
        common::STD_CATALOG,
        sources.intern("catalog.nemc"),
        &mut collector,
    );
    let program_doc = parse_document(COPY_PROGRAM, sources.intern("copy.nem"), &mut collector);
    let catalog = resolve(&[catalog_doc, program_doc.clone()], &mut collector);
    let registry = Registry::load_default().unwrap();
    let device = catalog.device("sky140").cloned().unwrap();
    let program = program_doc.program().unwrap();
    let tables = validate(
        program,
        &catalog,
        Some(&device),
        &registry,
        &mut collector,
    );
    assert!(!collector.has_errors());

    let mut engine = Engine::new(device, registry, ReferenceBackend::new())
        .with_input("src", fixture.clone());
    let execution = engine
        .run_steps(program, &tables, &mut collector, Some(1))
        .unwrap();
    assert_eq!(execution.state(), RunState::Suspended);
    // The transfer itself already ran; only the trailing wait is left.
    assert_eq!(execution.receipts().len(), 1);
    assert_eq!(execution.read_buffer("dst").unwrap(), &fixture[..]);
}

#[test]
fn abstract_devices_cannot_execute() {
    let program = r#"
device ghost { spec_version = "nem-1.0" }
buffer a : ddr size = 16 align = 16
"#;
    let mut session = common::session();
    let err = session.run_source("ghost.nem", program).unwrap_err();
    assert!(matches!(err, NemError::Validation { .. }));
    assert!(session
        .diagnostics()
        .errors()
        .any(|d| d.message().contains("no topology")));
}
