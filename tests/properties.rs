mod common;

use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;

use nem_vm::diag::{LineCol, SourceId, Span};
use nem_vm::exec::{f16_to_f32, f32_to_f16, read_tensor, write_tensor, Tensor, TensorData};
use nem_vm::model::{BinOp, ElemType, Env, Expr, UnaryOp};
use nem_vm::prelude::*;
use nem_vm::validate::RegionShape;

fn span() -> Span {
    Span::point(SourceId(0), LineCol::new(1, 1))
}

/// Integer expression over the fixed environment `{ n: 3, m: 5 }`.
#[derive(Debug, Clone)]
struct ArbExpr(Expr);

fn gen_expr(g: &mut Gen, depth: usize) -> Expr {
    let leaf = depth == 0 || bool::arbitrary(g);
    if leaf {
        match u8::arbitrary(g) % 3 {
            0 => Expr::Int {
                value: (i64::arbitrary(g) % 1000).abs(),
                span: span(),
            },
            1 => Expr::Ident {
                name: "n".into(),
                span: span(),
            },
            _ => Expr::Ident {
                name: "m".into(),
                span: span(),
            },
        }
    } else if u8::arbitrary(g) % 6 == 0 {
        Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(gen_expr(g, depth - 1)),
            span: span(),
        }
    } else {
        let op = *g
            .choose(&[BinOp::Add, BinOp::Sub, BinOp::Mul, BinOp::Div, BinOp::Mod])
            .unwrap();
        Expr::Binary {
            op,
            lhs: Box::new(gen_expr(g, depth - 1)),
            rhs: Box::new(gen_expr(g, depth - 1)),
            span: span(),
        }
    }
}

impl Arbitrary for ArbExpr {
    fn arbitrary(g: &mut Gen) -> Self {
        ArbExpr(gen_expr(g, 4))
    }
}

fn fixed_env() -> Env {
    let mut env = Env::new();
    env.bind("n", 3);
    env.bind("m", 5);
    env
}

#[quickcheck]
fn constant_folding_is_idempotent(expr: ArbExpr) -> bool {
    let env = fixed_env();
    expr.0.eval(&env) == expr.0.eval(&env)
}

#[quickcheck]
fn rendered_expressions_reparse_to_the_same_tree(expr: ArbExpr) -> bool {
    let text = format!("const n = 1\nconst m = 2\nconst x = {}", expr.0);
    let mut sources = SourceMap::new();
    let mut collector = Collector::new();
    let doc = parse_document(&text, sources.intern("prop.nem"), &mut collector);
    if collector.has_errors() {
        return false;
    }
    let Some(program) = doc.program() else {
        return false;
    };
    let nem_vm::ast::Stmt::Const(decl) = &program.stmts[2] else {
        return false;
    };
    // Same canonical rendering implies equal structure.
    decl.value.to_string() == expr.0.to_string()
}

#[quickcheck]
fn byte_extents_round_up_to_whole_bytes(count: u16, pick: u8) -> bool {
    let types = [
        ElemType::I4,
        ElemType::I8,
        ElemType::I16,
        ElemType::I32,
        ElemType::U8,
        ElemType::U16,
        ElemType::U32,
        ElemType::F16,
        ElemType::Bf16,
        ElemType::F32,
    ];
    let elem = types[pick as usize % types.len()];
    let count = count as u64;
    let bytes = elem.byte_extent(count);
    bytes * 8 >= count * elem.bit_width()
        && (count == 0 || (bytes - 1) * 8 < count * elem.bit_width())
}

#[quickcheck]
fn nibble_packing_round_trips(values: Vec<i8>) -> bool {
    if values.is_empty() {
        return true;
    }
    let clamped: Vec<i64> = values.iter().map(|&v| (v as i64).clamp(-8, 7)).collect();
    let shape = RegionShape {
        offset: 0,
        extent: ElemType::I4.byte_extent(clamped.len() as u64),
        elem: Some(ElemType::I4),
        shape: vec![clamped.len() as u64],
        strides: vec![1],
        quant: None,
    };
    let mut bytes = vec![0u8; shape.extent as usize];
    let tensor = Tensor {
        elem: ElemType::I4,
        shape: vec![clamped.len()],
        data: TensorData::Int(clamped.clone()),
    };
    write_tensor(&mut bytes, &shape, &tensor).is_ok()
        && read_tensor(&bytes, &shape)
            .map(|t| t.ints() == Some(clamped.as_slice()))
            .unwrap_or(false)
}

#[quickcheck]
fn half_float_conversion_is_lossless(bits: u16) -> bool {
    let value = f16_to_f32(bits);
    // NaN payload quieting aside, every binary16 value survives the
    // widen/narrow pair bit-exactly.
    value.is_nan() || f32_to_f16(value) == bits
}

const SEED_PROGRAM: &str = r#"
program reorder_probe
device sky140

buffer src : ddr size = 512 align = 64
buffer dst : ddr size = 512 align = 64
buffer stage : l1[0] size = 256 align = 16

loop i = 0 .. 3 @max_in_flight(2) {
    let s = region(stage, (i mod 2) * 128, 128, elem = i8, shape = [128])
    u0 = transfer.async in = region(src, i * 128, 128, elem = i8, shape = [128]) out = s
    u1 = transfer.async in = s out = region(dst, i * 128, 128, elem = i8, shape = [128]) deps = [u0]
}
"#;

#[quickcheck]
fn scheduling_seeds_never_change_output_bytes(seed: u64) -> bool {
    let input: Vec<u8> = (0..512u32).map(|i| (i % 241) as u8).collect();

    let mut reference = common::session().with_input("src", input.clone());
    let expected = reference
        .run_source("probe.nem", SEED_PROGRAM)
        .unwrap()
        .read_buffer("dst")
        .unwrap()
        .to_vec();

    let mut session = common::session()
        .with_policy(SchedPolicy::Randomized { seed })
        .with_input("src", input);
    let execution = session.run_source("probe.nem", SEED_PROGRAM).unwrap();
    execution.read_buffer("dst").unwrap() == expected
}
