//! Numeric backend seam and the reference implementation.
//!
//! The engine never interprets operator semantics; it hands dense tensors
//! to a [`Backend`] and packs whatever comes back. The reference backend
//! implements every stable operator with straightforward arithmetic;
//! bit-true hardware backends substitute through the same trait.

use std::collections::BTreeMap;

use thiserror::Error;

use super::view::{Tensor, TensorData};
use crate::model::{AttrVal, ElemType};

/// Failure reported by a backend for a known operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for BackendError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

pub type BackendResult = Result<(), BackendError>;

/// Pluggable operator implementation.
pub trait Backend {
    fn supports(&self, op: &str) -> bool;

    /// Execute `op`, reading `inputs` and filling `outputs`, which arrive
    /// zeroed with the destination regions' element types and shapes.
    fn execute(
        &mut self,
        op: &str,
        inputs: &[Tensor],
        outputs: &mut [Tensor],
        attrs: &BTreeMap<String, AttrVal>,
    ) -> BackendResult;
}

impl<T: Backend + ?Sized> Backend for &mut T {
    fn supports(&self, op: &str) -> bool {
        (**self).supports(op)
    }

    fn execute(
        &mut self,
        op: &str,
        inputs: &[Tensor],
        outputs: &mut [Tensor],
        attrs: &BTreeMap<String, AttrVal>,
    ) -> BackendResult {
        (**self).execute(op, inputs, outputs, attrs)
    }
}

/// Reference arithmetic for the stable operator set.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceBackend;

impl ReferenceBackend {
    pub fn new() -> Self {
        Self
    }
}

const SUPPORTED: &[&str] = &[
    "gemm",
    "conv2d",
    "eltwise_add",
    "eltwise_mul",
    "eltwise_max",
    "relu",
    "softmax",
    "layernorm",
    "quantize",
    "dequantize",
    "cast",
    "pack4",
    "unpack4",
];

impl Backend for ReferenceBackend {
    fn supports(&self, op: &str) -> bool {
        SUPPORTED.contains(&op)
    }

    fn execute(
        &mut self,
        op: &str,
        inputs: &[Tensor],
        outputs: &mut [Tensor],
        attrs: &BTreeMap<String, AttrVal>,
    ) -> BackendResult {
        match op {
            "gemm" => gemm(inputs, outputs, attrs),
            "conv2d" => conv2d(inputs, outputs, attrs),
            "eltwise_add" => eltwise(inputs, outputs, |a, b| a + b, |a, b| a + b),
            "eltwise_mul" => eltwise(inputs, outputs, |a, b| a * b, |a, b| a * b),
            "eltwise_max" => eltwise(inputs, outputs, f32::max, i64::max),
            "relu" => unary(inputs, outputs, |x| x.max(0.0), |x| x.max(0)),
            "softmax" => softmax(inputs, outputs, attrs),
            "layernorm" => layernorm(inputs, outputs, attrs),
            "quantize" => quantize(inputs, outputs, attrs),
            "dequantize" => dequantize(inputs, outputs, attrs),
            "cast" => cast(inputs, outputs),
            "pack4" | "unpack4" => repack(inputs, outputs),
            other => Err(BackendError::new(format!("unimplemented operator `{other}`"))),
        }
    }
}

// ------------------------------------------------------------- helpers

fn input<'a>(inputs: &'a [Tensor], i: usize, op: &str) -> Result<&'a Tensor, BackendError> {
    inputs
        .get(i)
        .ok_or_else(|| BackendError::new(format!("`{op}` is missing input {i}")))
}

fn floats<'a>(t: &'a Tensor, what: &str) -> Result<&'a [f32], BackendError> {
    t.floats()
        .ok_or_else(|| BackendError::new(format!("{what} must be floating point")))
}

fn ints<'a>(t: &'a Tensor, what: &str) -> Result<&'a [i64], BackendError> {
    t.ints()
        .ok_or_else(|| BackendError::new(format!("{what} must be integer")))
}

fn attr_int(attrs: &BTreeMap<String, AttrVal>, name: &str) -> Result<i64, BackendError> {
    attrs
        .get(name)
        .and_then(AttrVal::as_int)
        .ok_or_else(|| BackendError::new(format!("missing integer attribute `{name}`")))
}

fn attr_float(attrs: &BTreeMap<String, AttrVal>, name: &str) -> Result<f64, BackendError> {
    attrs
        .get(name)
        .and_then(AttrVal::as_float)
        .ok_or_else(|| BackendError::new(format!("missing float attribute `{name}`")))
}

fn attr_bool(attrs: &BTreeMap<String, AttrVal>, name: &str) -> bool {
    attrs.get(name).and_then(AttrVal::as_bool).unwrap_or(false)
}

fn attr_pair(attrs: &BTreeMap<String, AttrVal>, name: &str) -> Result<(i64, i64), BackendError> {
    let list = attrs
        .get(name)
        .and_then(AttrVal::as_int_list)
        .ok_or_else(|| BackendError::new(format!("missing list attribute `{name}`")))?;
    match list {
        [a, b] => Ok((*a, *b)),
        _ => Err(BackendError::new(format!(
            "attribute `{name}` must hold exactly two integers"
        ))),
    }
}

fn resolve_axis(axis: i64, rank: usize) -> Result<usize, BackendError> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    if resolved < 0 || resolved as usize >= rank {
        return Err(BackendError::new(format!(
            "axis {axis} is outside a rank-{rank} tensor"
        )));
    }
    Ok(resolved as usize)
}

/// Inclusive representable range of an integer element type.
fn int_range(elem: ElemType) -> (i64, i64) {
    match elem {
        ElemType::I4 => (-8, 7),
        ElemType::I8 => (i8::MIN as i64, i8::MAX as i64),
        ElemType::I16 => (i16::MIN as i64, i16::MAX as i64),
        ElemType::I32 => (i32::MIN as i64, i32::MAX as i64),
        ElemType::U8 => (0, u8::MAX as i64),
        ElemType::U16 => (0, u16::MAX as i64),
        ElemType::U32 => (0, u32::MAX as i64),
        _ => (i64::MIN, i64::MAX),
    }
}

/// Round half to even, the reference rounding for every float-to-int
/// conversion.
fn round_even(x: f64) -> i64 {
    let floor = x.floor();
    let diff = x - floor;
    let down = floor as i64;
    if diff > 0.5 {
        down + 1
    } else if diff < 0.5 {
        down
    } else if down % 2 == 0 {
        down
    } else {
        down + 1
    }
}

// ------------------------------------------------------------ operators

fn gemm(
    inputs: &[Tensor],
    outputs: &mut [Tensor],
    attrs: &BTreeMap<String, AttrVal>,
) -> BackendResult {
    let a = input(inputs, 0, "gemm")?;
    let b = input(inputs, 1, "gemm")?;
    let bias = inputs.get(2);
    let ta = attr_bool(attrs, "transpose_a");
    let tb = attr_bool(attrs, "transpose_b");

    let (ar, ac) = dims2(a, "gemm input a")?;
    let (br, bc) = dims2(b, "gemm input b")?;
    let (m, k) = if ta { (ac, ar) } else { (ar, ac) };
    let (kb, n) = if tb { (bc, br) } else { (br, bc) };
    if k != kb {
        return Err(BackendError::new(format!(
            "gemm inner dimensions differ: {k} vs {kb}"
        )));
    }
    let out = &mut outputs[0];
    if out.shape != [m, n] {
        return Err(BackendError::new(format!(
            "gemm output shape {:?} does not match [{m}, {n}]",
            out.shape
        )));
    }

    match (&a.data, &b.data) {
        (TensorData::Float(av), TensorData::Float(bv)) => {
            let bias_v = match bias {
                Some(t) => Some(floats(t, "gemm bias")?),
                None => None,
            };
            let out_v = out.floats_mut().expect("float output");
            for i in 0..m {
                for j in 0..n {
                    let mut acc = 0.0f32;
                    for p in 0..k {
                        let x = if ta { av[p * m + i] } else { av[i * k + p] };
                        let y = if tb { bv[j * k + p] } else { bv[p * n + j] };
                        acc = x.mul_add(y, acc);
                    }
                    if let Some(bias_v) = bias_v {
                        acc += bias_v[j % bias_v.len().max(1)];
                    }
                    out_v[i * n + j] = acc;
                }
            }
        }
        (TensorData::Int(av), TensorData::Int(bv)) => {
            let bias_v = match bias {
                Some(t) => Some(ints(t, "gemm bias")?),
                None => None,
            };
            let out_v = out.ints_mut().expect("int output");
            for i in 0..m {
                for j in 0..n {
                    let mut acc = 0i64;
                    for p in 0..k {
                        let x = if ta { av[p * m + i] } else { av[i * k + p] };
                        let y = if tb { bv[j * k + p] } else { bv[p * n + j] };
                        acc += x * y;
                    }
                    if let Some(bias_v) = bias_v {
                        acc += bias_v[j % bias_v.len().max(1)];
                    }
                    out_v[i * n + j] = acc;
                }
            }
        }
        _ => {
            return Err(BackendError::new(
                "gemm inputs must agree on integer or floating point",
            ))
        }
    }
    Ok(())
}

fn dims2(t: &Tensor, what: &str) -> Result<(usize, usize), BackendError> {
    match t.shape.as_slice() {
        [r, c] => Ok((*r, *c)),
        other => Err(BackendError::new(format!(
            "{what} must be two-dimensional, got {other:?}"
        ))),
    }
}

fn conv2d(
    inputs: &[Tensor],
    outputs: &mut [Tensor],
    attrs: &BTreeMap<String, AttrVal>,
) -> BackendResult {
    let x = input(inputs, 0, "conv2d")?;
    let w = input(inputs, 1, "conv2d")?;
    let bias = inputs.get(2);
    let (sh, sw) = attr_pair(attrs, "stride")?;
    let (ph, pw) = attr_pair(attrs, "padding")?;
    if sh < 1 || sw < 1 || ph < 0 || pw < 0 {
        return Err(BackendError::new("conv2d stride/padding out of range"));
    }

    let [n, c, h, wd] = dims4(x, "conv2d input")?;
    let [co, ci, kh, kw] = dims4(w, "conv2d weights")?;
    if ci != c {
        return Err(BackendError::new(format!(
            "conv2d channel mismatch: input has {c}, weights expect {ci}"
        )));
    }
    let ho = (h as i64 + 2 * ph - kh as i64) / sh + 1;
    let wo = (wd as i64 + 2 * pw - kw as i64) / sw + 1;
    if ho < 1 || wo < 1 {
        return Err(BackendError::new("conv2d output would be empty"));
    }
    let (ho, wo) = (ho as usize, wo as usize);
    let out = &mut outputs[0];
    if out.shape != [n, co, ho, wo] {
        return Err(BackendError::new(format!(
            "conv2d output shape {:?} does not match [{n}, {co}, {ho}, {wo}]",
            out.shape
        )));
    }

    // Sliding window, one output point at a time.
    let mut point = |b: usize, o: usize, oy: usize, ox: usize| -> Result<(), BackendError> {
        let y0 = oy as i64 * sh - ph;
        let x0 = ox as i64 * sw - pw;
        match (&x.data, &w.data) {
            (TensorData::Float(xv), TensorData::Float(wv)) => {
                let mut acc = 0.0f32;
                for ic in 0..c {
                    for ky in 0..kh {
                        for kx in 0..kw {
                            let iy = y0 + ky as i64;
                            let ix = x0 + kx as i64;
                            if iy < 0 || ix < 0 || iy >= h as i64 || ix >= wd as i64 {
                                continue;
                            }
                            let xi = ((b * c + ic) * h + iy as usize) * wd + ix as usize;
                            let wi = ((o * c + ic) * kh + ky) * kw + kx;
                            acc = xv[xi].mul_add(wv[wi], acc);
                        }
                    }
                }
                if let Some(bias) = bias {
                    acc += floats(bias, "conv2d bias")?[o];
                }
                let oi = ((b * co + o) * ho + oy) * wo + ox;
                outputs[0].floats_mut().expect("float output")[oi] = acc;
                Ok(())
            }
            (TensorData::Int(xv), TensorData::Int(wv)) => {
                let mut acc = 0i64;
                for ic in 0..c {
                    for ky in 0..kh {
                        for kx in 0..kw {
                            let iy = y0 + ky as i64;
                            let ix = x0 + kx as i64;
                            if iy < 0 || ix < 0 || iy >= h as i64 || ix >= wd as i64 {
                                continue;
                            }
                            let xi = ((b * c + ic) * h + iy as usize) * wd + ix as usize;
                            let wi = ((o * c + ic) * kh + ky) * kw + kx;
                            acc += xv[xi] * wv[wi];
                        }
                    }
                }
                if let Some(bias) = bias {
                    acc += ints(bias, "conv2d bias")?[o];
                }
                let oi = ((b * co + o) * ho + oy) * wo + ox;
                outputs[0].ints_mut().expect("int output")[oi] = acc;
                Ok(())
            }
            _ => Err(BackendError::new(
                "conv2d inputs must agree on integer or floating point",
            )),
        }
    };
    for b in 0..n {
        for o in 0..co {
            for oy in 0..ho {
                for ox in 0..wo {
                    point(b, o, oy, ox)?;
                }
            }
        }
    }
    Ok(())
}

fn dims4(t: &Tensor, what: &str) -> Result<[usize; 4], BackendError> {
    match t.shape.as_slice() {
        [a, b, c, d] => Ok([*a, *b, *c, *d]),
        other => Err(BackendError::new(format!(
            "{what} must be four-dimensional, got {other:?}"
        ))),
    }
}

fn eltwise(
    inputs: &[Tensor],
    outputs: &mut [Tensor],
    ff: impl Fn(f32, f32) -> f32,
    fi: impl Fn(i64, i64) -> i64,
) -> BackendResult {
    let a = input(inputs, 0, "eltwise")?;
    let b = input(inputs, 1, "eltwise")?;
    if a.shape != b.shape {
        return Err(BackendError::new(format!(
            "elementwise shapes differ: {:?} vs {:?}",
            a.shape, b.shape
        )));
    }
    let out = &mut outputs[0];
    match (&a.data, &b.data, &mut out.data) {
        (TensorData::Float(av), TensorData::Float(bv), TensorData::Float(ov)) => {
            for (o, (x, y)) in ov.iter_mut().zip(av.iter().zip(bv)) {
                *o = ff(*x, *y);
            }
        }
        (TensorData::Int(av), TensorData::Int(bv), TensorData::Int(ov)) => {
            for (o, (x, y)) in ov.iter_mut().zip(av.iter().zip(bv)) {
                *o = fi(*x, *y);
            }
        }
        _ => {
            return Err(BackendError::new(
                "elementwise operands must agree on integer or floating point",
            ))
        }
    }
    Ok(())
}

fn unary(
    inputs: &[Tensor],
    outputs: &mut [Tensor],
    ff: impl Fn(f32) -> f32,
    fi: impl Fn(i64) -> i64,
) -> BackendResult {
    let a = input(inputs, 0, "unary")?;
    let out = &mut outputs[0];
    match (&a.data, &mut out.data) {
        (TensorData::Float(av), TensorData::Float(ov)) => {
            for (o, x) in ov.iter_mut().zip(av) {
                *o = ff(*x);
            }
        }
        (TensorData::Int(av), TensorData::Int(ov)) => {
            for (o, x) in ov.iter_mut().zip(av) {
                *o = fi(*x);
            }
        }
        _ => {
            return Err(BackendError::new(
                "unary operand and result must agree on integer or floating point",
            ))
        }
    }
    Ok(())
}

/// Shift by the axis maximum, exponentiate, normalize.
fn softmax(
    inputs: &[Tensor],
    outputs: &mut [Tensor],
    attrs: &BTreeMap<String, AttrVal>,
) -> BackendResult {
    let x = input(inputs, 0, "softmax")?;
    let axis = resolve_axis(attr_int(attrs, "axis")?, x.shape.len())?;
    let xv = floats(x, "softmax input")?;
    let shape = x.shape.clone();

    let axis_len = shape[axis];
    let inner: usize = shape[axis + 1..].iter().product();
    let outer: usize = shape[..axis].iter().product();
    let ov = outputs[0]
        .floats_mut()
        .ok_or_else(|| BackendError::new("softmax output must be floating point"))?;

    for o in 0..outer {
        for i in 0..inner {
            let idx = |j: usize| (o * axis_len + j) * inner + i;
            let mut max = f32::NEG_INFINITY;
            for j in 0..axis_len {
                max = max.max(xv[idx(j)]);
            }
            let mut sum = 0.0f32;
            for j in 0..axis_len {
                let e = (xv[idx(j)] - max).exp();
                ov[idx(j)] = e;
                sum += e;
            }
            for j in 0..axis_len {
                ov[idx(j)] /= sum;
            }
        }
    }
    Ok(())
}

/// Normalize over one axis with per-slice statistics, then scale/shift.
fn layernorm(
    inputs: &[Tensor],
    outputs: &mut [Tensor],
    attrs: &BTreeMap<String, AttrVal>,
) -> BackendResult {
    let x = input(inputs, 0, "layernorm")?;
    let gamma = inputs.get(1);
    let beta = inputs.get(2);
    let axis = resolve_axis(attr_int(attrs, "axis")?, x.shape.len())?;
    let epsilon = attr_float(attrs, "epsilon")? as f32;
    let xv = floats(x, "layernorm input")?;
    let shape = x.shape.clone();

    let axis_len = shape[axis];
    let inner: usize = shape[axis + 1..].iter().product();
    let outer: usize = shape[..axis].iter().product();
    let gv = match gamma {
        Some(t) => Some(floats(t, "layernorm gamma")?),
        None => None,
    };
    let bv = match beta {
        Some(t) => Some(floats(t, "layernorm beta")?),
        None => None,
    };
    let ov = outputs[0]
        .floats_mut()
        .ok_or_else(|| BackendError::new("layernorm output must be floating point"))?;

    for o in 0..outer {
        for i in 0..inner {
            let idx = |j: usize| (o * axis_len + j) * inner + i;
            let mut mean = 0.0f32;
            for j in 0..axis_len {
                mean += xv[idx(j)];
            }
            mean /= axis_len as f32;
            let mut var = 0.0f32;
            for j in 0..axis_len {
                let d = xv[idx(j)] - mean;
                var = d.mul_add(d, var);
            }
            var /= axis_len as f32;
            let inv = (var + epsilon).sqrt().recip();
            for j in 0..axis_len {
                let mut v = (xv[idx(j)] - mean) * inv;
                if let Some(gv) = gv {
                    v *= gv[j % gv.len().max(1)];
                }
                if let Some(bv) = bv {
                    v += bv[j % bv.len().max(1)];
                }
                ov[idx(j)] = v;
            }
        }
    }
    Ok(())
}

/// `y = clamp(round(x / scale) + zero_point)` into the output range.
fn quantize(
    inputs: &[Tensor],
    outputs: &mut [Tensor],
    attrs: &BTreeMap<String, AttrVal>,
) -> BackendResult {
    let x = input(inputs, 0, "quantize")?;
    let scale = attr_float(attrs, "scale")?;
    let zero_point = attr_int(attrs, "zero_point")?;
    if scale == 0.0 {
        return Err(BackendError::new("quantize scale must be non-zero"));
    }
    let xv = floats(x, "quantize input")?;
    let (lo, hi) = int_range(outputs[0].elem);
    let ov = outputs[0]
        .ints_mut()
        .ok_or_else(|| BackendError::new("quantize output must be integer"))?;
    for (o, v) in ov.iter_mut().zip(xv) {
        *o = (round_even(*v as f64 / scale) + zero_point).clamp(lo, hi);
    }
    Ok(())
}

/// `y = (x - zero_point) * scale`.
fn dequantize(
    inputs: &[Tensor],
    outputs: &mut [Tensor],
    attrs: &BTreeMap<String, AttrVal>,
) -> BackendResult {
    let x = input(inputs, 0, "dequantize")?;
    let scale = attr_float(attrs, "scale")?;
    let zero_point = attr_int(attrs, "zero_point")?;
    let xv = ints(x, "dequantize input")?;
    let ov = outputs[0]
        .floats_mut()
        .ok_or_else(|| BackendError::new("dequantize output must be floating point"))?;
    for (o, v) in ov.iter_mut().zip(xv) {
        *o = ((v - zero_point) as f64 * scale) as f32;
    }
    Ok(())
}

/// Numeric conversion. Integer targets saturate; float targets round at
/// the view boundary.
fn cast(inputs: &[Tensor], outputs: &mut [Tensor]) -> BackendResult {
    let x = input(inputs, 0, "cast")?;
    if x.len() != outputs[0].len() {
        return Err(BackendError::new("cast element counts differ"));
    }
    let (lo, hi) = int_range(outputs[0].elem);
    match (&x.data, &mut outputs[0].data) {
        (TensorData::Int(xv), TensorData::Int(ov)) => {
            for (o, v) in ov.iter_mut().zip(xv) {
                *o = (*v).clamp(lo, hi);
            }
        }
        (TensorData::Int(xv), TensorData::Float(ov)) => {
            for (o, v) in ov.iter_mut().zip(xv) {
                *o = *v as f32;
            }
        }
        (TensorData::Float(xv), TensorData::Int(ov)) => {
            for (o, v) in ov.iter_mut().zip(xv) {
                *o = round_even(*v as f64).clamp(lo, hi);
            }
        }
        (TensorData::Float(xv), TensorData::Float(ov)) => {
            ov.copy_from_slice(xv);
        }
    }
    Ok(())
}

/// `pack4`/`unpack4`: value-preserving move between byte-wide and
/// nibble-packed integers, saturating into the 4-bit range on pack.
fn repack(inputs: &[Tensor], outputs: &mut [Tensor]) -> BackendResult {
    let x = input(inputs, 0, "repack")?;
    let xv = ints(x, "pack input")?;
    let (lo, hi) = int_range(outputs[0].elem);
    let ov = outputs[0]
        .ints_mut()
        .ok_or_else(|| BackendError::new("pack output must be integer"))?;
    if xv.len() != ov.len() {
        return Err(BackendError::new("pack element counts differ"));
    }
    for (o, v) in ov.iter_mut().zip(xv) {
        *o = (*v).clamp(lo, hi);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor_f(shape: &[usize], data: Vec<f32>) -> Tensor {
        Tensor {
            elem: ElemType::F32,
            shape: shape.to_vec(),
            data: TensorData::Float(data),
        }
    }

    fn tensor_i(elem: ElemType, shape: &[usize], data: Vec<i64>) -> Tensor {
        Tensor {
            elem,
            shape: shape.to_vec(),
            data: TensorData::Int(data),
        }
    }

    #[test]
    fn gemm_small_matrix() {
        let a = tensor_f(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let b = tensor_f(&[2, 2], vec![5.0, 6.0, 7.0, 8.0]);
        let mut out = vec![Tensor::zeros(ElemType::F32, vec![2, 2])];
        let mut attrs = BTreeMap::new();
        attrs.insert("transpose_a".into(), AttrVal::Bool(false));
        attrs.insert("transpose_b".into(), AttrVal::Bool(false));
        ReferenceBackend::new()
            .execute("gemm", &[a, b], &mut out, &attrs)
            .unwrap();
        assert_eq!(out[0].floats().unwrap(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn gemm_transpose_b() {
        let a = tensor_f(&[1, 2], vec![1.0, 2.0]);
        // b stored as (N, K) = (2, 2)
        let b = tensor_f(&[2, 2], vec![5.0, 7.0, 6.0, 8.0]);
        let mut out = vec![Tensor::zeros(ElemType::F32, vec![1, 2])];
        let mut attrs = BTreeMap::new();
        attrs.insert("transpose_b".into(), AttrVal::Bool(true));
        ReferenceBackend::new()
            .execute("gemm", &[a, b], &mut out, &attrs)
            .unwrap();
        assert_eq!(out[0].floats().unwrap(), &[19.0, 22.0]);
    }

    #[test]
    fn int_gemm_accumulates_exactly() {
        let a = tensor_i(ElemType::I8, &[1, 3], vec![1, -2, 3]);
        let b = tensor_i(ElemType::I8, &[3, 1], vec![4, 5, -6]);
        let mut out = vec![Tensor::zeros(ElemType::I32, vec![1, 1])];
        ReferenceBackend::new()
            .execute("gemm", &[a, b], &mut out, &BTreeMap::new())
            .unwrap();
        assert_eq!(out[0].ints().unwrap(), &[-24]);
    }

    #[test]
    fn conv2d_identity_kernel() {
        let x = tensor_f(&[1, 1, 3, 3], (1..=9).map(|v| v as f32).collect());
        let w = tensor_f(&[1, 1, 1, 1], vec![1.0]);
        let mut out = vec![Tensor::zeros(ElemType::F32, vec![1, 1, 3, 3])];
        let mut attrs = BTreeMap::new();
        attrs.insert("stride".into(), AttrVal::IntList(vec![1, 1]));
        attrs.insert("padding".into(), AttrVal::IntList(vec![0, 0]));
        ReferenceBackend::new()
            .execute("conv2d", &[x.clone(), w], &mut out, &attrs)
            .unwrap();
        assert_eq!(out[0].floats().unwrap(), x.floats().unwrap());
    }

    #[test]
    fn conv2d_sliding_sum() {
        let x = tensor_f(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let w = tensor_f(&[1, 1, 2, 2], vec![1.0, 1.0, 1.0, 1.0]);
        let mut out = vec![Tensor::zeros(ElemType::F32, vec![1, 1, 1, 1])];
        let mut attrs = BTreeMap::new();
        attrs.insert("stride".into(), AttrVal::IntList(vec![1, 1]));
        attrs.insert("padding".into(), AttrVal::IntList(vec![0, 0]));
        ReferenceBackend::new()
            .execute("conv2d", &[x, w], &mut out, &attrs)
            .unwrap();
        assert_eq!(out[0].floats().unwrap(), &[10.0]);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let x = tensor_f(&[2, 3], vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);
        let mut out = vec![Tensor::zeros(ElemType::F32, vec![2, 3])];
        let mut attrs = BTreeMap::new();
        attrs.insert("axis".into(), AttrVal::Int(-1));
        ReferenceBackend::new()
            .execute("softmax", &[x], &mut out, &attrs)
            .unwrap();
        let ov = out[0].floats().unwrap();
        let row0: f32 = ov[..3].iter().sum();
        assert!((row0 - 1.0).abs() < 1e-6);
        assert_eq!(&ov[3..], &[1.0 / 3.0; 3]);
        assert!(ov[0] < ov[1] && ov[1] < ov[2]);
    }

    #[test]
    fn quantize_round_half_even_and_clamp() {
        let x = tensor_f(&[5], vec![0.5, 1.5, 2.5, 300.0, -300.0]);
        let mut out = vec![Tensor::zeros(ElemType::I8, vec![5])];
        let mut attrs = BTreeMap::new();
        attrs.insert("scale".into(), AttrVal::Float(1.0));
        attrs.insert("zero_point".into(), AttrVal::Int(0));
        ReferenceBackend::new()
            .execute("quantize", &[x], &mut out, &attrs)
            .unwrap();
        assert_eq!(out[0].ints().unwrap(), &[0, 2, 2, 127, -128]);
    }

    #[test]
    fn pack4_saturates() {
        let x = tensor_i(ElemType::I8, &[4], vec![-100, -8, 7, 100]);
        let mut out = vec![Tensor::zeros(ElemType::I4, vec![4])];
        ReferenceBackend::new()
            .execute("pack4", &[x], &mut out, &BTreeMap::new())
            .unwrap();
        assert_eq!(out[0].ints().unwrap(), &[-8, -8, 7, 7]);
    }

    #[test]
    fn unsupported_operator_is_reported() {
        assert!(!ReferenceBackend::new().supports("fft"));
    }
}
