//! Pass 4: region validation, plus the shared region elaboration used by
//! later passes and the execution engine.

use super::{eval_report, iter_combos, ProgramIndex, SideTables};
use crate::ast::{LayoutSpec, QuantSpec, RegionExpr};
use crate::diag::{Collector, Diagnostic, Span};
use crate::model::{ElemType, Env};

/// Quantization descriptor of a region, axes resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantDesc {
    PerTensor,
    PerChannel { axis: usize },
    PerGroup { axis: usize, group: u64 },
}

/// One region with every expression evaluated under a concrete
/// environment.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionShape {
    /// Byte offset within the buffer.
    pub offset: u64,
    /// Byte extent within the buffer.
    pub extent: u64,
    pub elem: Option<ElemType>,
    pub shape: Vec<u64>,
    /// Per-dimension strides in elements; empty when no shape is given.
    pub strides: Vec<u64>,
    pub quant: Option<QuantDesc>,
}

impl RegionShape {
    pub fn element_count(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Minimal packed byte size of the element grid.
    pub fn packed_bytes(&self) -> Option<u64> {
        self.elem.map(|e| e.byte_extent(self.element_count()))
    }

    /// Highest element index reachable through the strides, exclusive.
    pub fn reach_elements(&self) -> u64 {
        if self.shape.is_empty() {
            return 0;
        }
        let mut last = 0u64;
        for (dim, stride) in self.shape.iter().zip(&self.strides) {
            last += (dim - 1) * stride;
        }
        last + 1
    }
}

/// Failure elaborating one region under one environment.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionError {
    pub message: String,
    pub span: Span,
}

impl RegionError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    pub fn into_diag(self) -> Diagnostic {
        Diagnostic::error(self.message).with_span(self.span)
    }
}

/// Evaluate a region expression under `env` and check its internal
/// consistency. Bounds against the owning buffer are the caller's
/// concern.
pub(crate) fn elaborate(region: &RegionExpr, env: &Env) -> Result<RegionShape, RegionError> {
    let eval = |expr: &crate::model::Expr| {
        expr.eval(env)
            .map_err(|e| RegionError::new(e.to_string(), e.span()))
    };

    let offset = eval(&region.offset)?;
    if offset < 0 {
        return Err(RegionError::new(
            format!("region byte offset {offset} is negative"),
            region.offset.span(),
        ));
    }
    let extent = eval(&region.extent)?;
    if extent <= 0 {
        return Err(RegionError::new(
            format!("region byte extent {extent} is not positive"),
            region.extent.span(),
        ));
    }
    let offset = offset as u64;
    let extent = extent as u64;

    let elem = region.attrs.elem.as_ref().map(|e| e.ty);

    let mut shape = Vec::new();
    if let Some(dims) = &region.attrs.shape {
        for dim in dims {
            let value = eval(dim)?;
            if value <= 0 {
                return Err(RegionError::new(
                    format!("shape dimension {value} is not positive"),
                    dim.span(),
                ));
            }
            shape.push(value as u64);
        }
    }

    let strides = match &region.attrs.layout {
        None => row_major(&shape),
        Some(LayoutSpec::Named { name, span }) => match name.as_str() {
            "row_major" => row_major(&shape),
            "col_major" => col_major(&shape),
            other => {
                return Err(RegionError::new(
                    format!("unknown layout `{other}`"),
                    *span,
                ))
            }
        },
        Some(LayoutSpec::Strides(exprs)) => {
            if exprs.len() != shape.len() {
                return Err(RegionError::new(
                    format!(
                        "{} stride(s) for a {}-dimensional shape",
                        exprs.len(),
                        shape.len()
                    ),
                    region.span,
                ));
            }
            let mut strides = Vec::with_capacity(exprs.len());
            for expr in exprs {
                let value = eval(expr)?;
                if value <= 0 {
                    return Err(RegionError::new(
                        format!("stride {value} is not positive"),
                        expr.span(),
                    ));
                }
                strides.push(value as u64);
            }
            strides
        }
    };

    let quant = match &region.attrs.quant {
        None => None,
        Some(QuantSpec::PerTensor { .. }) => Some(QuantDesc::PerTensor),
        Some(QuantSpec::PerChannel { axis, span }) => {
            let axis = check_axis(eval(axis)?, &shape, *span)?;
            Some(QuantDesc::PerChannel { axis })
        }
        Some(QuantSpec::PerGroup { axis, group, span }) => {
            let axis_idx = check_axis(eval(axis)?, &shape, *span)?;
            let group_size = eval(group)?;
            if group_size <= 0 {
                return Err(RegionError::new(
                    format!("quantization group size {group_size} is not positive"),
                    *span,
                ));
            }
            let group_size = group_size as u64;
            if shape[axis_idx] % group_size != 0 {
                return Err(RegionError::new(
                    format!(
                        "group size {group_size} does not divide axis extent {}",
                        shape[axis_idx]
                    ),
                    *span,
                ));
            }
            Some(QuantDesc::PerGroup {
                axis: axis_idx,
                group: group_size,
            })
        }
    };

    let out = RegionShape {
        offset,
        extent,
        elem,
        shape,
        strides,
        quant,
    };

    if let (Some(elem), false) = (elem, out.shape.is_empty()) {
        let needed = elem.byte_extent(out.element_count());
        if out.extent < needed {
            return Err(RegionError::new(
                format!(
                    "region byte extent {} is smaller than the {needed} bytes its {} packed elements need",
                    out.extent,
                    out.element_count()
                ),
                region.extent.span(),
            ));
        }
        let reach = elem.byte_extent(out.reach_elements());
        if reach > out.extent {
            return Err(RegionError::new(
                format!(
                    "declared strides reach {reach} bytes, beyond the region's {}-byte extent",
                    out.extent
                ),
                region.span,
            ));
        }
    }

    Ok(out)
}

fn check_axis(axis: i64, shape: &[u64], span: Span) -> Result<usize, RegionError> {
    if axis < 0 || axis as usize >= shape.len() {
        return Err(RegionError::new(
            format!(
                "quantization axis {axis} is outside the {}-dimensional shape",
                shape.len()
            ),
            span,
        ));
    }
    Ok(axis as usize)
}

fn row_major(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

fn col_major(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for d in 1..shape.len() {
        strides[d] = strides[d - 1] * shape[d - 1];
    }
    strides
}

pub(super) fn run(index: &ProgramIndex<'_>, tables: &SideTables, collector: &mut Collector) {
    let base = tables.const_env();

    for ctx in &index.regions {
        let Some(buffer_id) = tables.region_buffer.get(&ctx.expr.id) else {
            continue;
        };
        let buffer = index.buffer_by_id[buffer_id];
        let loops = index.loop_chain(&ctx.loops);
        let combos = iter_combos(&loops, &base, collector);

        for env in &combos {
            let shape = match elaborate(ctx.expr, env) {
                Ok(shape) => shape,
                Err(e) => {
                    collector.emit(e.into_diag());
                    break;
                }
            };
            let Some(buffer_size) = eval_report(&buffer.size, env, collector) else {
                break;
            };
            if shape.offset + shape.extent > buffer_size.max(0) as u64 {
                collector.emit(
                    Diagnostic::error(format!(
                        "region [{}, {}) extends beyond buffer `{}` of {buffer_size} bytes",
                        shape.offset,
                        shape.offset + shape.extent,
                        buffer.name.name
                    ))
                    .with_span(ctx.expr.span),
                );
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_strides_decrease() {
        assert_eq!(row_major(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(col_major(&[2, 3, 4]), vec![1, 2, 6]);
        assert_eq!(row_major(&[]), Vec::<u64>::new());
    }
}
