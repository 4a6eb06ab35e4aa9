//! Depthwise conv2d as a boundary-masked reduction.
//!
//! For each output coordinate the reduction sums over `(c, r, s)`:
//!
//! ```text
//! ih = oh * stride - pad + r
//! iw = ow * stride - pad + s
//! out[n, k, oh, ow] = init + sum (inside(ih, iw) ? input[n, k, ih, iw] : 0) * weight[k, c, r, s]
//! ```
//!
//! Zero padding is never materialized: the input load sits behind a lazy
//! conditional so that out-of-range coordinates are never read. Loops are
//! nested `n, k, oh, ow, c, r, s`.

use texc_ir::{reduce, Buf, CmpOp, DimArg, Expr, Reducer, Tensor, Var};
use texc_loop_nest::LoopNest;
use tracing::{debug, trace};

use crate::{peel_depthwise_boundaries, LowerConfig, LowerError};

/// Name of the buffer produced by the depthwise lowering.
pub const DEPTHWISE_BUF: &str = "conv2d_depthwise";

/// Convolution sizes as expressions, for inputs whose shapes are only known
/// at run time.
#[derive(Clone, Debug, PartialEq)]
pub struct DynamicConvShape {
    /// Batch size.
    pub n: Expr,
    /// Input channels.
    pub c: Expr,
    /// Input height.
    pub h: Expr,
    /// Input width.
    pub w: Expr,
    /// Output channels.
    pub k: Expr,
    /// Weight channels per group.
    pub channels_per_group: Expr,
    /// Kernel height.
    pub r: Expr,
    /// Kernel width.
    pub s: Expr,
    /// Stride, both axes.
    pub stride: Expr,
    /// Padding, both axes.
    pub pad: Expr,
    /// Group count.
    pub groups: Expr,
}

impl DynamicConvShape {
    /// Reads the sizes off the dimensions of `input` and `weight`.
    pub fn from_buffers(
        input: &Buf,
        weight: &Buf,
        stride: impl Into<Expr>,
        pad: impl Into<Expr>,
        groups: impl Into<Expr>,
    ) -> Result<Self, LowerError> {
        expect_rank(input, 4)?;
        expect_rank(weight, 4)?;
        Ok(Self {
            n: input.dim(0).clone(),
            c: input.dim(1).clone(),
            h: input.dim(2).clone(),
            w: input.dim(3).clone(),
            k: weight.dim(0).clone(),
            channels_per_group: weight.dim(1).clone(),
            r: weight.dim(2).clone(),
            s: weight.dim(3).clone(),
            stride: stride.into(),
            pad: pad.into(),
            groups: groups.into(),
        })
    }

    fn output_extent(&self, size: &Expr, kernel: &Expr) -> Expr {
        (size.clone() - kernel + self.pad.clone() * 2) / &self.stride + 1
    }
}

/// Lowers a depthwise convolution over statically shaped buffers.
///
/// Every dimension of `input`, `weight` and `bias` must be a constant, the
/// channel counts must satisfy `C == K == groups` with one channel per group,
/// and the kernel must be square. When peeling is enabled the border
/// iterations of 3x3 kernels with padding 1 and stride 1 or 2 are split off
/// the spatial loops.
pub fn conv2d_depthwise_static(
    input: &Buf,
    weight: &Buf,
    bias: Option<&Buf>,
    stride: i64,
    pad: i64,
    groups: i64,
    config: &LowerConfig,
) -> Result<Tensor, LowerError> {
    expect_rank(input, 4)?;
    expect_rank(weight, 4)?;
    let [n, c, h, w] = static_dims4(input)?;
    let [k, cper_g, r, s] = static_dims4(weight)?;
    if let Some(bias) = bias {
        expect_rank(bias, 1)?;
        bias.require_static()?;
    }

    if c != k || k != groups || cper_g != 1 {
        return Err(LowerError::NotDepthwise {
            channels: c,
            out_channels: k,
            channels_per_group: cper_g,
            groups,
        });
    }
    if r != s {
        return Err(LowerError::NonSquareKernel {
            height: r,
            width: s,
        });
    }
    if stride <= 0 {
        return Err(LowerError::InvalidStride { stride });
    }

    let shape = DynamicConvShape {
        n: n.into(),
        c: c.into(),
        h: h.into(),
        w: w.into(),
        k: k.into(),
        channels_per_group: cper_g.into(),
        r: r.into(),
        s: s.into(),
        stride: stride.into(),
        pad: pad.into(),
        groups: groups.into(),
    };
    let Tensor { buf, stmt } = build(input, weight, bias, &shape);
    debug!(
        n,
        channels = c,
        h,
        w,
        kernel = r,
        stride,
        pad,
        out = %buf,
        "built static depthwise reduction"
    );

    let stmt = if config.enable_loop_peeling {
        let mut nest = LoopNest::new(stmt);
        let pattern = peel_depthwise_boundaries(&mut nest, &buf, r, stride, pad)?;
        debug!(?pattern, "peeled depthwise boundaries");
        nest.into_stmt()
    } else {
        stmt
    };

    let tensor = Tensor::new(buf, stmt);
    trace!(ir = %tensor, "lowered depthwise conv2d");
    Ok(tensor)
}

/// Lowers a depthwise convolution whose sizes are expressions.
///
/// No loop peeling is applied. A bias, if given, must still be statically
/// shaped.
pub fn conv2d_depthwise_dynamic(
    input: &Buf,
    weight: &Buf,
    bias: Option<&Buf>,
    shape: &DynamicConvShape,
) -> Result<Tensor, LowerError> {
    expect_rank(input, 4)?;
    expect_rank(weight, 4)?;
    if let Some(bias) = bias {
        expect_rank(bias, 1)?;
        bias.require_static()?;
    }

    let tensor = build(input, weight, bias, shape);
    debug!(out = %tensor.buf, "built dynamic depthwise reduction");
    trace!(ir = %tensor, "lowered depthwise conv2d");
    Ok(tensor)
}

fn build(input: &Buf, weight: &Buf, bias: Option<&Buf>, shape: &DynamicConvShape) -> Tensor {
    let dims = [
        DimArg::new(shape.n.clone(), "n"),
        DimArg::new(shape.k.clone(), "k"),
        DimArg::new(shape.output_extent(&shape.h, &shape.r), "oh"),
        DimArg::new(shape.output_extent(&shape.w, &shape.s), "ow"),
    ];
    let reduce_dims = [
        DimArg::new(shape.c.clone() / &shape.groups, "c"),
        DimArg::new(shape.r.clone(), "r"),
        DimArg::new(shape.s.clone(), "s"),
    ];
    let acc_dtype = input.dtype.promote(weight.dtype);

    reduce(
        DEPTHWISE_BUF,
        &dims,
        Reducer::Sum,
        |v: &[Var]| match bias {
            Some(bias) => bias.load([v[1].expr()]),
            None => Reducer::Sum.initializer(acc_dtype),
        },
        |v: &[Var]| {
            let (n, k, oh, ow) = (&v[0], &v[1], &v[2], &v[3]);
            let (c, r, s) = (&v[4], &v[5], &v[6]);
            let ih = oh * &shape.stride - &shape.pad + r;
            let iw = ow * &shape.stride - &shape.pad + s;

            let mark = |op: CmpOp, lhs: &Expr, rhs: &Expr, rest: Expr| {
                Expr::compare_select(op, lhs.clone(), rhs.clone(), Expr::int(1), rest)
            };
            let zero = Expr::int(0);
            let mut outside = mark(CmpOp::Lt, &ih, &zero, Expr::int(0));
            outside = mark(CmpOp::Lt, &iw, &zero, outside);
            outside = mark(CmpOp::Ge, &ih, &shape.h, outside);
            outside = mark(CmpOp::Ge, &iw, &shape.w, outside);

            let value = Expr::if_then_else(
                outside,
                Expr::float(0.0),
                input.load([n.expr(), k.expr(), ih, iw]),
            );
            value * weight.load([k, c, r, s])
        },
        &reduce_dims,
    )
}

fn expect_rank(buf: &Buf, expected: usize) -> Result<(), LowerError> {
    if buf.rank() == expected {
        Ok(())
    } else {
        Err(LowerError::RankMismatch {
            buf: buf.name.clone(),
            expected,
            got: buf.rank(),
        })
    }
}

fn static_dims4(buf: &Buf) -> Result<[i64; 4], LowerError> {
    let dims = buf.require_static()?;
    <[i64; 4]>::try_from(dims).map_err(|dims| LowerError::RankMismatch {
        buf: buf.name.clone(),
        expected: 4,
        got: dims.len(),
    })
}
