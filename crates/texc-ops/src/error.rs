//! Lowering errors.
//!
//! These are hard failures: the operator cannot be lowered at all. A
//! convolution that is merely outside the depthwise fast path is not an
//! error; see [`crate::Unsupported`].

use texc_ir::IrError;
use texc_loop_nest::LoopNestError;
use thiserror::Error;

/// Errors that abort the lowering of an operator.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LowerError {
    /// The operand list is shorter than the operator requires.
    #[error("missing operand {index}")]
    MissingOperand {
        /// Position of the missing operand.
        index: usize,
    },

    /// An operand has the wrong kind.
    #[error("expected {expected} argument, found {found}")]
    BadArgument {
        /// The accepted kind(s).
        expected: &'static str,
        /// The kind actually passed.
        found: &'static str,
    },

    /// A buffer that must be statically shaped has a symbolic dimension.
    #[error("dimension {dim} of `{buf}` is not a compile-time constant")]
    NonConstantDim {
        /// Buffer name.
        buf: String,
        /// Offending dimension.
        dim: usize,
    },

    /// A buffer has the wrong rank.
    #[error("`{buf}` must have rank {expected}, found {got}")]
    RankMismatch {
        /// Buffer name.
        buf: String,
        /// Required rank.
        expected: usize,
        /// Actual rank.
        got: usize,
    },

    /// Channel counts do not describe a depthwise convolution.
    #[error(
        "not a depthwise convolution: {channels} input channels, {out_channels} output \
         channels, {channels_per_group} channels per group, {groups} groups"
    )]
    NotDepthwise {
        /// Input channels.
        channels: i64,
        /// Output channels.
        out_channels: i64,
        /// Weight channels per group.
        channels_per_group: i64,
        /// Group count.
        groups: i64,
    },

    /// The kernel is not square.
    #[error("kernel must be square, found {height}x{width}")]
    NonSquareKernel {
        /// Kernel height.
        height: i64,
        /// Kernel width.
        width: i64,
    },

    /// Stride must be positive.
    #[error("invalid stride {stride}")]
    InvalidStride {
        /// The offending stride.
        stride: i64,
    },

    /// A boundary peel left no interior loop to continue with.
    #[error("cannot peel the {dim} loop: too few iterations")]
    Peel {
        /// `"height"` or `"width"`.
        dim: &'static str,
    },

    /// Building IR failed.
    #[error(transparent)]
    Ir(IrError),

    /// A loop transformation failed.
    #[error(transparent)]
    LoopNest(#[from] LoopNestError),
}

impl From<IrError> for LowerError {
    fn from(err: IrError) -> Self {
        match err {
            IrError::NonConstantDim { buf, dim } => Self::NonConstantDim { buf, dim },
            other => Self::Ir(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use texc_ir::{Buf, DType, Expr, Var};

    #[test]
    fn test_non_constant_dim_is_lifted() {
        let n = Var::int("N");
        let buf = Buf::new("input", [n.expr(), Expr::int(3)], DType::Float32);
        let err: LowerError = buf.require_static().unwrap_err().into();
        assert_eq!(
            err,
            LowerError::NonConstantDim {
                buf: "input".to_string(),
                dim: 0
            }
        );
        assert_eq!(
            err.to_string(),
            "dimension 0 of `input` is not a compile-time constant"
        );
    }

    #[test]
    fn test_loop_nest_error_wraps() {
        let err: LowerError = LoopNestError::InvalidFactor { factor: 0 }.into();
        assert_eq!(err.to_string(), "invalid slice factor 0");
    }
}
