//! Feasibility oracle for the depthwise conv2d lowering.
//!
//! The depthwise path handles float32 convolutions with one input channel per
//! group, a 3x3 kernel, symmetric stride and padding, and no dilation.
//! Everything else goes to the external kernel.

use texc_ir::DType;
use thiserror::Error;

use crate::TensorInfo;

/// Why a convolution is outside the depthwise fast path.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Unsupported {
    /// Some operand is not float32.
    #[error("only float32 allowed")]
    DType,
    /// Input or weight is not 4-d, or bias is not 1-d.
    #[error("inputs are the wrong size")]
    Rank,
    /// Channel counts are not those of a depthwise convolution.
    #[error("not depthwise")]
    NotDepthwise,
    /// The kernel is not 3x3.
    #[error("not 3x3")]
    KernelSize,
    /// Vertical and horizontal strides differ.
    #[error("unsupported stride")]
    Stride,
    /// Vertical and horizontal paddings differ.
    #[error("unsupported pad")]
    Padding,
    /// Dilation other than 1.
    #[error("unsupported dilation")]
    Dilation,
    /// An operand shape is not known at compile time.
    #[error("operand `{operand}` has a symbolic shape")]
    SymbolicShape {
        /// Operand name.
        operand: String,
    },
    /// The depthwise lowering is switched off.
    #[error("depthwise lowering disabled")]
    Disabled,
}

/// Checks whether a convolution can take the depthwise path.
///
/// Checks run in a fixed order and the first failing one is reported.
pub fn check_conv2d_support(
    input: &TensorInfo,
    weight: &TensorInfo,
    bias: &TensorInfo,
    stride: [i64; 2],
    pad: [i64; 2],
    dilation: [i64; 2],
    groups: i64,
) -> Result<(), Unsupported> {
    if [input, weight, bias].iter().any(|t| t.dtype != DType::Float32) {
        return Err(Unsupported::DType);
    }
    if input.dims.len() != 4 || weight.dims.len() != 4 || bias.dims.len() != 1 {
        return Err(Unsupported::Rank);
    }

    let cin = input.dims[1];
    let cout = weight.dims[0];
    let cper_g = weight.dims[1];
    if cin != cout || cin != groups || cper_g != 1 {
        return Err(Unsupported::NotDepthwise);
    }
    if weight.dims[2] != 3 || weight.dims[3] != 3 {
        return Err(Unsupported::KernelSize);
    }
    if stride[0] != stride[1] {
        return Err(Unsupported::Stride);
    }
    if pad[0] != pad[1] {
        return Err(Unsupported::Padding);
    }
    if dilation != [1, 1] {
        return Err(Unsupported::Dilation);
    }
    Ok(())
}

/// Returns true if the convolution can take the depthwise path.
///
/// This is the descriptor form, for callers such as graph rewriters that
/// hold shapes rather than operands. [`is_depthwise_conv2d_supported`]
/// answers the same question for raw dispatcher operands.
///
/// [`is_depthwise_conv2d_supported`]: crate::is_depthwise_conv2d_supported
#[must_use]
pub fn conv2d_is_supported(
    input: &TensorInfo,
    weight: &TensorInfo,
    bias: &TensorInfo,
    stride: [i64; 2],
    pad: [i64; 2],
    dilation: [i64; 2],
    groups: i64,
) -> bool {
    check_conv2d_support(input, weight, bias, stride, pad, dilation, groups).is_ok()
}
