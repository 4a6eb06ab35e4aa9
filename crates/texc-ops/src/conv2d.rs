//! Conv2d dispatch.
//!
//! Supported depthwise convolutions are lowered in IR; everything else
//! becomes a call into a library kernel.

use texc_ir::{Buf, DType, Expr, Stmt, Tensor};
use tracing::debug;

use crate::args::{buf_operand, int_operand, operand};
use crate::{
    check_conv2d_support, conv2d_depthwise_static, pair_int, tensor_info, ArgValue, Device,
    LowerConfig, LowerError, Unsupported,
};

/// External kernel for general convolutions.
pub const ATEN_CONV2D: &str = "nnc_aten_conv2d";
/// External kernel for prepacked clamped convolutions.
pub const PREPACKED_CONV2D_CLAMP_RUN: &str = "nnc_prepacked_conv2d_clamp_run";
/// External kernel for prepacked clamped linear layers.
pub const PREPACKED_LINEAR_CLAMP_RUN: &str = "nnc_prepacked_linear_clamp_run";

/// Parsed conv2d operands.
struct Conv2dArgs<'a> {
    input: &'a Buf,
    weight: &'a Buf,
    bias: &'a Buf,
    stride: [i64; 2],
    pad: [i64; 2],
    dilation: [i64; 2],
    groups: i64,
}

impl<'a> Conv2dArgs<'a> {
    /// Operands are `[input, weight, bias, stride, padding, dilation, groups]`.
    fn parse(inputs: &'a [ArgValue]) -> Result<Self, LowerError> {
        Ok(Self {
            input: buf_operand(inputs, 0)?,
            weight: buf_operand(inputs, 1)?,
            bias: buf_operand(inputs, 2)?,
            stride: pair_int(operand(inputs, 3)?)?,
            pad: pair_int(operand(inputs, 4)?)?,
            dilation: pair_int(operand(inputs, 5)?)?,
            groups: int_operand(inputs, 6)?,
        })
    }

    fn route(&self, config: &LowerConfig) -> Result<(), Unsupported> {
        if !config.enable_depthwise {
            return Err(Unsupported::Disabled);
        }
        let info = |buf: &Buf| {
            tensor_info(buf).ok_or_else(|| Unsupported::SymbolicShape {
                operand: buf.name.clone(),
            })
        };
        check_conv2d_support(
            &info(self.input)?,
            &info(self.weight)?,
            &info(self.bias)?,
            self.stride,
            self.pad,
            self.dilation,
            self.groups,
        )
    }
}

/// Lowers `aten::conv2d` with the default configuration.
pub fn compute_conv2d(
    inputs: &[ArgValue],
    output_shape: &[Expr],
    output_type: Option<DType>,
    device: Device,
) -> Result<Tensor, LowerError> {
    compute_conv2d_with_config(
        inputs,
        output_shape,
        output_type,
        device,
        &LowerConfig::default(),
    )
}

/// Lowers `aten::conv2d`.
///
/// Depthwise 3x3 convolutions over statically shaped float32 operands become
/// a reduction; anything else becomes an external call to
/// [`ATEN_CONV2D`] with scalar arguments `[stride_h, stride_w, pad_h, pad_w,
/// dilation_h, dilation_w, groups]` writing a buffer named `conv`.
pub fn compute_conv2d_with_config(
    inputs: &[ArgValue],
    output_shape: &[Expr],
    output_type: Option<DType>,
    device: Device,
    config: &LowerConfig,
) -> Result<Tensor, LowerError> {
    let args = Conv2dArgs::parse(inputs)?;

    match args.route(config) {
        Ok(()) => {
            debug!(?device, groups = args.groups, "lowering conv2d as depthwise reduction");
            return conv2d_depthwise_static(
                args.input,
                args.weight,
                Some(args.bias),
                args.stride[0],
                args.pad[0],
                args.groups,
                config,
            );
        }
        Err(reason) => debug!(?device, %reason, "delegating conv2d to {ATEN_CONV2D}"),
    }

    let dtype = output_type.unwrap_or(DType::Float32);
    let result = Buf::new("conv", output_shape.iter().cloned(), dtype);
    let scalars = [
        args.stride[0],
        args.stride[1],
        args.pad[0],
        args.pad[1],
        args.dilation[0],
        args.dilation[1],
        args.groups,
    ];
    let call = Stmt::external_call(
        result.clone(),
        ATEN_CONV2D,
        vec![args.input.clone(), args.weight.clone(), args.bias.clone()],
        scalars.into_iter().map(Expr::int).collect(),
    );
    Ok(Tensor::new(result, call))
}

/// Lowers `prepacked::conv2d_clamp_run`. Always delegated.
pub fn compute_prepacked_conv2d_clamp_run(
    inputs: &[ArgValue],
    output_shape: &[Expr],
    output_type: Option<DType>,
    device: Device,
) -> Result<Tensor, LowerError> {
    delegate_prepacked(
        "prepacked_conv2d_clamp_run",
        PREPACKED_CONV2D_CLAMP_RUN,
        inputs,
        output_shape,
        output_type,
        device,
    )
}

/// Lowers `prepacked::linear_clamp_run`. Always delegated.
pub fn compute_prepacked_linear_clamp_run(
    inputs: &[ArgValue],
    output_shape: &[Expr],
    output_type: Option<DType>,
    device: Device,
) -> Result<Tensor, LowerError> {
    delegate_prepacked(
        "prepacked_linear_clamp_run",
        PREPACKED_LINEAR_CLAMP_RUN,
        inputs,
        output_shape,
        output_type,
        device,
    )
}

fn delegate_prepacked(
    name: &str,
    kernel: &str,
    inputs: &[ArgValue],
    output_shape: &[Expr],
    output_type: Option<DType>,
    device: Device,
) -> Result<Tensor, LowerError> {
    let input = buf_operand(inputs, 0)?;
    let prepacked = buf_operand(inputs, 1)?;
    debug!(?device, kernel, "delegating prepacked operator");

    let dtype = output_type.unwrap_or(DType::Float32);
    let result = Buf::new(name, output_shape.iter().cloned(), dtype);
    let call = Stmt::external_call(
        result.clone(),
        kernel,
        vec![input.clone(), prepacked.clone()],
        Vec::new(),
    );
    Ok(Tensor::new(result, call))
}

/// Returns true if `compute_conv2d` would lower these operands as a
/// depthwise reduction. Malformed operands are reported as unsupported.
///
/// Callers holding tensor descriptors instead of operands should use
/// [`conv2d_is_supported`](crate::conv2d_is_supported).
#[must_use]
pub fn is_depthwise_conv2d_supported(inputs: &[ArgValue]) -> bool {
    Conv2dArgs::parse(inputs).is_ok_and(|args| args.route(&LowerConfig::default()).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operands(x: &[i64], w: &[i64], stride: ArgValue, groups: i64) -> Vec<ArgValue> {
        vec![
            Buf::from_static("input", x, DType::Float32).into(),
            Buf::from_static("weight", w, DType::Float32).into(),
            Buf::from_static("bias", &w[..1], DType::Float32).into(),
            stride,
            ArgValue::Int(1),
            ArgValue::IntList(vec![1, 1]),
            ArgValue::Int(groups),
        ]
    }

    #[test]
    fn test_depthwise_path() {
        let inputs = operands(&[1, 4, 8, 8], &[4, 1, 3, 3], ArgValue::Int(2), 4);
        assert!(is_depthwise_conv2d_supported(&inputs));

        let t = compute_conv2d(&inputs, &[], None, Device::Cpu).unwrap();
        assert!(t.external_call().is_none());
        assert_eq!(t.buf.name, "conv2d_depthwise");
        assert_eq!(t.buf.static_dims(), Some(vec![1, 4, 4, 4]));
    }

    #[test]
    fn test_delegates_5x5() {
        let inputs = operands(&[1, 4, 8, 8], &[4, 1, 5, 5], ArgValue::IntList(vec![1, 1]), 4);
        assert!(!is_depthwise_conv2d_supported(&inputs));

        let shape = [1, 4, 6, 6].map(Expr::int);
        let t = compute_conv2d(&inputs, &shape, None, Device::Cpu).unwrap();
        let call = t.external_call().unwrap();
        assert_eq!(call.kernel, ATEN_CONV2D);
        assert_eq!(call.buf.name, "conv");
        assert_eq!(call.buf.dtype, DType::Float32);
        let names: Vec<&str> = call.bufs.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["input", "weight", "bias"]);
        assert_eq!(call.args, [1, 1, 1, 1, 1, 1, 4].map(Expr::int));
    }

    #[test]
    fn test_operand_and_descriptor_forms_agree() {
        for (w, stride) in [([4, 1, 3, 3], 2), ([4, 1, 5, 5], 1), ([4, 1, 3, 3], 4)] {
            let inputs = operands(&[1, 4, 8, 8], &w, ArgValue::Int(stride), 4);
            let info = |i: usize| match &inputs[i] {
                ArgValue::Buf(buf) => tensor_info(buf).unwrap(),
                other => panic!("expected a buffer, got {other:?}"),
            };
            let by_descriptor = crate::conv2d_is_supported(
                &info(0),
                &info(1),
                &info(2),
                [stride; 2],
                [1, 1],
                [1, 1],
                4,
            );
            assert_eq!(is_depthwise_conv2d_supported(&inputs), by_descriptor);
        }
    }

    #[test]
    fn test_disabled_depthwise_delegates() {
        let inputs = operands(&[1, 4, 8, 8], &[4, 1, 3, 3], ArgValue::Int(1), 4);
        let config = LowerConfig {
            enable_depthwise: false,
            ..LowerConfig::default()
        };
        let t = compute_conv2d_with_config(&inputs, &[], Some(DType::Float64), Device::Cpu, &config)
            .unwrap();
        assert_eq!(t.external_call().unwrap().kernel, ATEN_CONV2D);
        assert_eq!(t.buf.dtype, DType::Float64);
    }

    #[test]
    fn test_malformed_operands() {
        let mut inputs = operands(&[1, 4, 8, 8], &[4, 1, 3, 3], ArgValue::Int(1), 4);
        inputs[3] = ArgValue::Bool(true);
        assert!(!is_depthwise_conv2d_supported(&inputs));
        assert!(matches!(
            compute_conv2d(&inputs, &[], None, Device::Cpu),
            Err(LowerError::BadArgument { found: "bool", .. })
        ));
        assert_eq!(
            compute_conv2d(&inputs[..6], &[], None, Device::Cpu),
            Err(LowerError::BadArgument {
                expected: "int or int list of length 2",
                found: "bool"
            })
        );
        inputs[3] = ArgValue::Int(1);
        assert_eq!(
            compute_conv2d(&inputs[..6], &[], None, Device::Cpu),
            Err(LowerError::MissingOperand { index: 6 })
        );
    }

    #[test]
    fn test_prepacked_always_delegates() {
        let x = Buf::from_static("input", &[1, 3, 8, 8], DType::Float32);
        let packed = Buf::from_static("packed", &[1], DType::Int64);
        let inputs: [ArgValue; 2] = [x.into(), packed.into()];

        let t = compute_prepacked_conv2d_clamp_run(&inputs, &[], None, Device::Cpu).unwrap();
        let call = t.external_call().unwrap();
        assert_eq!(call.kernel, PREPACKED_CONV2D_CLAMP_RUN);
        assert_eq!(call.buf.name, "prepacked_conv2d_clamp_run");
        assert_eq!(call.bufs.len(), 2);
        assert!(call.args.is_empty());

        let t = compute_prepacked_linear_clamp_run(&inputs, &[], None, Device::Cpu).unwrap();
        let call = t.external_call().unwrap();
        assert_eq!(call.kernel, PREPACKED_LINEAR_CLAMP_RUN);
        assert_eq!(call.buf.name, "prepacked_linear_clamp_run");
    }
}
