//! texc - conv2d lowering driver
//!
//! Lowers a convolution described on the command line into tensor-expression
//! IR, prints it, and optionally executes it against a direct convolution.

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use texc_ir::{Buf, BufferData, DType, EvalError, Evaluator, Expr, ExternalKernel, Tensor};
use texc_ops::{
    check_conv2d_support, compute_conv2d_with_config, pair_int, tensor_info, ArgValue, Device,
    LowerConfig, ATEN_CONV2D,
};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Lower conv2d operators to tensor-expression IR
#[derive(Parser, Debug)]
#[command(name = "texc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The command to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Lower a convolution and print the resulting IR
    Lower {
        #[command(flatten)]
        conv: ConvArgs,

        /// Keep the boundary iterations inside the spatial loops
        #[arg(long)]
        no_peel: bool,

        /// Always delegate to the external kernel
        #[arg(long)]
        no_depthwise: bool,

        /// Execute the IR and compare it with a direct convolution
        #[arg(long)]
        verify: bool,
    },

    /// Report whether a convolution takes the depthwise path
    Check {
        #[command(flatten)]
        conv: ConvArgs,
    },
}

/// Convolution parameters
#[derive(Args, Debug)]
struct ConvArgs {
    /// Input shape as N,C,H,W
    #[arg(long, value_delimiter = ',', required = true)]
    input: Vec<i64>,

    /// Weight shape as K,C/groups,R,S
    #[arg(long, value_delimiter = ',', required = true)]
    weight: Vec<i64>,

    /// Stride, one value or H,W
    #[arg(long, value_delimiter = ',', default_value = "1")]
    stride: Vec<i64>,

    /// Padding, one value or H,W
    #[arg(long, value_delimiter = ',', default_value = "0")]
    pad: Vec<i64>,

    /// Dilation, one value or H,W
    #[arg(long, value_delimiter = ',', default_value = "1")]
    dilation: Vec<i64>,

    /// Number of groups
    #[arg(long, default_value_t = 1)]
    groups: i64,

    /// Element type of every operand
    #[arg(long, value_enum, default_value = "float32")]
    dtype: ElemType,
}

/// Operand element types
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ElemType {
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// 16-bit float
    Float16,
}

impl From<ElemType> for DType {
    fn from(ty: ElemType) -> Self {
        match ty {
            ElemType::Float32 => DType::Float32,
            ElemType::Float64 => DType::Float64,
            ElemType::Float16 => DType::Float16,
        }
    }
}

/// A fully resolved convolution problem.
struct Problem {
    input: Buf,
    weight: Buf,
    bias: Buf,
    operands: Vec<ArgValue>,
    output_shape: Vec<i64>,
    dtype: DType,
}

impl ConvArgs {
    fn resolve(&self) -> Result<Problem> {
        let [n, c, h, w] = shape4("input", &self.input)?;
        let [k, _, r, s] = shape4("weight", &self.weight)?;
        let stride = pair_arg("stride", &self.stride)?;
        let pad = pair_arg("pad", &self.pad)?;
        let dilation = pair_arg("dilation", &self.dilation)?;

        let (stride_hw, pad_hw, dil_hw) =
            (pair_int(&stride)?, pair_int(&pad)?, pair_int(&dilation)?);
        if stride_hw.iter().any(|&v| v <= 0) {
            bail!("stride must be positive");
        }
        if self.groups <= 0 {
            bail!("groups must be positive");
        }
        let oh = out_extent(h, r, stride_hw[0], pad_hw[0], dil_hw[0]);
        let ow = out_extent(w, s, stride_hw[1], pad_hw[1], dil_hw[1]);
        if oh <= 0 || ow <= 0 {
            bail!("output would be empty ({oh}x{ow})");
        }

        let dtype = DType::from(self.dtype);
        let input = Buf::from_static("input", &[n, c, h, w], dtype);
        let weight = Buf::from_static("weight", &self.weight, dtype);
        let bias = Buf::from_static("bias", &[k], dtype);
        let operands = vec![
            input.clone().into(),
            weight.clone().into(),
            bias.clone().into(),
            stride,
            pad,
            dilation,
            ArgValue::Int(self.groups),
        ];
        Ok(Problem {
            input,
            weight,
            bias,
            operands,
            output_shape: vec![n, k, oh, ow],
            dtype,
        })
    }
}

fn shape4(what: &str, dims: &[i64]) -> Result<[i64; 4]> {
    match *dims {
        [a, b, c, d] if dims.iter().all(|&x| x > 0) => Ok([a, b, c, d]),
        _ => bail!("{what} shape must be four positive sizes, got {dims:?}"),
    }
}

fn pair_arg(what: &str, values: &[i64]) -> Result<ArgValue> {
    match *values {
        [v] => Ok(ArgValue::Int(v)),
        [a, b] => Ok(ArgValue::IntList(vec![a, b])),
        _ => bail!("{what} takes one or two values, got {values:?}"),
    }
}

fn out_extent(size: i64, kernel: i64, stride: i64, pad: i64, dilation: i64) -> i64 {
    (size + 2 * pad - dilation * (kernel - 1) - 1).div_euclid(stride) + 1
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Lower {
            conv,
            no_peel,
            no_depthwise,
            verify,
        } => {
            let config = LowerConfig {
                enable_depthwise: !no_depthwise,
                enable_loop_peeling: !no_peel,
            };
            lower(&conv.resolve()?, &config, verify)
        }
        Commands::Check { conv } => check(&conv),
    }
}

fn lower(problem: &Problem, config: &LowerConfig, verify: bool) -> Result<()> {
    let shape: Vec<Expr> = problem.output_shape.iter().copied().map(Expr::int).collect();
    let tensor = compute_conv2d_with_config(
        &problem.operands,
        &shape,
        Some(problem.dtype),
        Device::Cpu,
        config,
    )?;
    match tensor.external_call() {
        Some(call) => info!(kernel = %call.kernel, "conv2d delegated"),
        None => info!(loops = tensor.stmt.loop_count(), "conv2d lowered to IR"),
    }
    println!("{tensor}");

    if verify {
        verify_against_direct(problem, &tensor)?;
    }
    Ok(())
}

fn check(conv: &ConvArgs) -> Result<()> {
    let problem = conv.resolve()?;
    let (Some(input), Some(weight), Some(bias)) = (
        tensor_info(&problem.input),
        tensor_info(&problem.weight),
        tensor_info(&problem.bias),
    ) else {
        bail!("operand shapes must be static");
    };
    let pair = |index: usize| pair_int(&problem.operands[index]);
    match check_conv2d_support(
        &input,
        &weight,
        &bias,
        pair(3)?,
        pair(4)?,
        pair(5)?,
        conv.groups,
    ) {
        Ok(()) => println!("depthwise"),
        Err(reason) => println!("delegated: {reason}"),
    }
    Ok(())
}

// =========================================================================
// Verification
// =========================================================================

fn verify_against_direct(problem: &Problem, tensor: &Tensor) -> Result<()> {
    let operands = [&problem.input, &problem.weight, &problem.bias];
    let data: Vec<Vec<f64>> = operands
        .iter()
        .zip(1u64..)
        .map(|(buf, seed)| {
            let len = buf.static_dims().map_or(0, |d| d.iter().product::<i64>());
            sample_data(len, seed)
        })
        .collect();

    let mut ev = Evaluator::new();
    let kernel: ExternalKernel = Box::new(
        |out: &mut BufferData, bufs: &[&BufferData], args: &[i64]| -> Result<(), EvalError> {
            let &[x, w, b] = bufs else {
                return Err(EvalError::SizeMismatch {
                    name: ATEN_CONV2D.to_string(),
                    expected: 3,
                    got: bufs.len(),
                });
            };
            let result = direct_conv2d(x, w, b, args);
            if result.len() != out.data.len() {
                return Err(EvalError::SizeMismatch {
                    name: ATEN_CONV2D.to_string(),
                    expected: out.data.len(),
                    got: result.len(),
                });
            }
            out.data = result;
            Ok(())
        },
    );
    ev.register_kernel(ATEN_CONV2D, kernel);
    for (buf, values) in operands.iter().zip(&data) {
        ev.bind_buffer(buf, values.clone())?;
    }
    let got = ev.run_tensor(tensor)?.data.clone();

    let [xs, ws, bs] = [0, 1, 2].map(|i| {
        ev.buffer(operands[i]).cloned().unwrap_or_else(|| {
            BufferData::zeros(Vec::new(), problem.dtype)
        })
    });
    let mut args: Vec<i64> = Vec::new();
    for index in 3..6 {
        args.extend(pair_int(&problem.operands[index])?);
    }
    if let ArgValue::Int(groups) = problem.operands[6] {
        args.push(groups);
    }
    let expected = direct_conv2d(&xs, &ws, &bs, &args);
    if expected.len() != got.len() {
        bail!("expected {} elements, got {}", expected.len(), got.len());
    }

    let max_err = got
        .iter()
        .zip(&expected)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0_f64, f64::max);
    info!(elements = got.len(), max_err, "compared with direct convolution");
    if max_err > 1e-3 {
        bail!("lowered conv2d differs from direct convolution by {max_err}");
    }
    println!("verified: {} elements, max error {max_err:e}", got.len());
    Ok(())
}

/// Deterministic values that are exact in every float type we accept.
fn sample_data(len: i64, seed: u64) -> Vec<f64> {
    let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            #[allow(clippy::cast_precision_loss)]
            let bucket = ((state >> 33) % 64) as f64;
            bucket / 16.0 - 2.0
        })
        .collect()
}

/// Grouped, dilated, padded 2-d convolution. `args` are `[stride_h, stride_w,
/// pad_h, pad_w, dilation_h, dilation_w, groups]`.
#[allow(clippy::cast_possible_wrap, clippy::many_single_char_names)]
fn direct_conv2d(x: &BufferData, w: &BufferData, b: &BufferData, args: &[i64]) -> Vec<f64> {
    let dim = |buf: &BufferData, i: usize| buf.dims.get(i).map_or(0, |&d| d as i64);
    let &[sh, sw, ph, pw, dh, dw, groups] = args else {
        return Vec::new();
    };
    let (n, h, wd) = (dim(x, 0), dim(x, 2), dim(x, 3));
    let (k, cper_g, r, s) = (dim(w, 0), dim(w, 1), dim(w, 2), dim(w, 3));
    let k_per_group = (k / groups.max(1)).max(1);
    let oh = out_extent(h, r, sh, ph, dh);
    let ow = out_extent(wd, s, sw, pw, dw);
    debug!(n, k, oh, ow, "direct convolution");

    let mut out = Vec::new();
    for ni in 0..n {
        for ki in 0..k {
            let group = ki / k_per_group;
            for y in 0..oh {
                for xo in 0..ow {
                    let mut acc = b.get(&[ki]).unwrap_or(0.0);
                    for ci in 0..cper_g {
                        let ic = group * cper_g + ci;
                        for ri in 0..r {
                            for si in 0..s {
                                let ih = y * sh - ph + ri * dh;
                                let iw = xo * sw - pw + si * dw;
                                let value = x.get(&[ni, ic, ih, iw]).unwrap_or(0.0);
                                acc += value * w.get(&[ki, ci, ri, si]).unwrap_or(0.0);
                            }
                        }
                    }
                    out.push(acc);
                }
            }
        }
    }
    out
}
