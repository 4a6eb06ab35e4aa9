//! # texc Operator Lowering
//!
//! This crate lowers high-level operators into tensor-expression IR. Its
//! operator is two-dimensional convolution, which has a specialized lowering
//! for depthwise 3x3 kernels and delegates every other shape to an external
//! library kernel.
//!
//! ## Pipeline Position
//!
//! ```text
//! operands -> [args] -> [support] --accepted--> [depthwise] -> [peel] -> Tensor
//!                                  \--rejected--> extern call ----------> Tensor
//! ```
//!
//! ## Key Pieces
//!
//! - [`pair_int`]: scalar-or-pair operand normalization
//! - [`check_conv2d_support`]: the feasibility oracle for the depthwise path
//! - [`conv2d_depthwise_static`] / [`conv2d_depthwise_dynamic`]: the
//!   boundary-masked depthwise reduction
//! - [`peel_depthwise_boundaries`]: moves the padded border iterations of the
//!   spatial loops out of the interior loops
//! - [`compute_conv2d`]: the dispatcher tying it all together

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_arguments)]

pub mod args;
pub mod config;
pub mod conv2d;
pub mod depthwise;
pub mod error;
pub mod info;
pub mod peel;
pub mod support;

pub use args::{pair_int, ArgValue, Device};
pub use config::LowerConfig;
pub use conv2d::{
    compute_conv2d, compute_conv2d_with_config, compute_prepacked_conv2d_clamp_run,
    compute_prepacked_linear_clamp_run, is_depthwise_conv2d_supported, ATEN_CONV2D,
    PREPACKED_CONV2D_CLAMP_RUN, PREPACKED_LINEAR_CLAMP_RUN,
};
pub use depthwise::{conv2d_depthwise_dynamic, conv2d_depthwise_static, DynamicConvShape};
pub use error::LowerError;
pub use info::{tensor_info, TensorInfo};
pub use peel::{peel_depthwise_boundaries, PeelPattern};
pub use support::{check_conv2d_support, conv2d_is_supported, Unsupported};
