//! # texc IR
//!
//! This crate defines the tensor-expression intermediate representation used
//! by the texc operator lowerings. An operator is lowered into a [`Tensor`]:
//! an output [`Buf`] together with the statement tree that computes it.
//!
//! ## Overview
//!
//! The IR is deliberately small. It provides:
//!
//! - **Scalar expressions** ([`Expr`]): immediates, variables, arithmetic,
//!   compare-select, lazy if-then-else and buffer loads
//! - **Buffers** ([`Buf`]): named storage with constant or symbolic dims
//! - **Statements** ([`Stmt`]): blocks, `for` loops, stores, reduction
//!   updates and external kernel calls
//! - **Reductions** ([`reduce()`]): the `init + combine over a range` construct
//!   operators are written in
//!
//! ## Pipeline Position
//!
//! ```text
//! [Operator graph]
//!     |
//!     v
//! [Operator lowering]   <- texc-ops
//!     |
//!     v
//! [Tensor-expression IR] <- This crate
//!     |
//!     v
//! [Loop nest transforms] <- texc-loop-nest
//!     |
//!     v
//! [Backend codegen]
//! ```
//!
//! The [`eval`] module executes statement trees directly and is the reference
//! every loop transformation is checked against.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod eval;
pub mod expr;
pub mod printer;
pub mod reduce;
pub mod stmt;
pub mod tensor;

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

pub use eval::{BufferData, EvalError, Evaluator, ExternalKernel};
pub use expr::{BinOp, CmpOp, Expr, Var};
pub use reduce::{reduce, DimArg, Reducer};
pub use stmt::{ExternalCall, For, ReduceStore, Stmt, Store};
pub use tensor::{Buf, Tensor};

/// Dense index types backed by a `u32`.
pub trait Idx: Copy + Eq + std::hash::Hash + std::fmt::Debug {
    /// Creates an index from a `usize`.
    fn new(idx: usize) -> Self;

    /// Returns the index as a `usize`.
    fn index(self) -> usize;
}

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

/// Returns a fresh id of any index type. Ids are unique across types.
#[must_use]
pub fn fresh<I: Idx>() -> I {
    I::new(NEXT_ID.fetch_add(1, Ordering::Relaxed) as usize)
}

/// A unique identifier for scalar variables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(u32);

impl Idx for VarId {
    fn new(idx: usize) -> Self {
        Self(idx as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A unique identifier for buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufId(u32);

impl Idx for BufId {
    fn new(idx: usize) -> Self {
        Self(idx as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A unique identifier for loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoopId(u32);

impl Idx for LoopId {
    fn new(idx: usize) -> Self {
        Self(idx as u32)
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Element types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// Boolean (1 byte).
    Bool,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 8-bit unsigned integer.
    UInt8,
    /// 16-bit floating point (half precision).
    Float16,
    /// Brain floating point (bfloat16).
    BFloat16,
    /// 32-bit floating point (single precision).
    Float32,
    /// 64-bit floating point (double precision).
    Float64,
}

impl DType {
    /// Returns the size in bytes of this dtype.
    #[must_use]
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::Float16 | Self::BFloat16 => 2,
            Self::Int32 | Self::Float32 => 4,
            Self::Int64 | Self::Float64 => 8,
        }
    }

    /// Returns true if this is a floating-point type.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(
            self,
            Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64
        )
    }

    /// Returns true if this is an integer type.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 | Self::UInt8
        )
    }

    /// The type both operands of a binary operation are promoted to.
    #[must_use]
    pub fn promote(self, other: Self) -> Self {
        match (self.is_float(), other.is_float()) {
            (true, false) => self,
            (false, true) => other,
            _ if other.size_bytes() > self.size_bytes() => other,
            _ => self,
        }
    }

    /// Short name used by the printer.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::Float16 => "half",
            Self::BFloat16 => "bfloat16",
            Self::Float32 => "float",
            Self::Float64 => "double",
        }
    }
}

/// Errors in IR construction.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum IrError {
    /// Wrong number of indices for a buffer access.
    #[error("buffer `{buf}` has rank {rank}, accessed with {got} indices")]
    IndexArity {
        /// Buffer name.
        buf: String,
        /// Buffer rank.
        rank: usize,
        /// Number of indices supplied.
        got: usize,
    },

    /// A dimension was expected to be a compile-time constant.
    #[error("dimension {dim} of buffer `{buf}` is not a constant")]
    NonConstantDim {
        /// Buffer name.
        buf: String,
        /// Dimension index.
        dim: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_sizes() {
        assert_eq!(DType::Float32.size_bytes(), 4);
        assert_eq!(DType::Float64.size_bytes(), 8);
        assert_eq!(DType::Int32.size_bytes(), 4);
        assert_eq!(DType::BFloat16.size_bytes(), 2);
    }

    #[test]
    fn test_dtype_promote() {
        assert_eq!(DType::Int64.promote(DType::Float32), DType::Float32);
        assert_eq!(DType::Float32.promote(DType::Float64), DType::Float64);
        assert_eq!(DType::Int32.promote(DType::Int64), DType::Int64);
        assert_eq!(DType::Float32.promote(DType::Int64), DType::Float32);
    }

    #[test]
    fn test_fresh_ids_are_unique() {
        let a: VarId = fresh();
        let b: VarId = fresh();
        let c: LoopId = fresh();
        assert_ne!(a, b);
        assert_ne!(a.index(), c.index());
        assert_ne!(b.index(), c.index());
    }
}
