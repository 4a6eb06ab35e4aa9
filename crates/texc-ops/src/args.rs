//! Operator operands.

use serde::{Deserialize, Serialize};
use texc_ir::{Buf, Var};

use crate::LowerError;

/// One operand of a graph operator.
#[derive(Clone, Debug, PartialEq)]
pub enum ArgValue {
    /// A tensor.
    Buf(Buf),
    /// A list of tensors.
    BufList(Vec<Buf>),
    /// A symbolic scalar.
    Var(Var),
    /// An integer.
    Int(i64),
    /// A list of integers.
    IntList(Vec<i64>),
    /// A float.
    Double(f64),
    /// A list of floats.
    DoubleList(Vec<f64>),
    /// A boolean.
    Bool(bool),
    /// A string.
    Str(String),
    /// An absent optional operand.
    None,
}

impl ArgValue {
    /// Short name of the operand kind, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Buf(_) => "buffer",
            Self::BufList(_) => "buffer list",
            Self::Var(_) => "variable",
            Self::Int(_) => "int",
            Self::IntList(_) => "int list",
            Self::Double(_) => "double",
            Self::DoubleList(_) => "double list",
            Self::Bool(_) => "bool",
            Self::Str(_) => "string",
            Self::None => "none",
        }
    }
}

impl From<Buf> for ArgValue {
    fn from(buf: Buf) -> Self {
        Self::Buf(buf)
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Vec<i64>> for ArgValue {
    fn from(values: Vec<i64>) -> Self {
        Self::IntList(values)
    }
}

/// Device the operator will run on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    /// Host CPU.
    #[default]
    Cpu,
    /// A CUDA device.
    Cuda {
        /// Device ordinal.
        index: u8,
    },
}

/// Normalizes a scalar-or-pair operand to a pair.
///
/// `Int(i)` becomes `[i, i]`; `IntList(v)` becomes `[v[0], v[1]]`. Any other
/// kind, or a list shorter than two, is a caller error.
pub fn pair_int(arg: &ArgValue) -> Result<[i64; 2], LowerError> {
    match arg {
        ArgValue::Int(i) => Ok([*i, *i]),
        ArgValue::IntList(v) if v.len() >= 2 => Ok([v[0], v[1]]),
        other => Err(LowerError::BadArgument {
            expected: "int or int list of length 2",
            found: other.kind(),
        }),
    }
}

pub(crate) fn operand(inputs: &[ArgValue], index: usize) -> Result<&ArgValue, LowerError> {
    inputs.get(index).ok_or(LowerError::MissingOperand { index })
}

pub(crate) fn buf_operand(inputs: &[ArgValue], index: usize) -> Result<&Buf, LowerError> {
    match operand(inputs, index)? {
        ArgValue::Buf(buf) => Ok(buf),
        other => Err(LowerError::BadArgument {
            expected: "buffer",
            found: other.kind(),
        }),
    }
}

pub(crate) fn int_operand(inputs: &[ArgValue], index: usize) -> Result<i64, LowerError> {
    match operand(inputs, index)? {
        ArgValue::Int(i) => Ok(*i),
        other => Err(LowerError::BadArgument {
            expected: "int",
            found: other.kind(),
        }),
    }
}
