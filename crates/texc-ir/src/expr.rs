//! Scalar expressions.
//!
//! Expressions are plain trees. The smart constructors fold integer
//! immediates, so index arithmetic over constant shapes stays constant and a
//! static lowering never carries `2 * 1 - 1`-style noise into later passes.

use std::ops::{Add, Div, Mul, Rem, Sub};

use serde::{Deserialize, Serialize};

use crate::{fresh, BufId, DType, VarId};

/// A scalar variable (loop index or symbolic size).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Var {
    /// Unique identifier.
    pub id: VarId,
    /// Display name. Not required to be unique.
    pub name: String,
    /// Element type.
    pub dtype: DType,
}

impl Var {
    /// Creates a fresh variable.
    #[must_use]
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            id: fresh(),
            name: name.into(),
            dtype,
        }
    }

    /// Creates a fresh 64-bit integer variable.
    #[must_use]
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, DType::Int64)
    }

    /// Returns this variable as an expression.
    #[must_use]
    pub fn expr(&self) -> Expr {
        Expr::Var(self.clone())
    }
}

/// Binary arithmetic operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division. Integer division rounds toward negative infinity.
    Div,
    /// Remainder with the sign of the divisor.
    Mod,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
}

impl BinOp {
    /// Applies this operation to two integers. `None` on division by zero.
    #[must_use]
    pub fn apply_int(self, a: i64, b: i64) -> Option<i64> {
        Some(match self {
            Self::Add => a.wrapping_add(b),
            Self::Sub => a.wrapping_sub(b),
            Self::Mul => a.wrapping_mul(b),
            Self::Div => {
                if b == 0 {
                    return None;
                }
                a.div_euclid(b) - i64::from(b < 0 && a.rem_euclid(b) != 0)
            }
            Self::Mod => {
                if b == 0 {
                    return None;
                }
                a - b * Self::Div.apply_int(a, b)?
            }
            Self::Min => a.min(b),
            Self::Max => a.max(b),
        })
    }

    /// Applies this operation to two floats.
    #[must_use]
    pub fn apply_float(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
            Self::Mod => a - b * (a / b).floor(),
            Self::Min => a.min(b),
            Self::Max => a.max(b),
        }
    }
}

/// Comparison operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl CmpOp {
    /// Evaluates the comparison.
    #[must_use]
    pub fn holds<T: PartialOrd>(self, a: T, b: T) -> bool {
        match self {
            Self::Eq => a == b,
            Self::Ne => a != b,
            Self::Lt => a < b,
            Self::Le => a <= b,
            Self::Gt => a > b,
            Self::Ge => a >= b,
        }
    }

    /// C-style operator symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// A scalar expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// 64-bit integer immediate.
    Int(i64),
    /// Floating-point immediate of the given float dtype.
    Float(f64, DType),
    /// Variable reference.
    Var(Var),
    /// Binary arithmetic.
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `lhs op rhs ? if_true : if_false`. Both arms are evaluated.
    CompareSelect {
        /// Comparison.
        op: CmpOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
        /// Result when the comparison holds.
        if_true: Box<Expr>,
        /// Result otherwise.
        if_false: Box<Expr>,
    },
    /// `cond != 0 ? then : otherwise`. Only the taken arm is evaluated.
    IfThenElse {
        /// Integer condition.
        cond: Box<Expr>,
        /// Result when `cond` is non-zero.
        then: Box<Expr>,
        /// Result when `cond` is zero.
        otherwise: Box<Expr>,
    },
    /// Load one element of a buffer.
    Load {
        /// The buffer read from.
        buf: BufId,
        /// Buffer name, for printing.
        name: String,
        /// Element type of the buffer.
        dtype: DType,
        /// One index per buffer dimension.
        indices: Vec<Expr>,
    },
}

impl Expr {
    /// Integer immediate.
    #[must_use]
    pub const fn int(value: i64) -> Self {
        Self::Int(value)
    }

    /// 32-bit float immediate.
    #[must_use]
    pub const fn float(value: f64) -> Self {
        Self::Float(value, DType::Float32)
    }

    /// Returns the integer value if this is an integer immediate.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns true if this is an immediate.
    #[must_use]
    pub const fn is_constant(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(..))
    }

    /// Builds a binary expression, folding integer immediates.
    #[must_use]
    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
            if let Some(folded) = op.apply_int(a, b) {
                return Self::Int(folded);
            }
        }
        match (op, lhs.as_int(), rhs.as_int()) {
            (BinOp::Add | BinOp::Sub, _, Some(0)) | (BinOp::Mul | BinOp::Div, _, Some(1)) => lhs,
            (BinOp::Add, Some(0), _) | (BinOp::Mul, Some(1), _) => rhs,
            _ => Self::Binary(op, Box::new(lhs), Box::new(rhs)),
        }
    }

    /// `min(lhs, rhs)`.
    #[must_use]
    pub fn min(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinOp::Min, lhs, rhs)
    }

    /// `max(lhs, rhs)`.
    #[must_use]
    pub fn max(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinOp::Max, lhs, rhs)
    }

    /// Builds a compare-select, folding when both operands are integers.
    #[must_use]
    pub fn compare_select(op: CmpOp, lhs: Expr, rhs: Expr, if_true: Expr, if_false: Expr) -> Self {
        if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
            return if op.holds(a, b) { if_true } else { if_false };
        }
        Self::CompareSelect {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        }
    }

    /// Builds a lazy conditional, folding a constant condition.
    #[must_use]
    pub fn if_then_else(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        match cond.as_int() {
            Some(0) => otherwise,
            Some(_) => then,
            None => Self::IfThenElse {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
        }
    }

    /// Infers the result type.
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Int(_) => DType::Int64,
            Self::Float(_, dtype) | Self::Load { dtype, .. } => *dtype,
            Self::Var(var) => var.dtype,
            Self::Binary(_, lhs, rhs) => lhs.dtype().promote(rhs.dtype()),
            Self::CompareSelect {
                if_true, if_false, ..
            } => if_true.dtype().promote(if_false.dtype()),
            Self::IfThenElse {
                then, otherwise, ..
            } => then.dtype().promote(otherwise.dtype()),
        }
    }

    /// Visits every load in this expression, outermost first.
    pub fn for_each_load(&self, f: &mut impl FnMut(BufId, &[Expr])) {
        match self {
            Self::Int(_) | Self::Float(..) | Self::Var(_) => {}
            Self::Binary(_, lhs, rhs) => {
                lhs.for_each_load(f);
                rhs.for_each_load(f);
            }
            Self::CompareSelect {
                lhs,
                rhs,
                if_true,
                if_false,
                ..
            } => {
                lhs.for_each_load(f);
                rhs.for_each_load(f);
                if_true.for_each_load(f);
                if_false.for_each_load(f);
            }
            Self::IfThenElse {
                cond,
                then,
                otherwise,
            } => {
                cond.for_each_load(f);
                then.for_each_load(f);
                otherwise.for_each_load(f);
            }
            Self::Load { buf, indices, .. } => {
                f(*buf, indices);
                for index in indices {
                    index.for_each_load(f);
                }
            }
        }
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&Var> for Expr {
    fn from(var: &Var) -> Self {
        var.expr()
    }
}

impl From<Var> for Expr {
    fn from(var: Var) -> Self {
        Self::Var(var)
    }
}

impl From<&Expr> for Expr {
    fn from(expr: &Expr) -> Self {
        expr.clone()
    }
}

macro_rules! impl_arith {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Expr>> $trait<T> for Expr {
            type Output = Expr;

            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, self, rhs.into())
            }
        }

        impl<T: Into<Expr>> $trait<T> for &Expr {
            type Output = Expr;

            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, self.clone(), rhs.into())
            }
        }

        impl<T: Into<Expr>> $trait<T> for &Var {
            type Output = Expr;

            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, self.expr(), rhs.into())
            }
        }
    };
}

impl_arith!(Add, add, BinOp::Add);
impl_arith!(Sub, sub, BinOp::Sub);
impl_arith!(Mul, mul, BinOp::Mul);
impl_arith!(Div, div, BinOp::Div);
impl_arith!(Rem, rem, BinOp::Mod);
