//! Reductions.
//!
//! A reduction is written as an initializer over the output coordinates and
//! a body over output plus reduction coordinates:
//!
//! ```text
//! for o0..on {
//!   out[o] = init(o)
//!   for r0..rm {
//!     out[o] = combine(out[o], body(o, r))
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::{Buf, DType, Expr, For, Stmt, Tensor, Var};

/// How a reduction folds values into its accumulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reducer {
    /// Sum, neutral element `0`.
    Sum,
    /// Maximum, neutral element `-inf` (or the minimum integer).
    Max,
    /// Minimum, neutral element `+inf` (or the maximum integer).
    Min,
}

impl Reducer {
    /// The neutral element for `dtype`.
    #[must_use]
    pub fn initializer(self, dtype: DType) -> Expr {
        if dtype.is_float() {
            let value = match self {
                Self::Sum => 0.0,
                Self::Max => f64::NEG_INFINITY,
                Self::Min => f64::INFINITY,
            };
            Expr::Float(value, dtype)
        } else {
            Expr::Int(match self {
                Self::Sum => 0,
                Self::Max => i64::MIN,
                Self::Min => i64::MAX,
            })
        }
    }

    /// Folds `value` into `acc`.
    #[must_use]
    pub fn combine(self, acc: f64, value: f64) -> f64 {
        match self {
            Self::Sum => acc + value,
            Self::Max => acc.max(value),
            Self::Min => acc.min(value),
        }
    }

    /// Name used by the printer.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
        }
    }
}

/// One iteration dimension: its extent and the name of its variable.
#[derive(Clone, Debug, PartialEq)]
pub struct DimArg {
    /// Extent; the dimension iterates over `[0, size)`.
    pub size: Expr,
    /// Variable name.
    pub name: String,
}

impl DimArg {
    /// Creates a dimension.
    #[must_use]
    pub fn new(size: impl Into<Expr>, name: impl Into<String>) -> Self {
        Self {
            size: size.into(),
            name: name.into(),
        }
    }
}

/// Builds a reduction tensor named `name`.
///
/// `init` receives the output variables; `body` receives the output
/// variables followed by the reduction variables. The output dtype is the
/// dtype of `body`. Loops are nested in argument order, output dims first.
pub fn reduce(
    name: &str,
    dims: &[DimArg],
    reducer: Reducer,
    init: impl FnOnce(&[Var]) -> Expr,
    body: impl FnOnce(&[Var]) -> Expr,
    reduce_dims: &[DimArg],
) -> Tensor {
    let out_vars: Vec<Var> = dims.iter().map(|d| Var::int(d.name.as_str())).collect();
    let red_vars: Vec<Var> = reduce_dims
        .iter()
        .map(|d| Var::int(d.name.as_str()))
        .collect();

    let all_vars: Vec<Var> = out_vars.iter().chain(&red_vars).cloned().collect();
    let body = body(&all_vars);
    let init = init(&out_vars);

    let buf = Buf::new(name, dims.iter().map(|d| d.size.clone()), body.dtype());
    let indices: Vec<Expr> = out_vars.iter().map(Var::expr).collect();

    let mut update = Stmt::reduce_store(&buf, indices.clone(), reducer, body);
    for (var, dim) in red_vars.into_iter().zip(reduce_dims).rev() {
        update = Stmt::For(For::new(var, Expr::int(0), dim.size.clone(), vec![update]));
    }

    let mut stmts = vec![Stmt::store(&buf, indices, init), update];
    for (var, dim) in out_vars.into_iter().zip(dims).rev() {
        stmts = vec![Stmt::For(For::new(var, Expr::int(0), dim.size.clone(), stmts))];
    }

    let stmt = if stmts.len() == 1 {
        stmts.remove(0)
    } else {
        Stmt::Block(stmts)
    };
    Tensor::new(buf, stmt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initializers() {
        assert_eq!(
            Reducer::Sum.initializer(DType::Float32),
            Expr::Float(0.0, DType::Float32)
        );
        assert_eq!(Reducer::Max.initializer(DType::Int64), Expr::Int(i64::MIN));
        assert_eq!(Reducer::Min.combine(3.0, 2.0), 2.0);
    }

    #[test]
    fn test_reduce_structure() {
        let a = Buf::from_static("a", &[3, 5], DType::Float32);
        let t = reduce(
            "row_sum",
            &[DimArg::new(3, "i")],
            Reducer::Sum,
            |_| Reducer::Sum.initializer(DType::Float32),
            |v| a.load([v[0].expr(), v[1].expr()]),
            &[DimArg::new(5, "j")],
        );

        assert_eq!(t.buf.static_dims(), Some(vec![3]));
        assert_eq!(t.buf.dtype, DType::Float32);

        let Stmt::For(outer) = &t.stmt else {
            panic!("expected outer loop");
        };
        assert_eq!(outer.constant_extent(), Some(3));
        assert!(matches!(outer.body[0], Stmt::Store(_)));
        let Stmt::For(inner) = &outer.body[1] else {
            panic!("expected reduction loop");
        };
        assert_eq!(inner.constant_extent(), Some(5));
        assert!(matches!(inner.body[0], Stmt::ReduceStore(_)));
    }
}
