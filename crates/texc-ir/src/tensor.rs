//! Buffers and computation results.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{fresh, BufId, DType, Expr, IrError, Stmt};

/// A named buffer with constant or symbolic dimensions.
///
/// Buffers are row-major. A dimension is a compile-time constant when it is
/// an [`Expr::Int`]; anything else is symbolic and only known at run time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Buf {
    /// Unique identifier.
    pub id: BufId,
    /// Display name.
    pub name: String,
    /// Dimension sizes, outermost first.
    pub dims: SmallVec<[Expr; 4]>,
    /// Element type.
    pub dtype: DType,
}

impl Buf {
    /// Creates a fresh buffer.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        dims: impl IntoIterator<Item = Expr>,
        dtype: DType,
    ) -> Self {
        Self {
            id: fresh(),
            name: name.into(),
            dims: dims.into_iter().collect(),
            dtype,
        }
    }

    /// Creates a fresh buffer with constant dimensions.
    #[must_use]
    pub fn from_static(name: impl Into<String>, dims: &[i64], dtype: DType) -> Self {
        Self::new(name, dims.iter().copied().map(Expr::Int), dtype)
    }

    /// Returns the rank.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns dimension `i`.
    #[must_use]
    pub fn dim(&self, i: usize) -> &Expr {
        &self.dims[i]
    }

    /// Returns true if every dimension is a constant.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.dims.iter().all(|d| d.as_int().is_some())
    }

    /// Returns the constant dimensions, or `None` if any is symbolic.
    #[must_use]
    pub fn static_dims(&self) -> Option<Vec<i64>> {
        self.dims.iter().map(Expr::as_int).collect()
    }

    /// Returns the constant dimensions or names the first symbolic one.
    pub fn require_static(&self) -> Result<Vec<i64>, IrError> {
        self.dims
            .iter()
            .enumerate()
            .map(|(dim, d)| {
                d.as_int().ok_or_else(|| IrError::NonConstantDim {
                    buf: self.name.clone(),
                    dim,
                })
            })
            .collect()
    }

    /// Builds a load of one element.
    pub fn try_load<I, E>(&self, indices: I) -> Result<Expr, IrError>
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        let indices: Vec<Expr> = indices.into_iter().map(Into::into).collect();
        if indices.len() != self.rank() {
            return Err(IrError::IndexArity {
                buf: self.name.clone(),
                rank: self.rank(),
                got: indices.len(),
            });
        }
        Ok(Expr::Load {
            buf: self.id,
            name: self.name.clone(),
            dtype: self.dtype,
            indices,
        })
    }

    /// Builds a load of one element.
    ///
    /// # Panics
    ///
    /// Panics if the number of indices differs from the rank.
    #[must_use]
    pub fn load<I, E>(&self, indices: I) -> Expr
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        let indices: Vec<Expr> = indices.into_iter().map(Into::into).collect();
        assert_eq!(
            indices.len(),
            self.rank(),
            "load from `{}` with wrong number of indices",
            self.name
        );
        Expr::Load {
            buf: self.id,
            name: self.name.clone(),
            dtype: self.dtype,
            indices,
        }
    }
}

/// The result of lowering an operator: the output buffer and the statement
/// that fills it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    /// The output buffer.
    pub buf: Buf,
    /// The computation writing `buf`.
    pub stmt: Stmt,
}

impl Tensor {
    /// Pairs a buffer with its computation.
    #[must_use]
    pub fn new(buf: Buf, stmt: Stmt) -> Self {
        Self { buf, stmt }
    }

    /// Returns the external call if this computation is delegated.
    #[must_use]
    pub fn external_call(&self) -> Option<&crate::ExternalCall> {
        match &self.stmt {
            Stmt::ExternalCall(call) => Some(call),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Var;

    #[test]
    fn test_static_dims() {
        let buf = Buf::from_static("a", &[2, 3, 4], DType::Float32);
        assert!(buf.is_static());
        assert_eq!(buf.static_dims(), Some(vec![2, 3, 4]));
        assert_eq!(buf.rank(), 3);
    }

    #[test]
    fn test_symbolic_dims() {
        let n = Var::int("N");
        let buf = Buf::new("a", [n.expr(), Expr::int(3)], DType::Float32);
        assert!(!buf.is_static());
        assert_eq!(buf.static_dims(), None);
        assert!(matches!(
            buf.require_static(),
            Err(IrError::NonConstantDim { dim: 0, .. })
        ));
    }

    #[test]
    fn test_try_load_arity() {
        let buf = Buf::from_static("a", &[2, 3], DType::Float32);
        assert!(buf.try_load([Expr::int(0), Expr::int(1)]).is_ok());
        assert!(matches!(
            buf.try_load([Expr::int(0)]),
            Err(IrError::IndexArity { rank: 2, got: 1, .. })
        ));
    }
}
