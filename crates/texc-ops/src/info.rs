//! Static tensor metadata.

use serde::{Deserialize, Serialize};
use texc_ir::{Buf, DType};

/// Element type and constant shape of a buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorInfo {
    /// Dimension sizes, outermost first.
    pub dims: Vec<i64>,
    /// Element type.
    pub dtype: DType,
}

/// Extracts metadata from `buf`. Returns `None` if any dimension is symbolic.
#[must_use]
pub fn tensor_info(buf: &Buf) -> Option<TensorInfo> {
    Some(TensorInfo {
        dims: buf.static_dims()?,
        dtype: buf.dtype,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use texc_ir::{Expr, Var};

    #[test]
    fn test_static_buffer() {
        let buf = Buf::from_static("w", &[4, 1, 3, 3], DType::Float32);
        assert_eq!(
            tensor_info(&buf),
            Some(TensorInfo {
                dims: vec![4, 1, 3, 3],
                dtype: DType::Float32,
            })
        );
    }

    #[test]
    fn test_symbolic_buffer() {
        let h = Var::int("H");
        let buf = Buf::new("x", [Expr::int(1), h.expr()], DType::Float32);
        assert_eq!(tensor_info(&buf), None);
    }
}
