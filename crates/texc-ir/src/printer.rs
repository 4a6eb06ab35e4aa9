//! Textual rendering of IR as C-like pseudo code.

use std::fmt::{self, Display, Formatter, Write as _};

use crate::{BinOp, Buf, Expr, Stmt, Tensor};

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x, dtype) => match dtype {
                crate::DType::Float32 => write!(f, "{x:?}f"),
                _ => write!(f, "{x:?}"),
            },
            Self::Var(var) => f.write_str(&var.name),
            Self::Binary(op, lhs, rhs) => {
                let symbol = match op {
                    BinOp::Min => return write!(f, "min({lhs}, {rhs})"),
                    BinOp::Max => return write!(f, "max({lhs}, {rhs})"),
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    BinOp::Mod => "%",
                };
                write!(f, "({lhs} {symbol} {rhs})")
            }
            Self::CompareSelect {
                op,
                lhs,
                rhs,
                if_true,
                if_false,
            } => write!(
                f,
                "({lhs} {} {rhs} ? {if_true} : {if_false})",
                op.symbol()
            ),
            Self::IfThenElse {
                cond,
                then,
                otherwise,
            } => write!(f, "IfThenElse({cond}, {then}, {otherwise})"),
            Self::Load { name, indices, .. } => {
                write!(f, "{name}[{}]", join(indices))
            }
        }
    }
}

fn join<T: Display>(items: &[T]) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{item}");
    }
    out
}

fn write_stmt(f: &mut Formatter<'_>, stmt: &Stmt, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    match stmt {
        Stmt::Block(stmts) => {
            for s in stmts {
                write_stmt(f, s, depth)?;
            }
            Ok(())
        }
        Stmt::For(lp) => {
            writeln!(
                f,
                "{pad}for ({} {} = {}; {} < {}; {}++) {{",
                lp.var.dtype.name(),
                lp.var.name,
                lp.start,
                lp.var.name,
                lp.stop,
                lp.var.name
            )?;
            for s in &lp.body {
                write_stmt(f, s, depth + 1)?;
            }
            writeln!(f, "{pad}}}")
        }
        Stmt::Store(store) => writeln!(
            f,
            "{pad}{}[{}] = {};",
            store.name,
            join(&store.indices),
            store.value
        ),
        Stmt::ReduceStore(update) => {
            let target = format!("{}[{}]", update.name, join(&update.indices));
            writeln!(
                f,
                "{pad}{target} = {}({target}, {});",
                update.reducer.name(),
                update.body
            )
        }
        Stmt::ExternalCall(call) => {
            let bufs: Vec<&str> = call.bufs.iter().map(|b| b.name.as_str()).collect();
            writeln!(
                f,
                "{pad}{} = extern {}(buf_args=[{}], args=[{}]);",
                call.buf.name,
                call.kernel,
                bufs.join(", "),
                join(&call.args)
            )
        }
    }
}

impl Display for Stmt {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_stmt(f, self, 0)
    }
}

impl Display for Buf {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}[{}]", self.name, self.dtype.name(), join(&self.dims))
    }
}

impl Display for Tensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "// {}", self.buf)?;
        write!(f, "{}", self.stmt)
    }
}

#[cfg(test)]
mod tests {
    use crate::{reduce, Buf, CmpOp, DType, DimArg, Expr, Reducer, Stmt, Var};

    #[test]
    fn test_expr_display() {
        let i = Var::int("i");
        let e = Expr::compare_select(CmpOp::Ge, &i * 2 - 1, Expr::int(5), 1.into(), 0.into());
        assert_eq!(e.to_string(), "(((i * 2) - 1) >= 5 ? 1 : 0)");
        assert_eq!(Expr::min(i.expr(), Expr::int(3)).to_string(), "min(i, 3)");
        assert_eq!(Expr::float(0.0).to_string(), "0.0f");
    }

    #[test]
    fn test_tensor_display() {
        let a = Buf::from_static("a", &[2, 3], DType::Float32);
        let t = reduce(
            "s",
            &[DimArg::new(2, "i")],
            Reducer::Sum,
            |_| Expr::float(0.0),
            |v| a.load([v[0].expr(), v[1].expr()]),
            &[DimArg::new(3, "j")],
        );
        let text = t.to_string();
        assert!(text.starts_with("// s: float[2]\n"));
        assert!(text.contains("for (int64 i = 0; i < 2; i++) {"));
        assert!(text.contains("s[i] = sum(s[i], a[i, j]);"));
    }

    #[test]
    fn test_external_call_display() {
        let a = Buf::from_static("a", &[3], DType::Float32);
        let out = Buf::from_static("out", &[3], DType::Float32);
        let stmt = Stmt::external_call(out, "k", vec![a], vec![Expr::int(1), Expr::int(2)]);
        assert_eq!(
            stmt.to_string(),
            "out = extern k(buf_args=[a], args=[1, 2]);\n"
        );
    }
}
