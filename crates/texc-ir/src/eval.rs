//! A reference interpreter for statement trees.
//!
//! The interpreter is the ground truth for loop transformations: a
//! transformed nest must produce exactly the same buffer contents as the
//! original. Buffers hold `f64` values in row-major order; stores into a
//! `Float32` buffer and arithmetic on `Float32` operands round through `f32`,
//! so results match single-precision execution bit for bit.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::{Buf, BufId, DType, Expr, Stmt, Tensor, Var, VarId};

/// Errors raised while evaluating IR.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum EvalError {
    /// A variable was read before being bound.
    #[error("unbound variable `{name}`")]
    UnboundVar {
        /// Variable name.
        name: String,
    },

    /// A buffer was accessed before being bound or allocated.
    #[error("unbound buffer `{name}`")]
    UnboundBuffer {
        /// Buffer name.
        name: String,
    },

    /// A load or store fell outside its buffer.
    #[error("access to `{name}` at {indices:?} is out of bounds for dims {dims:?}")]
    OutOfBounds {
        /// Buffer name.
        name: String,
        /// Offending indices.
        indices: Vec<i64>,
        /// Buffer dimensions.
        dims: Vec<usize>,
    },

    /// Integer division or remainder by zero.
    #[error("integer division by zero")]
    DivisionByZero,

    /// An index, bound or size evaluated to a float.
    #[error("expected an integer, got {value}")]
    NotAnInteger {
        /// The offending value.
        value: f64,
    },

    /// Buffer data does not match the buffer's shape.
    #[error("buffer `{name}` expects {expected} elements, got {got}")]
    SizeMismatch {
        /// Buffer name.
        name: String,
        /// Element count implied by the dims.
        expected: usize,
        /// Element count supplied.
        got: usize,
    },

    /// A buffer dimension evaluated to a negative number.
    #[error("buffer `{name}` has negative dimension {dim}")]
    NegativeDim {
        /// Buffer name.
        name: String,
        /// The dimension value.
        dim: i64,
    },

    /// No kernel registered under this name.
    #[error("no external kernel registered as `{kernel}`")]
    UnknownKernel {
        /// Kernel name.
        kernel: String,
    },
}

/// Concrete contents of a buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferData {
    /// Dimension sizes.
    pub dims: Vec<usize>,
    /// Row-major elements.
    pub data: Vec<f64>,
    /// Element type.
    pub dtype: DType,
}

impl BufferData {
    /// Zero-filled buffer.
    #[must_use]
    pub fn zeros(dims: Vec<usize>, dtype: DType) -> Self {
        let len = dims.iter().product();
        Self {
            dims,
            data: vec![0.0; len],
            dtype,
        }
    }

    /// Row-major offset of `indices`, or `None` when out of bounds.
    #[must_use]
    pub fn offset(&self, indices: &[i64]) -> Option<usize> {
        if indices.len() != self.dims.len() {
            return None;
        }
        let mut offset = 0usize;
        for (&i, &d) in indices.iter().zip(&self.dims) {
            let i = usize::try_from(i).ok().filter(|&i| i < d)?;
            offset = offset * d + i;
        }
        Some(offset)
    }

    /// Element at `indices`, or `None` when out of bounds.
    #[must_use]
    pub fn get(&self, indices: &[i64]) -> Option<f64> {
        self.offset(indices).map(|o| self.data[o])
    }
}

/// A native implementation standing in for a delegated kernel. Receives the
/// output buffer, the buffer operands and the scalar operands.
pub type ExternalKernel =
    Box<dyn Fn(&mut BufferData, &[&BufferData], &[i64]) -> Result<(), EvalError>>;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Scalar {
    Int(i64),
    Float(f64, DType),
}

impl Scalar {
    fn as_f64(self) -> f64 {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(n) => n as f64,
            Self::Float(x, _) => x,
        }
    }

    fn as_int(self) -> Result<i64, EvalError> {
        match self {
            Self::Int(n) => Ok(n),
            Self::Float(value, _) => Err(EvalError::NotAnInteger { value }),
        }
    }
}

fn round_to(value: f64, dtype: DType) -> f64 {
    match dtype {
        #[allow(clippy::cast_possible_truncation)]
        DType::Float32 => f64::from(value as f32),
        _ => value,
    }
}

/// Interpreter state: variable bindings, buffers and external kernels.
#[derive(Default)]
pub struct Evaluator {
    vars: FxHashMap<VarId, i64>,
    buffers: FxHashMap<BufId, BufferData>,
    kernels: FxHashMap<String, ExternalKernel>,
}

impl Evaluator {
    /// Creates an empty evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a symbolic size variable.
    pub fn bind_var(&mut self, var: &Var, value: i64) {
        self.vars.insert(var.id, value);
    }

    /// Binds input data to `buf`. Dims are evaluated with the current
    /// variable bindings.
    pub fn bind_buffer(&mut self, buf: &Buf, data: Vec<f64>) -> Result<(), EvalError> {
        let dims = self.concrete_dims(buf)?;
        let expected: usize = dims.iter().product();
        if expected != data.len() {
            return Err(EvalError::SizeMismatch {
                name: buf.name.clone(),
                expected,
                got: data.len(),
            });
        }
        let data = data.into_iter().map(|x| round_to(x, buf.dtype)).collect();
        self.buffers.insert(
            buf.id,
            BufferData {
                dims,
                data,
                dtype: buf.dtype,
            },
        );
        Ok(())
    }

    /// Allocates a zero-filled buffer for `buf`.
    pub fn allocate(&mut self, buf: &Buf) -> Result<(), EvalError> {
        let dims = self.concrete_dims(buf)?;
        self.buffers
            .insert(buf.id, BufferData::zeros(dims, buf.dtype));
        Ok(())
    }

    /// Registers a kernel for external calls named `name`.
    pub fn register_kernel(&mut self, name: impl Into<String>, kernel: ExternalKernel) {
        self.kernels.insert(name.into(), kernel);
    }

    /// Returns the contents of `buf`.
    #[must_use]
    pub fn buffer(&self, buf: &Buf) -> Option<&BufferData> {
        self.buffers.get(&buf.id)
    }

    /// Allocates the output of `tensor`, runs its statement and returns the
    /// output contents.
    pub fn run_tensor(&mut self, tensor: &Tensor) -> Result<&BufferData, EvalError> {
        self.allocate(&tensor.buf)?;
        self.run(&tensor.stmt)?;
        self.buffers
            .get(&tensor.buf.id)
            .ok_or_else(|| EvalError::UnboundBuffer {
                name: tensor.buf.name.clone(),
            })
    }

    /// Executes a statement.
    pub fn run(&mut self, stmt: &Stmt) -> Result<(), EvalError> {
        match stmt {
            Stmt::Block(stmts) => stmts.iter().try_for_each(|s| self.run(s)),
            Stmt::For(lp) => {
                let start = self.eval(&lp.start)?.as_int()?;
                let stop = self.eval(&lp.stop)?.as_int()?;
                let saved = self.vars.get(&lp.var.id).copied();
                for i in start..stop {
                    self.vars.insert(lp.var.id, i);
                    for s in &lp.body {
                        self.run(s)?;
                    }
                }
                match saved {
                    Some(v) => self.vars.insert(lp.var.id, v),
                    None => self.vars.remove(&lp.var.id),
                };
                Ok(())
            }
            Stmt::Store(store) => {
                let indices = self.eval_indices(&store.indices)?;
                let value = self.eval(&store.value)?.as_f64();
                self.write(store.buf, &store.name, &indices, |_| value)
            }
            Stmt::ReduceStore(update) => {
                let indices = self.eval_indices(&update.indices)?;
                let value = self.eval(&update.body)?.as_f64();
                let reducer = update.reducer;
                self.write(update.buf, &update.name, &indices, |acc| {
                    reducer.combine(acc, value)
                })
            }
            Stmt::ExternalCall(call) => {
                let args = call
                    .args
                    .iter()
                    .map(|a| self.eval(a).and_then(Scalar::as_int))
                    .collect::<Result<Vec<_>, _>>()?;
                let kernel = self
                    .kernels
                    .get(&call.kernel)
                    .ok_or_else(|| EvalError::UnknownKernel {
                        kernel: call.kernel.clone(),
                    })?;
                let mut out = match self.buffers.remove(&call.buf.id) {
                    Some(out) => out,
                    None => BufferData::zeros(self.concrete_dims(&call.buf)?, call.buf.dtype),
                };
                let result = call
                    .bufs
                    .iter()
                    .map(|b| {
                        self.buffers.get(&b.id).ok_or_else(|| EvalError::UnboundBuffer {
                            name: b.name.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .and_then(|inputs| kernel(&mut out, &inputs, &args));
                self.buffers.insert(call.buf.id, out);
                result
            }
        }
    }

    fn write(
        &mut self,
        buf: BufId,
        name: &str,
        indices: &[i64],
        f: impl FnOnce(f64) -> f64,
    ) -> Result<(), EvalError> {
        let data = self
            .buffers
            .get_mut(&buf)
            .ok_or_else(|| EvalError::UnboundBuffer {
                name: name.to_string(),
            })?;
        let offset = data.offset(indices).ok_or_else(|| EvalError::OutOfBounds {
            name: name.to_string(),
            indices: indices.to_vec(),
            dims: data.dims.clone(),
        })?;
        data.data[offset] = round_to(f(data.data[offset]), data.dtype);
        Ok(())
    }

    fn concrete_dims(&self, buf: &Buf) -> Result<Vec<usize>, EvalError> {
        buf.dims
            .iter()
            .map(|d| {
                let dim = self.eval(d)?.as_int()?;
                usize::try_from(dim).map_err(|_| EvalError::NegativeDim {
                    name: buf.name.clone(),
                    dim,
                })
            })
            .collect()
    }

    fn eval_indices(&self, indices: &[Expr]) -> Result<Vec<i64>, EvalError> {
        indices
            .iter()
            .map(|i| self.eval(i).and_then(Scalar::as_int))
            .collect()
    }

    /// Evaluates an integer-valued expression.
    pub fn eval_int(&self, expr: &Expr) -> Result<i64, EvalError> {
        self.eval(expr)?.as_int()
    }

    fn eval(&self, expr: &Expr) -> Result<Scalar, EvalError> {
        match expr {
            Expr::Int(n) => Ok(Scalar::Int(*n)),
            Expr::Float(x, dtype) => Ok(Scalar::Float(round_to(*x, *dtype), *dtype)),
            Expr::Var(var) => self
                .vars
                .get(&var.id)
                .map(|&v| Scalar::Int(v))
                .ok_or_else(|| EvalError::UnboundVar {
                    name: var.name.clone(),
                }),
            Expr::Binary(op, lhs, rhs) => match (self.eval(lhs)?, self.eval(rhs)?) {
                (Scalar::Int(a), Scalar::Int(b)) => op
                    .apply_int(a, b)
                    .map(Scalar::Int)
                    .ok_or(EvalError::DivisionByZero),
                (a, b) => {
                    let dtype = match (a, b) {
                        (Scalar::Float(_, x), Scalar::Float(_, y)) => x.promote(y),
                        (Scalar::Float(_, x), _) | (_, Scalar::Float(_, x)) => x,
                        _ => DType::Float64,
                    };
                    let value = op.apply_float(a.as_f64(), b.as_f64());
                    Ok(Scalar::Float(round_to(value, dtype), dtype))
                }
            },
            Expr::CompareSelect {
                op,
                lhs,
                rhs,
                if_true,
                if_false,
            } => {
                let holds = match (self.eval(lhs)?, self.eval(rhs)?) {
                    (Scalar::Int(a), Scalar::Int(b)) => op.holds(a, b),
                    (a, b) => op.holds(a.as_f64(), b.as_f64()),
                };
                let t = self.eval(if_true)?;
                let f = self.eval(if_false)?;
                Ok(if holds { t } else { f })
            }
            Expr::IfThenElse {
                cond,
                then,
                otherwise,
            } => {
                let taken = match self.eval(cond)? {
                    Scalar::Int(c) => c != 0,
                    Scalar::Float(c, _) => c != 0.0,
                };
                self.eval(if taken { then } else { otherwise })
            }
            Expr::Load {
                buf,
                name,
                dtype,
                indices,
            } => {
                let indices = self.eval_indices(indices)?;
                let data = self
                    .buffers
                    .get(buf)
                    .ok_or_else(|| EvalError::UnboundBuffer { name: name.clone() })?;
                let value = data.get(&indices).ok_or_else(|| EvalError::OutOfBounds {
                    name: name.clone(),
                    indices: indices.clone(),
                    dims: data.dims.clone(),
                })?;
                if dtype.is_float() {
                    return Ok(Scalar::Float(value, *dtype));
                }
                #[allow(clippy::cast_possible_truncation)]
                let value = value as i64;
                Ok(Scalar::Int(value))
            }
        }
    }
}
