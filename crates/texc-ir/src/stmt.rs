//! Statements.

use serde::{Deserialize, Serialize};

use crate::{fresh, Buf, BufId, Expr, LoopId, Reducer, Var};

/// Statements.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// A sequence of statements.
    Block(Vec<Stmt>),
    /// A counted loop.
    For(For),
    /// `buf[indices] = value`.
    Store(Store),
    /// `buf[indices] = reducer(buf[indices], body)`.
    ReduceStore(ReduceStore),
    /// A call into a precompiled kernel that fills its output buffer.
    ExternalCall(ExternalCall),
}

/// A counted loop over `[start, stop)` with step 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct For {
    /// Loop handle, unique within a loop nest.
    pub id: LoopId,
    /// Induction variable.
    pub var: Var,
    /// Lower bound (inclusive).
    pub start: Expr,
    /// Upper bound (exclusive).
    pub stop: Expr,
    /// Loop body.
    pub body: Vec<Stmt>,
}

impl For {
    /// Creates a loop with a fresh id.
    #[must_use]
    pub fn new(var: Var, start: Expr, stop: Expr, body: Vec<Stmt>) -> Self {
        Self {
            id: fresh(),
            var,
            start,
            stop,
            body,
        }
    }

    /// Returns the trip count when both bounds are constants.
    #[must_use]
    pub fn constant_extent(&self) -> Option<i64> {
        Some(self.stop.as_int()? - self.start.as_int()?)
    }
}

/// A plain store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Store {
    /// Target buffer.
    pub buf: BufId,
    /// Target name, for printing.
    pub name: String,
    /// One index per dimension.
    pub indices: Vec<Expr>,
    /// Stored value.
    pub value: Expr,
}

/// A reduction update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReduceStore {
    /// Accumulator buffer.
    pub buf: BufId,
    /// Accumulator name, for printing.
    pub name: String,
    /// One index per dimension.
    pub indices: Vec<Expr>,
    /// How `body` is combined into the accumulator.
    pub reducer: Reducer,
    /// The value folded in on each iteration.
    pub body: Expr,
}

/// A delegation record: the output is produced by an opaque native kernel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExternalCall {
    /// Output buffer.
    pub buf: Buf,
    /// Kernel identifier.
    pub kernel: String,
    /// Buffer operands.
    pub bufs: Vec<Buf>,
    /// Scalar operands.
    pub args: Vec<Expr>,
}

impl Stmt {
    /// Store into `buf`.
    #[must_use]
    pub fn store(buf: &Buf, indices: Vec<Expr>, value: Expr) -> Self {
        Self::Store(Store {
            buf: buf.id,
            name: buf.name.clone(),
            indices,
            value,
        })
    }

    /// Reduction update of `buf`.
    #[must_use]
    pub fn reduce_store(buf: &Buf, indices: Vec<Expr>, reducer: Reducer, body: Expr) -> Self {
        Self::ReduceStore(ReduceStore {
            buf: buf.id,
            name: buf.name.clone(),
            indices,
            reducer,
            body,
        })
    }

    /// External call filling `buf`.
    #[must_use]
    pub fn external_call(
        buf: Buf,
        kernel: impl Into<String>,
        bufs: Vec<Buf>,
        args: Vec<Expr>,
    ) -> Self {
        Self::ExternalCall(ExternalCall {
            buf,
            kernel: kernel.into(),
            bufs,
            args,
        })
    }

    /// Returns the buffer this statement writes directly, if any.
    #[must_use]
    pub fn written_buf(&self) -> Option<BufId> {
        match self {
            Self::Store(s) => Some(s.buf),
            Self::ReduceStore(s) => Some(s.buf),
            Self::ExternalCall(c) => Some(c.buf.id),
            Self::Block(_) | Self::For(_) => None,
        }
    }

    /// Gives every loop in this tree a fresh id.
    pub fn refresh_loop_ids(&mut self) {
        match self {
            Self::Block(stmts) => stmts.iter_mut().for_each(Self::refresh_loop_ids),
            Self::For(lp) => {
                lp.id = fresh();
                lp.body.iter_mut().for_each(Self::refresh_loop_ids);
            }
            Self::Store(_) | Self::ReduceStore(_) | Self::ExternalCall(_) => {}
        }
    }

    /// Counts the loops in this tree.
    #[must_use]
    pub fn loop_count(&self) -> usize {
        match self {
            Self::Block(stmts) => stmts.iter().map(Self::loop_count).sum(),
            Self::For(lp) => 1 + lp.body.iter().map(Self::loop_count).sum::<usize>(),
            Self::Store(_) | Self::ReduceStore(_) | Self::ExternalCall(_) => 0,
        }
    }
}
