//! # texc Loop Nest
//!
//! This crate owns a lowered statement tree and exposes the loop
//! transformations operator lowerings apply to it.
//!
//! ## Overview
//!
//! A [`LoopNest`] is the exclusive owner of its statements. Loops are
//! addressed by [`LoopId`] handles:
//!
//! - **Introspection**: the loops enclosing the writes to a buffer, the parent
//!   of a loop, a loop's bounds
//! - **Slicing**: peel a fixed number of iterations off the head or the tail
//!   of a loop, producing two loops over adjacent sub-ranges
//!
//! Slicing retires the sliced handle and returns fresh handles for the two
//! pieces, so a transformation can never act on a loop that no longer exists.
//! Any handle taken before a slice must be re-queried afterwards.
//!
//! ## Example
//!
//! ```text
//! for (i = 0; i < 8; i++) S          slice_head(i, 2)
//!                                 ==>  for (i = 0; i < min(2, 8); i++) S'
//!                                      for (i = min(2, 8); i < 8; i++) S
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use smallvec::SmallVec;
use texc_ir::{BufId, Expr, For, LoopId, Stmt};
use thiserror::Error;
use tracing::debug;

/// Errors from loop-nest queries and transformations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LoopNestError {
    /// The handle does not name a loop in this nest (never did, or was
    /// retired by a slice).
    #[error("loop {id:?} is not part of this nest")]
    UnknownLoop {
        /// The offending handle.
        id: LoopId,
    },

    /// Slice factors must be positive.
    #[error("invalid slice factor {factor}")]
    InvalidFactor {
        /// The offending factor.
        factor: i64,
    },
}

/// The two loops produced by a slice. A side is `None` when the slice was a
/// no-op because the loop had no more iterations than the factor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slice {
    /// The loop over the leading sub-range.
    pub head: Option<LoopId>,
    /// The loop over the trailing sub-range.
    pub tail: Option<LoopId>,
}

/// Loops enclosing a statement, outermost first.
pub type LoopPath = SmallVec<[LoopId; 8]>;

struct Write {
    path: LoopPath,
    is_reduction: bool,
}

/// Mutable owner of a statement tree.
#[derive(Clone, Debug, PartialEq)]
pub struct LoopNest {
    stmts: Vec<Stmt>,
}

impl LoopNest {
    /// Takes ownership of `root`.
    #[must_use]
    pub fn new(root: Stmt) -> Self {
        let stmts = match root {
            Stmt::Block(stmts) => stmts,
            other => vec![other],
        };
        Self { stmts }
    }

    /// Returns the top-level statements.
    #[must_use]
    pub fn root(&self) -> &[Stmt] {
        &self.stmts
    }

    /// Releases the statement tree.
    #[must_use]
    pub fn into_stmt(mut self) -> Stmt {
        if self.stmts.len() == 1 {
            self.stmts.remove(0)
        } else {
            Stmt::Block(self.stmts)
        }
    }

    /// Returns the loop named by `id`.
    pub fn get(&self, id: LoopId) -> Result<&For, LoopNestError> {
        find(&self.stmts, id).ok_or(LoopNestError::UnknownLoop { id })
    }

    /// Returns `(start, stop)` of a loop.
    pub fn loop_bounds(&self, id: LoopId) -> Result<(&Expr, &Expr), LoopNestError> {
        self.get(id).map(|lp| (&lp.start, &lp.stop))
    }

    /// Every loop in the nest, in pre-order.
    #[must_use]
    pub fn loops(&self) -> Vec<LoopId> {
        fn walk(stmts: &[Stmt], out: &mut Vec<LoopId>) {
            for stmt in stmts {
                match stmt {
                    Stmt::Block(inner) => walk(inner, out),
                    Stmt::For(lp) => {
                        out.push(lp.id);
                        walk(&lp.body, out);
                    }
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.stmts, &mut out);
        out
    }

    /// For every statement writing `buf`, in program order, the loops
    /// enclosing it.
    #[must_use]
    pub fn all_loop_nests_writing_to(&self, buf: BufId) -> Vec<LoopPath> {
        self.writes_to(buf).into_iter().map(|w| w.path).collect()
    }

    /// The loops enclosing the computation of `buf`.
    ///
    /// For a reduction whose only writes are its initializer and its update,
    /// these are the loops around the update (output loops followed by
    /// reduction loops). Otherwise they are the loops shared by every write.
    #[must_use]
    pub fn loop_stmts_for(&self, buf: BufId) -> Vec<LoopId> {
        let writes = self.writes_to(buf);
        if let [_, update] = writes.as_slice() {
            if update.is_reduction {
                return update.path.to_vec();
            }
        }
        let Some((first, rest)) = writes.split_first() else {
            return Vec::new();
        };
        let shared = rest.iter().fold(first.path.len(), |len, w| {
            first.path[..len]
                .iter()
                .zip(&w.path)
                .take_while(|(a, b)| a == b)
                .count()
        });
        first.path[..shared].to_vec()
    }

    /// The innermost loop strictly enclosing `id`, if any.
    pub fn parent_loop(&self, id: LoopId) -> Result<Option<LoopId>, LoopNestError> {
        fn walk(stmts: &[Stmt], id: LoopId, path: &mut LoopPath) -> bool {
            for stmt in stmts {
                match stmt {
                    Stmt::Block(inner) => {
                        if walk(inner, id, path) {
                            return true;
                        }
                    }
                    Stmt::For(lp) => {
                        if lp.id == id {
                            return true;
                        }
                        path.push(lp.id);
                        if walk(&lp.body, id, path) {
                            return true;
                        }
                        path.pop();
                    }
                    _ => {}
                }
            }
            false
        }
        let mut path = LoopPath::new();
        if walk(&self.stmts, id, &mut path) {
            Ok(path.last().copied())
        } else {
            Err(LoopNestError::UnknownLoop { id })
        }
    }

    /// Peels the first `factor` iterations of loop `id` into their own loop.
    ///
    /// The head iterates `[start, min(start + factor, stop))` over a copy of
    /// the body whose loops get fresh handles; the tail iterates the rest over
    /// the original body. If the loop has constant bounds and at most
    /// `factor` iterations it is left alone and returned as the head.
    pub fn slice_head(&mut self, id: LoopId, factor: i64) -> Result<Slice, LoopNestError> {
        let Some(lp) = self.take_sliceable(id, factor)? else {
            return Ok(Slice {
                head: Some(id),
                tail: None,
            });
        };
        let split = Expr::min(lp.start.clone() + factor, lp.stop.clone());
        let (head, tail) = split_at(lp, split, true);
        debug!(loop = ?id, factor, head = ?head.id, tail = ?tail.id, "sliced loop head");
        Ok(self.replace(id, head, tail))
    }

    /// Peels the last `factor` iterations of loop `id` into their own loop.
    ///
    /// The tail iterates `[max(stop - factor, start), stop)` over a copy of the
    /// body whose loops get fresh handles; the head iterates the rest over the
    /// original body. If the loop has constant bounds and at most `factor`
    /// iterations it is left alone and returned as the tail.
    pub fn slice_tail(&mut self, id: LoopId, factor: i64) -> Result<Slice, LoopNestError> {
        let Some(lp) = self.take_sliceable(id, factor)? else {
            return Ok(Slice {
                head: None,
                tail: Some(id),
            });
        };
        let split = Expr::max(lp.stop.clone() - factor, lp.start.clone());
        let (head, tail) = split_at(lp, split, false);
        debug!(loop = ?id, factor, head = ?head.id, tail = ?tail.id, "sliced loop tail");
        Ok(self.replace(id, head, tail))
    }

    /// Returns a copy of the loop when it should be split, `None` when the
    /// slice is a no-op.
    fn take_sliceable(&self, id: LoopId, factor: i64) -> Result<Option<For>, LoopNestError> {
        if factor <= 0 {
            return Err(LoopNestError::InvalidFactor { factor });
        }
        let lp = self.get(id)?;
        match lp.constant_extent() {
            Some(extent) if factor >= extent => Ok(None),
            _ => Ok(Some(lp.clone())),
        }
    }

    fn replace(&mut self, id: LoopId, head: For, tail: For) -> Slice {
        let slice = Slice {
            head: Some(head.id),
            tail: Some(tail.id),
        };
        if let Some((container, pos)) = locate_mut(&mut self.stmts, id) {
            container.splice(pos..=pos, [Stmt::For(head), Stmt::For(tail)]);
        }
        slice
    }

    fn writes_to(&self, buf: BufId) -> Vec<Write> {
        fn walk(stmts: &[Stmt], buf: BufId, path: &mut LoopPath, out: &mut Vec<Write>) {
            for stmt in stmts {
                match stmt {
                    Stmt::Block(inner) => walk(inner, buf, path, out),
                    Stmt::For(lp) => {
                        path.push(lp.id);
                        walk(&lp.body, buf, path, out);
                        path.pop();
                    }
                    other if other.written_buf() == Some(buf) => out.push(Write {
                        path: path.clone(),
                        is_reduction: matches!(other, Stmt::ReduceStore(_)),
                    }),
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.stmts, buf, &mut LoopPath::new(), &mut out);
        out
    }
}

/// Splits `lp` at `split`. The side selected by `peel_head` gets a copy of
/// the body with fresh loop handles.
fn split_at(lp: For, split: Expr, peel_head: bool) -> (For, For) {
    let mut copy = lp.body.clone();
    copy.iter_mut().for_each(Stmt::refresh_loop_ids);
    let (head_body, tail_body) = if peel_head {
        (copy, lp.body)
    } else {
        (lp.body, copy)
    };
    let head = For::new(lp.var.clone(), lp.start, split.clone(), head_body);
    let tail = For::new(lp.var, split, lp.stop, tail_body);
    (head, tail)
}

fn find(stmts: &[Stmt], id: LoopId) -> Option<&For> {
    stmts.iter().find_map(|stmt| match stmt {
        Stmt::Block(inner) => find(inner, id),
        Stmt::For(lp) if lp.id == id => Some(lp),
        Stmt::For(lp) => find(&lp.body, id),
        _ => None,
    })
}

fn locate_mut(stmts: &mut Vec<Stmt>, id: LoopId) -> Option<(&mut Vec<Stmt>, usize)> {
    if let Some(pos) = stmts
        .iter()
        .position(|s| matches!(s, Stmt::For(lp) if lp.id == id))
    {
        return Some((stmts, pos));
    }
    for stmt in stmts.iter_mut() {
        let found = match stmt {
            Stmt::Block(inner) => locate_mut(inner, id),
            Stmt::For(lp) => locate_mut(&mut lp.body, id),
            _ => None,
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use texc_ir::{reduce, Buf, DType, DimArg, Evaluator, Reducer, Tensor};

    /// `out[i, j] = sum_k a[i, j, k] * (i + j)` over a 5x7x3 input.
    fn sample() -> (Buf, Tensor) {
        let a = Buf::from_static("a", &[5, 7, 3], DType::Float32);
        let t = reduce(
            "out",
            &[DimArg::new(5, "i"), DimArg::new(7, "j")],
            Reducer::Sum,
            |_| Expr::float(0.0),
            |v| {
                a.load([v[0].expr(), v[1].expr(), v[2].expr()])
                    * (Expr::float(1.0) * (&v[0] + &v[1]))
            },
            &[DimArg::new(3, "k")],
        );
        (a, t)
    }

    fn run(a: &Buf, out: &Buf, stmt: &Stmt) -> Vec<f64> {
        let mut ev = Evaluator::new();
        let data = (0..105).map(|x| f64::from(x) * 0.25 - 3.0).collect();
        ev.bind_buffer(a, data).unwrap();
        ev.run_tensor(&Tensor::new(out.clone(), stmt.clone()))
            .unwrap()
            .data
            .clone()
    }

    #[test]
    fn test_loop_stmts_for_reduction() {
        let (_, t) = sample();
        let nest = LoopNest::new(t.stmt.clone());
        let loops = nest.loop_stmts_for(t.buf.id);
        assert_eq!(loops.len(), 3);
        assert_eq!(nest.all_loop_nests_writing_to(t.buf.id).len(), 2);
        assert_eq!(nest.all_loop_nests_writing_to(t.buf.id)[0].len(), 2);
        assert_eq!(nest.parent_loop(loops[2]).unwrap(), Some(loops[1]));
        assert_eq!(nest.parent_loop(loops[0]).unwrap(), None);
    }

    #[test]
    fn test_slice_head_preserves_semantics() {
        let (a, t) = sample();
        let expected = run(&a, &t.buf, &t.stmt);

        let mut nest = LoopNest::new(t.stmt.clone());
        let j = nest.loop_stmts_for(t.buf.id)[1];
        let slice = nest.slice_head(j, 2).unwrap();
        let (head, tail) = (slice.head.unwrap(), slice.tail.unwrap());

        assert_eq!(nest.get(head).unwrap().constant_extent(), Some(2));
        assert_eq!(nest.get(tail).unwrap().constant_extent(), Some(5));
        assert_eq!(
            nest.get(j),
            Err(LoopNestError::UnknownLoop { id: j })
        );
        assert_eq!(run(&a, &t.buf, &nest.clone().into_stmt()), expected);
    }

    #[test]
    fn test_slice_tail_preserves_semantics() {
        let (a, t) = sample();
        let expected = run(&a, &t.buf, &t.stmt);

        let mut nest = LoopNest::new(t.stmt.clone());
        let i = nest.loop_stmts_for(t.buf.id)[0];
        let slice = nest.slice_tail(i, 1).unwrap();
        assert_eq!(
            nest.get(slice.head.unwrap()).unwrap().constant_extent(),
            Some(4)
        );
        assert_eq!(
            nest.get(slice.tail.unwrap()).unwrap().constant_extent(),
            Some(1)
        );
        assert_eq!(nest.root().len(), 2);
        assert_eq!(run(&a, &t.buf, &nest.into_stmt()), expected);
    }

    #[test]
    fn test_sliced_copies_get_fresh_handles() {
        let (_, t) = sample();
        let mut nest = LoopNest::new(t.stmt.clone());
        let before = nest.loops().len();
        let i = nest.loop_stmts_for(t.buf.id)[0];
        nest.slice_head(i, 1).unwrap();

        let loops = nest.loops();
        assert_eq!(loops.len(), 2 * before);
        let mut unique = loops.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), loops.len());
    }

    #[test]
    fn test_shared_loops_after_slice() {
        let (_, t) = sample();
        let mut nest = LoopNest::new(t.stmt.clone());
        let loops = nest.loop_stmts_for(t.buf.id);
        nest.slice_head(loops[1], 3).unwrap();

        // Writes now live under two `j` loops; only `i` encloses them all.
        assert_eq!(nest.loop_stmts_for(t.buf.id), vec![loops[0]]);
        assert_eq!(nest.all_loop_nests_writing_to(t.buf.id).len(), 4);
    }

    #[test]
    fn test_slice_too_short_is_noop() {
        let (_, t) = sample();
        let mut nest = LoopNest::new(t.stmt.clone());
        let k = nest.loop_stmts_for(t.buf.id)[2];

        let slice = nest.slice_head(k, 3).unwrap();
        assert_eq!(slice, Slice { head: Some(k), tail: None });
        let slice = nest.slice_tail(k, 5).unwrap();
        assert_eq!(slice, Slice { head: None, tail: Some(k) });
        assert_eq!(nest.into_stmt(), t.stmt);
    }

    #[test]
    fn test_invalid_factor() {
        let (_, t) = sample();
        let mut nest = LoopNest::new(t.stmt.clone());
        let i = nest.loops()[0];
        assert_eq!(
            nest.slice_head(i, 0),
            Err(LoopNestError::InvalidFactor { factor: 0 })
        );
    }

    #[test]
    fn test_symbolic_bounds_use_min_max() {
        let n = texc_ir::Var::int("N");
        let i = texc_ir::Var::int("i");
        let out = Buf::new("out", [n.expr()], DType::Float32);
        let stmt = Stmt::For(For::new(
            i.clone(),
            Expr::int(0),
            n.expr(),
            vec![Stmt::store(&out, vec![i.expr()], Expr::float(1.0))],
        ));
        let mut nest = LoopNest::new(stmt);
        let id = nest.loops()[0];
        let slice = nest.slice_tail(id, 2).unwrap();

        let (_, stop) = nest.loop_bounds(slice.head.unwrap()).unwrap();
        assert_eq!(stop.to_string(), "max((N - 2), 0)");

        let mut ev = Evaluator::new();
        ev.bind_var(&n, 1);
        let data = ev
            .run_tensor(&Tensor::new(out, nest.into_stmt()))
            .unwrap();
        assert_eq!(data.data, vec![1.0]);
    }
}
