//! Boundary peeling for depthwise 3x3 convolutions.
//!
//! With padding 1 only the first and last output rows and columns can touch
//! the padded border. Splitting those iterations off the spatial loops leaves
//! interior loops whose masks are always false, which a later simplifier can
//! drop.
//!
//! - stride 2: peel the first two iterations of `ow`, then of `oh`
//! - stride 1: peel the first and last iteration of `ow`, then of `oh`
//!
//! Width is always split before height.

use serde::{Deserialize, Serialize};
use texc_ir::{Buf, LoopId};
use texc_loop_nest::LoopNest;
use tracing::debug;

use crate::LowerError;

/// Position of the output-height loop in the depthwise nest.
const LOOP_H: usize = 2;
/// Position of the output-width loop in the depthwise nest.
const LOOP_W: usize = 3;

/// Which peeling was applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeelPattern {
    /// The nest was left unchanged.
    None,
    /// Leading iterations of width and height were peeled (stride 2).
    Heads,
    /// Leading and trailing iterations of width and height were peeled
    /// (stride 1).
    HeadsAndTails,
}

/// Peels the border iterations of the spatial loops computing `out`.
///
/// Applies only to 3x3 kernels with padding 1 and stride 1 or 2; any other
/// combination leaves `nest` untouched.
pub fn peel_depthwise_boundaries(
    nest: &mut LoopNest,
    out: &Buf,
    kernel: i64,
    stride: i64,
    pad: i64,
) -> Result<PeelPattern, LowerError> {
    match (kernel, stride, pad) {
        (3, 2, 1) => {
            peel_heads(nest, out)?;
            Ok(PeelPattern::Heads)
        }
        (3, 1, 1) => {
            peel_heads_and_tails(nest, out)?;
            Ok(PeelPattern::HeadsAndTails)
        }
        _ => Ok(PeelPattern::None),
    }
}

fn peel_heads(nest: &mut LoopNest, out: &Buf) -> Result<(), LowerError> {
    let width = spatial_loop(&nest.loop_stmts_for(out.id), LOOP_W, "width")?;
    let slice = nest.slice_head(width, 2)?;
    debug!(buf = %out.name, ?slice, "peeled width head");

    // The width split moved the writes apart; the height loop is found
    // again among the loops they still share.
    let height = spatial_loop(&nest.loop_stmts_for(out.id), LOOP_H, "height")?;
    let slice = nest.slice_head(height, 2)?;
    debug!(buf = %out.name, ?slice, "peeled height head");
    Ok(())
}

fn peel_heads_and_tails(nest: &mut LoopNest, out: &Buf) -> Result<(), LowerError> {
    let nests = nest.all_loop_nests_writing_to(out.id);
    let update = nests.get(1).ok_or(LowerError::Peel { dim: "width" })?;
    let width = spatial_loop(update, LOOP_W, "width")?;
    let main =
        peel_both_ends(nest, width, "width")?.ok_or(LowerError::Peel { dim: "width" })?;

    let height = nest
        .parent_loop(main)?
        .ok_or(LowerError::Peel { dim: "height" })?;
    // Nothing follows the height split, so a two-row output with no
    // interior is fine.
    peel_both_ends(nest, height, "height")?;
    Ok(())
}

/// Peels one iteration off each end of `id` and returns the interior loop,
/// or `None` when only the trailing iteration was left after the head.
fn peel_both_ends(
    nest: &mut LoopNest,
    id: LoopId,
    dim: &'static str,
) -> Result<Option<LoopId>, LowerError> {
    let rest = nest
        .slice_head(id, 1)?
        .tail
        .ok_or(LowerError::Peel { dim })?;
    let main = nest.slice_tail(rest, 1)?.head;
    debug!(dim, ?main, "peeled head and tail");
    Ok(main)
}

fn spatial_loop(loops: &[LoopId], index: usize, dim: &'static str) -> Result<LoopId, LowerError> {
    loops
        .get(index)
        .copied()
        .ok_or(LowerError::Peel { dim })
}
