//! Lowering configuration.

use serde::{Deserialize, Serialize};

/// Switches for the specialized conv2d lowering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowerConfig {
    /// Lower supported depthwise convolutions in IR. When off, every conv2d
    /// is delegated to the external kernel.
    pub enable_depthwise: bool,
    /// Peel the padded border iterations of the spatial loops.
    pub enable_loop_peeling: bool,
}

impl Default for LowerConfig {
    fn default() -> Self {
        Self {
            enable_depthwise: true,
            enable_loop_peeling: true,
        }
    }
}

impl LowerConfig {
    /// Configuration that builds the depthwise reduction without peeling.
    #[must_use]
    pub fn unpeeled() -> Self {
        Self {
            enable_loop_peeling: false,
            ..Self::default()
        }
    }
}
