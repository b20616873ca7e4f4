//! Map maintenance parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the map maintainer
#[derive(Deserialize, Debug, Clone)]
pub struct Params {
    /// Half width of the square marked around each scan hit
    ///
    /// Units: cells
    pub inflation_radius_cells: usize,

    /// Number of updates after which newly marked cells are cleared again. Clearing happens on
    /// the update where the counter first exceeds this value.
    #[serde(default = "default_decay_period")]
    pub decay_period_cycles: usize,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_decay_period() -> usize {
    50
}
