use serde::{Deserialize, Serialize};

/// Grid size used when a channel opens without an immediate resize.
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 30;

/// Bounds applied to every resize, on both axes.
pub const MIN_DIMENSION: u16 = 1;
pub const MAX_DIMENSION: u16 = 1000;

/// A terminal grid size in character cells.
///
/// Values built through [`TermSize::clamped`] always satisfy
/// `MIN_DIMENSION <= cols, rows <= MAX_DIMENSION`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    /// Build a size from untrusted values, clamping each axis into range.
    pub fn clamped(cols: i64, rows: i64) -> Self {
        Self {
            cols: clamp_dimension(cols),
            rows: clamp_dimension(rows),
        }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self {
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

fn clamp_dimension(value: i64) -> u16 {
    value.clamp(MIN_DIMENSION as i64, MAX_DIMENSION as i64) as u16
}
