use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::index::{Column, Line};
use alacritty_terminal::term::cell::{Cell, Flags as AlacFlags};
use alacritty_terminal::term::Term;

use crate::cell::{CellFlags, VtCell};
use crate::terminal::EventProxy;

/// A read-only view into the terminal screen.
pub struct ScreenView<'a> {
    term: &'a Term<EventProxy>,
}

impl<'a> ScreenView<'a> {
    pub(crate) fn new(term: &'a Term<EventProxy>) -> Self {
        Self { term }
    }

    /// Number of visible rows.
    pub fn rows(&self) -> u16 {
        self.term.screen_lines() as u16
    }

    /// Number of columns.
    pub fn cols(&self) -> u16 {
        self.term.columns() as u16
    }

    /// Lines that have scrolled off the top of the screen.
    pub fn history_size(&self) -> usize {
        self.term.grid().history_size()
    }

    /// Get a single cell at the given row and column.
    ///
    /// Row 0 is the top of the visible screen.
    pub fn cell(&self, row: u16, col: u16) -> VtCell {
        if (row as usize) >= self.term.screen_lines() || (col as usize) >= self.term.columns() {
            return VtCell::default();
        }
        let cell = &self.term.grid()[Line(row as i32)][Column(col as usize)];
        convert_cell(cell)
    }

    /// Text of a visible row with trailing blanks removed.
    pub fn row_text(&self, row: u16) -> String {
        let text: String = (0..self.cols())
            .map(|col| self.cell(row, col))
            .filter(|cell| cell.width != 0)
            .map(|cell| cell.codepoint)
            .collect();
        text.trim_end().to_string()
    }

    /// Text of every visible row, top to bottom.
    pub fn text_lines(&self) -> Vec<String> {
        (0..self.rows()).map(|row| self.row_text(row)).collect()
    }
}

pub(crate) fn convert_flags(flags: AlacFlags) -> CellFlags {
    let mut out = CellFlags::empty();
    if flags.contains(AlacFlags::BOLD) {
        out |= CellFlags::BOLD;
    }
    if flags.contains(AlacFlags::ITALIC) {
        out |= CellFlags::ITALIC;
    }
    if flags.contains(AlacFlags::UNDERLINE) {
        out |= CellFlags::UNDERLINE;
    }
    if flags.contains(AlacFlags::STRIKEOUT) {
        out |= CellFlags::STRIKETHROUGH;
    }
    if flags.contains(AlacFlags::INVERSE) {
        out |= CellFlags::INVERSE;
    }
    if flags.contains(AlacFlags::DIM) {
        out |= CellFlags::DIM;
    }
    if flags.contains(AlacFlags::HIDDEN) {
        out |= CellFlags::HIDDEN;
    }
    out
}

/// Convert an alacritty Cell to our VtCell.
pub(crate) fn convert_cell(cell: &Cell) -> VtCell {
    let width = if cell.flags.contains(AlacFlags::WIDE_CHAR) {
        2
    } else if cell.flags.contains(AlacFlags::WIDE_CHAR_SPACER) {
        0
    } else {
        1
    };

    VtCell {
        codepoint: cell.c,
        flags: convert_flags(cell.flags),
        width,
    }
}
