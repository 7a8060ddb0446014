//! Screen serialization.
//!
//! Produces an ANSI string that, written into a fresh terminal of the same
//! width, redraws the same text and attributes: scrollback first, then the
//! visible screen. Soft-wrapped rows are joined so they rewrap naturally;
//! trailing blanks and trailing empty rows are dropped.

use alacritty_terminal::event::EventListener;
use alacritty_terminal::grid::{Dimensions, Row};
use alacritty_terminal::index::{Column, Line};
use alacritty_terminal::term::cell::{Cell, Flags as AlacFlags};
use alacritty_terminal::term::Term;
use alacritty_terminal::vte::ansi::{Color, NamedColor};

use crate::cell::CellFlags;
use crate::screen::convert_flags;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Style {
    fg: Color,
    bg: Color,
    flags: CellFlags,
}

impl Style {
    const DEFAULT: Style = Style {
        fg: Color::Named(NamedColor::Foreground),
        bg: Color::Named(NamedColor::Background),
        flags: CellFlags::empty(),
    };

    fn of(cell: &Cell) -> Self {
        Self {
            fg: cell.fg,
            bg: cell.bg,
            flags: convert_flags(cell.flags),
        }
    }

    /// Full SGR sequence, reset first so styles never accumulate.
    fn sgr(&self) -> String {
        let mut params = vec!["0".to_string()];
        params.extend(self.flags.sgr_params().map(|p| p.to_string()));
        push_color(&mut params, self.fg, true);
        push_color(&mut params, self.bg, false);
        format!("\x1b[{}m", params.join(";"))
    }
}

fn push_color(params: &mut Vec<String>, color: Color, is_fg: bool) {
    match color {
        Color::Named(named) => {
            let idx = named as usize;
            let base = match (idx, is_fg) {
                (0..=7, true) => 30 + idx,
                (0..=7, false) => 40 + idx,
                (8..=15, true) => 90 + idx - 8,
                (8..=15, false) => 100 + idx - 8,
                // Foreground/Background and the dim variants render as default.
                _ => return,
            };
            params.push(base.to_string());
        }
        Color::Indexed(idx) => {
            params.push(format!("{};5;{idx}", if is_fg { 38 } else { 48 }));
        }
        Color::Spec(rgb) => {
            params.push(format!(
                "{};2;{};{};{}",
                if is_fg { 38 } else { 48 },
                rgb.r,
                rgb.g,
                rgb.b
            ));
        }
    }
}

fn is_blank(cell: &Cell) -> bool {
    cell.c == ' '
        && cell.bg == Color::Named(NamedColor::Background)
        && !cell
            .flags
            .intersects(AlacFlags::INVERSE | AlacFlags::UNDERLINE | AlacFlags::STRIKEOUT)
}

/// Serialize one grid row. Returns the text and whether it soft-wraps into
/// the next row.
fn serialize_row(row: &Row<Cell>, cols: usize) -> (String, bool) {
    if cols == 0 {
        return (String::new(), false);
    }
    let wrapped = row[Column(cols - 1)].flags.contains(AlacFlags::WRAPLINE);
    let end = if wrapped {
        cols
    } else {
        (0..cols)
            .rev()
            .find(|&col| !is_blank(&row[Column(col)]))
            .map_or(0, |col| col + 1)
    };

    let mut out = String::new();
    let mut current = Style::DEFAULT;
    for col in 0..end {
        let cell = &row[Column(col)];
        if cell.flags.contains(AlacFlags::WIDE_CHAR_SPACER) {
            continue;
        }
        let style = Style::of(cell);
        if style != current {
            out.push_str(&style.sgr());
            current = style;
        }
        out.push(cell.c);
        if let Some(extra) = cell.zerowidth() {
            out.extend(extra.iter());
        }
    }
    if current != Style::DEFAULT {
        out.push_str("\x1b[0m");
    }
    (out, wrapped)
}

/// Serialize scrollback plus the visible screen.
pub(crate) fn serialize_term<T: EventListener>(term: &Term<T>) -> String {
    let grid = term.grid();
    let cols = grid.columns();

    let mut rows: Vec<(String, bool)> = (grid.topmost_line().0..=grid.bottommost_line().0)
        .map(|line| serialize_row(&grid[Line(line)], cols))
        .collect();
    while rows
        .last()
        .is_some_and(|(text, wrapped)| text.is_empty() && !wrapped)
    {
        rows.pop();
    }

    let mut out = String::new();
    let last = rows.len().saturating_sub(1);
    for (i, (text, wrapped)) in rows.iter().enumerate() {
        out.push_str(text);
        if !wrapped && i < last {
            out.push_str("\r\n");
        }
    }
    out
}
