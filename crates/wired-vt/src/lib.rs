//! wired-vt: the terminal emulator behind each browser tab.
//!
//! Wraps `alacritty_terminal` so the tab layer can feed it shell output,
//! read back the visible grid, collect device-status replies that must be
//! sent to the shell, and serialize the whole screen (scrollback included)
//! into an ANSI string that restores the same picture when written into a
//! fresh terminal.

pub mod cell;
pub mod screen;
pub mod serialize;
pub mod terminal;

pub use cell::{CellFlags, VtCell};
pub use screen::ScreenView;
pub use terminal::VtTerminal;
