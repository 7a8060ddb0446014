//! wired-proto: the message contract spoken between a browser tab and the
//! terminal server.
//!
//! Every frame on the channel is a JSON text message tagged by `type`. The
//! client sends [`ClientMessage`]s (input, resize, heartbeat) and the server
//! answers with [`ServerMessage`]s (output, heartbeat echo).
//!
//! - [`TermSize`] carries the clamped grid size both sides agree on.
//! - [`Utf8Decoder`] turns PTY byte chunks into text without splitting
//!   multi-byte characters across output messages.

pub mod message;
pub mod size;
pub mod utf8;

pub use message::{ClientMessage, ServerMessage};
pub use size::{TermSize, DEFAULT_COLS, DEFAULT_ROWS, MAX_DIMENSION, MIN_DIMENSION};
pub use utf8::Utf8Decoder;
