//! wired-pty: the process side of a terminal channel.
//!
//! A [`PtyHandle`] owns one shell process attached to a pseudo-terminal. It
//! exposes the shell's output as an async stream of byte chunks, a one-shot
//! exit notification, and input/resize/kill operations that report failures
//! against a dead process as typed errors instead of panicking.
//!
//! # Architecture
//!
//! - [`PtyHandle`]: spawn, write, resize, kill, liveness.
//! - [`SpawnOptions`]: shell, initial size, working directory, environment.
//! - Output is read on a dedicated OS thread (PTY reads block) and the exit
//!   status is awaited on a second one; both hand results to async callers
//!   through `tokio::sync` channels.

pub mod pty;

pub use pty::{default_shell, ExitStatus, PtyError, PtyHandle, SpawnOptions, TERM_NAME};
