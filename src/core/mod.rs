//! Console core components.
//!
//! This module contains everything that runs a program and moves its
//! output, independent of any UI:
//!
//! - **ansi**: SGR color decoder turning bytes into tagged segments
//! - **process**: child process lifecycle and signals
//! - **relay**: background thread reading stdout/stderr
//! - **input**: key events to stdin bytes
//! - **console**: per-tick drain, coalesce and render into a display sink
//! - **killall**: bulk interrupt of every running program
//!
//! # Architecture
//!
//! ```text
//! Console
//! ├── ProcessController (child handle, state machine, signals)
//! ├── OutputRelay ── thread ──> channel ──> tick() ──> DisplaySink
//! │   └── AnsiDecoder
//! └── InputForwarder ──> child stdin
//! ```

pub mod ansi;
pub mod console;
pub mod input;
pub mod killall;
pub mod process;
pub mod relay;
mod utf8;

#[cfg(test)]
mod test_support;
