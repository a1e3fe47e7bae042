//! User interface rendering and input handling.
//!
//! - **renderer**: scrollback and crossterm drawing, implements `DisplaySink`
//! - **keymapper**: crossterm key events to console key input

pub mod keymapper;
pub mod renderer;

pub use keymapper::KeyMapper;
pub use renderer::Renderer;
