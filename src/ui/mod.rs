//! User interface rendering and input handling.
//!
//! - **renderer**: Scrollback, status bar and command line drawing
//! - **keymapper**: Key events to line-editor actions

pub mod keymapper;
pub mod renderer;

pub use keymapper::*;
pub use renderer::*;
