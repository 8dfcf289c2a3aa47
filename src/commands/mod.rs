//! Command-line command handlers for dogtor.
//!
//! Each command is implemented in its own submodule.

pub mod simulate;
pub mod status;
