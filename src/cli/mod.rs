//! CLI module for Pagewise headless operation.
//!
//! The CLI drives the same [`crate::assistant::Assistant`] an embedding app
//! would, with the backend chosen by the `isolation.mode` setting.
//!
//! ```text
//! +-----------+     +-------------+     +-----------------------------+
//! | args.rs   | --> | runner.rs   | --> | Assistant                   |
//! | (clap)    |     | (dispatch)  |     |  in-process | thread | proc |
//! +-----------+     +-------------+     +-----------------------------+
//!                         |
//!                         v
//!                   output.rs (text / JSON)
//! ```
//!
//! With `--isolation process` the CLI re-executes itself as
//! `pagewise-cli worker`, which speaks the isolation protocol on stdio.

mod args;
mod bootstrap;
mod output;
mod runner;

pub use args::{Args, Command, InputArgs, SettingsAction};
pub use bootstrap::{build_processor, initialize, CliContext};
pub use output::print_error;
pub use runner::execute;
