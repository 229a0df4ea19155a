//! A small command-execution engine for task runners.
//!
//! Commands are described by a single freeform string such as
//! `"FOO=1 mytool --flag arg"`. The crate splits that string into an executable,
//! its arguments and leading environment assignments, runs it either blocking
//! (optionally recording its output while still streaming it to the terminal)
//! or in the background, and keeps track of background processes so that starting
//! the same command again replaces the previous instance.
//!
//! The main entry point is [`Runner`], which mirrors the string-level API a task
//! file would call. [`Engine`] and [`Supervisor`] are exposed for hosts that want
//! to build [`CommandSpec`]s themselves or share a supervisor between engines.

pub mod command;
pub mod config;
pub mod dir;
pub mod env;
pub mod error;
mod external;
mod interpreter;
pub mod io_adapters;
mod lexer;
pub mod supervisor;

pub use command::{CommandSpec, SplitCommand, split_command};
pub use config::EngineConfig;
pub use dir::with_directory;
pub use error::{ExecError, Result};
pub use external::Engine;
/// Just a convenient re-export of the string-level command runner.
///
/// See [`Runner`] for the high-level API and examples.
pub use interpreter::Runner;
pub use lexer::{LexingError, split_into_words};
pub use supervisor::Supervisor;
