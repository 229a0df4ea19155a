use crate::lexer::LexingError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ExecError> = std::result::Result<T, E>;

/// Everything that can go wrong while turning a command string into a process.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The command string contained no words.
    #[error("empty command")]
    EmptyCommand,

    /// The command string could not be split into words.
    #[error("could not parse command: {0}")]
    Lexing(#[from] LexingError),

    /// An environment override was not of the form `KEY=VALUE`.
    #[error("environment override {0:?} is not KEY=VALUE")]
    InvalidEnv(String),

    /// The working directory is missing, not a directory, or not accessible.
    #[error("invalid working directory {}: {source}", path.display())]
    WorkingDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The OS refused to start the executable.
    #[error("could not start {executable}: {source}")]
    Launch {
        executable: String,
        #[source]
        source: io::Error,
    },

    /// The process ran and exited unsuccessfully.
    ///
    /// `output` holds whatever was recorded before the exit; it is empty when
    /// the command was not capturing.
    #[error("process exited with status {code}")]
    Exit { code: i32, output: String },

    /// A previously tracked process could not be terminated.
    #[error("could not kill process tracked as {identity:?}: {source}")]
    Kill {
        identity: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ExecError {
    /// Exit code carried by [`ExecError::Exit`], if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::Exit { code, .. } => Some(*code),
            _ => None,
        }
    }
}
