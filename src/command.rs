use crate::error::{ExecError, Result};
use crate::lexer::split_into_words;
use std::path::{Path, PathBuf};

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

/// A command line broken into its three parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitCommand {
    pub executable: String,
    pub argv: Vec<String>,
    /// Leading `KEY=VALUE` assignments, in the order they were written.
    pub env: Vec<String>,
}

/// Splits a command line into executable, arguments and leading environment
/// assignments.
///
/// Every leading word containing `=` is an assignment; the first word without
/// one is the executable and everything after it is an argument. When all words
/// look like assignments the first one is used as the executable anyway.
///
/// ```
/// use task_exec::split_command;
/// let cmd = split_command("A=1 B=2 echo hi").unwrap();
/// assert_eq!(cmd.executable, "echo");
/// assert_eq!(cmd.argv, vec!["hi"]);
/// assert_eq!(cmd.env, vec!["A=1", "B=2"]);
/// ```
pub fn split_command(line: &str) -> Result<SplitCommand> {
    let mut words = split_into_words(line)?;
    if words.is_empty() {
        return Err(ExecError::EmptyCommand);
    }

    match words.iter().position(|w| !w.contains('=')) {
        Some(pos) => {
            let argv = words.split_off(pos + 1);
            let executable = words.pop().unwrap_or_default();
            Ok(SplitCommand {
                executable,
                argv,
                env: words,
            })
        }
        None => {
            let argv = words.split_off(1);
            Ok(SplitCommand {
                executable: words.remove(0),
                argv,
                env: Vec::new(),
            })
        }
    }
}

/// Immutable description of one process to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    executable: String,
    argv: Vec<String>,
    env: Vec<String>,
    working_dir: Option<PathBuf>,
    capture_output: bool,
}

impl CommandSpec {
    /// Creates a spec for `executable` with no arguments, no overrides, the
    /// caller's working directory and output passed straight through.
    ///
    /// Returns [`ExecError::EmptyCommand`] for an empty executable name.
    pub fn new(executable: impl Into<String>) -> Result<Self> {
        let executable = executable.into();
        if executable.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        Ok(Self {
            executable,
            argv: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            capture_output: false,
        })
    }

    /// Parses `line` with [`split_command`] into a spec.
    pub fn parse(line: &str) -> Result<Self> {
        let SplitCommand {
            executable,
            argv,
            env,
        } = split_command(line)?;
        Ok(Self {
            executable,
            argv,
            env,
            working_dir: None,
            capture_output: false,
        })
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds a `KEY=VALUE` override. Entries without `=` are rejected.
    pub fn with_env(mut self, assignment: impl Into<String>) -> Result<Self> {
        let assignment = assignment.into();
        if !assignment.contains('=') {
            return Err(ExecError::InvalidEnv(assignment));
        }
        self.env.push(assignment);
        Ok(self)
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn capture(mut self, capture_output: bool) -> Self {
        self.capture_output = capture_output;
        self
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn env(&self) -> &[String] {
        &self.env
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn captures_output(&self) -> bool {
        self.capture_output
    }

    /// Same spec running a different executable; used after a source build.
    pub(crate) fn with_executable(&self, executable: String) -> Self {
        Self {
            executable,
            ..self.clone()
        }
    }

    /// Key used to recognize the same task across invocations.
    ///
    /// Only the executable and arguments take part; environment and working
    /// directory are ignored.
    pub fn identity(&self) -> String {
        let mut id = self.executable.clone();
        id.push_str(&self.argv.join(","));
        id
    }
}
