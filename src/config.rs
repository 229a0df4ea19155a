use std::time::Duration;

/// Knobs for an [`Engine`](crate::Engine).
///
/// The defaults describe a Go-based task setup: `start("main.go")` runs
/// `go install` in the working directory and then launches the installed binary,
/// which is named after that directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Executable suffix that marks a source entry point needing a build first.
    pub source_suffix: String,
    /// Command line run (blocking, in the same directory) before starting a source target.
    pub build_command: String,
    /// Interpreter used by [`Runner::bash`](crate::Runner::bash).
    pub bash: String,
    /// How often background threads check whether their child has exited.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            source_suffix: ".go".to_string(),
            build_command: "go install".to_string(),
            bash: "bash".to_string(),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl EngineConfig {
    pub fn source_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.source_suffix = suffix.into();
        self
    }

    pub fn build_command(mut self, command: impl Into<String>) -> Self {
        self.build_command = command.into();
        self
    }

    pub fn bash(mut self, bash: impl Into<String>) -> Self {
        self.bash = bash.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// True when `executable` should be built before it is started.
    pub(crate) fn is_source_target(&self, executable: &str) -> bool {
        !self.source_suffix.is_empty() && executable.ends_with(&self.source_suffix)
    }
}
