use crate::command::CommandSpec;
use crate::config::EngineConfig;
use crate::dir::with_directory;
use crate::error::{ExecError, Result};
use crate::external::Engine;
use crate::supervisor::Supervisor;
use std::path::Path;
use std::sync::Arc;

/// String-level command runner, the API a task file calls.
///
/// Every method takes a command line such as `"FOO=1 mytool --flag arg"` and an
/// optional working directory; `None` means the current directory of the
/// process at call time.
///
/// Example
/// ```no_run
/// use task_exec::Runner;
/// let runner = Runner::default();
/// runner.run("cargo build", None).unwrap();
/// let version = runner.run_output("rustc --version", None).unwrap();
/// assert!(version.starts_with("rustc"));
///
/// runner.start("PORT=8080 ./server --watch", None).unwrap();
/// // starting it again kills the first instance
/// runner.start("PORT=8081 ./server --watch", None).unwrap();
/// runner.wait();
/// ```
#[derive(Debug, Clone, Default)]
pub struct Runner {
    engine: Engine,
}

impl Runner {
    /// Create a runner with its own supervisor.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_supervisor(config, Arc::new(Supervisor::new()))
    }

    /// Create a runner that tracks background processes in `supervisor`.
    pub fn with_supervisor(config: EngineConfig, supervisor: Arc<Supervisor>) -> Self {
        Self {
            engine: Engine::new(config, supervisor),
        }
    }

    pub fn from_engine(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Runs a command line and waits for it.
    pub fn run(&self, command: &str, wd: Option<&Path>) -> Result<()> {
        self.engine.run_blocking(&spec(command, wd, false)?)?;
        Ok(())
    }

    /// Same as [`run`](Self::run), and returns the combined stdout and stderr.
    pub fn run_output(&self, command: &str, wd: Option<&Path>) -> Result<String> {
        self.engine.run_blocking(&spec(command, wd, true)?)
    }

    /// Runs `script` with `bash -c`.
    pub fn bash(&self, script: &str, wd: Option<&Path>) -> Result<()> {
        self.engine.run_blocking(&self.bash_spec(script, wd, false)?)?;
        Ok(())
    }

    /// Same as [`bash`](Self::bash), and returns the combined stdout and stderr.
    pub fn bash_output(&self, script: &str, wd: Option<&Path>) -> Result<String> {
        self.engine.run_blocking(&self.bash_spec(script, wd, true)?)
    }

    /// Starts a command line in the background, killing the previous instance of
    /// the same command.
    ///
    /// If the executable is a source entry point (`main.go` by default), the
    /// project is built first and the installed binary is started instead.
    pub fn start(&self, command: &str, wd: Option<&Path>) -> Result<()> {
        self.engine.start_async(&spec(command, wd, false)?)
    }

    /// Runs `f` with the process working directory set to `dir`, restoring it
    /// afterwards.
    pub fn inside<P: AsRef<Path>, T>(&self, dir: P, f: impl FnOnce() -> T) -> Result<T> {
        with_directory(dir, f)
    }

    /// Blocks until every command started with [`start`](Self::start) has exited.
    pub fn wait(&self) {
        self.engine.supervisor().wait();
    }

    /// Errors from background starts that failed after [`start`](Self::start)
    /// had already returned.
    pub fn async_errors(&self) -> Vec<ExecError> {
        self.engine.supervisor().take_async_errors()
    }

    fn bash_spec(&self, script: &str, wd: Option<&Path>, capture: bool) -> Result<CommandSpec> {
        let spec = CommandSpec::new(self.engine.config().bash.as_str())?
            .args(["-c", script])
            .capture(capture);
        Ok(match wd {
            Some(dir) => spec.in_dir(dir),
            None => spec,
        })
    }
}

fn spec(command: &str, wd: Option<&Path>, capture: bool) -> Result<CommandSpec> {
    let spec = CommandSpec::parse(command)?.capture(capture);
    Ok(match wd {
        Some(dir) => spec.in_dir(dir),
        None => spec,
    })
}
