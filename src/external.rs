use crate::command::{CommandSpec, ExitCode};
use crate::config::EngineConfig;
use crate::env::Environment;
use crate::error::{ExecError, Result};
use crate::io_adapters::{Marker, Recorder, TeeWriter, pump};
use crate::supervisor::Supervisor;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;

/// Builds and runs OS processes from [`CommandSpec`]s.
///
/// Blocking runs are independent of each other. Background runs are tracked in
/// the engine's [`Supervisor`], which may be shared with other engines.
///
/// ```no_run
/// use task_exec::{CommandSpec, Engine};
/// let engine = Engine::default();
/// let out = engine.run_blocking(&CommandSpec::parse("echo hi").unwrap().capture(true)).unwrap();
/// assert_eq!(out, "hi\n");
/// ```
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    env: Environment,
    supervisor: Arc<Supervisor>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default(), Arc::new(Supervisor::new()))
    }
}

impl Engine {
    /// Creates an engine that inherits the current process environment.
    pub fn new(config: EngineConfig, supervisor: Arc<Supervisor>) -> Self {
        Self::with_environment(config, supervisor, Environment::new())
    }

    pub fn with_environment(
        config: EngineConfig,
        supervisor: Arc<Supervisor>,
        env: Environment,
    ) -> Self {
        Self {
            config,
            env,
            supervisor,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Runs a command to completion.
    ///
    /// Stdin is inherited. When the command captures output, stdout and stderr are
    /// shown on the terminal as they arrive (stderr in bold red) and the plain
    /// text of both is returned; otherwise they pass straight through and the
    /// returned string is empty.
    ///
    /// A non-zero exit is reported as [`ExecError::Exit`], which still carries the
    /// recorded output.
    pub fn run_blocking(&self, spec: &CommandSpec) -> Result<String> {
        let dir = resolve_working_dir(spec)?;
        let mut cmd = self.build_command(spec, &dir);

        if !spec.captures_output() {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            let status = spawn(&mut cmd, spec)?.wait()?;
            return exit_result(status, String::new());
        }

        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = spawn(&mut cmd, spec)?;

        let recorder = Recorder::new();
        let mut pumps = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            let tee = TeeWriter::new(io::stdout(), recorder.clone(), None);
            pumps.push(pump(out, tee));
        }
        if let Some(err) = child.stderr.take() {
            let tee = TeeWriter::new(io::stderr(), recorder.clone(), Some(Marker::Error));
            pumps.push(pump(err, tee));
        }

        let status = child.wait()?;
        for handle in pumps {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "output capture failed"),
                Err(_) => tracing::warn!("output capture thread panicked"),
            }
        }

        exit_result(status, recorder.contents())
    }

    /// Starts a command in the background and returns without waiting for it.
    ///
    /// Any process previously started under the same identity is killed and the
    /// new one is tracked before this returns, so at most one process per
    /// identity is alive. An executable ending with the configured source suffix
    /// is built with the configured build command first, and the binary named
    /// after the working directory is run instead.
    ///
    /// Only working directory and build failures are returned. A failure to spawn
    /// the process itself is logged and can be collected with
    /// [`Supervisor::take_async_errors`].
    pub fn start_async(&self, spec: &CommandSpec) -> Result<()> {
        let dir = resolve_working_dir(spec)?;

        let spec = if self.config.is_source_target(spec.executable()) {
            let binary = self.build_source_target(&dir)?;
            spec.with_executable(binary)
        } else {
            spec.clone()
        };

        let identity = spec.identity();
        let mut cmd = self.build_command(&spec, &dir);
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());

        self.supervisor.barrier_enter();
        let tracked = match self.supervisor.supersede(&identity, || spawn(&mut cmd, &spec)) {
            Ok(tracked) => tracked,
            Err(err) => {
                tracing::error!(identity = %identity, "{err}");
                self.supervisor.record_async_error(err);
                self.supervisor.barrier_leave();
                return Ok(());
            }
        };

        let supervisor = Arc::clone(&self.supervisor);
        let poll_interval = self.config.poll_interval;
        let watcher = tracked.clone();
        let spawned = thread::Builder::new()
            .name(format!("task-exec:{}", spec.executable()))
            .spawn(move || {
                loop {
                    match watcher.try_wait() {
                        Ok(Some(status)) => {
                            tracing::debug!(identity = %identity, %status, "background process exited");
                            break;
                        }
                        Ok(None) => thread::sleep(poll_interval),
                        Err(e) => {
                            tracing::error!(identity = %identity, error = %e, "lost track of background process");
                            break;
                        }
                    }
                }
                supervisor.barrier_leave();
            });

        if let Err(e) = spawned {
            // nobody would ever reap the child
            if let Err(kill) = tracked.kill() {
                tracing::warn!(pid = tracked.pid(), error = %kill, "could not kill unwatched process");
            }
            self.supervisor.barrier_leave();
            return Err(e.into());
        }
        Ok(())
    }

    /// Runs the build command in `dir`; returns the name of the produced binary,
    /// which is the base name of the canonical directory.
    fn build_source_target(&self, dir: &Path) -> Result<String> {
        let dir = std::fs::canonicalize(dir).map_err(|source| ExecError::WorkingDirectory {
            path: dir.to_path_buf(),
            source,
        })?;
        let binary = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ExecError::WorkingDirectory {
                path: dir.clone(),
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "directory has no name to derive the binary from",
                ),
            })?;

        tracing::info!(dir = %dir.display(), build = %self.config.build_command, "building source target");
        let build = CommandSpec::parse(&self.config.build_command)?.in_dir(&dir);
        self.run_blocking(&build)?;
        Ok(binary)
    }

    fn build_command(&self, spec: &CommandSpec, dir: &Path) -> Command {
        let mut cmd = Command::new(spec.executable());
        cmd.args(spec.argv())
            .env_clear()
            .envs(self.env.merged(spec.env()))
            .current_dir(dir)
            .stdin(Stdio::inherit());
        cmd
    }
}

/// Explicit working directory if it is an existing directory, else the caller's.
fn resolve_working_dir(spec: &CommandSpec) -> Result<PathBuf> {
    match spec.working_dir() {
        Some(dir) => {
            let meta = std::fs::metadata(dir).map_err(|source| ExecError::WorkingDirectory {
                path: dir.to_path_buf(),
                source,
            })?;
            if !meta.is_dir() {
                return Err(ExecError::WorkingDirectory {
                    path: dir.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
                });
            }
            Ok(dir.to_path_buf())
        }
        None => std::env::current_dir().map_err(|source| ExecError::WorkingDirectory {
            path: PathBuf::from("."),
            source,
        }),
    }
}

fn spawn(cmd: &mut Command, spec: &CommandSpec) -> Result<Child> {
    tracing::debug!(executable = spec.executable(), argv = ?spec.argv(), "spawning");
    cmd.spawn().map_err(|source| ExecError::Launch {
        executable: spec.executable().to_string(),
        source,
    })
}

fn exit_result(status: ExitStatus, output: String) -> Result<String> {
    if status.success() {
        return Ok(output);
    }
    let code = match status.code() {
        Some(x) => x,
        None => terminated_by_signal(status),
    };
    Err(ExecError::Exit { code, output })
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> ExitCode {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> ExitCode {
    -1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::time::{Duration, Instant};

    fn engine() -> Engine {
        Engine::default()
    }

    // Pinned directory so tests that move the process cwd cannot interfere.
    fn parse(line: &str) -> CommandSpec {
        CommandSpec::parse(line)
            .unwrap()
            .in_dir(env!("CARGO_MANIFEST_DIR"))
    }

    fn sh(script: &str) -> CommandSpec {
        parse("sh -c").args([script])
    }

    fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn captures_stdout_and_stderr_plainly() {
        let spec = sh("echo out; echo err 1>&2").capture(true);
        let out = engine().run_blocking(&spec).unwrap();
        assert!(out.contains("out\n"), "{out:?}");
        assert!(out.contains("err\n"), "{out:?}");
        assert!(!out.contains('\u{1b}'), "recorded output must be unmarked: {out:?}");
    }

    #[test]
    fn no_capture_returns_empty_string() {
        let spec = sh("echo visible; echo also 1>&2");
        assert_eq!(engine().run_blocking(&spec).unwrap(), "");
    }

    #[test]
    fn repeated_runs_do_not_share_recordings() {
        let engine = engine();
        let spec = sh("echo once").capture(true);
        assert_eq!(engine.run_blocking(&spec).unwrap(), "once\n");
        assert_eq!(engine.run_blocking(&spec).unwrap(), "once\n");
    }

    #[test]
    fn non_zero_exit_carries_code_and_output() {
        let spec = sh("echo partial; exit 7").capture(true);
        match engine().run_blocking(&spec) {
            Err(ExecError::Exit { code, output }) => {
                assert_eq!(code, 7);
                assert_eq!(output, "partial\n");
            }
            other => panic!("expected exit error, got {other:?}"),
        }
    }

    #[test]
    fn missing_executable_is_launch_error() {
        let spec = parse("definitely-not-a-real-binary-4711");
        assert!(matches!(
            engine().run_blocking(&spec),
            Err(ExecError::Launch { .. })
        ));
    }

    #[test]
    fn missing_working_directory_is_reported() {
        let spec = CommandSpec::new("true").unwrap().in_dir("/definitely/not/here");
        assert!(matches!(
            engine().run_blocking(&spec),
            Err(ExecError::WorkingDirectory { .. })
        ));
        assert!(matches!(
            engine().start_async(&spec),
            Err(ExecError::WorkingDirectory { .. })
        ));
    }

    #[test]
    fn file_as_working_directory_is_reported() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let spec = CommandSpec::new("true").unwrap().in_dir(file.path());
        assert!(matches!(
            engine().run_blocking(&spec),
            Err(ExecError::WorkingDirectory { .. })
        ));
    }

    #[test]
    fn runs_in_explicit_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("pwd").unwrap().in_dir(dir.path()).capture(true);
        let out = engine().run_blocking(&spec).unwrap();
        let reported = std::fs::canonicalize(out.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn overrides_beat_inherited_environment() {
        let mut env = Environment::default();
        env.set_var("PATH", std::env::var("PATH").unwrap_or_default());
        env.set_var("GREETING", "inherited");
        env.set_var("KEEP", "kept");
        let engine = Engine::with_environment(
            EngineConfig::default(),
            Arc::new(Supervisor::new()),
            env,
        );

        let spec = parse(r#"GREETING=override sh -c 'echo "$GREETING $KEEP"'"#)
            .capture(true);
        assert_eq!(engine.run_blocking(&spec).unwrap(), "override kept\n");
    }

    #[test]
    fn restarting_same_identity_kills_previous() {
        let engine = engine();
        let supervisor = Arc::clone(engine.supervisor());
        let first = parse("A=1 sleep 30");
        let second = parse("A=2 sleep 30");
        let identity = first.identity();
        assert_eq!(identity, second.identity());

        engine.start_async(&first).unwrap();
        wait_until("first start", || supervisor.tracked_pid(&identity).is_some());
        let first_pid = supervisor.tracked_pid(&identity).unwrap();

        engine.start_async(&second).unwrap();
        wait_until("second start", || {
            supervisor.tracked_pid(&identity).is_some_and(|pid| pid != first_pid)
        });
        wait_until("first exit", || supervisor.outstanding() == 1);

        supervisor.kill_tracked(&identity);
        supervisor.wait();
        assert_eq!(supervisor.outstanding(), 0);
    }

    #[test]
    fn different_identities_run_side_by_side() {
        let engine = engine();
        let supervisor = Arc::clone(engine.supervisor());
        let a = parse("sleep 30");
        let b = parse("sleep 31");

        engine.start_async(&a).unwrap();
        engine.start_async(&b).unwrap();
        wait_until("both tracked", || {
            supervisor.tracked_pid(&a.identity()).is_some()
                && supervisor.tracked_pid(&b.identity()).is_some()
        });
        assert_eq!(supervisor.outstanding(), 2);

        supervisor.kill_tracked(&a.identity());
        supervisor.kill_tracked(&b.identity());
        supervisor.wait();
    }

    #[test]
    fn wait_blocks_for_short_background_process() {
        let engine = engine();
        engine.start_async(&sh("sleep 0.2")).unwrap();
        engine.supervisor().wait();
        assert_eq!(engine.supervisor().outstanding(), 0);
    }

    #[test]
    fn background_launch_failure_is_recorded() {
        let engine = engine();
        let spec = parse("definitely-not-a-real-binary-4711");
        engine.start_async(&spec).unwrap();
        engine.supervisor().wait();

        let errors = engine.supervisor().take_async_errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ExecError::Launch { .. }));
    }

    #[test]
    fn source_target_build_failure_aborts_start() {
        let config = EngineConfig::default().build_command("false");
        let engine = Engine::new(config, Arc::new(Supervisor::new()));
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("main.go").unwrap().in_dir(dir.path());

        assert!(matches!(
            engine.start_async(&spec),
            Err(ExecError::Exit { code: 1, .. })
        ));
        assert_eq!(engine.supervisor().outstanding(), 0);
    }

    /// Project directory `hello-server` plus an engine whose build step drops an
    /// executable of that name on the child's PATH.
    fn go_project(root: &Path) -> (PathBuf, Engine) {
        let project = root.join("hello-server");
        std::fs::create_dir_all(project.join("cmd")).unwrap();
        let bin = root.join("bin");
        std::fs::create_dir(&bin).unwrap();
        let build = format!(
            "sh -c 'printf \"#!/bin/sh\\necho built > {marker}\\n\" > {bin}/hello-server && chmod +x {bin}/hello-server'",
            marker = root.join("ran").display(),
            bin = bin.display(),
        );

        let mut env = Environment::new();
        let mut path = OsString::from(bin.as_os_str());
        path.push(":");
        path.push(env.get_var("PATH").unwrap_or_default());
        env.set_var("PATH", path);
        let engine = Engine::with_environment(
            EngineConfig::default().build_command(build),
            Arc::new(Supervisor::new()),
            env,
        );
        (project, engine)
    }

    #[test]
    fn source_target_runs_binary_named_after_directory() {
        let root = tempfile::tempdir().unwrap();
        let (project, engine) = go_project(root.path());

        let spec = CommandSpec::new("main.go").unwrap().in_dir(&project);
        engine.start_async(&spec).unwrap();
        engine.supervisor().wait();

        assert!(engine.supervisor().take_async_errors().is_empty());
        assert_eq!(
            std::fs::read_to_string(root.path().join("ran")).unwrap(),
            "built\n"
        );
        assert!(engine.supervisor().tracked_pid("hello-server").is_some());
    }

    #[test]
    fn source_target_name_comes_from_canonical_directory() {
        let root = tempfile::tempdir().unwrap();
        let (project, engine) = go_project(root.path());

        // `cmd/..` has no file name of its own
        let spec = CommandSpec::new("main.go")
            .unwrap()
            .in_dir(project.join("cmd").join(".."));
        engine.start_async(&spec).unwrap();
        engine.supervisor().wait();

        assert!(engine.supervisor().take_async_errors().is_empty());
        assert!(engine.supervisor().tracked_pid("hello-server").is_some());
        assert!(engine.supervisor().tracked_pid("main.go").is_none());
    }

    #[test]
    fn source_target_in_root_directory_is_rejected() {
        let config = EngineConfig::default().build_command("true");
        let engine = Engine::new(config, Arc::new(Supervisor::new()));
        let spec = CommandSpec::new("main.go").unwrap().in_dir("/");

        assert!(matches!(
            engine.start_async(&spec),
            Err(ExecError::WorkingDirectory { .. })
        ));
        assert_eq!(engine.supervisor().outstanding(), 0);
        assert!(engine.supervisor().take_async_errors().is_empty());
    }

    #[test]
    fn back_to_back_starts_leave_one_process() {
        let engine = engine();
        let supervisor = Arc::clone(engine.supervisor());
        let spec = parse("sleep 30");
        let identity = spec.identity();

        engine.start_async(&spec).unwrap();
        let first_pid = supervisor.tracked_pid(&identity);
        engine.start_async(&spec).unwrap();
        let second_pid = supervisor.tracked_pid(&identity);

        assert!(first_pid.is_some());
        assert!(second_pid.is_some());
        assert_ne!(first_pid, second_pid);
        wait_until("first exit", || supervisor.outstanding() == 1);

        supervisor.kill_tracked(&identity);
        supervisor.wait();
        assert_eq!(supervisor.outstanding(), 0);
    }

    #[test]
    fn non_utf8_variables_reach_the_child() {
        use std::os::unix::ffi::OsStringExt;

        let mut env = Environment::default();
        env.set_var("PATH", std::env::var_os("PATH").unwrap_or_default());
        env.set_var("RAW", OsString::from_vec(b"caf\xe9".to_vec()));
        let engine = Engine::with_environment(
            EngineConfig::default(),
            Arc::new(Supervisor::new()),
            env,
        );

        let spec = sh(r#"printf %s "$RAW" | od -An -tx1"#).capture(true);
        let out = engine.run_blocking(&spec).unwrap();
        assert_eq!(out.split_whitespace().collect::<Vec<_>>(), ["63", "61", "66", "e9"]);
    }
}
