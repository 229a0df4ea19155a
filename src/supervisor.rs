//! Registry of background processes and the shutdown barrier.
//!
//! A [`Supervisor`] remembers the last child started for every command identity
//! so that starting the same command again can kill the previous one first. It
//! also counts the background processes still running, letting the host block in
//! [`Supervisor::wait`] before it exits.

use crate::error::{ExecError, Result};
use std::collections::HashMap;
use std::io;
use std::process::{Child, ExitStatus};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Shared handle to a child started in the background.
///
/// The owning background thread polls it for exit while the supervisor may kill
/// it from another thread; the lock is only held for the duration of one call.
#[derive(Debug, Clone)]
pub struct TrackedProcess {
    pid: u32,
    child: Arc<Mutex<Child>>,
}

impl TrackedProcess {
    fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Arc::new(Mutex::new(child)),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Sends a kill signal. Killing a child that already exited is not an error.
    pub fn kill(&self) -> io::Result<()> {
        let mut child = lock(&self.child);
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        child.kill()
    }

    /// Non-blocking exit check.
    pub fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        lock(&self.child).try_wait()
    }
}

#[derive(Debug, Default)]
struct BarrierState {
    outstanding: usize,
    should_wait: bool,
}

/// Process registry plus shutdown barrier.
///
/// Create one per host run and share it (behind an [`Arc`]) with every
/// [`Engine`](crate::Engine) that should see the same background processes.
#[derive(Debug, Default)]
pub struct Supervisor {
    processes: Mutex<HashMap<String, TrackedProcess>>,
    barrier: Mutex<BarrierState>,
    all_exited: Condvar,
    async_errors: Mutex<Vec<ExecError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn kill_logged(identity: &str, tracked: &TrackedProcess) {
    match tracked.kill() {
        Ok(()) => tracing::info!(identity, pid = tracked.pid, "killed previous process"),
        Err(source) => {
            let err = ExecError::Kill {
                identity: identity.to_string(),
                source,
            };
            tracing::warn!(pid = tracked.pid, "{err}");
        }
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `child` under `identity`, replacing any earlier entry.
    pub fn track(&self, identity: &str, child: Child) -> TrackedProcess {
        let tracked = TrackedProcess::new(child);
        tracing::debug!(identity, pid = tracked.pid, "tracking process");
        lock(&self.processes).insert(identity.to_string(), tracked.clone());
        tracked
    }

    /// PID of the process last tracked under `identity`, which may have exited.
    pub fn tracked_pid(&self, identity: &str) -> Option<u32> {
        lock(&self.processes).get(identity).map(TrackedProcess::pid)
    }

    /// Kills the process last tracked under `identity`, if any.
    ///
    /// Failures are logged and otherwise ignored: a process that is being
    /// replaced must never prevent its replacement from starting.
    pub fn kill_tracked(&self, identity: &str) {
        let tracked = lock(&self.processes).get(identity).cloned();
        if let Some(tracked) = tracked {
            kill_logged(identity, &tracked);
        }
    }

    /// Kills the process tracked under `identity`, starts a new one with `start`
    /// and tracks it, all under the registry lock.
    ///
    /// Two callers replacing the same identity are serialized, so at most one
    /// process per identity is left running. If `start` fails nothing new is
    /// tracked and the error is returned.
    pub fn supersede<F>(&self, identity: &str, start: F) -> Result<TrackedProcess>
    where
        F: FnOnce() -> Result<Child>,
    {
        let mut processes = lock(&self.processes);
        if let Some(previous) = processes.get(identity) {
            kill_logged(identity, previous);
        }
        let tracked = TrackedProcess::new(start()?);
        tracing::debug!(identity, pid = tracked.pid, "tracking process");
        processes.insert(identity.to_string(), tracked.clone());
        Ok(tracked)
    }

    /// Announces a background process; [`wait`](Self::wait) will block for it.
    pub fn barrier_enter(&self) {
        let mut state = lock(&self.barrier);
        state.should_wait = true;
        state.outstanding += 1;
    }

    /// Marks one background process as finished.
    pub fn barrier_leave(&self) {
        let mut state = lock(&self.barrier);
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.outstanding == 0 {
            self.all_exited.notify_all();
        }
    }

    /// Number of background processes that have not exited yet.
    pub fn outstanding(&self) -> usize {
        lock(&self.barrier).outstanding
    }

    /// Blocks until every background process has exited.
    ///
    /// Returns immediately if nothing was ever started in the background.
    pub fn wait(&self) {
        let mut state = lock(&self.barrier);
        if !state.should_wait {
            return;
        }
        while state.outstanding > 0 {
            state = self
                .all_exited
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stores an error raised in a background thread for the host to collect.
    pub fn record_async_error(&self, err: ExecError) {
        lock(&self.async_errors).push(err);
    }

    /// Drains the errors raised by background threads so far.
    pub fn take_async_errors(&self) -> Vec<ExecError> {
        std::mem::take(&mut *lock(&self.async_errors))
    }
}
