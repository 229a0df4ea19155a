use std::collections::HashMap;
use std::env as stdenv;
use std::ffi::{OsStr, OsString};

/// Snapshot of the environment that child processes inherit.
///
/// An [`Engine`](crate::Engine) captures the host environment once; each command
/// then gets that snapshot with its own `KEY=VALUE` overrides layered on top.
/// Names and values are kept as OS strings, so nothing is lost on the way to
/// the child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    /// Key-value store of inherited variables (e.g., PATH, HOME).
    pub vars: HashMap<OsString, OsString>,
}

impl Environment {
    /// Capture the current process environment.
    pub fn new() -> Self {
        Self {
            vars: stdenv::vars_os().collect(),
        }
    }

    /// Get the value of an inherited variable.
    pub fn get_var(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.vars.get(key.as_ref()).map(OsString::as_os_str)
    }

    /// Set or override an inherited variable.
    pub fn set_var(&mut self, key: impl Into<OsString>, val: impl Into<OsString>) {
        self.vars.insert(key.into(), val.into());
    }

    /// The variables a child should see: this snapshot with `overrides` applied
    /// in order, so a later assignment for the same key wins.
    ///
    /// Overrides without `=` are ignored; [`CommandSpec`](crate::CommandSpec)
    /// never produces them.
    pub fn merged<S: AsRef<str>>(&self, overrides: &[S]) -> HashMap<OsString, OsString> {
        let mut vars = self.vars.clone();
        for assignment in overrides {
            if let Some((key, value)) = assignment.as_ref().split_once('=') {
                vars.insert(key.into(), value.into());
            }
        }
        vars
    }
}
