//! Process environment snapshot and restore
//!
//! Toolchain activation adds variables to the process environment for the
//! length of one run. [`EnvironmentGuard`] records the pristine environment
//! before applying the overlay and puts it back verbatim afterwards.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;

/// Pristine copy of the process environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    vars: BTreeMap<OsString, OsString>,
}

impl EnvironmentSnapshot {
    /// Capture the current process environment
    pub fn capture() -> Self {
        Self {
            vars: env::vars_os().collect(),
        }
    }

    /// Restore the process environment to this snapshot
    pub fn restore(&self) {
        let current: Vec<OsString> = env::vars_os().map(|(key, _)| key).collect();
        for key in current {
            if !self.vars.contains_key(&key) {
                env::remove_var(&key);
            }
        }
        for (key, value) in &self.vars {
            if env::var_os(key).as_ref() != Some(value) {
                env::set_var(key, value);
            }
        }
    }

    /// Whether the snapshot holds `key`
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(&OsString::from(key))
    }
}

/// Applies an overlay to the process environment and restores the snapshot
/// when dropped or explicitly restored.
#[derive(Debug)]
pub struct EnvironmentGuard {
    snapshot: EnvironmentSnapshot,
    applied: Vec<String>,
    restored: bool,
}

impl EnvironmentGuard {
    /// Capture the environment without changing anything
    pub fn new() -> Self {
        Self {
            snapshot: EnvironmentSnapshot::capture(),
            applied: Vec::new(),
            restored: false,
        }
    }

    /// Set every variable in `overlay` on the process environment
    pub fn apply(&mut self, overlay: &BTreeMap<String, String>) {
        for (key, value) in overlay {
            tracing::debug!("Setting {key} from toolchain activation");
            env::set_var(key, value);
            self.applied.push(key.clone());
        }
    }

    /// Names of the variables this guard has set
    pub fn applied(&self) -> &[String] {
        &self.applied
    }

    /// The pre-run snapshot
    pub fn snapshot(&self) -> &EnvironmentSnapshot {
        &self.snapshot
    }

    /// Restore the pristine environment now
    pub fn restore(mut self) {
        self.restore_inner();
    }

    fn restore_inner(&mut self) {
        if self.restored {
            return;
        }
        self.snapshot.restore();
        self.restored = true;
        if !self.applied.is_empty() {
            tracing::debug!("Restored process environment ({} variables)", self.applied.len());
        }
    }
}

impl Default for EnvironmentGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EnvironmentGuard {
    fn drop(&mut self) {
        self.restore_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::env_lock;

    #[test]
    fn test_guard_removes_added_variable_on_restore() {
        let _lock = env_lock();
        let key = "ICESUGAR_ENV_GUARD_RESTORE";
        let mut guard = EnvironmentGuard::new();
        guard.apply(&BTreeMap::from([(key.to_string(), "1".to_string())]));
        assert_eq!(env::var(key).as_deref(), Ok("1"));

        guard.restore();
        assert!(env::var_os(key).is_none());
    }

    #[test]
    fn test_guard_restores_on_drop() {
        let _lock = env_lock();
        let key = "ICESUGAR_ENV_GUARD_DROP";
        {
            let mut guard = EnvironmentGuard::new();
            guard.apply(&BTreeMap::from([(key.to_string(), "1".to_string())]));
            assert_eq!(guard.applied(), [key.to_string()]);
        }
        assert!(env::var_os(key).is_none());
    }

    #[test]
    fn test_guard_restores_overwritten_value() {
        let _lock = env_lock();
        let key = "ICESUGAR_ENV_GUARD_OVERWRITE";
        env::set_var(key, "before");
        {
            let mut guard = EnvironmentGuard::new();
            assert!(guard.snapshot().contains(key));
            guard.apply(&BTreeMap::from([(key.to_string(), "after".to_string())]));
        }
        assert_eq!(env::var(key).as_deref(), Ok("before"));
        env::remove_var(key);
    }
}
