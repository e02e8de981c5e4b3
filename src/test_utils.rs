//! Test utilities shared by unit tests
//!
//! Generators for proptest and a lock serializing tests that touch the
//! process environment.

use std::sync::{Mutex, MutexGuard};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Hold this while a test reads or mutates the process environment
pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub mod generators {
    use proptest::prelude::*;

    /// Generate a design name usable as a file stem
    pub fn design_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,15}"
    }

    /// Generate a relative directory (possibly empty) of 0-3 components
    pub fn relative_dir() -> impl Strategy<Value = String> {
        prop::collection::vec("[a-z][a-z0-9]{0,7}", 0..3).prop_map(|parts| parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_design_name_has_no_separator(name in design_name()) {
            prop_assert!(!name.is_empty());
            prop_assert!(!name.contains('/'));
            prop_assert!(!name.contains('.'));
        }

        #[test]
        fn test_relative_dir_is_relative(dir in relative_dir()) {
            prop_assert!(!dir.starts_with('/'));
        }
    }
}
