//! engine::engine_hooks
//!
//! Test-only hooks for simulating concurrent writers.
//!
//! # Architecture
//!
//! The cherry-picker reads the head reference once, applies every commit,
//! then moves the reference with a single conditional update. The window
//! between the read and the update is where another writer can race us.
//! This hook fires at the end of that window, after all commits have been
//! written and immediately before the conditional update, so a test can move
//! the reference out-of-band and assert that the update is refused.
//!
//! # Usage
//!
//! ```ignore
//! use remote_cherry_pick::engine::engine_hooks;
//!
//! let outside = store.clone();
//! engine_hooks::set_before_update_ref(move |info| {
//!     // Another writer lands a commit on the head first.
//!     outside.set_reference_sync(&info.refname, &someone_elses_commit);
//! });
//!
//! let result = picker.cherry_pick(&request).await;
//!
//! // Always clean up!
//! engine_hooks::clear();
//!
//! assert!(matches!(result, Err(CherryPickError::ConcurrentUpdate { .. })));
//! ```
//!
//! # Thread Safety
//!
//! Hooks are stored in thread-local storage. `#[tokio::test]` uses a
//! current-thread runtime, so the hook set by the test body is the one the
//! engine sees.
//!
//! # Invariants
//!
//! - Hooks are only available under `cfg(test)` or the `test_hooks` feature
//! - Hooks have zero runtime cost in production builds
//! - Each test must call `clear()` to avoid polluting other tests

use std::cell::RefCell;

use crate::core::types::{Oid, RefName};

/// Reference state passed to hooks.
#[derive(Debug, Clone)]
pub struct HookRefInfo {
    /// Reference about to be updated.
    pub refname: RefName,
    /// Value read at the start of the run; the update is conditional on it.
    pub original: Oid,
    /// Tip of the new chain the reference will be moved to.
    pub computed: Oid,
}

/// Container for engine hooks.
#[derive(Default)]
pub struct EngineHooks {
    /// Called after all commits are applied, before the conditional update.
    pub before_update_ref: Option<Box<dyn Fn(&HookRefInfo) + Send + Sync>>,
}

thread_local! {
    static HOOKS: RefCell<Option<EngineHooks>> = const { RefCell::new(None) };
}

/// Set a hook to run before the final reference update.
pub fn set_before_update_ref<F>(f: F)
where
    F: Fn(&HookRefInfo) + Send + Sync + 'static,
{
    HOOKS.with(|h| {
        h.borrow_mut()
            .get_or_insert_with(EngineHooks::default)
            .before_update_ref = Some(Box::new(f));
    });
}

/// Clear all hooks.
///
/// **Important:** Always call this in test teardown to avoid polluting other tests.
pub fn clear() {
    HOOKS.with(|h| *h.borrow_mut() = None);
}

/// Check if any hooks are currently set.
pub fn has_hooks() -> bool {
    HOOKS.with(|h| h.borrow().is_some())
}

/// Internal: invoke the before_update_ref hook if set.
pub(crate) fn invoke_before_update_ref(info: &HookRefInfo) {
    HOOKS.with(|h| {
        if let Some(ref hooks) = *h.borrow() {
            if let Some(ref f) = hooks.before_update_ref {
                f(info);
            }
        }
    });
}
