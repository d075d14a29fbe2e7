//! Runtime-togglable validation mode
//!
//! Content-integrity and lifetime checks (unset binding slots, double release
//! of an interned id or bucket handle) are contract violations with no
//! runtime recovery. They are expensive to check per draw, so the checks are
//! gated behind a single process-wide flag rather than compiled out: the same
//! code path exists in every build and can be switched on in release when
//! chasing a bad frame.
//!
//! The flag defaults to on in debug builds and off otherwise.

use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(cfg!(debug_assertions));

/// Returns `true` if validation checks are currently enabled.
pub fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Enables or disables validation checks process-wide.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}
