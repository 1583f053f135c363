//! ## Logging Configuration
//!
//! This module sets up logging automatically at program startup using the `ctor` crate.
//! Logging behavior is controlled by the `DEBUG_PREPLINE` environment variable:
//!
//! - **Disabled** (default): If the variable is unset, empty, or explicitly set to `"0"` or `"false"`,
//!   no subscriber is installed and diagnostics are dropped.
//! - **Enabled**: Any other value installs a `tracing-subscriber` formatter at `DEBUG` level, so the
//!   data-quality warnings raised by transformers (unmapped values, ignored columns, unseen
//!   categories, oversized neighbor counts) and the fitted statistics become visible.
//!
//! ### Usage Example
//!
//! ```sh
//! export DEBUG_PREPLINE=true
//! ```

use ctor::ctor;
use tracing::Level;

/// Returns true when the given value of `DEBUG_PREPLINE` should leave logging off.
fn logging_disabled(value: Option<&str>) -> bool {
    value.map_or(true, |v| v == "0" || v == "false" || v.is_empty())
}

#[ctor]
fn set_debug_level() {
    let value = std::env::var("DEBUG_PREPLINE").ok();
    if !logging_disabled(value.as_deref()) {
        // Another subscriber may already be installed by the host application.
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .try_init();
    }
}
