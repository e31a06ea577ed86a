//! Diagnostics wiring: pretty error reports and structured logging.

use std::sync::Once;

static SETUP: Once = Once::new();

/// Installs the error-report hook and the log subscriber. Idempotent.
pub fn diagnostics_setup() {
    SETUP.call_once(|| {
        color_eyre::install().ok();
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .try_init()
            .ok();
    });
}

/// Kills colorized output globally; golden tests want plain text.
pub fn diagnostics_color_disable() {
    yansi::Paint::disable();
}
