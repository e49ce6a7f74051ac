//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use relay_dispatch::config::settings;
use relay_dispatch::Settings;
use std::time::{Duration, Instant};

/// How long to wait for a pipeline on a run loop to produce something
pub fn test_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Reset process-wide settings to defaults with leak warnings off
pub fn quiet_settings() {
    settings::init(Settings {
        enable_log_warnings: false,
        ..Settings::default()
    });
}

/// Poll `condition` until it holds or the test timeout passes
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
