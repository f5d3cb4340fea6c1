//! Shared helpers for the privileged integration tests.

use std::sync::Once;

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Reports whether the tests may touch kernel network state; they need root.
pub fn privileged() -> bool {
    init_tracing();
    let root = nix::unistd::geteuid().is_root();
    if !root {
        eprintln!("skipping: needs root");
    }
    root
}
