//! Shared test environment helpers.

use std::sync::Once;
use std::time::Duration;

use lattice_transport::Member;

/// Installs a test tracing subscriber once per process. Filtering follows
/// `RUST_LOG`; quiet by default.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Loopback member identity; port `0` requests an ephemeral bind.
pub fn loopback_member(port: u16) -> Member {
    Member::new(1, "127.0.0.1", port)
}

/// Polls `condition` until it holds or roughly five seconds elapse.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
