//! Test doubles for the connection boundary, and end-to-end scenarios run against them.


use std::sync::Once;

pub(crate) use self::{
    fake_server::FakeServer,
    mock::{LegacyMessage, MockConnectionSource},
};

/// Routes `tracing` output through the test harness when `RUST_LOG` is set.
pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if std::env::var_os("RUST_LOG").is_some() {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        }
    });
}
