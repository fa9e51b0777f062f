mod e2e_tests;

// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_target(true)
        .with_thread_ids(true)
        .with_test_writer()
        .try_init();
}

pub const TEST_WINDOW: crate::WindowHandle = crate::WindowHandle(0x4d2);
