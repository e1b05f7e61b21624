use std::sync::Once;
static START: Once = Once::new();

/// Install the tracing subscriber for tests. Safe to call from every test;
/// only the first call does anything.
pub fn init_test_logger() {
    START.call_once(|| {
             let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                                              .with_test_writer()
                                              .try_init();
         });
}
