use std::sync::Once;

static INIT: Once = Once::new();

/// initialize logging once per test binary
pub fn test_init() {
    INIT.call_once(|| io_reactor::logger::init("info"));
}
