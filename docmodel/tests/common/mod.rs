use std::sync::Once;

static INIT: Once = Once::new();

/// Installs the in-memory driver once per test binary.
pub fn setup() {
    INIT.call_once(|| {
        docmodel::memory::install();
    });
}
