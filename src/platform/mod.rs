//! Platform Abstraction Layer
//!
//! The kernel is platform-agnostic. The only thing it asks of the host is a
//! monotonic clock, used to timestamp trace events and time iteration slices.
//!
//! - Browser (wasm32): `performance.now()` via web-sys
//! - Native: `std::time::Instant` measured from first use

/// Current time in milliseconds since some epoch
#[cfg(target_arch = "wasm32")]
pub fn now_ms() -> f64 {
    web_sys::window()
        .and_then(|w| w.performance())
        .map(|p| p.now())
        .unwrap_or(0.0)
}

/// Current time in milliseconds since some epoch
#[cfg(not(target_arch = "wasm32"))]
pub fn now_ms() -> f64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64() * 1000.0
}
