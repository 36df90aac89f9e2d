//! tranche - cooperative, interruptible iteration for a tick-based task kernel
//!
//! Design principles:
//! - Synchronous mental model: a run to completion reads like one plain pass
//! - Preemptible: iteration yields to the host every `step` elements
//! - Cooperative cancellation: state is polled between slices, never mid-slice
//! - Exactly-once completion, however many turns the run spans
//!
//! Platform support:
//! - Browser (wasm32-unknown-unknown): console logging, performance.now timing
//! - Native: stderr logging, monotonic clock

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub mod kernel;
pub mod platform;

pub use kernel::iterate::{
    Aggregate, Collection, Execution, IterationBuilder, IterationConfig, IterationKind,
    IterationTask, Key, Operation, Shape,
};
pub use kernel::{
    Defer, Executor, IterError, IterResult, Owner, Priority, Spawner, TaskGroup, TaskHandle,
    TaskId, TaskState,
};

/// Install the panic hook so panics in element functions reach the browser console
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Console logging helper
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);
}

/// Log to browser console (WASM)
#[cfg(target_arch = "wasm32")]
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => {
        $crate::log(&format!($($t)*))
    };
}

/// Log to stderr (native)
#[cfg(not(target_arch = "wasm32"))]
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => {
        eprintln!($($t)*)
    };
}
