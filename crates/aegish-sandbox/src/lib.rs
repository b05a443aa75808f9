//! Second exec layer, applied from inside the runner
//!
//! The trampoline starts the runner with this library in `LD_PRELOAD`. The
//! constructor below runs before the runner's `main` and stacks a Landlock
//! ruleset that leaves the runner out, so commands cannot exec it again.
//! On failure the process exits with 126 before any user code is read.
//!
//! Outside Linux nothing runs on load.

use aegish::sandbox::{self, SandboxStatus};

/// Exit status when the layer cannot be applied
pub const LAYER_FAILURE_EXIT: i32 = 126;

// Test builds of this crate must not sandbox the test harness
#[cfg(all(target_os = "linux", not(test)))]
#[used]
#[link_section = ".init_array"]
static APPLY_ON_LOAD: extern "C" fn() = apply_on_load;

#[cfg(all(target_os = "linux", not(test)))]
extern "C" fn apply_on_load() {
    if let Err(message) = apply() {
        eprintln!("aegish: {message}");
        // SAFETY: terminates without running atexit handlers of a process
        // that has not reached main
        unsafe { libc::_exit(LAYER_FAILURE_EXIT) }
    }
}

/// Apply the layer; the error is the message printed before exiting.
pub fn apply() -> Result<(), String> {
    match sandbox::apply_runner_layer() {
        Ok(SandboxStatus::Enforced) => Ok(()),
        // Same outcome as the first layer on this kernel
        Ok(SandboxStatus::Unavailable(_)) => Ok(()),
        Err(e) => Err(format!("cannot apply the runner exec layer: {e}")),
    }
}
