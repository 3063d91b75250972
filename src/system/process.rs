//! Process wiring for daemon supervision.

use nix::sys::prctl;
use nix::sys::signal::Signal;
use nix::unistd::getppid;
use tracing::warn;

/// Request SIGTERM when the parent process exits.
///
/// Returns `false` when the parent is already gone (reparented to init), in
/// which case the daemon should exit instead of running unsupervised.
pub fn arm_parent_death_signal() -> bool {
    if let Err(e) = prctl::set_pdeathsig(Signal::SIGTERM) {
        warn!("Failed to set parent-death signal: {}", e);
    }
    getppid().as_raw() != 1
}
