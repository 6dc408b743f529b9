//! Monotonic microsecond timestamps used to name transient resources
//! (IPC rendezvous sockets, pivot-root scratch directories).

use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch. Not a true monotonic clock (callers
/// only need uniqueness across short-lived process lifetimes, not ordering
/// across a clock step), but named `epoch_us` throughout to match the paths
/// it appears in (`nscon.uds_<pid>_<epoch_us>`, `nscon.old_root.<epoch_us>`).
pub fn epoch_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_micros() as u64
}
