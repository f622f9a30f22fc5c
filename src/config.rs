//! # kobj Configuration
//!
//! Compile-time constants shared by the queue, the task lifecycle and the
//! host runtime. All limits are fixed at compile time.

/// Kernel tick count. Every timeout in this crate is expressed in ticks.
pub type Ticks = u32;

/// Task priority (higher = more important). `0` is the idle level.
pub type Priority = u8;

/// Tick frequency in Hz. At 1000 Hz one tick is one millisecond, which is
/// also the resolution of the host runtime's timed waits.
pub const TICK_HZ: u32 = 1000;

/// Timeout value meaning "block until the operation succeeds or the wait is
/// aborted". Mirrors the runtime's maximum delay.
pub const MAX_DELAY: Ticks = Ticks::MAX;

/// Maximum task name length in bytes. Longer names are truncated on a
/// character boundary.
pub const MAX_TASK_NAME_LEN: usize = 16;

/// Fixed-capacity task name storage.
pub type TaskName = heapless::String<MAX_TASK_NAME_LEN>;

/// Stack depth used by [`TaskConfig::named`](crate::task::TaskConfig::named).
/// Interpreted in the runtime's own units (words on most ports).
pub const DEFAULT_STACK_DEPTH: usize = 256;

/// Interval between teardown retries when the target task does not outrank
/// the caller. Trades shutdown latency against CPU time; any value keeps the
/// protocol correct.
pub const TEARDOWN_POLL_MS: u32 = 10;

/// Priority reported for execution contexts that are not kernel tasks
/// (the host's main thread, test threads).
pub const EXTERNAL_PRIORITY: Priority = 0;

/// Convert milliseconds to ticks, rounding down, saturating below
/// [`MAX_DELAY`].
#[inline]
pub const fn ms_to_ticks(ms: u32) -> Ticks {
    let ticks = (ms as u64 * TICK_HZ as u64) / 1000;
    if ticks >= MAX_DELAY as u64 {
        MAX_DELAY - 1
    } else {
        ticks as Ticks
    }
}

/// Ticks between teardown retries.
pub const TEARDOWN_POLL_TICKS: Ticks = ms_to_ticks(TEARDOWN_POLL_MS);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_to_ticks() {
        assert_eq!(ms_to_ticks(0), 0);
        assert_eq!(ms_to_ticks(10), 10);
        assert_eq!(TEARDOWN_POLL_TICKS, 10);
    }

    #[test]
    fn test_ms_to_ticks_never_reaches_max_delay() {
        assert_eq!(ms_to_ticks(u32::MAX), MAX_DELAY - 1);
    }
}
