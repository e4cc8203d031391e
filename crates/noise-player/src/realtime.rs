//! Best-effort real-time scheduling for the playback thread.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PriorityError {
    #[error("real-time scheduling denied: {0}")]
    Denied(std::io::Error),
    #[error("real-time scheduling is not supported on this platform")]
    Unsupported,
}

/// Move the calling thread to `SCHED_FIFO` at the highest priority the OS allows.
///
/// Returns the priority that was applied. Usually needs `CAP_SYS_NICE` or an rtprio
/// limit; callers are expected to carry on at normal priority when this fails.
#[cfg(unix)]
pub fn promote_current_thread() -> Result<i32, PriorityError> {
    // SAFETY: plain libc calls on the current thread; `param` is a fully initialized
    // `sched_param` that outlives the call.
    unsafe {
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max < 0 {
            return Err(PriorityError::Denied(std::io::Error::last_os_error()));
        }
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = max;
        let rc = libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param);
        if rc != 0 {
            return Err(PriorityError::Denied(std::io::Error::from_raw_os_error(rc)));
        }
        Ok(max)
    }
}

#[cfg(not(unix))]
pub fn promote_current_thread() -> Result<i32, PriorityError> {
    Err(PriorityError::Unsupported)
}
