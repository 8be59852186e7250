/// Watchdog thread around `NtQueryObject(ObjectNameInformation)`.
///
/// Each query runs on a raw OS thread created by `NtCreateThreadEx` with
/// `THREAD_CREATE_FLAGS_SKIP_THREAD_ATTACH`. The loader runs no DLL attach
/// or detach callouts on that thread, so it never enters the loader lock
/// and never runs Rust TLS callbacks. The start routine makes exactly one
/// system call and returns its NTSTATUS as the thread exit code. Nothing the
/// thread can be holding when `TerminateThread` lands is shared with the rest
/// of the process.
///
/// # Abandonment
///
/// When the deadline passes the thread is terminated. If it has not died by
/// the time we check again, the kernel may still write into the result
/// buffer, so the frame is leaked rather than freed underneath it. Finished
/// queries hand their frame back for the next query on the same worker.
use super::frame::NameQueryFrame;
use super::{interpret_status, NAME_BUFFER_BYTES};
use crate::error::{HandleError, Result};
use crate::platform::ntapi::{
    NtCreateThreadEx, NtQueryObject, OwnedHandle, OBJECT_NAME_INFORMATION, STATUS_SUCCESS,
    STATUS_TIMEOUT, THREAD_ALL_ACCESS, THREAD_CREATE_FLAGS_SKIP_THREAD_ATTACH,
};
use std::ffi::c_void;
use std::time::Duration;
use tracing::warn;

use windows::Win32::Foundation::{HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Threading::{
    GetCurrentProcess, GetExitCodeThread, TerminateThread, WaitForSingleObject,
};

/// How long to wait for a terminated thread to actually exit before its
/// frame is given up for lost.
const TERMINATION_GRACE_MS: u32 = 5;

/// Thread start routine. Must not allocate, lock, unwind, or touch TLS.
unsafe extern "system" fn name_query_routine(param: *mut c_void) -> u32 {
    let frame = &mut *(param as *mut NameQueryFrame);
    let len = frame.byte_len() as u32;
    NtQueryObject(
        HANDLE(frame.handle as *mut c_void),
        OBJECT_NAME_INFORMATION,
        frame.buffer.as_mut_ptr().cast(),
        len,
        std::ptr::null_mut(),
    ) as u32
}

/// Start `name_query_routine` on `frame`.
///
/// # Safety
/// `frame` must stay allocated until the thread has exited.
unsafe fn spawn_query_thread(frame: *mut NameQueryFrame) -> Result<OwnedHandle> {
    let mut thread = HANDLE::default();
    let status = NtCreateThreadEx(
        &mut thread,
        THREAD_ALL_ACCESS,
        std::ptr::null(),
        GetCurrentProcess(),
        name_query_routine,
        frame.cast(),
        THREAD_CREATE_FLAGS_SKIP_THREAD_ATTACH,
        0,
        0,
        0,
        std::ptr::null_mut(),
    );
    if status != STATUS_SUCCESS {
        return Err(HandleError::ThreadCreate { status: status as u32 });
    }
    Ok(OwnedHandle::from_raw(thread))
}

/// Bounded-time object name lookup.
#[derive(Debug, Clone, Copy)]
pub struct SafeObjectNameQuery {
    timeout: Duration,
}

impl SafeObjectNameQuery {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Name of the object behind `handle`, or `None` if it has no usable
    /// name or the query did not finish before the deadline.
    ///
    /// Returns within roughly the configured timeout regardless of how the
    /// underlying call behaves.
    pub fn query(&self, handle: &OwnedHandle) -> Result<Option<String>> {
        let raw = handle.as_raw().0 as usize;
        let frame = Box::into_raw(NameQueryFrame::take(raw));

        // SAFETY: `frame` stays allocated until the thread is known to have
        // exited, or forever if it is abandoned.
        let thread = match unsafe { spawn_query_thread(frame) } {
            Ok(thread) => thread,
            Err(e) => {
                // SAFETY: no thread was created, so the frame is still ours.
                NameQueryFrame::give_back(unsafe { Box::from_raw(frame) });
                return Err(e);
            }
        };

        let millis = crate::config::wait_millis(self.timeout);
        // SAFETY: `thread` is a live thread handle owned by this call.
        let wait = unsafe { WaitForSingleObject(thread.as_raw(), millis) };

        let finished = if wait == WAIT_OBJECT_0 {
            true
        } else {
            if wait == WAIT_TIMEOUT {
                warn!(
                    "Name query for handle {raw:#x} exceeded {:?}; terminating its thread",
                    self.timeout
                );
            }
            // SAFETY: the thread runs only `name_query_routine`, which holds
            // no user-mode locks, and was created without loader callouts.
            unsafe {
                let _ = TerminateThread(thread.as_raw(), STATUS_TIMEOUT as u32);
                WaitForSingleObject(thread.as_raw(), TERMINATION_GRACE_MS) == WAIT_OBJECT_0
            }
        };

        if !finished {
            warn!(
                "Abandoning name query thread for handle {raw:#x}; its {NAME_BUFFER_BYTES} byte frame is leaked"
            );
            return Ok(None);
        }

        // SAFETY: the thread has exited, so nothing else references the
        // frame any more.
        let frame = unsafe { Box::from_raw(frame) };
        let mut exit_code = 0u32;
        // SAFETY: `thread` is still owned and the out-pointer is valid.
        let outcome = unsafe { GetExitCodeThread(thread.as_raw(), &mut exit_code) }
            .map_err(HandleError::from)
            .and_then(|()| interpret_status(exit_code as i32, frame.bytes()));
        NameQueryFrame::give_back(frame);
        outcome
    }
}

impl Default for SafeObjectNameQuery {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_NAME_QUERY_TIMEOUT)
    }
}
