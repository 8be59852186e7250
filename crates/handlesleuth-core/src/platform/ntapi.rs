/// Native NT API plumbing shared by the snapshot, catalog, and name query.
///
/// The ntdll entry points used here are not part of the documented Win32
/// surface, so they are declared directly against `ntdll` rather than pulled
/// from the `windows` crate. Status codes and buffer layout helpers are
/// platform-independent so the parsers built on them can be unit tested
/// anywhere.
use std::mem::size_of;

pub const STATUS_SUCCESS: i32 = 0;
pub const STATUS_TIMEOUT: i32 = 0x0000_0102;
pub const STATUS_PENDING: i32 = 0x0000_0103;
pub const STATUS_INFO_LENGTH_MISMATCH: i32 = 0xC000_0004_u32 as i32;
pub const STATUS_ACCESS_DENIED: i32 = 0xC000_0022_u32 as i32;
pub const STATUS_OBJECT_PATH_INVALID: i32 = 0xC000_0039_u32 as i32;
pub const STATUS_PIPE_DISCONNECTED: i32 = 0xC000_00B0_u32 as i32;
pub const STATUS_NOT_SUPPORTED: i32 = 0xC000_00BB_u32 as i32;

/// `SYSTEM_INFORMATION_CLASS::SystemExtendedHandleInformation`.
pub const SYSTEM_EXTENDED_HANDLE_INFORMATION: u32 = 64;
/// `OBJECT_INFORMATION_CLASS::ObjectNameInformation`.
pub const OBJECT_NAME_INFORMATION: u32 = 1;
/// `OBJECT_INFORMATION_CLASS::ObjectTypesInformation`.
pub const OBJECT_TYPES_INFORMATION: u32 = 3;

/// `THREAD_ALL_ACCESS`.
pub const THREAD_ALL_ACCESS: u32 = 0x001F_FFFF;
/// `NtCreateThreadEx` flag: the new thread runs no `DLL_THREAD_ATTACH` or
/// `DLL_THREAD_DETACH` callouts and never takes the loader lock for them.
pub const THREAD_CREATE_FLAGS_SKIP_THREAD_ATTACH: u32 = 0x0000_0002;

/// Layout-compatible `UNICODE_STRING`. The buffer pointer is kept as an
/// integer; parsers read the characters from their inline position instead
/// of dereferencing it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct UnicodeString {
    /// Length in bytes, excluding any terminator.
    pub length: u16,
    /// Capacity in bytes.
    pub maximum_length: u16,
    pub buffer: usize,
}

/// Round `n` up to the native allocation granularity (pointer size).
#[inline]
pub const fn align_up(n: usize) -> usize {
    let align = size_of::<usize>();
    (n + align - 1) & !(align - 1)
}

/// Copy a `T` out of `bytes` at `offset`, or `None` if it does not fit.
///
/// Only used with `#[repr(C)]` plain-data types made of integers.
#[inline]
pub(crate) fn read_at<T: Copy>(bytes: &[u8], offset: usize) -> Option<T> {
    let end = offset.checked_add(size_of::<T>())?;
    if end > bytes.len() {
        return None;
    }
    // SAFETY: the range [offset, end) is in bounds and `T` is a plain-data
    // type for which every bit pattern is valid. `read_unaligned` tolerates
    // any alignment.
    Some(unsafe { std::ptr::read_unaligned(bytes.as_ptr().add(offset) as *const T) })
}

/// Decode `byte_len` bytes of UTF-16 starting at `offset`, trimming any
/// trailing NULs. `None` if the range is out of bounds.
pub(crate) fn read_utf16(bytes: &[u8], offset: usize, byte_len: usize) -> Option<String> {
    let end = offset.checked_add(byte_len)?;
    let raw = bytes.get(offset..end)?;
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
        .collect();
    let text = String::from_utf16_lossy(&units);
    Some(text.trim_end_matches('\0').to_string())
}

/// A pointer-aligned, zero-initialised byte buffer handed to NT queries.
pub struct QueryBuffer {
    words: Vec<u64>,
}

impl QueryBuffer {
    /// Allocate at least `len` bytes.
    pub fn with_len(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(size_of::<u64>()).max(1)],
        }
    }

    pub fn len(&self) -> usize {
        self.words.len() * size_of::<u64>()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn as_mut_ptr(&mut self) -> *mut std::ffi::c_void {
        self.words.as_mut_ptr().cast()
    }

    pub fn bytes(&self) -> &[u8] {
        // SAFETY: a `[u64]` is always viewable as `[u8]` of eight times the
        // length; the borrow keeps the allocation alive.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.len()) }
    }
}

/// Why a growable query gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowFailure {
    /// The query returned a status other than success or length-mismatch.
    Status(i32),
    /// The kernel asked for more than the caller's ceiling.
    Limit(usize),
}

/// Run a query that reports `STATUS_INFO_LENGTH_MISMATCH` plus a required
/// size when its buffer is too small, growing and retrying until it succeeds.
///
/// `query` receives the buffer and an out-parameter for the required length
/// and returns the raw NTSTATUS. When the reported size is not larger than
/// the current buffer (the table grew between calls) the buffer is doubled.
pub fn query_growing<F>(initial: usize, limit: usize, mut query: F) -> Result<QueryBuffer, GrowFailure>
where
    F: FnMut(&mut QueryBuffer, &mut u32) -> i32,
{
    let mut buffer = QueryBuffer::with_len(initial);
    loop {
        let mut required: u32 = 0;
        match query(&mut buffer, &mut required) {
            STATUS_SUCCESS => return Ok(buffer),
            STATUS_INFO_LENGTH_MISMATCH => {
                let current = buffer.len();
                let next = if required as usize > current {
                    required as usize
                } else {
                    current.saturating_mul(2)
                };
                if next > limit {
                    return Err(GrowFailure::Limit(limit));
                }
                buffer = QueryBuffer::with_len(next);
            }
            status => return Err(GrowFailure::Status(status)),
        }
    }
}

#[cfg(windows)]
mod ffi {
    use std::ffi::c_void;
    use windows::Win32::Foundation::HANDLE;

    #[link(name = "ntdll")]
    extern "system" {
        pub fn NtQueryObject(
            handle: HANDLE,
            object_information_class: u32,
            object_information: *mut c_void,
            object_information_length: u32,
            return_length: *mut u32,
        ) -> i32;

        pub fn NtQuerySystemInformation(
            system_information_class: u32,
            system_information: *mut c_void,
            system_information_length: u32,
            return_length: *mut u32,
        ) -> i32;

        pub fn NtCreateThreadEx(
            thread_handle: *mut HANDLE,
            desired_access: u32,
            object_attributes: *const c_void,
            process_handle: HANDLE,
            start_routine: ThreadStartRoutine,
            argument: *mut c_void,
            create_flags: u32,
            zero_bits: usize,
            stack_size: usize,
            maximum_stack_size: usize,
            attribute_list: *mut c_void,
        ) -> i32;
    }

    /// `PUSER_THREAD_START_ROUTINE`: the return value becomes the thread's
    /// exit status.
    pub type ThreadStartRoutine = unsafe extern "system" fn(argument: *mut c_void) -> u32;
}

#[cfg(windows)]
pub use ffi::{NtCreateThreadEx, NtQueryObject, NtQuerySystemInformation, ThreadStartRoutine};

#[cfg(windows)]
pub use owned::OwnedHandle;

#[cfg(windows)]
mod owned {
    use windows::Win32::Foundation::{CloseHandle, HANDLE};

    /// A kernel handle owned by this process, closed on drop.
    ///
    /// Every process, duplicated, and thread handle the engine opens goes
    /// through this guard so all exit paths release it.
    #[derive(Debug)]
    pub struct OwnedHandle(HANDLE);

    impl OwnedHandle {
        /// Take ownership of `handle`.
        ///
        /// # Safety
        /// `handle` must be a real (non-pseudo) handle that nothing else will
        /// close.
        pub unsafe fn from_raw(handle: HANDLE) -> Self {
            Self(handle)
        }

        pub fn as_raw(&self) -> HANDLE {
            self.0
        }

        pub fn is_invalid(&self) -> bool {
            self.0.is_invalid()
        }
    }

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            if !self.0.is_invalid() {
                // SAFETY: we own this handle and close it exactly once.
                unsafe {
                    let _ = CloseHandle(self.0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_pointer_size() {
        let align = size_of::<usize>();
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), align);
        assert_eq!(align_up(align), align);
        assert_eq!(align_up(align + 1), align * 2);
    }

    #[test]
    fn read_at_rejects_out_of_bounds() {
        let bytes = [1u8, 0, 0, 0, 2, 0];
        assert_eq!(read_at::<u32>(&bytes, 0), Some(1));
        assert_eq!(read_at::<u16>(&bytes, 4), Some(2));
        assert_eq!(read_at::<u32>(&bytes, 4), None);
        assert_eq!(read_at::<u32>(&bytes, usize::MAX), None);
    }

    #[test]
    fn read_utf16_trims_terminators() {
        let mut bytes = Vec::new();
        for unit in "File\0".encode_utf16() {
            bytes.extend_from_slice(&unit.to_ne_bytes());
        }
        assert_eq!(read_utf16(&bytes, 0, bytes.len()).as_deref(), Some("File"));
        assert_eq!(read_utf16(&bytes, 2, 4).as_deref(), Some("il"));
        assert_eq!(read_utf16(&bytes, 0, bytes.len() + 2), None);
    }

    #[test]
    fn query_buffer_is_at_least_requested_size() {
        let buffer = QueryBuffer::with_len(13);
        assert_eq!(buffer.len(), 16);
        assert!(buffer.bytes().iter().all(|&b| b == 0));
        assert_eq!(QueryBuffer::with_len(0).len(), 8);
    }

    #[test]
    fn query_growing_grows_to_reported_size() {
        let mut sizes = Vec::new();
        let buffer = query_growing(8, 1 << 20, |buf, required| {
            sizes.push(buf.len());
            if buf.len() < 100 {
                *required = 100;
                STATUS_INFO_LENGTH_MISMATCH
            } else {
                STATUS_SUCCESS
            }
        })
        .unwrap();
        assert_eq!(sizes, vec![8, 104]);
        assert!(buffer.len() >= 100);
    }

    #[test]
    fn query_growing_doubles_when_report_is_stale() {
        let mut calls = 0;
        let buffer = query_growing(64, 1 << 20, |buf, required| {
            calls += 1;
            // Reports the size it was just given, as if the table grew.
            *required = buf.len() as u32;
            if calls < 3 {
                STATUS_INFO_LENGTH_MISMATCH
            } else {
                STATUS_SUCCESS
            }
        })
        .unwrap();
        assert_eq!(buffer.len(), 256);
    }

    #[test]
    fn query_growing_stops_at_limit_and_on_errors() {
        let result = query_growing(8, 1024, |_, required| {
            *required = 4096;
            STATUS_INFO_LENGTH_MISMATCH
        });
        assert!(matches!(result, Err(GrowFailure::Limit(1024))));

        let result = query_growing(8, 1024, |_, _| STATUS_ACCESS_DENIED);
        assert!(matches!(result, Err(GrowFailure::Status(STATUS_ACCESS_DENIED))));
    }
}
