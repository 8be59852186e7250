/// Object name queries.
///
/// `NtQueryObject(ObjectNameInformation)` is synchronous and, for some
/// handle kinds (a pipe with a pending synchronous read, certain device
/// handles), blocks until an unrelated condition clears. The
/// [`SafeObjectNameQuery`] watchdog runs each call on a disposable thread and
/// walks away from it after a deadline.
///
/// Result interpretation is kept separate from the thread machinery so the
/// status classification and buffer parsing can be tested on any platform.
#[cfg_attr(not(windows), allow(dead_code))]
mod frame;
#[cfg(windows)]
pub mod watchdog;

#[cfg(windows)]
pub use watchdog::SafeObjectNameQuery;

use crate::error::{HandleError, Result};
use crate::platform::ntapi::{
    read_at, read_utf16, UnicodeString, STATUS_ACCESS_DENIED, STATUS_NOT_SUPPORTED,
    STATUS_OBJECT_PATH_INVALID, STATUS_PENDING, STATUS_PIPE_DISCONNECTED, STATUS_SUCCESS,
    STATUS_TIMEOUT,
};
use std::mem::size_of;

/// Size of the buffer handed to each name query: an `OBJECT_NAME_INFORMATION`
/// header followed by room for the longest possible `UNICODE_STRING` payload.
pub const NAME_BUFFER_BYTES: usize = size_of::<UnicodeString>() + 0x1_0000;

/// Statuses that mean "this object has no name we can use" rather than a
/// broken host. `STATUS_TIMEOUT` is also the exit code given to an abandoned
/// query thread.
const BENIGN_STATUSES: [i32; 6] = [
    STATUS_TIMEOUT,
    STATUS_PENDING,
    STATUS_NOT_SUPPORTED,
    STATUS_OBJECT_PATH_INVALID,
    STATUS_ACCESS_DENIED,
    STATUS_PIPE_DISCONNECTED,
];

pub fn is_benign_status(status: i32) -> bool {
    BENIGN_STATUSES.contains(&status)
}

/// Extract the name from an `OBJECT_NAME_INFORMATION` buffer. The kernel
/// stores the characters inline, directly after the `UNICODE_STRING` header.
///
/// Unnamed objects report a zero length and yield `None`.
pub fn parse_object_name(bytes: &[u8]) -> Option<String> {
    let header: UnicodeString = read_at(bytes, 0)?;
    if header.length == 0 {
        return None;
    }
    let name = read_utf16(bytes, size_of::<UnicodeString>(), header.length as usize)?;
    (!name.is_empty()).then_some(name)
}

/// Turn the status of a finished name query into its outcome.
pub fn interpret_status(status: i32, bytes: &[u8]) -> Result<Option<String>> {
    match status {
        STATUS_SUCCESS => Ok(parse_object_name(bytes)),
        s if is_benign_status(s) => Ok(None),
        s => Err(HandleError::NameQuery { status: s as u32 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ntapi::STATUS_INFO_LENGTH_MISMATCH;

    fn encode_name(name: &str) -> Vec<u8> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let byte_len = units.len() * 2;
        let header = UnicodeString {
            length: byte_len as u16,
            maximum_length: byte_len as u16 + 2,
            buffer: 0xDEAD_0000,
        };
        let mut bytes = vec![0u8; size_of::<UnicodeString>()];
        // SAFETY: `bytes` holds exactly one header.
        unsafe {
            std::ptr::write_unaligned(bytes.as_mut_ptr() as *mut UnicodeString, header);
        }
        for unit in units {
            bytes.extend_from_slice(&unit.to_ne_bytes());
        }
        bytes.extend_from_slice(&[0, 0]);
        bytes
    }

    #[test]
    fn success_returns_inline_name() {
        let bytes = encode_name(r"\Device\HarddiskVolume3\Windows\win.ini");
        let name = interpret_status(STATUS_SUCCESS, &bytes).unwrap();
        assert_eq!(name.as_deref(), Some(r"\Device\HarddiskVolume3\Windows\win.ini"));
    }

    #[test]
    fn unnamed_object_yields_none() {
        let bytes = encode_name("");
        assert_eq!(interpret_status(STATUS_SUCCESS, &bytes).unwrap(), None);
        assert_eq!(parse_object_name(&[]), None);
    }

    #[test]
    fn length_past_buffer_yields_none() {
        let mut bytes = encode_name("abc");
        bytes.truncate(size_of::<UnicodeString>() + 2);
        assert_eq!(parse_object_name(&bytes), None);
    }

    #[test]
    fn benign_statuses_yield_none() {
        for status in BENIGN_STATUSES {
            assert_eq!(interpret_status(status, &[]).unwrap(), None, "{status:#X}");
        }
    }

    #[test]
    fn other_failures_are_errors() {
        let err = interpret_status(STATUS_INFO_LENGTH_MISMATCH, &[]).unwrap_err();
        assert!(matches!(err, HandleError::NameQuery { status: 0xC000_0004 }));
    }

    #[test]
    fn name_buffer_fits_longest_name() {
        assert!(NAME_BUFFER_BYTES >= size_of::<UnicodeString>() + u16::MAX as usize);
    }
}
