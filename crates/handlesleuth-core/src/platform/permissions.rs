/// Elevation checks.
///
/// Without administrator rights `OpenProcess(PROCESS_DUP_HANDLE)` fails for
/// most processes outside the caller's session, so an unelevated enumeration
/// only sees a fraction of the system's handles.
use crate::platform::ntapi::OwnedHandle;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

/// Check whether the current process is running with elevated (admin) privileges.
pub fn is_elevated() -> bool {
    let mut raw_token = HANDLE::default();
    // SAFETY: the pseudo-handle from GetCurrentProcess needs no closing; the
    // token handle is owned right after a successful open.
    let token = unsafe {
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut raw_token).is_err() {
            return false;
        }
        OwnedHandle::from_raw(raw_token)
    };

    let mut elevation = TOKEN_ELEVATION::default();
    let mut return_length = 0u32;
    // SAFETY: the output pointer and size describe `elevation`.
    let queried = unsafe {
        GetTokenInformation(
            token.as_raw(),
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut _),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut return_length,
        )
    };

    queried.is_ok() && elevation.TokenIsElevated != 0
}
