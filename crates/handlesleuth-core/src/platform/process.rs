/// Cross-process handle operations: opening owners, duplicating their
/// handles into this process, and naming processes.
use crate::platform::ntapi::OwnedHandle;
use std::path::Path;
use windows::core::PWSTR;
use windows::Win32::Foundation::{
    DuplicateHandle, DUPLICATE_CLOSE_SOURCE, DUPLICATE_HANDLE_OPTIONS, DUPLICATE_SAME_ACCESS,
    E_ACCESSDENIED, E_INVALIDARG, ERROR_INVALID_HANDLE, ERROR_NOT_SUPPORTED, HANDLE,
};
use windows::Win32::Storage::FileSystem::{GetFileType, FILE_TYPE_DISK};
use windows::Win32::System::Threading::{
    GetCurrentProcess, OpenProcess, QueryFullProcessImageNameW, PROCESS_DUP_HANDLE,
    PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
};

/// PID of the kernel's "System" process, which has no image path.
const SYSTEM_PROCESS_ID: u32 = 4;

/// Open `pid` with duplicate-handle access only.
pub fn open_for_duplicate(pid: u32) -> windows::core::Result<OwnedHandle> {
    // SAFETY: plain Win32 call; the returned handle is immediately owned.
    let handle = unsafe { OpenProcess(PROCESS_DUP_HANDLE, false, pid)? };
    // SAFETY: `OpenProcess` returned a fresh real handle.
    Ok(unsafe { OwnedHandle::from_raw(handle) })
}

/// Whether an `OpenProcess` failure is the expected "process is protected
/// or already gone" case rather than something worth logging.
pub fn is_expected_open_failure(err: &windows::core::Error) -> bool {
    err.code() == E_ACCESSDENIED || err.code() == E_INVALIDARG
}

/// Whether a `DuplicateHandle` failure is the expected "not duplicable,
/// already closed, or not ours to take" case.
pub fn is_expected_duplicate_failure(err: &windows::core::Error) -> bool {
    err.code() == E_ACCESSDENIED
        || err.code() == ERROR_NOT_SUPPORTED.to_hresult()
        || err.code() == ERROR_INVALID_HANDLE.to_hresult()
}

fn duplicate(
    owner: &OwnedHandle,
    raw_handle_value: usize,
    options: DUPLICATE_HANDLE_OPTIONS,
) -> windows::core::Result<OwnedHandle> {
    let mut local = HANDLE::default();
    // SAFETY: `owner` is a live process handle with PROCESS_DUP_HANDLE; the
    // source value is only interpreted by the kernel inside that process.
    unsafe {
        DuplicateHandle(
            owner.as_raw(),
            HANDLE(raw_handle_value as *mut std::ffi::c_void),
            GetCurrentProcess(),
            &mut local,
            0,
            false,
            options,
        )?;
    }
    // SAFETY: `DuplicateHandle` succeeded, so `local` is a fresh real handle.
    Ok(unsafe { OwnedHandle::from_raw(local) })
}

/// Duplicate `raw_handle_value` from `owner` into this process with the same
/// access rights.
pub fn duplicate_same_access(
    owner: &OwnedHandle,
    raw_handle_value: usize,
) -> windows::core::Result<OwnedHandle> {
    duplicate(owner, raw_handle_value, DUPLICATE_SAME_ACCESS)
}

/// Close `raw_handle_value` inside `owner` by duplicating it with
/// close-source semantics and dropping the local copy.
pub fn close_in_owner(owner: &OwnedHandle, raw_handle_value: usize) -> windows::core::Result<()> {
    let local = duplicate(
        owner,
        raw_handle_value,
        DUPLICATE_CLOSE_SOURCE | DUPLICATE_SAME_ACCESS,
    )?;
    drop(local);
    Ok(())
}

/// Whether `handle` refers to an on-disk file or directory. Pipes and
/// character devices report other file types.
pub fn is_disk_file(handle: &OwnedHandle) -> bool {
    // SAFETY: `handle` is live for the duration of the borrow.
    unsafe { GetFileType(handle.as_raw()) == FILE_TYPE_DISK }
}

/// Image name of `pid` without directory or extension, e.g. `explorer`.
///
/// `None` for processes without a Win32 image path, such as `Registry` and
/// `Memory Compression`; [`super::process_list`] names those.
pub fn process_name(pid: u32) -> Option<String> {
    if pid == SYSTEM_PROCESS_ID {
        return Some("System".to_string());
    }

    // SAFETY: plain Win32 call; the returned handle is immediately owned.
    let process = unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
        OwnedHandle::from_raw(handle)
    };

    let mut path_buf = vec![0u16; 32_768];
    let mut size = path_buf.len() as u32;
    // SAFETY: `size` holds the buffer capacity in characters and the buffer
    // outlives the call.
    unsafe {
        QueryFullProcessImageNameW(
            process.as_raw(),
            PROCESS_NAME_WIN32,
            PWSTR(path_buf.as_mut_ptr()),
            &mut size,
        )
        .ok()?;
    }

    let path = String::from_utf16_lossy(&path_buf[..size as usize]);
    Path::new(&path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
}
