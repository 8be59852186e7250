/// Kernel process list: image names as the process table records them.
///
/// `NtQuerySystemInformation(SystemProcessInformation)` names every process,
/// including pseudo-processes such as `Registry`, `Memory Compression`, and
/// `Secure System` that have no Win32 image path. It is the fallback when
/// `QueryFullProcessImageNameW` cannot name a process.
///
/// ```text
/// SYSTEM_PROCESS_INFORMATION { NextEntryOffset, ..., ImageName, ..., UniqueProcessId, ... }
/// SYSTEM_THREAD_INFORMATION[NumberOfThreads]
/// ... ImageName characters ...
/// SYSTEM_PROCESS_INFORMATION ...   (at NextEntryOffset; 0 ends the list)
/// ```
///
/// `ImageName.Buffer` is an absolute address inside the returned buffer, so
/// parsing needs the address the buffer was filled at.
use crate::error::{HandleError, Result};
use crate::platform::ntapi::{read_at, read_utf16, UnicodeString};
use std::collections::HashMap;
use std::path::Path;

/// `SYSTEM_INFORMATION_CLASS::SystemProcessInformation`.
pub const SYSTEM_PROCESS_INFORMATION: u32 = 5;

/// Leading fields of `SYSTEM_PROCESS_INFORMATION`, up to the process id.
#[allow(dead_code)]
#[repr(C)]
#[derive(Clone, Copy)]
struct ProcessRecordHead {
    next_entry_offset: u32,
    number_of_threads: u32,
    working_set_private_size: i64,
    hard_fault_count: u32,
    number_of_threads_high_watermark: u32,
    cycle_time: u64,
    create_time: i64,
    user_time: i64,
    kernel_time: i64,
    image_name: UnicodeString,
    base_priority: i32,
    unique_process_id: usize,
}

/// Map each pid in a `SystemProcessInformation` buffer to its image name
/// without extension. `base` is the address `bytes` was filled at.
///
/// Processes with no image name (the idle process) are left out.
pub fn parse_process_names(bytes: &[u8], base: usize) -> Result<HashMap<u32, String>> {
    let mut names = HashMap::new();
    let mut offset = 0usize;

    loop {
        let record: ProcessRecordHead = read_at(bytes, offset)
            .ok_or(HandleError::MalformedProcessList("process record truncated"))?;

        let image = record.image_name;
        if image.length > 0 {
            let name_offset = image
                .buffer
                .checked_sub(base)
                .ok_or(HandleError::MalformedProcessList("image name outside buffer"))?;
            let name = read_utf16(bytes, name_offset, image.length as usize)
                .ok_or(HandleError::MalformedProcessList("image name truncated"))?;
            names.insert(record.unique_process_id as u32, image_stem(&name));
        }

        match record.next_entry_offset as usize {
            0 => break,
            next => {
                offset = offset
                    .checked_add(next)
                    .ok_or(HandleError::MalformedProcessList("entry offset overflow"))?;
            }
        }
    }

    Ok(names)
}

fn image_stem(image_name: &str) -> String {
    Path::new(image_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| image_name.to_string())
}

/// Read and parse the live process list.
#[cfg(windows)]
pub fn capture() -> Result<HashMap<u32, String>> {
    use crate::platform::ntapi::{query_growing, GrowFailure, NtQuerySystemInformation};

    // A process list this large is corrupt.
    const LIMIT: usize = 64 * 1024 * 1024;

    let buffer = query_growing(256 * 1024, LIMIT, |buf, required| {
        // SAFETY: the buffer outlives the call and its length is passed
        // alongside the pointer.
        unsafe {
            NtQuerySystemInformation(
                SYSTEM_PROCESS_INFORMATION,
                buf.as_mut_ptr(),
                buf.len() as u32,
                required,
            )
        }
    })
    .map_err(|failure| match failure {
        GrowFailure::Status(status) => HandleError::ProcessList { status: status as u32 },
        GrowFailure::Limit(limit) => HandleError::BufferLimit { limit },
    })?;

    let bytes = buffer.bytes();
    let names = parse_process_names(bytes, bytes.as_ptr() as usize)?;
    tracing::debug!("Kernel process list read: {} named processes", names.len());
    Ok(names)
}
