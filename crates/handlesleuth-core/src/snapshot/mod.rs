/// System-wide handle table snapshot.
///
/// One `NtQuerySystemInformation(SystemExtendedHandleInformation)` call
/// copies every handle open anywhere on the system into a single buffer:
///
/// ```text
/// SYSTEM_HANDLE_INFORMATION_EX     { NumberOfHandles, Reserved }
/// SYSTEM_HANDLE_TABLE_ENTRY_INFO_EX[NumberOfHandles]
/// ```
///
/// The snapshot is a point-in-time copy. Handles opened after it are
/// invisible, and handles closed after it simply fail to duplicate later.
use crate::error::{HandleError, Result};
use crate::model::HandleEntry;
use crate::platform::ntapi::read_at;
use chrono::{DateTime, Local};
use std::mem::size_of;

#[repr(C)]
#[derive(Clone, Copy)]
struct HandleTableHeader {
    number_of_handles: usize,
    reserved: usize,
}

/// `SYSTEM_HANDLE_TABLE_ENTRY_INFO_EX`.
#[allow(dead_code)]
#[repr(C)]
#[derive(Clone, Copy)]
struct HandleTableRecord {
    object: usize,
    unique_process_id: usize,
    handle_value: usize,
    granted_access: u32,
    creator_back_trace_index: u16,
    object_type_index: u16,
    handle_attributes: u32,
    reserved: u32,
}

/// Upper bound on the snapshot buffer. A busy server holds a few hundred
/// thousand handles at 40 bytes each; this leaves ample headroom while still
/// catching a runaway size report.
pub const MAX_SNAPSHOT_BYTES: usize = 512 * 1024 * 1024;

/// A captured handle table.
#[derive(Debug, Clone)]
pub struct HandleSnapshot {
    /// Wall-clock time of the capture.
    pub captured_at: DateTime<Local>,
    /// Every handle on the system, unfiltered and in kernel order.
    pub entries: Vec<HandleEntry>,
}

impl HandleSnapshot {
    /// Wrap an explicit list of entries, e.g. a filtered or synthetic table.
    pub fn from_entries(entries: Vec<HandleEntry>) -> Self {
        Self {
            captured_at: Local::now(),
            entries,
        }
    }

    /// Capture the live system handle table.
    #[cfg(windows)]
    pub fn capture() -> Result<Self> {
        let start = std::time::Instant::now();
        let entries = capture()?;
        tracing::debug!(
            "Handle table captured: {} entries in {:?}",
            entries.len(),
            start.elapsed()
        );
        Ok(Self::from_entries(entries))
    }

    /// Entries owned by `pid`.
    pub fn for_process(&self, pid: u32) -> impl Iterator<Item = &HandleEntry> {
        self.entries
            .iter()
            .filter(move |e| e.owning_process_id == pid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Capture every handle open on the system.
#[cfg(windows)]
pub fn capture() -> Result<Vec<HandleEntry>> {
    use crate::platform::ntapi::{
        query_growing, GrowFailure, NtQuerySystemInformation, SYSTEM_EXTENDED_HANDLE_INFORMATION,
    };

    let initial = size_of::<HandleTableHeader>() + size_of::<HandleTableRecord>();
    let buffer = query_growing(initial, MAX_SNAPSHOT_BYTES, |buf, required| {
        // SAFETY: the buffer outlives the call and its length is passed
        // alongside the pointer.
        unsafe {
            NtQuerySystemInformation(
                SYSTEM_EXTENDED_HANDLE_INFORMATION,
                buf.as_mut_ptr(),
                buf.len() as u32,
                required,
            )
        }
    })
    .map_err(|failure| match failure {
        GrowFailure::Status(status) => HandleError::Snapshot { status: status as u32 },
        GrowFailure::Limit(limit) => HandleError::BufferLimit { limit },
    })?;

    parse_handle_table(buffer.bytes())
}

/// Parse a `SystemExtendedHandleInformation` buffer.
pub fn parse_handle_table(bytes: &[u8]) -> Result<Vec<HandleEntry>> {
    let header: HandleTableHeader = read_at(bytes, 0)
        .ok_or(HandleError::MalformedSnapshot("missing handle count header"))?;

    let count = header.number_of_handles;
    let record_size = size_of::<HandleTableRecord>();
    let header_size = size_of::<HandleTableHeader>();

    let fits = count
        .checked_mul(record_size)
        .and_then(|n| n.checked_add(header_size))
        .is_some_and(|end| end <= bytes.len());
    if !fits {
        return Err(HandleError::MalformedSnapshot("record array truncated"));
    }

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        // In bounds: checked above.
        let Some(record) = read_at::<HandleTableRecord>(bytes, header_size + i * record_size) else {
            break;
        };
        entries.push(HandleEntry {
            owning_process_id: record.unique_process_id as u32,
            raw_handle_value: record.handle_value,
            object_type_index: record.object_type_index,
            access_mask: record.granted_access,
            raw_attributes: record.handle_attributes,
        });
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_table(records: &[HandleTableRecord], declared: usize) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&declared.to_ne_bytes());
        bytes.extend_from_slice(&0usize.to_ne_bytes());
        for record in records {
            let start = bytes.len();
            bytes.resize(start + size_of::<HandleTableRecord>(), 0);
            // SAFETY: exactly one record's worth of bytes was reserved at `start`.
            unsafe {
                std::ptr::write_unaligned(
                    bytes.as_mut_ptr().add(start) as *mut HandleTableRecord,
                    *record,
                );
            }
        }
        bytes
    }

    fn record(pid: usize, handle: usize, type_index: u16, access: u32) -> HandleTableRecord {
        HandleTableRecord {
            object: 0xFFFF_8000 + handle,
            unique_process_id: pid,
            handle_value: handle,
            granted_access: access,
            creator_back_trace_index: 0,
            object_type_index: type_index,
            handle_attributes: 2,
            reserved: 0,
        }
    }

    #[test]
    fn parses_every_record_in_order() {
        let records = [
            record(4, 0x4, 7, 0x001F_FFFF),
            record(1200, 0x44, 37, 0x0012_019F),
            record(1200, 0x48, 3, 0x0000_000F),
        ];
        let entries = parse_handle_table(&encode_table(&records, records.len())).unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[1],
            HandleEntry {
                owning_process_id: 1200,
                raw_handle_value: 0x44,
                object_type_index: 37,
                access_mask: 0x0012_019F,
                raw_attributes: 2,
            }
        );
        assert_eq!(entries[0].owning_process_id, 4);
        assert_eq!(entries[2].object_type_index, 3);
    }

    #[test]
    fn empty_table() {
        let entries = parse_handle_table(&encode_table(&[], 0)).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn overstated_count_is_rejected() {
        let records = [record(1200, 0x44, 37, 0)];
        let err = parse_handle_table(&encode_table(&records, 2)).unwrap_err();
        assert!(matches!(err, HandleError::MalformedSnapshot(_)));

        let err = parse_handle_table(&encode_table(&records, usize::MAX)).unwrap_err();
        assert!(matches!(err, HandleError::MalformedSnapshot(_)));
    }

    #[test]
    fn missing_header_is_rejected() {
        let err = parse_handle_table(&[0u8; 3]).unwrap_err();
        assert!(matches!(err, HandleError::MalformedSnapshot(_)));
    }

    #[test]
    fn for_process_filters_by_owner() {
        let records = [record(10, 0x4, 37, 0), record(11, 0x8, 37, 0), record(10, 0xC, 3, 0)];
        let snapshot =
            HandleSnapshot::from_entries(parse_handle_table(&encode_table(&records, 3)).unwrap());
        let handles: Vec<usize> = snapshot.for_process(10).map(|e| e.raw_handle_value).collect();
        assert_eq!(handles, vec![0x4, 0xC]);
        assert_eq!(snapshot.len(), 3);
    }
}
