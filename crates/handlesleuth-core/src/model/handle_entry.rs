/// One row of the system-wide handle table.
///
/// Entries are plain values copied out of the kernel snapshot buffer. The
/// `(owning_process_id, raw_handle_value)` pair is unique within a single
/// snapshot, but handle values are recycled by the OS so it must not be used
/// as an identity across snapshots.
use serde::{Deserialize, Serialize};

/// Access-mask / attribute combinations that are known to make the object
/// name query block (synchronous pipe and device handles with pending I/O).
const HANG_PRONE_ACCESS: &[(u32, &[u32])] = &[
    (0x0012_0189, &[0, 2]),
    (0x0012_019F, &[0, 2]),
    (0x001A_019F, &[2]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleEntry {
    /// Process that owns the handle.
    pub owning_process_id: u32,
    /// Handle value, only meaningful inside the owning process.
    pub raw_handle_value: usize,
    /// Index into the kernel object-type table.
    pub object_type_index: u16,
    /// Granted access mask.
    pub access_mask: u32,
    /// Handle attributes (inherit, protect-from-close, ...).
    pub raw_attributes: u32,
}

impl HandleEntry {
    /// The per-snapshot identity of this handle.
    #[inline]
    pub fn key(&self) -> (u32, usize) {
        (self.owning_process_id, self.raw_handle_value)
    }

    /// Whether this entry matches one of the access/attribute signatures
    /// that are known to hang the name query.
    pub fn is_known_hang_prone(&self) -> bool {
        HANG_PRONE_ACCESS.iter().any(|(mask, attributes)| {
            *mask == self.access_mask && attributes.contains(&self.raw_attributes)
        })
    }
}
