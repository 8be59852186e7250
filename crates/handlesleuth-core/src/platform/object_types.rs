/// Kernel object-type catalog: maps the numeric type index found in every
/// handle-table row to its type name ("File", "Directory", "Event", ...).
///
/// Type indices are assigned at boot and differ between Windows builds, so
/// the table is always read from the running kernel rather than hard-coded.
///
/// # Buffer layout
///
/// `NtQueryObject(NULL, ObjectTypesInformation)` fills:
///
/// ```text
/// OBJECT_TYPES_INFORMATION { NumberOfTypes: u32 }   padded to pointer size
/// OBJECT_TYPE_INFORMATION  { TypeName, ... }         fixed size, padded
/// WCHAR name[MaximumLength / 2]                      padded to pointer size
/// OBJECT_TYPE_INFORMATION  ...
/// ```
use crate::error::{HandleError, Result};
use crate::model::HandleKind;
use crate::platform::ntapi::{align_up, read_at, read_utf16, UnicodeString};
use compact_str::CompactString;
use serde::Serialize;
use std::collections::HashMap;
use std::mem::size_of;

#[repr(C)]
#[derive(Clone, Copy)]
struct ObjectTypesHeader {
    number_of_types: u32,
}

/// `OBJECT_TYPE_INFORMATION`. Only `type_name` and `type_index` are read;
/// the rest is declared so the record size matches the kernel's.
#[allow(dead_code)]
#[repr(C)]
#[derive(Clone, Copy)]
struct ObjectTypeRecord {
    type_name: UnicodeString,
    /// Object/handle counts and pool usage plus their high-water marks.
    usage: [u32; 12],
    invalid_attributes: u32,
    generic_mapping: [u32; 4],
    valid_access_mask: u32,
    security_required: u8,
    maintain_handle_count: u8,
    type_index: u8,
    reserved_byte: u8,
    pool_type: u32,
    default_paged_pool_charge: u32,
    default_non_paged_pool_charge: u32,
}

/// Byte offset of the first type record.
const FIRST_RECORD_OFFSET: usize = align_up(size_of::<ObjectTypesHeader>());
/// Distance from a record to its inline name.
const RECORD_STRIDE: usize = align_up(size_of::<ObjectTypeRecord>());

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectTypeInfo {
    pub type_index: u16,
    pub name: CompactString,
}

/// Immutable type-index → type-name lookup, shared read-only by every
/// resolver worker.
#[derive(Debug, Clone, Default)]
pub struct ObjectTypeCatalog {
    names: HashMap<u16, CompactString>,
}

impl ObjectTypeCatalog {
    /// Build a catalog from explicit entries. Later duplicates win.
    pub fn from_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = (u16, S)>,
        S: Into<CompactString>,
    {
        Self {
            names: types
                .into_iter()
                .map(|(index, name)| (index, name.into()))
                .collect(),
        }
    }

    /// Parse an `ObjectTypesInformation` buffer.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header: ObjectTypesHeader = read_at(bytes, 0)
            .ok_or(HandleError::MalformedObjectTypes("missing type count header"))?;

        let count = header.number_of_types as usize;
        let mut names = HashMap::with_capacity(count);
        let mut offset = FIRST_RECORD_OFFSET;

        for _ in 0..count {
            let record: ObjectTypeRecord = read_at(bytes, offset)
                .ok_or(HandleError::MalformedObjectTypes("type record truncated"))?;
            let name = read_utf16(bytes, offset + RECORD_STRIDE, record.type_name.length as usize)
                .ok_or(HandleError::MalformedObjectTypes("type name truncated"))?;

            names.insert(u16::from(record.type_index), CompactString::from(name));
            offset += RECORD_STRIDE + align_up(record.type_name.maximum_length as usize);
        }

        Ok(Self { names })
    }

    /// Read the catalog from the running kernel.
    ///
    /// Failure here is fatal to the engine: without the catalog no handle
    /// can be classified.
    #[cfg(windows)]
    pub fn build() -> Result<Self> {
        use crate::platform::ntapi::{query_growing, GrowFailure, NtQueryObject, OBJECT_TYPES_INFORMATION};
        use windows::Win32::Foundation::HANDLE;

        // The type table is a few kilobytes; anything near this is corrupt.
        const LIMIT: usize = 16 * 1024 * 1024;

        let buffer = query_growing(size_of::<ObjectTypesHeader>(), LIMIT, |buf, required| {
            // SAFETY: the buffer outlives the call and its length is passed
            // alongside the pointer.
            unsafe {
                NtQueryObject(
                    HANDLE::default(),
                    OBJECT_TYPES_INFORMATION,
                    buf.as_mut_ptr(),
                    buf.len() as u32,
                    required,
                )
            }
        })
        .map_err(|failure| match failure {
            GrowFailure::Status(status) => HandleError::ObjectTypes { status: status as u32 },
            GrowFailure::Limit(limit) => HandleError::BufferLimit { limit },
        })?;

        let catalog = Self::parse(buffer.bytes())?;
        tracing::debug!("Object type catalog loaded: {} types", catalog.len());
        Ok(catalog)
    }

    /// Type name for `type_index`.
    pub fn name(&self, type_index: u16) -> Option<&str> {
        self.names.get(&type_index).map(CompactString::as_str)
    }

    /// Reportable kind for `type_index`; `None` for unknown indices and for
    /// every type other than File/Directory.
    pub fn kind(&self, type_index: u16) -> Option<HandleKind> {
        self.name(type_index).and_then(HandleKind::from_type_name)
    }

    /// Index of the type called `name`, if present.
    pub fn index_of(&self, name: &str) -> Option<u16> {
        self.names
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(&index, _)| index)
    }

    /// All entries, sorted by type index.
    pub fn entries(&self) -> Vec<ObjectTypeInfo> {
        let mut entries: Vec<ObjectTypeInfo> = self
            .names
            .iter()
            .map(|(&type_index, name)| ObjectTypeInfo {
                type_index,
                name: name.clone(),
            })
            .collect();
        entries.sort_unstable_by_key(|e| e.type_index);
        entries
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
