/// Resolved output records.
use super::HandleEntry;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two object types the resolver reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleKind {
    File,
    Directory,
}

impl HandleKind {
    /// Map a kernel object-type name onto a reportable kind.
    ///
    /// Every other type ("Event", "Key", "Section", ...) yields `None`.
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "File" => Some(Self::File),
            "Directory" => Some(Self::Directory),
            _ => None,
        }
    }

    /// The kernel object-type name.
    pub fn label(self) -> &'static str {
        match self {
            Self::File => "File",
            Self::Directory => "Directory",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An open file or directory handle, resolved to a drive-letter path.
///
/// This is a value: the duplicated OS handle used to resolve it has already
/// been closed by the time the record exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHandleInfo {
    /// Image name of the owning process, without extension.
    pub process_name: String,
    /// Drive-letter form, e.g. `C:\Program Files\App\app.log`.
    pub dos_path: String,
    /// Kernel form, e.g. `\Device\HarddiskVolume3\Program Files\App\app.log`.
    pub nt_path: String,
    pub handle_type: HandleKind,
    /// The snapshot row this record was resolved from. Pass it to
    /// `close_handles` to close the handle in its owning process.
    pub raw_handle_entry: HandleEntry,
}

impl FileHandleInfo {
    #[inline]
    pub fn process_id(&self) -> u32 {
        self.raw_handle_entry.owning_process_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_file_and_directory_are_reportable() {
        assert_eq!(HandleKind::from_type_name("File"), Some(HandleKind::File));
        assert_eq!(
            HandleKind::from_type_name("Directory"),
            Some(HandleKind::Directory)
        );
        for other in &["Event", "Key", "Section", "file", "ALPC Port", ""] {
            assert_eq!(HandleKind::from_type_name(other), None, "{other}");
        }
    }

    #[test]
    fn kind_serializes_as_type_name() {
        assert_eq!(
            serde_json::to_string(&HandleKind::Directory).unwrap(),
            "\"Directory\""
        );
        assert_eq!(HandleKind::File.to_string(), "File");
    }
}
