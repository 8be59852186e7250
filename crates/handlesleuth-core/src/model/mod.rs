/// Data model for HandleSleuth.
///
/// Snapshot rows and the resolved records built from them.
pub mod file_handle;
pub mod handle_entry;

pub use file_handle::{FileHandleInfo, HandleKind};
pub use handle_entry::HandleEntry;
