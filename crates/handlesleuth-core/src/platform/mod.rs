/// Platform-specific functionality: NT handle-table plumbing, the object
/// type catalog, device-name translation, and process access.
///
/// Parsing and translation are platform-independent; everything that calls
/// into Windows is gated on `cfg(windows)`.
pub mod devices;
pub mod ntapi;
pub mod object_types;
#[cfg(windows)]
pub mod permissions;
#[cfg(windows)]
pub mod process;
pub mod process_list;

pub use devices::{DeviceMapping, DeviceNameMap, HARD_DISK_VOLUME_PREFIX, NETWORK_REDIRECTOR_PREFIX};
pub use object_types::{ObjectTypeCatalog, ObjectTypeInfo};
#[cfg(windows)]
pub use permissions::is_elevated;
