/// [`HandleAccess`] backed by the live system.
use super::HandleAccess;
use crate::error::Result;
use crate::model::HandleEntry;
use crate::platform::ntapi::OwnedHandle;
use crate::platform::{process, process_list};
use crate::query::SafeObjectNameQuery;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, trace};

pub struct NativeHandleAccess {
    name_query: SafeObjectNameQuery,
    /// Kernel process list, read on the first pid Win32 cannot name.
    kernel_names: OnceLock<HashMap<u32, String>>,
}

impl NativeHandleAccess {
    pub fn new(name_query: SafeObjectNameQuery) -> Self {
        Self {
            name_query,
            kernel_names: OnceLock::new(),
        }
    }

    fn kernel_name(&self, pid: u32) -> Option<String> {
        self.kernel_names
            .get_or_init(|| {
                process_list::capture().unwrap_or_else(|e| {
                    debug!("Kernel process list unavailable: {e}");
                    HashMap::new()
                })
            })
            .get(&pid)
            .cloned()
    }
}

impl HandleAccess for NativeHandleAccess {
    type Duplicate = OwnedHandle;

    fn duplicate(&self, entry: &HandleEntry) -> Option<OwnedHandle> {
        let pid = entry.owning_process_id;
        let owner = match process::open_for_duplicate(pid) {
            Ok(owner) => owner,
            Err(e) if process::is_expected_open_failure(&e) => {
                trace!("Skipping pid {pid}: {e}");
                return None;
            }
            Err(e) => {
                debug!("OpenProcess({pid}) failed: {e}");
                return None;
            }
        };

        match process::duplicate_same_access(&owner, entry.raw_handle_value) {
            Ok(local) => Some(local),
            Err(e) if process::is_expected_duplicate_failure(&e) => {
                trace!("Skipping handle {:#x} in pid {pid}: {e}", entry.raw_handle_value);
                None
            }
            Err(e) => {
                debug!(
                    "DuplicateHandle({:#x}) from pid {pid} failed: {e}",
                    entry.raw_handle_value
                );
                None
            }
        }
    }

    fn is_queryable(&self, duplicate: &OwnedHandle) -> bool {
        process::is_disk_file(duplicate)
    }

    fn object_name(&self, duplicate: &OwnedHandle) -> Result<Option<String>> {
        self.name_query.query(duplicate)
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        process::process_name(pid).or_else(|| self.kernel_name(pid))
    }
}
