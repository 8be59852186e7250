/// Public entry points: enumerate open file handles and close them.
///
/// A [`HandleEngine`] owns the object type catalog, which is read from the
/// kernel once and never changes while the system is up. The device map is
/// rebuilt on every call because drive letters can be reassigned.
use crate::config::ResolverConfig;
use crate::platform::ObjectTypeCatalog;

#[cfg(windows)]
use crate::{
    error::Result,
    model::{FileHandleInfo, HandleEntry},
    platform::{process, DeviceNameMap},
    query::SafeObjectNameQuery,
    resolver::{self, NativeHandleAccess},
    snapshot::HandleSnapshot,
};

pub struct HandleEngine {
    catalog: ObjectTypeCatalog,
    config: ResolverConfig,
}

impl HandleEngine {
    /// Engine over an explicit catalog.
    pub fn new(catalog: ObjectTypeCatalog, config: ResolverConfig) -> Self {
        Self { catalog, config }
    }

    /// Engine over the running kernel's type catalog.
    #[cfg(windows)]
    pub fn open(config: ResolverConfig) -> Result<Self> {
        Ok(Self::new(ObjectTypeCatalog::build()?, config))
    }

    pub fn catalog(&self) -> &ObjectTypeCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Capture the system handle table and resolve every file and directory
    /// handle in it, optionally keeping only paths under `directory`.
    #[cfg(windows)]
    pub fn open_handles(&self, directory: Option<&str>) -> Result<Vec<FileHandleInfo>> {
        let snapshot = HandleSnapshot::capture()?;
        self.resolve_snapshot(&snapshot, directory)
    }

    /// Like [`open_handles`](Self::open_handles), restricted to handles
    /// owned by `pid`.
    #[cfg(windows)]
    pub fn open_handles_of(&self, pid: u32, directory: Option<&str>) -> Result<Vec<FileHandleInfo>> {
        let snapshot = HandleSnapshot::capture()?;
        let owned = HandleSnapshot {
            captured_at: snapshot.captured_at,
            entries: snapshot.for_process(pid).copied().collect(),
        };
        tracing::debug!("{} of {} handles belong to pid {pid}", owned.len(), snapshot.len());
        self.resolve_snapshot(&owned, directory)
    }

    /// Resolve an already captured, possibly pre-filtered, snapshot.
    #[cfg(windows)]
    pub fn resolve_snapshot(
        &self,
        snapshot: &HandleSnapshot,
        directory: Option<&str>,
    ) -> Result<Vec<FileHandleInfo>> {
        let devices = DeviceNameMap::build();
        for mapping in devices.mappings() {
            tracing::debug!("  {} => {}", mapping.nt_device_prefix, mapping.drive_letter);
        }
        let access =
            NativeHandleAccess::new(SafeObjectNameQuery::new(self.config.name_query_timeout));
        tracing::info!(
            "Resolving {} handles captured at {}",
            snapshot.len(),
            snapshot.captured_at.format("%H:%M:%S%.3f")
        );
        resolver::resolve(
            &access,
            &snapshot.entries,
            &self.catalog,
            &devices,
            directory,
            &self.config,
        )
    }
}

/// Every open file and directory handle on the system.
#[cfg(windows)]
pub fn get_open_handles() -> Result<Vec<FileHandleInfo>> {
    HandleEngine::open(ResolverConfig::default())?.open_handles(None)
}

/// Open file and directory handles whose drive-letter path starts with
/// `directory_path`, compared case-insensitively.
#[cfg(windows)]
pub fn get_open_handles_in(directory_path: &str) -> Result<Vec<FileHandleInfo>> {
    HandleEngine::open(ResolverConfig::default())?.open_handles(Some(directory_path))
}

/// Close each handle inside its owning process.
///
/// Best effort: an owner that has exited or a handle that is already gone
/// is skipped without error.
#[cfg(windows)]
pub fn close_handles(entries: &[HandleEntry]) {
    let mut closed = 0usize;
    for entry in entries {
        let pid = entry.owning_process_id;
        let owner = match process::open_for_duplicate(pid) {
            Ok(owner) => owner,
            Err(e) => {
                tracing::debug!("close_handles: cannot open pid {pid}: {e}");
                continue;
            }
        };
        match process::close_in_owner(&owner, entry.raw_handle_value) {
            Ok(()) => closed += 1,
            Err(e) => tracing::debug!(
                "close_handles: cannot close {:#x} in pid {pid}: {e}",
                entry.raw_handle_value
            ),
        }
    }
    if !entries.is_empty() {
        tracing::info!("Closed {closed} of {} handles", entries.len());
    }
}
