/// Parallel handle resolution.
///
/// Turns raw snapshot rows into [`FileHandleInfo`] records. Each row is
/// resolved independently on a rayon pool:
///
/// 1. classify the object type, keeping File and Directory only
/// 2. duplicate the handle out of its owning process
/// 3. query its kernel name under the watchdog deadline
/// 4. translate `\Device\HarddiskVolumeN\...` to `C:\...`
/// 5. apply the optional directory filter
/// 6. attach the owning process name
///
/// Every per-row failure is a silent skip. Only errors that mean the host
/// itself is broken (an unexpected name-query status) abort the pass.
///
/// OS access sits behind the [`HandleAccess`] trait so the orchestration can
/// be exercised with synthetic tables on any platform.
#[cfg(windows)]
pub mod native;

#[cfg(windows)]
pub use native::NativeHandleAccess;

use crate::config::ResolverConfig;
use crate::error::Result;
use crate::model::{FileHandleInfo, HandleEntry};
use crate::platform::{DeviceNameMap, ObjectTypeCatalog, HARD_DISK_VOLUME_PREFIX};
use parking_lot::RwLock;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// The OS operations the resolver needs for one handle.
pub trait HandleAccess: Sync {
    /// A handle duplicated into this process. Dropping it closes it.
    type Duplicate;

    /// Open the owning process and duplicate `entry` into this process.
    /// `None` when the process is gone, protected, or the handle cannot be
    /// duplicated.
    fn duplicate(&self, entry: &HandleEntry) -> Option<Self::Duplicate>;

    /// Cheap pre-check before the name query; `false` skips the entry.
    fn is_queryable(&self, _duplicate: &Self::Duplicate) -> bool {
        true
    }

    /// Kernel object name of `duplicate`, within the configured deadline.
    fn object_name(&self, duplicate: &Self::Duplicate) -> Result<Option<String>>;

    /// Image name of `pid`, or `None` if it has exited or cannot be opened.
    fn process_name(&self, pid: u32) -> Option<String>;
}

/// Case-insensitive DOS path prefix filter.
#[derive(Debug, Clone)]
pub struct PathFilter {
    prefix: String,
}

impl PathFilter {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_lowercase(),
        }
    }

    pub fn matches(&self, dos_path: &str) -> bool {
        dos_path.to_lowercase().starts_with(&self.prefix)
    }
}

/// Process names looked up during one pass. Many handles share an owner, so
/// this avoids reopening the same process thousands of times.
#[derive(Default)]
struct ProcessNameCache {
    names: RwLock<HashMap<u32, Option<String>>>,
}

impl ProcessNameCache {
    fn get_or_lookup<A: HandleAccess>(&self, access: &A, pid: u32) -> Option<String> {
        if let Some(cached) = self.names.read().get(&pid) {
            return cached.clone();
        }
        let name = access.process_name(pid);
        self.names.write().entry(pid).or_insert(name).clone()
    }
}

/// Why entries dropped out of a pass, for the summary log line.
#[derive(Default)]
struct SkipCounters {
    candidates: AtomicU64,
    hang_prone: AtomicU64,
    inaccessible: AtomicU64,
    unnamed: AtomicU64,
    untranslated: AtomicU64,
    filtered: AtomicU64,
    orphaned: AtomicU64,
}

impl SkipCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything one worker needs to resolve a row. Shared read-only.
struct ResolveContext<'a, A: HandleAccess> {
    access: &'a A,
    catalog: &'a ObjectTypeCatalog,
    devices: &'a DeviceNameMap,
    filter: Option<PathFilter>,
    skip_hang_prone: bool,
    process_names: ProcessNameCache,
    counters: SkipCounters,
}

impl<A: HandleAccess> ResolveContext<'_, A> {
    fn resolve_entry(&self, entry: &HandleEntry) -> Result<Option<FileHandleInfo>> {
        let Some(kind) = self.catalog.kind(entry.object_type_index) else {
            return Ok(None);
        };
        SkipCounters::bump(&self.counters.candidates);

        if self.skip_hang_prone && entry.is_known_hang_prone() {
            SkipCounters::bump(&self.counters.hang_prone);
            return Ok(None);
        }

        let Some(duplicate) = self.access.duplicate(entry) else {
            SkipCounters::bump(&self.counters.inaccessible);
            return Ok(None);
        };

        let name = if self.access.is_queryable(&duplicate) {
            self.access.object_name(&duplicate)
        } else {
            Ok(None)
        };
        drop(duplicate);

        let Some(nt_path) = name? else {
            SkipCounters::bump(&self.counters.unnamed);
            return Ok(None);
        };

        if !nt_path.starts_with(HARD_DISK_VOLUME_PREFIX) {
            SkipCounters::bump(&self.counters.untranslated);
            return Ok(None);
        }
        let Some(dos_path) = self.devices.translate(&nt_path) else {
            SkipCounters::bump(&self.counters.untranslated);
            return Ok(None);
        };

        if let Some(filter) = &self.filter {
            if !filter.matches(&dos_path) {
                SkipCounters::bump(&self.counters.filtered);
                return Ok(None);
            }
        }

        let Some(process_name) = self
            .process_names
            .get_or_lookup(self.access, entry.owning_process_id)
        else {
            SkipCounters::bump(&self.counters.orphaned);
            return Ok(None);
        };

        Ok(Some(FileHandleInfo {
            process_name,
            dos_path,
            nt_path,
            handle_type: kind,
            raw_handle_entry: *entry,
        }))
    }
}

/// Resolve `handles` to file and directory records.
///
/// Output order is unspecified. An empty `path_filter` or `None` keeps every
/// resolvable entry.
pub fn resolve<A: HandleAccess>(
    access: &A,
    handles: &[HandleEntry],
    catalog: &ObjectTypeCatalog,
    devices: &DeviceNameMap,
    path_filter: Option<&str>,
    config: &ResolverConfig,
) -> Result<Vec<FileHandleInfo>> {
    let start = Instant::now();
    let context = ResolveContext {
        access,
        catalog,
        devices,
        filter: path_filter.filter(|p| !p.is_empty()).map(PathFilter::new),
        skip_hang_prone: config.skip_hang_prone_access,
        process_names: ProcessNameCache::default(),
        counters: SkipCounters::default(),
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.worker_threads)
        .thread_name(|i| format!("handlesleuth-resolver-{i}"))
        .build()?;

    let resolved: Vec<FileHandleInfo> = pool.install(|| {
        handles
            .par_iter()
            .map(|entry| context.resolve_entry(entry))
            .filter_map(Result::transpose)
            .collect::<Result<Vec<_>>>()
    })?;

    let c = &context.counters;
    info!(
        "Resolved {} of {} handles ({} file/directory candidates) in {:?}; skipped: {} hang-prone, {} inaccessible, {} unnamed, {} off-volume, {} filtered, {} orphaned",
        resolved.len(),
        handles.len(),
        c.candidates.load(Ordering::Relaxed),
        start.elapsed(),
        c.hang_prone.load(Ordering::Relaxed),
        c.inaccessible.load(Ordering::Relaxed),
        c.unnamed.load(Ordering::Relaxed),
        c.untranslated.load(Ordering::Relaxed),
        c.filtered.load(Ordering::Relaxed),
        c.orphaned.load(Ordering::Relaxed),
    );

    Ok(resolved)
}
