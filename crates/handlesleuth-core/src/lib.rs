/// HandleSleuth Core: open file handle discovery for Windows.
///
/// Finds which processes hold files or directories open, resolving each
/// kernel handle to a drive-letter path and an owning process name. This is
/// what deployment tooling asks before replacing files in use.
///
/// # Modules
///
/// - [`snapshot`]: Point-in-time copy of the system handle table.
/// - [`query`]: Deadline-bounded object name queries.
/// - [`resolver`]: Parallel handle → path resolution and filtering.
/// - [`engine`]: Public entry points (`get_open_handles`, `close_handles`).
/// - [`platform`]: NT plumbing, object type catalog, device name map.
/// - [`model`]: Handle table rows and resolved output records.
/// - [`config`]: Resolver tunables.
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod platform;
pub mod query;
pub mod resolver;
pub mod snapshot;

pub use config::ResolverConfig;
pub use engine::HandleEngine;
#[cfg(windows)]
pub use engine::{close_handles, get_open_handles, get_open_handles_in};
pub use error::{HandleError, Result};
pub use model::{FileHandleInfo, HandleEntry, HandleKind};
