/// Error type for the handle resolution engine.
///
/// Only conditions that make the whole enumeration meaningless are surfaced
/// here. Per-handle problems (process exited, handle already closed, name not
/// available) are skipped inside the resolver and never become errors.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HandleError {
    #[error("object type table query failed (NTSTATUS {status:#010X})")]
    ObjectTypes { status: u32 },

    #[error("object type table is malformed: {0}")]
    MalformedObjectTypes(&'static str),

    #[error("system handle table query failed (NTSTATUS {status:#010X})")]
    Snapshot { status: u32 },

    #[error("system handle table is malformed: {0}")]
    MalformedSnapshot(&'static str),

    #[error("process list query failed (NTSTATUS {status:#010X})")]
    ProcessList { status: u32 },

    #[error("process list is malformed: {0}")]
    MalformedProcessList(&'static str),

    #[error("name query thread could not be created (NTSTATUS {status:#010X})")]
    ThreadCreate { status: u32 },

    #[error("query buffer would exceed {limit} bytes")]
    BufferLimit { limit: usize },

    #[error("object name query failed (NTSTATUS {status:#010X})")]
    NameQuery { status: u32 },

    #[error("failed to build resolver thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[cfg(windows)]
    #[error("Windows API call failed: {0}")]
    Os(#[from] windows::core::Error),
}

pub type Result<T> = std::result::Result<T, HandleError>;
