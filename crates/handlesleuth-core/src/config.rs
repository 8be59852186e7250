/// Resolver configuration.
///
/// Defaults match what the deployment tooling expects: a 125 ms name-query
/// deadline and one resolver worker per logical CPU.
use std::time::Duration;

/// Deadline applied to every individual object-name query.
pub const DEFAULT_NAME_QUERY_TIMEOUT: Duration = Duration::from_millis(125);

/// Tunables for one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// How long a single name query may run before its thread is abandoned.
    pub name_query_timeout: Duration,
    /// Number of threads in the resolver pool. Each worker can be parked on
    /// a name query for up to `name_query_timeout`.
    pub worker_threads: usize,
    /// Drop entries whose access mask is known to hang the name query
    /// before touching the owning process at all.
    pub skip_hang_prone_access: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            name_query_timeout: DEFAULT_NAME_QUERY_TIMEOUT,
            worker_threads: num_cpus::get().max(1),
            skip_hang_prone_access: false,
        }
    }
}

impl ResolverConfig {
    pub fn with_name_query_timeout(mut self, timeout: Duration) -> Self {
        self.name_query_timeout = timeout;
        self
    }

    /// Zero is clamped to one worker.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    pub fn with_skip_hang_prone_access(mut self, skip: bool) -> Self {
        self.skip_hang_prone_access = skip;
        self
    }

    /// The name-query deadline in whole milliseconds, as taken by
    /// `WaitForSingleObject`. Saturates below `INFINITE`.
    pub fn timeout_millis(&self) -> u32 {
        wait_millis(self.name_query_timeout)
    }
}

/// `timeout` as a `WaitForSingleObject` argument, saturating below
/// `INFINITE` (`u32::MAX`).
pub fn wait_millis(timeout: Duration) -> u32 {
    timeout.as_millis().min(u128::from(u32::MAX - 1)) as u32
}
