/// Settings of the background worker thread.
///
/// ```rust,ignore
/// let config = SchedulerConfig::new()
///     .thread_name("compaction")
///     .stack_size(256 * 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Shows up in panic messages and debuggers.
    pub thread_name: String,
    /// Stack size of the worker, in bytes.
    pub stack_size: usize,
}

pub const DEFAULT_THREAD_NAME: &str = "bg-worker";
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

impl SchedulerConfig {
    pub fn new() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            stack_size: DEFAULT_STACK_SIZE,
        }
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// # Panics
    ///
    /// Panics if `bytes == 0`.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "stack_size must be > 0");
        self.stack_size = bytes;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}
