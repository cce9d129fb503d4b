use std::path::PathBuf;
use std::time::Duration;

/// Default number of entries returned by a history query.
pub const DEFAULT_HISTORY_LIMIT: u32 = 10;

/// Runtime settings for the ledger store and engine.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
    /// How long SQLite waits on a locked database before reporting busy.
    pub busy_timeout: Duration,
    /// How long to wait for a free pool connection.
    pub acquire_timeout: Duration,
    /// Deadline for one attempt at a unit of work, including commit.
    pub operation_timeout: Duration,
    /// Extra attempts after a conflict before giving up.
    pub max_retries: u32,
    /// Base delay between conflict retries, multiplied by the attempt number.
    pub retry_backoff: Duration,
    pub history_limit: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("tellerbook.db"),
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_backoff: Duration::from_millis(25),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl LedgerConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Self::default()
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit;
        self
    }

    /// Total attempts a conflicting unit of work gets.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}
