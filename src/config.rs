use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one tablet replica. Threaded explicitly through the
/// constructors; there is no process-wide mutable configuration.
#[derive(Debug, Clone)]
pub struct TabletConfig {
    /// Directory holding the tablet's delta files.
    pub dir: PathBuf,

    /// Size at which the active delta memstore is flushed (default: 64MB)
    pub max_dms_size: usize,

    /// Block cache capacity, in blocks (default: 1024)
    pub block_cache_capacity: usize,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Election configuration
    pub election: ElectionConfig,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often to check for flush opportunities (default: 1s)
    pub flush_interval: Duration,

    /// How often to log metrics (default: 5s)
    pub metrics_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Per-peer vote RPC timeout (default: 1s)
    pub rpc_timeout: Duration,
}

impl Default for TabletConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./tabletdb"),
            max_dms_size: 64 * 1024 * 1024, // 64MB
            block_cache_capacity: 1024,
            scheduler: SchedulerConfig::default(),
            election: ElectionConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(1),
            metrics_interval: Duration::from_secs(5),
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(1),
        }
    }
}

impl TabletConfig {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the memstore flush threshold
    pub fn max_dms_size(mut self, size: usize) -> Self {
        self.max_dms_size = size;
        self
    }

    /// Set the block cache capacity
    pub fn block_cache_capacity(mut self, capacity: usize) -> Self {
        self.block_cache_capacity = capacity;
        self
    }

    /// Configure scheduler settings
    pub fn scheduler(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    /// Configure election settings
    pub fn election(mut self, config: ElectionConfig) -> Self {
        self.election = config;
        self
    }
}

impl SchedulerConfig {
    /// Set flush check interval
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set metrics log interval
    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }
}

impl ElectionConfig {
    /// Set the per-peer vote RPC timeout
    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TabletConfig::default();
        assert_eq!(config.dir, PathBuf::from("./tabletdb"));
        assert_eq!(config.max_dms_size, 64 * 1024 * 1024);
        assert_eq!(config.block_cache_capacity, 1024);
    }

    #[test]
    fn test_config_builder() {
        let config = TabletConfig::new("/tmp/test")
            .max_dms_size(32 * 1024 * 1024)
            .block_cache_capacity(64)
            .scheduler(
                SchedulerConfig::default()
                    .flush_interval(Duration::from_millis(500))
                    .metrics_interval(Duration::from_secs(1)),
            )
            .election(ElectionConfig::default().rpc_timeout(Duration::from_millis(250)));

        assert_eq!(config.dir, PathBuf::from("/tmp/test"));
        assert_eq!(config.max_dms_size, 32 * 1024 * 1024);
        assert_eq!(config.block_cache_capacity, 64);
        assert_eq!(config.scheduler.flush_interval, Duration::from_millis(500));
        assert_eq!(config.election.rpc_timeout, Duration::from_millis(250));
    }
}
