// config.rs - Tunables for the sync worker and repository

use std::path::PathBuf;
use std::time::Duration;

/// How often the background worker runs a sync cycle.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(120);

/// Issues fetched per page. The live API caps pages at 100; larger values
/// are advisory only.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// How old cached sub-resources (comments, documents, updates, attachments)
/// may be before a read schedules a background refresh.
pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_secs(300);

/// Sync worker configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between background sync cycles
    pub interval: Duration,
    /// Page size for issue pagination
    pub page_size: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SYNC_INTERVAL,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Repository configuration
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Age beyond which cached sub-resources are considered stale
    pub staleness_threshold: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: DEFAULT_STALENESS_THRESHOLD,
        }
    }
}

/// Default on-disk location for the cache database.
///
/// `$XDG_CONFIG_HOME/linearfs/cache.db` (or the platform equivalent), with
/// `$HOME/linearfs/cache.db` as the fallback when no config dir exists.
pub fn default_cache_path() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("linearfs")
        .join("cache.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let sync = SyncConfig::default();
        assert_eq!(sync.interval, Duration::from_secs(120));
        assert_eq!(sync.page_size, 100);

        let repo = RepositoryConfig::default();
        assert_eq!(repo.staleness_threshold, Duration::from_secs(300));
    }

    #[test]
    fn test_default_cache_path_shape() {
        let path = default_cache_path();
        assert!(path.ends_with("linearfs/cache.db"));
    }
}
