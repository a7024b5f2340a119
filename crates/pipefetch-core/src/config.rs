use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What happens to identifiers whose fetch yields no payload (empty body or failure).
/// Neither option retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DroppedPolicy {
    /// Log and forget.
    #[default]
    Discard,
    /// Log and append to a dead-letter file (identifier, reason).
    DeadLetter,
}

/// HTTP fetch parameters for the default curl fetcher (optional section in config.toml).
/// Missing keys take their default values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Seconds allowed for TCP/TLS connect.
    pub connect_timeout_secs: u64,
    /// Seconds allowed for the whole transfer.
    pub timeout_secs: u64,
    /// Abort bodies larger than this many bytes (None = no cap).
    #[serde(default)]
    pub max_body_bytes: Option<u64>,
    /// Follow 3xx redirects (up to 10 hops).
    pub follow_redirects: bool,
    /// Optional User-Agent header.
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 15,
            timeout_secs: 30,
            max_body_bytes: Some(64 * 1024 * 1024),
            follow_redirects: true,
            user_agent: None,
        }
    }
}

impl FetchConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Global configuration loaded from `~/.config/pipefetch/config.toml`.
/// Missing keys take their default values, except the optional ones
/// (`workers`, `deadline_secs`, `fetch.max_body_bytes`), where absent means unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum concurrent fetches (admission limiter capacity).
    pub max_in_flight: usize,
    /// Number of fetch worker tasks; defaults to `max_in_flight`.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Capacity of the identifier queue between source and fetch pool.
    pub identifier_queue_capacity: usize,
    /// Capacity of the payload queue between fetch pool and persist worker.
    pub payload_queue_capacity: usize,
    /// Overall deadline in seconds from pipeline start (None = no deadline).
    #[serde(default)]
    pub deadline_secs: Option<u64>,
    /// After cancellation, how long the persist worker may keep draining buffered payloads.
    pub drain_grace_secs: u64,
    /// Routing of empty/failed fetches.
    #[serde(default)]
    pub dropped_policy: DroppedPolicy,
    /// Extension appended to generated storage keys.
    pub file_extension: String,
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 50,
            workers: None,
            identifier_queue_capacity: 100,
            payload_queue_capacity: 50,
            deadline_secs: Some(5),
            drain_grace_secs: 2,
            dropped_policy: DroppedPolicy::Discard,
            file_extension: "txt".to_string(),
            fetch: FetchConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Worker task count (at least 1).
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or(self.max_in_flight).max(1)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }

    /// Reject values that would deadlock or disable a stage.
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            anyhow::bail!("max_in_flight must be at least 1");
        }
        if self.workers == Some(0) {
            anyhow::bail!("workers must be at least 1");
        }
        if self.identifier_queue_capacity == 0 || self.payload_queue_capacity == 0 {
            anyhow::bail!("queue capacities must be at least 1");
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("pipefetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<PipelineConfig> {
    load_or_init_at(&config_path()?)
}

/// Like [`load_or_init`] with an explicit path (used by `--config` and tests).
pub fn load_or_init_at(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let default_cfg = PipelineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)?;
    let cfg: PipelineConfig = toml::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.max_in_flight, 50);
        assert_eq!(cfg.worker_count(), 50);
        assert_eq!(cfg.identifier_queue_capacity, 100);
        assert_eq!(cfg.payload_queue_capacity, 50);
        assert_eq!(cfg.deadline(), Some(Duration::from_secs(5)));
        assert_eq!(cfg.dropped_policy, DroppedPolicy::Discard);
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            max_in_flight = 8
            workers = 4
            identifier_queue_capacity = 10
            payload_queue_capacity = 5
            drain_grace_secs = 1
            dropped_policy = "dead_letter"
            file_extension = "bin"

            [fetch]
            connect_timeout_secs = 3
            timeout_secs = 9
            follow_redirects = false
        "#;
        let cfg: PipelineConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_in_flight, 8);
        assert_eq!(cfg.worker_count(), 4);
        assert!(cfg.deadline().is_none());
        assert_eq!(cfg.dropped_policy, DroppedPolicy::DeadLetter);
        assert_eq!(cfg.fetch.timeout(), Duration::from_secs(9));
        assert!(!cfg.fetch.follow_redirects);
        assert!(cfg.fetch.max_body_bytes.is_none());
    }

    #[test]
    fn fetch_section_is_optional() {
        let toml = r#"
            max_in_flight = 2
            identifier_queue_capacity = 10
            payload_queue_capacity = 5
            deadline_secs = 30
            drain_grace_secs = 1
            file_extension = "txt"
        "#;
        let cfg: PipelineConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.fetch.connect_timeout_secs, 15);
        assert_eq!(cfg.deadline_secs, Some(30));
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let toml = r#"
            max_in_flight = 7

            [fetch]
            timeout_secs = 4
        "#;
        let cfg: PipelineConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_in_flight, 7);
        assert_eq!(cfg.identifier_queue_capacity, 100);
        assert_eq!(cfg.payload_queue_capacity, 50);
        assert_eq!(cfg.drain_grace_secs, 2);
        assert_eq!(cfg.file_extension, "txt");
        assert_eq!(cfg.fetch.timeout_secs, 4);
        assert_eq!(cfg.fetch.connect_timeout_secs, 15);
        assert!(cfg.fetch.follow_redirects);
        assert!(cfg.deadline_secs.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut cfg = PipelineConfig::default();
        cfg.max_in_flight = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.payload_queue_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.workers = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_or_init_writes_default_then_reads_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let first = load_or_init_at(&path).unwrap();
        assert!(path.exists());
        let second = load_or_init_at(&path).unwrap();
        assert_eq!(first.max_in_flight, second.max_in_flight);
        assert_eq!(first.file_extension, second.file_extension);
    }
}
