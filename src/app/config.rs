use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::monitor::dedupe::{DEFAULT_BUCKET_SECS, DEFAULT_RETENTION_BUCKETS};
use crate::monitor::MonitorSettings;

const APP_DIR: &str = ".config/callwatch";

/// Application settings, stored as TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Own number of the monitored line (e.g. "+4915127585179")
    #[serde(default)]
    pub phone_number: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Softphone log location
    #[serde(default)]
    pub log: LogSourceConfig,
    /// Repeat suppression
    #[serde(default)]
    pub dedupe: DedupeConfig,
    /// Additional call phrasings
    #[serde(default)]
    pub matcher: MatcherConfig,
    /// Realtime database connection
    #[serde(default)]
    pub publisher: PublisherConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            phone_number: String::new(),
            log_level: default_log_level(),
            log: LogSourceConfig::default(),
            dedupe: DedupeConfig::default(),
            matcher: MatcherConfig::default(),
            publisher: PublisherConfig::default(),
        }
    }
}

/// Where to find the MicroSIP log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSourceConfig {
    /// Explicit log path; skips the candidate search when set
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Locations tried in order when no explicit path is set
    #[serde(default = "default_log_candidates")]
    pub candidates: Vec<PathBuf>,
    /// Wait between polls when nothing new was logged
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Ask on the terminal when no candidate exists
    #[serde(default = "default_prompt_if_missing")]
    pub prompt_if_missing: bool,
}

fn default_log_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Roaming AppData on Windows
    if let Some(dirs) = directories::BaseDirs::new() {
        candidates.push(dirs.data_dir().join("MicroSIP").join("log.txt"));
    }
    if let Some(docs) = directories::UserDirs::new().and_then(|d| d.document_dir().map(Path::to_path_buf)) {
        candidates.push(docs.join("MicroSIP").join("log.txt"));
    }
    candidates.push(PathBuf::from(r"C:\Program Files\MicroSIP\log.txt"));
    candidates.push(PathBuf::from(r"C:\Program Files (x86)\MicroSIP\log.txt"));

    candidates
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_prompt_if_missing() -> bool {
    true
}

impl Default for LogSourceConfig {
    fn default() -> Self {
        Self {
            path: None,
            candidates: default_log_candidates(),
            poll_interval_ms: default_poll_interval_ms(),
            prompt_if_missing: default_prompt_if_missing(),
        }
    }
}

impl LogSourceConfig {
    /// Find the log file to watch.
    ///
    /// Order: the configured `path` (also set by `--log-path`), then the first
    /// existing candidate, then `ask` (if prompting is enabled). `ask` receives
    /// the checked candidates and returns the operator's answer, if any.
    pub fn locate<F>(&self, ask: F) -> Result<PathBuf>
    where
        F: FnOnce(&[PathBuf]) -> Result<Option<PathBuf>>,
    {
        if let Some(path) = self.path.as_deref() {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
            anyhow::bail!(
                "MicroSIP log not found: {}\n\
                 Next step: enable logging in MicroSIP and check the log path \
                 (--log-path or [log] path in the config file).",
                path.display()
            );
        }

        if let Some(found) = self.candidates.iter().find(|p| p.is_file()) {
            info!("MicroSIP log found: {}", found.display());
            return Ok(found.clone());
        }

        if self.prompt_if_missing {
            if let Some(answer) = ask(&self.candidates)? {
                if answer.is_file() {
                    return Ok(answer);
                }
                anyhow::bail!(
                    "MicroSIP log not found: {}\n\
                     Next step: check the path and start again.",
                    answer.display()
                );
            }
        }

        let checked: Vec<String> = self
            .candidates
            .iter()
            .map(|p| format!("  - {}", p.display()))
            .collect();
        anyhow::bail!(
            "MicroSIP log not found. Checked:\n{}\n\
             Next step: enable logging in MicroSIP, then pass --log-path \
             or set [log] path in the config file.",
            checked.join("\n")
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupeConfig {
    /// Width of one time bucket in seconds
    #[serde(default = "default_bucket_secs")]
    pub bucket_secs: u64,
    /// Number of past buckets remembered
    #[serde(default = "default_retention_buckets")]
    pub retention_buckets: u64,
}

fn default_bucket_secs() -> u64 {
    DEFAULT_BUCKET_SECS
}

fn default_retention_buckets() -> u64 {
    DEFAULT_RETENTION_BUCKETS
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            bucket_secs: default_bucket_secs(),
            retention_buckets: default_retention_buckets(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Regexes tried after the built-in phrasings; group 1 is the number
    #[serde(default)]
    pub extra_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// e.g. https://<project>-default-rtdb.europe-west1.firebasedatabase.app
    #[serde(default)]
    pub database_url: String,
    /// JSON file holding the auth token
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Number of past rides attached to a known customer
    #[serde(default = "default_recent_rides")]
    pub recent_rides: usize,
}

fn app_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().join(APP_DIR))
        .unwrap_or_else(|| std::env::temp_dir().join("callwatch"))
}

fn default_credentials_path() -> PathBuf {
    app_dir().join("firebase-key.json")
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_recent_rides() -> usize {
    5
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            credentials_path: default_credentials_path(),
            request_timeout_secs: default_request_timeout_secs(),
            recent_rides: default_recent_rides(),
        }
    }
}

impl PublisherConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl Config {
    /// Load the default config file (written with defaults if it does not exist)
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from a specific file, creating it with defaults when missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))?;
            Ok(config)
        } else {
            // First start: leave an editable file behind
            let config = Self::default();
            if let Err(e) = config.save_to(path) {
                tracing::warn!("Failed to save default config: {}", e);
            } else {
                info!("Wrote default config to {}", path.display());
            }
            Ok(config)
        }
    }

    /// ~/.config/callwatch/config.toml
    pub fn config_path() -> Result<PathBuf> {
        let base_dirs = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))?;
        Ok(base_dirs.home_dir().join(APP_DIR).join("config.toml"))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Loop settings; fails when the monitored number is not configured
    pub fn monitor_settings(&self) -> Result<MonitorSettings> {
        let called = self.phone_number.trim();
        if called.is_empty() {
            anyhow::bail!(
                "No phone number configured for the monitored line\n\
                 Next step: set phone_number in the config file \
                 (or pass --phone / set CALLWATCH_PHONE)."
            );
        }

        Ok(MonitorSettings {
            called: called.to_string(),
            poll_interval: self.log.poll_interval(),
            bucket_secs: self.dedupe.bucket_secs,
            retention_buckets: self.dedupe.retention_buckets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn source(candidates: Vec<PathBuf>) -> LogSourceConfig {
        LogSourceConfig {
            candidates,
            ..Default::default()
        }
    }

    fn no_answer(_: &[PathBuf]) -> Result<Option<PathBuf>> {
        Ok(None)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.dedupe.bucket_secs, 10);
        assert_eq!(config.dedupe.retention_buckets, 6);
        assert_eq!(config.publisher.recent_rides, 5);
        assert!(config.publisher.credentials_path.ends_with("firebase-key.json"));
        assert!(config.log.candidates.len() >= 2);
        assert!(config.log.candidates.iter().all(|p| p.ends_with("log.txt")));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            phone_number = "+4915127585179"

            [publisher]
            database_url = "https://taxi.firebaseio.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.phone_number, "+4915127585179");
        assert_eq!(config.publisher.database_url, "https://taxi.firebaseio.com");
        assert_eq!(config.publisher.request_timeout_secs, 10);
        assert_eq!(config.log_level, "info");
        assert!(config.matcher.extra_patterns.is_empty());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert!(config.phone_number.is_empty());

        let mut edited = config.clone();
        edited.phone_number = "+4930123".to_string();
        edited.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().phone_number, "+4930123");
    }

    #[test]
    fn test_monitor_settings_require_phone() {
        let mut config = Config::default();
        let err = config.monitor_settings().unwrap_err();
        assert!(err.to_string().contains("phone_number"));

        config.phone_number = " +4915127585179 ".to_string();
        config.dedupe.bucket_secs = 5;
        let settings = config.monitor_settings().unwrap();
        assert_eq!(settings.called, "+4915127585179");
        assert_eq!(settings.bucket_secs, 5);
    }

    #[test]
    fn test_locate_configured_path() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("log.txt");
        std::fs::write(&log, "").unwrap();

        let mut config = source(vec![]);
        config.path = Some(log.clone());
        assert_eq!(config.locate(no_answer).unwrap(), log);

        // A configured path that is missing is an error, candidates are not tried
        let mut config = source(vec![log.clone()]);
        config.path = Some(dir.path().join("missing.txt"));
        let err = config.locate(no_answer).unwrap_err();
        assert!(err.to_string().contains("missing.txt"));
    }

    #[test]
    fn test_locate_first_existing_candidate() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("a").join("log.txt");
        let second = dir.path().join("b").join("log.txt");
        let third = dir.path().join("c").join("log.txt");
        for p in [&second, &third] {
            std::fs::create_dir_all(p.parent().unwrap()).unwrap();
            std::fs::write(p, "").unwrap();
        }

        let found = source(vec![first, second.clone(), third])
            .locate(no_answer)
            .unwrap();
        assert_eq!(found, second);
    }

    #[test]
    fn test_locate_asks_when_nothing_found() {
        let dir = tempdir().unwrap();
        let answer = dir.path().join("custom.txt");
        std::fs::write(&answer, "").unwrap();
        let candidates = vec![dir.path().join("none.txt")];

        let found = source(candidates.clone())
            .locate(|checked| {
                assert_eq!(checked, candidates.as_slice());
                Ok(Some(answer.clone()))
            })
            .unwrap();
        assert_eq!(found, answer);
    }

    #[test]
    fn test_locate_lists_checked_paths() {
        let dir = tempdir().unwrap();
        let mut config = source(vec![dir.path().join("none.txt")]);
        config.prompt_if_missing = false;

        let err = config
            .locate(|_| panic!("must not prompt"))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("none.txt"));
        assert!(msg.contains("Next step"));
    }
}
