//! Engine configuration
//!
//! Values come from, lowest priority first: built-in defaults, a TOML file
//! (`STRAND_CONFIG_PATH`, or `./strand.toml` when present), `STRAND_*`
//! environment variables (a `.env` file is loaded first), and finally any
//! overrides set on the builder.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::EngineError;

const ENV_PREFIX: &str = "STRAND";
const CONFIG_PATH_VAR: &str = "STRAND_CONFIG_PATH";
const DEFAULT_CONFIG_FILE: &str = "strand.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of worker threads running script slices
    pub worker_threads: usize,
    /// Heap budget per instance, in accounted bytes
    pub heap_limit: usize,
    /// Stack budget per instance, in call units
    pub stack_limit: usize,
    pub time_slice_ms: u64,
    /// Longest the sleep service waits without rechecking its queue
    pub sleep_watchdog_ms: u64,
    /// Cap on queued events of one kind per instance
    pub max_event_queue: usize,
    pub state_dir: PathBuf,
    pub engine_name: String,
    /// Stamp written into migration payloads; a mismatch discards the payload
    pub migration_version: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            heap_limit: 65536,
            stack_limit: 256,
            time_slice_ms: 50,
            sleep_watchdog_ms: 1000,
            max_event_queue: 64,
            state_dir: PathBuf::from("./script_state"),
            engine_name: "strand".to_string(),
            migration_version: 1,
        }
    }
}

impl EngineConfig {
    /// Load from the default sources
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn time_slice(&self) -> Duration {
        Duration::from_millis(self.time_slice_ms)
    }

    pub fn sleep_watchdog(&self) -> Duration {
        Duration::from_millis(self.sleep_watchdog_ms)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let checks = [
            ("worker_threads", self.worker_threads as u64),
            ("heap_limit", self.heap_limit as u64),
            ("stack_limit", self.stack_limit as u64),
            ("time_slice_ms", self.time_slice_ms),
            ("sleep_watchdog_ms", self.sleep_watchdog_ms),
            ("max_event_queue", self.max_event_queue as u64),
        ];
        for (key, value) in checks {
            if value == 0 {
                return Err(EngineError::Config(format!("{} must be greater than zero", key)));
            }
        }
        if self.engine_name.trim().is_empty() {
            return Err(EngineError::Config("engine_name must not be empty".into()));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}

/// Builder for [`EngineConfig`]; unset fields fall through to the file,
/// environment and defaults
#[derive(Debug, Default, Clone)]
pub struct EngineConfigBuilder {
    config_path: Option<PathBuf>,
    skip_env: bool,
    worker_threads: Option<usize>,
    heap_limit: Option<usize>,
    stack_limit: Option<usize>,
    time_slice_ms: Option<u64>,
    sleep_watchdog_ms: Option<u64>,
    max_event_queue: Option<usize>,
    state_dir: Option<PathBuf>,
    engine_name: Option<String>,
    migration_version: Option<u32>,
}

impl EngineConfigBuilder {
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Ignore `.env`, `STRAND_*` variables and the default file location
    pub fn isolated(mut self) -> Self {
        self.skip_env = true;
        self
    }

    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = Some(n);
        self
    }

    pub fn heap_limit(mut self, bytes: usize) -> Self {
        self.heap_limit = Some(bytes);
        self
    }

    pub fn stack_limit(mut self, units: usize) -> Self {
        self.stack_limit = Some(units);
        self
    }

    pub fn time_slice_ms(mut self, ms: u64) -> Self {
        self.time_slice_ms = Some(ms);
        self
    }

    pub fn sleep_watchdog_ms(mut self, ms: u64) -> Self {
        self.sleep_watchdog_ms = Some(ms);
        self
    }

    pub fn max_event_queue(mut self, n: usize) -> Self {
        self.max_event_queue = Some(n);
        self
    }

    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn engine_name(mut self, name: impl Into<String>) -> Self {
        self.engine_name = Some(name.into());
        self
    }

    pub fn migration_version(mut self, version: u32) -> Self {
        self.migration_version = Some(version);
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        if !self.skip_env {
            dotenvy::dotenv().ok();
        }

        let defaults = EngineConfig::default();
        let mut builder = config::Config::builder()
            .set_default("worker_threads", defaults.worker_threads as i64)?
            .set_default("heap_limit", defaults.heap_limit as i64)?
            .set_default("stack_limit", defaults.stack_limit as i64)?
            .set_default("time_slice_ms", defaults.time_slice_ms as i64)?
            .set_default("sleep_watchdog_ms", defaults.sleep_watchdog_ms as i64)?
            .set_default("max_event_queue", defaults.max_event_queue as i64)?
            .set_default("state_dir", path_string(&defaults.state_dir))?
            .set_default("engine_name", defaults.engine_name.clone())?
            .set_default("migration_version", defaults.migration_version as i64)?;

        match self.resolve_path() {
            Some((path, required)) => {
                builder = builder.add_source(
                    config::File::from(path.as_path())
                        .format(config::FileFormat::Toml)
                        .required(required),
                );
            }
            None => {}
        }

        if !self.skip_env {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .ignore_empty(true),
            );
        }

        builder = builder
            .set_override_option("worker_threads", self.worker_threads.map(|v| v as i64))?
            .set_override_option("heap_limit", self.heap_limit.map(|v| v as i64))?
            .set_override_option("stack_limit", self.stack_limit.map(|v| v as i64))?
            .set_override_option("time_slice_ms", self.time_slice_ms.map(|v| v as i64))?
            .set_override_option(
                "sleep_watchdog_ms",
                self.sleep_watchdog_ms.map(|v| v as i64),
            )?
            .set_override_option("max_event_queue", self.max_event_queue.map(|v| v as i64))?
            .set_override_option("state_dir", self.state_dir.as_deref().map(path_string))?
            .set_override_option("engine_name", self.engine_name)?
            .set_override_option(
                "migration_version",
                self.migration_version.map(|v| v as i64),
            )?;

        let config: EngineConfig = builder
            .build()
            .context("Failed to read configuration sources")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit path (must exist), then the env var (must exist), then the
    /// default file (optional)
    fn resolve_path(&self) -> Option<(PathBuf, bool)> {
        if let Some(path) = &self.config_path {
            return Some((path.clone(), true));
        }
        if self.skip_env {
            return None;
        }
        if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
            if !path.is_empty() {
                return Some((PathBuf::from(path), true));
            }
        }
        Some((PathBuf::from(DEFAULT_CONFIG_FILE), false))
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::builder().isolated().build().unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.time_slice(), Duration::from_millis(50));
    }

    #[test]
    fn test_file_then_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "worker_threads = 8\nheap_limit = 1024\nengine_name = \"from-file\""
        )
        .unwrap();

        let config = EngineConfig::builder()
            .isolated()
            .config_path(Some(file.path().to_path_buf()))
            .heap_limit(2048)
            .build()
            .unwrap();

        assert_eq!(config.worker_threads, 8);
        assert_eq!(config.heap_limit, 2048);
        assert_eq!(config.engine_name, "from-file");
        assert_eq!(config.stack_limit, 256);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let result = EngineConfig::builder()
            .isolated()
            .config_path(Some(PathBuf::from("/nonexistent/strand.toml")))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = EngineConfig::builder()
            .isolated()
            .worker_threads(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("worker_threads"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = EngineConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
