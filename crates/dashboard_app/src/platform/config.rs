//! Page configuration loaded from `./dashboard.ron`.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use dashboard_engine::{ClientSettings, EngineSettings, JobSettings, PollerSettings};
use dashboard_logging::{dash_info, dash_warn};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILENAME: &str = "dashboard.ron";
pub const BASE_URL_ENV: &str = "DASHBOARD_BASE_URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogTarget {
    File,
    Terminal,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub job_id: String,
    pub base_url: String,
    pub api_prefix: String,
    pub connect_timeout_ms: u64,
    pub incremental_reports: bool,
    pub search_debounce_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_failure_limit: Option<u32>,
    pub stop_polling_on_terminal: bool,
    pub log_target: LogTarget,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let client = ClientSettings::default();
        let engine = EngineSettings::default();
        Self {
            job_id: "daily-report".to_string(),
            base_url: client.base_url,
            api_prefix: client.api_prefix,
            connect_timeout_ms: duration_ms(client.connect_timeout),
            incremental_reports: client.incremental_reports,
            search_debounce_ms: duration_ms(engine.search_debounce),
            poll_interval_ms: duration_ms(engine.jobs.poller.interval),
            poll_failure_limit: engine.jobs.poller.failure_limit,
            stop_polling_on_terminal: engine.jobs.stop_polling_on_terminal,
            log_target: LogTarget::File,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads `dashboard.ron` from `dir`, then applies the environment
    /// override. Never fails: problems are logged and defaults used.
    pub fn load(dir: &Path) -> Self {
        let config = match read_config(&dir.join(CONFIG_FILENAME)) {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(err) => {
                dash_warn!("{:#}; using defaults", err);
                Self::default()
            }
        };
        config.with_base_url_override(std::env::var(BASE_URL_ENV).ok())
    }

    pub fn with_base_url_override(mut self, base_url: Option<String>) -> Self {
        if let Some(base_url) = base_url.filter(|url| !url.trim().is_empty()) {
            dash_info!("base url overridden from {}: {}", BASE_URL_ENV, base_url);
            self.base_url = base_url.trim().to_string();
        }
        self
    }

    pub fn level(&self) -> LevelFilter {
        dashboard_logging::parse_level(&self.log_level).unwrap_or(LevelFilter::Info)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            client: ClientSettings {
                base_url: self.base_url.clone(),
                api_prefix: self.api_prefix.clone(),
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                incremental_reports: self.incremental_reports,
            },
            search_debounce: Duration::from_millis(self.search_debounce_ms),
            jobs: JobSettings {
                poller: PollerSettings {
                    // A zero period would make the ticker panic.
                    interval: Duration::from_millis(self.poll_interval_ms.max(1)),
                    failure_limit: self.poll_failure_limit.filter(|limit| *limit > 0),
                },
                stop_polling_on_terminal: self.stop_polling_on_terminal,
            },
        }
    }
}

fn read_config(path: &Path) -> anyhow::Result<Option<AppConfig>> {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read config {}", path.display()))
        }
    };
    let config = ron::from_str(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    dash_info!("loaded config from {}", path.display());
    Ok(Some(config))
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{AppConfig, LogTarget, CONFIG_FILENAME};

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path()).with_base_url_override(None);
        assert_eq!(config.job_id, "daily-report");
        assert_eq!(config.search_debounce_ms, 300);
        assert_eq!(config.poll_interval_ms, 2_000);
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILENAME),
            r#"(
                job_id: "fx-rates",
                base_url: "http://dash.internal:8080",
                poll_interval_ms: 500,
                poll_failure_limit: Some(5),
                log_target: Both,
            )"#,
        )
        .unwrap();

        let config = AppConfig::load(dir.path());
        assert_eq!(config.job_id, "fx-rates");
        assert_eq!(config.log_target, LogTarget::Both);
        assert_eq!(config.api_prefix, "/api");

        let settings = config.engine_settings();
        assert_eq!(settings.jobs.poller.interval, Duration::from_millis(500));
        assert_eq!(settings.jobs.poller.failure_limit, Some(5));
        assert_eq!(settings.search_debounce, Duration::from_millis(300));
    }

    #[test]
    fn unparseable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILENAME), "job_id = [").unwrap();
        let config = AppConfig::load(dir.path()).with_base_url_override(None);
        assert_eq!(config.job_id, AppConfig::default().job_id);
    }

    #[test]
    fn environment_override_replaces_base_url() {
        let config = AppConfig::default()
            .with_base_url_override(Some(" http://staging:9000 ".to_string()));
        assert_eq!(config.base_url, "http://staging:9000");

        let config = AppConfig::default().with_base_url_override(Some("  ".to_string()));
        assert_eq!(config.base_url, AppConfig::default().base_url);
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        let config = AppConfig {
            log_level: "chatty".to_string(),
            ..AppConfig::default()
        };
        assert_eq!(config.level(), log::LevelFilter::Info);
    }
}
