use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::watcher::{Backoff, PollPolicy};

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_CONFIG_PATH: &str = "LOFI_CONFIG_PATH";
const ENV_BACKEND_URL: &str = "LOFI_BACKEND_URL";
const ENV_SESSION_COOKIE: &str = "LOFI_SESSION_COOKIE";
const ENV_POLL_INTERVAL_MS: &str = "LOFI_POLL_INTERVAL_MS";
const ENV_POLL_BACKOFF: &str = "LOFI_POLL_BACKOFF";
const ENV_POLL_TIMEOUT_SECS: &str = "LOFI_POLL_TIMEOUT_SECS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    backend_url: Option<String>,
    session_cookie: Option<String>,
    poll_interval_ms: u64,
    poll_backoff: BackoffKind,
    poll_max_interval_ms: u64,
    poll_timeout_secs: Option<u64>,
    request_timeout_secs: u64,
    seek_step_secs: u64,
    progress_tick_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let path = match config_file_override() {
            Some(path) => path,
            None => Self::default_config_path()?,
        };
        if path.exists() {
            let partial = read_partial(&path)?;
            config.apply_partial(partial);
        }

        config.apply_env()?;
        Ok(config)
    }

    pub fn backend_url(&self) -> Option<&str> {
        self.backend_url.as_deref()
    }

    pub fn session_cookie(&self) -> Option<&str> {
        self.session_cookie.as_deref()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn seek_step_seconds(&self) -> f64 {
        self.seek_step_secs as f64
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms.clamp(20, 1000))
    }

    pub fn poll_policy(&self) -> PollPolicy {
        let interval = Duration::from_millis(self.poll_interval_ms.max(100));
        let backoff = match self.poll_backoff {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Exponential => {
                Backoff::Exponential { max: Duration::from_millis(self.poll_max_interval_ms) }
            }
        };
        let deadline = self.poll_timeout_secs.filter(|secs| *secs > 0).map(Duration::from_secs);
        PollPolicy { interval, backoff, deadline }
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "Lofi", "Lofi")
            .ok_or_else(|| anyhow!("unable to determine config directory"))?;
        Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(url) = partial.backend_url {
            self.backend_url = Some(url);
        }
        if let Some(cookie) = partial.session_cookie {
            self.session_cookie = Some(cookie);
        }
        if let Some(interval) = partial.poll_interval_ms {
            self.poll_interval_ms = interval;
        }
        if let Some(backoff) = partial.poll_backoff {
            self.poll_backoff = backoff;
        }
        if let Some(max) = partial.poll_max_interval_ms {
            self.poll_max_interval_ms = max;
        }
        if let Some(timeout) = partial.poll_timeout_secs {
            self.poll_timeout_secs = Some(timeout);
        }
        if let Some(timeout) = partial.request_timeout_secs {
            self.request_timeout_secs = timeout;
        }
        if let Some(step) = partial.seek_step_secs {
            self.seek_step_secs = step;
        }
        if let Some(tick) = partial.progress_tick_ms {
            self.progress_tick_ms = tick;
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = env::var(ENV_BACKEND_URL) {
            if value.trim().is_empty() {
                self.backend_url = None;
            } else {
                self.backend_url = Some(value);
            }
        }
        if let Ok(value) = env::var(ENV_SESSION_COOKIE) {
            if !value.trim().is_empty() {
                self.session_cookie = Some(value);
            }
        }
        if let Ok(value) = env::var(ENV_POLL_INTERVAL_MS) {
            if !value.trim().is_empty() {
                self.poll_interval_ms = value
                    .trim()
                    .parse()
                    .context("LOFI_POLL_INTERVAL_MS must be a whole number of milliseconds")?;
            }
        }
        if let Ok(value) = env::var(ENV_POLL_BACKOFF) {
            self.poll_backoff = match value.trim() {
                "" => self.poll_backoff,
                "fixed" => BackoffKind::Fixed,
                "exponential" => BackoffKind::Exponential,
                other => {
                    return Err(anyhow!(
                        "LOFI_POLL_BACKOFF must be `fixed` or `exponential`, got `{other}`"
                    ))
                }
            };
        }
        if let Ok(value) = env::var(ENV_POLL_TIMEOUT_SECS) {
            if !value.trim().is_empty() {
                let secs: u64 = value
                    .trim()
                    .parse()
                    .context("LOFI_POLL_TIMEOUT_SECS must be a whole number of seconds")?;
                self.poll_timeout_secs = Some(secs);
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            session_cookie: None,
            poll_interval_ms: 2000,
            poll_backoff: BackoffKind::Fixed,
            poll_max_interval_ms: 30_000,
            poll_timeout_secs: None,
            request_timeout_secs: 15,
            seek_step_secs: 5,
            progress_tick_ms: 200,
        }
    }
}

fn config_file_override() -> Option<PathBuf> {
    let value = env::var_os(ENV_CONFIG_PATH)?;
    if value.is_empty() {
        return None;
    }
    let path = PathBuf::from(value);
    if path.is_dir() {
        return Some(path.join(CONFIG_FILE_NAME));
    }
    Some(path)
}

fn read_partial(path: &Path) -> Result<PartialConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let partial: PartialConfig =
        toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(partial)
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PartialConfig {
    backend_url: Option<String>,
    session_cookie: Option<String>,
    poll_interval_ms: Option<u64>,
    poll_backoff: Option<BackoffKind>,
    poll_max_interval_ms: Option<u64>,
    poll_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    seek_step_secs: Option<u64>,
    progress_tick_ms: Option<u64>,
}
