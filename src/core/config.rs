use crate::core::error::ConfigError;
use crate::scraping::locator::SelectorProfile;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// CourierConfig: file-based config loader (list-courier.json) with env-var fallback
// ---------------------------------------------------------------------------

pub const ENV_CONFIG_PATH: &str = "LIST_COURIER_CONFIG";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";
pub const ENV_PROFILE_DIR: &str = "LIST_COURIER_PROFILE_DIR";
pub const ENV_CHECKPOINT_PATH: &str = "LIST_COURIER_CHECKPOINT";
pub const ENV_HEADLESS: &str = "LIST_COURIER_HEADLESS";

const STATE_DIR: &str = ".list-courier";

/// What to walk and how hard to pace it. Validated before the engine starts.
#[derive(Deserialize, Clone, Debug)]
pub struct JobConfig {
    /// URL of the list view; also the target of context recovery.
    pub source_list_url: String,
    /// Directory receiving the artifacts.
    pub output_dir: PathBuf,
    /// Human label of the listed things (shown in reports only).
    #[serde(default = "default_item_label")]
    pub item_label: String,
    /// Stop after this many successful artifacts (resumed ones included).
    #[serde(default)]
    pub max_items: Option<u64>,
    #[serde(default = "default_min_wait")]
    pub min_wait_secs: f64,
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: f64,
    /// Take a long break after this many successes. `None` or 0 disables.
    #[serde(default)]
    pub break_every: Option<u32>,
    #[serde(default = "default_break_min")]
    pub break_min_secs: u64,
    #[serde(default = "default_break_max")]
    pub break_max_secs: u64,
    #[serde(default)]
    pub start_page: Option<u32>,
    /// Continue the stored checkpoint.
    #[serde(default)]
    pub resume: bool,
    /// Delete the stored checkpoint and start a new job.
    #[serde(default)]
    pub reset: bool,
}

fn default_item_label() -> String {
    "items".to_string()
}
fn default_min_wait() -> f64 {
    2.0
}
fn default_max_wait() -> f64 {
    5.0
}
fn default_break_min() -> u64 {
    60
}
fn default_break_max() -> u64 {
    180
}

impl JobConfig {
    pub fn new(source_list_url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_list_url: source_list_url.into(),
            output_dir: output_dir.into(),
            item_label: default_item_label(),
            max_items: None,
            min_wait_secs: default_min_wait(),
            max_wait_secs: default_max_wait(),
            break_every: None,
            break_min_secs: default_break_min(),
            break_max_secs: default_break_max(),
            start_page: None,
            resume: false,
            reset: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.source_list_url)
            .map_err(|_| ConfigError::SourceUrl(self.source_list_url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::SourceUrl(self.source_list_url.clone()));
        }
        if self.min_wait_secs < 0.0 || self.min_wait_secs > self.max_wait_secs {
            return Err(ConfigError::InvertedRange {
                field: "min_wait_secs/max_wait_secs",
                min: self.min_wait_secs.max(0.0).round() as u64,
                max: self.max_wait_secs.max(0.0).round() as u64,
            });
        }
        if self.break_min_secs > self.break_max_secs {
            return Err(ConfigError::InvertedRange {
                field: "break_min_secs/break_max_secs",
                min: self.break_min_secs,
                max: self.break_max_secs,
            });
        }
        if self.start_page == Some(0) {
            return Err(ConfigError::StartPage);
        }
        if self.resume && self.reset {
            return Err(ConfigError::ResumeAndReset);
        }
        Ok(())
    }

    /// Break interval, with 0 treated as disabled.
    pub fn break_interval(&self) -> Option<u32> {
        self.break_every.filter(|n| *n > 0)
    }
}

/// Randomized pacing of synthesized pointer input.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PacingSettings {
    pub min_steps: u32,
    pub max_steps: u32,
    pub step_delay_min_ms: u64,
    pub step_delay_max_ms: u64,
    /// Chance of a micro-pause after any path step.
    pub micro_pause_probability: f64,
    pub micro_pause_min_ms: u64,
    pub micro_pause_max_ms: u64,
    /// Minimum perpendicular deviation of the control points, in px.
    pub min_deviation_px: f64,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            min_steps: 10,
            max_steps: 60,
            step_delay_min_ms: 4,
            step_delay_max_ms: 18,
            micro_pause_probability: 0.05,
            micro_pause_min_ms: 40,
            micro_pause_max_ms: 160,
            min_deviation_px: 50.0,
        }
    }
}

/// Bounds and timeouts of the list-processing engine and page navigator.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct EngineSettings {
    pub select_attempts: u32,
    pub detail_attach_timeout_ms: u64,
    pub detail_match_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub settle_ms: u64,
    pub obstruction_retries: u32,
    pub item_retries: u32,
    pub retry_backoff_ms: u64,
    pub artifact_timeout_ms: u64,
    pub list_attach_timeout_ms: u64,
    pub lazy_load_settle_ms: u64,
    pub stagnation_limit: u32,
    pub max_scroll_attempts: u32,
    pub advance_timeout_ms: u64,
    pub seek_timeout_ms: u64,
    pub seek_max_iterations: u32,
    pub checkpoint_every: u64,
    pub idle_probability: f64,
    pub fuzzy_match_threshold: f64,
    pub artifact_suffix: String,
    pub pacing: PacingSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            select_attempts: 7,
            detail_attach_timeout_ms: 10_000,
            detail_match_timeout_ms: 5_000,
            poll_interval_ms: 250,
            settle_ms: 400,
            obstruction_retries: 3,
            item_retries: 7,
            retry_backoff_ms: 2_000,
            artifact_timeout_ms: 30_000,
            list_attach_timeout_ms: 15_000,
            lazy_load_settle_ms: 800,
            stagnation_limit: 10,
            max_scroll_attempts: 50,
            advance_timeout_ms: 15_000,
            seek_timeout_ms: 10_000,
            seek_max_iterations: 50,
            checkpoint_every: 5,
            idle_probability: 0.3,
            fuzzy_match_threshold: 0.5,
            artifact_suffix: ".pdf".to_string(),
            pacing: PacingSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fuzzy_match_threshold > 0.0 && self.fuzzy_match_threshold <= 1.0) {
            return Err(ConfigError::FuzzyThreshold(self.fuzzy_match_threshold));
        }
        if self.pacing.min_steps > self.pacing.max_steps {
            return Err(ConfigError::InvertedRange {
                field: "pacing.min_steps/max_steps",
                min: self.pacing.min_steps as u64,
                max: self.pacing.max_steps as u64,
            });
        }
        Ok(())
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn detail_attach_timeout(&self) -> Duration {
        Duration::from_millis(self.detail_attach_timeout_ms)
    }
    pub fn detail_match_timeout(&self) -> Duration {
        Duration::from_millis(self.detail_match_timeout_ms)
    }
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
    pub fn artifact_timeout(&self) -> Duration {
        Duration::from_millis(self.artifact_timeout_ms)
    }
    pub fn list_attach_timeout(&self) -> Duration {
        Duration::from_millis(self.list_attach_timeout_ms)
    }
    pub fn lazy_load_settle(&self) -> Duration {
        Duration::from_millis(self.lazy_load_settle_ms)
    }
    pub fn advance_timeout(&self) -> Duration {
        Duration::from_millis(self.advance_timeout_ms)
    }
    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms)
    }
}

/// Browser launch settings (mirrors the `browser` key in list-courier.json).
#[derive(Deserialize, Default, Clone, Debug)]
#[serde(default)]
pub struct BrowserSettings {
    pub executable: Option<String>,
    /// Persisted user-data-dir; holds the authenticated session cookies.
    pub profile_dir: Option<PathBuf>,
    /// Staging directory for in-flight downloads.
    pub download_dir: Option<PathBuf>,
    pub headless: Option<bool>,
    pub window_width: Option<u32>,
    pub window_height: Option<u32>,
}

impl BrowserSettings {
    /// Executable: JSON field → `CHROME_EXECUTABLE` env var → auto-discovery.
    pub fn resolve_executable(&self) -> Option<String> {
        if let Some(exe) = self.executable.as_ref().filter(|e| Path::new(e).exists()) {
            return Some(exe.clone());
        }
        chrome_executable_override()
            .or_else(crate::scraping::browser_manager::find_chrome_executable)
    }

    /// Profile dir: JSON field → `LIST_COURIER_PROFILE_DIR` → `~/.list-courier/profile`.
    pub fn resolve_profile_dir(&self) -> Option<PathBuf> {
        if let Some(p) = &self.profile_dir {
            return Some(p.clone());
        }
        env_path(ENV_PROFILE_DIR).or_else(|| state_dir().map(|d| d.join("profile")))
    }

    /// Download staging dir: JSON field → `~/.list-courier/downloads` → system temp.
    pub fn resolve_download_dir(&self) -> PathBuf {
        if let Some(p) = &self.download_dir {
            return p.clone();
        }
        state_dir()
            .map(|d| d.join("downloads"))
            .unwrap_or_else(|| std::env::temp_dir().join("list-courier-downloads"))
    }

    /// Headless: JSON field → `LIST_COURIER_HEADLESS` → `false` (visible window).
    pub fn resolve_headless(&self) -> bool {
        if let Some(b) = self.headless {
            return b;
        }
        std::env::var(ENV_HEADLESS)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false)
    }

    pub fn resolve_window(&self) -> (u32, u32) {
        (
            self.window_width.unwrap_or(1440),
            self.window_height.unwrap_or(900),
        )
    }
}

/// Top-level config loaded from `list-courier.json`.
#[derive(Deserialize, Clone, Debug)]
pub struct CourierConfig {
    pub job: JobConfig,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub selectors: SelectorProfile,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,
}

impl CourierConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.job.validate()?;
        self.engine.validate()
    }

    /// Checkpoint file: JSON field → `LIST_COURIER_CHECKPOINT` → `~/.list-courier/checkpoint.json`.
    pub fn resolve_checkpoint_path(&self) -> PathBuf {
        if let Some(p) = &self.checkpoint_path {
            return p.clone();
        }
        env_path(ENV_CHECKPOINT_PATH)
            .or_else(|| state_dir().map(|d| d.join("checkpoint.json")))
            .unwrap_or_else(|| PathBuf::from("list-courier-checkpoint.json"))
    }
}

/// Load `list-courier.json`.
///
/// Search order (first found wins):
/// 1. `explicit` (the `--config` flag)
/// 2. `LIST_COURIER_CONFIG` env var path
/// 3. `./list-courier.json`
/// 4. `../list-courier.json`
///
/// Unlike optional tuning files, a job cannot run without its `job` section,
/// so a missing or unparsable file is an error.
pub fn load_config(explicit: Option<&Path>) -> Result<CourierConfig, ConfigError> {
    let mut candidates: Vec<PathBuf> = vec![
        PathBuf::from("list-courier.json"),
        PathBuf::from("../list-courier.json"),
    ];
    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        candidates.insert(0, PathBuf::from(env_path));
    }
    if let Some(p) = explicit {
        candidates.insert(0, p.to_path_buf());
    }

    for path in &candidates {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => continue,
        };
        let cfg = parse_config(&contents).map_err(|reason| ConfigError::File {
            path: path.display().to_string(),
            reason,
        })?;
        tracing::info!("list-courier.json loaded from {}", path.display());
        return Ok(cfg);
    }

    Err(ConfigError::File {
        path: candidates
            .first()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        reason: "no config file found".to_string(),
    })
}

pub fn parse_config(contents: &str) -> Result<CourierConfig, String> {
    serde_json::from_str::<CourierConfig>(contents).map_err(|e| e.to_string())
}

/// Optional override for the Chromium-family browser executable.
///
/// Only returns a value when `CHROME_EXECUTABLE` is set to an existing path.
pub fn chrome_executable_override() -> Option<String> {
    let p = std::env::var(ENV_CHROME_EXECUTABLE).ok()?;
    let p = p.trim();
    if p.is_empty() {
        return None;
    }
    if Path::new(p).exists() {
        Some(p.to_string())
    } else {
        None
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    let v = std::env::var(key).ok()?;
    let v = v.trim();
    if v.is_empty() {
        None
    } else {
        Some(PathBuf::from(v))
    }
}

fn state_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(STATE_DIR))
}
