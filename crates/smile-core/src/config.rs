use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Absolute path of the file this was loaded from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// How the logon side finds and launches the recognizer process.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognizerConfig {
    /// Explicit executable path. Empty means "resolve from the install
    /// directory or next to the calling executable".
    #[serde(default)]
    pub executable: String,
    /// Appended after `--mode <mode>` on every launch.
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

fn default_grace_period_ms() -> u64 {
    5000
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            executable: String::new(),
            extra_args: Vec::new(),
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl RecognizerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_recognition_timeout_ms")]
    pub recognition_timeout_ms: u64,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Overrides the store's `warmup` toggle when set.
    #[serde(default)]
    pub warmup_enabled: Option<bool>,
}

fn default_recognition_timeout_ms() -> u64 {
    30_000
}
fn default_check_interval_ms() -> u64 {
    100
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            recognition_timeout_ms: default_recognition_timeout_ms(),
            check_interval_ms: default_check_interval_ms(),
            warmup_enabled: None,
        }
    }
}

impl AuthConfig {
    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_millis(self.recognition_timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }
}

/// Status channel transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Datagram,
    Rendezvous,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub transport: Transport,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_rendezvous_dir")]
    pub rendezvous_dir: PathBuf,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_interval_ms")]
    pub connect_interval_ms: u64,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    51234
}
fn default_rendezvous_dir() -> PathBuf {
    std::env::temp_dir().join("smile2unlock-rendezvous")
}
fn default_connect_attempts() -> u32 {
    100
}
fn default_connect_interval_ms() -> u64 {
    100
}
fn default_ack_timeout_ms() -> u64 {
    1000
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            host: default_host(),
            port: default_port(),
            rendezvous_dir: default_rendezvous_dir(),
            connect_attempts: default_connect_attempts(),
            connect_interval_ms: default_connect_interval_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
        }
    }
}

impl ChannelConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_interval(&self) -> Duration {
        Duration::from_millis(self.connect_interval_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Tuning for the recognizer's capture loop.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionConfig {
    /// A match needs cosine similarity strictly above this.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Consecutive liveness rejections tolerated before failing.
    #[serde(default = "default_max_liveness_failures")]
    pub max_liveness_failures: u32,
    #[serde(default = "default_max_match_attempts")]
    pub max_match_attempts: u32,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// Re-publish the current state every N frames.
    #[serde(default = "default_heartbeat_every")]
    pub heartbeat_every: u32,
    #[serde(default = "default_true")]
    pub liveness_enabled: bool,
    #[serde(default = "default_liveness_threshold")]
    pub liveness_threshold: f32,
    #[serde(default)]
    pub camera: u32,
    #[serde(default = "default_gallery_dir")]
    pub gallery_dir: PathBuf,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,
    /// JSON script for the replay vision backend.
    #[serde(default)]
    pub replay_script: Option<PathBuf>,
}

fn default_similarity_threshold() -> f32 {
    0.62
}
fn default_max_liveness_failures() -> u32 {
    50
}
fn default_max_match_attempts() -> u32 {
    30
}
fn default_frame_interval_ms() -> u64 {
    100
}
fn default_heartbeat_every() -> u32 {
    10
}
fn default_true() -> bool {
    true
}
fn default_liveness_threshold() -> f32 {
    0.8
}
fn default_gallery_dir() -> PathBuf {
    PathBuf::from("data/face")
}
fn default_linger_ms() -> u64 {
    500
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_liveness_failures: default_max_liveness_failures(),
            max_match_attempts: default_max_match_attempts(),
            frame_interval_ms: default_frame_interval_ms(),
            heartbeat_every: default_heartbeat_every(),
            liveness_enabled: true,
            liveness_threshold: default_liveness_threshold(),
            camera: 0,
            gallery_dir: default_gallery_dir(),
            linger_ms: default_linger_ms(),
            replay_script: None,
        }
    }
}

impl RecognitionConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/store.toml")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.source = Some(std::fs::canonicalize(path)?);
        Ok(config)
    }

    /// Load config with fallback chain: explicit path → ./config/default.toml → hardcoded defaults.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Self {
        if let Some(path) = explicit_path {
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {e}", path.display());
                }
            }
        }

        let default_path = Path::new("config/default.toml");
        if default_path.exists() {
            match Self::load(default_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    tracing::warn!("Failed to load default config: {e}");
                }
            }
        }

        tracing::info!("Using hardcoded default configuration");
        Self::default()
    }
}
