use anyhow::{Context, Result};
use bench_core::BackoffPolicy;
use channel_hub::HubSettings;
use serde::{Deserialize, Serialize};
use session_transport::TransportSettings;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [transport]
//                    busy_grace_ms = 3000
//
//   env var:         BENCH_TRANSPORT__BUSY_GRACE_MS=3000   (double underscore = nesting)

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub transport: TransportFileConfig,
    #[serde(default)]
    pub channel: ChannelFileConfig,
    #[serde(default)]
    pub layout: LayoutFileConfig,
}

/// Where the workbench server lives (`[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Websocket handshakes slower than this are retried.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Per-session socket tunables (`[transport]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportFileConfig {
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_busy_grace_ms")]
    pub busy_grace_ms: u64,
    #[serde(default = "default_busy_silence_ms")]
    pub busy_silence_ms: u64,
    #[serde(default = "default_fit_debounce_ms")]
    pub fit_debounce_ms: u64,
}

impl Default for TransportFileConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            busy_grace_ms: default_busy_grace_ms(),
            busy_silence_ms: default_busy_silence_ms(),
            fit_debounce_ms: default_fit_debounce_ms(),
        }
    }
}

/// Shared channel tunables (`[channel]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelFileConfig {
    #[serde(default = "default_channel_reconnect_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for ChannelFileConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_channel_reconnect_ms(),
        }
    }
}

/// Layout persistence (`[layout]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayoutFileConfig {
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,
}

impl Default for LayoutFileConfig {
    fn default() -> Self {
        Self {
            save_debounce_ms: default_save_debounce_ms(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:7070".to_string()
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_reconnect_base_ms() -> u64 {
    1000
}
fn default_reconnect_max_ms() -> u64 {
    30_000
}
fn default_busy_grace_ms() -> u64 {
    2000
}
fn default_busy_silence_ms() -> u64 {
    1500
}
fn default_fit_debounce_ms() -> u64 {
    100
}
fn default_channel_reconnect_ms() -> u64 {
    3000
}
fn default_save_debounce_ms() -> u64 {
    300
}

/// Build a figment that layers: defaults → config.toml → BENCH_* env vars → `--server`.
///
/// Env vars use double-underscore for nesting into sections:
///   `BENCH_SERVER__BASE_URL=https://bench.local`  →  `server.base_url`
pub fn load_config(data_dir: &Path, server_override: Option<&str>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let figment = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("BENCH_").split("__"));

    match server_override {
        Some(url) => figment.merge(Serialized::default("server.base_url", url)),
        None => figment,
    }
}

impl FileConfig {
    /// `http(s)://` base URL turned into the matching `ws(s)://` base.
    pub fn ws_base(&self) -> Result<String> {
        ws_base(&self.server.base_url)
    }

    pub fn transport_settings(&self) -> Result<TransportSettings> {
        let t = &self.transport;
        let mut settings = TransportSettings::new(self.ws_base()?);
        settings.backoff = BackoffPolicy {
            base: Duration::from_millis(t.reconnect_base_ms),
            max: Duration::from_millis(t.reconnect_max_ms),
        };
        settings.busy_grace = Duration::from_millis(t.busy_grace_ms);
        settings.busy_silence = Duration::from_millis(t.busy_silence_ms);
        settings.fit_debounce = Duration::from_millis(t.fit_debounce_ms);
        Ok(settings)
    }

    pub fn hub_settings(&self) -> Result<HubSettings> {
        let mut settings = HubSettings::new(&self.ws_base()?);
        settings.reconnect_delay = Duration::from_millis(self.channel.reconnect_delay_ms);
        Ok(settings)
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.layout.save_debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.server.connect_timeout_secs)
    }
}

pub fn ws_base(base_url: &str) -> Result<String> {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = base.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else {
        anyhow::bail!("server URL must start with http:// or https://: {base_url}")
    }
}

// =============================================================================
// Directory layout (not tunable via figment; derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct BenchConfig {
    pub data_dir: PathBuf,
    pub layouts_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl BenchConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".termbench"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let layouts_dir = data_dir.join("layouts");
        std::fs::create_dir_all(&layouts_dir)
            .with_context(|| format!("Failed to create layouts directory: {:?}", layouts_dir))?;

        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        info!("Data directory: {}", data_dir.display());

        Ok(Self {
            data_dir,
            layouts_dir,
            logs_dir,
        })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn attach_log_path(&self) -> PathBuf {
        self.logs_dir.join("attach.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_transport_defaults() {
        let d = TransportFileConfig::default();
        assert_eq!(d.reconnect_base_ms, 1000);
        assert_eq!(d.reconnect_max_ms, 30_000);
        assert_eq!(d.busy_grace_ms, 2000);
        assert_eq!(d.busy_silence_ms, 1500);
        assert_eq!(d.fit_debounce_ms, 100);
    }

    #[test]
    fn test_runtime_settings_from_defaults() {
        let fc = FileConfig::default();
        let ts = fc.transport_settings().unwrap();
        assert_eq!(ts.ws_base, "ws://127.0.0.1:7070");
        assert_eq!(ts.backoff, BackoffPolicy::default());
        assert_eq!(ts.busy_grace, Duration::from_secs(2));

        let hs = fc.hub_settings().unwrap();
        assert_eq!(hs.url, "ws://127.0.0.1:7070/api/v1/ws");
        assert_eq!(hs.reconnect_delay, Duration::from_secs(3));
        assert_eq!(fc.save_debounce(), Duration::from_millis(300));
        assert_eq!(fc.connect_timeout(), Duration::from_secs(10));
    }

    // ── ws_base ─────────────────────────────────────────────────────────

    #[test]
    fn test_ws_base_schemes() {
        assert_eq!(ws_base("http://localhost:7070/").unwrap(), "ws://localhost:7070");
        assert_eq!(ws_base("https://bench.example").unwrap(), "wss://bench.example");
        assert!(ws_base("ftp://nope").is_err());
    }

    // ── BenchConfig ─────────────────────────────────────────────────────

    #[test]
    fn test_bench_config_with_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = BenchConfig::new(Some(tmp.path().to_path_buf())).unwrap();

        assert_eq!(config.data_dir, tmp.path());
        assert_eq!(config.layouts_dir, tmp.path().join("layouts"));
        assert!(tmp.path().join("layouts").exists());
        assert!(tmp.path().join("logs").exists());
        assert_eq!(config.config_toml_path(), tmp.path().join("config.toml"));
        assert_eq!(config.attach_log_path(), tmp.path().join("logs/attach.log"));
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path(), None).extract().unwrap();
        assert_eq!(fc.server.base_url, "http://127.0.0.1:7070");
        assert_eq!(fc.layout.save_debounce_ms, 300);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[server]\nbase_url = \"https://bench.lan\"\n\n[transport]\nbusy_grace_ms = 5000\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path(), None).extract().unwrap();
        assert_eq!(fc.server.base_url, "https://bench.lan");
        assert_eq!(fc.transport.busy_grace_ms, 5000);
        assert_eq!(fc.transport.busy_silence_ms, 1500);
    }

    #[test]
    fn test_server_flag_overrides_toml() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[server]\nbase_url = \"https://bench.lan\"\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path(), Some("http://10.0.0.2:9000"))
            .extract()
            .unwrap();
        assert_eq!(fc.server.base_url, "http://10.0.0.2:9000");
    }
}
