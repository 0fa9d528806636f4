//! Bus configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (SCALEOUT_LISTEN_ADDRESS, SCALEOUT_PEERS)
//! - TOML configuration file
//! - Code, via [`ScaleoutConfig::new`]
//!
//! Raw [`ScaleoutSettings`] deserialize from TOML and convert into the
//! validated, immutable [`ScaleoutConfig`] the bus runs with.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use scaleout_transport::SocketOptions;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for these settings.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Settings are structurally valid but unusable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Raw settings as deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleoutSettings {
    /// This node's publish endpoint.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Peer publish endpoints to subscribe to.
    #[serde(default = "default_subscriber_addresses")]
    pub subscriber_addresses: Vec<String>,

    /// Transport tuning.
    #[serde(default)]
    pub transport: TransportSettings,
}

/// Transport tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Delay between reconnect attempts to a peer, in milliseconds.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Frames queued per subscriber link before a slow link drops frames.
    #[serde(default = "default_high_water_mark")]
    pub send_high_water_mark: usize,

    /// Frames queued per peer before reads apply backpressure.
    #[serde(default = "default_high_water_mark")]
    pub receive_high_water_mark: usize,

    /// Largest frame accepted, in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// How long dispose waits for receive loops to finish, in milliseconds.
    #[serde(default = "default_dispose_timeout")]
    pub dispose_timeout_ms: u64,
}

// Default value functions
fn default_listen_address() -> String {
    std::env::var("SCALEOUT_LISTEN_ADDRESS").unwrap_or_else(|_| "tcp://127.0.0.1:6000".to_string())
}

fn default_subscriber_addresses() -> Vec<String> {
    std::env::var("SCALEOUT_PEERS")
        .map(|peers| split_addresses(&peers))
        .unwrap_or_default()
}

fn default_reconnect_interval() -> u64 {
    1_000 // 1 second
}

fn default_high_water_mark() -> usize {
    1024
}

fn default_max_frame_size() -> usize {
    scaleout_transport::framing::MAX_FRAME_SIZE
}

fn default_dispose_timeout() -> u64 {
    5_000 // 5 seconds
}

/// Split a comma-separated address list, dropping blanks.
fn split_addresses(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Default for ScaleoutSettings {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            subscriber_addresses: default_subscriber_addresses(),
            transport: TransportSettings::default(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: default_reconnect_interval(),
            send_high_water_mark: default_high_water_mark(),
            receive_high_water_mark: default_high_water_mark(),
            max_frame_size: default_max_frame_size(),
            dispose_timeout_ms: default_dispose_timeout(),
        }
    }
}

/// Validated bus configuration. Immutable once built.
#[derive(Debug, Clone)]
pub struct ScaleoutConfig {
    listen_address: String,
    subscriber_addresses: Vec<String>,
    transport: TransportSettings,
}

impl ScaleoutConfig {
    /// Create a configuration with default transport settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address is empty.
    pub fn new<I, S>(listen_address: impl Into<String>, subscriber_addresses: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::try_from(ScaleoutSettings {
            listen_address: listen_address.into(),
            subscriber_addresses: subscriber_addresses.into_iter().map(Into::into).collect(),
            transport: TransportSettings::default(),
        })
    }

    /// Replace the transport settings.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportSettings) -> Self {
        self.transport = transport;
        self
    }

    /// Load configuration from the first config file found, or from the
    /// environment if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or the
    /// resulting settings are invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let config_paths = [
            "scaleout.toml",
            "/etc/scaleout/scaleout.toml",
            "~/.config/scaleout/scaleout.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Self::try_from(ScaleoutSettings::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = %path.display(), "Loading scaleout config");
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or the settings are unusable.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let settings: ScaleoutSettings = toml::from_str(contents)?;
        Self::try_from(settings)
    }

    /// This node's publish endpoint.
    #[must_use]
    pub fn listen_address(&self) -> &str {
        &self.listen_address
    }

    /// Peer publish endpoints, in configured order.
    #[must_use]
    pub fn subscriber_addresses(&self) -> &[String] {
        &self.subscriber_addresses
    }

    /// Transport tuning.
    #[must_use]
    pub fn transport(&self) -> &TransportSettings {
        &self.transport
    }

    /// Socket options for the transport context.
    #[must_use]
    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            reconnect_interval: Duration::from_millis(self.transport.reconnect_interval_ms),
            send_high_water_mark: self.transport.send_high_water_mark,
            receive_high_water_mark: self.transport.receive_high_water_mark,
            max_frame_size: self.transport.max_frame_size,
        }
    }

    /// How long dispose waits for receive loops.
    #[must_use]
    pub fn dispose_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.dispose_timeout_ms)
    }
}

impl TryFrom<ScaleoutSettings> for ScaleoutConfig {
    type Error = ConfigError;

    fn try_from(settings: ScaleoutSettings) -> Result<Self, Self::Error> {
        let listen_address = settings.listen_address.trim().to_string();
        if listen_address.is_empty() {
            return Err(ConfigError::Invalid("listen address cannot be empty".into()));
        }

        if settings.transport.max_frame_size == 0 {
            return Err(ConfigError::Invalid("max frame size must be positive".into()));
        }

        // Shared peer lists may name this node; never subscribe to ourselves.
        let subscriber_addresses = settings
            .subscriber_addresses
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty() && *s != listen_address)
            .map(str::to_string)
            .collect();

        Ok(Self {
            listen_address,
            subscriber_addresses,
            transport: settings.transport,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment and working directory are process-wide.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env<T>(listen: &str, peers: &str, f: impl FnOnce() -> T) -> T {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        std::env::set_var("SCALEOUT_LISTEN_ADDRESS", listen);
        std::env::set_var("SCALEOUT_PEERS", peers);
        let result = f();
        std::env::remove_var("SCALEOUT_LISTEN_ADDRESS");
        std::env::remove_var("SCALEOUT_PEERS");
        result
    }

    #[test]
    fn test_new_config() {
        let config = ScaleoutConfig::new("tcp://127.0.0.1:6001", ["tcp://127.0.0.1:6000"]).unwrap();
        assert_eq!(config.listen_address(), "tcp://127.0.0.1:6001");
        assert_eq!(config.subscriber_addresses(), ["tcp://127.0.0.1:6000"]);
        assert_eq!(config.transport(), &TransportSettings::default());
    }

    #[test]
    fn test_single_node_config() {
        let config = ScaleoutConfig::new("tcp://127.0.0.1:6000", Vec::<String>::new()).unwrap();
        assert!(config.subscriber_addresses().is_empty());
    }

    #[test]
    fn test_empty_listen_address_rejected() {
        assert!(matches!(
            ScaleoutConfig::new("  ", ["tcp://127.0.0.1:6000"]),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_self_and_blank_peers_dropped() {
        let config = ScaleoutConfig::new(
            "tcp://10.0.0.1:6000",
            ["tcp://10.0.0.1:6000", " ", "tcp://10.0.0.2:6000", "tcp://10.0.0.3:6000"],
        )
        .unwrap();
        assert_eq!(
            config.subscriber_addresses(),
            ["tcp://10.0.0.2:6000", "tcp://10.0.0.3:6000"]
        );
    }

    #[test]
    fn test_split_addresses() {
        assert_eq!(
            split_addresses("tcp://a:1, tcp://b:2,,"),
            vec!["tcp://a:1".to_string(), "tcp://b:2".to_string()]
        );
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            listen_address = "tcp://*:7000"
            subscriber_addresses = ["tcp://node-b:7000", "tcp://node-c:7000"]

            [transport]
            reconnect_interval_ms = 250
            max_frame_size = 65536
        "#;

        let config = ScaleoutConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.listen_address(), "tcp://*:7000");
        assert_eq!(config.subscriber_addresses().len(), 2);

        let options = config.socket_options();
        assert_eq!(options.reconnect_interval, Duration::from_millis(250));
        assert_eq!(options.max_frame_size, 65536);
        assert_eq!(options.send_high_water_mark, 1024);
        assert_eq!(config.dispose_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            ScaleoutConfig::from_toml_str("listen_address = 42"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ScaleoutConfig::from_toml_str("listen_address = \"tcp://a:1\"\n[transport]\nmax_frame_size = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_env_fills_missing_addresses() {
        let config = with_env(
            "tcp://10.0.0.1:7000",
            "tcp://10.0.0.1:7000, ,tcp://10.0.0.2:7000,tcp://10.0.0.3:7000",
            || ScaleoutConfig::from_toml_str("[transport]\nreconnect_interval_ms = 50\n"),
        )
        .unwrap();

        assert_eq!(config.listen_address(), "tcp://10.0.0.1:7000");
        assert_eq!(
            config.subscriber_addresses(),
            ["tcp://10.0.0.2:7000", "tcp://10.0.0.3:7000"]
        );
        assert_eq!(config.transport().reconnect_interval_ms, 50);
    }

    #[test]
    fn test_load_searches_working_directory() {
        let dir = std::env::temp_dir().join(format!("scaleout-load-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let (from_env, from_file) = with_env("tcp://10.0.0.9:7100", "tcp://10.0.0.8:7100", || {
            let original = std::env::current_dir().unwrap();
            std::env::set_current_dir(&dir).unwrap();

            // No scaleout.toml here yet: environment only.
            let from_env = ScaleoutConfig::load();

            std::fs::write(
                dir.join("scaleout.toml"),
                "listen_address = \"tcp://127.0.0.1:7200\"\nsubscriber_addresses = []\n",
            )
            .unwrap();
            let from_file = ScaleoutConfig::load();

            std::env::set_current_dir(original).unwrap();
            (from_env, from_file)
        });
        std::fs::remove_dir_all(&dir).unwrap();

        let from_env = from_env.unwrap();
        assert_eq!(from_env.listen_address(), "tcp://10.0.0.9:7100");
        assert_eq!(from_env.subscriber_addresses(), ["tcp://10.0.0.8:7100"]);

        let from_file = from_file.unwrap();
        assert_eq!(from_file.listen_address(), "tcp://127.0.0.1:7200");
        assert!(from_file.subscriber_addresses().is_empty());
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("scaleout-config-{}.toml", std::process::id()));
        std::fs::write(&path, "listen_address = \"tcp://127.0.0.1:6100\"\nsubscriber_addresses = []\n").unwrap();

        let config = ScaleoutConfig::from_file(&path).unwrap();
        assert_eq!(config.listen_address(), "tcp://127.0.0.1:6100");
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            ScaleoutConfig::from_file(&path),
            Err(ConfigError::Read { .. })
        ));
    }
}
