//! Configuration file support for the STP tools
//!
//! Every setting has a default, so a config file only needs the values it
//! changes. Command-line flags override whatever the file provides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stp::config::{DEFAULT_GAMMA, DEFAULT_MSS, DEFAULT_MWS};
use stp::PldConfig;

/// Loss/delay emulator settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PldOptions {
    pub p_drop: f64,
    pub p_duplicate: f64,
    pub p_corrupt: f64,
    pub p_order: f64,
    /// Segments sent before a held one is released
    pub max_order: u32,
    pub p_delay: f64,
    pub max_delay_ms: u64,
    pub seed: u64,
}

impl From<&PldOptions> for PldConfig {
    fn from(options: &PldOptions) -> Self {
        PldConfig {
            p_drop: options.p_drop,
            p_duplicate: options.p_duplicate,
            p_corrupt: options.p_corrupt,
            p_order: options.p_order,
            max_order: options.max_order,
            p_delay: options.p_delay,
            max_delay_ms: options.max_delay_ms,
            seed: options.seed,
        }
    }
}

/// Sender settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderOptions {
    /// Receiver address
    pub receiver: Option<SocketAddr>,
    /// File to transfer
    pub input: Option<PathBuf>,
    /// Event log path
    #[serde(default = "default_sender_log")]
    pub log: PathBuf,
    /// Maximum window size in bytes
    #[serde(default = "default_mws")]
    pub mws: u32,
    /// Maximum segment size in bytes
    #[serde(default = "default_mss")]
    pub mss: u32,
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    #[serde(default)]
    pub pld: PldOptions,
    #[serde(default = "default_sender_timeout")]
    pub handshake_timeout_secs: u64,
}

fn default_sender_log() -> PathBuf {
    PathBuf::from("Sender_log.txt")
}

fn default_mws() -> u32 {
    DEFAULT_MWS
}

fn default_mss() -> u32 {
    DEFAULT_MSS
}

fn default_gamma() -> f64 {
    DEFAULT_GAMMA
}

fn default_sender_timeout() -> u64 {
    5
}

impl Default for SenderOptions {
    fn default() -> Self {
        SenderOptions {
            receiver: None,
            input: None,
            log: default_sender_log(),
            mws: DEFAULT_MWS,
            mss: DEFAULT_MSS,
            gamma: DEFAULT_GAMMA,
            pld: PldOptions::default(),
            handshake_timeout_secs: default_sender_timeout(),
        }
    }
}

impl SenderOptions {
    /// Engine configuration for these settings
    pub fn to_engine_config(&self) -> Result<stp::SenderConfig, ConfigError> {
        let config = stp::SenderConfig {
            mws: self.mws,
            mss: self.mss,
            gamma: self.gamma,
            pld: PldConfig::from(&self.pld),
            handshake_timeout: self.handshake_timeout(),
            ..Default::default()
        };
        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Receiver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverOptions {
    /// Address to listen on
    pub listen: Option<SocketAddr>,
    /// Where the received bytes are written
    pub output: Option<PathBuf>,
    /// Event log path
    #[serde(default = "default_receiver_log")]
    pub log: PathBuf,
    /// Bound on the wait for a sender, and on teardown
    #[serde(default = "default_receiver_timeout")]
    pub handshake_timeout_secs: u64,
}

fn default_receiver_log() -> PathBuf {
    PathBuf::from("Receiver_log.txt")
}

fn default_receiver_timeout() -> u64 {
    30
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        ReceiverOptions {
            listen: None,
            output: None,
            log: default_receiver_log(),
            handshake_timeout_secs: default_receiver_timeout(),
        }
    }
}

impl ReceiverOptions {
    pub fn to_engine_config(&self) -> Result<stp::ReceiverConfig, ConfigError> {
        let config = stp::ReceiverConfig {
            handshake_timeout: self.handshake_timeout(),
            ..Default::default()
        };
        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Combined configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Sender configuration
    pub sender: Option<SenderOptions>,
    /// Receiver configuration
    pub receiver: Option<ReceiverOptions>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Create example sender configuration
    pub fn example_sender() -> Self {
        Config {
            sender: Some(SenderOptions {
                receiver: Some(SocketAddr::from(([127, 0, 0, 1], 5000))),
                input: Some(PathBuf::from("test0.pdf")),
                pld: PldOptions {
                    p_drop: 0.1,
                    p_duplicate: 0.05,
                    p_corrupt: 0.05,
                    p_order: 0.05,
                    max_order: 3,
                    p_delay: 0.05,
                    max_delay_ms: 200,
                    seed: 300,
                },
                ..Default::default()
            }),
            receiver: None,
        }
    }

    /// Create example receiver configuration
    pub fn example_receiver() -> Self {
        Config {
            sender: None,
            receiver: Some(ReceiverOptions {
                listen: Some(SocketAddr::from(([0, 0, 0, 0], 5000))),
                output: Some(PathBuf::from("received.pdf")),
                ..Default::default()
            }),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_configs() {
        let sender_config = Config::example_sender();
        assert!(sender_config.sender.is_some());

        let receiver_config = Config::example_receiver();
        assert!(receiver_config.receiver.is_some());
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = Config::example_sender();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let parsed: Config = toml::from_str(
            r#"
            [sender]
            receiver = "127.0.0.1:6000"
            mss = 200

            [sender.pld]
            p_drop = 0.3
            "#,
        )
        .unwrap();

        let sender = parsed.sender.unwrap();
        assert_eq!(sender.mss, 200);
        assert_eq!(sender.mws, DEFAULT_MWS);
        assert_eq!(sender.log, PathBuf::from("Sender_log.txt"));
        assert_eq!(sender.pld.p_drop, 0.3);
        assert_eq!(sender.pld.max_order, 0);
        assert!(parsed.receiver.is_none());
    }

    #[test]
    fn test_engine_config_conversion() {
        let sender = Config::example_sender().sender.unwrap();
        let engine = sender.to_engine_config().unwrap();
        assert_eq!(engine.mss, DEFAULT_MSS);
        assert_eq!(engine.pld.seed, 300);
        assert_eq!(engine.pld.max_order, 3);
        assert_eq!(engine.handshake_timeout, Duration::from_secs(5));

        let receiver = Config::example_receiver().receiver.unwrap();
        let engine = receiver.to_engine_config().unwrap();
        assert_eq!(engine.handshake_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_probability_rejected() {
        let mut sender = SenderOptions::default();
        sender.pld.p_delay = 2.0;
        assert!(matches!(
            sender.to_engine_config(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("stp-config-{}.toml", std::process::id()));
        let config = Config::example_receiver();
        config.to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded, config);
    }
}
