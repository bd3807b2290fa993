//! Connection configuration

use crate::connection::ConnectionError;
use stp_protocol::{PldConfig, HEADER_SIZE};
use std::time::Duration;

/// Default maximum window size (bytes)
pub const DEFAULT_MWS: u32 = 1000;

/// Default maximum segment size (bytes)
pub const DEFAULT_MSS: u32 = 100;

/// Largest payload whose segment still fits in one UDP datagram over IPv4
pub const MAX_MSS: u32 = 65_507 - HEADER_SIZE as u32;

/// Default deviation multiplier for the RTO
pub const DEFAULT_GAMMA: f64 = 4.0;

/// Sender configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SenderConfig {
    /// Maximum window size in bytes
    pub mws: u32,
    /// Maximum segment size in bytes
    pub mss: u32,
    /// RTO deviation multiplier
    pub gamma: f64,
    /// Loss/delay emulator parameters
    pub pld: PldConfig,
    /// Bound on every handshake and teardown wait
    pub handshake_timeout: Duration,
    /// Socket read timeout, the longest a stage goes without checking for shutdown
    pub poll_interval: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            mws: DEFAULT_MWS,
            mss: DEFAULT_MSS,
            gamma: DEFAULT_GAMMA,
            pld: PldConfig::default(),
            handshake_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> Result<(), ConnectionError> {
        if self.mss == 0 {
            return Err(ConnectionError::InvalidConfig("mss must be positive".into()));
        }
        if self.mss > MAX_MSS {
            return Err(ConnectionError::InvalidConfig(format!(
                "mss must be at most {} so a segment fits in one datagram, got {}",
                MAX_MSS, self.mss
            )));
        }
        if self.gamma < 0.0 {
            return Err(ConnectionError::InvalidConfig("gamma must not be negative".into()));
        }
        let probabilities = [
            ("p_drop", self.pld.p_drop),
            ("p_duplicate", self.pld.p_duplicate),
            ("p_corrupt", self.pld.p_corrupt),
            ("p_order", self.pld.p_order),
            ("p_delay", self.pld.p_delay),
        ];
        for (name, p) in probabilities {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConnectionError::InvalidConfig(format!(
                    "{} must be within [0, 1], got {}",
                    name, p
                )));
            }
        }
        if self.poll_interval.is_zero() {
            return Err(ConnectionError::InvalidConfig("poll_interval must be positive".into()));
        }
        Ok(())
    }
}

/// Receiver configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    /// Bound on every handshake and teardown wait, including the wait for SYN
    pub handshake_timeout: Duration,
    /// Socket read timeout, the longest a stage goes without checking for shutdown
    pub poll_interval: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            handshake_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<(), ConnectionError> {
        if self.poll_interval.is_zero() {
            return Err(ConnectionError::InvalidConfig("poll_interval must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SenderConfig::default();
        assert_eq!(config.mws, 1000);
        assert_eq!(config.mss, 100);
        assert_eq!(config.gamma, 4.0);
        assert!(config.validate().is_ok());
        assert!(ReceiverConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_mss() {
        let config = SenderConfig {
            mss: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConnectionError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_mss_beyond_datagram() {
        let config = SenderConfig {
            mws: 140_000,
            mss: 70_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConnectionError::InvalidConfig(_))));

        let largest = SenderConfig {
            mws: MAX_MSS,
            mss: MAX_MSS,
            ..Default::default()
        };
        assert!(largest.validate().is_ok());
        assert!(SenderConfig { mss: MAX_MSS + 1, ..largest }.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_probability() {
        let mut config = SenderConfig::default();
        config.pld.p_corrupt = 1.5;
        assert!(matches!(config.validate(), Err(ConnectionError::InvalidConfig(_))));
    }
}
