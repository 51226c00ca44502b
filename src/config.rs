//! Configuration for a libparodus instance

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, InitDetail, Result};

pub const DEFAULT_PARODUS_URL: &str = "tcp://127.0.0.1:6666";
pub const DEFAULT_CLIENT_URL: &str = "tcp://127.0.0.1:6667";
pub const MAX_SERVICE_NAME_LEN: usize = 128;

/// Test-only behaviour switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TestFlags {
    /// Open a fresh sender connection for every send and close it after.
    pub reconnect_every_send: bool,
}

/// Everything an instance needs to talk to parodus.
///
/// The instance keeps its own copy; changing a `Config` after `init` has no
/// effect on the running instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name this client registers under
    pub service_name: String,

    /// Whether to bind `client_url` and accept messages from parodus
    pub receive: bool,

    /// Silence window before the connection is considered lost; zero disables
    /// the keepalive monitor
    #[serde(rename = "keepalive_timeout_secs", with = "secs")]
    pub keepalive_timeout: Duration,

    /// Where parodus listens
    pub parodus_url: String,

    /// Where this client listens for parodus (when `receive` is set)
    pub client_url: String,

    pub test_flags: TestFlags,

    /// Depth of the receive queue
    pub queue_capacity: usize,

    #[serde(rename = "send_timeout_ms", with = "millis")]
    pub send_timeout: Duration,

    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,

    /// How often the receive thread checks for shutdown while idle
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,

    /// Keepalive windows of silence tolerated before reconnecting
    pub keepalive_max_missed: u32,

    /// Consecutive failed rebuilds before receive starts reporting failure
    pub max_reconnect_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            receive: false,
            keepalive_timeout: Duration::ZERO,
            parodus_url: DEFAULT_PARODUS_URL.to_string(),
            client_url: DEFAULT_CLIENT_URL.to_string(),
            test_flags: TestFlags::default(),
            queue_capacity: 50,
            send_timeout: Duration::from_millis(2000),
            connect_timeout: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(50),
            keepalive_max_missed: 1,
            max_reconnect_attempts: 5,
        }
    }
}

impl Config {
    /// Create a configuration for `service_name` with every other field at
    /// its default
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InitConfig {
            detail: InitDetail::Settings,
            reason: e.to_string(),
            oserr: libc::EINVAL,
        })
    }

    pub fn receive(mut self, receive: bool) -> Self {
        self.receive = receive;
        self
    }

    pub fn keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive_timeout = timeout;
        self
    }

    pub fn keepalive_timeout_secs(self, secs: u64) -> Self {
        self.keepalive_timeout(Duration::from_secs(secs))
    }

    pub fn parodus_url(mut self, url: impl Into<String>) -> Self {
        self.parodus_url = url.into();
        self
    }

    pub fn client_url(mut self, url: impl Into<String>) -> Self {
        self.client_url = url.into();
        self
    }

    pub fn reconnect_every_send(mut self, on: bool) -> Self {
        self.test_flags.reconnect_every_send = on;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn keepalive_max_missed(mut self, missed: u32) -> Self {
        self.keepalive_max_missed = missed;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Whether the keepalive monitor runs for this configuration.
    pub fn keepalive_enabled(&self) -> bool {
        self.receive && !self.keepalive_timeout.is_zero()
    }

    /// Check every field that does not need a socket to validate.
    /// URLs are checked when the sockets are opened.
    pub fn validate(&self) -> Result<()> {
        let bad = |detail: InitDetail, reason: String| Error::InitConfig {
            detail,
            reason,
            oserr: libc::EINVAL,
        };

        if self.service_name.is_empty() {
            return Err(bad(InitDetail::ServiceName, "service name is empty".into()));
        }
        if self.service_name.len() > MAX_SERVICE_NAME_LEN {
            return Err(bad(
                InitDetail::ServiceName,
                format!(
                    "service name is {} bytes, limit is {}",
                    self.service_name.len(),
                    MAX_SERVICE_NAME_LEN
                ),
            ));
        }
        if self.service_name.contains('\0') {
            return Err(bad(InitDetail::ServiceName, "service name contains a NUL byte".into()));
        }
        if self.queue_capacity == 0 {
            return Err(bad(InitDetail::Settings, "queue_capacity must be at least 1".into()));
        }
        for (name, value) in [
            ("send_timeout", self.send_timeout),
            ("connect_timeout", self.connect_timeout),
            ("poll_interval", self.poll_interval),
        ] {
            if value.is_zero() {
                return Err(bad(InitDetail::Settings, format!("{name} must be non-zero")));
            }
        }
        if self.keepalive_max_missed == 0 {
            return Err(bad(
                InitDetail::Settings,
                "keepalive_max_missed must be at least 1".into(),
            ));
        }
        if self
            .keepalive_timeout
            .checked_mul(self.keepalive_max_missed)
            .is_none()
        {
            return Err(bad(
                InitDetail::Settings,
                "keepalive_timeout * keepalive_max_missed is out of range".into(),
            ));
        }
        Ok(())
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    #[test]
    fn test_config_new_defaults() {
        let config = Config::new("iot");

        assert_eq!(config.service_name, "iot");
        assert!(!config.receive);
        assert_eq!(config.keepalive_timeout, Duration::ZERO);
        assert_eq!(config.parodus_url, DEFAULT_PARODUS_URL);
        assert_eq!(config.client_url, DEFAULT_CLIENT_URL);
        assert!(!config.test_flags.reconnect_every_send);
        assert_eq!(config.queue_capacity, 50);
        assert_eq!(config.send_timeout, Duration::from_millis(2000));
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.keepalive_max_missed, 1);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder_chain() {
        let config = Config::new("config")
            .receive(true)
            .keepalive_timeout_secs(20)
            .parodus_url("tcp://127.0.0.1:7000")
            .client_url("tcp://127.0.0.1:7001")
            .reconnect_every_send(true)
            .queue_capacity(5);

        assert!(config.receive);
        assert!(config.keepalive_enabled());
        assert_eq!(config.keepalive_timeout, Duration::from_secs(20));
        assert_eq!(config.parodus_url, "tcp://127.0.0.1:7000");
        assert_eq!(config.client_url, "tcp://127.0.0.1:7001");
        assert!(config.test_flags.reconnect_every_send);
        assert_eq!(config.queue_capacity, 5);
    }

    #[test]
    fn test_keepalive_needs_receive() {
        let config = Config::new("iot").keepalive_timeout_secs(20);
        assert!(!config.keepalive_enabled());
    }

    #[test]
    fn test_config_from_json() {
        let config = Config::from_json(
            r#"{
                "service_name": "iot",
                "receive": true,
                "keepalive_timeout_secs": 20,
                "client_url": "tcp://127.0.0.1:6668",
                "test_flags": { "reconnect_every_send": true },
                "poll_interval_ms": 10
            }"#,
        )
        .unwrap();

        assert_eq!(config.service_name, "iot");
        assert!(config.receive);
        assert_eq!(config.keepalive_timeout, Duration::from_secs(20));
        assert_eq!(config.client_url, "tcp://127.0.0.1:6668");
        assert_eq!(config.parodus_url, DEFAULT_PARODUS_URL);
        assert!(config.test_flags.reconnect_every_send);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_config_from_bad_json() {
        let err = Config::from_json("{ \"receive\": \"yes\" }").unwrap_err();
        assert_eq!(err.code(), codes::INIT_CFG);
        assert_eq!(err.detail(), Some(InitDetail::Settings));
    }

    #[test]
    fn test_service_name_limits() {
        let err = Config::new("").validate().unwrap_err();
        assert_eq!(err.detail(), Some(InitDetail::ServiceName));

        let err = Config::new("x".repeat(MAX_SERVICE_NAME_LEN + 1))
            .validate()
            .unwrap_err();
        assert_eq!(err.detail(), Some(InitDetail::ServiceName));
        assert_eq!(err.os_error(), libc::EINVAL);

        assert!(Config::new("x".repeat(MAX_SERVICE_NAME_LEN)).validate().is_ok());
    }

    #[test]
    fn test_zero_tunables_rejected() {
        assert!(Config::new("iot").queue_capacity(0).validate().is_err());
        assert!(Config::new("iot").poll_interval(Duration::ZERO).validate().is_err());
        assert!(Config::new("iot").keepalive_max_missed(0).validate().is_err());
    }

    #[test]
    fn test_keepalive_window_overflow_rejected() {
        let config = Config::from_json(
            r#"{ "service_name": "iot", "receive": true,
                 "keepalive_timeout_secs": 18446744073709551615,
                 "keepalive_max_missed": 2 }"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), codes::INIT_CFG);
        assert_eq!(err.detail(), Some(InitDetail::Settings));

        assert!(Config::new("iot")
            .keepalive_timeout_secs(u64::MAX)
            .keepalive_max_missed(1)
            .validate()
            .is_ok());
    }
}
