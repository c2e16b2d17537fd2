use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use gridlink_core::error::{LinkError, Result};

/// Socket the grid server listens on when nothing else is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/grid-server.sock";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub version: u32,

    #[serde(default)]
    pub client: ClientSection,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: 1,
            client: ClientSection::default(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(LinkError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        self.client.validate()?;

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSection {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Default per-request deadline; `0` leaves requests without one.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    #[serde(default = "default_read_buffer_bytes")]
    pub read_buffer_bytes: usize,

    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            read_buffer_bytes: default_read_buffer_bytes(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl ClientSection {
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(LinkError::Config("client.socket_path must not be empty".into()));
        }
        if !(100..=60_000).contains(&self.connect_timeout_ms) {
            return Err(LinkError::Config(
                "client.connect_timeout_ms must be between 100 and 60000".into(),
            ));
        }
        if self.request_timeout_ms != 0 && !(100..=600_000).contains(&self.request_timeout_ms) {
            return Err(LinkError::Config(
                "client.request_timeout_ms must be 0 or between 100 and 600000".into(),
            ));
        }
        if !(1024..=64 * 1024 * 1024).contains(&self.max_frame_bytes) {
            return Err(LinkError::Config(
                "client.max_frame_bytes must be between 1024 and 67108864".into(),
            ));
        }
        if !(512..=1024 * 1024).contains(&self.read_buffer_bytes) {
            return Err(LinkError::Config(
                "client.read_buffer_bytes must be between 512 and 1048576".into(),
            ));
        }
        if self.read_buffer_bytes > self.max_frame_bytes {
            return Err(LinkError::Config(
                "client.read_buffer_bytes must not exceed max_frame_bytes".into(),
            ));
        }
        if !(1..=65_536).contains(&self.event_queue_capacity) {
            return Err(LinkError::Config(
                "client.event_queue_capacity must be between 1 and 65536".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_max_frame_bytes() -> usize {
    gridlink_core::protocol::frame::DEFAULT_MAX_FRAME_BYTES
}
fn default_read_buffer_bytes() -> usize {
    4096
}
fn default_event_queue_capacity() -> usize {
    1024
}
