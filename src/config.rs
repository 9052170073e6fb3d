use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::Direction;

/// Engine configuration.
///
/// Everything the reference hardware encoded as compile-time constants —
/// buffer counts, buffer sizes, pipe depth — is configuration here, loadable
/// from TOML or built programmatically.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    /// Component name, used for thread names and buffer-mark targeting.
    #[serde(default = "default_name")]
    pub name: String,

    /// Codec identifier handed to the DSP proxy at open time.
    #[serde(default = "default_codec")]
    pub codec: String,

    /// Stream identifier handed to the DSP proxy at open time.
    #[serde(default)]
    pub stream_id: u32,

    /// Marshalled algorithm-control payload pushed to the codec on the
    /// Idle to Executing transition. Codec-specific and opaque here.
    #[serde(default)]
    pub alg_params: Option<Vec<u8>>,

    #[serde(default = "PortConfig::default_input")]
    pub input: PortConfig,

    #[serde(default = "PortConfig::default_output")]
    pub output: PortConfig,

    /// Depth of the command and buffer channels.
    #[serde(default = "default_channel_depth")]
    pub channel_depth: usize,

    /// Upper bound on every DSP acknowledgment wait, in milliseconds.
    ///
    /// Absent reproduces the reference behaviour: a wedged DSP blocks the
    /// component forever. Present turns the timeout into a hardware-class
    /// error that drives fatal recovery.
    #[serde(default)]
    pub ack_timeout_ms: Option<u64>,

    /// Whether a resource manager is integrated. With this set, a DSP open
    /// failure parks the component in `WaitForResources` instead of failing.
    #[serde(default)]
    pub resource_manager: bool,
}

/// Per-port buffer requirements.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PortConfig {
    /// Number of buffers the port needs before it counts as populated.
    pub buffer_count: usize,
    /// Capacity of each buffer in bytes.
    pub buffer_size: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl PortConfig {
    fn default_input() -> Self {
        Self {
            buffer_count: 4,
            buffer_size: 4096,
            enabled: true,
        }
    }

    fn default_output() -> Self {
        Self {
            buffer_count: 4,
            buffer_size: 8192,
            enabled: true,
        }
    }
}

fn default_name() -> String {
    "omxlink".to_string()
}

fn default_codec() -> String {
    "pcm".to_string()
}

fn default_channel_depth() -> usize {
    32
}

fn default_enabled() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            codec: default_codec(),
            stream_id: 0,
            alg_params: None,
            input: PortConfig::default_input(),
            output: PortConfig::default_output(),
            channel_depth: default_channel_depth(),
            ack_timeout_ms: None,
            resource_manager: false,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn port(&self, dir: Direction) -> &PortConfig {
        match dir {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_ms.map(Duration::from_millis)
    }
}
