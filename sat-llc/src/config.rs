use crate::error::{ConfigError, LlcError};
use crate::protocol::{DEFAULT_NUM_FLOWS, MAX_WINDOW_SIZE};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use std::fs;

/// Parameters of the selective-repeat ARQ, shared by every ARQ flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArqConfig {
    /// Maximum number of sequence numbers in flight (1..=64).
    pub window_size: u8,
    /// Retransmissions allowed before a frame is given up on.
    pub max_retransmissions: u32,
    pub retransmission_timer_ms: u64,
    /// How long the receiver waits for a missing sequence number before skipping it.
    pub rx_waiting_time_ms: u64,
    /// Acknowledge after this many in-order frames.
    pub ack_every: u32,
    pub max_ack_delay_ms: u64,
    /// Report frames dropped after `max_retransmissions` to the upper layer.
    pub report_losses: bool,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            max_retransmissions: 2,
            retransmission_timer_ms: 600,
            rx_waiting_time_ms: 1800,
            ack_every: 1,
            max_ack_delay_ms: 100,
            report_losses: true,
        }
    }
}

impl ArqConfig {
    pub fn retransmission_timer(&self) -> Duration {
        Duration::from_millis(self.retransmission_timer_ms)
    }

    pub fn rx_waiting_time(&self) -> Duration {
        Duration::from_millis(self.rx_waiting_time_ms)
    }

    pub fn max_ack_delay(&self) -> Duration {
        Duration::from_millis(self.max_ack_delay_ms)
    }

    pub fn validate(&self) -> Result<(), LlcError> {
        if self.window_size == 0 || self.window_size > MAX_WINDOW_SIZE {
            return Err(LlcError::InvalidConfig(format!(
                "window_size must be within 1..={MAX_WINDOW_SIZE}, got {}",
                self.window_size
            )));
        }
        if self.retransmission_timer_ms == 0 {
            return Err(LlcError::InvalidConfig(
                "retransmission_timer_ms must be positive".to_string(),
            ));
        }
        if self.ack_every == 0 {
            return Err(LlcError::InvalidConfig(
                "ack_every must be positive".to_string(),
            ));
        }
        // The receiver must outlast every transmission attempt of a frame.
        let sender_patience =
            (u64::from(self.max_retransmissions) + 1).saturating_mul(self.retransmission_timer_ms);
        if self.rx_waiting_time_ms < sender_patience {
            return Err(LlcError::InvalidConfig(format!(
                "rx_waiting_time_ms must be at least (max_retransmissions + 1) * \
                 retransmission_timer_ms = {sender_patience}, got {}",
                self.rx_waiting_time_ms
            )));
        }
        Ok(())
    }
}

/// Configuration of a link-layer dispatcher and all flows it creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlcConfig {
    /// Number of flows per peer, including the control flow.
    pub num_flows: u8,
    /// Send data flows through the ARQ window.
    pub tx_arq_enabled: bool,
    /// Expect sequenced frames on the data flows and acknowledge them.
    ///
    /// Must match the peer's `tx_arq_enabled`: a gateway running ARQ on the
    /// forward link only sets `tx_arq_enabled`, its terminals `rx_arq_enabled`.
    pub rx_arq_enabled: bool,
    pub arq: ArqConfig,
    /// Per-flow queue limits; `None` is unbounded.
    pub queue_max_bytes: Option<usize>,
    pub queue_max_packets: Option<usize>,
}

impl Default for LlcConfig {
    fn default() -> Self {
        Self {
            num_flows: DEFAULT_NUM_FLOWS,
            tx_arq_enabled: false,
            rx_arq_enabled: false,
            arq: ArqConfig::default(),
            queue_max_bytes: None,
            queue_max_packets: None,
        }
    }
}

impl LlcConfig {
    /// Runs ARQ in both directions.
    pub fn with_arq(mut self) -> Self {
        self.tx_arq_enabled = true;
        self.rx_arq_enabled = true;
        self
    }

    pub fn validate(&self) -> Result<(), LlcError> {
        if self.num_flows < 2 {
            return Err(LlcError::InvalidConfig(format!(
                "num_flows must include the control flow and one data flow, got {}",
                self.num_flows
            )));
        }
        self.arq.validate()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        let config = serde_json::from_str::<LlcConfig>(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let data = serde_json::to_string_pretty(self)?;
        let mut file = fs::File::create(path)?;
        file.write_all(data.as_bytes())?;
        Ok(())
    }
}
