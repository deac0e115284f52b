//! # Tramp Backend
//!
//! Serial backend for ImmersionRC Tramp devices at a fixed 9600 baud.
//!
//! Unlike SmartAudio there is no command queue; the link is driven by a
//! state machine that alternates between applying one pending change and
//! confirming the device state with a status query. Capabilities are probed
//! once on detection and define the usable frequency range and power table.

pub mod protocol;

use bytes::Bytes;
use tracing::debug;

use crate::device::tables::{
    BAND_NAMES, CHANNEL_NAMES, VTX_BAND_COUNT, VTX_CHANNEL_COUNT,
};
use crate::device::{tables, VtxBackend, VtxCapability, VtxKind};
use crate::serial::SerialIo;
use protocol::*;

/// Time until an unanswered query is considered lost
const TRAMP_RESPONSE_TIMEOUT_MS: u64 = 200;

/// Settle time between a setter command and the confirming status query;
/// the RF section needs a moment after retuning
const TRAMP_SETTLE_MS: u64 = 200;

/// Idle status poll interval
const TRAMP_STATUS_INTERVAL_MS: u64 = 1000;

/// Capability probe retry interval while no device answers
const TRAMP_OFFLINE_RETRY_MS: u64 = 500;

/// Consecutive status timeouts tolerated before re-detection
const TRAMP_MAX_STATUS_TIMEOUTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrampState {
    /// Forget the device and start over
    Reset,
    /// No device seen; probing capabilities
    Offline,
    /// Capabilities in hand; awaiting the first status reply
    Detecting,
    /// Detected and settled
    Idle,
    /// Post-command settle delay
    QueryDelay,
    /// Due to send a status query
    QueryStatus,
    /// Status query sent, awaiting the reply
    WaitStatus,
}

/// Tramp protocol backend
pub struct TrampBackend {
    port: Box<dyn SerialIo>,
    capability: VtxCapability,
    stats: TrampStats,
    framer: TrampFramer,

    capabilities: Option<TrampCapabilities>,
    status: Option<TrampStatus>,
    power_table: Vec<u16>,
    /// Caps the reported maximum power (and thus the table) when non-zero
    max_power_override_mw: u16,

    state: TrampState,
    state_entered_ms: u64,
    last_request_ms: u64,
    last_status_ms: u64,
    consecutive_timeouts: u32,

    pending_frequency: Option<u16>,
    pending_power_mw: Option<u16>,
    pending_pit: Option<bool>,
}

/// The power steps offered for a device topping out at `max_mw`
fn power_table_for(max_mw: u16) -> Vec<u16> {
    if max_mw >= 800 {
        vec![25, 100, 200, 400, 800]
    } else if max_mw >= 600 {
        vec![25, 100, 200, 400, 600]
    } else if max_mw >= 400 {
        vec![25, 100, 200, 400]
    } else if max_mw >= 200 {
        vec![25, 100, 200]
    } else {
        vec![25, 100]
    }
}

impl TrampBackend {
    pub fn new(port: Box<dyn SerialIo>, max_power_override_mw: u16) -> Self {
        Self {
            port,
            capability: VtxCapability {
                band_count: VTX_BAND_COUNT,
                channel_count: VTX_CHANNEL_COUNT,
                power_count: 5,
                band_names: BAND_NAMES.iter().map(|s| s.to_string()).collect(),
                channel_names: CHANNEL_NAMES.iter().map(|s| s.to_string()).collect(),
                power_names: ["----", "25", "100", "200", "400", "600"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
            stats: TrampStats::default(),
            framer: TrampFramer::new(),
            capabilities: None,
            status: None,
            power_table: power_table_for(600),
            max_power_override_mw,
            state: TrampState::Reset,
            state_entered_ms: 0,
            last_request_ms: 0,
            last_status_ms: 0,
            consecutive_timeouts: 0,
            pending_frequency: None,
            pending_power_mw: None,
            pending_pit: None,
        }
    }

    /// Link statistics for user-side troubleshooting
    pub fn stats(&self) -> &TrampStats {
        &self.stats
    }

    fn send(&mut self, frame: Bytes, now_ms: u64) {
        self.port.write_bytes(&frame);
        self.last_request_ms = now_ms;
        self.stats.packets_sent += 1;
    }

    fn enter(&mut self, state: TrampState, now_ms: u64) {
        self.state = state;
        self.state_entered_ms = now_ms;
        match state {
            TrampState::Offline => {
                self.send(make_frame(TRAMP_CMD_CAPABILITIES, 0), now_ms);
            }
            TrampState::Detecting => {
                self.send(make_frame(TRAMP_CMD_STATUS, 0), now_ms);
            }
            _ => {}
        }
    }

    fn handle_response(&mut self, response: TrampResponse, now_ms: u64) {
        match response {
            TrampResponse::Capabilities(mut caps) => {
                if self.state != TrampState::Offline {
                    return;
                }

                if self.max_power_override_mw > 0
                    && caps.max_power_mw > self.max_power_override_mw
                {
                    caps.max_power_mw = self.max_power_override_mw;
                }

                self.power_table = power_table_for(caps.max_power_mw);
                self.capability.power_count = self.power_table.len() as u8;
                let mut names = vec!["----".to_string()];
                names.extend(self.power_table.iter().map(|mw| mw.to_string()));
                self.capability.power_names = names;

                debug!(
                    "Tramp capabilities: {}-{} MHz, {} mW max",
                    caps.min_frequency_mhz, caps.max_frequency_mhz, caps.max_power_mw
                );
                self.capabilities = Some(caps);
                self.enter(TrampState::Detecting, now_ms);
            }

            TrampResponse::Status(status) => {
                self.consecutive_timeouts = 0;
                if self.status != Some(status) {
                    debug!(
                        "Tramp status: {} MHz, {} mW configured ({} mW actual), pit {}",
                        status.frequency_mhz,
                        status.configured_power_mw,
                        status.actual_power_mw,
                        status.pit_mode,
                    );
                }
                self.status = Some(status);

                if matches!(self.state, TrampState::Detecting | TrampState::WaitStatus) {
                    self.enter(TrampState::Idle, now_ms);
                }
            }
        }
    }
}

impl VtxBackend for TrampBackend {
    fn kind(&self) -> VtxKind {
        VtxKind::Tramp
    }

    fn capability(&self) -> &VtxCapability {
        &self.capability
    }

    fn is_ready(&self) -> bool {
        self.capabilities.is_some()
            && self.status.is_some()
            && !matches!(
                self.state,
                TrampState::Reset | TrampState::Offline | TrampState::Detecting
            )
    }

    fn set_band_channel(&mut self, band: u8, channel: u8) {
        if !self.is_ready() {
            return;
        }
        let Some(freq) = tables::band_channel_to_freq(band, channel) else {
            return;
        };
        self.set_frequency_mhz(freq);
    }

    fn set_frequency_mhz(&mut self, freq_mhz: u16) {
        if !self.is_ready() {
            return;
        }
        // Unwrap is safe past the readiness gate, but stay explicit
        let Some(caps) = self.capabilities else {
            return;
        };
        if freq_mhz < caps.min_frequency_mhz || freq_mhz > caps.max_frequency_mhz {
            debug!(
                "Tramp frequency {} outside device range {}-{}",
                freq_mhz, caps.min_frequency_mhz, caps.max_frequency_mhz
            );
            return;
        }
        self.pending_frequency = Some(freq_mhz);
    }

    fn set_power_index(&mut self, index: u8) {
        if !self.is_ready() || index == 0 {
            return;
        }
        let Some(&mw) = self.power_table.get(index as usize - 1) else {
            debug!("Tramp invalid power index {}", index);
            return;
        };
        self.pending_power_mw = Some(mw);
    }

    fn set_pit_mode(&mut self, on: bool) {
        if !self.is_ready() {
            return;
        }
        self.pending_pit = Some(on);
    }

    fn band_channel(&self) -> Option<(u8, u8)> {
        if !self.is_ready() {
            return None;
        }
        let status = self.status?;
        // A frequency outside the band plan reports as direct-frequency
        Some(tables::freq_to_band_channel(status.frequency_mhz).unwrap_or((0, 1)))
    }

    fn power_index(&self) -> Option<u8> {
        if !self.is_ready() {
            return None;
        }
        let status = self.status?;
        let index = self
            .power_table
            .iter()
            .position(|&mw| mw == status.configured_power_mw)
            .map(|i| i as u8 + 1)
            .unwrap_or(0);
        Some(index)
    }

    fn pit_mode(&self) -> Option<bool> {
        if !self.is_ready() {
            return None;
        }
        Some(self.status?.pit_mode)
    }

    fn frequency_mhz(&self) -> Option<u16> {
        if !self.is_ready() {
            return None;
        }
        Some(self.status?.frequency_mhz)
    }

    fn power(&self) -> Option<(u8, u16)> {
        let index = self.power_index()?;
        let mw = self.status?.configured_power_mw;
        Some((index, mw))
    }

    fn power_mw_for_index(&self, index: u8) -> Option<u16> {
        if index == 0 {
            return None;
        }
        self.power_table.get(index as usize - 1).copied()
    }

    fn tick(&mut self, now_ms: u64) {
        while self.port.bytes_available() > 0 {
            let Some(byte) = self.port.read_byte() else {
                break;
            };
            if let Some(response) = self.framer.push(byte, &mut self.stats) {
                self.handle_response(response, now_ms);
            }
        }

        match self.state {
            TrampState::Reset => {
                self.framer.reset();
                self.consecutive_timeouts = 0;
                self.capabilities = None;
                self.status = None;
                self.pending_frequency = None;
                self.pending_power_mw = None;
                self.pending_pit = None;
                self.enter(TrampState::Offline, now_ms);
            }

            TrampState::Offline => {
                if now_ms.saturating_sub(self.last_request_ms) >= TRAMP_OFFLINE_RETRY_MS {
                    self.send(make_frame(TRAMP_CMD_CAPABILITIES, 0), now_ms);
                }
            }

            TrampState::Detecting => {
                if now_ms.saturating_sub(self.state_entered_ms) >= TRAMP_RESPONSE_TIMEOUT_MS {
                    debug!("Tramp detection timed out");
                    self.state = TrampState::Reset;
                }
            }

            TrampState::Idle => {
                // One pending change per pass; pit mode wins so a power-up
                // never happens on the wrong frequency at full power
                if let Some(on) = self.pending_pit.take() {
                    let param = if on { 0 } else { 1 };
                    debug!("Tramp set pit mode {}", on);
                    self.send(make_frame(TRAMP_CMD_SET_PITMODE, param), now_ms);
                    self.enter(TrampState::QueryDelay, now_ms);
                } else if let Some(freq) = self.pending_frequency.take() {
                    debug!("Tramp set frequency {} MHz", freq);
                    self.send(make_frame(TRAMP_CMD_SET_FREQUENCY, freq), now_ms);
                    self.enter(TrampState::QueryDelay, now_ms);
                } else if let Some(mw) = self.pending_power_mw.take() {
                    debug!("Tramp set power {} mW", mw);
                    self.send(make_frame(TRAMP_CMD_SET_POWER, mw), now_ms);
                    self.enter(TrampState::QueryDelay, now_ms);
                } else if now_ms.saturating_sub(self.last_status_ms) >= TRAMP_STATUS_INTERVAL_MS {
                    self.enter(TrampState::QueryStatus, now_ms);
                }
            }

            TrampState::QueryDelay => {
                if now_ms.saturating_sub(self.state_entered_ms) >= TRAMP_SETTLE_MS {
                    self.enter(TrampState::QueryStatus, now_ms);
                }
            }

            TrampState::QueryStatus => {
                self.send(make_frame(TRAMP_CMD_STATUS, 0), now_ms);
                self.last_status_ms = now_ms;
                self.enter(TrampState::WaitStatus, now_ms);
            }

            TrampState::WaitStatus => {
                if now_ms.saturating_sub(self.state_entered_ms) >= TRAMP_RESPONSE_TIMEOUT_MS {
                    self.consecutive_timeouts += 1;
                    self.stats.status_timeouts += 1;
                    if self.consecutive_timeouts > TRAMP_MAX_STATUS_TIMEOUTS {
                        debug!("Tramp device lost, re-detecting");
                        self.state = TrampState::Reset;
                    } else {
                        self.enter(TrampState::Idle, now_ms);
                    }
                }
            }
        }
    }
}
