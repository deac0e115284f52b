//! # SmartAudio Backend
//!
//! Full-duplex, auto-bauding serial backend for TBS SmartAudio devices.
//!
//! This module handles:
//! - Frame assembly/disassembly with CRC8 (see [`crc`] and [`framer`])
//! - An outbound command queue with single-outstanding-command tracking
//! - Retransmission on response timeout
//! - Response parsing for protocol versions 1.0, 2.0 and 2.1
//! - Autobauding across the 4800-4950 range
//!
//! The protocol tick is normally driven at a 200 ms cadence; all timing here
//! is wall-clock-relative so the exact cadence does not matter.

pub mod crc;
pub mod framer;
pub mod protocol;

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::debug;

use crate::device::tables::{
    BAND_NAMES, CHANNEL_NAMES, VTX_BAND_COUNT, VTX_CHANNEL_COUNT,
};
use crate::device::{tables, VtxBackend, VtxCapability, VtxKind};
use crate::serial::SerialIo;
use framer::SaFramer;
use protocol::*;

/// Time until an unanswered command is considered lost and resent
const SA_CMD_TIMEOUT_MS: u64 = 120;

/// Minimum spacing between idle state polls
const SA_POLLING_INTERVAL_MS: u64 = 150;

/// Idle polls are only issued within this window after the last explicit
/// command; beyond it a silent link stays silent instead of masking a stuck
/// link as routine traffic
const SA_POLLING_WINDOW_MS: u64 = 1000;

/// Autobaud range and step
const SMARTBAUD_MIN: u32 = 4800;
const SMARTBAUD_MAX: u32 = 4950;
const SMARTBAUD_STEP: u32 = 50;

/// Queue capacity: one heartbeat poll plus two user commands (a frequency
/// change can take two frames). A full queue drops the newest enqueue; the
/// reconciler retries on its next convergence pass.
const SA_QUEUE_CAP: usize = 5;

/// Init sequence phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SaInitPhase {
    #[default]
    Start,
    /// GET_SETTINGS sent, awaiting the version-bearing reply
    WaitSettings,
    /// v2.0 only: pit frequency query sent, awaiting the reply
    WaitPitFrequency,
    Done,
}

/// Last-received device ("hard") state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct SaDeviceState {
    version: SaVersion,
    /// Raw band*8+channel value as the device numbers them (0-origin)
    channel: u8,
    /// 1-origin power index; 0 until the first settings reply (not ready)
    power: u8,
    mode: u8,
    freq: u16,
    /// Out-of-range pit frequency, 0 until reported
    pit_freq: u16,
    /// Whether the device will power up in pit mode. Tracked separately from
    /// the mode bits because clearing pit mode without unsetting the flag
    /// clears PIR/POR while the device still boots into pit mode.
    will_boot_into_pit_mode: bool,
}

/// SmartAudio protocol backend
pub struct SmartAudioBackend {
    port: Box<dyn SerialIo>,
    capability: VtxCapability,
    device: SaDeviceState,
    last_logged: SaDeviceState,
    stats: SaStats,
    framer: SaFramer,

    power_table: [SaPowerLevel; SA_MAX_POWER_COUNT as usize],
    power_count: u8,

    queue: VecDeque<Bytes>,
    /// Opcode awaiting its response, SA_CMD_NONE when idle
    outstanding: u8,
    /// Verbatim copy of the outstanding frame for retransmission
    outstanding_frame: Bytes,

    last_tx_ms: u64,
    /// Last non-poll command; bounds the idle polling window
    last_command_ms: u64,

    baud: u32,
    /// 1 = stepping up, -1 = stepping down
    baud_dir: i32,

    init_phase: SaInitPhase,
}

impl SmartAudioBackend {
    pub fn new(port: Box<dyn SerialIo>) -> Self {
        let mut power_table = [SaPowerLevel::default(); SA_MAX_POWER_COUNT as usize];
        power_table[..SA_DEFAULT_POWER_TABLE.len()].copy_from_slice(&SA_DEFAULT_POWER_TABLE);

        Self {
            port,
            capability: VtxCapability {
                band_count: VTX_BAND_COUNT,
                channel_count: VTX_CHANNEL_COUNT,
                power_count: SA_DEFAULT_POWER_COUNT,
                band_names: BAND_NAMES.iter().map(|s| s.to_string()).collect(),
                channel_names: CHANNEL_NAMES.iter().map(|s| s.to_string()).collect(),
                power_names: ["----", "25", "200", "500", "800"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
            device: SaDeviceState::default(),
            last_logged: SaDeviceState::default(),
            stats: SaStats::default(),
            framer: SaFramer::new(),
            power_table,
            power_count: SA_DEFAULT_POWER_COUNT,
            queue: VecDeque::with_capacity(SA_QUEUE_CAP),
            outstanding: SA_CMD_NONE,
            outstanding_frame: Bytes::new(),
            last_tx_ms: 0,
            last_command_ms: 0,
            baud: SMARTBAUD_MIN,
            baud_dir: 1,
            init_phase: SaInitPhase::Start,
        }
    }

    /// Link statistics for user-side troubleshooting
    pub fn stats(&self) -> &SaStats {
        &self.stats
    }

    /// Current working baud rate
    pub fn baud(&self) -> u32 {
        self.baud
    }

    fn enqueue(&mut self, frame: Bytes) {
        if self.queue.len() >= SA_QUEUE_CAP {
            debug!("SmartAudio queue full, dropping newest command");
            return;
        }
        self.queue.push_back(frame);
    }

    fn queue_get_settings(&mut self) {
        self.enqueue(make_command_frame(SA_CMD_GET_SETTINGS, &[]));
    }

    /// Queue a SET_FREQUENCY, including the flagged pit-frequency forms.
    ///
    /// Going from channel mode to direct-frequency mode fails on real
    /// hardware when the frequency equals the one the device already stores;
    /// a nudge frame one MHz off is queued first to work around it.
    fn queue_set_frequency_raw(&mut self, freq: u16) {
        let flagged = freq & (SA_FREQ_GETPIT | SA_FREQ_SETPIT) != 0;

        if !flagged
            && (self.device.mode & SA_MODE_GET_FREQ_BY_FREQ) == 0
            && freq == self.device.freq
        {
            let nudge = if freq == SA_MAX_FREQUENCY_MHZ {
                freq - 1
            } else {
                freq + 1
            };
            self.enqueue(make_command_frame(SA_CMD_SET_FREQUENCY, &nudge.to_be_bytes()));
        }

        self.enqueue(make_command_frame(SA_CMD_SET_FREQUENCY, &freq.to_be_bytes()));
    }

    fn queue_set_mode(&mut self, mode: u8) {
        if self.device.version >= SaVersion::V2_1
            && mode & SA_MODE_CLR_PITMODE != 0
            && mode & (SA_MODE_SET_IN_RANGE_PITMODE | SA_MODE_SET_OUT_RANGE_PITMODE) != 0
        {
            // Quitting pit mode without unsetting the boot flag: the reply
            // will report pit=off while the device still boots into pit mode,
            // so remember it here.
            self.device.will_boot_into_pit_mode = true;
        }

        let payload = (mode & 0x3F) | SA_MODE_SET_UNLOCK;
        self.enqueue(make_command_frame(SA_CMD_SET_MODE, &[payload]));
    }

    fn send_frame(&mut self, frame: &[u8], now_ms: u64) {
        // The line must be pulled low before the frame; a leading 0x00 does it
        self.port.write_bytes(&[0x00]);
        self.port.write_bytes(frame);
        self.last_tx_ms = now_ms;
        self.stats.packets_sent += 1;
    }

    fn send_command(&mut self, frame: Bytes, now_ms: u64) {
        self.outstanding = frame[2] >> 1;
        self.outstanding_frame = frame.clone();
        self.send_frame(&frame, now_ms);
    }

    fn resend(&mut self, now_ms: u64) {
        let frame = self.outstanding_frame.clone();
        self.send_frame(&frame, now_ms);
    }

    /// Re-evaluate the working baud rate from the send/receive ratio.
    ///
    /// After every 10 transmissions: a ratio of at least 70% keeps the rate;
    /// otherwise the rate steps by 50 baud, reversing direction at either
    /// bound. The counters reset after every decision.
    fn autobaud(&mut self) {
        if self.stats.packets_sent < 10 {
            return;
        }

        if (self.stats.packets_received * 100) / self.stats.packets_sent >= 70 {
            self.stats.packets_sent = 0;
            self.stats.packets_received = 0;
            return;
        }

        if self.baud_dir == 1 && self.baud >= SMARTBAUD_MAX {
            self.baud_dir = -1;
        } else if self.baud_dir == -1 && self.baud <= SMARTBAUD_MIN {
            self.baud_dir = 1;
        }

        self.baud = (i64::from(self.baud) + i64::from(SMARTBAUD_STEP) * i64::from(self.baud_dir))
            as u32;
        debug!("SmartAudio autobaud: {}", self.baud);
        self.port.set_baud_rate(self.baud);

        self.stats.packets_sent = 0;
        self.stats.packets_received = 0;
    }

    fn process_response(&mut self, frame: &SaFrame) {
        let code = frame.code;

        if code == self.outstanding
            || ((code == SA_CMD_GET_SETTINGS_V2 || code == SA_CMD_GET_SETTINGS_V21)
                && self.outstanding == SA_CMD_GET_SETTINGS)
        {
            self.outstanding = SA_CMD_NONE;
        } else {
            self.stats.out_of_order += 1;
            debug!(
                "SmartAudio out-of-order response: outstanding {:#04x}, got {:#04x}",
                self.outstanding, code
            );
        }

        let p = &frame.payload;
        match code {
            SA_CMD_GET_SETTINGS | SA_CMD_GET_SETTINGS_V2 | SA_CMD_GET_SETTINGS_V21 => {
                if p.len() < 5 {
                    return;
                }

                self.device.version = match code {
                    SA_CMD_GET_SETTINGS => SaVersion::V1_0,
                    SA_CMD_GET_SETTINGS_V2 => SaVersion::V2_0,
                    _ => SaVersion::V2_1,
                };
                self.device.channel = p[0];
                let mut raw_power = p[1];
                self.device.mode = p[2];
                self.device.freq = u16::from_be_bytes([p[3], p[4]]);

                // PIR/POR are only meaningful while the device reports pit
                // mode active; outside of it they may have been cleared by a
                // "quit pit mode without unsetting the flag" sequence
                if self.device.mode & SA_MODE_GET_PITMODE != 0 {
                    self.device.will_boot_into_pit_mode = self.device.mode
                        & (SA_MODE_GET_IN_RANGE_PITMODE | SA_MODE_GET_OUT_RANGE_PITMODE)
                        != 0;
                }

                if self.device.version == SaVersion::V2_1 {
                    if p.len() < 8 {
                        debug!("SmartAudio v2.1 settings without power levels");
                        return;
                    }

                    // The device reports count+1 levels; the first one is the
                    // 0 dBm pit sentinel and is skipped. After sending 0 dBm
                    // the device keeps reporting the previous power, so zero
                    // never appears as a regular level.
                    let count = (p[6] as usize).min(SA_MAX_POWER_COUNT as usize);
                    self.power_count = count as u8;
                    self.capability.power_count = count as u8;

                    let mut names = vec!["----".to_string()];
                    for i in 0..count {
                        let dbm = p.get(8 + i).copied().unwrap_or(0);
                        self.power_table[i] = SaPowerLevel {
                            dbm,
                            mw: dbm_to_mw(dbm),
                        };
                        names.push(self.power_table[i].mw.to_string());
                    }
                    self.capability.power_names = names;

                    raw_power = p[5];
                    self.device.power = 0;
                    for i in 0..count {
                        if raw_power == self.power_table[i].dbm {
                            self.device.power = (i + 1) as u8;
                        }
                    }
                } else {
                    self.device.power = raw_power.saturating_add(1);
                }
            }

            SA_CMD_SET_POWER | SA_CMD_SET_CHANNEL => {}

            SA_CMD_SET_FREQUENCY => {
                if p.len() < 3 {
                    return;
                }

                let freq = u16::from_be_bytes([p[0], p[1]]);
                if freq & SA_FREQ_GETPIT != 0 || freq & SA_FREQ_SETPIT != 0 {
                    self.device.pit_freq = freq & SA_FREQ_MASK;
                    debug!("SmartAudio pit frequency: {}", self.device.pit_freq);
                } else {
                    self.device.freq = freq;
                    debug!("SmartAudio frequency: {}", freq);
                }
            }

            SA_CMD_SET_MODE => {
                if let Some(&mode) = p.first() {
                    debug!("SmartAudio SET_MODE acknowledged: {:#04x}", mode);
                }
            }

            _ => {
                self.stats.bad_code += 1;
                return;
            }
        }

        if self.device != self.last_logged {
            debug!(
                "SmartAudio state: version {:?}, channel {}, power {}, mode {:#04x}, freq {}, pit freq {}, boots into pit {}",
                self.device.version,
                self.device.channel,
                self.device.power,
                self.device.mode,
                self.device.freq,
                self.device.pit_freq,
                self.device.will_boot_into_pit_mode,
            );
            self.last_logged = self.device.clone();
        }
    }

    fn run_init_phase(&mut self) {
        match self.init_phase {
            SaInitPhase::Start => {
                self.queue_get_settings();
                self.init_phase = SaInitPhase::WaitSettings;
            }

            SaInitPhase::WaitSettings => {
                if self.device.version == SaVersion::Unknown {
                    return;
                }

                // A v1 device treats the flagged pit query as a plain
                // SET_FREQUENCY and ends up in direct-frequency mode with an
                // uninitialized value, so only v2.0 gets the query
                if self.device.version == SaVersion::V2_0 {
                    self.queue_set_frequency_raw(SA_FREQ_GETPIT);
                    self.init_phase = SaInitPhase::WaitPitFrequency;
                } else {
                    self.init_phase = SaInitPhase::Done;
                }

                if self.device.version >= SaVersion::V2_0 {
                    // Did the device boot into pit mode on its own?
                    self.device.will_boot_into_pit_mode =
                        self.device.mode & SA_MODE_GET_PITMODE != 0;
                }
            }

            SaInitPhase::WaitPitFrequency => {
                if self.device.pit_freq != 0 {
                    self.init_phase = SaInitPhase::Done;
                }
            }

            SaInitPhase::Done => {}
        }
    }
}

impl VtxBackend for SmartAudioBackend {
    fn kind(&self) -> VtxKind {
        VtxKind::SmartAudio
    }

    fn capability(&self) -> &VtxCapability {
        &self.capability
    }

    fn is_ready(&self) -> bool {
        // A power reading exists once the first settings reply has landed
        self.device.power != 0
    }

    fn set_band_channel(&mut self, band: u8, channel: u8) {
        if band == 0 || band > VTX_BAND_COUNT || channel == 0 || channel > VTX_CHANNEL_COUNT {
            return;
        }

        let chval = (band - 1) * 8 + (channel - 1);
        debug!("SmartAudio set band {} channel {} (chval {:#04x})", band, channel, chval);
        self.enqueue(make_command_frame(SA_CMD_SET_CHANNEL, &[chval]));
    }

    fn set_frequency_mhz(&mut self, freq_mhz: u16) {
        if !(SA_MIN_FREQUENCY_MHZ..=SA_MAX_FREQUENCY_MHZ).contains(&freq_mhz) {
            return;
        }
        self.queue_set_frequency_raw(freq_mhz);
    }

    fn set_power_index(&mut self, index: u8) {
        if !self.is_ready() {
            return;
        }

        if index == 0 {
            debug!("SmartAudio does not support power off");
            return;
        }

        if index > self.power_count {
            debug!("SmartAudio invalid power index {}", index);
            return;
        }

        let level = self.power_table[index as usize - 1];
        let value = match self.device.version {
            SaVersion::V1_0 => level.dbm,
            SaVersion::V2_0 => index - 1,
            SaVersion::V2_1 => level.dbm | SA_POWER_BY_DBM_FLAG,
            SaVersion::Unknown => return,
        };

        debug!("SmartAudio set power index {} (value {:#04x})", index, value);
        self.enqueue(make_command_frame(SA_CMD_SET_POWER, &[value]));
    }

    fn set_pit_mode(&mut self, on: bool) {
        if !self.is_ready() || self.device.version == SaVersion::Unknown {
            return;
        }

        if on && self.device.version < SaVersion::V2_1 {
            // Pre-2.1 firmware cannot enter pit mode by software
            return;
        }

        if self.device.version >= SaVersion::V2_1 && !self.device.will_boot_into_pit_mode {
            if on {
                // Enter pit mode with SET_POWER at the 0 dBm sentinel; unlike
                // the mode bits this does not make the device boot into pit
                // mode on its next power-up
                self.enqueue(make_command_frame(SA_CMD_SET_POWER, &[SA_POWER_BY_DBM_FLAG]));
                debug!("SmartAudio pit mode on via 0 dBm power");
            } else {
                self.queue_set_mode(SA_MODE_CLR_PITMODE);
                debug!("SmartAudio pit mode cleared");
            }
            return;
        }

        let mut new_mode = if on { 0 } else { SA_MODE_CLR_PITMODE };

        if self.device.mode & SA_MODE_GET_OUT_RANGE_PITMODE != 0 {
            new_mode |= SA_MODE_SET_OUT_RANGE_PITMODE;
        }

        if self.device.mode & SA_MODE_GET_IN_RANGE_PITMODE != 0 || (on && new_mode == 0) {
            // Turning pit mode on must select at least one pit variant
            new_mode |= SA_MODE_SET_IN_RANGE_PITMODE;
        }

        self.queue_set_mode(new_mode);
    }

    fn band_channel(&self) -> Option<(u8, u8)> {
        if !self.is_ready() {
            return None;
        }

        let channel = self.device.channel % 8 + 1;
        // Direct-frequency mode reports band 0
        let band = if self.device.mode & SA_MODE_GET_FREQ_BY_FREQ != 0 {
            0
        } else {
            self.device.channel / 8 + 1
        };
        Some((band, channel))
    }

    fn power_index(&self) -> Option<u8> {
        if !self.is_ready() {
            return None;
        }

        let index = if self.device.version == SaVersion::V1_0 {
            // v1 reports the DAC value rather than an index
            dac_to_power_index(
                self.device.power.saturating_sub(1),
                &self.power_table,
                self.power_count,
            )
        } else {
            self.device.power
        };
        Some(index)
    }

    fn pit_mode(&self) -> Option<bool> {
        // Only v1 reports a pit flag that can be mirrored directly; later
        // versions manage pit through power/mode sequences instead
        if !self.is_ready() || self.device.version >= SaVersion::V2_0 {
            return None;
        }
        Some(self.device.mode & SA_MODE_GET_PITMODE != 0)
    }

    fn frequency_mhz(&self) -> Option<u16> {
        if !self.is_ready() {
            return None;
        }

        if self.device.mode & SA_MODE_GET_FREQ_BY_FREQ != 0 {
            Some(self.device.freq)
        } else {
            tables::band_channel_to_freq(self.device.channel / 8 + 1, self.device.channel % 8 + 1)
        }
    }

    fn power(&self) -> Option<(u8, u16)> {
        let index = self.power_index()?;
        let mw = self.power_mw_for_index(index).unwrap_or(0);
        Some((index, mw))
    }

    fn power_mw_for_index(&self, index: u8) -> Option<u16> {
        if index == 0 || index > self.power_count {
            return None;
        }
        Some(self.power_table[index as usize - 1].mw)
    }

    fn tick(&mut self, now_ms: u64) {
        // Drain whatever the link buffered since the last tick
        while self.port.bytes_available() > 0 {
            let Some(byte) = self.port.read_byte() else {
                break;
            };
            if let Some(frame) = self.framer.push(byte, &mut self.stats) {
                self.process_response(&frame);
            }
        }

        self.autobaud();
        self.run_init_phase();

        if self.outstanding != SA_CMD_NONE {
            if now_ms.saturating_sub(self.last_tx_ms) > SA_CMD_TIMEOUT_MS {
                debug!("SmartAudio resending {:#04x}", self.outstanding);
                self.resend(now_ms);
                self.last_command_ms = now_ms;
            }
        } else if let Some(frame) = self.queue.pop_front() {
            self.send_command(frame, now_ms);
            self.last_command_ms = now_ms;
        } else if now_ms.saturating_sub(self.last_command_ms) < SA_POLLING_WINDOW_MS
            && now_ms.saturating_sub(self.last_tx_ms) >= SA_POLLING_INTERVAL_MS
        {
            // Poll for externally-caused state changes (a hand on the button),
            // but only briefly after real traffic so a dead link goes quiet
            self.queue_get_settings();
            if let Some(frame) = self.queue.pop_front() {
                self.send_command(frame, now_ms);
            }
        }
    }
}
