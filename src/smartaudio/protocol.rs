//! # SmartAudio Protocol Constants and Types
//!
//! Wire-level definitions for the TBS SmartAudio protocol, versions 1.0, 2.0
//! and 2.1.

use super::crc::crc8;
use bytes::Bytes;

/// First preamble byte
pub const SA_PREAMBLE_1: u8 = 0xAA;

/// Second preamble byte
pub const SA_PREAMBLE_2: u8 = 0x55;

/// Longest frame body the receiver accepts (code + length + payload)
pub const SA_MAX_RCVLEN: usize = 21;

/// Command opcodes. A command byte on the wire is `(opcode << 1) | 1`;
/// responses carry the bare opcode, which is also how the two are told apart.
pub const SA_CMD_NONE: u8 = 0x00;
pub const SA_CMD_GET_SETTINGS: u8 = 0x01;
pub const SA_CMD_SET_POWER: u8 = 0x02;
pub const SA_CMD_SET_CHANNEL: u8 = 0x03;
pub const SA_CMD_SET_FREQUENCY: u8 = 0x04;
pub const SA_CMD_SET_MODE: u8 = 0x05;
/// Response-only code used by v2.0 devices for GET_SETTINGS
pub const SA_CMD_GET_SETTINGS_V2: u8 = 0x09;
/// Response-only code used by v2.1 devices for GET_SETTINGS
pub const SA_CMD_GET_SETTINGS_V21: u8 = 0x11;

/// Mode bits as reported in the settings response
pub const SA_MODE_GET_FREQ_BY_FREQ: u8 = 1;
pub const SA_MODE_GET_PITMODE: u8 = 2;
pub const SA_MODE_GET_IN_RANGE_PITMODE: u8 = 4;
pub const SA_MODE_GET_OUT_RANGE_PITMODE: u8 = 8;
pub const SA_MODE_GET_UNLOCK: u8 = 16;
pub const SA_MODE_GET_DEFERRED_FREQ: u8 = 32;

/// Mode bits as sent in a SET_MODE command
pub const SA_MODE_SET_IN_RANGE_PITMODE: u8 = 1;
pub const SA_MODE_SET_OUT_RANGE_PITMODE: u8 = 2;
pub const SA_MODE_CLR_PITMODE: u8 = 4;
pub const SA_MODE_SET_UNLOCK: u8 = 8;

/// Frequency-word flag bits for SET_FREQUENCY: request the pit-mode
/// ("out-of-range") frequency instead of setting the live one
pub const SA_FREQ_GETPIT: u16 = 1 << 14;
pub const SA_FREQ_SETPIT: u16 = 1 << 15;
pub const SA_FREQ_MASK: u16 = !(SA_FREQ_GETPIT | SA_FREQ_SETPIT);

/// Vendor-reported frequency range in MHz
pub const SA_MIN_FREQUENCY_MHZ: u16 = 5000;
pub const SA_MAX_FREQUENCY_MHZ: u16 = 5999;

/// Power levels shipped in the fixed v1.0/v2.0 table
pub const SA_DEFAULT_POWER_COUNT: u8 = 4;

/// Upper bound on power levels a v2.1 device may report
pub const SA_MAX_POWER_COUNT: u8 = 8;

/// In a SET_POWER payload on v2.1, the MSB selects set-by-dBm
pub const SA_POWER_BY_DBM_FLAG: u8 = 0x80;

/// Protocol sub-version self-reported by the settings response
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SaVersion {
    #[default]
    Unknown,
    V1_0,
    V2_0,
    V2_1,
}

/// One entry of the index-to-power mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaPowerLevel {
    pub mw: u16,
    pub dbm: u8,
}

/// The fixed v1.0/v2.0 power table (25/200/500/800 mW)
pub const SA_DEFAULT_POWER_TABLE: [SaPowerLevel; SA_DEFAULT_POWER_COUNT as usize] = [
    SaPowerLevel { mw: 25, dbm: 7 },
    SaPowerLevel { mw: 200, dbm: 16 },
    SaPowerLevel { mw: 500, dbm: 25 },
    SaPowerLevel { mw: 800, dbm: 40 },
];

/// Statistical counters for user-side troubleshooting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaStats {
    pub packets_sent: u32,
    pub packets_received: u32,
    pub bad_preamble: u32,
    pub bad_length: u32,
    pub bad_crc: u32,
    pub out_of_order: u32,
    pub bad_code: u32,
}

/// A reassembled inbound frame: response code plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaFrame {
    pub code: u8,
    pub payload: Vec<u8>,
}

/// Build a complete command frame.
///
/// The trailing CRC covers the whole frame including the preamble; this is
/// what devices in the field expect, even though they validate inbound
/// responses without the preamble.
pub fn make_command_frame(opcode: u8, payload: &[u8]) -> Bytes {
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.push(SA_PREAMBLE_1);
    frame.push(SA_PREAMBLE_2);
    frame.push((opcode << 1) | 1);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(crc8(&frame));
    Bytes::from(frame)
}

/// Convert a device-reported dBm value to milliwatts for display.
///
/// Plain `10^(dbm/10)` rounded to the nearest milliwatt; values above one
/// watt are additionally rounded to the nearest 50 mW to match the labels
/// printed on the hardware.
pub fn dbm_to_mw(dbm: u8) -> u16 {
    let mw = 10f64.powf(f64::from(dbm) / 10.0).round() as u32;
    let mw = if mw > 1000 { 50 * ((mw + 25) / 50) } else { mw };
    mw.min(u32::from(u16::MAX)) as u16
}

/// Map a v1.0 DAC power reading to a 1-origin table index: the highest level
/// whose dBm value does not exceed the reading, defaulting to the lowest.
pub fn dac_to_power_index(dac: u8, table: &[SaPowerLevel], count: u8) -> u8 {
    let count = (count as usize).min(table.len());
    for idx in (1..=count).rev() {
        if table[idx - 1].dbm <= dac {
            return idx as u8;
        }
    }
    1
}
