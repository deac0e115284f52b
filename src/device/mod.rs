//! # VTX Device Abstraction
//!
//! The hardware-independent view of a video transmitter.
//!
//! This module handles:
//! - The [`VtxBackend`] trait that both protocol backends implement
//! - The capability record (band/channel/power counts and name tables)
//! - The [`VtxDevice`] registry holding the single active backend
//!
//! Everything above the protocol layer (the reconciler, an OSD/menu layer)
//! talks only to [`VtxDevice`]; no caller ever reaches a backend directly.

pub mod tables;

use tracing::warn;

/// Immutable-per-backend capability record.
///
/// Index-valued fields elsewhere (band, channel, power index) lie in
/// `[0, count]`, where 0 conventionally means "undefined" for band and power.
/// The power table may be regenerated at runtime when a SmartAudio 2.1 device
/// reports its own dBm levels.
#[derive(Debug, Clone)]
pub struct VtxCapability {
    pub band_count: u8,
    pub channel_count: u8,
    pub power_count: u8,
    /// Band names, index 0 = undefined
    pub band_names: Vec<String>,
    /// Channel names, index 0 = undefined
    pub channel_names: Vec<String>,
    /// Power level names, index 0 = undefined
    pub power_names: Vec<String>,
}

/// Aggregate of everything an OSD needs to render the VTX status line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsdInfo {
    pub band: u8,
    pub channel: u8,
    pub frequency_mhz: u16,
    pub power_index: u8,
    pub power_mw: u16,
    pub band_letter: char,
    pub power_index_letter: char,
}

/// Which vendor protocol a backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VtxKind {
    SmartAudio,
    Tramp,
}

/// Operation set shared by all protocol backends.
///
/// No operation blocks and none returns an error: setters are no-ops when the
/// device is not ready or the value is outside the reported capability, and
/// getters return `None` until detection has completed. Callers observe the
/// effect of a setter by re-reading actual state on a later tick.
pub trait VtxBackend: Send {
    fn kind(&self) -> VtxKind;

    fn capability(&self) -> &VtxCapability;

    /// True once device detection has completed
    fn is_ready(&self) -> bool;

    /// Request a 1-origin band/channel pair
    fn set_band_channel(&mut self, band: u8, channel: u8);

    /// Request a direct frequency (used when the configured band is 0)
    fn set_frequency_mhz(&mut self, freq_mhz: u16);

    /// Request a 1-origin power index
    fn set_power_index(&mut self, index: u8);

    /// Request pit mode on/off
    fn set_pit_mode(&mut self, on: bool);

    /// Last-known band/channel; band 0 when the device is in direct-frequency
    /// mode
    fn band_channel(&self) -> Option<(u8, u8)>;

    /// Last-known power index (1-origin, 0 = unknown)
    fn power_index(&self) -> Option<u8>;

    /// Last-known pit mode state
    fn pit_mode(&self) -> Option<bool>;

    /// Last-known frequency in MHz
    fn frequency_mhz(&self) -> Option<u16>;

    /// Last-known power as (index, milliwatts)
    fn power(&self) -> Option<(u8, u16)>;

    /// Milliwatt value of a 1-origin power index in this backend's table
    fn power_mw_for_index(&self, index: u8) -> Option<u16>;

    /// Advance the protocol state machine by one cooperative step
    fn tick(&mut self, now_ms: u64);

    /// Combined OSD-ready snapshot
    fn osd_info(&self) -> Option<OsdInfo> {
        let (band, channel) = self.band_channel()?;
        let frequency_mhz = self.frequency_mhz()?;
        let (power_index, power_mw) = self.power()?;

        let band_letter = tables::BAND_LETTERS
            .get(band as usize)
            .copied()
            .unwrap_or('-');
        let power_index_letter =
            char::from_digit(u32::from(power_index) % 10, 10).unwrap_or('-');

        Some(OsdInfo {
            band,
            channel,
            frequency_mhz,
            power_index,
            power_mw,
            band_letter,
            power_index_letter,
        })
    }
}

/// Registry for the single active backend.
///
/// A backend registers exactly once after successful hardware detection at
/// startup; every operation delegates to it, or reports absence (`None`,
/// `false`, no-op) while nothing is registered.
#[derive(Default)]
pub struct VtxDevice {
    backend: Option<Box<dyn VtxBackend>>,
}

impl VtxDevice {
    pub fn new() -> Self {
        Self { backend: None }
    }

    /// Register the detected backend. A second registration is refused; the
    /// active device never changes after startup.
    pub fn register(&mut self, backend: Box<dyn VtxBackend>) {
        if self.backend.is_some() {
            warn!("VTX device already registered; ignoring second registration");
            return;
        }
        self.backend = Some(backend);
    }

    pub fn is_registered(&self) -> bool {
        self.backend.is_some()
    }

    pub fn kind(&self) -> Option<VtxKind> {
        self.backend.as_ref().map(|b| b.kind())
    }

    pub fn capability(&self) -> Option<&VtxCapability> {
        self.backend.as_ref().map(|b| b.capability())
    }

    pub fn is_ready(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.is_ready())
    }

    pub fn set_band_channel(&mut self, band: u8, channel: u8) {
        if let Some(backend) = self.backend.as_mut() {
            backend.set_band_channel(band, channel);
        }
    }

    pub fn set_frequency_mhz(&mut self, freq_mhz: u16) {
        if let Some(backend) = self.backend.as_mut() {
            backend.set_frequency_mhz(freq_mhz);
        }
    }

    pub fn set_power_index(&mut self, index: u8) {
        if let Some(backend) = self.backend.as_mut() {
            backend.set_power_index(index);
        }
    }

    pub fn set_pit_mode(&mut self, on: bool) {
        if let Some(backend) = self.backend.as_mut() {
            backend.set_pit_mode(on);
        }
    }

    pub fn band_channel(&self) -> Option<(u8, u8)> {
        self.backend.as_ref().and_then(|b| b.band_channel())
    }

    pub fn power_index(&self) -> Option<u8> {
        self.backend.as_ref().and_then(|b| b.power_index())
    }

    pub fn pit_mode(&self) -> Option<bool> {
        self.backend.as_ref().and_then(|b| b.pit_mode())
    }

    pub fn frequency_mhz(&self) -> Option<u16> {
        self.backend.as_ref().and_then(|b| b.frequency_mhz())
    }

    pub fn power(&self) -> Option<(u8, u16)> {
        self.backend.as_ref().and_then(|b| b.power())
    }

    pub fn power_mw_for_index(&self, index: u8) -> Option<u16> {
        self.backend.as_ref().and_then(|b| b.power_mw_for_index(index))
    }

    pub fn osd_info(&self) -> Option<OsdInfo> {
        self.backend.as_ref().and_then(|b| b.osd_info())
    }

    pub fn tick(&mut self, now_ms: u64) {
        if let Some(backend) = self.backend.as_mut() {
            backend.tick(now_ms);
        }
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;

    /// Scriptable backend for registry/reconciler tests.
    ///
    /// Records every setter call so a test can assert exactly which corrective
    /// commands the reconciler issued.
    pub struct FakeBackend {
        pub capability: VtxCapability,
        pub ready: bool,
        pub band_channel: Option<(u8, u8)>,
        pub power_index: Option<u8>,
        pub pit_mode: Option<bool>,
        pub frequency_mhz: Option<u16>,
        pub power_table_mw: Vec<u16>,
        pub set_calls: Vec<String>,
        pub ticks: Vec<u64>,
    }

    impl FakeBackend {
        pub fn new() -> Self {
            Self {
                capability: VtxCapability {
                    band_count: tables::VTX_BAND_COUNT,
                    channel_count: tables::VTX_CHANNEL_COUNT,
                    power_count: 4,
                    band_names: tables::BAND_NAMES.iter().map(|s| s.to_string()).collect(),
                    channel_names: tables::CHANNEL_NAMES.iter().map(|s| s.to_string()).collect(),
                    power_names: vec!["----", "25", "200", "500", "800"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                },
                ready: true,
                band_channel: Some((4, 1)),
                power_index: Some(1),
                pit_mode: Some(false),
                frequency_mhz: Some(5740),
                power_table_mw: vec![25, 200, 500, 800],
                set_calls: Vec::new(),
                ticks: Vec::new(),
            }
        }
    }

    impl VtxBackend for FakeBackend {
        fn kind(&self) -> VtxKind {
            VtxKind::SmartAudio
        }

        fn capability(&self) -> &VtxCapability {
            &self.capability
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        fn set_band_channel(&mut self, band: u8, channel: u8) {
            self.set_calls.push(format!("band_channel({},{})", band, channel));
            self.band_channel = Some((band, channel));
            if let Some(freq) = tables::band_channel_to_freq(band, channel) {
                self.frequency_mhz = Some(freq);
            }
        }

        fn set_frequency_mhz(&mut self, freq_mhz: u16) {
            self.set_calls.push(format!("frequency({})", freq_mhz));
            self.frequency_mhz = Some(freq_mhz);
        }

        fn set_power_index(&mut self, index: u8) {
            self.set_calls.push(format!("power({})", index));
            self.power_index = Some(index);
        }

        fn set_pit_mode(&mut self, on: bool) {
            self.set_calls.push(format!("pit({})", on));
            self.pit_mode = Some(on);
        }

        fn band_channel(&self) -> Option<(u8, u8)> {
            self.band_channel
        }

        fn power_index(&self) -> Option<u8> {
            self.power_index
        }

        fn pit_mode(&self) -> Option<bool> {
            self.pit_mode
        }

        fn frequency_mhz(&self) -> Option<u16> {
            self.frequency_mhz
        }

        fn power(&self) -> Option<(u8, u16)> {
            let index = self.power_index?;
            let mw = self.power_mw_for_index(index).unwrap_or(0);
            Some((index, mw))
        }

        fn power_mw_for_index(&self, index: u8) -> Option<u16> {
            if index == 0 {
                return None;
            }
            self.power_table_mw.get(index as usize - 1).copied()
        }

        fn tick(&mut self, now_ms: u64) {
            self.ticks.push(now_ms);
        }
    }
}
