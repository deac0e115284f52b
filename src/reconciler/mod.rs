//! # Reconciliation Engine
//!
//! Drives the device toward its desired configuration. On each update the
//! desired settings are recomputed from the static configuration and the
//! current flight state, one divergent parameter is corrected, and the
//! backend is ticked. Parameters are visited round-robin so a stream of
//! corrections for one (a device that refuses a value, say) cannot starve
//! the others.
//!
//! Corrections are issued only against known-divergent actual state; an
//! unconfirmed parameter is left alone until the device reports it.

pub mod autopower;

use tracing::{debug, info};

use crate::config::{AutoPowerConfig, LowPowerDisarm, VtxConfig};
use crate::device::VtxDevice;
use autopower::AutoPower;

/// Flight-controller facts consumed by reconciliation
#[derive(Debug, Clone, Copy, Default)]
pub struct FlightState {
    pub armed: bool,
    /// Armed at least once since boot
    pub ever_armed: bool,
    pub failsafe: bool,
    pub pit_mode_requested: bool,
    pub gps_fix: bool,
    pub distance_to_home_m: u32,
}

/// Settings the device should converge to right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// 1-origin band, 0 for direct frequency control
    pub band: u8,
    pub channel: u8,
    pub power_index: u8,
    /// Target frequency, authoritative only when band is 0
    pub freq_mhz: u16,
    pub pit_mode: bool,
}

/// One reconciled parameter per update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Power,
    BandChannel,
    PitMode,
}

impl Step {
    fn next(self) -> Self {
        match self {
            Step::Power => Step::BandChannel,
            Step::BandChannel => Step::PitMode,
            Step::PitMode => Step::Power,
        }
    }
}

/// Converges the device onto the desired settings, one parameter at a time
pub struct Reconciler {
    vtx: VtxConfig,
    auto_power: AutoPowerConfig,
    selector: AutoPower,
    step: Step,
}

impl Reconciler {
    pub fn new(vtx: VtxConfig, auto_power: AutoPowerConfig) -> Self {
        Self {
            vtx,
            auto_power,
            selector: AutoPower::new(),
            step: Step::Power,
        }
    }

    /// Change the target band/channel at runtime
    pub fn set_band_channel(&mut self, band: u8, channel: u8) {
        self.vtx.band = band;
        self.vtx.channel = channel;
    }

    /// Change the target direct frequency at runtime (with band 0)
    pub fn set_frequency_mhz(&mut self, freq_mhz: u16) {
        self.vtx.freq = freq_mhz;
    }

    /// Change the target power index at runtime
    pub fn set_power_index(&mut self, index: u8) {
        self.vtx.power = index;
    }

    /// Compute the currently-desired settings from configuration and flight
    /// state. Precedence for power: disarm override, then automatic
    /// selection, then the configured index; the regulatory cap bounds all
    /// three.
    pub fn runtime_settings(&mut self, device: &VtxDevice, flight: &FlightState) -> RuntimeSettings {
        let mut power = self.vtx.power;

        let disarm_override = match self.vtx.low_power_disarm {
            LowPowerDisarm::Off => false,
            LowPowerDisarm::Always => !flight.armed,
            LowPowerDisarm::UntilFirstArm => !flight.armed && !flight.ever_armed,
        };

        // Failsafe means a possibly-lost quad; full power helps recovery
        if disarm_override && !flight.failsafe {
            power = 1;
        } else if self.auto_power.enabled && flight.gps_fix {
            let count = device.capability().map_or(0, |c| c.power_count);
            let table: Vec<u16> = (1..=count)
                .filter_map(|i| device.power_mw_for_index(i))
                .collect();
            if !table.is_empty() {
                let current = device
                    .power_index()
                    .filter(|&i| i > 0)
                    .unwrap_or(power);
                power = self.selector.evaluate(
                    flight.distance_to_home_m,
                    current,
                    &table,
                    self.auto_power.reference_distance_m,
                );
            }
        }

        if self.vtx.max_power_override_mw > 0 {
            while power > 1 {
                match device.power_mw_for_index(power) {
                    Some(mw) if mw > self.vtx.max_power_override_mw => power -= 1,
                    _ => break,
                }
            }
        }

        let pit_mode = flight.pit_mode_requested;
        let channel = if pit_mode {
            self.vtx.pit_mode_channel
        } else {
            self.vtx.channel
        };

        RuntimeSettings {
            band: self.vtx.band,
            channel,
            power_index: power,
            freq_mhz: self.vtx.freq,
            pit_mode,
        }
    }

    /// One reconciliation pass: correct at most one divergent parameter,
    /// then tick the device
    pub fn update(&mut self, device: &mut VtxDevice, flight: &FlightState, now_ms: u64) {
        if !device.is_ready() {
            device.tick(now_ms);
            return;
        }

        let desired = self.runtime_settings(device, flight);

        match self.step {
            Step::Power => {
                if let Some(actual) = device.power_index() {
                    if actual != desired.power_index {
                        info!(
                            "reconciling power: index {} -> {}",
                            actual, desired.power_index
                        );
                        device.set_power_index(desired.power_index);
                    }
                }
            }

            Step::BandChannel => {
                if desired.band == 0 {
                    if let Some(actual) = device.frequency_mhz() {
                        if actual != desired.freq_mhz {
                            info!(
                                "reconciling frequency: {} -> {} MHz",
                                actual, desired.freq_mhz
                            );
                            device.set_frequency_mhz(desired.freq_mhz);
                        }
                    }
                } else if let Some((band, channel)) = device.band_channel() {
                    if (band, channel) != (desired.band, desired.channel) {
                        info!(
                            "reconciling channel: {}:{} -> {}:{}",
                            band, channel, desired.band, desired.channel
                        );
                        device.set_band_channel(desired.band, desired.channel);
                    }
                }
            }

            Step::PitMode => {
                if let Some(actual) = device.pit_mode() {
                    if actual != desired.pit_mode {
                        debug!("reconciling pit mode: {} -> {}", actual, desired.pit_mode);
                        device.set_pit_mode(desired.pit_mode);
                    }
                }
            }
        }

        self.step = self.step.next();
        device.tick(now_ms);
    }
}
