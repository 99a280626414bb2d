//! Staleness-bounded cache of device state.
//!
//! The supply's registers fall into subgroups that change at very different
//! rates: output readings move every refresh, protection thresholds only when
//! an operator edits them. Each subgroup is cached behind its own [`Group`]
//! with an independent timestamp, so refreshing one never touches another and
//! a failure in one leaves every other subgroup's data and freshness intact.
//!
//! A group commits value and timestamp together, only after every register
//! read in its refresh sequence succeeded. Consumers therefore never observe
//! a torn multi-register value, and a group that has never been successfully
//! read reports itself as unset rather than presenting default zeros as
//! measurements.

/// Default staleness window shared by all subgroups: 5 seconds.
pub const DEFAULT_CACHE_TIMEOUT_US: u64 = 5_000_000;

/// One independently timestamped cache subgroup.
///
/// Lifecycle: unset (no timestamp) -> valid -> stale (timestamp older than the
/// timeout) -> valid again after a successful refresh. There is no error
/// state; a failed refresh simply leaves the previous value and timestamp in
/// place.
#[derive(Debug, Clone, Copy, Default)]
pub struct Group<T> {
    value: T,
    updated_at: Option<u64>,
}

impl<T> Group<T> {
    /// The stored value, whatever its age. Zero-cost view for the cached
    /// getter family.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Whether a refresh has ever succeeded.
    pub fn is_set(&self) -> bool {
        self.updated_at.is_some()
    }

    /// Timestamp of the last successful refresh, microseconds.
    pub fn updated_at(&self) -> Option<u64> {
        self.updated_at
    }

    /// True when the group was refreshed within `timeout_us` of `now_us`.
    pub fn is_fresh(&self, now_us: u64, timeout_us: u64) -> bool {
        match self.updated_at {
            Some(at) => now_us.saturating_sub(at) < timeout_us,
            None => false,
        }
    }

    /// Commit a fully staged value, advancing the timestamp.
    pub fn store(&mut self, value: T, now_us: u64) {
        self.value = value;
        self.updated_at = Some(now_us);
    }

    /// Patch individual fields without advancing the timestamp. Used for the
    /// optimistic write-through after a successful register write: the new
    /// value becomes visible immediately, but the group still ages toward its
    /// next full refresh.
    pub fn patch(&mut self, apply: impl FnOnce(&mut T)) {
        apply(&mut self.value);
    }
}

/// Live output measurements, read as one 4-register block.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutputReadings {
    /// Measured output voltage in volts.
    pub voltage: f32,
    /// Measured output current in amps.
    pub current: f32,
    /// Measured output power in watts.
    pub power: f32,
    /// Supply input voltage in volts.
    pub input_voltage: f32,
}

/// Operator-adjustable panel settings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PanelSettings {
    /// Voltage setpoint in volts.
    pub set_voltage: f32,
    /// Current limit setpoint in amps.
    pub set_current: f32,
    /// Backlight brightness, 0-5.
    pub backlight_level: u8,
    /// Screen sleep timeout in minutes.
    pub sleep_timeout: u8,
}

/// Accumulated energy counters and output run time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnergyMeters {
    /// Delivered charge in mAh.
    pub amp_hours: u32,
    /// Delivered energy in mWh.
    pub watt_hours: u32,
    /// Seconds the output has been enabled.
    pub output_seconds: u32,
}

/// Internal and external probe temperatures, in the panel's configured unit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Temperatures {
    pub internal: f32,
    pub external: f32,
}

/// Switch states and status words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub output_enabled: bool,
    pub key_locked: bool,
    /// Raw protection status register; `0` means nothing triggered.
    pub protection_status: u16,
    /// Raw CC/CV register; `1` constant-current, `0` constant-voltage.
    pub cvcc_mode: u16,
    pub system_status: u16,
}

/// All status subgroups of one supply.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCache {
    pub output: Group<OutputReadings>,
    pub settings: Group<PanelSettings>,
    pub energy: Group<EnergyMeters>,
    pub temperatures: Group<Temperatures>,
    pub state: Group<DeviceState>,
}

/// Constant-voltage / constant-current targets.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConstantVc {
    /// CV target in volts.
    pub voltage: f32,
    /// CC target in amps.
    pub current: f32,
}

/// Voltage and current protection thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoltageCurrentProtection {
    /// LVP: input under-voltage threshold in volts.
    pub under_voltage: f32,
    /// OVP: output over-voltage threshold in volts.
    pub over_voltage: f32,
    /// OCP: output over-current threshold in amps.
    pub over_current: f32,
}

/// Over-power threshold and the high-power cutoff time pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerProtection {
    /// OPP threshold in watts.
    pub over_power: f32,
    pub high_power_hours: u16,
    pub high_power_minutes: u16,
}

/// Amp-hour and watt-hour limits, each a low/high 16-bit register pair
/// forming one 32-bit value on the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnergyProtection {
    pub over_amp_hours_low: u16,
    pub over_amp_hours_high: u16,
    pub over_watt_hours_low: u16,
    pub over_watt_hours_high: u16,
}

/// Over-temperature threshold, in the panel's configured unit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TemperatureProtection {
    pub over_temperature: f32,
}

/// Power-on behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupSetting {
    pub output_on_at_startup: bool,
}

/// Temperature sensor calibration offsets, in the panel's configured unit.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TempCalibration {
    pub internal_offset: f32,
    pub external_offset: f32,
}

/// All protection and setting subgroups of one supply.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtectionCache {
    pub constant_vc: Group<ConstantVc>,
    pub voltage_current: Group<VoltageCurrentProtection>,
    pub power: Group<PowerProtection>,
    pub energy: Group<EnergyProtection>,
    pub temperature: Group<TemperatureProtection>,
    pub startup: Group<StartupSetting>,
    pub calibration: Group<TempCalibration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_starts_unset() {
        let group: Group<OutputReadings> = Group::default();
        assert!(!group.is_set());
        assert!(!group.is_fresh(0, DEFAULT_CACHE_TIMEOUT_US));
        assert_eq!(*group.get(), OutputReadings::default());
    }

    #[test]
    fn group_freshness_window() {
        let mut group: Group<EnergyMeters> = Group::default();
        group.store(
            EnergyMeters {
                amp_hours: 12,
                watt_hours: 34,
                output_seconds: 56,
            },
            1_000_000,
        );
        assert!(group.is_set());
        assert!(group.is_fresh(1_000_001, DEFAULT_CACHE_TIMEOUT_US));
        assert!(group.is_fresh(5_999_999, DEFAULT_CACHE_TIMEOUT_US));
        // Exactly at the window edge the group counts as stale.
        assert!(!group.is_fresh(6_000_000, DEFAULT_CACHE_TIMEOUT_US));
    }

    #[test]
    fn patch_keeps_timestamp() {
        let mut group: Group<PanelSettings> = Group::default();
        group.store(PanelSettings::default(), 500);
        group.patch(|s| s.set_voltage = 12.34);
        assert_eq!(group.get().set_voltage, 12.34);
        assert_eq!(group.updated_at(), Some(500));

        // Patching an unset group makes the value visible without marking the
        // group as ever refreshed.
        let mut unset: Group<PanelSettings> = Group::default();
        unset.patch(|s| s.set_current = 1.5);
        assert_eq!(unset.get().set_current, 1.5);
        assert!(!unset.is_set());
    }
}
