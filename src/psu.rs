//! High-level driver for the XY-SKxxx supplies.
//!
//! [`SkPsu`] layers three concerns over the raw bus:
//!
//! * a bounded retry policy for direct reads and register writes,
//! * composite operations that pair related writes and retry only the half
//!   that failed,
//! * the per-subgroup state cache, refreshed atomically and aged by the
//!   configured staleness window.
//!
//! Setters take physical units (volts, amps, watts, degrees) and do the
//! fixed-point conversion at this boundary; raw `u16` values never leak to
//! callers.

use crate::bus::RtuBus;
use crate::cache::{
    ConstantVc, DeviceState, EnergyMeters, EnergyProtection, OutputReadings, PanelSettings,
    PowerProtection, ProtectionCache, StartupSetting, StatusCache, TempCalibration,
    TemperatureProtection, Temperatures, VoltageCurrentProtection, DEFAULT_CACHE_TIMEOUT_US,
};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::registers::Register;
use crate::types::{BaudRate, ControlMode, ProtectionAlarm, State, TemperatureUnit};

/// Attempts for direct reads and single-register writes: one initial try and
/// two retries.
const BUS_ATTEMPTS: u32 = 3;

/// Driver configuration.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Modbus slave address, 1-247.
    pub unit_id: u8,
    /// Serial baud rate; drives the enforced inter-frame interval.
    pub baud_rate: BaudRate,
    /// Cache staleness window in microseconds.
    pub cache_timeout_us: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unit_id: 0x01,
            baud_rate: BaudRate::default(),
            cache_timeout_us: DEFAULT_CACHE_TIMEOUT_US,
        }
    }
}

/// Driver for one supply on a half-duplex RTU link.
pub struct SkPsu<S, C, const L: usize = 64>
where
    S: embedded_io::Read + embedded_io::Write,
    C: Clock,
{
    bus: RtuBus<S, C, L>,
    status: StatusCache,
    protection: ProtectionCache,
    cache_timeout_us: u64,
    /// Whether the most recent bulk refresh updated every subgroup it covered.
    cache_valid: bool,
}

impl<S, C, const L: usize> SkPsu<S, C, L>
where
    S: embedded_io::Read + embedded_io::Write,
    C: Clock,
{
    /// Build a driver over the given transport and clock.
    ///
    /// Rejects unit ids outside the Modbus slave range 1-247.
    pub fn new(serial: S, clock: C, config: Config) -> Result<Self, S::Error> {
        if !(1..=247).contains(&config.unit_id) {
            return Err(Error::OutOfRange);
        }
        Ok(Self {
            bus: RtuBus::new(serial, clock, config.unit_id, config.baud_rate.bps()),
            status: StatusCache::default(),
            protection: ProtectionCache::default(),
            cache_timeout_us: config.cache_timeout_us,
            cache_valid: false,
        })
    }

    pub fn transport(&self) -> &S {
        self.bus.transport()
    }

    pub fn transport_mut(&mut self) -> &mut S {
        self.bus.transport_mut()
    }

    pub fn cache_timeout_us(&self) -> u64 {
        self.cache_timeout_us
    }

    pub fn set_cache_timeout_us(&mut self, timeout_us: u64) {
        self.cache_timeout_us = timeout_us;
    }

    /// Last committed status snapshot, without touching the bus.
    pub fn status_cache(&self) -> &StatusCache {
        &self.status
    }

    /// Last committed protection snapshot, without touching the bus.
    pub fn protection_cache(&self) -> &ProtectionCache {
        &self.protection
    }

    /// True when the most recent bulk refresh committed every subgroup.
    pub fn cache_valid(&self) -> bool {
        self.cache_valid
    }

    // --- retry primitives ---------------------------------------------------

    fn write_with_retry(&mut self, register: Register, raw: u16) -> Result<(), S::Error> {
        let mut attempt = 1;
        loop {
            match self.bus.write_single(register.address(), raw) {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= BUS_ATTEMPTS => return Err(e),
                Err(_) => {
                    attempt += 1;
                    self.bus.delay_intervals(2);
                }
            }
        }
    }

    fn read_block_with_retry(&mut self, start: Register, dst: &mut [u16]) -> Result<(), S::Error> {
        let mut attempt = 1;
        loop {
            match self.bus.read_holdings(start.address(), dst) {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= BUS_ATTEMPTS => return Err(e),
                Err(_) => {
                    attempt += 1;
                    self.bus.delay_intervals(2);
                }
            }
        }
    }

    fn read_with_retry(&mut self, register: Register) -> Result<u16, S::Error> {
        let mut word = [0u16; 1];
        self.read_block_with_retry(register, &mut word)?;
        Ok(word[0])
    }

    // --- direct reads -------------------------------------------------------

    /// Product model number. The XY-SK120 reports `22873`.
    pub fn read_model(&mut self) -> Result<u16, S::Error> {
        self.read_with_retry(Register::Model)
    }

    /// Firmware version number.
    pub fn read_version(&mut self) -> Result<u16, S::Error> {
        self.read_with_retry(Register::Version)
    }

    /// True when the device answers and reports a nonzero model number.
    ///
    /// A zero model means something answered on the bus that is not one of
    /// these supplies, so it counts as not connected.
    pub fn test_connection(&mut self) -> bool {
        matches!(self.read_model(), Ok(model) if model != 0)
    }

    /// Output voltage, current and power in one bus transaction.
    pub fn read_output(&mut self) -> Result<(f32, f32, f32), S::Error> {
        let mut block = [0u16; 3];
        self.read_block_with_retry(Register::VOut, &mut block)?;
        Ok((
            Register::VOut.decode(block[0]),
            Register::IOut.decode(block[1]),
            Register::Power.decode(block[2]),
        ))
    }

    /// Output readings plus an on-state flag.
    ///
    /// The on-state is derived from the power reading: the display register
    /// shows exact zero power whenever the output relay is open.
    pub fn output_status(&mut self) -> Result<(f32, f32, f32, bool), S::Error> {
        let (voltage, current, power) = self.read_output()?;
        Ok((voltage, current, power, power > 0.0))
    }

    /// Supply input voltage in volts.
    pub fn read_input_voltage(&mut self) -> Result<f32, S::Error> {
        let raw = self.read_with_retry(Register::UIn)?;
        Ok(Register::UIn.decode(raw))
    }

    /// Delivered charge in mAh.
    pub fn read_amp_hours(&mut self) -> Result<u32, S::Error> {
        let mut pair = [0u16; 2];
        self.read_block_with_retry(Register::AhLow, &mut pair)?;
        Ok(u32::from(pair[0]) | u32::from(pair[1]) << 16)
    }

    /// Delivered energy in mWh.
    pub fn read_watt_hours(&mut self) -> Result<u32, S::Error> {
        let mut pair = [0u16; 2];
        self.read_block_with_retry(Register::WhLow, &mut pair)?;
        Ok(u32::from(pair[0]) | u32::from(pair[1]) << 16)
    }

    /// Output-enabled time as (hours, minutes, seconds).
    pub fn read_output_time(&mut self) -> Result<(u16, u16, u16), S::Error> {
        let mut block = [0u16; 3];
        self.read_block_with_retry(Register::OutH, &mut block)?;
        Ok((block[0], block[1], block[2]))
    }

    /// Internal temperature, in the panel's configured unit.
    pub fn read_internal_temperature(&mut self) -> Result<f32, S::Error> {
        let raw = self.read_with_retry(Register::TIn)?;
        Ok(Register::TIn.decode(raw))
    }

    /// External probe temperature, in the panel's configured unit.
    pub fn read_external_temperature(&mut self) -> Result<f32, S::Error> {
        let raw = self.read_with_retry(Register::TEx)?;
        Ok(Register::TEx.decode(raw))
    }

    /// Active protection alarm, if any.
    pub fn read_protection_status(&mut self) -> Result<ProtectionAlarm, S::Error> {
        let raw = self.read_with_retry(Register::Protect)?;
        Ok(ProtectionAlarm::from(raw))
    }

    /// Current regulation mode.
    pub fn read_control_mode(&mut self) -> Result<ControlMode, S::Error> {
        let raw = self.read_with_retry(Register::CvCc)?;
        Ok(ControlMode::from(raw))
    }

    /// Raw system status word.
    pub fn read_system_status(&mut self) -> Result<u16, S::Error> {
        self.read_with_retry(Register::SysStatus)
    }

    /// Configured slave address as stored on the device.
    pub fn read_slave_address(&mut self) -> Result<u8, S::Error> {
        let raw = self.read_with_retry(Register::SlaveAddr)?;
        Ok(raw as u8)
    }

    /// Configured baud rate code.
    pub fn read_baud_rate(&mut self) -> Result<BaudRate, S::Error> {
        let raw = self.read_with_retry(Register::BaudRate)?;
        BaudRate::try_from(raw).map_err(|_| Error::InvalidResponse)
    }

    /// Buzzer switch state.
    pub fn read_buzzer(&mut self) -> Result<bool, S::Error> {
        let raw = self.read_with_retry(Register::Buzzer)?;
        Ok(raw != 0)
    }

    /// Currently selected data group, 0-9.
    pub fn read_selected_data_group(&mut self) -> Result<u8, S::Error> {
        let raw = self.read_with_retry(Register::ExtractM)?;
        Ok(raw as u8)
    }

    /// Panel temperature unit.
    pub fn read_temperature_unit(&mut self) -> Result<TemperatureUnit, S::Error> {
        let raw = self.read_with_retry(Register::FC)?;
        TemperatureUnit::try_from(raw).map_err(|_| Error::InvalidResponse)
    }

    // --- setters ------------------------------------------------------------

    /// Set the voltage setpoint in volts.
    pub fn set_voltage(&mut self, volts: f32) -> Result<(), S::Error> {
        let raw = Register::VSet.encode(volts)?;
        self.write_with_retry(Register::VSet, raw)?;
        self.status.settings.patch(|s| s.set_voltage = volts);
        Ok(())
    }

    /// Set the current limit in amps.
    pub fn set_current(&mut self, amps: f32) -> Result<(), S::Error> {
        let raw = Register::ISet.encode(amps)?;
        self.write_with_retry(Register::ISet, raw)?;
        self.status.settings.patch(|s| s.set_current = amps);
        Ok(())
    }

    /// Switch the output, with the standard write retry policy.
    ///
    /// [`SkPsu::turn_output_on`] and [`SkPsu::turn_output_off`] are the
    /// gentler variant that retries a failure only once.
    pub fn set_output_state(&mut self, on: bool) -> Result<(), S::Error> {
        self.write_with_retry(Register::OnOff, u16::from(State::from(on)))?;
        self.status.state.patch(|s| s.output_enabled = on);
        Ok(())
    }

    /// Lock or unlock the front-panel keys.
    pub fn set_key_lock(&mut self, locked: bool) -> Result<(), S::Error> {
        self.write_with_retry(Register::Lock, u16::from(State::from(locked)))?;
        self.status.state.patch(|s| s.key_locked = locked);
        Ok(())
    }

    /// Backlight brightness, 0 (darkest) to 5 (brightest).
    pub fn set_backlight_brightness(&mut self, level: u8) -> Result<(), S::Error> {
        if level > 5 {
            return Err(Error::OutOfRange);
        }
        self.write_with_retry(Register::BLed, u16::from(level))?;
        self.status.settings.patch(|s| s.backlight_level = level);
        Ok(())
    }

    /// Screen sleep timeout in minutes; `0` keeps the screen always on.
    pub fn set_sleep_timeout(&mut self, minutes: u8) -> Result<(), S::Error> {
        self.write_with_retry(Register::Sleep, u16::from(minutes))?;
        self.status.settings.patch(|s| s.sleep_timeout = minutes);
        Ok(())
    }

    /// Change the device's Modbus slave address.
    ///
    /// On success the device answers at the new address immediately, so the
    /// bus is retargeted as part of the same call.
    pub fn set_slave_address(&mut self, address: u8) -> Result<(), S::Error> {
        if !(1..=247).contains(&address) {
            return Err(Error::OutOfRange);
        }
        self.write_with_retry(Register::SlaveAddr, u16::from(address))?;
        self.bus.set_unit_id(address);
        Ok(())
    }

    /// Change the device's baud rate.
    ///
    /// The new rate takes effect on the device side only; the host serial
    /// port (and this driver's inter-frame interval) must be reconfigured by
    /// reopening the link at the new rate.
    pub fn set_baud_rate(&mut self, baud: BaudRate) -> Result<(), S::Error> {
        self.write_with_retry(Register::BaudRate, u16::from(baud))
    }

    /// Internal temperature sensor calibration offset.
    pub fn set_internal_temp_calibration(&mut self, offset: f32) -> Result<(), S::Error> {
        let raw = Register::TInCal.encode(offset)?;
        self.write_with_retry(Register::TInCal, raw)?;
        self.protection.calibration.patch(|c| c.internal_offset = offset);
        Ok(())
    }

    /// External temperature sensor calibration offset.
    pub fn set_external_temp_calibration(&mut self, offset: f32) -> Result<(), S::Error> {
        let raw = Register::TExCal.encode(offset)?;
        self.write_with_retry(Register::TExCal, raw)?;
        self.protection.calibration.patch(|c| c.external_offset = offset);
        Ok(())
    }

    /// Buzzer on or off.
    pub fn set_buzzer(&mut self, on: bool) -> Result<(), S::Error> {
        self.write_with_retry(Register::Buzzer, u16::from(State::from(on)))
    }

    /// Recall one of the stored data groups, 0-9.
    pub fn select_data_group(&mut self, group: u8) -> Result<(), S::Error> {
        if group > 9 {
            return Err(Error::OutOfRange);
        }
        self.write_with_retry(Register::ExtractM, u16::from(group))
    }

    /// Panel temperature unit.
    pub fn set_temperature_unit(&mut self, unit: TemperatureUnit) -> Result<(), S::Error> {
        self.write_with_retry(Register::FC, unit as u16)
    }

    /// Clear a latched protection alarm by writing zero to the status
    /// register.
    pub fn clear_protection(&mut self) -> Result<(), S::Error> {
        self.write_with_retry(Register::Protect, 0)?;
        self.status.state.patch(|s| s.protection_status = 0);
        Ok(())
    }

    /// Raw system status word.
    pub fn set_system_status(&mut self, status: u16) -> Result<(), S::Error> {
        self.write_with_retry(Register::SysStatus, status)?;
        self.status.state.patch(|s| s.system_status = status);
        Ok(())
    }

    /// Constant-voltage target in volts.
    pub fn set_constant_voltage(&mut self, volts: f32) -> Result<(), S::Error> {
        let raw = Register::CvSet.encode(volts)?;
        self.write_with_retry(Register::CvSet, raw)?;
        self.protection.constant_vc.patch(|c| c.voltage = volts);
        Ok(())
    }

    /// Constant-current target in amps.
    pub fn set_constant_current(&mut self, amps: f32) -> Result<(), S::Error> {
        let raw = Register::CcSet.encode(amps)?;
        self.write_with_retry(Register::CcSet, raw)?;
        self.protection.constant_vc.patch(|c| c.current = amps);
        Ok(())
    }

    /// LVP: input under-voltage cutoff in volts.
    pub fn set_under_voltage_protection(&mut self, volts: f32) -> Result<(), S::Error> {
        let raw = Register::Vlp.encode(volts)?;
        self.write_with_retry(Register::Vlp, raw)?;
        self.protection.voltage_current.patch(|p| p.under_voltage = volts);
        Ok(())
    }

    /// OVP: output over-voltage cutoff in volts.
    pub fn set_over_voltage_protection(&mut self, volts: f32) -> Result<(), S::Error> {
        let raw = Register::Ovp.encode(volts)?;
        self.write_with_retry(Register::Ovp, raw)?;
        self.protection.voltage_current.patch(|p| p.over_voltage = volts);
        Ok(())
    }

    /// OCP: output over-current cutoff in amps.
    pub fn set_over_current_protection(&mut self, amps: f32) -> Result<(), S::Error> {
        let raw = Register::Ocp.encode(amps)?;
        self.write_with_retry(Register::Ocp, raw)?;
        self.protection.voltage_current.patch(|p| p.over_current = amps);
        Ok(())
    }

    /// OPP: output over-power cutoff in watts.
    pub fn set_over_power_protection(&mut self, watts: f32) -> Result<(), S::Error> {
        let raw = Register::Opp.encode(watts)?;
        self.write_with_retry(Register::Opp, raw)?;
        self.protection.power.patch(|p| p.over_power = watts);
        Ok(())
    }

    /// OTP: over-temperature cutoff, in the panel's configured unit.
    pub fn set_over_temperature_protection(&mut self, degrees: f32) -> Result<(), S::Error> {
        let raw = Register::Otp.encode(degrees)?;
        self.write_with_retry(Register::Otp, raw)?;
        self.protection.temperature.patch(|p| p.over_temperature = degrees);
        Ok(())
    }

    /// Whether the output comes up enabled at power-on.
    pub fn set_startup_output(&mut self, enabled: bool) -> Result<(), S::Error> {
        self.write_with_retry(Register::StartupOutput, u16::from(State::from(enabled)))?;
        self.protection.startup.patch(|p| p.output_on_at_startup = enabled);
        Ok(())
    }

    /// OHP: high-power cutoff time as an hours/minutes register pair.
    ///
    /// Both halves are always written; if either fails the call fails, but a
    /// succeeded half stays on the device. There is no rollback - the next
    /// cache refresh reads back whatever the device actually holds.
    pub fn set_high_power_protection_time(
        &mut self,
        hours: u16,
        minutes: u16,
    ) -> Result<(), S::Error> {
        self.bus.write_pair(
            (Register::OhpHours.address(), hours),
            (Register::OhpMinutes.address(), minutes),
        )?;
        self.protection.power.patch(|p| {
            p.high_power_hours = hours;
            p.high_power_minutes = minutes;
        });
        Ok(())
    }

    /// OAH: amp-hour limit as a raw low/high register pair.
    pub fn set_over_amp_hour_protection(&mut self, low: u16, high: u16) -> Result<(), S::Error> {
        self.bus.write_pair(
            (Register::OahLow.address(), low),
            (Register::OahHigh.address(), high),
        )?;
        self.protection.energy.patch(|p| {
            p.over_amp_hours_low = low;
            p.over_amp_hours_high = high;
        });
        Ok(())
    }

    /// OWH: watt-hour limit as a raw low/high register pair.
    pub fn set_over_watt_hour_protection(&mut self, low: u16, high: u16) -> Result<(), S::Error> {
        self.bus.write_pair(
            (Register::OwhLow.address(), low),
            (Register::OwhHigh.address(), high),
        )?;
        self.protection.energy.patch(|p| {
            p.over_watt_hours_low = low;
            p.over_watt_hours_high = high;
        });
        Ok(())
    }

    // --- composites ---------------------------------------------------------

    /// Set voltage and current together.
    ///
    /// Each register is written once; a failed half is retried exactly once
    /// after a settling delay, without re-writing the half that succeeded.
    pub fn set_voltage_and_current(&mut self, volts: f32, amps: f32) -> Result<(), S::Error> {
        let raw_v = Register::VSet.encode(volts)?;
        let raw_i = Register::ISet.encode(amps)?;

        let mut v_result = self.bus.write_single(Register::VSet.address(), raw_v);
        let mut i_result = self.bus.write_single(Register::ISet.address(), raw_i);

        if v_result.is_err() {
            self.bus.delay_intervals(3);
            v_result = self.bus.write_single(Register::VSet.address(), raw_v);
        }
        if i_result.is_err() {
            self.bus.delay_intervals(3);
            i_result = self.bus.write_single(Register::ISet.address(), raw_i);
        }
        v_result.and(i_result)?;

        self.status.settings.patch(|s| {
            s.set_voltage = volts;
            s.set_current = amps;
        });
        Ok(())
    }

    fn switch_output(&mut self, on: bool) -> Result<(), S::Error> {
        let raw = u16::from(State::from(on));
        let mut result = self.bus.write_single(Register::OnOff.address(), raw);
        if result.is_err() {
            self.bus.delay_intervals(3);
            result = self.bus.write_single(Register::OnOff.address(), raw);
        }
        result?;
        self.status.state.patch(|s| s.output_enabled = on);
        Ok(())
    }

    /// Enable the output. One retry after a settling delay.
    pub fn turn_output_on(&mut self) -> Result<(), S::Error> {
        self.switch_output(true)
    }

    /// Disable the output. One retry after a settling delay.
    pub fn turn_output_off(&mut self) -> Result<(), S::Error> {
        self.switch_output(false)
    }

    // --- cache refresh ------------------------------------------------------
    //
    // Refreshes stage every register of a subgroup locally and commit value
    // and timestamp together only when the whole sequence succeeded, so a
    // failure mid-sequence leaves the previous snapshot intact. Refreshes are
    // not retried; the next getter past the staleness window tries again.

    /// Refresh the live output readings unless still fresh.
    pub fn update_output_readings(&mut self, force: bool) -> Result<(), S::Error> {
        let now = self.bus.now_us();
        if !force && self.status.output.is_fresh(now, self.cache_timeout_us) {
            return Ok(());
        }
        let mut block = [0u16; 4];
        self.bus.read_holdings(Register::VOut.address(), &mut block)?;
        let staged = OutputReadings {
            voltage: Register::VOut.decode(block[0]),
            current: Register::IOut.decode(block[1]),
            power: Register::Power.decode(block[2]),
            input_voltage: Register::UIn.decode(block[3]),
        };
        let now = self.bus.now_us();
        self.status.output.store(staged, now);
        Ok(())
    }

    /// Refresh the panel settings (setpoints, backlight, sleep) unless fresh.
    pub fn update_panel_settings(&mut self, force: bool) -> Result<(), S::Error> {
        let now = self.bus.now_us();
        if !force && self.status.settings.is_fresh(now, self.cache_timeout_us) {
            return Ok(());
        }
        let mut setpoints = [0u16; 2];
        self.bus.read_holdings(Register::VSet.address(), &mut setpoints)?;
        self.bus.delay_intervals(2);
        let mut panel = [0u16; 2];
        self.bus.read_holdings(Register::BLed.address(), &mut panel)?;
        let staged = PanelSettings {
            set_voltage: Register::VSet.decode(setpoints[0]),
            set_current: Register::ISet.decode(setpoints[1]),
            backlight_level: panel[0] as u8,
            sleep_timeout: panel[1] as u8,
        };
        let now = self.bus.now_us();
        self.status.settings.store(staged, now);
        Ok(())
    }

    /// Refresh the energy meters and output run time unless fresh.
    pub fn update_energy_meters(&mut self, force: bool) -> Result<(), S::Error> {
        let now = self.bus.now_us();
        if !force && self.status.energy.is_fresh(now, self.cache_timeout_us) {
            return Ok(());
        }
        let mut ah = [0u16; 2];
        self.bus.read_holdings(Register::AhLow.address(), &mut ah)?;
        self.bus.delay_intervals(2);
        let mut wh = [0u16; 2];
        self.bus.read_holdings(Register::WhLow.address(), &mut wh)?;
        self.bus.delay_intervals(2);
        let mut time = [0u16; 3];
        self.bus.read_holdings(Register::OutH.address(), &mut time)?;
        let staged = EnergyMeters {
            amp_hours: u32::from(ah[0]) | u32::from(ah[1]) << 16,
            watt_hours: u32::from(wh[0]) | u32::from(wh[1]) << 16,
            output_seconds: u32::from(time[0]) * 3600 + u32::from(time[1]) * 60 + u32::from(time[2]),
        };
        let now = self.bus.now_us();
        self.status.energy.store(staged, now);
        Ok(())
    }

    /// Refresh both temperature readings unless fresh.
    pub fn update_temperatures(&mut self, force: bool) -> Result<(), S::Error> {
        let now = self.bus.now_us();
        if !force && self.status.temperatures.is_fresh(now, self.cache_timeout_us) {
            return Ok(());
        }
        let mut block = [0u16; 2];
        self.bus.read_holdings(Register::TIn.address(), &mut block)?;
        let staged = Temperatures {
            internal: Register::TIn.decode(block[0]),
            external: Register::TEx.decode(block[1]),
        };
        let now = self.bus.now_us();
        self.status.temperatures.store(staged, now);
        Ok(())
    }

    /// Refresh the switch states and status words unless fresh.
    pub fn update_device_state(&mut self, force: bool) -> Result<(), S::Error> {
        let now = self.bus.now_us();
        if !force && self.status.state.is_fresh(now, self.cache_timeout_us) {
            return Ok(());
        }
        // Lock, Protect, CvCc and OnOff are contiguous; SysStatus sits alone
        // at the end of the band.
        let mut block = [0u16; 4];
        self.bus.read_holdings(Register::Lock.address(), &mut block)?;
        self.bus.delay_intervals(2);
        let sys_status = self.bus.read_single(Register::SysStatus.address())?;
        let staged = DeviceState {
            key_locked: block[0] != 0,
            protection_status: block[1],
            cvcc_mode: block[2],
            output_enabled: block[3] != 0,
            system_status: sys_status,
        };
        let now = self.bus.now_us();
        self.status.state.store(staged, now);
        Ok(())
    }

    /// Refresh the constant-V/C targets unless fresh.
    pub fn update_constant_vc(&mut self, force: bool) -> Result<(), S::Error> {
        let now = self.bus.now_us();
        if !force && self.protection.constant_vc.is_fresh(now, self.cache_timeout_us) {
            return Ok(());
        }
        let mut block = [0u16; 2];
        self.bus.read_holdings(Register::CvSet.address(), &mut block)?;
        let staged = ConstantVc {
            voltage: Register::CvSet.decode(block[0]),
            current: Register::CcSet.decode(block[1]),
        };
        let now = self.bus.now_us();
        self.protection.constant_vc.store(staged, now);
        Ok(())
    }

    /// Refresh the voltage and current protection thresholds unless fresh.
    pub fn update_voltage_current_protection(&mut self, force: bool) -> Result<(), S::Error> {
        let now = self.bus.now_us();
        if !force
            && self
                .protection
                .voltage_current
                .is_fresh(now, self.cache_timeout_us)
        {
            return Ok(());
        }
        let mut block = [0u16; 3];
        self.bus.read_holdings(Register::Vlp.address(), &mut block)?;
        let staged = VoltageCurrentProtection {
            under_voltage: Register::Vlp.decode(block[0]),
            over_voltage: Register::Ovp.decode(block[1]),
            over_current: Register::Ocp.decode(block[2]),
        };
        let now = self.bus.now_us();
        self.protection.voltage_current.store(staged, now);
        Ok(())
    }

    /// Refresh the power protection settings unless fresh.
    pub fn update_power_protection(&mut self, force: bool) -> Result<(), S::Error> {
        let now = self.bus.now_us();
        if !force && self.protection.power.is_fresh(now, self.cache_timeout_us) {
            return Ok(());
        }
        let mut block = [0u16; 3];
        self.bus.read_holdings(Register::Opp.address(), &mut block)?;
        let staged = PowerProtection {
            over_power: Register::Opp.decode(block[0]),
            high_power_hours: block[1],
            high_power_minutes: block[2],
        };
        let now = self.bus.now_us();
        self.protection.power.store(staged, now);
        Ok(())
    }

    /// Refresh the energy protection limits unless fresh.
    pub fn update_energy_protection(&mut self, force: bool) -> Result<(), S::Error> {
        let now = self.bus.now_us();
        if !force && self.protection.energy.is_fresh(now, self.cache_timeout_us) {
            return Ok(());
        }
        let mut block = [0u16; 4];
        self.bus.read_holdings(Register::OahLow.address(), &mut block)?;
        let staged = EnergyProtection {
            over_amp_hours_low: block[0],
            over_amp_hours_high: block[1],
            over_watt_hours_low: block[2],
            over_watt_hours_high: block[3],
        };
        let now = self.bus.now_us();
        self.protection.energy.store(staged, now);
        Ok(())
    }

    /// Refresh the over-temperature threshold unless fresh.
    pub fn update_temperature_protection(&mut self, force: bool) -> Result<(), S::Error> {
        let now = self.bus.now_us();
        if !force && self.protection.temperature.is_fresh(now, self.cache_timeout_us) {
            return Ok(());
        }
        let raw = self.bus.read_single(Register::Otp.address())?;
        let staged = TemperatureProtection {
            over_temperature: Register::Otp.decode(raw),
        };
        let now = self.bus.now_us();
        self.protection.temperature.store(staged, now);
        Ok(())
    }

    /// Refresh the power-on behavior unless fresh.
    pub fn update_startup_setting(&mut self, force: bool) -> Result<(), S::Error> {
        let now = self.bus.now_us();
        if !force && self.protection.startup.is_fresh(now, self.cache_timeout_us) {
            return Ok(());
        }
        let raw = self.bus.read_single(Register::StartupOutput.address())?;
        let staged = StartupSetting {
            output_on_at_startup: raw != 0,
        };
        let now = self.bus.now_us();
        self.protection.startup.store(staged, now);
        Ok(())
    }

    /// Refresh the temperature calibration offsets unless fresh.
    pub fn update_calibration(&mut self, force: bool) -> Result<(), S::Error> {
        let now = self.bus.now_us();
        if !force && self.protection.calibration.is_fresh(now, self.cache_timeout_us) {
            return Ok(());
        }
        let mut block = [0u16; 2];
        self.bus.read_holdings(Register::TInCal.address(), &mut block)?;
        let staged = TempCalibration {
            internal_offset: Register::TInCal.decode(block[0]),
            external_offset: Register::TExCal.decode(block[1]),
        };
        let now = self.bus.now_us();
        self.protection.calibration.store(staged, now);
        Ok(())
    }

    /// Refresh every status subgroup.
    ///
    /// Every subgroup is always attempted, with a settling delay between
    /// them; the first failure is reported after the rest have run, so one
    /// bad subgroup never blocks the others from updating.
    pub fn update_all_status(&mut self, force: bool) -> Result<(), S::Error> {
        let mut result = self.update_output_readings(force);
        self.bus.delay_intervals(2);
        result = result.and(self.update_panel_settings(force));
        self.bus.delay_intervals(2);
        result = result.and(self.update_energy_meters(force));
        self.bus.delay_intervals(2);
        result = result.and(self.update_temperatures(force));
        self.bus.delay_intervals(2);
        let result = result.and(self.update_device_state(force));
        self.cache_valid = result.is_ok();
        result
    }

    /// Refresh every protection and setting subgroup. Same failure policy as
    /// [`SkPsu::update_all_status`].
    pub fn update_all_protection(&mut self, force: bool) -> Result<(), S::Error> {
        let mut result = self.update_constant_vc(force);
        self.bus.delay_intervals(2);
        result = result.and(self.update_voltage_current_protection(force));
        self.bus.delay_intervals(2);
        result = result.and(self.update_power_protection(force));
        self.bus.delay_intervals(2);
        result = result.and(self.update_energy_protection(force));
        self.bus.delay_intervals(2);
        result = result.and(self.update_temperature_protection(force));
        self.bus.delay_intervals(2);
        result = result.and(self.update_startup_setting(force));
        self.bus.delay_intervals(2);
        let result = result.and(self.update_calibration(force));
        self.cache_valid = result.is_ok();
        result
    }

    // --- cached getters -----------------------------------------------------
    //
    // Each getter returns the stored snapshot. With `refresh` set it first
    // forces the owning subgroup's update, swallowing a failed refresh; bare
    // calls never touch the bus, so they are safe in tight display loops.
    // Callers that need failure visibility, or a staleness-gated refresh,
    // call the update method directly.

    pub fn output_voltage(&mut self, refresh: bool) -> f32 {
        if refresh {
            let _ = self.update_output_readings(true);
        }
        self.status.output.get().voltage
    }

    pub fn output_current(&mut self, refresh: bool) -> f32 {
        if refresh {
            let _ = self.update_output_readings(true);
        }
        self.status.output.get().current
    }

    pub fn output_power(&mut self, refresh: bool) -> f32 {
        if refresh {
            let _ = self.update_output_readings(true);
        }
        self.status.output.get().power
    }

    pub fn input_voltage(&mut self, refresh: bool) -> f32 {
        if refresh {
            let _ = self.update_output_readings(true);
        }
        self.status.output.get().input_voltage
    }

    pub fn voltage_setting(&mut self, refresh: bool) -> f32 {
        if refresh {
            let _ = self.update_panel_settings(true);
        }
        self.status.settings.get().set_voltage
    }

    pub fn current_setting(&mut self, refresh: bool) -> f32 {
        if refresh {
            let _ = self.update_panel_settings(true);
        }
        self.status.settings.get().set_current
    }

    pub fn backlight_level(&mut self, refresh: bool) -> u8 {
        if refresh {
            let _ = self.update_panel_settings(true);
        }
        self.status.settings.get().backlight_level
    }

    pub fn sleep_timeout(&mut self, refresh: bool) -> u8 {
        if refresh {
            let _ = self.update_panel_settings(true);
        }
        self.status.settings.get().sleep_timeout
    }

    pub fn amp_hours(&mut self, refresh: bool) -> u32 {
        if refresh {
            let _ = self.update_energy_meters(true);
        }
        self.status.energy.get().amp_hours
    }

    pub fn watt_hours(&mut self, refresh: bool) -> u32 {
        if refresh {
            let _ = self.update_energy_meters(true);
        }
        self.status.energy.get().watt_hours
    }

    pub fn output_seconds(&mut self, refresh: bool) -> u32 {
        if refresh {
            let _ = self.update_energy_meters(true);
        }
        self.status.energy.get().output_seconds
    }

    pub fn internal_temperature(&mut self, refresh: bool) -> f32 {
        if refresh {
            let _ = self.update_temperatures(true);
        }
        self.status.temperatures.get().internal
    }

    pub fn external_temperature(&mut self, refresh: bool) -> f32 {
        if refresh {
            let _ = self.update_temperatures(true);
        }
        self.status.temperatures.get().external
    }

    pub fn output_enabled(&mut self, refresh: bool) -> bool {
        if refresh {
            let _ = self.update_device_state(true);
        }
        self.status.state.get().output_enabled
    }

    pub fn key_locked(&mut self, refresh: bool) -> bool {
        if refresh {
            let _ = self.update_device_state(true);
        }
        self.status.state.get().key_locked
    }

    pub fn protection_alarm(&mut self, refresh: bool) -> ProtectionAlarm {
        if refresh {
            let _ = self.update_device_state(true);
        }
        ProtectionAlarm::from(self.status.state.get().protection_status)
    }

    pub fn system_status(&mut self, refresh: bool) -> u16 {
        if refresh {
            let _ = self.update_device_state(true);
        }
        self.status.state.get().system_status
    }

    pub fn control_mode(&mut self, refresh: bool) -> ControlMode {
        if refresh {
            let _ = self.update_device_state(true);
        }
        ControlMode::from(self.status.state.get().cvcc_mode)
    }

    pub fn is_in_constant_current_mode(&mut self, refresh: bool) -> bool {
        self.control_mode(refresh) == ControlMode::Cc
    }

    pub fn is_in_constant_voltage_mode(&mut self, refresh: bool) -> bool {
        self.control_mode(refresh) == ControlMode::Cv
    }

    pub fn constant_voltage_setting(&mut self, refresh: bool) -> f32 {
        if refresh {
            let _ = self.update_constant_vc(true);
        }
        self.protection.constant_vc.get().voltage
    }

    pub fn constant_current_setting(&mut self, refresh: bool) -> f32 {
        if refresh {
            let _ = self.update_constant_vc(true);
        }
        self.protection.constant_vc.get().current
    }

    pub fn under_voltage_protection(&mut self, refresh: bool) -> f32 {
        if refresh {
            let _ = self.update_voltage_current_protection(true);
        }
        self.protection.voltage_current.get().under_voltage
    }

    pub fn over_voltage_protection(&mut self, refresh: bool) -> f32 {
        if refresh {
            let _ = self.update_voltage_current_protection(true);
        }
        self.protection.voltage_current.get().over_voltage
    }

    pub fn over_current_protection(&mut self, refresh: bool) -> f32 {
        if refresh {
            let _ = self.update_voltage_current_protection(true);
        }
        self.protection.voltage_current.get().over_current
    }

    pub fn over_power_protection(&mut self, refresh: bool) -> f32 {
        if refresh {
            let _ = self.update_power_protection(true);
        }
        self.protection.power.get().over_power
    }

    pub fn high_power_protection_time(&mut self, refresh: bool) -> (u16, u16) {
        if refresh {
            let _ = self.update_power_protection(true);
        }
        let power = self.protection.power.get();
        (power.high_power_hours, power.high_power_minutes)
    }

    pub fn over_amp_hour_protection(&mut self, refresh: bool) -> (u16, u16) {
        if refresh {
            let _ = self.update_energy_protection(true);
        }
        let energy = self.protection.energy.get();
        (energy.over_amp_hours_low, energy.over_amp_hours_high)
    }

    pub fn over_watt_hour_protection(&mut self, refresh: bool) -> (u16, u16) {
        if refresh {
            let _ = self.update_energy_protection(true);
        }
        let energy = self.protection.energy.get();
        (energy.over_watt_hours_low, energy.over_watt_hours_high)
    }

    pub fn over_temperature_protection(&mut self, refresh: bool) -> f32 {
        if refresh {
            let _ = self.update_temperature_protection(true);
        }
        self.protection.temperature.get().over_temperature
    }

    pub fn output_on_at_startup(&mut self, refresh: bool) -> bool {
        if refresh {
            let _ = self.update_startup_setting(true);
        }
        self.protection.startup.get().output_on_at_startup
    }

    pub fn temperature_calibration(&mut self, refresh: bool) -> (f32, f32) {
        if refresh {
            let _ = self.update_calibration(true);
        }
        let cal = self.protection.calibration.get();
        (cal.internal_offset, cal.external_offset)
    }
}
