//! Holding-register map of the XY-SKxxx supplies.
//!
//! Two documented bands: `0x0000`-`0x001E` (measurement and panel control) and
//! `0x0050`-`0x005D` (constant-V/C targets and protection settings). Reserved
//! bands in between belong to the Sinilink Wi-Fi module and the RTC and are
//! deliberately not mapped here.
//!
//! Each register carries its fixed-point scale so callers convert physical
//! quantities exactly once, at the accessor boundary.

use crate::error::Error;

/// Access mode of a holding register per the protocol documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Every documented holding register of the XY-SKxxx protocol.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum Register {
    /// __R/W__ - Voltage setting in centivolts. E.g. 5.0 V => `500`.
    VSet = 0x0000,
    /// __R/W__ - Current limit setting in milliamps. E.g. 1.5 A => `1500`.
    ISet = 0x0001,
    /// __R__ - Output voltage display value in centivolts.
    VOut = 0x0002,
    /// __R__ - Output current display value in milliamps.
    IOut = 0x0003,
    /// __R__ - Output power display value in centiwatts.
    Power = 0x0004,
    /// __R__ - Input (supply) voltage display value in centivolts.
    UIn = 0x0005,
    /// __R__ - Output amp-hours, lower 16 bits, in mAh.
    AhLow = 0x0006,
    /// __R__ - Output amp-hours, upper 16 bits.
    AhHigh = 0x0007,
    /// __R__ - Output watt-hours, lower 16 bits, in mWh.
    WhLow = 0x0008,
    /// __R__ - Output watt-hours, upper 16 bits.
    WhHigh = 0x0009,
    /// __R__ - Hours of output-enabled time.
    OutH = 0x000A,
    /// __R__ - Minutes of output-enabled time.
    OutM = 0x000B,
    /// __R__ - Seconds of output-enabled time.
    OutS = 0x000C,
    /// __R__ - Internal temperature in deci-degrees (unit per [`Register::FC`]).
    TIn = 0x000D,
    /// __R__ - External probe temperature in deci-degrees.
    TEx = 0x000E,
    /// __R/W__ - Key lock. `0` unlocked, `1` locked.
    Lock = 0x000F,
    /// __R/W__ - Protection status. Holds the active alarm code, `0` when no
    /// protection has triggered. Writing `0` clears a latched alarm.
    ///
    /// See [`ProtectionAlarm`](crate::types::ProtectionAlarm).
    Protect = 0x0010,
    /// __R__ - Regulation mode. `0` constant-voltage, `1` constant-current.
    ///
    /// See [`ControlMode`](crate::types::ControlMode).
    CvCc = 0x0011,
    /// __R/W__ - Output switch. `0` off, `1` on.
    OnOff = 0x0012,
    /// __R/W__ - Temperature unit. `0` Celsius, `1` Fahrenheit.
    FC = 0x0013,
    /// __R/W__ - Backlight brightness, 0 (darkest) to 5 (brightest).
    BLed = 0x0014,
    /// __R/W__ - Screen sleep timeout in minutes. Factory default 2.
    Sleep = 0x0015,
    /// __R__ - Product model number. The XY-SK120 reports `22873`.
    Model = 0x0016,
    /// __R__ - Firmware version number.
    Version = 0x0017,
    /// __R/W__ - Modbus slave address, 1-247. Factory default 1.
    SlaveAddr = 0x0018,
    /// __R/W__ - Baud rate code. See [`BaudRate`](crate::types::BaudRate).
    BaudRate = 0x0019,
    /// __R/W__ - Internal temperature calibration offset, signed deci-degrees.
    TInCal = 0x001A,
    /// __R/W__ - External temperature calibration offset, signed deci-degrees.
    TExCal = 0x001B,
    /// __R/W__ - Buzzer switch. `0` off, `1` on.
    Buzzer = 0x001C,
    /// __R/W__ - Data group selection, 0-9. Writing recalls the group.
    ExtractM = 0x001D,
    /// __R/W__ - System status word.
    SysStatus = 0x001E,
    /// __R/W__ - Constant-voltage target in centivolts.
    CvSet = 0x0050,
    /// __R/W__ - Constant-current target in milliamps.
    CcSet = 0x0051,
    /// __R/W__ - LVP: input under-voltage protection threshold, centivolts.
    Vlp = 0x0052,
    /// __R/W__ - OVP: output over-voltage protection threshold, centivolts.
    Ovp = 0x0053,
    /// __R/W__ - OCP: output over-current protection threshold, milliamps.
    Ocp = 0x0054,
    /// __R/W__ - OPP: output over-power protection threshold, centiwatts.
    Opp = 0x0055,
    /// __R/W__ - OHP: high-power cutoff time, hours half.
    OhpHours = 0x0056,
    /// __R/W__ - OHP: high-power cutoff time, minutes half.
    OhpMinutes = 0x0057,
    /// __R/W__ - OAH: over-amp-hour threshold, lower 16 bits, mAh.
    OahLow = 0x0058,
    /// __R/W__ - OAH: over-amp-hour threshold, upper 16 bits.
    OahHigh = 0x0059,
    /// __R/W__ - OWH: over-watt-hour threshold, lower 16 bits, 10 mWh units.
    OwhLow = 0x005A,
    /// __R/W__ - OWH: over-watt-hour threshold, upper 16 bits.
    OwhHigh = 0x005B,
    /// __R/W__ - OTP: over-temperature protection threshold, deci-degrees.
    Otp = 0x005C,
    /// __R/W__ - Power-on initialization. `1` enables output at startup.
    StartupOutput = 0x005D,
}

impl Register {
    /// Holding-register address on the bus.
    pub const fn address(self) -> u16 {
        self as u16
    }

    /// Number of 16-bit words occupied. Every mapped register is one word;
    /// 32-bit quantities (Ah, Wh and their thresholds) are modelled as
    /// explicit low/high register pairs.
    pub const fn words(self) -> u8 {
        1
    }

    /// Fixed-point scale: raw register counts per physical unit.
    ///
    /// A scale of 100 means the register holds centi-units, 1000 milli-units,
    /// 10 deci-units, and 1 means the raw value is used as-is.
    pub const fn scale(self) -> u16 {
        use Register as R;
        match self {
            R::VSet | R::VOut | R::UIn | R::CvSet | R::Vlp | R::Ovp => 100,
            R::ISet | R::IOut | R::CcSet | R::Ocp => 1000,
            R::Power | R::Opp => 100,
            R::TIn | R::TEx | R::TInCal | R::TExCal | R::Otp => 10,
            _ => 1,
        }
    }

    /// Documented access mode.
    pub const fn access(self) -> Access {
        use Register as R;
        match self {
            R::VOut
            | R::IOut
            | R::Power
            | R::UIn
            | R::AhLow
            | R::AhHigh
            | R::WhLow
            | R::WhHigh
            | R::OutH
            | R::OutM
            | R::OutS
            | R::TIn
            | R::TEx
            | R::CvCc
            | R::Model
            | R::Version => Access::ReadOnly,
            _ => Access::ReadWrite,
        }
    }

    /// Registers whose raw value is a two's-complement signed quantity.
    ///
    /// The temperature calibration offsets go below zero; every other mapped
    /// register is unsigned.
    pub const fn is_signed(self) -> bool {
        matches!(self, Register::TInCal | Register::TExCal)
    }

    /// Encode a physical quantity into this register's fixed-point raw value,
    /// rounding to the nearest count. Signed registers are encoded as
    /// two's-complement `i16`.
    pub fn encode<I: embedded_io::Error>(self, physical: f32) -> Result<u16, Error<I>> {
        let scaled = physical * self.scale() as f32;
        if self.is_signed() {
            let raw = if scaled < 0.0 { scaled - 0.5 } else { scaled + 0.5 };
            if !(-32768.0..=32767.9).contains(&raw) {
                return Err(Error::OutOfRange);
            }
            return Ok(raw as i16 as u16);
        }
        let raw = scaled + 0.5;
        if !(0.0..=65535.9).contains(&raw) {
            return Err(Error::OutOfRange);
        }
        Ok(raw as u16)
    }

    /// Decode a raw register value into the physical quantity.
    pub fn decode(self, raw: u16) -> f32 {
        if self.is_signed() {
            raw as i16 as f32 / self.scale() as f32
        } else {
            raw as f32 / self.scale() as f32
        }
    }
}

impl From<Register> for u16 {
    fn from(value: Register) -> Self {
        value as u16
    }
}
