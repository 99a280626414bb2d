//! Value types for the PSU's Modbus registers.

use strum_macros::EnumIter;

/// Baud rate codes accepted by the [`BaudRate`](crate::registers::Register::BaudRate)
/// register.
///
/// The vendor documentation prints code 5 as both 57600 and 576000 in
/// different tables; 57600 is the standard rate and is treated as canonical
/// here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumIter)]
#[repr(u16)]
pub enum BaudRate {
    B9600 = 0,
    B14400 = 1,
    B19200 = 2,
    B38400 = 3,
    B56000 = 4,
    B57600 = 5,
    /// Factory default.
    #[default]
    B115200 = 6,
    /// __Note:__ Only supported by some of the PSU models.
    B2400 = 7,
    /// __Note:__ Only supported by some of the PSU models.
    B4800 = 8,
}

impl BaudRate {
    /// Bits per second on the wire.
    pub const fn bps(self) -> u32 {
        match self {
            BaudRate::B2400 => 2_400,
            BaudRate::B4800 => 4_800,
            BaudRate::B9600 => 9_600,
            BaudRate::B14400 => 14_400,
            BaudRate::B19200 => 19_200,
            BaudRate::B38400 => 38_400,
            BaudRate::B56000 => 56_000,
            BaudRate::B57600 => 57_600,
            BaudRate::B115200 => 115_200,
        }
    }
}

impl From<BaudRate> for u16 {
    fn from(value: BaudRate) -> Self {
        value as u16
    }
}

impl TryFrom<u16> for BaudRate {
    type Error = ();
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        use BaudRate as B;
        match value {
            0 => Ok(B::B9600),
            1 => Ok(B::B14400),
            2 => Ok(B::B19200),
            3 => Ok(B::B38400),
            4 => Ok(B::B56000),
            5 => Ok(B::B57600),
            6 => Ok(B::B115200),
            7 => Ok(B::B2400),
            8 => Ok(B::B4800),
            _ => Err(()),
        }
    }
}

/// The two regulation modes, reported by the CC/CV register.
///
/// The register holds a single bit, so the modes are mutually exclusive by
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Constant voltage regulation mode. Register value `0`.
    Cv,
    /// Constant current regulation mode. Register value `1`.
    Cc,
}

impl From<u16> for ControlMode {
    fn from(value: u16) -> Self {
        if value == 1 { ControlMode::Cc } else { ControlMode::Cv }
    }
}

impl From<ControlMode> for u16 {
    fn from(value: ControlMode) -> Self {
        match value {
            ControlMode::Cv => 0,
            ControlMode::Cc => 1,
        }
    }
}

/// Temperature unit as configured on the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum TemperatureUnit {
    #[default]
    Celsius = 0,
    Fahrenheit = 1,
}

impl TryFrom<u16> for TemperatureUnit {
    type Error = ();
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TemperatureUnit::Celsius),
            1 => Ok(TemperatureUnit::Fahrenheit),
            _ => Err(()),
        }
    }
}

/// On/off state of a switched register (output, key lock, buzzer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum State {
    #[default]
    Off = 0,
    On = 1,
}

impl From<State> for u16 {
    fn from(value: State) -> Self {
        value as u16
    }
}

impl From<State> for bool {
    fn from(value: State) -> Self {
        matches!(value, State::On)
    }
}

impl From<bool> for State {
    fn from(value: bool) -> Self {
        if value { State::On } else { State::Off }
    }
}

/// Alarm codes reported by the protection status register.
///
/// `0` doubles as "no protection triggered"; out-of-range codes are folded to
/// [`ProtectionAlarm::None`] rather than rejected, matching panel behavior.
#[derive(Debug, EnumIter, PartialEq, Eq, Clone, Copy)]
#[repr(u16)]
pub enum ProtectionAlarm {
    /// 0: no protection triggered.
    None = 0x00,
    /// 1: OVP, output over-voltage.
    OverVoltage = 0x01,
    /// 2: OCP, output over-current.
    OverCurrent = 0x02,
    /// 3: OPP, output over-power.
    OverPower = 0x03,
    /// 4: LVP, input under-voltage.
    InputUnderVoltage = 0x04,
    /// 5: OAH, amp-hour limit reached.
    OverAmpHours = 0x05,
    /// 6: OHP, output time limit reached.
    OverOutputTime = 0x06,
    /// 7: OTP, internal over-temperature.
    OverTemperature = 0x07,
    /// 8: OEP, no-output protection.
    NoOutput = 0x08,
    /// 9: OWH, watt-hour limit reached.
    OverWattHours = 0x09,
    /// 10: ICP, input over-current.
    InputOverCurrent = 0x0A,
    /// 11: ETP, external probe over-temperature.
    ExternalOverTemperature = 0x0B,
}

impl ProtectionAlarm {
    const MAX_VALUE: u16 = Self::ExternalOverTemperature as u16;

    /// Whether any protection is active.
    pub const fn is_triggered(self) -> bool {
        !matches!(self, ProtectionAlarm::None)
    }
}

impl From<u16> for ProtectionAlarm {
    fn from(value: u16) -> Self {
        use ProtectionAlarm as PA;
        match value {
            0x01 => PA::OverVoltage,
            0x02 => PA::OverCurrent,
            0x03 => PA::OverPower,
            0x04 => PA::InputUnderVoltage,
            0x05 => PA::OverAmpHours,
            0x06 => PA::OverOutputTime,
            0x07 => PA::OverTemperature,
            0x08 => PA::NoOutput,
            0x09 => PA::OverWattHours,
            0x0A => PA::InputOverCurrent,
            0x0B => PA::ExternalOverTemperature,
            _ => PA::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn baud_codes_round_trip() {
        for baud in BaudRate::iter() {
            assert_eq!(BaudRate::try_from(baud as u16), Ok(baud));
        }
        assert!(BaudRate::try_from(9).is_err());
    }

    #[test]
    fn canonical_code_five_is_57600() {
        assert_eq!(BaudRate::try_from(5), Ok(BaudRate::B57600));
        assert_eq!(BaudRate::B57600.bps(), 57_600);
    }

    #[test]
    fn alarm_codes_round_trip() {
        for alarm in ProtectionAlarm::iter() {
            assert_eq!(ProtectionAlarm::from(alarm as u16), alarm);
            assert!(alarm as u16 <= ProtectionAlarm::MAX_VALUE);
        }
        // Unknown codes fold to no-alarm.
        assert_eq!(ProtectionAlarm::from(0x40), ProtectionAlarm::None);
        assert!(!ProtectionAlarm::None.is_triggered());
        assert!(ProtectionAlarm::OverVoltage.is_triggered());
    }

    #[test]
    fn control_mode_is_exclusive() {
        assert_eq!(ControlMode::from(0), ControlMode::Cv);
        assert_eq!(ControlMode::from(1), ControlMode::Cc);
        // Anything unexpected reads as CV, the register's resting value.
        assert_eq!(ControlMode::from(7), ControlMode::Cv);
    }
}
